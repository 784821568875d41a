//! Registry of in-flight calls keyed by correlation id.
//!
//! Each entry is a oneshot sender. Resolving removes the entry, so a call is
//! resolved at most once no matter how many replies or returns arrive for it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use tokio::sync::oneshot;

use super::error::{RpcError, TransportFault};

/// Correlation id stamped on a request and echoed on its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

type Resolution = Result<Vec<u8>, TransportFault>;

/// Thread-safe map of pending calls.
#[derive(Debug)]
pub struct PendingCalls {
    calls: DashMap<CorrelationId, oneshot::Sender<Resolution>>,
    next_id: AtomicU64,
}

impl PendingCalls {
    /// Creates an empty registry. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new call under a fresh correlation id.
    pub fn register(&self) -> (CorrelationId, PendingReply) {
        let id = CorrelationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.calls.insert(id, tx);
        (id, PendingReply { id, rx })
    }

    /// Resolves `id` with a reply payload. Returns `false` if `id` is unknown
    /// (stale, duplicate, or already resolved).
    pub fn resolve_reply(&self, id: CorrelationId, body: Vec<u8>) -> bool {
        self.resolve(id, Ok(body))
    }

    /// Resolves `id` with a transport fault. Returns `false` if `id` is unknown.
    pub fn resolve_fault(&self, id: CorrelationId, fault: TransportFault) -> bool {
        self.resolve(id, Err(fault))
    }

    fn resolve(&self, id: CorrelationId, resolution: Resolution) -> bool {
        match self.calls.remove(&id) {
            // The caller may have dropped its future; the call still counts as resolved.
            Some((_, tx)) => {
                let _ = tx.send(resolution);
                true
            }
            None => false,
        }
    }

    /// Forgets `id` without resolving it (its future sees `RpcError::Closed`).
    pub fn cancel(&self, id: CorrelationId) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Whether `id` is still outstanding.
    #[must_use]
    pub fn contains(&self, id: CorrelationId) -> bool {
        self.calls.contains_key(&id)
    }

    /// Number of outstanding calls.
    #[must_use]
    pub fn count(&self) -> usize {
        self.calls.len()
    }

    /// Drops every outstanding call; their futures fail with `RpcError::Closed`.
    pub fn abandon_all(&self) -> usize {
        let before = self.calls.len();
        self.calls.clear();
        before
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

/// Future side of a pending call.
///
/// Yields the raw reply payload, or `RpcError::Transport` if the broker
/// returned the request, or `RpcError::Closed` if the registry dropped it.
#[derive(Debug)]
pub struct PendingReply {
    id: CorrelationId,
    rx: oneshot::Receiver<Resolution>,
}

impl PendingReply {
    /// Correlation id of this call.
    #[must_use]
    pub fn id(&self) -> CorrelationId {
        self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Vec<u8>, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(fault)) => Err(RpcError::Transport(fault)),
            Err(_) => Err(RpcError::Closed),
        })
    }
}
