use crate::broker::TopologyConfig;

/// Worker-side configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Exchanges, service queue and routing key to serve.
    pub topology: TopologyConfig,
    /// Capacity of the task channel between the queue consumer and the
    /// calculator runnable. A full channel stalls consumption.
    pub task_channel_capacity: usize,
    /// Interval between periodic stats log lines in milliseconds.
    pub stats_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            topology: TopologyConfig::default(),
            task_channel_capacity: 256,
            stats_interval_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.topology.service_queue, "calculator_pool");
        assert_eq!(config.topology.routing_key, "calculator");
        assert_eq!(config.task_channel_capacity, 256);
        assert_eq!(config.stats_interval_ms, 60_000);
    }
}
