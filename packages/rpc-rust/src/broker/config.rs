//! Broker connection and topology configuration.

/// Connection parameters for the broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host name.
    pub host: String,
    /// Broker AMQP port.
    pub port: u16,
    /// Virtual host to open.
    pub vhost: String,
    /// Login user name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

/// Exchange, queue and routing-key names shared by clients and workers.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// Direct exchange requests are published to.
    pub services_exchange: String,
    /// Direct exchange replies are published to.
    pub responses_exchange: String,
    /// Well-known durable queue the calculator workers consume.
    pub service_queue: String,
    /// Key binding `service_queue` to `services_exchange`.
    pub routing_key: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            services_exchange: "services".to_string(),
            responses_exchange: "responses".to_string(),
            service_queue: "calculator_pool".to_string(),
            routing_key: "calculator".to_string(),
        }
    }
}
