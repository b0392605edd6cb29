use std::time::Duration;

use exchange::ExchangeConfig;

/// Every named constant across the whole pipeline, collected in one place
/// so an embedding application can override them without reaching into
/// each crate individually.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub exchange: ExchangeConfig,
    /// The pause between pushing a new key to the workers and enabling
    /// encryption, on platforms that need it (chain-of-transforms).
    pub sync_delay: Duration,
    /// How often the pipeline stats snapshot is refreshed.
    pub stats_update_interval: Duration,
    /// How long the controller waits after the first remote track arrives
    /// before starting the handshake, giving the peer connection time to
    /// settle.
    pub e2ee_init_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            sync_delay: Duration::from_millis(200),
            stats_update_interval: Duration::from_secs(5),
            e2ee_init_delay: Duration::from_millis(1500),
        }
    }
}
