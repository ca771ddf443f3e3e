use std::time::Duration;

/// Engine tuning parameters.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Pause between retries when an async write was only partially accepted.
    pub write_retry_delay: Duration,
}

impl Default for PlayerConfig {
    /// Short enough to refill a device buffer of typical length before it drains.
    fn default() -> Self {
        Self {
            write_retry_delay: Duration::from_millis(20),
        }
    }
}
