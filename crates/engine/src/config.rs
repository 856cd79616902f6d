//! Tuning knobs for the engine.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Engine-wide settings. Per-node behaviour lives on each node's
/// [`RetryPolicy`](crate::RetryPolicy).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on nodes in flight within one group. `None` runs the whole
    /// group at once.
    pub max_parallel_nodes: Option<NonZeroUsize>,
    /// Ceiling applied to every computed retry delay.
    pub max_retry_delay: Option<Duration>,
    /// Persist the context when a cancellation takes effect.
    pub checkpoint_on_cancel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: None,
            max_retry_delay: Some(Duration::from_secs(300)),
            checkpoint_on_cancel: true,
        }
    }
}

impl EngineConfig {
    /// A limit of zero is treated as "no limit".
    pub fn with_max_parallel_nodes(mut self, limit: usize) -> Self {
        self.max_parallel_nodes = NonZeroUsize::new(limit);
        self
    }

    pub fn with_max_retry_delay(mut self, cap: Option<Duration>) -> Self {
        self.max_retry_delay = cap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_parallelism_means_unbounded() {
        assert_eq!(EngineConfig::default().with_max_parallel_nodes(0).max_parallel_nodes, None);
        assert_eq!(
            EngineConfig::default().with_max_parallel_nodes(3).max_parallel_nodes,
            NonZeroUsize::new(3)
        );
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_parallel_nodes, None);
        assert_eq!(config.max_retry_delay, Some(Duration::from_secs(300)));
        assert!(config.checkpoint_on_cancel);
    }
}
