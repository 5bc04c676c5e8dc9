//! Edit engine configuration.

use crate::error::EditError;

/// Edit engine configuration.
#[derive(Debug, Clone)]
pub struct EditConfig {
    /// Task executor worker count (0 = available parallelism)
    pub worker_count: usize,
    /// Polling period in milliseconds for frame-loop style drivers
    pub poll_interval_ms: u64,
    /// Maximum changes submitted per application request (0 = unlimited)
    pub max_batch_size: usize,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            poll_interval_ms: 16, // ~60 frames per second
            max_batch_size: 0,
        }
    }
}

impl EditConfig {
    /// Returns the worker count with `0` resolved to the available parallelism.
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<(), EditError> {
        if self.poll_interval_ms == 0 {
            return Err(EditError::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the batch size limit, if any.
    pub fn batch_limit(&self) -> Option<usize> {
        (self.max_batch_size > 0).then_some(self.max_batch_size)
    }
}
