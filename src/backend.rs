//! Frequency-request backend interface.
//!
//! The governor only observes the GPU and submits frequency requests through
//! this trait. Every query is synchronous and must not block for long.

use crate::error::BackendError;

/// Frequency value in the backend's native unit (Hz for devfreq).
pub type Frequency = u64;

/// Minimal interface the governor expects from the frequency layer.
pub trait FrequencyBackend: Send + Sync {
    /// Recent GPU utilization, 0-100.
    fn load(&self) -> Result<u32, BackendError>;

    /// Milliseconds the GPU has been continuously busy since it last went idle.
    fn delta_active(&self) -> Result<u64, BackendError>;

    /// Currently applied frequency.
    fn frequency(&self) -> Result<Frequency, BackendError>;

    fn frequency_min(&self) -> Result<Frequency, BackendError>;

    fn frequency_max(&self) -> Result<Frequency, BackendError>;

    /// Submit a frequency request. The backend may clamp or ignore it.
    fn request_frequency(&self, frequency: Frequency) -> Result<(), BackendError>;
}
