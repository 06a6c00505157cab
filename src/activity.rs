//! Activity monitor: turns load samples into idle->busy events.

use crate::backend::FrequencyBackend;
use crate::framework::FreqFramework;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Edge detector over load samples.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    busy: bool,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one load sample. Returns true on an idle->busy transition.
    pub fn observe(&mut self, load: u32) -> bool {
        let was_busy = std::mem::replace(&mut self.busy, load > 0);
        !was_busy && self.busy
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }
}

/// Sample the backend every `interval` and forward activity onsets to the
/// framework until shutdown is signalled.
pub async fn run_activity_monitor(
    framework: Arc<FreqFramework>,
    backend: Arc<dyn FrequencyBackend>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut tracker = ActivityTracker::new();
    info!("Activity monitor sampling every {}ms", interval.as_millis());

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Activity monitor shutting down");
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {
                let load = backend.load().unwrap_or_else(|e| {
                    debug!("Load sample failed, counting as idle: {}", e);
                    0
                });
                if tracker.observe(load) {
                    debug!("GPU became active (load {}%)", load);
                    framework.on_active();
                }
            }
        }
    }
}
