//! The on3demand governor.
//!
//! A demand-based control loop: maximum frequency at activity onset or under
//! high load, proportional scale-down only after a run of low-load samples,
//! minimum frequency once the GPU stayed idle for a whole poll interval.
//!
//! States:
//! - Idle: polling disabled, nothing scheduled. Left only through `on_active`.
//! - Polling: polling enabled, exactly one re-evaluation pending. Each
//!   re-evaluation either predicts and re-arms (GPU was busy) or requests the
//!   minimum frequency and falls back to Idle.

use crate::attributes::{AttributeGroup, AttributeRegistry};
use crate::backend::{Frequency, FrequencyBackend};
use crate::delayed_work::DelayedWork;
use crate::error::GovernorError;
use crate::framework::{Governor, HwContext};
use crate::metrics::{MetricsCollector, RequestKind};
use crate::tunables::{parse_unsigned, Tunable, Tunables};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registration name of this governor and of its attribute group.
pub const GOVERNOR_NAME: &str = "on3demand";

/// Mutable governor state, always accessed under `Inner::state`.
struct GovernorState {
    tunables: Tunables,
    /// Consecutive low-load samples seen so far
    low_load_cnt: u32,
    polling_enabled: bool,
    /// Present while the governor is started
    work: Option<DelayedWork>,
}

impl GovernorState {
    fn defaulted() -> Self {
        Self {
            tunables: Tunables::default(),
            low_load_cnt: 0,
            polling_enabled: false,
            work: None,
        }
    }

    fn poll_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.tunables.poll_interval))
    }
}

/// Copy of the governor state taken under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorSnapshot {
    pub tunables: Tunables,
    pub low_load_cnt: u32,
    pub polling_enabled: bool,
    pub started: bool,
    /// A re-evaluation is armed
    pub timer_pending: bool,
}

struct Inner {
    backend: Arc<dyn FrequencyBackend>,
    attributes: Arc<AttributeRegistry>,
    metrics: Arc<MetricsCollector>,
    state: Mutex<GovernorState>,
}

/// Handle to an on3demand governor instance. Clones share the same state.
#[derive(Clone)]
pub struct On3demand {
    inner: Arc<Inner>,
}

impl On3demand {
    pub fn new(
        backend: Arc<dyn FrequencyBackend>,
        attributes: Arc<AttributeRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                attributes,
                metrics,
                state: Mutex::new(GovernorState::defaulted()),
            }),
        }
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        let state = self.inner.state();
        GovernorSnapshot {
            tunables: state.tunables,
            low_load_cnt: state.low_load_cnt,
            polling_enabled: state.polling_enabled,
            started: state.work.is_some(),
            timer_pending: state.work.as_ref().is_some_and(DelayedWork::is_pending),
        }
    }

    /// Set one tunable (clamped) and reset the hysteresis counter.
    /// Returns the value actually stored.
    pub fn set_tunable(&self, tunable: Tunable, raw: u64) -> u32 {
        self.inner.set_tunable(tunable, raw)
    }

    /// Apply a full set of tunables in one critical section.
    pub fn apply_tunables(&self, tunables: &Tunables) {
        let mut state = self.inner.state();
        for tunable in Tunable::ALL {
            state.tunables.set(tunable, u64::from(tunables.get(tunable)));
        }
        state.low_load_cnt = 0;
        info!("Tunables applied: {:?}", state.tunables);
    }
}

#[async_trait]
impl Governor for On3demand {
    fn name(&self) -> &'static str {
        GOVERNOR_NAME
    }

    async fn start(&self, ctx: &HwContext) -> Result<(), GovernorError> {
        let previous = {
            let mut state = self.inner.state();
            let previous = state.work.take();
            *state = GovernorState::defaulted();
            previous
        };
        if let Some(previous) = previous {
            warn!("Governor '{}' restarted without stop", GOVERNOR_NAME);
            previous.cancel_sync().await;
            self.inner.attributes.remove_group(GOVERNOR_NAME);
        }

        let group = Arc::new(TunablesGroup {
            governor: Arc::downgrade(&self.inner),
        });
        self.inner.attributes.create_group(group)?;

        let governor = Arc::downgrade(&self.inner);
        let work = DelayedWork::spawn(GOVERNOR_NAME, move || {
            if let Some(inner) = governor.upgrade() {
                inner.on_timeout();
            }
        });
        self.inner.state().work = Some(work);

        info!(
            "Governor '{}' started (gpu active: {})",
            GOVERNOR_NAME, ctx.active
        );
        Ok(())
    }

    async fn stop(&self) {
        let work = {
            let mut state = self.inner.state();
            state.polling_enabled = false;
            state.work.take()
        };
        if let Some(work) = work {
            work.cancel_sync().await;
        }
        self.inner.attributes.remove_group(GOVERNOR_NAME);
    }

    fn on_active(&self) {
        self.inner.on_active();
    }

    fn on_frame_done(&self) {
        self.inner.on_frame_done();
    }
}

impl Inner {
    // The state is plain data that is consistent between statements, so a
    // poisoned lock is still usable.
    fn state(&self) -> MutexGuard<'_, GovernorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_active(&self) {
        let mut state = self.state();
        if state.work.is_none() {
            debug!("Active event ignored, governor not started");
            return;
        }
        if state.polling_enabled {
            return;
        }

        // A fresh burst of activity never starts throttled.
        self.request_max();
        state.low_load_cnt = 0;
        state.polling_enabled = true;

        let delay = state.poll_delay();
        if let Some(work) = state.work.as_ref() {
            work.reschedule(delay);
        }
        debug!("GPU active, polling every {}ms", delay.as_millis());
    }

    fn on_frame_done(&self) {
        let mut state = self.state();
        let Some(work) = state.work.as_ref() else {
            debug!("Frame-done event ignored, governor not started");
            return;
        };

        // Re-align the polling cadence with the workload.
        if state.polling_enabled {
            work.reschedule(state.poll_delay());
        }
        self.predict(&mut state);
    }

    fn on_timeout(&self) {
        let mut state = self.state();
        if state.work.is_none() || !state.polling_enabled {
            debug!("Stale re-evaluation discarded");
            return;
        }

        if self.read_delta_active() == 0 {
            // Idle for the whole interval: park at minimum until next activity.
            self.request_min();
            state.low_load_cnt = 0;
            state.polling_enabled = false;
            // A frame completion may have re-armed the timer while this run
            // was waiting for the lock.
            if let Some(work) = state.work.as_ref() {
                work.cancel();
            }
            self.metrics.record_idle_transition();
            debug!("GPU idle for a full poll interval, polling disabled");
            return;
        }

        self.predict(&mut state);
        state.polling_enabled = true;
        let delay = state.poll_delay();
        if let Some(work) = state.work.as_ref() {
            work.reschedule(delay);
        }
    }

    /// Scaling decision. Caller holds the state lock.
    fn predict(&self, state: &mut GovernorState) {
        let load = self.read_load();
        let delta_active = self.read_delta_active();
        let tunables = state.tunables;

        if delta_active > u64::from(tunables.frame_done_deadline) {
            // Busy longer than a frame: display-paced work about to miss vsync.
            debug!(
                "Active for {}ms (deadline {}ms), requesting max",
                delta_active, tunables.frame_done_deadline
            );
            state.low_load_cnt = 0;
            self.request_max();
        } else if load >= tunables.up_threshold {
            debug!("Load {}% >= {}%, requesting max", load, tunables.up_threshold);
            state.low_load_cnt = 0;
            self.request_max();
        } else if load <= tunables.down_threshold {
            state.low_load_cnt = state.low_load_cnt.saturating_add(1);
            if state.low_load_cnt >= tunables.history_size {
                state.low_load_cnt = 0;
                self.scale_down(load);
            }
        } else {
            state.low_load_cnt = 0;
        }
    }

    /// Proportional scale-down: `current * load / 10`.
    fn scale_down(&self, load: u32) {
        match self.backend.frequency() {
            Ok(current) => {
                let target = current.saturating_mul(u64::from(load)) / 10;
                debug!(
                    "Sustained load {}%, scaling {} -> {}",
                    load, current, target
                );
                self.request(target, RequestKind::ScaleDown);
            }
            Err(e) => {
                self.metrics.record_backend_error();
                warn!("Cannot read current frequency, skipping scale-down: {}", e);
            }
        }
    }

    fn request_max(&self) {
        match self.backend.frequency_max() {
            Ok(max) => self.request(max, RequestKind::Max),
            Err(e) => {
                self.metrics.record_backend_error();
                warn!("Cannot read maximum frequency: {}", e);
            }
        }
    }

    fn request_min(&self) {
        match self.backend.frequency_min() {
            Ok(min) => self.request(min, RequestKind::Min),
            Err(e) => {
                self.metrics.record_backend_error();
                warn!("Cannot read minimum frequency: {}", e);
            }
        }
    }

    fn request(&self, frequency: Frequency, kind: RequestKind) {
        match self.backend.request_frequency(frequency) {
            Ok(()) => self.metrics.record_request(kind),
            Err(e) => {
                self.metrics.record_backend_error();
                warn!("Frequency request {} failed: {}", frequency, e);
            }
        }
    }

    /// Unreadable load counts as idle.
    fn read_load(&self) -> u32 {
        self.backend.load().unwrap_or_else(|e| {
            self.metrics.record_backend_error();
            warn!("Cannot read GPU load, assuming idle: {}", e);
            0
        })
    }

    /// Unreadable activity counts as idle.
    fn read_delta_active(&self) -> u64 {
        self.backend.delta_active().unwrap_or_else(|e| {
            self.metrics.record_backend_error();
            warn!("Cannot read GPU activity, assuming idle: {}", e);
            0
        })
    }

    fn set_tunable(&self, tunable: Tunable, raw: u64) -> u32 {
        let mut state = self.state();
        let value = state.tunables.set(tunable, raw);
        state.low_load_cnt = 0;
        info!("Tunable {} set to {}", tunable.name(), value);
        value
    }
}

/// The `on3demand` attribute group.
struct TunablesGroup {
    governor: Weak<Inner>,
}

impl TunablesGroup {
    fn governor(&self, attribute: &str) -> Result<Arc<Inner>, GovernorError> {
        self.governor
            .upgrade()
            .ok_or_else(|| GovernorError::unknown_attribute(GOVERNOR_NAME, attribute))
    }
}

impl AttributeGroup for TunablesGroup {
    fn name(&self) -> &str {
        GOVERNOR_NAME
    }

    fn attributes(&self) -> Vec<&'static str> {
        Tunable::ALL.iter().map(|t| t.name()).collect()
    }

    fn show(&self, attribute: &str) -> Result<String, GovernorError> {
        let tunable = Tunable::from_name(attribute)
            .ok_or_else(|| GovernorError::unknown_attribute(GOVERNOR_NAME, attribute))?;
        let value = self.governor(attribute)?.state().tunables.get(tunable);
        Ok(format!("{}\n", value))
    }

    fn store(&self, attribute: &str, value: &str) -> Result<(), GovernorError> {
        let tunable = Tunable::from_name(attribute)
            .ok_or_else(|| GovernorError::unknown_attribute(GOVERNOR_NAME, attribute))?;
        let raw = parse_unsigned(value).ok_or_else(|| GovernorError::InvalidInput {
            attribute: attribute.to_string(),
            value: value.to_string(),
        })?;

        self.governor(attribute)?.set_tunable(tunable, raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, TEST_FREQ_MAX, TEST_FREQ_MIN};
    use proptest::prelude::*;

    struct Fixture {
        governor: On3demand,
        backend: Arc<MemoryBackend>,
        attributes: Arc<AttributeRegistry>,
        metrics: Arc<MetricsCollector>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let attributes = Arc::new(AttributeRegistry::new());
        let metrics = Arc::new(MetricsCollector::new());
        let governor = On3demand::new(
            Arc::clone(&backend) as Arc<dyn FrequencyBackend>,
            Arc::clone(&attributes),
            Arc::clone(&metrics),
        );
        Fixture {
            governor,
            backend,
            attributes,
            metrics,
        }
    }

    async fn started() -> Fixture {
        let fx = fixture();
        fx.governor.start(&HwContext::default()).await.unwrap();
        fx
    }

    /// Run one prediction and return the resulting hysteresis counter.
    fn predict(governor: &On3demand) -> u32 {
        let inner = &governor.inner;
        let mut state = inner.state();
        inner.predict(&mut state);
        state.low_load_cnt
    }

    fn set_counter(governor: &On3demand, count: u32) {
        governor.inner.state().low_load_cnt = count;
    }

    fn poll(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_high_load_requests_max() {
        let fx = fixture();
        fx.backend.set_load(96);

        assert_eq!(predict(&fx.governor), 0);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);
    }

    #[test]
    fn test_scale_down_after_history() {
        let fx = fixture();
        fx.governor.set_tunable(Tunable::HistorySize, 3);
        fx.backend.set_current(200_000_000);
        fx.backend.set_load(70);

        assert_eq!(predict(&fx.governor), 1);
        assert_eq!(predict(&fx.governor), 2);
        assert!(fx.backend.requests().is_empty());

        assert_eq!(predict(&fx.governor), 0);
        assert_eq!(fx.backend.requests(), vec![200_000_000 * 70 / 10]);
    }

    #[test]
    fn test_scale_down_truncates() {
        let fx = fixture();
        fx.governor.set_tunable(Tunable::HistorySize, 1);
        fx.backend.set_current(333);
        fx.backend.set_load(7);

        predict(&fx.governor);
        assert_eq!(fx.backend.last_request(), Some(233));
    }

    #[test]
    fn test_threshold_boundaries_are_inclusive() {
        let fx = fixture();
        fx.governor.set_tunable(Tunable::HistorySize, 1);
        fx.backend.set_current(1000);

        fx.backend.set_load(95);
        predict(&fx.governor);
        assert_eq!(fx.backend.last_request(), Some(TEST_FREQ_MAX));

        fx.backend.set_load(75);
        predict(&fx.governor);
        assert_eq!(fx.backend.last_request(), Some(1000 * 75 / 10));
    }

    #[test]
    fn test_inverted_thresholds_accepted_literally() {
        let fx = fixture();
        fx.governor.set_tunable(Tunable::UpThreshold, 50);
        fx.governor.set_tunable(Tunable::DownThreshold, 80);
        fx.governor.set_tunable(Tunable::HistorySize, 1);

        // 60 is both >= up and <= down: the up branch wins.
        fx.backend.set_load(60);
        assert_eq!(predict(&fx.governor), 0);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);
    }

    #[test]
    fn test_spike_discards_low_load_history() {
        let fx = fixture();
        fx.governor.set_tunable(Tunable::HistorySize, 3);
        fx.backend.set_load(10);
        predict(&fx.governor);
        predict(&fx.governor);

        fx.backend.set_load(99);
        assert_eq!(predict(&fx.governor), 0);

        fx.backend.set_load(10);
        assert_eq!(predict(&fx.governor), 1);
    }

    #[test]
    fn test_backend_failure_is_absorbed() {
        let fx = fixture();
        fx.governor.set_tunable(Tunable::HistorySize, 1);
        fx.backend.set_failing(true);

        // Unreadable load is treated as idle, the request itself fails quietly.
        assert_eq!(predict(&fx.governor), 0);
        assert!(fx.backend.requests().is_empty());
        assert!(fx.metrics.get_metrics().backend_errors >= 3);
    }

    proptest! {
        #[test]
        fn prop_dead_band_resets_without_request(load in 76u32..95, prior in 0u32..10) {
            let fx = fixture();
            set_counter(&fx.governor, prior);
            fx.backend.set_load(load);

            prop_assert_eq!(predict(&fx.governor), 0);
            prop_assert!(fx.backend.requests().is_empty());
        }

        #[test]
        fn prop_high_load_requests_max(load in 95u32..=100, prior in 0u32..10) {
            let fx = fixture();
            set_counter(&fx.governor, prior);
            fx.backend.set_load(load);

            prop_assert_eq!(predict(&fx.governor), 0);
            prop_assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);
        }

        #[test]
        fn prop_deadline_overrides_load(
            load in 0u32..=100,
            delta_active in 17u64..100_000,
            prior in 0u32..10,
        ) {
            let fx = fixture();
            set_counter(&fx.governor, prior);
            fx.backend.set_load(load);
            fx.backend.set_delta_active(delta_active);

            prop_assert_eq!(predict(&fx.governor), 0);
            prop_assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);
        }

        #[test]
        fn prop_low_load_waits_for_history(
            history in 1u32..20,
            load in 0u32..=75,
            current in 1u64..1_000_000_000,
        ) {
            let fx = fixture();
            fx.governor.set_tunable(Tunable::HistorySize, u64::from(history));
            fx.backend.set_current(current);
            fx.backend.set_load(load);

            for expected in 1..history {
                prop_assert_eq!(predict(&fx.governor), expected);
            }
            prop_assert!(fx.backend.requests().is_empty());

            prop_assert_eq!(predict(&fx.governor), 0);
            prop_assert_eq!(fx.backend.requests(), vec![current * u64::from(load) / 10]);
        }
    }

    #[tokio::test]
    async fn test_start_resets_to_defaults() {
        let fx = fixture();
        fx.governor.set_tunable(Tunable::UpThreshold, 50);
        set_counter(&fx.governor, 4);

        fx.governor.start(&HwContext::default()).await.unwrap();

        let snapshot = fx.governor.snapshot();
        assert_eq!(snapshot.tunables, Tunables::default());
        assert_eq!(snapshot.low_load_cnt, 0);
        assert!(!snapshot.polling_enabled);
        assert!(snapshot.started);
        assert!(fx.attributes.contains(GOVERNOR_NAME));

        fx.governor.stop().await;
        assert!(!fx.attributes.contains(GOVERNOR_NAME));
        assert!(!fx.governor.snapshot().started);
    }

    #[tokio::test]
    async fn test_start_fails_when_group_taken() {
        let fx = fixture();
        let squatter = Arc::new(TunablesGroup {
            governor: Weak::new(),
        });
        fx.attributes.create_group(squatter).unwrap();

        let err = fx
            .governor
            .start(&HwContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GovernorError::RegistrationFailure { .. }));
        assert!(!fx.governor.snapshot().started);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let fx = fixture();
        fx.governor.stop().await;
        fx.governor.stop().await;
        assert!(!fx.governor.snapshot().started);
    }

    #[tokio::test]
    async fn test_events_ignored_before_start() {
        let fx = fixture();
        fx.backend.set_load(99);

        fx.governor.on_active();
        fx.governor.on_frame_done();

        assert!(fx.backend.requests().is_empty());
        assert!(!fx.governor.snapshot().polling_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_active_requests_max_and_polls() {
        let fx = started().await;
        set_counter(&fx.governor, 5);

        fx.governor.on_active();

        let snapshot = fx.governor.snapshot();
        assert!(snapshot.polling_enabled);
        assert_eq!(snapshot.low_load_cnt, 0);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);
        fx.governor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_active_is_idempotent() {
        let fx = started().await;

        fx.governor.on_active();
        set_counter(&fx.governor, 2);
        fx.governor.on_active();

        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);
        assert_eq!(fx.governor.snapshot().low_load_cnt, 2);
        fx.governor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_idle_parks_at_min() {
        let fx = started().await;
        fx.governor.on_active();
        fx.backend.clear_requests();
        fx.backend.set_delta_active(0);

        fx.governor.inner.on_timeout();

        let snapshot = fx.governor.snapshot();
        assert!(!snapshot.polling_enabled);
        assert_eq!(snapshot.low_load_cnt, 0);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MIN]);
        assert_eq!(fx.metrics.get_metrics().idle_transitions, 1);

        // The timer armed by on_active is disarmed on the way to Idle.
        tokio::time::sleep(poll(200)).await;
        assert!(!fx.governor.snapshot().timer_pending);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MIN]);
        fx.governor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_transition_disarms_timer_rearmed_by_frame_done() {
        let fx = started().await;
        fx.backend.set_load(80);
        fx.backend.set_delta_active(0);

        fx.governor.on_active();
        tokio::time::sleep(poll(70)).await;

        // A frame completes while the re-evaluation waits for the lock.
        fx.governor.on_frame_done();
        fx.governor.inner.on_timeout();
        assert!(!fx.governor.snapshot().polling_enabled);

        tokio::time::sleep(poll(60)).await;
        assert!(!fx.governor.snapshot().timer_pending);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX, TEST_FREQ_MIN]);

        // The new burst gets a full poll interval (t=130 -> t=205).
        fx.governor.on_active();
        tokio::time::sleep(poll(20)).await;
        let snapshot = fx.governor.snapshot();
        assert!(snapshot.polling_enabled);
        assert!(snapshot.timer_pending);
        assert_eq!(
            fx.backend.requests(),
            vec![TEST_FREQ_MAX, TEST_FREQ_MIN, TEST_FREQ_MAX]
        );

        tokio::time::sleep(poll(60)).await;
        assert!(!fx.governor.snapshot().polling_enabled);
        assert_eq!(
            fx.backend.requests(),
            vec![TEST_FREQ_MAX, TEST_FREQ_MIN, TEST_FREQ_MAX, TEST_FREQ_MIN]
        );
        fx.governor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_busy_predicts_and_keeps_polling() {
        let fx = started().await;
        fx.governor.on_active();
        fx.backend.clear_requests();
        fx.backend.set_delta_active(5);
        fx.backend.set_load(99);

        fx.governor.inner.on_timeout();

        assert!(fx.governor.snapshot().polling_enabled);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);
        fx.governor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_runs_until_gpu_goes_idle() {
        let fx = started().await;
        fx.backend.set_load(80);
        fx.backend.set_delta_active(5);

        fx.governor.on_active();
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);

        // Several dead-band re-evaluations, no further requests.
        tokio::time::sleep(poll(300)).await;
        assert!(fx.governor.snapshot().polling_enabled);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);

        fx.backend.set_delta_active(0);
        tokio::time::sleep(poll(100)).await;
        assert!(!fx.governor.snapshot().polling_enabled);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX, TEST_FREQ_MIN]);

        // Polling terminated itself.
        tokio::time::sleep(poll(1000)).await;
        assert_eq!(fx.backend.requests().len(), 2);
        fx.governor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_done_resyncs_poll_timer() {
        let fx = started().await;
        fx.backend.set_load(80);
        fx.backend.set_delta_active(0);

        fx.governor.on_active();
        tokio::time::sleep(poll(50)).await;
        fx.governor.on_frame_done();

        // Original deadline (t=75) passed without the idle re-evaluation.
        tokio::time::sleep(poll(50)).await;
        assert!(fx.governor.snapshot().polling_enabled);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);

        // Rescheduled deadline (t=125).
        tokio::time::sleep(poll(50)).await;
        assert!(!fx.governor.snapshot().polling_enabled);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX, TEST_FREQ_MIN]);
        fx.governor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_done_predicts_without_polling() {
        let fx = started().await;
        fx.backend.set_load(99);

        fx.governor.on_frame_done();

        assert!(!fx.governor.snapshot().polling_enabled);
        assert_eq!(fx.backend.requests(), vec![TEST_FREQ_MAX]);
        fx.governor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_reevaluation() {
        let fx = started().await;
        fx.backend.set_delta_active(0);
        fx.governor.on_active();
        let before = fx.backend.requests();

        fx.governor.stop().await;
        let snapshot = fx.governor.snapshot();

        tokio::time::sleep(poll(2 * 75)).await;
        assert_eq!(fx.backend.requests(), before);
        assert_eq!(fx.governor.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn test_attribute_write_resets_hysteresis() {
        let fx = started().await;
        fx.attributes
            .store(GOVERNOR_NAME, "history_size", "3")
            .unwrap();
        fx.backend.set_load(70);

        predict(&fx.governor);
        assert_eq!(predict(&fx.governor), 2);

        fx.attributes
            .store(GOVERNOR_NAME, "poll_interval", "75")
            .unwrap();
        assert_eq!(fx.governor.snapshot().low_load_cnt, 0);

        // One more low-load sample: counter 1 of 3, no scale-down.
        assert_eq!(predict(&fx.governor), 1);
        assert!(fx.backend.requests().is_empty());
        fx.governor.stop().await;
    }

    #[tokio::test]
    async fn test_attribute_show_and_clamp() {
        let fx = started().await;

        assert_eq!(fx.attributes.show(GOVERNOR_NAME, "up_threshold").unwrap(), "95\n");

        fx.attributes
            .store(GOVERNOR_NAME, "up_threshold", "250")
            .unwrap();
        fx.attributes
            .store(GOVERNOR_NAME, "frame_done_deadline", "0")
            .unwrap();

        let tunables = fx.governor.snapshot().tunables;
        assert_eq!(tunables.up_threshold, 100);
        assert_eq!(tunables.frame_done_deadline, 1);
        fx.governor.stop().await;
    }

    #[tokio::test]
    async fn test_attribute_rejects_non_numeric() {
        let fx = started().await;
        set_counter(&fx.governor, 3);

        let err = fx
            .attributes
            .store(GOVERNOR_NAME, "down_threshold", "lots")
            .unwrap_err();

        assert!(matches!(err, GovernorError::InvalidInput { .. }));
        let snapshot = fx.governor.snapshot();
        assert_eq!(snapshot.tunables.down_threshold, 75);
        assert_eq!(snapshot.low_load_cnt, 3);
        fx.governor.stop().await;
    }

    #[tokio::test]
    async fn test_attribute_unknown_name() {
        let fx = started().await;
        assert!(matches!(
            fx.attributes.show(GOVERNOR_NAME, "sampling_rate"),
            Err(GovernorError::UnknownAttribute { .. })
        ));
        fx.governor.stop().await;
    }

    #[test]
    fn test_apply_tunables_clamps_and_resets() {
        let fx = fixture();
        set_counter(&fx.governor, 4);

        fx.governor.apply_tunables(&Tunables {
            up_threshold: 120,
            down_threshold: 40,
            history_size: 0,
            poll_interval: 100,
            frame_done_deadline: 33,
        });

        let snapshot = fx.governor.snapshot();
        assert_eq!(snapshot.low_load_cnt, 0);
        assert_eq!(snapshot.tunables.up_threshold, 100);
        assert_eq!(snapshot.tunables.down_threshold, 40);
        assert_eq!(snapshot.tunables.history_size, 1);
        assert_eq!(snapshot.tunables.poll_interval, 100);
        assert_eq!(snapshot.tunables.frame_done_deadline, 33);
    }
}
