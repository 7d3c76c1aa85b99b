use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::store::WorkflowStore;

/// Cap applied to every simulated animation: the bar never claims completion
/// before the real call has finished.
pub const SIMULATED_CAP: u8 = 90;

const RAMP_START: u8 = 5;
const RAMP_STEP: u8 = 7;
const RAMP_TICK: Duration = Duration::from_millis(800);

const EASE_FROM: u8 = 10;
const EASE_WINDOW: Duration = Duration::from_secs(50);
const EASE_TICK: Duration = Duration::from_millis(500);

/// Standard ease-in-out curve on [0, 1].
pub fn ease_in_out(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

/// Monotonic ramp used while enhancement is in flight.
pub fn ramp_value(tick: u32) -> u8 {
    let value = RAMP_START as u32 + tick * RAMP_STEP as u32;
    value.min(SIMULATED_CAP as u32) as u8
}

/// Smooth 10% -> 90% sweep over the fixed video-generation window.
pub fn eased_value(elapsed: Duration, window: Duration) -> u8 {
    let t = if window.is_zero() {
        1.0
    } else {
        elapsed.as_secs_f32() / window.as_secs_f32()
    };
    let span = (SIMULATED_CAP - EASE_FROM) as f32;
    (EASE_FROM as f32 + ease_in_out(t) * span).round() as u8
}

/// Cosmetic progress animation running independently of the real provider
/// call. The backing task is aborted on drop, so a ticker can never outlive
/// the operation (or attempt) it belongs to.
pub struct ProgressTicker {
    handle: JoinHandle<()>,
    store: Arc<WorkflowStore>,
}

impl ProgressTicker {
    /// Monotonic ramp capped at 90%, for the enhancement call.
    pub fn ramp(store: Arc<WorkflowStore>) -> Self {
        let task_store = store.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(RAMP_TICK);
            let mut tick = 0u32;
            loop {
                interval.tick().await;
                task_store.set_progress(ramp_value(tick));
                tick += 1;
            }
        });
        ProgressTicker { handle, store }
    }

    /// Eased 10% -> 90% sweep over a fixed 50 s window, for video generation.
    pub fn eased(store: Arc<WorkflowStore>) -> Self {
        let task_store = store.clone();
        let handle = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut interval = tokio::time::interval(EASE_TICK);
            loop {
                interval.tick().await;
                task_store.set_progress(eased_value(started.elapsed(), EASE_WINDOW));
            }
        });
        ProgressTicker { handle, store }
    }

    /// Stops the animation and snaps the bar to 100%.
    pub fn finish(self) {
        self.handle.abort();
        self.store.set_progress(100);
        debug!("Progress ticker finished");
    }

    /// Stops the animation without claiming completion.
    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Credentials;

    #[test]
    fn ease_curve_hits_its_endpoints() {
        assert_eq!(ease_in_out(0.0), 0.0);
        assert_eq!(ease_in_out(1.0), 1.0);
        assert!((ease_in_out(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn ease_curve_is_monotonic() {
        let mut last = 0.0f32;
        for i in 0..=100 {
            let value = ease_in_out(i as f32 / 100.0);
            assert!(value >= last);
            last = value;
        }
    }

    #[test]
    fn ramp_never_exceeds_the_cap() {
        let mut last = 0u8;
        for tick in 0..1000 {
            let value = ramp_value(tick);
            assert!(value >= last);
            assert!(value <= SIMULATED_CAP);
            last = value;
        }
        assert_eq!(ramp_value(1000), SIMULATED_CAP);
    }

    #[test]
    fn eased_sweep_stays_within_its_band() {
        let window = Duration::from_secs(50);
        assert_eq!(eased_value(Duration::ZERO, window), EASE_FROM);
        assert_eq!(eased_value(window, window), SIMULATED_CAP);
        // Past the window the value saturates rather than overshooting.
        assert_eq!(eased_value(Duration::from_secs(500), window), SIMULATED_CAP);
    }

    #[tokio::test]
    async fn finish_snaps_progress_to_completion() {
        let store = Arc::new(crate::store::WorkflowStore::new(Credentials::default()));
        let ticker = ProgressTicker::ramp(store.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.progress() <= SIMULATED_CAP);
        ticker.finish();
        assert_eq!(store.progress(), 100);
    }
}
