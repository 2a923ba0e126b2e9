//! A sensor that flips between two states at random intervals.
//!
//! Used for demos and for running the daemon on machines without GPIO.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flushcap_core::{ChangeHandler, Sensor, SensorError, SensorResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest time the sensor stays in one state.
pub const MAX_WAIT: Duration = Duration::from_secs(20);

/// Current and next state; toggling swaps them.
type StatePair = (String, String);

pub struct RandomSensor {
    name: String,
    max_wait: Duration,
    states: Arc<Mutex<StatePair>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RandomSensor {
    /// Creates a sensor starting in `state_low`.
    pub fn new(
        name: impl Into<String>,
        state_low: impl Into<String>,
        state_high: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            max_wait: MAX_WAIT,
            states: Arc::new(Mutex::new((state_low.into(), state_high.into()))),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Overrides the maximum dwell time.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn toggle(states: &Mutex<StatePair>) -> String {
    let mut pair = states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let (current, next) = &mut *pair;
    std::mem::swap(current, next);
    current.clone()
}

async fn toggle_loop(
    name: String,
    max_wait: Duration,
    states: Arc<Mutex<StatePair>>,
    handler: ChangeHandler,
    cancel: CancellationToken,
) {
    let mut rng = StdRng::from_entropy();
    let max_ms = u64::try_from(max_wait.as_millis()).unwrap_or(u64::MAX);

    loop {
        let delay = Duration::from_millis(rng.gen_range(0..=max_ms));
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }

        let state = toggle(&states);
        debug!(sensor = %name, state = %state, "Random sensor toggled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = handler(state) => {}
        }
    }

    debug!(sensor = %name, "Random sensor loop stopped");
}

#[async_trait]
impl Sensor for RandomSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> String {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .0
            .clone()
    }

    fn watch(&self, handler: ChangeHandler) -> SensorResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SensorError::Closed {
                name: self.name.clone(),
            });
        }

        let mut slot = self.task_slot();
        if slot.is_some() {
            return Err(SensorError::WatcherRegistered {
                name: self.name.clone(),
            });
        }

        *slot = Some(tokio::spawn(toggle_loop(
            self.name.clone(),
            self.max_wait,
            Arc::clone(&self.states),
            handler,
            self.cancel.clone(),
        )));
        Ok(())
    }

    async fn close(&self) -> SensorResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SensorError::Closed {
                name: self.name.clone(),
            });
        }
        self.cancel.cancel();

        let task = self.task_slot().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                return Err(SensorError::device(&self.name, e));
            }
        }
        Ok(())
    }
}
