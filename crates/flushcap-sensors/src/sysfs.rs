//! GPIO sensor backed by the Linux sysfs interface.
//!
//! The switch pin is read from its `value` file (`0` or `1`) on a fixed poll
//! interval. An optional green/red LED pair mirrors the state: green while
//! low (free), red while high (occupied), both off on a read error.
//!
//! Pins must already be exported and configured (`direction`) by the system,
//! e.g. via udev rules or the boot config.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flushcap_core::{
    ChangeHandler, Sensor, SensorError, SensorResult, STATE_ERROR, STATE_LOCKED, STATE_UNLOCKED,
};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default mount point of the sysfs GPIO class.
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// How often the switch pin is sampled.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Returns the `value` file of an exported pin under `root`.
pub fn pin_value_path(root: &Path, pin: u32) -> PathBuf {
    root.join(format!("gpio{pin}")).join("value")
}

/// Value files of the indicator LEDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedPins {
    pub green: PathBuf,
    pub red: PathBuf,
}

/// Everything needed to open a [`SysfsSensor`].
#[derive(Debug, Clone)]
pub struct SysfsConfig {
    pub name: String,
    pub value_path: PathBuf,
    pub leds: Option<LedPins>,
    pub state_low: String,
    pub state_high: String,
    pub poll_interval: Duration,
}

impl SysfsConfig {
    /// Config with the usual unlocked/locked mapping and no LEDs.
    pub fn new(name: impl Into<String>, value_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            value_path: value_path.into(),
            leds: None,
            state_low: STATE_UNLOCKED.to_string(),
            state_high: STATE_LOCKED.to_string(),
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Pin-to-state mapping shared with the poll task.
#[derive(Debug, Clone)]
struct Pins {
    value_path: PathBuf,
    leds: Option<LedPins>,
    state_low: String,
    state_high: String,
}

impl Pins {
    fn read_level(&self) -> io::Result<bool> {
        let raw = std::fs::read_to_string(&self.value_path)?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected pin value {other:?}"),
            )),
        }
    }

    fn state_for(&self, level: bool) -> String {
        if level {
            self.state_high.clone()
        } else {
            self.state_low.clone()
        }
    }

    /// Reads the pin, mapping failures to the error state.
    fn sample(&self, name: &str) -> String {
        match self.read_level() {
            Ok(level) => self.state_for(level),
            Err(e) => {
                warn!(
                    sensor = %name,
                    path = %self.value_path.display(),
                    error = %e,
                    "Failed to read sensor pin"
                );
                STATE_ERROR.to_string()
            }
        }
    }

    fn drive_leds(&self, state: &str) -> io::Result<()> {
        let Some(leds) = &self.leds else {
            return Ok(());
        };
        let (green, red) = if state == self.state_low {
            (true, false)
        } else if state == self.state_high {
            (false, true)
        } else {
            (false, false)
        };
        write_level(&leds.green, green)?;
        write_level(&leds.red, red)
    }
}

fn write_level(path: &Path, level: bool) -> io::Result<()> {
    std::fs::write(path, if level { "1" } else { "0" })
}

pub struct SysfsSensor {
    name: String,
    pins: Pins,
    poll_interval: Duration,
    current: Arc<Mutex<String>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SysfsSensor {
    /// Opens the sensor, reading the pin once so the state is in sync.
    ///
    /// Fails when the value file cannot be read or the LEDs cannot be
    /// driven, so misconfigured pins are caught at startup.
    pub fn open(config: SysfsConfig) -> SensorResult<Self> {
        let pins = Pins {
            value_path: config.value_path,
            leds: config.leds,
            state_low: config.state_low,
            state_high: config.state_high,
        };

        let level = pins
            .read_level()
            .map_err(|e| SensorError::device(&config.name, e))?;
        let state = pins.state_for(level);
        pins.drive_leds(&state)
            .map_err(|e| SensorError::device(&config.name, e))?;

        info!(
            sensor = %config.name,
            path = %pins.value_path.display(),
            leds = pins.leds.is_some(),
            state = %state,
            "Sysfs sensor opened"
        );

        Ok(Self {
            name: config.name,
            pins,
            poll_interval: config.poll_interval,
            current: Arc::new(Mutex::new(state)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn poll_loop(
    name: String,
    pins: Pins,
    poll_interval: Duration,
    current: Arc<Mutex<String>>,
    handler: ChangeHandler,
    cancel: CancellationToken,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let state = pins.sample(&name);
        let changed = {
            let mut current = current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        };
        if !changed {
            continue;
        }

        debug!(sensor = %name, state = %state, "Sensor pin changed");
        if let Err(e) = pins.drive_leds(&state) {
            warn!(sensor = %name, error = %e, "Failed to drive indicator LEDs");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = handler(state) => {}
        }
    }
}

#[async_trait]
impl Sensor for SysfsSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
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

        *slot = Some(tokio::spawn(poll_loop(
            self.name.clone(),
            self.pins.clone(),
            self.poll_interval,
            Arc::clone(&self.current),
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
            task.await.map_err(|e| SensorError::device(&self.name, e))?;
        }

        if let Some(leds) = &self.pins.leds {
            write_level(&leds.green, false).map_err(|e| SensorError::device(&self.name, e))?;
            write_level(&leds.red, false).map_err(|e| SensorError::device(&self.name, e))?;
        }
        Ok(())
    }
}
