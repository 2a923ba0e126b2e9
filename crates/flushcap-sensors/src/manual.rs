//! A sensor driven by code instead of hardware.

use std::sync::Mutex;

use async_trait::async_trait;
use flushcap_core::{ChangeHandler, Sensor, SensorError, SensorResult};

struct ManualState {
    state: String,
    handler: Option<ChangeHandler>,
    closed: bool,
}

/// Sensor whose state is changed by calling [`ManualSensor::set_state`].
///
/// Every call notifies the watcher, including calls that do not change the
/// value.
pub struct ManualSensor {
    name: String,
    inner: Mutex<ManualState>,
}

impl ManualSensor {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(ManualState {
                state: state.into(),
                handler: None,
                closed: false,
            }),
        }
    }

    /// Sets the state and waits until the watcher accepted the notification.
    pub async fn set_state(&self, state: impl Into<String>) -> SensorResult<()> {
        let state = state.into();
        let handler = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(SensorError::Closed {
                    name: self.name.clone(),
                });
            }
            inner.state = state.clone();
            inner.handler.clone()
        };

        if let Some(handler) = handler {
            handler(state).await;
        }
        Ok(())
    }

    /// Returns true once a watcher has been installed.
    pub fn is_watched(&self) -> bool {
        self.lock().handler.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // A poisoned lock still holds a consistent state string.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Sensor for ManualSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> String {
        self.lock().state.clone()
    }

    fn watch(&self, handler: ChangeHandler) -> SensorResult<()> {
        let mut inner = self.lock();
        if inner.handler.is_some() {
            return Err(SensorError::WatcherRegistered {
                name: self.name.clone(),
            });
        }
        inner.handler = Some(handler);
        Ok(())
    }

    async fn close(&self) -> SensorResult<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(SensorError::Closed {
                name: self.name.clone(),
            });
        }
        inner.closed = true;
        inner.handler = None;
        Ok(())
    }
}
