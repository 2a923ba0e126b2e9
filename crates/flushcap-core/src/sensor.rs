//! The sensor capability.
//!
//! A sensor is any device that has a name, a current state and can notify
//! about state changes. Variants (random, sysfs GPIO, manual) are chosen at
//! startup; the hub only ever sees `Arc<dyn Sensor>`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::SensorResult;

/// Callback invoked by a sensor with its new state.
///
/// The sensor awaits the returned future before reporting the next change,
/// so notifications from one sensor are delivered in order and a slow
/// consumer slows the sensor down instead of queueing without bound.
pub type ChangeHandler = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`ChangeHandler`].
pub fn change_handler<F, Fut>(f: F) -> ChangeHandler
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |state| f(state).boxed())
}

/// A binary occupancy sensor.
///
/// Implementations own their internal synchronisation (for example the last
/// observed value); callers may use a sensor from any task.
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Unique name of the sensor, e.g. `"L"`.
    fn name(&self) -> &str;

    /// Current state. Read failures are reported as [`crate::STATE_ERROR`].
    fn state(&self) -> String;

    /// Installs the change handler. May only be called once.
    fn watch(&self, handler: ChangeHandler) -> SensorResult<()>;

    /// Stops watching and releases the device.
    async fn close(&self) -> SensorResult<()>;
}
