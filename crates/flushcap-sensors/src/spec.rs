//! Device spec files.
//!
//! A device spec lists the circuits wired to the board, one per sensor:
//!
//! ```toml
//! gpio_root = "/sys/class/gpio"   # optional
//!
//! [[circuits]]
//! name = "L"
//! sensor = { pin = 24 }
//! led = { pin_green = 17, pin_red = 27 }   # optional
//! ```
//!
//! Files ending in `.json` are read as JSON with the same fields,
//! `{"circuits": [{"name": "L", "sensor": {"pin": 24}}]}`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flushcap_core::{Sensor, SensorError};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::sysfs::{pin_value_path, LedPins, SysfsConfig, SysfsSensor, DEFAULT_GPIO_ROOT};

/// Errors produced while loading a device spec.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read device spec {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse device spec: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to parse JSON device spec: {0}")]
    Json(#[from] serde_json::Error),

    /// One entry per missing field, e.g. `circuits[0].sensor.pin`.
    #[error("invalid device spec, required fields not set: {}", missing.join(", "))]
    Invalid { missing: Vec<String> },

    #[error("failed to open sensor: {0}")]
    Sensor(#[from] SensorError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSpec {
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
    #[serde(default)]
    pub circuits: Vec<Circuit>,
}

fn default_gpio_root() -> PathBuf {
    PathBuf::from(DEFAULT_GPIO_ROOT)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Circuit {
    #[serde(default)]
    pub name: String,
    pub sensor: Option<SwitchSpec>,
    pub led: Option<LedSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwitchSpec {
    pub pin: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedSpec {
    pub pin_green: Option<u32>,
    pub pin_red: Option<u32>,
}

impl DeviceSpec {
    /// Parses a spec from TOML text. Does not validate.
    pub fn from_toml(text: &str) -> Result<Self, SpecError> {
        Ok(toml::from_str(text)?)
    }

    /// Parses a spec from JSON text. Does not validate.
    pub fn from_json(text: &str) -> Result<Self, SpecError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a spec file, JSON for `.json` files and TOML
    /// otherwise. Does not validate.
    pub fn read(path: &Path) -> Result<Self, SpecError> {
        let text = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&text)
        } else {
            Self::from_toml(&text)
        }
    }

    /// Checks that every required field is set.
    ///
    /// All problems are logged, not only the first one.
    pub fn validate(&self) -> Result<(), SpecError> {
        let mut missing = Vec::new();

        for (i, circuit) in self.circuits.iter().enumerate() {
            let mut field_not_set = |path: &str| {
                let path = format!("circuits[{i}].{path}");
                error!(path = %path, "Required field not set");
                missing.push(path);
            };

            if circuit.name.is_empty() {
                field_not_set("name");
            }
            if circuit.sensor.as_ref().and_then(|s| s.pin).is_none() {
                field_not_set("sensor.pin");
            }
            if let Some(led) = &circuit.led {
                if led.pin_green.is_none() {
                    field_not_set("led.pin_green");
                }
                if led.pin_red.is_none() {
                    field_not_set("led.pin_red");
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SpecError::Invalid { missing })
        }
    }

    /// Validates the spec and builds the sysfs config of every circuit.
    fn sysfs_configs(&self) -> Result<Vec<SysfsConfig>, SpecError> {
        self.validate()?;

        let root = self.gpio_root.as_path();
        let configs = self
            .circuits
            .iter()
            .filter_map(|circuit| {
                let pin = circuit.sensor.as_ref()?.pin?;
                let mut config = SysfsConfig::new(circuit.name.clone(), pin_value_path(root, pin));
                config.leds = circuit.led.as_ref().and_then(|led| {
                    Some(LedPins {
                        green: pin_value_path(root, led.pin_green?),
                        red: pin_value_path(root, led.pin_red?),
                    })
                });
                Some(config)
            })
            .collect();
        Ok(configs)
    }
}

/// Opens one sysfs sensor per circuit.
///
/// When a sensor fails to open, the sensors opened so far are closed again
/// before the error is returned.
pub async fn sensors_from_spec(spec: &DeviceSpec) -> Result<Vec<Arc<dyn Sensor>>, SpecError> {
    let configs = spec.sysfs_configs()?;
    let mut sensors: Vec<Arc<dyn Sensor>> = Vec::with_capacity(configs.len());

    for config in configs {
        match SysfsSensor::open(config) {
            Ok(sensor) => sensors.push(Arc::new(sensor)),
            Err(e) => {
                for sensor in &sensors {
                    if let Err(close_err) = sensor.close().await {
                        warn!(sensor = %sensor.name(), error = %close_err, "Failed to close sensor");
                    }
                }
                return Err(e.into());
            }
        }
    }

    Ok(sensors)
}

/// Reads, validates and opens the sensors described by a spec file.
pub async fn sensors_from_spec_file(path: &Path) -> Result<Vec<Arc<dyn Sensor>>, SpecError> {
    let spec = DeviceSpec::read(path)?;
    sensors_from_spec(&spec).await
}
