//! Pull-model access to the host's latest sensor readings.

use std::sync::{Mutex, PoisonError, RwLock};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// One snapshot of the Enviro+ sensors, already compensated by the host.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Readings {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub lux: f32,
    #[serde(default)]
    pub gas_oxidising: f32,
    #[serde(default)]
    pub gas_reducing: f32,
    #[serde(default)]
    pub gas_nh3: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Temperature,
    Humidity,
    Pressure,
    Lux,
    GasOxidising,
    GasReducing,
    GasNh3,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Pressure,
        Metric::Lux,
        Metric::GasOxidising,
        Metric::GasReducing,
        Metric::GasNh3,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Pressure => "pressure",
            Metric::Lux => "lux",
            Metric::GasOxidising => "gas_oxidising",
            Metric::GasReducing => "gas_reducing",
            Metric::GasNh3 => "gas_nh3",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::Temperature => "Temp",
            Metric::Humidity => "Humidity",
            Metric::Pressure => "Pressure",
            Metric::Lux => "Light",
            Metric::GasOxidising => "Oxidising",
            Metric::GasReducing => "Reducing",
            Metric::GasNh3 => "NH3",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Temperature => "C",
            Metric::Humidity => "%",
            Metric::Pressure => "hPa",
            Metric::Lux => "lx",
            Metric::GasOxidising | Metric::GasReducing | Metric::GasNh3 => "kO",
        }
    }

    pub fn value(self, readings: &Readings) -> f32 {
        match self {
            Metric::Temperature => readings.temperature,
            Metric::Humidity => readings.humidity,
            Metric::Pressure => readings.pressure,
            Metric::Lux => readings.lux,
            Metric::GasOxidising => readings.gas_oxidising,
            Metric::GasReducing => readings.gas_reducing,
            Metric::GasNh3 => readings.gas_nh3,
        }
    }
}

/// Anything that can hand out the current readings on demand. Returns `None`
/// until the first reading is available.
pub trait SensorSource: Send + Sync {
    fn readings(&self) -> Option<Readings>;
}

/// Readings pushed by the host's polling loop and pulled by panels.
#[derive(Debug, Default)]
pub struct SharedReadings {
    latest: RwLock<Option<Readings>>,
}

impl SharedReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, readings: Readings) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(readings);
    }
}

impl SensorSource for SharedReadings {
    fn readings(&self) -> Option<Readings> {
        *self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Demo source: plausible indoor values drifting a little on every pull.
#[derive(Debug)]
pub struct RandomWalkSource {
    state: Mutex<Readings>,
}

impl RandomWalkSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Readings {
                temperature: 21.5,
                humidity: 45.0,
                pressure: 1013.0,
                lux: 120.0,
                gas_oxidising: 20.0,
                gas_reducing: 300.0,
                gas_nh3: 80.0,
            }),
        }
    }
}

impl Default for RandomWalkSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for RandomWalkSource {
    fn readings(&self) -> Option<Readings> {
        let mut rng = rand::rng();
        let mut r = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        r.temperature = (r.temperature + rng.random_range(-0.1..0.1)).clamp(10.0, 35.0);
        r.humidity = (r.humidity + rng.random_range(-0.5..0.5)).clamp(10.0, 90.0);
        r.pressure = (r.pressure + rng.random_range(-0.3..0.3)).clamp(950.0, 1050.0);
        r.lux = (r.lux + rng.random_range(-5.0..5.0)).clamp(0.0, 2000.0);
        r.gas_oxidising = (r.gas_oxidising + rng.random_range(-0.5..0.5)).clamp(1.0, 100.0);
        r.gas_reducing = (r.gas_reducing + rng.random_range(-5.0..5.0)).clamp(10.0, 1000.0);
        r.gas_nh3 = (r.gas_nh3 + rng.random_range(-1.0..1.0)).clamp(10.0, 500.0);
        Some(*r)
    }
}
