use serde::{Deserialize, Serialize};

pub const BOLTZMANN_CONSTANT: f64 = 1.380649e-23; // J/K
pub const DEFAULT_TEMPERATURE_K: f64 = 298.15;

// Below this value a temperature is taken to be in degrees Celsius
const CELSIUS_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature {
    value: f64,
}

impl Temperature {
    pub fn new(value: f64) -> Self {
        Self { value }
    }

    pub fn kelvin(&self) -> f64 {
        if self.value < CELSIUS_THRESHOLD {
            self.value + 273.15
        } else {
            self.value
        }
    }

    // Thermal energy in pN·nm
    pub fn thermal_energy(&self) -> f64 {
        BOLTZMANN_CONSTANT * self.kelvin() * 1e21
    }
}

impl Default for Temperature {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPERATURE_K)
    }
}
