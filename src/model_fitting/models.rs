use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::trace_data::trace::Channel;

// Below this force the force -> extension branch is not evaluated (pN)
pub const MIN_MODEL_FORCE: f64 = 0.01;

pub const PERSISTENCE_LENGTH_DEFAULT: f64 = 50.0; // nm
pub const STRETCH_MODULUS_DEFAULT: f64 = 1000.0; // pN
pub const CONTOUR_LENGTH_MARGIN: f64 = 1.1; // L0 guess relative to the longest extension

// Magnet height (mm) -> force (pN) calibration curve defaults
pub const MAGNET_FORCE_DEFAULTS: [(&str, f64); 5] =
    [("a1", 43.89994), ("b1", -0.76672), ("a2", 41.72197), ("b2", -0.76717), ("c", -0.16789)];

const BISECTION_ITERATIONS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Wlc,
    Ewlc,
    Exponential,
    DoubleExponential,
    Lorentzian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitDirection {
    #[default]
    ForceToExtension, // x = force, y = extension
    ExtensionToForce, // x = extension, y = force
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoleculePreset {
    Dna,
    Rna,
    Protein,
}

impl MoleculePreset {
    pub fn initial_guesses(&self) -> BTreeMap<String, f64> {
        let (contour, persistence, modulus) = match self {
            MoleculePreset::Dna => (340.0, 50.0, 1000.0),
            MoleculePreset::Rna => (320.0, 1.0, 500.0),
            MoleculePreset::Protein => (0.4, 0.6, 500.0),
        };

        BTreeMap::from([
            ("L0".to_string(), contour),
            ("Lp".to_string(), persistence),
            ("K0".to_string(), modulus),
        ])
    }
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Wlc => "WLC",
            ModelKind::Ewlc => "eWLC",
            ModelKind::Exponential => "exponential",
            ModelKind::DoubleExponential => "double_exponential",
            ModelKind::Lorentzian => "lorentzian",
        }
    }

    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            ModelKind::Wlc => &["Lp", "L0", "kT"],
            ModelKind::Ewlc => &["Lp", "L0", "K0", "kT"],
            ModelKind::Exponential => &["A", "tau", "C"],
            ModelKind::DoubleExponential => &["a1", "b1", "a2", "b2", "c"],
            ModelKind::Lorentzian => &["A", "fc", "offset"],
        }
    }

    pub fn is_polymer(&self) -> bool {
        matches!(self, ModelKind::Wlc | ModelKind::Ewlc)
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameter_names().iter().position(|candidate| *candidate == name)
    }

    // Channels a trace fit reads by default, as (x, y)
    pub fn default_channels(&self, direction: FitDirection) -> (Channel, Channel) {
        match (self, direction) {
            (ModelKind::Wlc | ModelKind::Ewlc, FitDirection::ForceToExtension) => (Channel::Force, Channel::Extension),
            (ModelKind::Wlc | ModelKind::Ewlc, FitDirection::ExtensionToForce) => (Channel::Extension, Channel::Force),
            (ModelKind::Exponential, _) => (Channel::Time, Channel::Extension),
            (ModelKind::DoubleExponential, _) => (Channel::MagnetPosition, Channel::Force),
            // Only meaningful on a power spectrum of this channel
            (ModelKind::Lorentzian, _) => (Channel::Time, Channel::Transverse),
        }
    }

    // Lower bounds keeping the equations inside their domain
    pub fn default_bounds(&self) -> Vec<(f64, f64)> {
        self.parameter_names()
            .iter()
            .map(|name| match (self, *name) {
                (_, "Lp" | "L0" | "K0") => (1e-3, f64::INFINITY),
                (_, "kT" | "fc") => (1e-6, f64::INFINITY),
                (_, "tau") => (1e-12, f64::INFINITY),
                (ModelKind::Lorentzian, "A" | "offset") => (0.0, f64::INFINITY),
                _ => (f64::NEG_INFINITY, f64::INFINITY),
            })
            .collect()
    }

    // Data-driven starting point used when the caller gives no guess
    pub fn default_initial_guesses(&self, x: &[f64], y: &[f64], direction: FitDirection, thermal_energy: f64) -> Vec<f64> {
        match self {
            ModelKind::Wlc | ModelKind::Ewlc => {
                let extension = match direction {
                    FitDirection::ForceToExtension => y,
                    FitDirection::ExtensionToForce => x,
                };
                let longest = extension.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let contour = (CONTOUR_LENGTH_MARGIN * longest).max(1.0);

                if *self == ModelKind::Wlc {
                    vec![PERSISTENCE_LENGTH_DEFAULT, contour, thermal_energy]
                } else {
                    vec![PERSISTENCE_LENGTH_DEFAULT, contour, STRETCH_MODULUS_DEFAULT, thermal_energy]
                }
            }
            ModelKind::Exponential => {
                let (first_x, last_x) = (x[0], x[x.len() - 1]);
                let (first_y, last_y) = (y[0], y[y.len() - 1]);

                let mut amplitude = first_y - last_y;
                if amplitude.abs() < f64::EPSILON {
                    let max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let min = y.iter().copied().fold(f64::INFINITY, f64::min);
                    amplitude = max - min;
                }

                let span = (last_x - first_x).abs();
                let tau = if span > 0.0 { span / 3.0 } else { 1.0 };

                vec![amplitude, tau, last_y]
            }
            ModelKind::DoubleExponential => MAGNET_FORCE_DEFAULTS.iter().map(|(_, value)| *value).collect(),
            ModelKind::Lorentzian => {
                // White floor from the top of the band, plateau from its maximum
                let mut tail: Vec<f64> = y[y.len().saturating_sub(10)..].to_vec();
                tail.sort_by(|a, b| a.total_cmp(b));
                let offset = tail[tail.len() / 2].max(0.0);
                let plateau = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);

                let half_power = offset + 0.5 * (plateau - offset);
                let corner = x
                    .iter()
                    .zip(y)
                    .find(|(_, power)| **power <= half_power)
                    .map(|(&frequency, _)| frequency)
                    .unwrap_or(x[x.len() / 2]);

                vec![(plateau - offset).max(f64::MIN_POSITIVE), corner.max(1e-6), offset]
            }
        }
    }

    pub fn evaluate(&self, params: &[f64], x: f64, direction: FitDirection) -> f64 {
        match self {
            ModelKind::Wlc => match direction {
                FitDirection::ForceToExtension => wlc_extension(x, params[0], params[1], params[2]),
                FitDirection::ExtensionToForce => wlc_force(x, params[0], params[1], params[2]),
            },
            ModelKind::Ewlc => match direction {
                FitDirection::ForceToExtension => ewlc_extension(x, params[0], params[1], params[2], params[3]),
                FitDirection::ExtensionToForce => ewlc_force(x, params[0], params[1], params[2], params[3]),
            },
            ModelKind::Exponential => exponential_decay(x, params[0], params[1], params[2]),
            ModelKind::DoubleExponential => double_exponential(x, params[0], params[1], params[2], params[3], params[4]),
            ModelKind::Lorentzian => lorentzian(x, params[0], params[1], params[2]),
        }
    }

    pub fn evaluate_all(&self, params: &[f64], x: &[f64], direction: FitDirection) -> Vec<f64> {
        x.iter().map(|&xi| self.evaluate(params, xi, direction)).collect()
    }
}

// Marko-Siggia interpolation in units of kT/Lp
fn marko_siggia(relative_extension: f64) -> f64 {
    1.0 / (4.0 * (1.0 - relative_extension).powi(2)) - 0.25 + relative_extension
}

/// Odijk high-force inversion of the WLC: extension (nm) at `force` (pN).
pub fn wlc_extension(force: f64, persistence: f64, contour: f64, thermal_energy: f64) -> f64 {
    let force = force.max(MIN_MODEL_FORCE);
    contour * (1.0 - 0.5 * (thermal_energy / (force * persistence)).sqrt())
}

/// Extensible WLC: the Odijk form plus the enthalpic term `F / K0`.
pub fn ewlc_extension(force: f64, persistence: f64, contour: f64, modulus: f64, thermal_energy: f64) -> f64 {
    let force = force.max(MIN_MODEL_FORCE);
    contour * (1.0 - 0.5 * (thermal_energy / (force * persistence)).sqrt() + force / modulus)
}

/// Marko-Siggia force (pN) at `extension` (nm). NaN at or beyond the contour length.
pub fn wlc_force(extension: f64, persistence: f64, contour: f64, thermal_energy: f64) -> f64 {
    let relative = extension / contour;
    if relative >= 1.0 {
        return f64::NAN;
    }
    thermal_energy / persistence * marko_siggia(relative)
}

/// Marko-Siggia with `x/L0` replaced by `x/L0 - F/K0`, solved for `F`.
///
/// With `z = x/L0 - F/K0` the equation becomes
/// `kT/Lp · ms(z) = K0 · (x/L0 - z)`, whose left side increases and right
/// side decreases with `z`, so a bisection on `z` over a sign-changing
/// bracket always finds the single root.
pub fn ewlc_force(extension: f64, persistence: f64, contour: f64, modulus: f64, thermal_energy: f64) -> f64 {
    let relative = extension / contour;
    let scale = thermal_energy / persistence;
    let balance = |z: f64| scale * marko_siggia(z) - modulus * (relative - z);

    let mut low = relative.min(0.0);
    let mut high = relative.max(0.0).min(1.0 - 1e-12);

    if balance(low) > 0.0 || balance(high) < 0.0 {
        return f64::NAN;
    }

    for _ in 0..BISECTION_ITERATIONS {
        let mid = 0.5 * (low + high);
        if balance(mid) > 0.0 {
            high = mid;
        } else {
            low = mid;
        }
        if high - low < 1e-15 {
            break;
        }
    }

    modulus * (relative - 0.5 * (low + high))
}

pub fn exponential_decay(t: f64, amplitude: f64, tau: f64, offset: f64) -> f64 {
    amplitude * (-t / tau).exp() + offset
}

pub fn double_exponential(x: f64, a1: f64, b1: f64, a2: f64, b2: f64, c: f64) -> f64 {
    a1 * (b1 * x).exp() + a2 * (b2 * x).exp() + c
}

/// Lorentzian power spectrum of a bead in a harmonic well, with a white
/// noise floor. `corner` is the corner frequency in Hz.
pub fn lorentzian(frequency: f64, amplitude: f64, corner: f64, offset: f64) -> f64 {
    amplitude / (1.0 + (frequency / corner).powi(2)) + offset
}

#[cfg(test)]
mod tests {
    use super::*;

    const KT: f64 = 4.114;

    #[test]
    fn test_parameter_schema() {
        assert_eq!(ModelKind::Wlc.parameter_names().len(), 3);
        assert_eq!(ModelKind::Ewlc.parameter_index("K0"), Some(2));
        assert_eq!(ModelKind::Exponential.parameter_index("Lp"), None);
        assert_eq!(ModelKind::DoubleExponential.default_bounds().len(), 5);
    }

    #[test]
    fn test_lorentzian_bounds_and_guesses() {
        assert_eq!(ModelKind::Lorentzian.default_bounds()[0], (0.0, f64::INFINITY));
        assert_eq!(ModelKind::Exponential.default_bounds()[0], (f64::NEG_INFINITY, f64::INFINITY));

        let frequency: Vec<f64> = (1..=200).map(|i| i as f64).collect();
        let power: Vec<f64> = frequency.iter().map(|&f| lorentzian(f, 10.0, 40.0, 0.01)).collect();
        let guess = ModelKind::Lorentzian.default_initial_guesses(&frequency, &power, FitDirection::default(), KT);

        assert!((guess[1] - 40.0).abs() <= 2.0);
        assert!(guess[2] > 0.01 && guess[2] < 0.5);
        assert!((lorentzian(40.0, 10.0, 40.0, 0.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_marko_siggia_known_values() {
        // At half the contour length: 1/(4·0.25) - 0.25 + 0.5 = 1.25 kT/Lp
        let force = wlc_force(500.0, 50.0, 1000.0, KT);
        assert!((force - 1.25 * KT / 50.0).abs() < 1e-12);
        assert!(wlc_force(1000.0, 50.0, 1000.0, KT).is_nan());
        assert_eq!(wlc_force(0.0, 50.0, 1000.0, KT), 0.0);
    }

    #[test]
    fn test_odijk_extension_grows_with_force() {
        let low = wlc_extension(1.0, 50.0, 1000.0, KT);
        let high = wlc_extension(10.0, 50.0, 1000.0, KT);
        assert!(low < high && high < 1000.0);
        // Forces below the floor are evaluated at the floor
        assert_eq!(wlc_extension(0.0, 50.0, 1000.0, KT), wlc_extension(MIN_MODEL_FORCE, 50.0, 1000.0, KT));
    }

    #[test]
    fn test_ewlc_adds_enthalpic_stretch() {
        let wlc = wlc_extension(20.0, 50.0, 1000.0, KT);
        let ewlc = ewlc_extension(20.0, 50.0, 1000.0, 1000.0, KT);
        assert!((ewlc - wlc - 1000.0 * 20.0 / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_ewlc_force_is_self_consistent() {
        let (persistence, contour, modulus) = (50.0, 1000.0, 1000.0);
        for extension in [200.0, 600.0, 950.0, 1010.0] {
            let force = ewlc_force(extension, persistence, contour, modulus, KT);
            assert!(force.is_finite(), "force at {} was {}", extension, force);
            let z = extension / contour - force / modulus;
            let expected = KT / persistence * marko_siggia(z);
            assert!((force - expected).abs() < 1e-6 * expected.max(1.0));
        }
    }

    #[test]
    fn test_ewlc_force_below_wlc_force() {
        let wlc = wlc_force(900.0, 50.0, 1000.0, KT);
        let ewlc = ewlc_force(900.0, 50.0, 1000.0, 1000.0, KT);
        assert!(ewlc < wlc);
    }

    #[test]
    fn test_exponential_default_guesses() {
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y = vec![10.0, 5.0, 3.0, 2.0];
        let guesses = ModelKind::Exponential.default_initial_guesses(&x, &y, FitDirection::default(), KT);
        assert_eq!(guesses, vec![8.0, 1.0, 2.0]);
    }

    #[test]
    fn test_preset_guesses() {
        let guesses = MoleculePreset::Dna.initial_guesses();
        assert_eq!(guesses["L0"], 340.0);
        assert_eq!(guesses["Lp"], 50.0);
    }
}
