pub mod windows;
pub mod equipartition;
pub mod magnet_force;
pub mod power_spectrum;

pub use equipartition::{
    calibrate, CalibrationConfig, CalibrationError, CalibrationMethod, CalibrationReport, CalibrationResult, PositionSignal,
    SkipReason, SkippedWindow,
};
pub use magnet_force::{fit_magnet_force_curve, MagnetForceModel};
pub use power_spectrum::{PsdSettings, SpectralFit};
pub use windows::WindowMode;
