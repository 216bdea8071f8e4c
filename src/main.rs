use std::error::Error;

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use mt_analysis::force_calibration::{CalibrationConfig, WindowMode};
use mt_analysis::model_fitting::models::wlc_extension;
use mt_analysis::model_fitting::{FitConfig, ModelKind};
use mt_analysis::signal_analysis::events::JumpDetectionConfig;
use mt_analysis::signal_analysis::hmm::hmm_config::HMMConfig;
use mt_analysis::signal_analysis::hmm::hmm_matrices::{StartMatrix, TransitionMatrix};
use mt_analysis::signal_analysis::hmm::state::State;
use mt_analysis::signal_analysis::hmm::HMM;
use mt_analysis::thermal::Temperature;
use mt_analysis::{analyze, AnalysisConfig, Trace, TraceMetadata};

const SAMPLING_RATE: f64 = 1000.0; // Hz

// Force ramp on a 1 µm dsDNA tether
fn force_extension_trace(rng: &mut StdRng) -> Result<Trace, Box<dyn Error>> {
    let kt = Temperature::default().thermal_energy();
    let noise = Normal::new(0.0, 5.0)?;
    let n = 5000;

    let time: Vec<f64> = (0..n).map(|i| i as f64 / SAMPLING_RATE).collect();
    let force: Vec<f64> = (0..n).map(|i| 0.2 + 9.8 * i as f64 / n as f64).collect();
    let extension: Vec<f64> = force.iter().map(|&f| wlc_extension(f, 50.0, 1000.0, kt) + noise.sample(rng)).collect();
    let magnet: Vec<f64> = (0..n).map(|i| 4.0 - 3.0 * i as f64 / n as f64).collect();

    let metadata = TraceMetadata::new("ramp").with_sampling_rate(SAMPLING_RATE);
    Ok(Trace::new(time, extension, force, magnet, metadata)?)
}

// Hairpin hopping between two extensions at constant force, with the
// lateral bead fluctuations of a 5 pN tether
fn hopping_trace(rng: &mut StdRng) -> Result<Trace, Box<dyn Error>> {
    let states = vec![State::new(0, 950.0, 4.0)?, State::new(1, 968.0, 4.0)?];
    let start = StartMatrix::new(vec![0.5, 0.5]);
    let transition = TransitionMatrix::new(vec![vec![0.995, 0.005], vec![0.008, 0.992]]);
    let n = 20_000;

    let (_, extension) = HMM::gen_sequence(&states, &start, &transition, n, rng);

    let kt = Temperature::default().thermal_energy();
    let lateral = Normal::new(0.0, (kt * 960.0 / 5.0).sqrt())?;
    let transverse: Vec<f64> = (0..n).map(|_| lateral.sample(rng)).collect();

    let time: Vec<f64> = (0..n).map(|i| i as f64 / SAMPLING_RATE).collect();
    let metadata = TraceMetadata::new("hopping").with_sampling_rate(SAMPLING_RATE);
    let trace = Trace::new(time, extension, vec![5.0; n], vec![1.2; n], metadata)?.with_transverse(transverse)?;
    Ok(trace)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut rng = StdRng::seed_from_u64(42);

    let ramp = force_extension_trace(&mut rng)?;
    let ramp_config = AnalysisConfig::default().with_fitting(FitConfig::new(ModelKind::Wlc));

    let hopping = hopping_trace(&mut rng)?;
    let hopping_config = AnalysisConfig::default()
        .with_calibration(CalibrationConfig {
            window_mode: WindowMode::FixedDuration { seconds: 5.0 },
            ..CalibrationConfig::default()
        })
        .with_kinetics(HMMConfig::new(2))
        .with_events(JumpDetectionConfig::default().with_thresholds(10.0, 30.0));

    let results = vec![analyze(&ramp, &ramp_config)?, analyze(&hopping, &hopping_config)?];
    for result in &results {
        info!("{}: succeeded {:?}, failed {}", result.trace_id, result.succeeded_analyses(), result.failed_analyses().len());
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
