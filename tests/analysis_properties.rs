use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use mt_analysis::aggregator::analysis_result::{AnalysisOutcome, FailureKind};
use mt_analysis::force_calibration::{calibrate, CalibrationConfig, PositionSignal, SkipReason, WindowMode};
use mt_analysis::model_fitting::models::{ewlc_extension, wlc_extension};
use mt_analysis::model_fitting::{fit_curve, FitConfig, FitDirection, FitError, InsufficientDataReason, ModelKind};
use mt_analysis::signal_analysis::hmm::analysis::dwell_times::{dwell_times_by_state, extract_dwells};
use mt_analysis::signal_analysis::hmm::hmm_config::HMMConfig;
use mt_analysis::signal_analysis::hmm::hmm_instance::HMMInstance;
use mt_analysis::signal_analysis::hmm::hmm_matrices::{StartMatrix, TransitionMatrix};
use mt_analysis::signal_analysis::hmm::segmentation::segment_signal;
use mt_analysis::signal_analysis::hmm::state::State;
use mt_analysis::signal_analysis::hmm::HMM;
use mt_analysis::thermal::Temperature;
use mt_analysis::trace_data::tools::Detrend;
use mt_analysis::{analyze, AnalysisConfig, AnalysisResult, Trace, TraceMetadata};

fn two_state_model(separation: f64) -> (Vec<State>, StartMatrix, TransitionMatrix) {
    let states = vec![State::new(0, 0.0, 1.0).unwrap(), State::new(1, separation, 1.0).unwrap()];
    let start = StartMatrix::new(vec![0.5, 0.5]);
    let transition = TransitionMatrix::new(vec![vec![0.98, 0.02], vec![0.03, 0.97]]);
    (states, start, transition)
}

#[test]
fn noiseless_wlc_is_recovered() {
    let kt = Temperature::default().thermal_energy();
    for (persistence, contour) in [(50.0, 1000.0), (20.0, 3000.0), (35.0, 2000.0)] {
        let force: Vec<f64> = (0..60).map(|i| 0.5 + i as f64 * 0.25).collect();
        let extension: Vec<f64> = force.iter().map(|&f| wlc_extension(f, persistence, contour, kt)).collect();

        let fit = fit_curve(&force, &extension, &FitConfig::new(ModelKind::Wlc)).unwrap();

        assert!(fit.converged, "Lp = {} did not converge", persistence);
        assert!((fit.parameters["Lp"] - persistence).abs() / persistence < 0.01);
        assert!((fit.parameters["L0"] - contour).abs() / contour < 0.01);
    }
}

#[test]
fn noiseless_ewlc_recovers_stretch_modulus() {
    let kt = Temperature::default().thermal_energy();
    let (persistence, contour, modulus) = (45.0, 1500.0, 1200.0);
    let force: Vec<f64> = (0..120).map(|i| 0.5 + i as f64 * 0.25).collect();
    let extension: Vec<f64> = force.iter().map(|&f| ewlc_extension(f, persistence, contour, modulus, kt)).collect();

    let fit = fit_curve(&force, &extension, &FitConfig::new(ModelKind::Ewlc)).unwrap();

    assert!(fit.converged);
    assert!((fit.parameters["Lp"] - persistence).abs() / persistence < 0.01);
    assert!((fit.parameters["L0"] - contour).abs() / contour < 0.01);
    assert!((fit.parameters["K0"] - modulus).abs() / modulus < 0.02);
    assert!(fit.r_squared > 0.9999);
}

#[test]
fn fewer_points_than_parameters_is_insufficient() {
    let result = fit_curve(&[1.0], &[300.0], &FitConfig::new(ModelKind::Ewlc));
    assert!(matches!(
        result,
        Err(FitError::InsufficientData { reason: InsufficientDataReason::TooFewPoints { points: 1, free_parameters: 3 } })
    ));
}

#[test]
fn decoding_accuracy_grows_with_separation() {
    let mut accuracies = Vec::new();

    for separation in [2.0, 4.0, 8.0] {
        let (states, start, transition) = two_state_model(separation);
        let mut rng = StdRng::seed_from_u64(21);
        let (truth, values) = HMM::gen_sequence(&states, &start, &transition, 5000, &mut rng);

        let segmentation = segment_signal(&values, 1.0, &HMMConfig::default()).unwrap();
        let correct = truth.iter().zip(&segmentation.state_sequence).filter(|(a, b)| a == b).count();
        accuracies.push(correct as f64 / truth.len() as f64);
    }

    assert!(accuracies[1] > 0.95);
    assert!(accuracies[2] > 0.99);
    assert!(accuracies[0] <= accuracies[1] && accuracies[1] <= accuracies[2]);
}

#[test]
fn viterbi_is_deterministic() {
    let (states, start, transition) = two_state_model(2.5);
    let mut rng = StdRng::seed_from_u64(4);
    let (_, values) = HMM::gen_sequence(&states, &start, &transition, 2000, &mut rng);

    let instance = HMMInstance::new(&states, &start, &transition).unwrap();
    let first = instance.run_viterbi(&values).unwrap();
    let second = instance.run_viterbi(&values).unwrap();

    assert_eq!(first.path, second.path);
    assert_eq!(first.log_probability, second.log_probability);
}

#[test]
fn dwell_times_of_hand_built_sequence() {
    let dwells = extract_dwells(&[0, 0, 0, 1, 1, 0, 0], 1.0);
    let by_state = dwell_times_by_state(&dwells, 2);

    assert_eq!(by_state[&0], vec![3.0, 2.0]);
    assert_eq!(by_state[&1], vec![2.0]);
    assert!(dwells.last().unwrap().censored);
    assert!(!dwells[1].censored);
}

#[test]
fn equipartition_force_matches_variance() {
    let sigma = 12.0;
    let length = 1500.0;
    let n = 5000 + 700;
    let mut rng = StdRng::seed_from_u64(8);
    let noise = Normal::new(0.0, sigma).unwrap();

    let time: Vec<f64> = (0..n).map(|i| i as f64 / 1000.0).collect();
    let transverse: Vec<f64> = (0..n).map(|_| noise.sample(&mut rng)).collect();
    let trace = Trace::new(time, vec![length; n], vec![0.0; n], vec![1.0; n], TraceMetadata::new("cal"))
        .unwrap()
        .with_transverse(transverse.clone())
        .unwrap();

    let config = CalibrationConfig {
        window_mode: WindowMode::FixedDuration { seconds: 5.0 },
        signal: PositionSignal::Transverse,
        detrend: Detrend::None,
        min_samples: 1000,
        ..CalibrationConfig::default()
    };
    let report = calibrate(&trace, &config).unwrap();

    assert_eq!(report.results.len(), 1);
    let window = &report.results[0];
    let expected = report.thermal_energy * length / window.variance_extension;
    assert!((window.computed_force - expected).abs() < 1e-9);
    assert!((window.computed_force - report.thermal_energy * length / sigma.powi(2)).abs() / window.computed_force < 0.05);

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].sample_count, 700);
    assert_eq!(report.skipped[0].reason, SkipReason::TooFewSamples { minimum: 1000 });
}

fn hopping_trace(force: Vec<f64>) -> Trace {
    let (states, start, transition) = two_state_model(6.0);
    let mut rng = StdRng::seed_from_u64(17);
    let (_, extension) = HMM::gen_sequence(&states, &start, &transition, force.len(), &mut rng);
    let extension: Vec<f64> = extension.iter().map(|value| 800.0 + value).collect();
    let time: Vec<f64> = (0..force.len()).map(|i| i as f64 * 0.002).collect();
    let magnet = vec![1.0; force.len()];
    Trace::new(time, extension, force, magnet, TraceMetadata::new("hopping")).unwrap()
}

#[test]
fn degenerate_fit_does_not_abort_kinetics() {
    // Force is constant, so fitting force against extension has nothing to fit
    let trace = hopping_trace(vec![4.0; 1500]);
    let config = AnalysisConfig::default()
        .with_fitting(FitConfig::new(ModelKind::Wlc).with_direction(FitDirection::ExtensionToForce))
        .with_kinetics(HMMConfig::default());

    let result = analyze(&trace, &config).unwrap();

    let failure = result.fitting.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::InsufficientData);
    let segmentation = result.kinetics.completed().unwrap();
    assert_eq!(segmentation.state_sequence.len(), 1500);
    assert!(matches!(result.calibration, AnalysisOutcome::NotRequested));
    assert_eq!(result.succeeded_analyses(), vec!["kinetics"]);
}

#[test]
fn analysis_result_survives_json() {
    // Short enough that no state has the dwells for a lifetime fit
    let trace = hopping_trace(vec![4.0; 120]);
    let config = AnalysisConfig::default()
        .with_fitting(FitConfig::new(ModelKind::Wlc).with_direction(FitDirection::ExtensionToForce))
        .with_kinetics(HMMConfig::default());
    let result = analyze(&trace, &config).unwrap();

    let json = serde_json::to_string(&result).unwrap();
    let decoded: AnalysisResult = serde_json::from_str(&json).unwrap();

    assert_eq!(decoded.trace_id, "hopping");
    assert_eq!(decoded.config, result.config);
    assert_eq!(decoded.fitting, result.fitting);
    let original = result.kinetics.completed().unwrap();
    let restored = decoded.kinetics.completed().unwrap();
    assert_eq!(restored.state_sequence, original.state_sequence);
    assert_eq!(restored.dwells.len(), original.dwells.len());
    assert_eq!(restored.dwell_times_by_state.len(), 2);
}
