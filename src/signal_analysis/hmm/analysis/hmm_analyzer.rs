use serde::{Deserialize, Serialize};

/// Summary statistics of a decoded state sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HMMAnalysis {
    pub state_occupancy: Vec<f64>,          // Fraction of samples spent in each state
    pub transition_counts: Vec<Vec<usize>>, // [from][to], diagonal is zero
    pub transition_rates: Vec<Vec<f64>>,    // [from][to] in 1/s
    pub idealized_trace: Vec<f64>,          // State mean at every sample
}

pub struct HMMAnalyzer<'a> {
    state_sequence: &'a [usize],
    state_means: &'a [f64],
    sampling_interval: f64,
}

impl<'a> HMMAnalyzer<'a> {
    pub fn new(state_sequence: &'a [usize], state_means: &'a [f64], sampling_interval: f64) -> Self {
        Self { state_sequence, state_means, sampling_interval }
    }

    pub fn run(&self) -> HMMAnalysis {
        let num_states = self.state_means.len();
        let samples_per_state = Self::compute_samples_per_state(self.state_sequence, num_states);
        let transition_counts = Self::compute_transition_counts(self.state_sequence, num_states);

        HMMAnalysis {
            state_occupancy: Self::compute_state_occupancy(self.state_sequence, num_states),
            transition_rates: Self::compute_transition_rates(&transition_counts, &samples_per_state, self.sampling_interval),
            transition_counts,
            idealized_trace: Self::compute_idealized_trace(self.state_sequence, self.state_means),
        }
    }

    pub fn compute_samples_per_state(state_sequence: &[usize], num_states: usize) -> Vec<usize> {
        let mut counts = vec![0_usize; num_states];
        state_sequence.iter().for_each(|&state_id| counts[state_id] += 1);
        counts
    }

    pub fn compute_state_occupancy(state_sequence: &[usize], num_states: usize) -> Vec<f64> {
        if state_sequence.is_empty() {
            return vec![0.0; num_states];
        }

        let sequence_len = state_sequence.len() as f64;
        Self::compute_samples_per_state(state_sequence, num_states)
            .iter()
            .map(|&count| count as f64 / sequence_len)
            .collect()
    }

    pub fn compute_transition_counts(state_sequence: &[usize], num_states: usize) -> Vec<Vec<usize>> {
        let mut counts = vec![vec![0_usize; num_states]; num_states];
        for pair in state_sequence.windows(2) {
            if pair[0] != pair[1] {
                counts[pair[0]][pair[1]] += 1;
            }
        }
        counts
    }

    // rate(i -> j) = count(i -> j) / total time spent in i
    pub fn compute_transition_rates(
        transition_counts: &[Vec<usize>],
        samples_per_state: &[usize],
        sampling_interval: f64,
    ) -> Vec<Vec<f64>> {
        transition_counts
            .iter()
            .zip(samples_per_state)
            .map(|(row, &samples)| {
                let time_in_state = samples as f64 * sampling_interval;
                row.iter()
                    .map(|&count| if time_in_state > 0.0 { count as f64 / time_in_state } else { 0.0 })
                    .collect()
            })
            .collect()
    }

    // The "square wave" drawn on top of the raw signal
    pub fn compute_idealized_trace(state_sequence: &[usize], state_means: &[f64]) -> Vec<f64> {
        state_sequence.iter().map(|&state_id| state_means[state_id]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_of_short_sequence() {
        let sequence = [0, 0, 0, 1, 1, 0, 0];
        let means = [10.0, 20.0];
        let analysis = HMMAnalyzer::new(&sequence, &means, 0.5).run();

        assert_eq!(analysis.state_occupancy, vec![5.0 / 7.0, 2.0 / 7.0]);
        assert_eq!(analysis.transition_counts, vec![vec![0, 1], vec![1, 0]]);
        // One exit from state 0 over 2.5 s, one exit from state 1 over 1 s
        assert!((analysis.transition_rates[0][1] - 0.4).abs() < 1e-12);
        assert!((analysis.transition_rates[1][0] - 1.0).abs() < 1e-12);
        assert_eq!(analysis.idealized_trace, vec![10.0, 10.0, 10.0, 20.0, 20.0, 10.0, 10.0]);
    }

    #[test]
    fn test_unvisited_state() {
        let sequence = [1, 1, 1];
        let analysis = HMMAnalyzer::new(&sequence, &[0.0, 1.0, 2.0], 1.0).run();

        assert_eq!(analysis.state_occupancy, vec![0.0, 1.0, 0.0]);
        assert!(analysis.transition_rates.iter().flatten().all(|rate| *rate == 0.0));
    }
}
