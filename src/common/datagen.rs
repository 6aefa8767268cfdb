use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::types::FloatingPoint;

/// Multi-dimensional test streams: gaussian mixtures with per-component mean
/// and scale, plus a label per generated point. Used by the integration
/// tests; not part of the query surface.
pub struct MixtureStream<F> {
    pub data: Vec<Vec<F>>,
    pub labels: Vec<usize>,
}

impl<F: FloatingPoint> MixtureStream<F> {
    pub fn mixture(
        num: usize,
        means: &[Vec<F>],
        scales: &[Vec<F>],
        weights: &[f32],
        seed: u64,
    ) -> Self {
        assert!(!means.is_empty(), "need at least one component");
        assert!(
            means.len() == scales.len() && means.len() == weights.len(),
            "mismatched component counts"
        );
        let dimensions = means[0].len();
        let total: f32 = weights.iter().sum();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);

        let mut data = Vec::with_capacity(num);
        let mut labels = Vec::with_capacity(num);
        for _ in 0..num {
            let mut draw: f32 = rng.gen::<f32>() * total;
            let mut label = 0;
            while label + 1 < weights.len() && draw > weights[label] {
                draw -= weights[label];
                label += 1;
            }
            let mut point = Vec::with_capacity(dimensions);
            for j in 0..dimensions {
                let gaussian = F::from_f64_lossy(next_gaussian(&mut rng));
                point.push(means[label][j] + scales[label][j] * gaussian);
            }
            data.push(point);
            labels.push(label);
        }
        MixtureStream { data, labels }
    }

    pub fn uniform(num: usize, dimensions: usize, low: f64, high: f64, seed: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let span = high - low;
        let data = (0..num)
            .map(|_| {
                (0..dimensions)
                    .map(|_| F::from_f64_lossy(low + span * rng.gen::<f64>()))
                    .collect()
            })
            .collect();
        MixtureStream {
            data,
            labels: vec![0; num],
        }
    }
}

/// Box-Muller; consumes two uniform draws per call.
fn next_gaussian(rng: &mut ChaCha20Rng) -> f64 {
    let u: f64 = loop {
        let candidate = rng.gen::<f64>();
        if candidate > 0.0 {
            break candidate;
        }
    };
    let v: f64 = rng.gen();
    (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixture_is_reproducible_and_labelled() {
        let means = vec![vec![0.0f32, 0.0], vec![10.0, 10.0]];
        let scales = vec![vec![1.0f32, 1.0], vec![1.0, 1.0]];
        let first = MixtureStream::<f32>::mixture(100, &means, &scales, &[0.5, 0.5], 7);
        let second = MixtureStream::<f32>::mixture(100, &means, &scales, &[0.5, 0.5], 7);
        assert_eq!(first.data, second.data);
        assert_eq!(first.labels, second.labels);
        assert!(first.labels.iter().any(|&l| l == 0));
        assert!(first.labels.iter().any(|&l| l == 1));
    }
}
