use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Normal, Distribution};

/// Seeded samplers.  Every sampler takes an explicit seed so that retries of the same
/// candidate are repeatable run to run.
pub struct SimpleSamplers;
impl SimpleSamplers {
    /// Adds zero-mean gaussian noise with the given standard deviation to every entry.
    pub fn perturb_with_normal_noise(values: &[f64], standard_deviation: f64, seed: Option<u64>) -> Vec<f64> {
        if standard_deviation <= 0.0 { return values.to_vec(); }
        let mut rng = Self::get_rng(seed);
        let distribution = match Normal::new(0.0, standard_deviation) {
            Ok(d) => { d }
            Err(_) => { return values.to_vec(); }
        };
        values.iter().map(|v| v + distribution.sample(&mut rng)).collect()
    }
    fn get_rng(seed: Option<u64>) -> ChaCha20Rng {
        match seed {
            None => { ChaCha20Rng::from_entropy() }
            Some(seed) => { ChaCha20Rng::seed_from_u64(seed) }
        }
    }
}
