pub struct FiniteDifferenceUtils;
impl FiniteDifferenceUtils {
    pub const DEFAULT_STEP: f64 = 1e-6;

    /// Central-difference gradient of a scalar function at `x`.  `x` is used as scratch space
    /// and restored before returning.
    pub fn central_difference_gradient<F: Fn(&[f64]) -> f64>(f: F, x: &mut [f64], step: f64) -> Vec<f64> {
        let mut out_vec = Vec::with_capacity(x.len());
        for i in 0..x.len() {
            let original = x[i];
            x[i] = original + step;
            let f_plus = f(x);
            x[i] = original - step;
            let f_minus = f(x);
            x[i] = original;
            out_vec.push((f_plus - f_minus) / (2.0 * step));
        }
        out_vec
    }
}
