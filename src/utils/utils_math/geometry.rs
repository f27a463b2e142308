use nalgebra::{Matrix2, Vector2};

/// z-component of the 3D cross product of two planar vectors.
pub fn cross_2d(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a[0] * b[1] - a[1] * b[0]
}

/// Planar velocity of a point at offset `r` from a body origin rotating at `omega`.
pub fn omega_cross_r(omega: f64, r: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(-omega * r[1], omega * r[0])
}

pub fn two_d_rotation_matrix_from_angle(theta: f64) -> Matrix2<f64> {
    let (s, c) = theta.sin_cos();
    Matrix2::new(c, -s, s, c)
}

/// Counter-clockwise perpendicular, used as the tangent direction of a contact frame.
pub fn perpendicular(v: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(-v[1], v[0])
}

/// Wraps an angle to (-pi, pi].
pub fn wrap_angle(theta: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut out = theta % two_pi;
    if out <= -std::f64::consts::PI { out += two_pi; }
    if out > std::f64::consts::PI { out -= two_pi; }
    out
}
