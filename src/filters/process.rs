//! Nonlinear kinematic process model shared by all filter variants.
//!
//! Propagation integrates the exact arc traced at constant velocity and
//! yaw rate instead of a first-order approximation, so heading-coupled
//! position drift does not accumulate at high turn rates. Velocity, yaw
//! rate, and wheel-bias states propagate as random walks.

use ndarray::{Array1, Array2};

use super::variant::{FilterVariant, ProcessNoiseSpec, STATE_HEADING, STATE_X, STATE_Y};

/// Below this yaw rate the arc equations degenerate and the straight-line
/// limit is used instead.
pub const OMEGA_EPS: f64 = 1e-5;

/// Wrap an angle to (-pi, pi].
pub fn wrap_angle(theta: f64) -> f64 {
    let mut t = theta;
    while t > std::f64::consts::PI {
        t -= 2.0 * std::f64::consts::PI;
    }
    while t <= -std::f64::consts::PI {
        t += 2.0 * std::f64::consts::PI;
    }
    t
}

/// Advance the pose block of the mean by one step of the unicycle model.
/// Velocity, yaw rate, and bias states are held constant; for the Basic
/// variant `v`/`omega` are the externally supplied input twist.
pub fn advance_mean(state: &mut Array1<f64>, v: f64, omega: f64, dt: f64) {
    let theta = state[STATE_HEADING];
    if omega.abs() >= OMEGA_EPS {
        let theta_next = theta + omega * dt;
        state[STATE_X] += v / omega * (theta_next.sin() - theta.sin());
        state[STATE_Y] += v / omega * (theta.cos() - theta_next.cos());
        state[STATE_HEADING] = wrap_angle(theta_next);
    } else {
        state[STATE_X] += v * dt * theta.cos();
        state[STATE_Y] += v * dt * theta.sin();
        state[STATE_HEADING] = wrap_angle(theta + omega * dt);
    }
}

/// Transition Jacobian evaluated at the pre-update mean.
///
/// Identity plus the analytic partials of the arc equations. For the
/// Basic variant only the heading column is populated (velocity and yaw
/// rate are inputs, not states); bias states contribute identity rows.
pub fn transition_jacobian(
    variant: FilterVariant,
    theta: f64,
    v: f64,
    omega: f64,
    dt: f64,
) -> Array2<f64> {
    let dim = variant.dimension();
    let mut f = Array2::<f64>::eye(dim);

    let (dx_dtheta, dy_dtheta, dx_dv, dy_dv, dx_domega, dy_domega);
    if omega.abs() >= OMEGA_EPS {
        let theta_next = theta + omega * dt;
        let dsin = theta_next.sin() - theta.sin();
        let dcos = theta.cos() - theta_next.cos();
        dx_dtheta = v / omega * dcos;
        dy_dtheta = v / omega * dsin;
        dx_dv = dsin / omega;
        dy_dv = dcos / omega;
        dx_domega = v * (dt * theta_next.cos() / omega - dsin / (omega * omega));
        dy_domega = v * (dt * theta_next.sin() / omega - dcos / (omega * omega));
    } else {
        // omega -> 0 limits of the arc partials
        dx_dtheta = -v * dt * theta.sin();
        dy_dtheta = v * dt * theta.cos();
        dx_dv = dt * theta.cos();
        dy_dv = dt * theta.sin();
        dx_domega = -0.5 * v * dt * dt * theta.sin();
        dy_domega = 0.5 * v * dt * dt * theta.cos();
    }

    f[[STATE_X, STATE_HEADING]] = dx_dtheta;
    f[[STATE_Y, STATE_HEADING]] = dy_dtheta;
    if variant.has_velocity_states() {
        use super::variant::{STATE_OMEGA, STATE_VEL};
        f[[STATE_X, STATE_VEL]] = dx_dv;
        f[[STATE_Y, STATE_VEL]] = dy_dv;
        f[[STATE_X, STATE_OMEGA]] = dx_domega;
        f[[STATE_Y, STATE_OMEGA]] = dy_domega;
        f[[STATE_HEADING, STATE_OMEGA]] = dt;
    }
    f
}

/// Process-noise diagonal for the active variant, unscaled. The caller
/// multiplies by the elapsed timestep so longer gaps inject proportionally
/// more uncertainty.
pub fn noise_matrix(spec: &ProcessNoiseSpec, variant: FilterVariant) -> Array2<f64> {
    let diag = spec.diagonal(variant);
    let mut q = Array2::<f64>::zeros((diag.len(), diag.len()));
    for (i, var) in diag.iter().enumerate() {
        q[[i, i]] = *var;
    }
    q
}
