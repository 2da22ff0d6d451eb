//! Measurement models and the generic correction routine they share.

use nalgebra::DMatrix;
use ndarray::{arr1, arr2, Array1, Array2};

use super::variant::{
    FilterVariant, STATE_BIAS_LEFT, STATE_BIAS_RIGHT, STATE_OMEGA, STATE_VEL, STATE_X, STATE_Y,
};

/// One linearized observation: Jacobian `H`, residual `z - h(x)`, and
/// noise covariance `R`.
pub struct Correction {
    pub jacobian: Array2<f64>,
    pub residual: Array1<f64>,
    pub noise: Array2<f64>,
}

/// Apply a Kalman correction in place.
///
/// Joseph-form covariance update followed by explicit symmetrization, so
/// repeated corrections cannot push the covariance out of PSD through
/// rounding. Returns false without mutating anything when the innovation
/// covariance is singular or non-finite; the caller decides how loudly to
/// report that.
pub fn apply_correction(
    state: &mut Array1<f64>,
    covariance: &mut Array2<f64>,
    correction: &Correction,
) -> bool {
    let h = &correction.jacobian;
    let r = &correction.noise;
    let y = &correction.residual;

    let h_t = h.t();
    let ph_t = covariance.dot(&h_t);
    let s = h.dot(&ph_t) + r;

    let m = s.nrows();
    let Some(s_slice) = s.as_slice() else {
        return false;
    };
    if s_slice.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let s_mat = DMatrix::from_row_slice(m, m, s_slice);
    let Some(s_inv_mat) = s_mat.try_inverse() else {
        return false;
    };
    let mut s_inv = Array2::<f64>::zeros((m, m));
    for i in 0..m {
        for j in 0..m {
            s_inv[[i, j]] = s_inv_mat[(i, j)];
        }
    }

    let k = ph_t.dot(&s_inv);
    let dx = k.dot(y);
    if dx.iter().any(|v| !v.is_finite()) {
        return false;
    }
    *state += &dx;

    // Joseph form: P = (I - KH) P (I - KH)^T + K R K^T
    let dim = state.len();
    let i_mat = Array2::<f64>::eye(dim);
    let i_minus_kh = &i_mat - &k.dot(h);
    let term1 = i_minus_kh.dot(covariance).dot(&i_minus_kh.t());
    let term2 = k.dot(r).dot(&k.t());
    *covariance = term1 + term2;

    let p_t = covariance.t().to_owned();
    *covariance = (&*covariance + &p_t) / 2.0;
    true
}

/// Wheel-velocity observation of the kinematic states.
///
/// Noise follows the alpha/epsilon law: per-wheel variance grows linearly
/// with measured wheel speed and bottoms out at epsilon at rest.
#[derive(Clone, Copy, Debug)]
pub struct OdometryModel {
    pub alpha: f64,
    pub epsilon: f64,
    pub track_width: f64,
}

impl OdometryModel {
    pub fn wheel_variance(&self, wheel_velocity: f64) -> f64 {
        self.alpha * wheel_velocity.abs() + self.epsilon
    }

    /// Observation of (left, right) wheel velocities. Only valid for
    /// variants carrying velocity states; the bias states, when present,
    /// absorb per-wheel systematic error.
    pub fn correction(
        &self,
        state: &Array1<f64>,
        variant: FilterVariant,
        left: f64,
        right: f64,
    ) -> Correction {
        let half_track = self.track_width / 2.0;
        let v = state[STATE_VEL];
        let omega = state[STATE_OMEGA];

        let mut expected_left = v - half_track * omega;
        let mut expected_right = v + half_track * omega;

        let dim = variant.dimension();
        let mut h = Array2::<f64>::zeros((2, dim));
        h[[0, STATE_VEL]] = 1.0;
        h[[0, STATE_OMEGA]] = -half_track;
        h[[1, STATE_VEL]] = 1.0;
        h[[1, STATE_OMEGA]] = half_track;
        if variant.has_wheel_bias_states() {
            expected_left += state[STATE_BIAS_LEFT];
            expected_right += state[STATE_BIAS_RIGHT];
            h[[0, STATE_BIAS_LEFT]] = 1.0;
            h[[1, STATE_BIAS_RIGHT]] = 1.0;
        }

        Correction {
            jacobian: h,
            residual: arr1(&[left - expected_left, right - expected_right]),
            noise: arr2(&[
                [self.wheel_variance(left), 0.0],
                [0.0, self.wheel_variance(right)],
            ]),
        }
    }
}

/// Scalar yaw-rate observation of the angular-rate state.
#[derive(Clone, Copy, Debug)]
pub struct InertialModel {
    pub variance: f64,
}

impl InertialModel {
    pub fn correction(
        &self,
        state: &Array1<f64>,
        variant: FilterVariant,
        rate: f64,
    ) -> Correction {
        let mut h = Array2::<f64>::zeros((1, variant.dimension()));
        h[[0, STATE_OMEGA]] = 1.0;
        Correction {
            jacobian: h,
            residual: arr1(&[rate - state[STATE_OMEGA]]),
            noise: arr2(&[[self.variance]]),
        }
    }
}

/// Direct (x, y) observation; compatible with every variant.
#[derive(Clone, Copy, Debug)]
pub struct PositionModel {
    pub variance_x: f64,
    pub variance_y: f64,
}

impl PositionModel {
    pub fn correction(
        &self,
        state: &Array1<f64>,
        variant: FilterVariant,
        x: f64,
        y: f64,
    ) -> Correction {
        let mut h = Array2::<f64>::zeros((2, variant.dimension()));
        h[[0, STATE_X]] = 1.0;
        h[[1, STATE_Y]] = 1.0;
        Correction {
            jacobian: h,
            residual: arr1(&[x - state[STATE_X], y - state[STATE_Y]]),
            noise: arr2(&[[self.variance_x, 0.0], [0.0, self.variance_y]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wheel_variance_floor_at_rest() {
        let model = OdometryModel {
            alpha: 0.01,
            epsilon: 1e-4,
            track_width: 0.5,
        };
        assert_relative_eq!(model.wheel_variance(0.0), 1e-4);
        assert!(model.wheel_variance(1.0) > model.wheel_variance(0.5));
        // Sign of the wheel velocity must not matter
        assert_relative_eq!(model.wheel_variance(-2.0), model.wheel_variance(2.0));
    }

    #[test]
    fn test_odometry_expected_wheels_from_state() {
        let model = OdometryModel {
            alpha: 0.0,
            epsilon: 1e-4,
            track_width: 0.4,
        };
        // v = 1.0, omega = 0.5: vR = 1.1, vL = 0.9
        let state = arr1(&[0.0, 0.0, 0.0, 1.0, 0.5]);
        let c = model.correction(&state, FilterVariant::Kinematic, 0.9, 1.1);
        assert_relative_eq!(c.residual[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(c.residual[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_odometry_bias_states_shift_expectation() {
        let model = OdometryModel {
            alpha: 0.0,
            epsilon: 1e-4,
            track_width: 0.4,
        };
        let state = arr1(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.05, -0.05]);
        let c = model.correction(&state, FilterVariant::KinematicBias, 1.0, 1.0);
        assert_relative_eq!(c.residual[0], -0.05, epsilon = 1e-12);
        assert_relative_eq!(c.residual[1], 0.05, epsilon = 1e-12);
        assert_relative_eq!(c.jacobian[[0, 5]], 1.0);
        assert_relative_eq!(c.jacobian[[1, 6]], 1.0);
    }

    #[test]
    fn test_apply_correction_rejects_singular_s() {
        let mut state = arr1(&[1.0, 2.0]);
        let mut cov = Array2::<f64>::zeros((2, 2));
        let correction = Correction {
            jacobian: arr2(&[[1.0, 0.0]]),
            residual: arr1(&[0.0]),
            noise: arr2(&[[0.0]]),
        };
        // P = 0 and R = 0 make S exactly singular
        assert!(!apply_correction(&mut state, &mut cov, &correction));
        assert_relative_eq!(state[0], 1.0);
        assert_relative_eq!(cov[[0, 0]], 0.0);
    }

    #[test]
    fn test_apply_correction_pulls_state_toward_measurement() {
        let mut state = arr1(&[0.0]);
        let mut cov = arr2(&[[1.0]]);
        let correction = Correction {
            jacobian: arr2(&[[1.0]]),
            residual: arr1(&[2.0]),
            noise: arr2(&[[1.0]]),
        };
        assert!(apply_correction(&mut state, &mut cov, &correction));
        // Gain = P/(P+R) = 0.5
        assert_relative_eq!(state[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(cov[[0, 0]], 0.5, epsilon = 1e-12);
    }
}
