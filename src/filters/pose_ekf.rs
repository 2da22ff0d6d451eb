//! EKF core: owns the state and covariance, orchestrates predict/correct
//! cycles against the enabled measurement channels.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, FilterResult};

use super::measurement::{apply_correction, InertialModel, OdometryModel, PositionModel};
use super::process;
use super::variant::{
    FilterVariant, ProcessNoiseSpec, STATE_BIAS_LEFT, STATE_BIAS_RIGHT, STATE_HEADING,
    STATE_OMEGA, STATE_VEL, STATE_X, STATE_Y,
};

/// Wheel-to-wheel separation used when none is configured [m].
pub const DEFAULT_TRACK_WIDTH: f64 = 0.5;

/// Planar pose EKF with a variant-selected state layout.
///
/// Single-threaded, call-and-return. The caller supplies the elapsed time
/// for each prediction via `set_timestep` and is responsible for invoking
/// `predict` once per interval before the corrections attributed to it.
pub struct PoseEkf {
    variant: FilterVariant,
    /// Current timestep [s]; replaced by `set_timestep` each cycle.
    dt: f64,
    state: Array1<f64>,
    covariance: Array2<f64>,
    /// Unscaled process-noise diagonal; multiplied by dt at predict time.
    process_noise: Array2<f64>,
    track_width: f64,

    odometry: Option<OdometryModel>,
    inertial: Option<InertialModel>,
    position: Option<PositionModel>,

    /// Input twist (v, omega) cached from the latest odometry sample.
    /// Drives the process model on the Basic variant, where velocity and
    /// yaw rate are not states.
    input_twist: (f64, f64),

    last_wheel_velocities: Option<(f64, f64)>,
    last_inertial_rate: Option<f64>,
    last_position_fix: Option<(f64, f64)>,

    predicts: u64,
    odometry_updates: u64,
    inertial_updates: u64,
    position_updates: u64,
    skipped_corrections: u64,
}

/// Full-state debug view with 3-sigma bounds.
///
/// Field population is explicit per variant and cumulative: richer
/// variants carry every simpler variant's fields, states the variant does
/// not model are `None`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterSnapshot {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub err_x: f64,
    pub err_y: f64,
    pub err_heading: f64,

    pub velocity: Option<f64>,
    pub angular_rate: Option<f64>,
    pub err_velocity: Option<f64>,
    pub err_angular_rate: Option<f64>,

    pub left_wheel_bias: Option<f64>,
    pub right_wheel_bias: Option<f64>,
    pub err_left_wheel_bias: Option<f64>,
    pub err_right_wheel_bias: Option<f64>,

    pub covariance_trace: f64,

    pub predicts: u64,
    pub odometry_updates: u64,
    pub inertial_updates: u64,
    pub position_updates: u64,
    pub skipped_corrections: u64,

    /// Raw residual inputs from the most recent sample on each channel.
    pub last_wheel_velocities: Option<(f64, f64)>,
    pub last_inertial_rate: Option<f64>,
    pub last_position_fix: Option<(f64, f64)>,
}

impl PoseEkf {
    /// Create a filter with a zero state and a conservative diagonal prior.
    pub fn new(
        variant: FilterVariant,
        initial_timestep: f64,
        process_noise: ProcessNoiseSpec,
    ) -> FilterResult<Self> {
        let dim = variant.dimension();
        let covariance = Self::default_covariance(variant);
        Self::with_prior(
            variant,
            initial_timestep,
            process_noise,
            &vec![0.0; dim],
            covariance,
        )
    }

    /// Create a filter from a caller-supplied prior mean and covariance.
    pub fn with_prior(
        variant: FilterVariant,
        initial_timestep: f64,
        process_noise: ProcessNoiseSpec,
        mean: &[f64],
        covariance: Array2<f64>,
    ) -> FilterResult<Self> {
        if !initial_timestep.is_finite() || initial_timestep <= 0.0 {
            return Err(FilterError::Config(format!(
                "Initial timestep must be positive, got {initial_timestep}"
            )));
        }
        process_noise.validate()?;

        let dim = variant.dimension();
        if mean.len() != dim {
            return Err(FilterError::Config(format!(
                "Prior mean has {} entries, variant needs {dim}",
                mean.len()
            )));
        }
        if covariance.dim() != (dim, dim) {
            return Err(FilterError::Config(format!(
                "Prior covariance is {:?}, variant needs ({dim}, {dim})",
                covariance.dim()
            )));
        }

        Ok(Self {
            variant,
            dt: initial_timestep,
            state: Array1::from_vec(mean.to_vec()),
            covariance,
            process_noise: process::noise_matrix(&process_noise, variant),
            track_width: DEFAULT_TRACK_WIDTH,
            odometry: None,
            inertial: None,
            position: None,
            input_twist: (0.0, 0.0),
            last_wheel_velocities: None,
            last_inertial_rate: None,
            last_position_fix: None,
            predicts: 0,
            odometry_updates: 0,
            inertial_updates: 0,
            position_updates: 0,
            skipped_corrections: 0,
        })
    }

    fn default_covariance(variant: FilterVariant) -> Array2<f64> {
        let diag: &[f64] = match variant {
            FilterVariant::Basic => &[1.0, 1.0, 0.5],
            FilterVariant::Kinematic => &[1.0, 1.0, 0.5, 1.0, 1.0],
            FilterVariant::KinematicBias => &[1.0, 1.0, 0.5, 1.0, 1.0, 0.1, 0.1],
        };
        let mut p = Array2::<f64>::zeros((diag.len(), diag.len()));
        for (i, value) in diag.iter().enumerate() {
            p[[i, i]] = *value;
        }
        p
    }

    /// Configure the wheel separation used to relate state twist to wheel
    /// velocities. Returns false on a non-positive or non-finite width.
    pub fn set_track_width(&mut self, width: f64) -> bool {
        if !width.is_finite() || width <= 0.0 {
            return false;
        }
        self.track_width = width;
        if let Some(model) = self.odometry.as_mut() {
            model.track_width = width;
        }
        true
    }

    /// Activate the odometry channel with the alpha/epsilon noise law.
    /// Valid on every variant: Kinematic and up treat the wheel pair as a
    /// measurement, Basic consumes it as the process input twist.
    pub fn enable_odometry(&mut self, alpha: f64, epsilon: f64) -> bool {
        if !alpha.is_finite() || !epsilon.is_finite() || alpha < 0.0 || epsilon < 0.0 {
            return false;
        }
        self.odometry = Some(OdometryModel {
            alpha,
            epsilon,
            track_width: self.track_width,
        });
        true
    }

    /// Activate the absolute-position channel. Compatible with every
    /// variant; fails only on invalid variance input.
    pub fn enable_absolute_position(&mut self, variance_x: f64, variance_y: f64) -> bool {
        if !variance_x.is_finite() || !variance_y.is_finite() || variance_x < 0.0 || variance_y < 0.0
        {
            return false;
        }
        self.position = Some(PositionModel {
            variance_x,
            variance_y,
        });
        true
    }

    /// Activate the inertial channel. Rejected on the Basic variant, which
    /// has no angular-rate state to absorb the observation.
    pub fn enable_inertial(&mut self, variance_omega: f64) -> bool {
        if !self.variant.has_velocity_states() {
            return false;
        }
        if !variance_omega.is_finite() || variance_omega < 0.0 {
            return false;
        }
        self.inertial = Some(InertialModel {
            variance: variance_omega,
        });
        true
    }

    /// Set the elapsed time for the next prediction.
    pub fn set_timestep(&mut self, dt: f64) -> FilterResult<()> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(FilterError::InvalidInput(format!(
                "Timestep must be positive, got {dt}"
            )));
        }
        self.dt = dt;
        Ok(())
    }

    /// Advance state and covariance by one process-model step using the
    /// current timestep: `P = F P Fᵀ + Q·dt`.
    pub fn predict(&mut self) {
        let (v, omega) = if self.variant.has_velocity_states() {
            (self.state[STATE_VEL], self.state[STATE_OMEGA])
        } else {
            self.input_twist
        };

        let f =
            process::transition_jacobian(self.variant, self.state[STATE_HEADING], v, omega, self.dt);
        process::advance_mean(&mut self.state, v, omega, self.dt);

        let fp = f.dot(&self.covariance);
        self.covariance = fp.dot(&f.t()) + &self.process_noise * self.dt;
        self.symmetrize();
        self.predicts += 1;
    }

    /// Correct against a (left, right) wheel-velocity pair. On the Basic
    /// variant this caches the equivalent twist as the next process input
    /// instead of running a covariance correction.
    pub fn correct_odometry(&mut self, left: f64, right: f64) {
        let Some(model) = self.odometry else {
            log::warn!("Odometry correction requested but channel is not enabled; ignoring");
            return;
        };
        if !left.is_finite() || !right.is_finite() {
            log::warn!("Rejecting non-finite wheel velocities ({left}, {right})");
            return;
        }
        self.last_wheel_velocities = Some((left, right));

        if !self.variant.has_velocity_states() {
            self.input_twist = (
                (left + right) / 2.0,
                (right - left) / model.track_width,
            );
            self.odometry_updates += 1;
            return;
        }

        let correction = model.correction(&self.state, self.variant, left, right);
        if apply_correction(&mut self.state, &mut self.covariance, &correction) {
            self.odometry_updates += 1;
        } else {
            self.skipped_corrections += 1;
            log::warn!("Odometry innovation covariance singular; correction skipped");
        }
    }

    /// Correct against a measured yaw rate.
    pub fn correct_inertial(&mut self, rate: f64) {
        let Some(model) = self.inertial else {
            log::warn!("Inertial correction requested but channel is not enabled; ignoring");
            return;
        };
        if !rate.is_finite() {
            log::warn!("Rejecting non-finite yaw rate {rate}");
            return;
        }
        self.last_inertial_rate = Some(rate);

        let correction = model.correction(&self.state, self.variant, rate);
        if apply_correction(&mut self.state, &mut self.covariance, &correction) {
            self.inertial_updates += 1;
        } else {
            self.skipped_corrections += 1;
            log::warn!("Inertial innovation covariance singular; correction skipped");
        }
    }

    /// Correct against an absolute (x, y) fix.
    pub fn correct_absolute_position(&mut self, x: f64, y: f64) {
        let Some(model) = self.position else {
            log::warn!("Position correction requested but channel is not enabled; ignoring");
            return;
        };
        if !x.is_finite() || !y.is_finite() {
            log::warn!("Rejecting non-finite position fix ({x}, {y})");
            return;
        }
        self.last_position_fix = Some((x, y));

        let correction = model.correction(&self.state, self.variant, x, y);
        if apply_correction(&mut self.state, &mut self.covariance, &correction) {
            self.position_updates += 1;
        } else {
            self.skipped_corrections += 1;
            log::warn!("Position innovation covariance singular; correction skipped");
        }
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.state
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn state_dimension(&self) -> usize {
        self.variant.dimension()
    }

    pub fn variant(&self) -> FilterVariant {
        self.variant
    }

    pub fn timestep(&self) -> f64 {
        self.dt
    }

    pub fn skipped_corrections(&self) -> u64 {
        self.skipped_corrections
    }

    /// The pose block (x, y, heading) of the covariance, row-major.
    pub fn pose_covariance(&self) -> [[f64; 3]; 3] {
        let mut block = [[0.0; 3]; 3];
        for (i, row) in block.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = self.covariance[[i, j]];
            }
        }
        block
    }

    /// Debug snapshot with 3-sigma bounds per active state.
    pub fn snapshot(&self) -> FilterSnapshot {
        let three_sigma = |idx: usize| 3.0 * self.covariance[[idx, idx]].max(0.0).sqrt();
        let has_velocity = self.variant.has_velocity_states();
        let has_bias = self.variant.has_wheel_bias_states();

        FilterSnapshot {
            x: self.state[STATE_X],
            y: self.state[STATE_Y],
            heading: self.state[STATE_HEADING],
            err_x: three_sigma(STATE_X),
            err_y: three_sigma(STATE_Y),
            err_heading: three_sigma(STATE_HEADING),
            velocity: has_velocity.then(|| self.state[STATE_VEL]),
            angular_rate: has_velocity.then(|| self.state[STATE_OMEGA]),
            err_velocity: has_velocity.then(|| three_sigma(STATE_VEL)),
            err_angular_rate: has_velocity.then(|| three_sigma(STATE_OMEGA)),
            left_wheel_bias: has_bias.then(|| self.state[STATE_BIAS_LEFT]),
            right_wheel_bias: has_bias.then(|| self.state[STATE_BIAS_RIGHT]),
            err_left_wheel_bias: has_bias.then(|| three_sigma(STATE_BIAS_LEFT)),
            err_right_wheel_bias: has_bias.then(|| three_sigma(STATE_BIAS_RIGHT)),
            covariance_trace: self.covariance.diag().sum(),
            predicts: self.predicts,
            odometry_updates: self.odometry_updates,
            inertial_updates: self.inertial_updates,
            position_updates: self.position_updates,
            skipped_corrections: self.skipped_corrections,
            last_wheel_velocities: self.last_wheel_velocities,
            last_inertial_rate: self.last_inertial_rate,
            last_position_fix: self.last_position_fix,
        }
    }

    fn symmetrize(&mut self) {
        let p_t = self.covariance.t().to_owned();
        self.covariance = (&self.covariance + &p_t) / 2.0;
    }
}
