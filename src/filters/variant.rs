use serde::{Deserialize, Serialize};

use crate::error::{FilterError, FilterResult};

/// State vector indices shared by all variants.
pub const STATE_X: usize = 0;
pub const STATE_Y: usize = 1;
pub const STATE_HEADING: usize = 2;
/// Present from the Kinematic variant up.
pub const STATE_VEL: usize = 3;
pub const STATE_OMEGA: usize = 4;
/// Wheel-velocity bias states, KinematicBias only.
pub const STATE_BIAS_LEFT: usize = 5;
pub const STATE_BIAS_RIGHT: usize = 6;

/// State-space layout of the filter, fixed at construction.
///
/// Represented as a tagged configuration rather than one type per layout:
/// all three variants share the same predict/correct implementation,
/// parameterized by which state indices exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterVariant {
    /// x, y, heading. Velocity and yaw rate are process inputs taken from
    /// the latest odometry sample.
    Basic,
    /// x, y, heading, velocity, yaw rate.
    Kinematic,
    /// Kinematic plus left/right wheel-velocity bias states.
    KinematicBias,
}

impl FilterVariant {
    pub fn dimension(self) -> usize {
        match self {
            FilterVariant::Basic => 3,
            FilterVariant::Kinematic => 5,
            FilterVariant::KinematicBias => 7,
        }
    }

    /// Velocity and yaw rate are part of the state vector.
    pub fn has_velocity_states(self) -> bool {
        !matches!(self, FilterVariant::Basic)
    }

    pub fn has_wheel_bias_states(self) -> bool {
        matches!(self, FilterVariant::KinematicBias)
    }

    /// Parse a configuration name. Unknown names fall back to Kinematic
    /// with a warning rather than failing the whole node.
    pub fn parse(name: &str) -> Self {
        match name {
            "basic" | "ekf_3state" => FilterVariant::Basic,
            "kinematic" | "ekf_5state" => FilterVariant::Kinematic,
            "kinematic_bias" | "ekf_7state" => FilterVariant::KinematicBias,
            other => {
                log::warn!("Unknown filter variant \"{other}\"; defaulting to kinematic");
                FilterVariant::Kinematic
            }
        }
    }
}

/// Sensor channels the filter can fuse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementChannel {
    Odometry,
    Inertial,
    AbsolutePosition,
}

/// Process-noise variances, one per potential state (plus a reserved
/// gyro-bias slot). Set once at construction; the process model picks the
/// subset matching the active variant's dimension.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProcessNoiseSpec {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub velocity: f64,
    pub angular_rate: f64,
    pub left_wheel_velocity: f64,
    pub right_wheel_velocity: f64,
    /// Reserved: no variant in this crate carries a gyro-bias state.
    pub gyro_bias: f64,
}

impl ProcessNoiseSpec {
    /// Build from an ordered slice of standard deviations
    /// (x, y, heading, velocity, angular rate, left wheel, right wheel,
    /// gyro bias). Errors if fewer than eight entries are supplied.
    pub fn from_sigmas(sigmas: &[f64]) -> FilterResult<Self> {
        if sigmas.len() < 8 {
            return Err(FilterError::Config(format!(
                "Process noise needs 8 sigmas, got {}",
                sigmas.len()
            )));
        }
        let spec = Self {
            x: sigmas[0] * sigmas[0],
            y: sigmas[1] * sigmas[1],
            heading: sigmas[2] * sigmas[2],
            velocity: sigmas[3] * sigmas[3],
            angular_rate: sigmas[4] * sigmas[4],
            left_wheel_velocity: sigmas[5] * sigmas[5],
            right_wheel_velocity: sigmas[6] * sigmas[6],
            gyro_bias: sigmas[7] * sigmas[7],
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> FilterResult<()> {
        for (name, value) in self.entries() {
            if !value.is_finite() || value < 0.0 {
                return Err(FilterError::Config(format!(
                    "Process noise variance {name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Ordered variances for the active variant's state vector.
    pub fn diagonal(&self, variant: FilterVariant) -> Vec<f64> {
        let full = [
            self.x,
            self.y,
            self.heading,
            self.velocity,
            self.angular_rate,
            self.left_wheel_velocity,
            self.right_wheel_velocity,
        ];
        full[..variant.dimension()].to_vec()
    }

    fn entries(&self) -> [(&'static str, f64); 8] {
        [
            ("x", self.x),
            ("y", self.y),
            ("heading", self.heading),
            ("velocity", self.velocity),
            ("angular_rate", self.angular_rate),
            ("left_wheel_velocity", self.left_wheel_velocity),
            ("right_wheel_velocity", self.right_wheel_velocity),
            ("gyro_bias", self.gyro_bias),
        ]
    }
}

impl Default for ProcessNoiseSpec {
    /// Defaults matching a slow indoor differential-drive platform.
    fn default() -> Self {
        Self {
            x: 0.01f64.powi(2),
            y: 0.01f64.powi(2),
            heading: 0.05f64.powi(2),
            velocity: 0.5f64.powi(2),
            angular_rate: 0.5f64.powi(2),
            left_wheel_velocity: 0.05f64.powi(2),
            right_wheel_velocity: 0.05f64.powi(2),
            gyro_bias: 0.001f64.powi(2),
        }
    }
}
