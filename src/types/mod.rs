use serde::{Deserialize, Serialize};

/// Wheel-odometry twist sample: planar body-frame velocities from the
/// drive encoders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OdomData {
    pub timestamp: f64,
    /// Forward velocity [m/s]
    pub linear: f64,
    /// Yaw rate [rad/s]
    pub angular: f64,
}

/// Single-axis gyro sample (yaw rate about the vertical axis).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImuData {
    pub timestamp: f64,
    /// Yaw rate [rad/s]
    pub angular: f64,
}

/// Absolute position fix in the map frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsData {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
}

/// Planar pose with its 3x3 covariance block (row-major x, y, heading),
/// ready for external publication.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoseWithCovariance {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub covariance: [[f64; 3]; 3],
}
