//! Planar pose estimation for a differential-drive robot.
//!
//! An Extended Kalman Filter fuses wheel odometry, a single-axis gyro,
//! and absolute position fixes into a pose (x, y, heading) plus optional
//! kinematic and wheel-bias states, depending on the configured variant.
//! The filter itself is pure computation; [`node::EstimatorNode`] is the
//! thin shell that handles sample timing and output extraction.

pub mod error;
pub mod filters;
pub mod node;
pub mod types;

pub use error::{FilterError, FilterResult};
pub use filters::pose_ekf::{FilterSnapshot, PoseEkf};
pub use filters::variant::{FilterVariant, MeasurementChannel, ProcessNoiseSpec};
pub use node::{DebugRecord, DebugSink, EstimatorNode, NodeConfig};
pub use types::{GpsData, ImuData, OdomData, PoseWithCovariance};
