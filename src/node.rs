//! Thin shell around one filter instance.
//!
//! Everything here is independent of transport and scheduling: samples go
//! in, pose estimates come out. Timing follows the prediction-authority
//! scheme: one configured channel's inter-arrival gap becomes the filter
//! timestep, and its arrival triggers the predict for that interval; the
//! other channels run correction-only updates against the current state.
//! Debug output goes to an injected sink, never to the filesystem.

use serde::{Deserialize, Serialize};

use crate::error::FilterResult;
use crate::filters::pose_ekf::{FilterSnapshot, PoseEkf, DEFAULT_TRACK_WIDTH};
use crate::filters::variant::{FilterVariant, MeasurementChannel, ProcessNoiseSpec};
use crate::types::{GpsData, ImuData, OdomData, PoseWithCovariance};

/// Node configuration, applied once at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub variant: FilterVariant,
    /// Expected authority-channel rate [Hz]; 1/freq seeds the timestep
    /// until the first real inter-arrival gap is known.
    pub frequency: f64,
    /// Wheel-to-wheel separation [m].
    pub track_width: f64,
    pub process_noise: ProcessNoiseSpec,

    pub odom_used: bool,
    pub imu_used: bool,
    pub gps_used: bool,

    /// Odometry noise law: variance = alpha * |wheel velocity| + epsilon.
    pub odom_alpha: f64,
    pub odom_epsilon: f64,
    /// Measurement standard deviations (squared into variances here).
    pub gps_sigma_x: f64,
    pub gps_sigma_y: f64,
    pub imu_sigma_omega: f64,

    /// Which channel's arrival drives the predict cycle.
    pub prediction_authority: MeasurementChannel,
    pub debug: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            variant: FilterVariant::Kinematic,
            frequency: 10.0,
            track_width: DEFAULT_TRACK_WIDTH,
            process_noise: ProcessNoiseSpec::default(),
            odom_used: true,
            imu_used: true,
            gps_used: true,
            odom_alpha: 0.01,
            odom_epsilon: 0.0001,
            gps_sigma_x: 0.05,
            gps_sigma_y: 0.05,
            imu_sigma_omega: 0.05,
            prediction_authority: MeasurementChannel::AbsolutePosition,
            debug: false,
        }
    }
}

/// One structured debug record per authority cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DebugRecord {
    /// Seconds since the first sample the node saw.
    pub elapsed: f64,
    pub snapshot: FilterSnapshot,
}

/// Receiver for debug records. The node owns the sink; what happens to the
/// records (buffering, serialization, dropping) is the sink's business.
pub trait DebugSink {
    fn record(&mut self, record: &DebugRecord);
}

/// Discards every record.
pub struct NullSink;

impl DebugSink for NullSink {
    fn record(&mut self, _record: &DebugRecord) {}
}

/// Context object owning one [`PoseEkf`] and its timing state.
pub struct EstimatorNode {
    config: NodeConfig,
    filter: PoseEkf,
    sink: Box<dyn DebugSink>,
    start_stamp: Option<f64>,
    last_authority_stamp: Option<f64>,
}

impl EstimatorNode {
    pub fn new(config: NodeConfig) -> FilterResult<Self> {
        Self::with_sink(config, Box::new(NullSink))
    }

    pub fn with_sink(config: NodeConfig, sink: Box<dyn DebugSink>) -> FilterResult<Self> {
        let initial_dt = 1.0 / config.frequency.max(1.0);
        let mut filter = PoseEkf::new(config.variant, initial_dt, config.process_noise)?;
        filter.set_track_width(config.track_width);

        if config.odom_used && !filter.enable_odometry(config.odom_alpha, config.odom_epsilon) {
            log::warn!("Tried to initialize odometry channel but failed");
        }
        if config.gps_used
            && !filter.enable_absolute_position(
                config.gps_sigma_x * config.gps_sigma_x,
                config.gps_sigma_y * config.gps_sigma_y,
            )
        {
            log::warn!("Tried to initialize absolute-position channel but failed");
        }
        if config.imu_used
            && !filter.enable_inertial(config.imu_sigma_omega * config.imu_sigma_omega)
        {
            log::warn!("Tried to initialize inertial channel but failed");
        }

        Ok(Self {
            config,
            filter,
            sink,
            start_stamp: None,
            last_authority_stamp: None,
        })
    }

    /// Odometry twist sample. Converted to wheel velocities with the
    /// configured track width before entering the filter.
    pub fn handle_odometry(&mut self, sample: &OdomData) -> Option<PoseWithCovariance> {
        if !self.config.odom_used {
            return None;
        }
        if !sample.timestamp.is_finite()
            || !sample.linear.is_finite()
            || !sample.angular.is_finite()
        {
            log::warn!("Rejecting odometry sample with non-finite fields");
            return None;
        }
        self.note_start(sample.timestamp);
        let is_authority =
            self.run_authority_predict(MeasurementChannel::Odometry, sample.timestamp);

        let half_track = self.config.track_width / 2.0;
        let right = sample.linear + half_track * sample.angular;
        let left = sample.linear - half_track * sample.angular;
        self.filter.correct_odometry(left, right);

        is_authority.then(|| self.publish(sample.timestamp))
    }

    /// Gyro yaw-rate sample.
    pub fn handle_inertial(&mut self, sample: &ImuData) -> Option<PoseWithCovariance> {
        if !self.config.imu_used {
            return None;
        }
        if !sample.timestamp.is_finite() || !sample.angular.is_finite() {
            log::warn!("Rejecting inertial sample with non-finite fields");
            return None;
        }
        self.note_start(sample.timestamp);
        let is_authority =
            self.run_authority_predict(MeasurementChannel::Inertial, sample.timestamp);

        self.filter.correct_inertial(sample.angular);

        is_authority.then(|| self.publish(sample.timestamp))
    }

    /// Absolute position fix. With the default configuration this is the
    /// prediction authority: its stamp gap becomes the timestep and its
    /// arrival triggers predict, correct, and publication.
    pub fn handle_position_fix(&mut self, sample: &GpsData) -> Option<PoseWithCovariance> {
        if !self.config.gps_used {
            return None;
        }
        if !sample.timestamp.is_finite() || !sample.x.is_finite() || !sample.y.is_finite() {
            log::warn!("Rejecting position fix with non-finite fields");
            return None;
        }
        self.note_start(sample.timestamp);
        let is_authority =
            self.run_authority_predict(MeasurementChannel::AbsolutePosition, sample.timestamp);

        self.filter.correct_absolute_position(sample.x, sample.y);

        is_authority.then(|| self.publish(sample.timestamp))
    }

    /// Current pose estimate with its 3x3 covariance block.
    pub fn pose(&self) -> PoseWithCovariance {
        let mean = self.filter.mean();
        PoseWithCovariance {
            x: mean[0],
            y: mean[1],
            heading: mean[2],
            covariance: self.filter.pose_covariance(),
        }
    }

    pub fn filter(&self) -> &PoseEkf {
        &self.filter
    }

    fn note_start(&mut self, stamp: f64) {
        self.start_stamp.get_or_insert(stamp);
    }

    /// Run the predict step if this channel is the prediction authority.
    /// Returns whether the sample closed out an authority cycle.
    fn run_authority_predict(&mut self, channel: MeasurementChannel, stamp: f64) -> bool {
        if self.config.prediction_authority != channel {
            return false;
        }

        match self.last_authority_stamp {
            None => {
                // First arrival: predict with the configured 1/freq seed.
                self.filter.predict();
            }
            Some(previous) => {
                let gap = stamp - previous;
                if gap > 0.0 {
                    // set_timestep only fails on non-positive/non-finite
                    // gaps, both excluded here.
                    let _ = self.filter.set_timestep(gap);
                    self.filter.predict();
                } else {
                    log::warn!(
                        "Authority sample stamp {stamp} not after previous {previous}; skipping predict"
                    );
                }
            }
        }
        self.last_authority_stamp = Some(stamp);
        true
    }

    fn publish(&mut self, stamp: f64) -> PoseWithCovariance {
        if self.config.debug {
            let record = DebugRecord {
                elapsed: stamp - self.start_stamp.unwrap_or(stamp),
                snapshot: self.filter.snapshot(),
            };
            self.sink.record(&record);
        }
        self.pose()
    }
}
