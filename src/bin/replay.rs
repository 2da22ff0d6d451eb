use std::cell::RefCell;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use serde::Deserialize;
use serde_json::json;

use rover_pose_ekf::{
    DebugRecord, DebugSink, EstimatorNode, FilterVariant, GpsData, ImuData, NodeConfig, OdomData,
    ProcessNoiseSpec,
};

/// Replay a recorded sensor log through the estimator and report the
/// resulting trajectory.
#[derive(Parser, Debug)]
struct Args {
    /// Path to a sensor log (JSON, {"readings": [...]})
    #[arg(long)]
    log: PathBuf,

    /// Filter variant: basic | kinematic | kinematic_bias
    #[arg(long, default_value = "kinematic")]
    variant: String,

    /// Wheel-to-wheel separation [m]
    #[arg(long, default_value = "0.5")]
    track_width: f64,

    /// Odometry noise slope (alpha)
    #[arg(long, default_value = "0.01")]
    odom_alpha: f64,

    /// Odometry noise floor (epsilon)
    #[arg(long, default_value = "0.0001")]
    odom_epsilon: f64,

    /// GPS position sigma [m], applied to both axes
    #[arg(long, default_value = "0.05")]
    gps_sigma: f64,

    /// Gyro yaw-rate sigma [rad/s]
    #[arg(long, default_value = "0.05")]
    imu_sigma: f64,

    /// Expected GPS rate [Hz], seeds the initial timestep
    #[arg(long, default_value = "10.0")]
    freq: f64,

    /// Write per-cycle debug records to this JSON file
    #[arg(long)]
    debug_out: Option<PathBuf>,

    /// Print each published pose, not just the summary
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Deserialize)]
struct Reading {
    timestamp: f64,
    odom: Option<OdomData>,
    imu: Option<ImuData>,
    gps: Option<GpsData>,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

struct SharedSink(Rc<RefCell<Vec<DebugRecord>>>);

impl DebugSink for SharedSink {
    fn record(&mut self, record: &DebugRecord) {
        self.0.borrow_mut().push(record.clone());
    }
}

fn load_log(path: &PathBuf) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let log = load_log(&args.log)?;

    let config = NodeConfig {
        variant: FilterVariant::parse(&args.variant),
        frequency: args.freq,
        track_width: args.track_width,
        process_noise: ProcessNoiseSpec::default(),
        odom_alpha: args.odom_alpha,
        odom_epsilon: args.odom_epsilon,
        gps_sigma_x: args.gps_sigma,
        gps_sigma_y: args.gps_sigma,
        imu_sigma_omega: args.imu_sigma,
        debug: true,
        ..NodeConfig::default()
    };

    let records = Rc::new(RefCell::new(Vec::new()));
    let mut node = EstimatorNode::with_sink(config, Box::new(SharedSink(records.clone())))?;

    let mut published = 0u64;
    for reading in &log.readings {
        if let Some(odom) = reading.odom.as_ref() {
            node.handle_odometry(odom);
        }
        if let Some(imu) = reading.imu.as_ref() {
            node.handle_inertial(imu);
        }
        if let Some(gps) = reading.gps.as_ref() {
            if let Some(pose) = node.handle_position_fix(gps) {
                published += 1;
                if args.verbose {
                    println!(
                        "t={:.3} pose=({:.3}, {:.3}, {:.3} rad)",
                        reading.timestamp, pose.x, pose.y, pose.heading
                    );
                }
            }
        }
    }

    if let Some(path) = args.debug_out.as_ref() {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &*records.borrow())?;
    }

    let pose = node.pose();
    let snapshot = node.filter().snapshot();
    let summary = json!({
        "log": args.log.display().to_string(),
        "variant": args.variant,
        "readings": log.readings.len(),
        "published_poses": published,
        "final_pose": { "x": pose.x, "y": pose.y, "heading": pose.heading },
        "covariance_trace": snapshot.covariance_trace,
        "predicts": snapshot.predicts,
        "odometry_updates": snapshot.odometry_updates,
        "inertial_updates": snapshot.inertial_updates,
        "position_updates": snapshot.position_updates,
        "skipped_corrections": snapshot.skipped_corrections,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
