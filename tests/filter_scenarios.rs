//! End-to-end filter scenarios across the state-layout variants.

use approx::assert_relative_eq;
use nalgebra::DMatrix;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rover_pose_ekf::{
    EstimatorNode, FilterVariant, GpsData, ImuData, NodeConfig, OdomData, PoseEkf, ProcessNoiseSpec,
};

fn assert_symmetric_positive_definite(covariance: &Array2<f64>) {
    let (rows, _) = covariance.dim();
    for i in 0..rows {
        for j in 0..rows {
            let gap = (covariance[[i, j]] - covariance[[j, i]]).abs();
            assert!(gap < 1e-9, "asymmetry {gap} at ({i}, {j})");
        }
    }
    let dense = DMatrix::from_fn(rows, rows, |i, j| covariance[[i, j]]);
    assert!(
        dense.cholesky().is_some(),
        "covariance lost positive definiteness"
    );
}

#[test]
fn basic_variant_dead_reckons_straight_line() {
    let mut ekf = PoseEkf::new(FilterVariant::Basic, 0.1, ProcessNoiseSpec::default()).unwrap();
    assert!(ekf.enable_odometry(0.01, 1e-4));

    // Both wheels at 1 m/s for one second of 10 Hz cycles
    for _ in 0..10 {
        ekf.correct_odometry(1.0, 1.0);
        ekf.predict();
    }

    assert_relative_eq!(ekf.mean()[0], 1.0, epsilon = 1e-9);
    assert_relative_eq!(ekf.mean()[1], 0.0, epsilon = 1e-9);
    assert_relative_eq!(ekf.mean()[2], 0.0, epsilon = 1e-9);
    assert_symmetric_positive_definite(ekf.covariance());
}

#[test]
fn position_fix_pulls_drifted_estimate_without_snapping() {
    // Prior moving at 1 m/s along x; dead-reckon five seconds, then take
    // one fix that disagrees in y.
    let mut ekf = PoseEkf::with_prior(
        FilterVariant::Kinematic,
        0.1,
        ProcessNoiseSpec::default(),
        &[0.0, 0.0, 0.0, 1.0, 0.0],
        Array2::eye(5) * 0.1,
    )
    .unwrap();
    assert!(ekf.enable_absolute_position(0.25, 0.25));

    for _ in 0..50 {
        ekf.predict();
    }
    assert_relative_eq!(ekf.mean()[0], 5.0, epsilon = 1e-9);
    assert_relative_eq!(ekf.mean()[1], 0.0, epsilon = 1e-9);
    let y_before = ekf.mean()[1];

    ekf.correct_absolute_position(5.0, 2.0);

    // The posterior moves toward the fix in proportion to the gain, but a
    // finite measurement variance means it never lands exactly on it.
    let y_after = ekf.mean()[1];
    assert!(y_after > y_before);
    assert!(y_after < 2.0);
    assert!((ekf.mean()[0] - 5.0).abs() < 0.5);
    assert_symmetric_positive_definite(ekf.covariance());
}

#[test]
fn singular_innovation_leaves_filter_usable() {
    let mut ekf = PoseEkf::with_prior(
        FilterVariant::Kinematic,
        0.1,
        ProcessNoiseSpec::default(),
        &[1.0, 1.0, 0.0, 0.0, 0.0],
        Array2::zeros((5, 5)),
    )
    .unwrap();
    assert!(ekf.enable_absolute_position(0.0, 0.0));

    ekf.correct_absolute_position(3.0, 3.0);
    assert_eq!(ekf.skipped_corrections(), 1);
    assert_relative_eq!(ekf.mean()[0], 1.0);

    // Process noise restores an invertible covariance; the next valid
    // correction must go through.
    ekf.predict();
    assert!(ekf.enable_absolute_position(0.01, 0.01));
    ekf.correct_absolute_position(3.0, 3.0);

    let snap = ekf.snapshot();
    assert_eq!(snap.skipped_corrections, 1);
    assert_eq!(snap.position_updates, 1);
    assert!(ekf.mean()[0] > 1.0);
}

#[test]
fn covariance_stays_symmetric_positive_definite_under_random_input() {
    let variants = [
        FilterVariant::Basic,
        FilterVariant::Kinematic,
        FilterVariant::KinematicBias,
    ];
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for variant in variants {
        let mut ekf = PoseEkf::new(variant, 0.05, ProcessNoiseSpec::default()).unwrap();
        assert!(ekf.enable_odometry(0.01, 1e-4));
        assert!(ekf.enable_absolute_position(0.04, 0.04));
        if variant.has_velocity_states() {
            assert!(ekf.enable_inertial(0.01));
        }

        for step in 0..200 {
            let v: f64 = rng.gen_range(-1.5..1.5);
            let w: f64 = rng.gen_range(-1.0..1.0);
            ekf.correct_odometry(v - 0.25 * w, v + 0.25 * w);
            if variant.has_velocity_states() {
                ekf.correct_inertial(w + rng.gen_range(-0.05..0.05));
            }
            if step % 5 == 0 {
                let x = ekf.mean()[0] + rng.gen_range(-0.2..0.2);
                let y = ekf.mean()[1] + rng.gen_range(-0.2..0.2);
                ekf.correct_absolute_position(x, y);
            }
            ekf.set_timestep(rng.gen_range(0.01..0.2)).unwrap();
            ekf.predict();

            assert_symmetric_positive_definite(ekf.covariance());
        }
        assert_eq!(ekf.skipped_corrections(), 0);
    }
}

#[test]
fn node_converges_on_constant_velocity_trajectory() {
    let mut config = NodeConfig::default();
    config.variant = FilterVariant::Kinematic;
    config.gps_sigma_x = 0.02;
    config.gps_sigma_y = 0.02;
    let mut node = EstimatorNode::new(config).unwrap();

    // Ground truth: straight east at 1 m/s, sensors at 10 Hz.
    let mut last = None;
    for step in 0..100 {
        let t = step as f64 * 0.1;
        node.handle_odometry(&OdomData {
            timestamp: t,
            linear: 1.0,
            angular: 0.0,
        });
        node.handle_inertial(&ImuData {
            timestamp: t,
            angular: 0.0,
        });
        last = node.handle_position_fix(&GpsData {
            timestamp: t,
            x: t,
            y: 0.0,
        });
    }

    let pose = last.unwrap();
    assert!((pose.x - 9.9).abs() < 0.3, "x = {}", pose.x);
    assert!(pose.y.abs() < 0.2, "y = {}", pose.y);
    assert!(pose.heading.abs() < 0.2, "heading = {}", pose.heading);

    let snap = node.filter().snapshot();
    assert_eq!(snap.predicts, 100);
    assert_eq!(snap.position_updates, 100);
    assert_eq!(snap.skipped_corrections, 0);

    // Converged: pose uncertainty well below the prior
    assert!(pose.covariance[0][0] < 0.1);
    assert!(pose.covariance[1][1] < 0.1);
}

#[test]
fn bias_variant_accepts_every_channel() {
    let mut config = NodeConfig::default();
    config.variant = FilterVariant::KinematicBias;
    let mut node = EstimatorNode::new(config).unwrap();

    for step in 0..20 {
        let t = step as f64 * 0.1;
        node.handle_odometry(&OdomData {
            timestamp: t,
            linear: 0.5,
            angular: 0.1,
        });
        node.handle_inertial(&ImuData {
            timestamp: t,
            angular: 0.1,
        });
        node.handle_position_fix(&GpsData {
            timestamp: t,
            x: 0.5 * t,
            y: 0.0,
        });
    }

    let snap = node.filter().snapshot();
    assert_eq!(snap.odometry_updates, 20);
    assert_eq!(snap.inertial_updates, 20);
    assert_eq!(snap.position_updates, 20);
    assert!(snap.left_wheel_bias.is_some());
    assert_symmetric_positive_definite(node.filter().covariance());
}
