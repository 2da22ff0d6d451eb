pub mod measurement;
pub mod pose_ekf;
pub mod process;
pub mod variant;
