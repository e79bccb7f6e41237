//! KinFu Data Crate
//!
//! Device-agnostic data handling for depth camera point clouds: reading the
//! ASCII point cloud format, packing points into particle textures, and
//! decoding camera pose matrices.

pub mod error;
pub mod mesh;
pub mod packing;
pub mod ply;
pub mod pose;
pub mod types;

pub use error::ParseError;
pub use mesh::ReconstructedMesh;
pub use packing::{
    DepthNormalization, FillPolicy, PackedGrid, PackingConfig, PointCloudPacker, RESOLUTION, Texel,
};
pub use ply::{ReaderOptions, RowPolicy, parse_point_cloud, read_point_cloud_file};
pub use pose::{CorrectedPose, POSE_LEN, PoseCorrection, PoseCorrector, PoseMatrix};
pub use types::{Bounds, PointCloud};
