//! Point cloud text reading
//!
//! The payload format is a PLY-style ASCII file: a header terminated by the
//! `end_header` marker, then one point per line as space separated floats.
//! Rows carry either a position (`x y z`) or a position and a normal
//! (`x y z nx ny nz`).

mod reader;

pub use reader::{
    HEADER_MARKER, ReaderOptions, RowPolicy, parse_point_cloud, read_point_cloud_file,
};
