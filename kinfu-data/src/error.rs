//! Error types for point cloud parsing and buffer decoding.

use thiserror::Error;

/// Errors produced while reading point cloud text or decoding flat buffers.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("point cloud payload has no `end_header` marker")]
    MissingHeader,

    #[error("line {line}: expected at least 3 fields, found {tokens}")]
    MalformedRow { line: usize, tokens: usize },

    #[error("line {line}: `{token}` is not a number")]
    InvalidNumber { line: usize, token: String },

    #[error("buffer holds {actual} elements, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("triangle index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: i64, vertex_count: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
