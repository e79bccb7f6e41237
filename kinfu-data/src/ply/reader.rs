//! Point cloud text parsing

use crate::error::ParseError;
use crate::types::PointCloud;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Token that terminates the header section.
pub const HEADER_MARKER: &str = "end_header";

/// Normal component written by the capture library for points without a normal.
const NAN_TOKEN: &str = "nan";

/// What to do with a non-blank row that has fewer than three fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowPolicy {
    /// Abort the whole load with [`ParseError::MalformedRow`].
    #[default]
    Strict,
    /// Skip the row and keep going.
    SkipMalformed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderOptions {
    #[serde(default)]
    pub row_policy: RowPolicy,
}

impl ReaderOptions {
    pub fn lenient() -> Self {
        Self {
            row_policy: RowPolicy::SkipMalformed,
        }
    }
}

/// Load a point cloud from a file on disk.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_point_cloud_file(
    path: impl AsRef<Path>,
    options: ReaderOptions,
) -> Result<PointCloud, ParseError> {
    let text = fs::read_to_string(path.as_ref())?;
    let cloud = parse_point_cloud(&text, options)?;
    info!(
        points = cloud.len(),
        normals = cloud.normals().len(),
        "Point cloud loaded"
    );
    Ok(cloud)
}

/// Parse a point cloud payload.
///
/// Everything up to and including [`HEADER_MARKER`] is ignored. The remainder
/// is split into lines and the first and last of those are skipped (the
/// newline ending the marker line and the empty string after the final
/// newline). Blank lines in between carry no data and are skipped.
///
/// Normals are all-or-nothing: unless every point row also carried a normal,
/// the returned cloud has none.
pub fn parse_point_cloud(text: &str, options: ReaderOptions) -> Result<PointCloud, ParseError> {
    let marker = text.find(HEADER_MARKER).ok_or(ParseError::MissingHeader)?;
    let header_lines = text[..marker].matches('\n').count();
    let body = &text[marker + HEADER_MARKER.len()..];

    let lines: Vec<&str> = body.split('\n').collect();
    let rows = match lines.len() {
        0..=2 => &[][..],
        n => &lines[1..n - 1],
    };

    let mut points = Vec::with_capacity(rows.len());
    let mut normals = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;

    for (offset, raw) in rows.iter().enumerate() {
        // +1 for the marker line itself, +1 for one-based numbering
        let line = header_lines + offset + 2;
        let row = raw.strip_suffix('\r').unwrap_or(raw);

        let tokens: Vec<&str> = row.split(' ').filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens.len() < 3 {
            match options.row_policy {
                RowPolicy::Strict => {
                    return Err(ParseError::MalformedRow {
                        line,
                        tokens: tokens.len(),
                    });
                }
                RowPolicy::SkipMalformed => {
                    skipped += 1;
                    continue;
                }
            }
        }

        points.push(parse_vec3(&tokens[0..3], line)?);

        if tokens.len() >= 6 {
            normals.push(parse_normal(&tokens[3..6], line)?);
        }
    }

    if skipped > 0 {
        warn!(skipped, "Skipped malformed point rows");
    }
    if !normals.is_empty() && normals.len() != points.len() {
        debug!(
            points = points.len(),
            normals = normals.len(),
            "Not every row has a normal, dropping normals"
        );
    }

    Ok(PointCloud::with_normals(points, normals))
}

/// A finite float. `nan`, `inf` and friends are rejected like any other
/// non-numeric token.
fn parse_f32(token: &str, line: usize) -> Result<f32, ParseError> {
    token
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber {
            line,
            token: token.to_string(),
        })
}

fn parse_vec3(tokens: &[&str], line: usize) -> Result<Vec3, ParseError> {
    Ok(Vec3::new(
        parse_f32(tokens[0], line)?,
        parse_f32(tokens[1], line)?,
        parse_f32(tokens[2], line)?,
    ))
}

fn parse_normal(tokens: &[&str], line: usize) -> Result<Vec3, ParseError> {
    if tokens.contains(&NAN_TOKEN) {
        return Ok(Vec3::ZERO);
    }
    parse_vec3(tokens, line)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nend_header";

    #[test]
    fn test_positions_without_normals() {
        let cloud = parse_point_cloud("...end_header\n\n1 2 3\n4 5 6\n\n", ReaderOptions::default()).unwrap();
        assert_eq!(cloud.points(), &[Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]);
        assert!(cloud.normals().is_empty());
    }

    #[test]
    fn test_one_point_per_data_line() {
        let text = format!("{HEADER}\n0.5 1.5 2.5\n-1 -2 -3\n7 8 9\n");
        let cloud = parse_point_cloud(&text, ReaderOptions::default()).unwrap();
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud.points()[1], Vec3::new(-1.0, -2.0, -3.0));
    }

    #[test]
    fn test_first_and_last_lines_always_skipped() {
        // No trailing newline, so the final row is dropped.
        let cloud = parse_point_cloud("end_header\n1 1 1\n2 2 2", ReaderOptions::default()).unwrap();
        assert_eq!(cloud.points(), &[Vec3::ONE]);
    }

    #[test]
    fn test_normals_parsed() {
        let text = format!("{HEADER}\n1 2 3 0 0 1\n4 5 6 0 1 0\n");
        let cloud = parse_point_cloud(&text, ReaderOptions::default()).unwrap();
        assert_eq!(cloud.normals(), &[Vec3::Z, Vec3::Y]);
    }

    #[test]
    fn test_nan_normal_becomes_zero() {
        let text = format!("{HEADER}\n1 2 3 nan nan nan\n4 5 6 0 1 0\n");
        let cloud = parse_point_cloud(&text, ReaderOptions::default()).unwrap();
        assert_eq!(cloud.normals(), &[Vec3::ZERO, Vec3::Y]);
    }

    #[test]
    fn test_partial_normals_discarded() {
        let text = format!("{HEADER}\n1 2 3 0 0 1\n4 5 6\n");
        let cloud = parse_point_cloud(&text, ReaderOptions::default()).unwrap();
        assert_eq!(cloud.len(), 2);
        assert!(cloud.normals().is_empty());
    }

    #[test]
    fn test_missing_header() {
        let err = parse_point_cloud("1 2 3\n4 5 6\n", ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, ParseError::MissingHeader));
    }

    #[test]
    fn test_short_row_strict() {
        let text = format!("{HEADER}\n1 2 3\n4 5\n");
        let err = parse_point_cloud(&text, ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedRow { line: 9, tokens: 2 }));
    }

    #[test]
    fn test_short_row_lenient() {
        let text = format!("{HEADER}\n1 2 3\n4 5\n6 7 8\n");
        let cloud = parse_point_cloud(&text, ReaderOptions::lenient()).unwrap();
        assert_eq!(cloud.len(), 2);
    }

    #[test]
    fn test_invalid_number() {
        let text = format!("{HEADER}\n1 two 3\n");
        match parse_point_cloud(&text, ReaderOptions::default()).unwrap_err() {
            ParseError::InvalidNumber { line, token } => {
                assert_eq!(line, 8);
                assert_eq!(token, "two");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_finite_position_rejected() {
        for row in ["nan 1 2", "1 inf 2", "1 2 -infinity", "NaN 0 0"] {
            let text = format!("end_header\n{row}\n");
            let err = parse_point_cloud(&text, ReaderOptions::default()).unwrap_err();
            assert!(matches!(err, ParseError::InvalidNumber { line: 2, .. }), "{row}");
        }
    }

    #[test]
    fn test_nan_normal_is_case_sensitive() {
        let err = parse_point_cloud("end_header\n1 2 3 NaN NaN NaN\n", ReaderOptions::default())
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { token, .. } if token == "NaN"));

        let err = parse_point_cloud("end_header\n1 2 3 0 inf 0\n", ReaderOptions::default())
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { .. }));
    }

    #[test]
    fn test_read_file() {
        let path = std::env::temp_dir().join(format!("kinfu-reader-{}.ply", std::process::id()));
        fs::write(&path, format!("{HEADER}\n1 2 3 0 0 1\n4 5 6 0 1 0\n")).unwrap();
        let cloud = read_point_cloud_file(&path, ReaderOptions::default());
        fs::remove_file(&path).unwrap();

        let cloud = cloud.unwrap();
        assert_eq!(cloud.points(), &[Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]);
        assert_eq!(cloud.normals(), &[Vec3::Z, Vec3::Y]);
    }

    #[test]
    fn test_read_missing_file() {
        let path = std::env::temp_dir().join("kinfu-reader-does-not-exist.ply");
        let err = read_point_cloud_file(&path, ReaderOptions::default()).unwrap_err();
        assert!(matches!(err, ParseError::Io(_)));
    }

    #[test]
    fn test_crlf_rows() {
        let cloud = parse_point_cloud("end_header\r\n1 2 3\r\n4 5 6\r\n", ReaderOptions::default()).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points()[1], Vec3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_empty_body() {
        let cloud = parse_point_cloud("end_header", ReaderOptions::default()).unwrap();
        assert!(cloud.is_empty());
    }

    #[test]
    fn test_options_from_json() {
        let options: ReaderOptions = serde_json::from_str(r#"{"row_policy":"skip_malformed"}"#).unwrap();
        assert_eq!(options, ReaderOptions::lenient());
    }
}
