use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::Path};

use super::types::{Anchor, Matrix4, SpaceAnchor, SpaceMap, Vector3};

/// Converts an engine matrix given as four columns into row-major order.
pub fn row_major_from_columns(columns: [[f32; 4]; 4]) -> Matrix4 {
    let mut out = [0.0; 16];
    for (col, values) in columns.iter().enumerate() {
        for (row, value) in values.iter().enumerate() {
            out[row * 4 + col] = *value;
        }
    }
    out
}

/// Converts a row-major matrix given as four rows.
pub fn row_major_from_rows(rows: [[f32; 4]; 4]) -> Matrix4 {
    let mut out = [0.0; 16];
    for (row, values) in rows.iter().enumerate() {
        out[row * 4..row * 4 + 4].copy_from_slice(values);
    }
    out
}

/// Translation part of a row-major transform.
pub fn translation(transform: &Matrix4) -> Vector3 {
    [transform[3], transform[7], transform[11]]
}

/// Flattens a point cloud into sequential x,y,z triples.
pub fn flatten_points(points: &[Vector3]) -> Vec<f32> {
    points.iter().flat_map(|point| point.iter().copied()).collect()
}

impl SpaceMap {
    pub fn from_points(
        center: Vector3,
        extent: Vector3,
        anchors: Vec<SpaceAnchor>,
        points: &[Vector3],
    ) -> Self {
        Self {
            center,
            extent,
            anchors,
            points: flatten_points(points),
        }
    }
}

/// Compact JSON used as the `data` payload of anchor items.
pub fn encode_anchor(anchor: &Anchor) -> Result<String> {
    let encoded = match anchor {
        Anchor::Plane(plane) => serde_json::to_string(plane),
        Anchor::Face(face) => serde_json::to_string(face),
        Anchor::Generic(generic) => serde_json::to_string(generic),
    };
    encoded.with_context(|| format!("failed to encode anchor {}", anchor.identifier()))
}

pub fn write_json<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let serialized = serde_json::to_vec_pretty(record)
        .with_context(|| format!("failed to encode {}", path.display()))?;
    fs::write(path, serialized).with_context(|| format!("failed to write {}", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_map(path: &Path, map: &SpaceMap) -> Result<()> {
    write_json(path, map)
}

pub fn read_map(path: &Path) -> Result<SpaceMap> {
    read_json(path)
}

/// File name for a snapshot taken `elapsed` seconds into the session.
/// Zero-padded milliseconds keep directory listings in capture order.
pub fn snapshot_file_name(elapsed: f64, extension: &str) -> String {
    let millis = (elapsed.max(0.0) * 1000.0).round() as u64;
    format!("{millis:08}.{extension}")
}
