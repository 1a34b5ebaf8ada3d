//! Spatial snapshot codec: engine-neutral records for anchors, planes, faces,
//! world maps and scene graphs, plus their on-disk form.
//!
//! Transforms are always row-major 16-float arrays and point clouds are flat
//! x,y,z sequences so the files stay trivially streamable.

pub mod codec;
pub mod scene;
pub mod types;

pub use codec::{
    encode_anchor, flatten_points, read_map, row_major_from_columns, row_major_from_rows,
    snapshot_file_name, translation, write_map,
};
pub use scene::{export_scene, SceneExport, SceneGraph, SceneNode};
pub use types::{
    Anchor, CameraPose, DetectedFace, DetectedPlane, Matrix4, PlaneAlignment,
    PlaneClassification, SpaceAnchor, SpaceMap, TrackingState, Vector3, IDENTITY,
};
