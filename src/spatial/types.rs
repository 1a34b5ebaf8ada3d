use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Symbol;

/// 4x4 transform, row-major.
pub type Matrix4 = [f32; 16];

pub type Vector3 = [f32; 3];

pub const IDENTITY: Matrix4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackingState {
    #[default]
    NotAvailable,
    Initializing,
    ExcessiveMotion,
    InsufficientFeatures,
    Relocalizing,
    Normal,
}

impl TrackingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::NotAvailable => "notAvailable",
            TrackingState::Initializing => "initializing",
            TrackingState::ExcessiveMotion => "excessiveMotion",
            TrackingState::InsufficientFeatures => "insufficientFeatures",
            TrackingState::Relocalizing => "relocalizing",
            TrackingState::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CameraPose {
    pub transform: Matrix4,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            transform: IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PlaneClassification {
    #[default]
    Unknown,
    Floor,
    Wall,
    Ceiling,
    Table,
    Seat,
    Window,
    Door,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PlaneAlignment {
    #[default]
    Unknown,
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpaceAnchor {
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    pub transform: Matrix4,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectedPlane {
    pub identifier: String,
    pub transform: Matrix4,
    pub center: Vector3,
    pub extent: Vector3,
    pub alignment: PlaneAlignment,
    pub classification: PlaneClassification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFace {
    pub identifier: String,
    pub transform: Matrix4,
    pub left_eye_transform: Matrix4,
    pub right_eye_transform: Matrix4,
    pub look_at_point: Vector3,
    #[serde(default)]
    pub blend_shapes: BTreeMap<String, f32>,
}

/// A world map: its anchors plus the raw point cloud as flat x,y,z triples.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpaceMap {
    pub center: Vector3,
    pub extent: Vector3,
    pub anchors: Vec<SpaceAnchor>,
    pub points: Vec<f32>,
}

impl SpaceMap {
    pub fn point_count(&self) -> usize {
        self.points.len() / 3
    }
}

/// Anchor delivered by the engine's add/update callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Anchor {
    Plane(DetectedPlane),
    Face(DetectedFace),
    Generic(SpaceAnchor),
}

impl Anchor {
    pub fn identifier(&self) -> &str {
        match self {
            Anchor::Plane(plane) => &plane.identifier,
            Anchor::Face(face) => &face.identifier,
            Anchor::Generic(anchor) => &anchor.identifier,
        }
    }

    pub fn added_symbol(&self) -> Symbol {
        match self {
            Anchor::Plane(_) => Symbol::Plane,
            Anchor::Face(_) => Symbol::Face,
            Anchor::Generic(_) => Symbol::Anchor,
        }
    }

    pub fn updated_symbol(&self) -> Symbol {
        match self {
            Anchor::Plane(_) => Symbol::PlaneUpdate,
            Anchor::Face(_) => Symbol::Face,
            Anchor::Generic(_) => Symbol::AnchorUpdate,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Anchor::Plane(_) => "Plane",
            Anchor::Face(_) => "Face",
            Anchor::Generic(_) => "Anchor",
        }
    }
}
