//! Device-independent scene graphs and their export to the bundle.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use super::codec::write_json;
use super::types::{Matrix4, IDENTITY};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SceneNode {
    #[serde(default)]
    pub name: String,
    pub transform: Matrix4,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    /// Image files referenced by this node's materials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub textures: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: IDENTITY,
            geometry: None,
            textures: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }

    fn collect_textures<'a>(&'a self, out: &mut Vec<&'a Path>) {
        out.extend(self.textures.iter().map(PathBuf::as_path));
        for child in &self.children {
            child.collect_textures(out);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SceneGraph {
    pub root: SceneNode,
}

impl SceneGraph {
    pub fn new(root: SceneNode) -> Self {
        Self { root }
    }

    /// Node count used for change detection; the root itself is not counted.
    pub fn node_count(&self) -> usize {
        self.root.descendant_count()
    }

    pub fn textures(&self) -> Vec<&Path> {
        let mut out = Vec::new();
        self.root.collect_textures(&mut out);
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneExport {
    pub textures_copied: usize,
    pub textures_skipped: usize,
    pub textures_failed: usize,
}

/// Writes `graph` to `scene_path` and copies its bundled textures next to it.
///
/// Only textures under `asset_root` are copied; anything else (runtime
/// generated images, system resources) is skipped. A failed copy is logged and
/// counted but does not fail the export.
pub fn export_scene(
    graph: &SceneGraph,
    scene_path: &Path,
    asset_root: Option<&Path>,
) -> Result<SceneExport> {
    write_json(scene_path, graph)?;

    let mut report = SceneExport::default();
    let Some(target_dir) = scene_path.parent() else {
        return Ok(report);
    };

    for texture in graph.textures() {
        let bundled = asset_root.is_some_and(|root| texture.starts_with(root));
        let Some(file_name) = texture.file_name().filter(|_| bundled) else {
            log_debug!("skipping non-bundled texture {}", texture.display());
            report.textures_skipped += 1;
            continue;
        };

        let target = target_dir.join(file_name);
        if target.exists() {
            continue;
        }

        match fs::copy(texture, &target) {
            Ok(_) => report.textures_copied += 1,
            Err(err) => {
                log_warn!(
                    "failed to copy texture {} into {}: {err}",
                    texture.display(),
                    target_dir.display()
                );
                report.textures_failed += 1;
            }
        }
    }

    Ok(report)
}
