use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tracking-method priority class of a keypoint. Role governs which
/// re-location methods are preferred, never which component owns the point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Corner,
    #[serde(rename = "perp")]
    Perpendicular,
    Normal,
}

/// Number of leading keypoints assumed to be corners by the legacy untyped
/// annotation format, followed by this many perpendicular points.
const LEGACY_CORNER_COUNT: usize = 12;
const LEGACY_PERP_COUNT: usize = 6;

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("annotation file not found: {0}")]
    Missing(PathBuf),
    #[error("failed to read annotation file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed annotation JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("annotation has no keypoints")]
    Empty,
    #[error("unpaired trailing keypoint: {0} keypoints cannot form measurement pairs")]
    UnpairedKeypoint(usize),
    #[error("invalid target distance key {0:?} (expected a pair index)")]
    BadTargetKey(String),
}

/// One garment side's annotation: the ordered keypoint sequence with roles,
/// target distances per measurement pair (1-based, sparse), and an optional
/// placement-guide rectangle. Immutable during a live session.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationSet {
    pub keypoints: Vec<Point2<f32>>,
    pub roles: Vec<Role>,
    pub target_distances: BTreeMap<u32, f64>,
    pub placement_box: Option<[f32; 4]>,
}

/// On-disk keypoint entry: `[x, y, role]`, or legacy `[x, y]`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KeypointEntry {
    Typed(f32, f32, Role),
    Bare(f32, f32),
}

#[derive(Serialize, Deserialize)]
struct AnnotationFile {
    keypoints: Vec<KeypointEntry>,
    #[serde(default)]
    target_distances: BTreeMap<String, f64>,
    #[serde(default)]
    placement_box: Vec<f32>,
}

impl AnnotationSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Number of measurement pairs; keypoints `(2i, 2i+1)` form pair `i+1`.
    pub fn pair_count(&self) -> usize {
        self.keypoints.len() / 2
    }

    pub fn indices_with_role(&self, role: Role) -> Vec<usize> {
        self.roles
            .iter()
            .enumerate()
            .filter_map(|(i, &r)| (r == role).then_some(i))
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self, AnnotationError> {
        if !path.exists() {
            return Err(AnnotationError::Missing(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        let file: AnnotationFile = serde_json::from_str(&raw)?;
        let set = Self::from_file(file)?;
        info!(
            "loaded annotation {:?}: {} keypoints ({} corner, {} perp, {} normal), {} targets",
            path,
            set.len(),
            set.indices_with_role(Role::Corner).len(),
            set.indices_with_role(Role::Perpendicular).len(),
            set.indices_with_role(Role::Normal).len(),
            set.target_distances.len()
        );
        Ok(set)
    }

    pub fn save(&self, path: &Path) -> Result<(), AnnotationError> {
        let file = AnnotationFile {
            keypoints: self
                .keypoints
                .iter()
                .zip(&self.roles)
                .map(|(p, &r)| KeypointEntry::Typed(p.x, p.y, r))
                .collect(),
            target_distances: self
                .target_distances
                .iter()
                .map(|(k, &v)| (k.to_string(), v))
                .collect(),
            placement_box: self
                .placement_box
                .map(|b| b.to_vec())
                .unwrap_or_default(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json)?;
        Ok(())
    }

    fn from_file(file: AnnotationFile) -> Result<Self, AnnotationError> {
        if file.keypoints.is_empty() {
            return Err(AnnotationError::Empty);
        }
        if file.keypoints.len() % 2 != 0 {
            return Err(AnnotationError::UnpairedKeypoint(file.keypoints.len()));
        }

        let mut keypoints = Vec::with_capacity(file.keypoints.len());
        let mut roles = Vec::with_capacity(file.keypoints.len());
        let mut any_typed = false;
        for entry in &file.keypoints {
            match *entry {
                KeypointEntry::Typed(x, y, role) => {
                    keypoints.push(Point2::new(x, y));
                    roles.push(role);
                    any_typed = true;
                }
                KeypointEntry::Bare(x, y) => {
                    keypoints.push(Point2::new(x, y));
                    roles.push(Role::Normal);
                }
            }
        }

        // Legacy compatibility: only a fully untyped annotation gets the
        // positional inference. A single explicit role anywhere disables it.
        if !any_typed {
            for (i, role) in roles.iter_mut().enumerate() {
                if i < LEGACY_CORNER_COUNT {
                    *role = Role::Corner;
                } else if i < LEGACY_CORNER_COUNT + LEGACY_PERP_COUNT {
                    *role = Role::Perpendicular;
                }
            }
            info!("untyped annotation: applied legacy positional role inference");
        }

        let mut target_distances = BTreeMap::new();
        for (key, value) in &file.target_distances {
            let pair: u32 = key
                .parse()
                .map_err(|_| AnnotationError::BadTargetKey(key.clone()))?;
            target_distances.insert(pair, *value);
        }

        let placement_box = match file.placement_box.len() {
            4 => Some([
                file.placement_box[0],
                file.placement_box[1],
                file.placement_box[2],
                file.placement_box[3],
            ]),
            _ => None,
        };

        Ok(Self {
            keypoints,
            roles,
            target_distances,
            placement_box,
        })
    }
}
