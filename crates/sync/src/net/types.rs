use std::fmt;

use glam::Vec3;
use rkyv::Archive;

use super::protocol::{CompoundType, CompoundValue};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Archive, rkyv::Serialize, rkyv::Deserialize,
)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<Vec3> for Vector3 {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Vector3> for Vec3 {
    fn from(v: Vector3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

impl CompoundValue for Vector3 {
    const TYPE: CompoundType = CompoundType::Vector3;
}

/// Installed mod identity. Two descriptors are the same mod only when both
/// name and version match.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ModInfo {
    pub name: String,
    pub version: String,
}

impl ModInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

impl CompoundValue for ModInfo {
    const TYPE: CompoundType = CompoundType::ModInfo;
}

/// Where one bogie of a vehicle sits on the track network.
#[derive(Debug, Clone, Default, PartialEq, Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct BogieData {
    pub track: String,
    pub position_along_track: f64,
    pub is_derailed: bool,
}

impl CompoundValue for BogieData {
    const TYPE: CompoundType = CompoundType::BogieData;
}
