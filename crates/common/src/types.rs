use std::fmt;

use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Identifier of a stratum. Doubles as its ordering key: lower ids sit lower in global space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrataId(pub u8);

impl StrataId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Number of strata between `self` and `other` in id order.
    pub fn distance(self, other: StrataId) -> u8 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for StrataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strata#{}", self.0)
    }
}

/// Identifier of a content partition (a streamable scene chunk). Partitions may be
/// shared by several strata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub String);

impl PartitionId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A position in the unified coordinate space spanning every loaded stratum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GlobalPosition(pub Vec3);

impl GlobalPosition {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self(Vec3::new(x, y, z))
    }

    /// Vertical component, the axis strata are stacked along.
    pub fn vertical(self) -> f32 {
        self.0.y
    }
}

impl fmt::Display for GlobalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.0.x, self.0.y, self.0.z)
    }
}

/// A position inside one stratum's own coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalPosition(pub Vec3);

impl LocalPosition {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self(Vec3::new(x, y, z))
    }
}

impl fmt::Display for LocalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.0.x, self.0.y, self.0.z)
    }
}

/// Axis-aligned bounding box. Containment is half-open: `min <= p < max` on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box covering the voxel range `origin .. origin + extents`.
    pub fn from_extents(origin: IVec3, extents: IVec3) -> Self {
        Self {
            min: origin.as_vec3(),
            max: origin.as_vec3() + extents.as_vec3(),
        }
    }

    pub fn translated(self, offset: Vec3) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max).all()
    }

    pub fn contains_vertical(&self, y: f32) -> bool {
        y >= self.min.y && y < self.max.y
    }

    /// Vertical distance from `y` to this box's vertical range (zero when inside).
    pub fn vertical_distance(&self, y: f32) -> f32 {
        if y < self.min.y {
            self.min.y - y
        } else if y >= self.max.y {
            y - self.max.y
        } else {
            0.0
        }
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmplt(other.max).all() && other.min.cmplt(self.max).all()
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}
