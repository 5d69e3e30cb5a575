//! Static strata definitions and deterministic offset assignment.

use std::path::Path;

use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};
use strata_common::{Aabb, PartitionId, StrataId};

use crate::error::StrataError;

/// One stratum as supplied by the content pipeline. Its id is its position in
/// [`WorldDefinition::strata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumDef {
    pub name: String,
    #[serde(default)]
    pub partitions: Vec<PartitionId>,
    /// Terrain bound size in voxels.
    pub extents: IVec3,
    /// Local origin offset of the terrain bounds.
    #[serde(default)]
    pub origin: IVec3,
}

/// Ordered list of strata, lowest id first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldDefinition {
    pub strata: Vec<StratumDef>,
}

impl WorldDefinition {
    pub fn from_yaml_str(text: &str) -> Result<Self, StrataError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, StrataError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a `.json` file, or YAML for any other extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StrataError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    pub fn validate(&self) -> Result<(), StrataError> {
        if self.strata.is_empty() {
            return Err(StrataError::InvalidDefinition("no strata defined".into()));
        }
        if self.strata.len() > usize::from(u8::MAX) + 1 {
            return Err(StrataError::InvalidDefinition(format!(
                "{} strata defined, at most 256 are addressable",
                self.strata.len()
            )));
        }
        for (i, def) in self.strata.iter().enumerate() {
            if def.extents.cmple(IVec3::ZERO).any() {
                return Err(StrataError::InvalidDefinition(format!(
                    "stratum {i} ({}) has non-positive extents {}",
                    def.name, def.extents
                )));
            }
            let fits = [
                def.origin.x.checked_add(def.extents.x),
                def.origin.y.checked_add(def.extents.y),
                def.origin.z.checked_add(def.extents.z),
            ];
            if fits.iter().any(Option::is_none) {
                return Err(StrataError::InvalidDefinition(format!(
                    "stratum {i} ({}) bounds overflow: origin {} + extents {}",
                    def.name, def.origin, def.extents
                )));
            }
        }
        Ok(())
    }
}

/// Immutable runtime view of a stratum definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Stratum {
    pub id: StrataId,
    pub name: String,
    pub partitions: Vec<PartitionId>,
    pub extents: IVec3,
    pub origin: IVec3,
}

impl Stratum {
    /// Terrain bounds in the stratum's own coordinate space.
    pub fn local_bounds(&self) -> Aabb {
        Aabb::from_extents(self.origin, self.extents)
    }
}

/// Read-only lookup of strata definitions plus their cached global offsets.
///
/// Offsets stack strata upward by id: stratum `i` starts `vertical_spacing` above the
/// top of stratum `i - 1`. They are computed once here and never recomputed, so the
/// global/local mapping is fixed for the session.
#[derive(Debug, Clone)]
pub struct StrataRegistry {
    strata: Vec<Stratum>,
    offsets: Vec<Vec3>,
    vertical_spacing: f32,
}

impl StrataRegistry {
    pub fn new(definition: &WorldDefinition, vertical_spacing: f32) -> Result<Self, StrataError> {
        definition.validate()?;

        let mut strata = Vec::with_capacity(definition.strata.len());
        let mut offsets: Vec<Vec3> = Vec::with_capacity(definition.strata.len());
        let mut base = 0.0_f32;

        for (i, def) in definition.strata.iter().enumerate() {
            let origin_y = def.origin.y as f32;
            if let Some(prev) = offsets.last() {
                // A raised origin widens the gap below the stratum.
                if base - origin_y <= prev.y {
                    tracing::debug!(stratum = i, origin_y, "raising base above previous offset");
                    base = prev.y + 1.0 + origin_y;
                }
                if base - origin_y <= prev.y {
                    return Err(StrataError::InvalidDefinition(format!(
                        "stratum {i} ({}) offset is not above stratum {}",
                        def.name,
                        i - 1
                    )));
                }
            }
            let offset = Vec3::new(0.0, base - origin_y, 0.0);
            tracing::debug!(
                stratum = i,
                name = %def.name,
                offset_y = offset.y,
                "assigned stratum offset"
            );

            base += def.extents.y as f32 + vertical_spacing;
            offsets.push(offset);
            strata.push(Stratum {
                id: StrataId(i as u8),
                name: def.name.clone(),
                partitions: def.partitions.clone(),
                extents: def.extents,
                origin: def.origin,
            });
        }

        tracing::info!(count = strata.len(), vertical_spacing, "strata registry built");
        Ok(Self {
            strata,
            offsets,
            vertical_spacing,
        })
    }

    pub fn len(&self) -> usize {
        self.strata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strata.is_empty()
    }

    pub fn vertical_spacing(&self) -> f32 {
        self.vertical_spacing
    }

    pub fn ids(&self) -> impl Iterator<Item = StrataId> + '_ {
        self.strata.iter().map(|s| s.id)
    }

    pub fn get_definition(&self, id: StrataId) -> Result<&Stratum, StrataError> {
        self.strata
            .get(id.index())
            .ok_or(StrataError::DefinitionNotFound(id))
    }

    /// Global offset of a stratum's local space.
    pub fn get_offset(&self, id: StrataId) -> Result<Vec3, StrataError> {
        self.offsets
            .get(id.index())
            .copied()
            .ok_or(StrataError::DefinitionNotFound(id))
    }

    /// Terrain bounds of a stratum in global space: local bounds shifted by the offset.
    pub fn global_bounds(&self, id: StrataId) -> Result<Aabb, StrataError> {
        let stratum = self.get_definition(id)?;
        let offset = self.get_offset(id)?;
        Ok(stratum.local_bounds().translated(offset))
    }

    /// The defined stratum whose vertical range is closest to `y`, loaded or not.
    /// Positions in the gap between two strata resolve to the nearer one; ties go to the lower.
    pub fn nearest_stratum(&self, y: f32) -> Option<StrataId> {
        let mut best: Option<(StrataId, f32)> = None;
        for id in self.ids() {
            let Ok(bounds) = self.global_bounds(id) else {
                continue;
            };
            let d = bounds.vertical_distance(y);
            if best.is_none_or(|(_, best_d)| d < best_d) {
                best = Some((id, d));
            }
        }
        best.map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn def(name: &str, height: i32) -> StratumDef {
        StratumDef {
            name: name.into(),
            partitions: vec![PartitionId::new(format!("{name}_terrain"))],
            extents: IVec3::new(64, height, 64),
            origin: IVec3::ZERO,
        }
    }

    fn five_floors() -> WorldDefinition {
        WorldDefinition {
            strata: (0..5).map(|i| def(&format!("floor{i}"), 100)).collect(),
        }
    }

    #[test]
    fn offsets_stack_by_height_and_spacing() {
        let reg = StrataRegistry::new(&five_floors(), 50.0).unwrap();
        assert_eq!(reg.get_offset(StrataId(0)).unwrap(), Vec3::ZERO);
        assert_eq!(reg.get_offset(StrataId(1)).unwrap().y, 150.0);
        assert_eq!(reg.get_offset(StrataId(4)).unwrap().y, 600.0);
    }

    #[test]
    fn origin_is_absorbed_into_offset() {
        let mut world = five_floors();
        world.strata[1].origin = IVec3::new(-32, -20, -32);
        let reg = StrataRegistry::new(&world, 50.0).unwrap();
        let bounds = reg.global_bounds(StrataId(1)).unwrap();
        assert_eq!(bounds.min.y, 150.0);
        assert_eq!(bounds.max.y, 250.0);
        assert_eq!(bounds.min.x, -32.0);
    }

    #[test]
    fn raised_origin_widens_gap_instead_of_failing() {
        let mut world = WorldDefinition {
            strata: vec![def("a", 100), def("b", 100)],
        };
        world.strata[1].origin = IVec3::new(0, 1000, 0);
        let reg = StrataRegistry::new(&world, 350.0).unwrap();

        let lower = reg.get_offset(StrataId(0)).unwrap().y;
        let upper = reg.get_offset(StrataId(1)).unwrap().y;
        assert!(upper > lower);
        let a = reg.global_bounds(StrataId(0)).unwrap();
        let b = reg.global_bounds(StrataId(1)).unwrap();
        assert!(!a.overlaps(&b));
        assert!(b.min.y >= a.max.y + 350.0);
    }

    #[test]
    fn overflowing_bounds_are_rejected() {
        let mut world = WorldDefinition {
            strata: vec![def("deep", 2_000_000_000)],
        };
        world.strata[0].origin = IVec3::new(0, 500_000_000, 0);
        assert!(matches!(
            StrataRegistry::new(&world, 0.0),
            Err(StrataError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn unknown_id_is_definition_not_found() {
        let reg = StrataRegistry::new(&five_floors(), 50.0).unwrap();
        assert!(matches!(
            reg.get_definition(StrataId(5)),
            Err(StrataError::DefinitionNotFound(StrataId(5)))
        ));
        assert!(reg.get_offset(StrataId(200)).is_err());
    }

    #[test]
    fn empty_world_is_rejected() {
        let err = StrataRegistry::new(&WorldDefinition::default(), 10.0).unwrap_err();
        assert!(matches!(err, StrataError::InvalidDefinition(_)));
    }

    #[test]
    fn flat_stratum_is_rejected() {
        let world = WorldDefinition {
            strata: vec![def("flat", 0)],
        };
        assert!(StrataRegistry::new(&world, 10.0).is_err());
    }

    #[test]
    fn nearest_stratum_resolves_gaps() {
        let reg = StrataRegistry::new(&five_floors(), 50.0).unwrap();
        assert_eq!(reg.nearest_stratum(10.0), Some(StrataId(0)));
        // gap between floor0 (top 100) and floor1 (bottom 150)
        assert_eq!(reg.nearest_stratum(110.0), Some(StrataId(0)));
        assert_eq!(reg.nearest_stratum(140.0), Some(StrataId(1)));
        assert_eq!(reg.nearest_stratum(-500.0), Some(StrataId(0)));
        assert_eq!(reg.nearest_stratum(10_000.0), Some(StrataId(4)));
    }

    #[test]
    fn world_definition_from_yaml() {
        let yaml = r#"
strata:
  - name: surface
    partitions: [surface_terrain, surface_props]
    extents: [128, 80, 128]
  - name: caves
    partitions: [caves_terrain, surface_props]
    extents: [128, 120, 128]
    origin: [0, -10, 0]
"#;
        let world = WorldDefinition::from_yaml_str(yaml).unwrap();
        assert_eq!(world.strata.len(), 2);
        assert_eq!(world.strata[1].origin, IVec3::new(0, -10, 0));
        assert_eq!(world.strata[0].partitions[1], PartitionId::from("surface_props"));
    }

    proptest! {
        #[test]
        fn offsets_are_monotonic(
            heights in proptest::collection::vec(1i32..500, 1..12),
            spacing in 0u32..1000,
        ) {
            let world = WorldDefinition {
                strata: heights
                    .iter()
                    .enumerate()
                    .map(|(i, h)| def(&format!("s{i}"), *h))
                    .collect(),
            };
            let reg = StrataRegistry::new(&world, spacing as f32).unwrap();
            let ids: Vec<StrataId> = reg.ids().collect();
            for pair in ids.windows(2) {
                let lower = reg.get_offset(pair[0]).unwrap().y;
                let upper = reg.get_offset(pair[1]).unwrap().y;
                prop_assert!(lower < upper);
                let a = reg.global_bounds(pair[0]).unwrap();
                let b = reg.global_bounds(pair[1]).unwrap();
                prop_assert!(!a.overlaps(&b));
            }
        }
    }
}
