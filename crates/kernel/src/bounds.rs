use std::collections::BTreeMap;

use strata_common::{Aabb, GlobalPosition, StrataId};

/// Containment and ownership queries over the loaded strata.
///
/// Holds one global AABB per loaded stratum. Entries are registered once when a
/// stratum finishes loading and removed on eviction; an existing entry is never
/// replaced. Queries are linear in the number of loaded strata, which the eviction
/// budget keeps small.
#[derive(Debug, Clone, Default)]
pub struct BoundsIndex {
    entries: BTreeMap<StrataId, Aabb>,
}

impl BoundsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the global bounds of a freshly loaded stratum.
    /// Returns false (and keeps the existing entry) if the stratum is already registered.
    pub fn register(&mut self, id: StrataId, bounds: Aabb) -> bool {
        if self.entries.contains_key(&id) {
            tracing::warn!(%id, "bounds already registered, keeping existing entry");
            return false;
        }
        debug_assert!(
            self.entries.values().all(|b| !b.overlaps(&bounds)),
            "stratum bounds overlap a loaded stratum"
        );
        tracing::debug!(%id, min = %bounds.min, max = %bounds.max, "registered stratum bounds");
        self.entries.insert(id, bounds);
        true
    }

    pub fn remove(&mut self, id: StrataId) -> Option<Aabb> {
        let removed = self.entries.remove(&id);
        if removed.is_some() {
            tracing::debug!(%id, "removed stratum bounds");
        }
        removed
    }

    pub fn get(&self, id: StrataId) -> Option<&Aabb> {
        self.entries.get(&id)
    }

    pub fn is_registered(&self, id: StrataId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Whether any loaded stratum contains the position.
    pub fn contains(&self, pos: GlobalPosition) -> bool {
        self.owner_of(pos).is_some()
    }

    /// The loaded stratum whose bounds contain the position.
    pub fn owner_of(&self, pos: GlobalPosition) -> Option<StrataId> {
        self.entries
            .iter()
            .find(|(_, b)| b.contains(pos.0))
            .map(|(id, _)| *id)
    }

    /// The loaded stratum whose vertical range contains `y`, ignoring the horizontal axes.
    pub fn owner_of_vertical(&self, y: f32) -> Option<StrataId> {
        self.entries
            .iter()
            .find(|(_, b)| b.contains_vertical(y))
            .map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StrataId, &Aabb)> {
        self.entries.iter().map(|(id, b)| (*id, b))
    }

    /// Copy of every registered entry, in id order. Intended for debug displays.
    pub fn snapshot(&self) -> Vec<(StrataId, Aabb)> {
        self.entries.iter().map(|(id, b)| (*id, *b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn floor(y: f32) -> Aabb {
        Aabb::new(Vec3::new(0.0, y, 0.0), Vec3::new(64.0, y + 100.0, 64.0))
    }

    fn index_with_two_floors() -> BoundsIndex {
        let mut index = BoundsIndex::new();
        index.register(StrataId(0), floor(0.0));
        index.register(StrataId(1), floor(150.0));
        index
    }

    #[test]
    fn owner_of_finds_containing_stratum() {
        let index = index_with_two_floors();
        assert_eq!(index.owner_of(GlobalPosition::new(10.0, 50.0, 10.0)), Some(StrataId(0)));
        assert_eq!(index.owner_of(GlobalPosition::new(10.0, 200.0, 10.0)), Some(StrataId(1)));
        // in the gap
        assert_eq!(index.owner_of(GlobalPosition::new(10.0, 120.0, 10.0)), None);
        // outside horizontally
        assert!(!index.contains(GlobalPosition::new(-1.0, 50.0, 10.0)));
    }

    #[test]
    fn vertical_ownership_ignores_horizontal_axes() {
        let index = index_with_two_floors();
        assert_eq!(index.owner_of_vertical(175.0), Some(StrataId(1)));
        assert_eq!(index.owner_of_vertical(100.0), None);
    }

    #[test]
    fn register_never_replaces() {
        let mut index = index_with_two_floors();
        assert!(!index.register(StrataId(0), floor(1000.0)));
        assert_eq!(index.get(StrataId(0)).unwrap().min.y, 0.0);
    }

    #[test]
    fn remove_then_query() {
        let mut index = index_with_two_floors();
        assert!(index.remove(StrataId(1)).is_some());
        assert!(index.remove(StrataId(1)).is_none());
        assert_eq!(index.owner_of_vertical(175.0), None);
        assert_eq!(index.len(), 1);
        assert_eq!(index.snapshot(), vec![(StrataId(0), floor(0.0))]);
    }
}
