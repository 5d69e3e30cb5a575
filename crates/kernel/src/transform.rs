use strata_common::{GlobalPosition, LocalPosition, StrataId};

use crate::bounds::BoundsIndex;
use crate::error::StrataError;
use crate::registry::StrataRegistry;

/// Translates between the unified global space and per-stratum local spaces.
///
/// Borrowed view over the registry (offsets) and the bounds index (which strata are
/// loaded). Nothing else in the core assumes a fixed mapping between the two spaces.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateTransformer<'a> {
    registry: &'a StrataRegistry,
    bounds: &'a BoundsIndex,
}

impl<'a> CoordinateTransformer<'a> {
    pub fn new(registry: &'a StrataRegistry, bounds: &'a BoundsIndex) -> Self {
        Self { registry, bounds }
    }

    /// Resolve the loaded stratum owning a global position (by its vertical component)
    /// and the position in that stratum's local space.
    pub fn to_local(
        &self,
        global: GlobalPosition,
    ) -> Result<(LocalPosition, StrataId), StrataError> {
        let id = self
            .bounds
            .owner_of_vertical(global.vertical())
            .ok_or(StrataError::TransformOutOfBounds { position: global })?;
        let offset = self.registry.get_offset(id)?;
        Ok((LocalPosition(global.0 - offset), id))
    }

    /// Global position of a local position in the given stratum. The stratum does not
    /// need to be loaded; offsets are known for every defined stratum.
    pub fn to_global(
        &self,
        local: LocalPosition,
        id: StrataId,
    ) -> Result<GlobalPosition, StrataError> {
        let offset = self.registry.get_offset(id)?;
        Ok(GlobalPosition(local.0 + offset))
    }
}
