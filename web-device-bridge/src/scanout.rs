// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use log::{debug, warn};

use crate::gpu_types::{DirtyRegion, Error, ObjectKind, Rect, Result, ScanoutMask};

/// Snapshot of a scanout slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanoutInfo {
    pub resource_id: u32,
    /// Position and size of the scanout inside the resource.
    pub rect: Rect,
    pub enabled: bool,
    /// Bounding box of the damage not yet acknowledged by the presenter.
    pub damage: Option<Rect>,
    /// Number of damage reports since the scanout was created.
    pub frame_count: u64,
}

#[derive(Debug, Default)]
struct Scanout {
    resource_id: u32,
    rect: Rect,
    enabled: bool,
    dirty: DirtyRegion,
    frame_count: u64,
}

impl Scanout {
    const fn info(&self) -> ScanoutInfo {
        ScanoutInfo {
            resource_id: self.resource_id,
            rect: self.rect,
            enabled: self.enabled,
            damage: self.dirty.bounds(),
            frame_count: self.frame_count,
        }
    }
}

#[derive(Debug)]
pub struct ScanoutManager {
    scanouts: Vec<Scanout>,
}

impl ScanoutManager {
    /// `max_scanouts` must not exceed [`ScanoutMask::MAX_SCANOUTS`], which the
    /// configuration builder guarantees.
    pub fn new(max_scanouts: u32) -> Self {
        let count = max_scanouts.min(ScanoutMask::MAX_SCANOUTS);
        Self {
            scanouts: (0..count).map(|_| Scanout::default()).collect(),
        }
    }

    fn slot_mut(&mut self, scanout_id: u32) -> Result<&mut Scanout> {
        let limit = self.scanouts.len() as u64;
        usize::try_from(scanout_id)
            .ok()
            .and_then(|index| self.scanouts.get_mut(index))
            .ok_or_else(|| {
                warn!("Invalid scanout id {scanout_id}");
                Error::IdOutOfRange {
                    kind: ObjectKind::Scanout,
                    id: scanout_id.into(),
                    limit,
                }
            })
    }

    /// Points `scanout_id` at `resource_id`. The resource does not have to
    /// exist yet, guests may set up geometry before creating it.
    pub fn set_scanout(
        &mut self,
        scanout_id: u32,
        resource_id: u32,
        rect: Rect,
        enabled: bool,
    ) -> Result<()> {
        let scanout = self.slot_mut(scanout_id)?;
        scanout.resource_id = resource_id;
        scanout.rect = rect;
        scanout.enabled = enabled;
        if !enabled {
            scanout.dirty.clear();
        }
        debug!(
            "Scanout {scanout_id}: resource {resource_id} {rect:?} {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn get(&self, scanout_id: u32) -> Option<ScanoutInfo> {
        let index = usize::try_from(scanout_id).ok()?;
        self.scanouts.get(index).map(Scanout::info)
    }

    /// Grows the pending damage of `scanout_id` to include `rect`.
    pub fn add_damage(&mut self, scanout_id: u32, rect: Rect) -> Result<()> {
        let scanout = self.slot_mut(scanout_id)?;
        scanout.dirty.merge(rect);
        scanout.frame_count += 1;
        Ok(())
    }

    /// Called by the presenter once it has consumed the pending damage.
    /// Acknowledging a clean scanout does nothing.
    pub fn acknowledge(&mut self, scanout_id: u32) -> Result<()> {
        let scanout = self.slot_mut(scanout_id)?;
        scanout.dirty.clear();
        Ok(())
    }

    /// Enabled scanouts currently showing `resource_id`.
    pub fn enabled_for(&self, resource_id: u32) -> ScanoutMask {
        let mut mask = ScanoutMask::default();
        for (scanout_id, scanout) in (0u32..).zip(self.scanouts.iter()) {
            if scanout.enabled && scanout.resource_id == resource_id {
                mask.enable(scanout_id);
            }
        }
        mask
    }

    pub fn is_displayed(&self, resource_id: u32) -> bool {
        self.enabled_for(resource_id).has_any_enabled()
    }

    /// Disables every scanout and drops all pending damage.
    pub fn disable_all(&mut self) {
        for scanout in &mut self.scanouts {
            scanout.enabled = false;
            scanout.dirty.clear();
        }
    }

    pub fn max_scanouts(&self) -> u32 {
        self.scanouts.len() as u32
    }
}
