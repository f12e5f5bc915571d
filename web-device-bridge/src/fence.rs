// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Completion fences for submitted command buffers.
//!
//! Nothing here waits: the guest polls a fence until the presenter has
//! signaled it, and the first poll that sees it signaled reaps it. A fence
//! that is not in the table is reported as done, which covers both fences
//! that were already reaped and IDs that never existed.
//!
//! A fence either belongs to a 3D context or sits on the global timeline
//! (`ctx_id == None`). Destroying a context only reaps fences it owns.

use log::{debug, trace, warn};

use crate::gpu_types::{Error, ObjectKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Unsignaled,
    Signaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fence {
    pub fence_id: u64,
    /// Owning context, `None` for the global timeline.
    pub ctx_id: Option<u32>,
    pub state: FenceState,
}

#[derive(Debug)]
pub struct FenceTracker {
    slots: Vec<Option<Fence>>,
}

impl FenceTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    fn position(&self, fence_id: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_some_and(|fence| fence.fence_id == fence_id))
    }

    /// Stores a new unsignaled fence in the first free slot.
    pub fn create_fence(&mut self, ctx_id: Option<u32>, fence_id: u64) -> Result<()> {
        if self.position(fence_id).is_some() {
            warn!("Fence {fence_id} is already pending");
            return Err(Error::AlreadyExists(ObjectKind::Fence, fence_id));
        }
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
            warn!("No free fence slot for fence {fence_id} (ctx {ctx_id:?})");
            return Err(Error::OutOfCapacity(ObjectKind::Fence, self.slots.len()));
        };
        *slot = Some(Fence {
            fence_id,
            ctx_id,
            state: FenceState::Unsignaled,
        });
        trace!("Created fence {fence_id} on ctx {ctx_id:?}");
        Ok(())
    }

    /// Marks `fence_id` as signaled. Returns false if no such fence is
    /// pending, which is not an error.
    pub fn signal(&mut self, fence_id: u64) -> bool {
        match self.position(fence_id).and_then(|i| self.slots[i].as_mut()) {
            Some(fence) if fence.state == FenceState::Unsignaled => {
                fence.state = FenceState::Signaled;
                trace!("Signaled fence {fence_id}");
                true
            }
            _ => false,
        }
    }

    /// Signals every unsignaled fence of `ctx_id` whose ID is not above
    /// `fence_id`. Returns how many fences changed state.
    pub fn signal_up_to(&mut self, ctx_id: Option<u32>, fence_id: u64) -> usize {
        let mut signaled = 0;
        for fence in self.slots.iter_mut().flatten() {
            if fence.ctx_id == ctx_id
                && fence.fence_id <= fence_id
                && fence.state == FenceState::Unsignaled
            {
                fence.state = FenceState::Signaled;
                signaled += 1;
            }
        }
        trace!("Signaled {signaled} fences of ctx {ctx_id:?} up to {fence_id}");
        signaled
    }

    /// Returns true if `fence_id` is done, reaping it if it was signaled.
    /// Unknown fences count as done.
    pub fn poll(&mut self, fence_id: u64) -> bool {
        let Some(index) = self.position(fence_id) else {
            return true;
        };
        match self.slots[index] {
            Some(fence) if fence.state == FenceState::Signaled => {
                self.slots[index] = None;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, fence_id: u64) -> Option<Fence> {
        self.position(fence_id).and_then(|i| self.slots[i])
    }

    /// Drops every fence owned by `ctx_id`, signaled or not. Fences on the
    /// global timeline are left alone.
    pub fn destroy_context(&mut self, ctx_id: u32) -> usize {
        let mut reaped = 0;
        for slot in &mut self.slots {
            if slot.is_some_and(|fence| fence.ctx_id == Some(ctx_id)) {
                *slot = None;
                reaped += 1;
            }
        }
        if reaped > 0 {
            debug!("Reaped {reaped} fences of ctx {ctx_id}");
        }
        reaped
    }

    /// Drops every fence.
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.slots.iter_mut().for_each(|slot| *slot = None);
        count
    }

    /// Number of fences not yet signaled.
    pub fn unsignaled(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|fence| fence.state == FenceState::Unsignaled)
            .count()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
