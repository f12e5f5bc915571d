// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::{
    gpu_types::{Error, ObjectKind, Result},
    id_table::IdTable,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context3D {
    pub ctx_id: u32,
    pub capset_id: u32,
    pub name: String,
    pub active: bool,
    resources: BTreeSet<u32>,
}

impl Context3D {
    /// Attached resource IDs in ascending order.
    pub fn resources(&self) -> impl Iterator<Item = u32> + '_ {
        self.resources.iter().copied()
    }

    pub fn has_resource(&self, resource_id: u32) -> bool {
        self.resources.contains(&resource_id)
    }
}

/// Lifecycle of 3D contexts. Commands are not interpreted here, only routed.
#[derive(Debug)]
pub struct Context3DManager {
    contexts: IdTable<Context3D>,
}

impl Context3DManager {
    /// Context IDs are in `0..max_contexts` and every ID can be live at once.
    pub fn new(max_contexts: u32) -> Self {
        Self {
            contexts: IdTable::new(max_contexts, max_contexts as usize),
        }
    }

    pub fn create(&mut self, ctx_id: u32, capset_id: u32, name: &str) -> Result<()> {
        let context = Context3D {
            ctx_id,
            capset_id,
            name: name.to_string(),
            active: true,
            resources: BTreeSet::new(),
        };
        self.contexts.insert(ctx_id, context).map_err(|e| {
            warn!("Failed to create context {ctx_id}: {e}");
            e.into_gpu_error(ObjectKind::Context)
        })?;
        debug!("Created context {ctx_id} '{name}' with capset {capset_id}");
        Ok(())
    }

    pub fn destroy(&mut self, ctx_id: u32) -> Result<Context3D> {
        let context = self
            .contexts
            .remove(ctx_id)
            .ok_or(Error::NotFound(ObjectKind::Context, ctx_id.into()))?;
        debug!("Destroyed context {ctx_id}");
        Ok(context)
    }

    fn get_mut(&mut self, ctx_id: u32) -> Result<&mut Context3D> {
        self.contexts
            .get_mut(ctx_id)
            .ok_or(Error::NotFound(ObjectKind::Context, ctx_id.into()))
    }

    pub fn get(&self, ctx_id: u32) -> Result<&Context3D> {
        self.contexts
            .get(ctx_id)
            .ok_or(Error::NotFound(ObjectKind::Context, ctx_id.into()))
    }

    pub fn contains(&self, ctx_id: u32) -> bool {
        self.contexts.contains(ctx_id)
    }

    /// Returns false if the resource was already attached.
    pub fn attach_resource(&mut self, ctx_id: u32, resource_id: u32) -> Result<bool> {
        let attached = self.get_mut(ctx_id)?.resources.insert(resource_id);
        if attached {
            debug!("Context {ctx_id}: attached resource {resource_id}");
        }
        Ok(attached)
    }

    /// Returns false if the resource was not attached.
    pub fn detach_resource(&mut self, ctx_id: u32, resource_id: u32) -> Result<bool> {
        let detached = self.get_mut(ctx_id)?.resources.remove(&resource_id);
        if detached {
            debug!("Context {ctx_id}: detached resource {resource_id}");
        }
        Ok(detached)
    }

    /// Detaches a destroyed resource from every context. Returns the
    /// contexts it was attached to.
    pub fn forget_resource(&mut self, resource_id: u32) -> Vec<u32> {
        self.contexts
            .iter_mut()
            .filter_map(|(ctx_id, context)| context.resources.remove(&resource_id).then_some(ctx_id))
            .collect()
    }

    /// Validates a command submission and hands the buffer back for the
    /// presenter.
    pub fn submit<'a>(&self, ctx_id: u32, commands: &'a [u8]) -> Result<&'a [u8]> {
        self.get(ctx_id)?;
        Ok(commands)
    }

    /// Removes every context, yielding them in ID order.
    pub fn drain(&mut self) -> impl Iterator<Item = (u32, Context3D)> {
        self.contexts.drain()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
