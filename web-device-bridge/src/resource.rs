// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::ops::Range;

use log::{debug, warn};

use crate::{
    gpu_types::{Error, ObjectKind, Rect, ResourceCreate, ResourceCreateBlob, Result, BYTES_PER_PIXEL},
    id_table::IdTable,
    GpuConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobInfo {
    pub blob_mem: u32,
    pub blob_flags: u32,
    pub blob_id: u64,
    pub mapped: bool,
}

/// A guest GPU resource and the memory backing it.
#[derive(Debug)]
pub struct GpuResource {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub bind: u32,
    pub target: u32,
    /// Bytes the resource covers, `width * height * 4` for 2D resources.
    pub size: u64,
    backing: Option<Box<[u8]>>,
    dirty: bool,
    blob: Option<BlobInfo>,
}

impl GpuResource {
    fn new_2d(id: u32, info: ResourceCreate, size: u64) -> Self {
        Self {
            id,
            width: info.width,
            height: info.height,
            format: info.format,
            bind: info.bind,
            target: info.target,
            size,
            backing: None,
            dirty: false,
            blob: None,
        }
    }

    pub fn backing(&self) -> Option<&[u8]> {
        self.backing.as_deref()
    }

    pub const fn has_backing(&self) -> bool {
        self.backing.is_some()
    }

    /// Set when new backing is attached, cleared by a transfer to the host.
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub const fn blob(&self) -> Option<&BlobInfo> {
        self.blob.as_ref()
    }

    pub const fn is_blob(&self) -> bool {
        self.blob.is_some()
    }

    fn backing_len(&self) -> u64 {
        self.backing.as_ref().map_or(0, |b| b.len() as u64)
    }
}

/// Validates that `len` bytes at `offset` fit in a buffer of `limit` bytes.
fn checked_span(offset: u64, len: u64, limit: u64) -> Result<Range<usize>> {
    let out_of_range = Error::OutOfRange { offset, len, limit };
    let end = offset.checked_add(len).ok_or(out_of_range)?;
    if end > limit {
        return Err(out_of_range);
    }
    let start = usize::try_from(offset).map_err(|_| out_of_range)?;
    let end = usize::try_from(end).map_err(|_| out_of_range)?;
    Ok(start..end)
}

/// Owns every live resource of a device.
#[derive(Debug)]
pub struct ResourceManager {
    resources: IdTable<GpuResource>,
    max_blob_size: u64,
    max_texture_size: u32,
    texture_memory: u64,
}

impl ResourceManager {
    pub fn new(config: &GpuConfig, max_texture_size: u32) -> Self {
        Self {
            resources: IdTable::new(config.max_resource_id(), config.max_resources()),
            max_blob_size: config.max_blob_size(),
            max_texture_size,
            texture_memory: 0,
        }
    }

    fn insert(&mut self, resource: GpuResource) -> Result<()> {
        let id = resource.id;
        self.resources.insert(id, resource).map_err(|e| {
            warn!("Failed to create resource {id}: {e}");
            e.into_gpu_error(ObjectKind::Resource)
        })
    }

    /// Creates a 2D resource without backing.
    pub fn create(&mut self, id: u32, info: ResourceCreate) -> Result<()> {
        if info.width > self.max_texture_size || info.height > self.max_texture_size {
            warn!(
                "Resource {id}: {}x{} exceeds the maximum texture size {}",
                info.width, info.height, self.max_texture_size
            );
            return Err(Error::OutOfRange {
                offset: 0,
                len: u64::from(info.width.max(info.height)),
                limit: u64::from(self.max_texture_size),
            });
        }
        let size = Rect::new(0, 0, info.width, info.height)
            .byte_len(BYTES_PER_PIXEL)
            .ok_or(Error::OutOfRange {
                offset: 0,
                len: u64::MAX,
                limit: u64::MAX,
            })?;

        self.insert(GpuResource::new_2d(id, info, size))?;
        debug!(
            "Created resource {id}: {}x{} format {} ({size} bytes)",
            info.width, info.height, info.format
        );
        Ok(())
    }

    /// Creates a blob resource with zeroed, host-owned backing of `size`
    /// bytes.
    pub fn create_blob(&mut self, info: ResourceCreateBlob) -> Result<()> {
        let id = info.resource_id;
        if info.size == 0 || info.size > self.max_blob_size {
            warn!(
                "Blob resource {id}: size {} not in 1..={}",
                info.size, self.max_blob_size
            );
            return Err(Error::OutOfRange {
                offset: 0,
                len: info.size,
                limit: self.max_blob_size,
            });
        }
        // Check the ID and capacity before allocating anything.
        self.resources
            .check_range(id)
            .map_err(|e| e.into_gpu_error(ObjectKind::Resource))?;
        if self.resources.contains(id) {
            warn!("Blob resource {id} already exists");
            return Err(Error::AlreadyExists(ObjectKind::Resource, id.into()));
        }
        if self.resources.len() >= self.resources.capacity() {
            warn!("No room for blob resource {id}");
            return Err(Error::OutOfCapacity(
                ObjectKind::Resource,
                self.resources.capacity(),
            ));
        }
        let len = usize::try_from(info.size).map_err(|_| Error::OutOfRange {
            offset: 0,
            len: info.size,
            limit: self.max_blob_size,
        })?;

        let resource = GpuResource {
            id,
            width: 0,
            height: 0,
            format: 0,
            bind: 0,
            target: 0,
            size: info.size,
            backing: Some(vec![0u8; len].into_boxed_slice()),
            dirty: false,
            blob: Some(BlobInfo {
                blob_mem: info.blob_mem,
                blob_flags: info.blob_flags,
                blob_id: info.blob_id,
                mapped: false,
            }),
        };
        self.insert(resource)?;
        self.texture_memory += info.size;
        debug!(
            "Created blob resource {id}: {} bytes, mem {} flags {:#x}",
            info.size, info.blob_mem, info.blob_flags
        );
        Ok(())
    }

    fn get_mut(&mut self, id: u32) -> Result<&mut GpuResource> {
        self.resources
            .get_mut(id)
            .ok_or(Error::NotFound(ObjectKind::Resource, id.into()))
    }

    pub fn get(&self, id: u32) -> Result<&GpuResource> {
        self.resources
            .get(id)
            .ok_or(Error::NotFound(ObjectKind::Resource, id.into()))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.resources.contains(id)
    }

    pub fn check_range(&self, id: u32) -> Result<()> {
        self.resources
            .check_range(id)
            .map_err(|e| e.into_gpu_error(ObjectKind::Resource))
    }

    /// Maps a blob resource for guest access.
    pub fn map_blob(&mut self, id: u32) -> Result<&mut [u8]> {
        let resource = self.get_mut(id)?;
        let Some(blob) = resource.blob.as_mut() else {
            return Err(Error::InvalidState(
                ObjectKind::Resource,
                id.into(),
                "not a blob resource",
            ));
        };
        let Some(backing) = resource.backing.as_deref_mut() else {
            return Err(Error::InvalidState(
                ObjectKind::Resource,
                id.into(),
                "no backing attached",
            ));
        };
        blob.mapped = true;
        Ok(backing)
    }

    pub fn unmap_blob(&mut self, id: u32) -> Result<()> {
        let resource = self.get_mut(id)?;
        match resource.blob.as_mut() {
            None => Err(Error::InvalidState(
                ObjectKind::Resource,
                id.into(),
                "not a blob resource",
            )),
            Some(blob) if !blob.mapped => Err(Error::InvalidState(
                ObjectKind::Resource,
                id.into(),
                "blob is not mapped",
            )),
            Some(blob) => {
                blob.mapped = false;
                Ok(())
            }
        }
    }

    /// Attaches `buffer` as the resource's backing and returns whatever was
    /// attached before.
    pub fn attach_backing(&mut self, id: u32, buffer: Box<[u8]>) -> Result<Option<Box<[u8]>>> {
        let new_len = buffer.len() as u64;
        let resource = self.get_mut(id)?;
        let old_len = resource.backing_len();
        let previous = resource.backing.replace(buffer);
        resource.dirty = true;
        self.texture_memory = self.texture_memory - old_len + new_len;
        debug!("Resource {id}: attached {new_len} bytes of backing");
        Ok(previous)
    }

    /// Detaches the backing without destroying the resource. Returns `None`
    /// when nothing was attached.
    pub fn detach_backing(&mut self, id: u32) -> Result<Option<Box<[u8]>>> {
        let resource = self.get_mut(id)?;
        let previous = resource.backing.take();
        if let Some(backing) = &previous {
            self.texture_memory -= backing.len() as u64;
            debug!("Resource {id}: detached {} bytes of backing", backing.len());
        }
        Ok(previous)
    }

    pub fn backing_mut(&mut self, id: u32) -> Result<&mut [u8]> {
        let resource = self.get_mut(id)?;
        resource.backing.as_deref_mut().ok_or(Error::InvalidState(
            ObjectKind::Resource,
            id.into(),
            "no backing attached",
        ))
    }

    fn transfer_span(resource: &GpuResource, rect: Rect, offset: u64) -> Result<Range<usize>> {
        if resource.backing.is_none() {
            return Err(Error::InvalidState(
                ObjectKind::Resource,
                resource.id.into(),
                "no backing attached",
            ));
        }
        let limit = resource.backing_len();
        let len = rect.byte_len(BYTES_PER_PIXEL).ok_or(Error::OutOfRange {
            offset,
            len: u64::MAX,
            limit,
        })?;
        checked_span(offset, len, limit)
    }

    /// Returns the bytes of the backing that hold `rect`, starting at
    /// `offset`. The range is validated before anything is read.
    pub fn transfer_to_host(&mut self, id: u32, rect: Rect, offset: u64) -> Result<&[u8]> {
        let resource = self.get_mut(id)?;
        let span = Self::transfer_span(resource, rect, offset).inspect_err(|e| {
            warn!("Resource {id}: transfer to host of {rect:?} at {offset} rejected: {e}");
        })?;
        resource.dirty = false;
        let backing = resource.backing.as_deref().unwrap_or_default();
        Ok(&backing[span])
    }

    /// Returns the part of the backing the presenter reads `rect` back into.
    pub fn transfer_from_host(&mut self, id: u32, rect: Rect, offset: u64) -> Result<&mut [u8]> {
        let resource = self.get_mut(id)?;
        let span = Self::transfer_span(resource, rect, offset).inspect_err(|e| {
            warn!("Resource {id}: transfer from host of {rect:?} at {offset} rejected: {e}");
        })?;
        let backing = resource.backing.as_deref_mut().unwrap_or_default();
        Ok(&mut backing[span])
    }

    /// Pixels and size of a cursor image, or `None` if the resource is unknown
    /// or its backing cannot hold `width * height` pixels.
    pub fn cursor_image(&self, id: u32) -> Option<(&[u8], u32, u32)> {
        let resource = self.resources.get(id)?;
        let backing = resource.backing.as_deref()?;
        let len = usize::try_from(resource.size).ok()?;
        let pixels = backing.get(..len)?;
        Some((pixels, resource.width, resource.height))
    }

    /// Removes the resource and releases its backing.
    pub fn destroy(&mut self, id: u32) -> Result<GpuResource> {
        let resource = self.resources.remove(id).ok_or_else(|| {
            warn!("Destroying unknown resource {id}");
            Error::NotFound(ObjectKind::Resource, id.into())
        })?;
        self.texture_memory -= resource.backing_len();
        debug!("Destroyed resource {id}");
        Ok(resource)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.resources.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Sum of the lengths of all attached backings.
    pub const fn texture_memory(&self) -> u64 {
        self.texture_memory
    }
}
