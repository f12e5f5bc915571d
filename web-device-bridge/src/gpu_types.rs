// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::fmt::{Display, Formatter};

use thiserror::Error as ThisError;

/// Resources are uploaded to the presenter as 32-bit pixels regardless of the
/// guest format tag.
pub const BYTES_PER_PIXEL: u64 = 4;

// virtio-gpu control response codes, used when a device model reports an
// `Error` back to the guest.
pub const VIRTIO_GPU_RESP_OK_NODATA: u32 = 0x1100;
pub const VIRTIO_GPU_RESP_ERR_UNSPEC: u32 = 0x1200;
pub const VIRTIO_GPU_RESP_ERR_OUT_OF_MEMORY: u32 = 0x1201;
pub const VIRTIO_GPU_RESP_ERR_INVALID_SCANOUT_ID: u32 = 0x1202;
pub const VIRTIO_GPU_RESP_ERR_INVALID_RESOURCE_ID: u32 = 0x1203;
pub const VIRTIO_GPU_RESP_ERR_INVALID_CONTEXT_ID: u32 = 0x1204;
pub const VIRTIO_GPU_RESP_ERR_INVALID_PARAMETER: u32 = 0x1205;

/// The kind of guest-visible object an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Resource,
    Scanout,
    Context,
    Fence,
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resource => write!(f, "resource"),
            Self::Scanout => write!(f, "scanout"),
            Self::Context => write!(f, "context"),
            Self::Fence => write!(f, "fence"),
        }
    }
}

/// Errors reported by the GPU bookkeeping layer.
///
/// Every guest-supplied ID, size or byte range is validated; bad input always
/// ends up as one of these variants instead of a panic.
#[derive(Clone, Copy, Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    #[error("{0} {1} already exists")]
    AlreadyExists(ObjectKind, u64),
    #[error("{0} {1} not found")]
    NotFound(ObjectKind, u64),
    #[error("{0} table is full (capacity {1})")]
    OutOfCapacity(ObjectKind, usize),
    #[error("{kind} id {id} is outside the valid range 0..{limit}")]
    IdOutOfRange { kind: ObjectKind, id: u64, limit: u64 },
    #[error("range of {len} bytes at offset {offset} exceeds the {limit} byte limit")]
    OutOfRange { offset: u64, len: u64, limit: u64 },
    #[error("{0} {1} is in an invalid state: {2}")]
    InvalidState(ObjectKind, u64, &'static str),
}

impl Error {
    /// The virtio-gpu response type matching this error.
    pub const fn response_type(&self) -> u32 {
        match self {
            Self::AlreadyExists(kind, _) | Self::NotFound(kind, _) => invalid_id_response(*kind),
            Self::IdOutOfRange { kind, .. } => invalid_id_response(*kind),
            Self::OutOfCapacity(..) => VIRTIO_GPU_RESP_ERR_OUT_OF_MEMORY,
            Self::OutOfRange { .. } => VIRTIO_GPU_RESP_ERR_INVALID_PARAMETER,
            Self::InvalidState(..) => VIRTIO_GPU_RESP_ERR_UNSPEC,
        }
    }
}

const fn invalid_id_response(kind: ObjectKind) -> u32 {
    match kind {
        ObjectKind::Resource => VIRTIO_GPU_RESP_ERR_INVALID_RESOURCE_ID,
        ObjectKind::Scanout => VIRTIO_GPU_RESP_ERR_INVALID_SCANOUT_ID,
        ObjectKind::Context => VIRTIO_GPU_RESP_ERR_INVALID_CONTEXT_ID,
        ObjectKind::Fence => VIRTIO_GPU_RESP_ERR_INVALID_PARAMETER,
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest rectangle containing both `self` and `other`. Edges past
    /// `u32::MAX` saturate.
    pub fn union(&self, other: &Self) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self
            .x
            .saturating_add(self.width)
            .max(other.x.saturating_add(other.width));
        let bottom = self
            .y
            .saturating_add(self.height)
            .max(other.y.saturating_add(other.height));
        Self {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }

    /// Number of bytes covered by this rectangle at `bpp` bytes per pixel, or
    /// `None` if the product does not fit in 64 bits.
    pub fn byte_len(&self, bpp: u64) -> Option<u64> {
        u64::from(self.width)
            .checked_mul(u64::from(self.height))?
            .checked_mul(bpp)
    }
}

/// Accumulated damage of a scanout since the presenter last acknowledged it.
///
/// Damage is tracked as a single bounding box rather than a list of
/// rectangles, so merging is O(1) and the presenter may redraw more than what
/// actually changed. That over-damage is expected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyRegion {
    bounds: Rect,
    pending: bool,
}

impl DirtyRegion {
    /// The first damage after a clear sets the bounds directly, later damage
    /// grows them to the union bounding box.
    pub fn merge(&mut self, rect: Rect) {
        if self.pending {
            self.bounds = self.bounds.union(&rect);
        } else {
            self.bounds = rect;
            self.pending = true;
        }
    }

    pub const fn is_pending(&self) -> bool {
        self.pending
    }

    pub const fn bounds(&self) -> Option<Rect> {
        if self.pending {
            Some(self.bounds)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Set of scanouts, one bit per scanout ID. A resource may be shown on
/// several scanouts at once (mirrored displays).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanoutMask(u32);

impl ScanoutMask {
    pub const MAX_SCANOUTS: u32 = u32::BITS;

    #[allow(clippy::missing_const_for_fn)]
    pub fn enable(&mut self, scanout_id: u32) {
        self.0 |= 1 << scanout_id;
    }

    #[allow(clippy::missing_const_for_fn)]
    pub fn disable(&mut self, scanout_id: u32) {
        self.0 &= !(1 << scanout_id);
    }

    pub const fn contains(self, scanout_id: u32) -> bool {
        scanout_id < Self::MAX_SCANOUTS && (self.0 >> scanout_id) & 1 == 1
    }

    pub const fn has_any_enabled(self) -> bool {
        self.0 != 0
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter_enabled(self) -> impl Iterator<Item = u32> {
        (0..Self::MAX_SCANOUTS).filter(move |i| ((self.0 >> i) & 1) == 1)
    }
}

/// Parameters of a 2D resource, as sent by the guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCreate {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub bind: u32,
    pub target: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCreateBlob {
    pub resource_id: u32,
    pub blob_mem: u32,
    pub blob_flags: u32,
    pub blob_id: u64,
    pub size: u64,
}
