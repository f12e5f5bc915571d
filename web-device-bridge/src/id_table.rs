// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Bounded table of objects keyed by guest-chosen IDs.

use std::collections::BTreeMap;

use thiserror::Error as ThisError;

use crate::gpu_types::{self, ObjectKind};

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    #[error("id {id} is outside the valid range 0..{limit}")]
    OutOfRange { id: u32, limit: u32 },
    #[error("id {0} is already in use")]
    AlreadyExists(u32),
    #[error("table is full (capacity {0})")]
    OutOfCapacity(usize),
}

impl Error {
    /// Attaches the kind of object the table holds.
    pub fn into_gpu_error(self, kind: ObjectKind) -> gpu_types::Error {
        match self {
            Self::OutOfRange { id, limit } => gpu_types::Error::IdOutOfRange {
                kind,
                id: id.into(),
                limit: limit.into(),
            },
            Self::AlreadyExists(id) => gpu_types::Error::AlreadyExists(kind, id.into()),
            Self::OutOfCapacity(capacity) => gpu_types::Error::OutOfCapacity(kind, capacity),
        }
    }
}

/// A table holding at most `capacity` live entries whose IDs are in
/// `0..id_limit`.
///
/// Inserting into an occupied ID is a guest protocol violation and is
/// reported, never silently overwritten. A full table is reported as
/// `OutOfCapacity`, separately from bad IDs, so callers can tell "retry
/// later" from "the guest sent garbage".
#[derive(Debug)]
pub struct IdTable<T> {
    entries: BTreeMap<u32, T>,
    id_limit: u32,
    capacity: usize,
}

impl<T> IdTable<T> {
    pub const fn new(id_limit: u32, capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            id_limit,
            capacity,
        }
    }

    pub fn insert(&mut self, id: u32, value: T) -> Result<(), Error> {
        if id >= self.id_limit {
            return Err(Error::OutOfRange {
                id,
                limit: self.id_limit,
            });
        }
        if self.entries.contains_key(&id) {
            return Err(Error::AlreadyExists(id));
        }
        if self.entries.len() >= self.capacity {
            return Err(Error::OutOfCapacity(self.capacity));
        }
        self.entries.insert(id, value);
        Ok(())
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// Checks `id` against the ID range without looking it up.
    pub const fn check_range(&self, id: u32) -> Result<(), Error> {
        if id >= self.id_limit {
            return Err(Error::OutOfRange {
                id,
                limit: self.id_limit,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn id_limit(&self) -> u32 {
        self.id_limit
    }

    /// Live entries in ascending ID order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.entries.iter_mut().map(|(id, value)| (*id, value))
    }

    /// Removes every entry, yielding them in ascending ID order.
    pub fn drain(&mut self) -> impl Iterator<Item = (u32, T)> {
        std::mem::take(&mut self.entries).into_iter()
    }
}
