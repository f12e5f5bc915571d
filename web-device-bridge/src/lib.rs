// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Device-side state for virtual GPUs and sound cards whose output is
//! presented by a browser (Canvas, WebGL, WebGPU, Web Audio).
//!
//! The GPU half keeps the guest-visible bookkeeping: resources and their
//! backing memory, scanouts and their pending damage, 3D contexts and
//! completion fences. Everything that actually draws is behind the
//! [`Presenter`] trait. The audio half moves interleaved `f32` samples
//! between the emulator and the audio callback through lock-free
//! single-producer/single-consumer rings.

#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod audio;
pub mod context;
pub mod device;
pub mod fence;
pub mod gpu_types;
pub mod id_table;
pub mod presenter;
pub mod resource;
pub mod scanout;
#[cfg(test)]
pub(crate) mod testutils;

use std::fmt::{Display, Formatter};

use bitflags::bitflags;
use thiserror::Error as ThisError;

pub use crate::{
    audio::{AudioEndpoint, WebAudio},
    device::GpuDevice,
    presenter::{NullPresenter, Presenter},
};
use crate::gpu_types::ScanoutMask;

/// Presentation technology, ordered from least to most capable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum BackendType {
    #[default]
    None = 0,
    /// Software rendering into a 2D canvas.
    Canvas2d = 1,
    WebGl = 2,
    WebGl2 = 3,
    WebGpu = 4,
    /// WebGPU running in compatibility mode on top of WebGL.
    WebGpuCompat = 5,
}

impl Display for BackendType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Canvas2d => write!(f, "canvas2d"),
            Self::WebGl => write!(f, "webgl"),
            Self::WebGl2 => write!(f, "webgl2"),
            Self::WebGpu => write!(f, "webgpu"),
            Self::WebGpuCompat => write!(f, "webgpu-compat"),
        }
    }
}

bitflags! {
    /// Optional features of the presentation backend.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct GpuFeatures: u32 {
        const TEXTURE_3D = 1 << 0;
        const COMPUTE = 1 << 1;
        const STORAGE_BUFFER = 1 << 2;
        const FLOAT32 = 1 << 3;
        const TIMESTAMP = 1 << 4;
        const INDIRECT_DRAW = 1 << 5;
        const DEPTH_CLIP = 1 << 6;
        const MULTISAMPLING = 1 << 7;
    }
}

/// What a presenter found out about its environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendProbe {
    pub detected: BackendType,
    /// WebGPU compatibility mode is usable even though `detected` is below
    /// WebGPU.
    pub webgpu_compat: bool,
    pub features: GpuFeatures,
    pub max_texture_size: u32,
    pub vendor: String,
    pub renderer: String,
}

impl Default for BackendProbe {
    fn default() -> Self {
        Self {
            detected: BackendType::None,
            webgpu_compat: false,
            features: GpuFeatures::empty(),
            max_texture_size: 4096,
            vendor: "Unknown".to_string(),
            renderer: "Unknown".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuCapabilities {
    pub backend: BackendType,
    pub features: GpuFeatures,
    pub max_texture_size: u32,
    pub max_texture_layers: u32,
    pub max_buffer_size: u64,
    pub max_uniform_buffer_size: u32,
    pub max_compute_workgroup_size: [u32; 3],
    pub max_compute_workgroups: [u32; 3],
    pub supports_virgl: bool,
    pub supports_blob: bool,
    pub vendor: String,
    pub renderer: String,
}

impl GpuCapabilities {
    pub const MAX_TEXTURE_LAYERS: u32 = 256;
    pub const MAX_BUFFER_SIZE: u64 = 256 * 1024 * 1024;
    pub const MAX_UNIFORM_BUFFER_SIZE: u32 = 64 * 1024;

    /// Picks the backend to use given the guest's preference and what the
    /// presenter detected.
    ///
    /// A WebGPU request on a machine without WebGPU falls back to the
    /// compatibility path when it exists. Any other preference is honored
    /// only if the detected backend is at least as capable.
    pub fn negotiate(preferred: BackendType, probe: BackendProbe) -> Self {
        let backend = if preferred == BackendType::WebGpu && probe.detected < BackendType::WebGpu
        {
            if probe.webgpu_compat {
                BackendType::WebGpuCompat
            } else {
                probe.detected
            }
        } else if preferred != BackendType::None && preferred <= probe.detected {
            preferred
        } else {
            probe.detected
        };

        let webgpu = backend >= BackendType::WebGpu;
        Self {
            backend,
            features: probe.features,
            max_texture_size: probe.max_texture_size,
            max_texture_layers: Self::MAX_TEXTURE_LAYERS,
            max_buffer_size: Self::MAX_BUFFER_SIZE,
            max_uniform_buffer_size: Self::MAX_UNIFORM_BUFFER_SIZE,
            max_compute_workgroup_size: if webgpu { [256, 256, 64] } else { [0; 3] },
            max_compute_workgroups: if webgpu { [65535; 3] } else { [0; 3] },
            supports_virgl: webgpu,
            supports_blob: webgpu,
            vendor: probe.vendor,
            renderer: probe.renderer,
        }
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be zero")]
    ZeroCapacity(&'static str),
    #[error("{0} scanouts requested, at most {max} are supported", max = ScanoutMask::MAX_SCANOUTS)]
    TooManyScanouts(u32),
    #[error("Audio ring size {0} is not a power of two of at least 2")]
    InvalidRingSize(usize),
    #[error("Channel count {0} not supported, expected 1 or 2")]
    UnsupportedChannels(u32),
    #[error("Sample rate must not be zero")]
    InvalidSampleRate,
    #[error("Audio ring of {ring} samples cannot hold a {needed} sample callback buffer")]
    RingSmallerThanBuffer { ring: usize, needed: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Table sizes and limits of a GPU device.
pub struct GpuConfig {
    max_resources: usize,
    max_resource_id: u32,
    max_contexts: u32,
    max_scanouts: u32,
    max_fences: usize,
    max_blob_size: u64,
    preferred_backend: BackendType,
}

impl GpuConfig {
    pub const DEFAULT_MAX_RESOURCES: usize = 4096;
    pub const DEFAULT_MAX_RESOURCE_ID: u32 = 4096;
    pub const DEFAULT_MAX_CONTEXTS: u32 = 256;
    pub const DEFAULT_MAX_SCANOUTS: u32 = 16;
    pub const DEFAULT_MAX_FENCES: usize = 1024;
    pub const DEFAULT_MAX_BLOB_SIZE: u64 = GpuCapabilities::MAX_BUFFER_SIZE;

    /// Maximum number of live resources.
    pub const fn max_resources(&self) -> usize {
        self.max_resources
    }

    /// Resource IDs must be below this value.
    pub const fn max_resource_id(&self) -> u32 {
        self.max_resource_id
    }

    /// Context IDs must be below this value, which is also the number of
    /// contexts that can be live at once.
    pub const fn max_contexts(&self) -> u32 {
        self.max_contexts
    }

    pub const fn max_scanouts(&self) -> u32 {
        self.max_scanouts
    }

    pub const fn max_fences(&self) -> usize {
        self.max_fences
    }

    pub const fn max_blob_size(&self) -> u64 {
        self.max_blob_size
    }

    pub const fn preferred_backend(&self) -> BackendType {
        self.preferred_backend
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            max_resources: Self::DEFAULT_MAX_RESOURCES,
            max_resource_id: Self::DEFAULT_MAX_RESOURCE_ID,
            max_contexts: Self::DEFAULT_MAX_CONTEXTS,
            max_scanouts: Self::DEFAULT_MAX_SCANOUTS,
            max_fences: Self::DEFAULT_MAX_FENCES,
            max_blob_size: Self::DEFAULT_MAX_BLOB_SIZE,
            preferred_backend: BackendType::WebGpu,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct GpuConfigBuilder {
    config: GpuConfig,
}

impl GpuConfigBuilder {
    pub const fn set_max_resources(mut self, max_resources: usize) -> Self {
        self.config.max_resources = max_resources;
        self
    }

    pub const fn set_max_resource_id(mut self, max_resource_id: u32) -> Self {
        self.config.max_resource_id = max_resource_id;
        self
    }

    pub const fn set_max_contexts(mut self, max_contexts: u32) -> Self {
        self.config.max_contexts = max_contexts;
        self
    }

    pub const fn set_max_scanouts(mut self, max_scanouts: u32) -> Self {
        self.config.max_scanouts = max_scanouts;
        self
    }

    pub const fn set_max_fences(mut self, max_fences: usize) -> Self {
        self.config.max_fences = max_fences;
        self
    }

    pub const fn set_max_blob_size(mut self, max_blob_size: u64) -> Self {
        self.config.max_blob_size = max_blob_size;
        self
    }

    pub const fn set_preferred_backend(mut self, backend: BackendType) -> Self {
        self.config.preferred_backend = backend;
        self
    }

    pub fn build(self) -> Result<GpuConfig, ConfigError> {
        let config = self.config;
        if config.max_resources == 0 || config.max_resource_id == 0 {
            return Err(ConfigError::ZeroCapacity("max_resources"));
        }
        if config.max_contexts == 0 {
            return Err(ConfigError::ZeroCapacity("max_contexts"));
        }
        if config.max_scanouts == 0 {
            return Err(ConfigError::ZeroCapacity("max_scanouts"));
        }
        if config.max_scanouts > ScanoutMask::MAX_SCANOUTS {
            return Err(ConfigError::TooManyScanouts(config.max_scanouts));
        }
        if config.max_fences == 0 {
            return Err(ConfigError::ZeroCapacity("max_fences"));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Format and buffering of a Web Audio device.
pub struct AudioConfig {
    sample_rate: u32,
    channels: u32,
    buffer_frames: u32,
    ring_samples: usize,
    enable_input: bool,
}

impl AudioConfig {
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
    pub const DEFAULT_CHANNELS: u32 = 2;
    pub const DEFAULT_BUFFER_FRAMES: u32 = 1024;
    pub const DEFAULT_RING_SAMPLES: usize = 16384;

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u32 {
        self.channels
    }

    /// Frames requested by one run of the audio callback.
    pub const fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    /// Size of each ring in samples (not frames).
    pub const fn ring_samples(&self) -> usize {
        self.ring_samples
    }

    pub const fn enable_input(&self) -> bool {
        self.enable_input
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::DEFAULT_SAMPLE_RATE,
            channels: Self::DEFAULT_CHANNELS,
            buffer_frames: Self::DEFAULT_BUFFER_FRAMES,
            ring_samples: Self::DEFAULT_RING_SAMPLES,
            enable_input: false,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct AudioConfigBuilder {
    config: AudioConfig,
}

impl AudioConfigBuilder {
    pub const fn set_sample_rate(mut self, sample_rate: u32) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    pub const fn set_channels(mut self, channels: u32) -> Self {
        self.config.channels = channels;
        self
    }

    pub const fn set_buffer_frames(mut self, buffer_frames: u32) -> Self {
        self.config.buffer_frames = buffer_frames;
        self
    }

    pub const fn set_ring_samples(mut self, ring_samples: usize) -> Self {
        self.config.ring_samples = ring_samples;
        self
    }

    pub const fn set_enable_input(mut self, enable_input: bool) -> Self {
        self.config.enable_input = enable_input;
        self
    }

    pub fn build(self) -> Result<AudioConfig, ConfigError> {
        let config = self.config;
        if config.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if !matches!(config.channels, 1 | 2) {
            return Err(ConfigError::UnsupportedChannels(config.channels));
        }
        if config.buffer_frames == 0 {
            return Err(ConfigError::ZeroCapacity("buffer_frames"));
        }
        if config.ring_samples < 2 || !config.ring_samples.is_power_of_two() {
            return Err(ConfigError::InvalidRingSize(config.ring_samples));
        }
        // One slot of the ring always stays empty.
        let needed = config.buffer_frames as usize * config.channels as usize;
        if needed > config.ring_samples - 1 {
            return Err(ConfigError::RingSmallerThanBuffer {
                ring: config.ring_samples,
                needed,
            });
        }
        Ok(config)
    }
}
