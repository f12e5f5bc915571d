// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use log::trace;

use crate::{gpu_types::Rect, BackendProbe, BackendType};

/// The presentation side of a device: whatever actually rasterizes textures,
/// drives the canvas and plays audio.
///
/// The core calls into it synchronously and never waits for an answer; it
/// does not know whether the implementation is local, on another thread or in
/// another process. Notifications are fire-and-forget, the only handshake
/// back into the core is the scanout acknowledge.
#[cfg_attr(test, mockall::automock)]
pub trait Presenter {
    /// Reports what the presentation layer can do. Called once when a device
    /// is created.
    fn probe(&self) -> BackendProbe;

    fn on_resource_created(&mut self, resource_id: u32, width: u32, height: u32, format: u32);

    fn on_resource_destroyed(&mut self, resource_id: u32);

    /// `data` holds `rect.width * rect.height` pixels copied out of the
    /// resource's backing.
    fn on_texture_uploaded(&mut self, resource_id: u32, rect: Rect, data: &[u8]);

    /// Asks the presenter to read `rect` of the texture back into `data`.
    fn on_texture_readback(&mut self, resource_id: u32, rect: Rect, data: &mut [u8]);

    /// New damage is pending on `scanout_id`, which shows `resource_id`.
    fn on_scanout_flushed(&mut self, scanout_id: u32, resource_id: u32);

    /// `data` is empty (and the size zero) when the cursor resource has no
    /// pixels attached.
    fn on_cursor_updated(
        &mut self,
        resource_id: u32,
        hot_x: u32,
        hot_y: u32,
        data: &[u8],
        width: u32,
        height: u32,
    );

    fn on_cursor_moved(&mut self, scanout_id: u32, x: u32, y: u32);

    fn on_context3d_created(&mut self, ctx_id: u32, capset_id: u32, name: &str);

    fn on_context3d_destroyed(&mut self, ctx_id: u32);

    fn on_context3d_attach_resource(&mut self, ctx_id: u32, resource_id: u32);

    fn on_context3d_detach_resource(&mut self, ctx_id: u32, resource_id: u32);

    /// `commands` is the guest command buffer, passed through uninterpreted.
    fn on_context3d_submit(&mut self, ctx_id: u32, commands: &[u8]);
}

/// A presenter that shows nothing. Useful for headless runs and as the
/// fallback when no browser surface is available.
#[derive(Debug, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn probe(&self) -> BackendProbe {
        trace!("NullPresenter::probe - software fallback");
        BackendProbe {
            detected: BackendType::Canvas2d,
            vendor: "Software".to_string(),
            renderer: "Canvas2D".to_string(),
            ..BackendProbe::default()
        }
    }

    fn on_resource_created(&mut self, resource_id: u32, width: u32, height: u32, format: u32) {
        trace!(
            "NullPresenter::on_resource_created - resource {resource_id} {width}x{height} \
             format {format}"
        );
    }

    fn on_resource_destroyed(&mut self, resource_id: u32) {
        trace!("NullPresenter::on_resource_destroyed - resource {resource_id}");
    }

    fn on_texture_uploaded(&mut self, resource_id: u32, rect: Rect, data: &[u8]) {
        trace!(
            "NullPresenter::on_texture_uploaded - resource {resource_id} {rect:?}, {} bytes",
            data.len()
        );
    }

    fn on_texture_readback(&mut self, resource_id: u32, rect: Rect, data: &mut [u8]) {
        trace!(
            "NullPresenter::on_texture_readback - resource {resource_id} {rect:?}, {} bytes",
            data.len()
        );
    }

    fn on_scanout_flushed(&mut self, scanout_id: u32, resource_id: u32) {
        trace!("NullPresenter::on_scanout_flushed - scanout {scanout_id} resource {resource_id}");
    }

    fn on_cursor_updated(
        &mut self,
        resource_id: u32,
        hot_x: u32,
        hot_y: u32,
        data: &[u8],
        width: u32,
        height: u32,
    ) {
        trace!(
            "NullPresenter::on_cursor_updated - resource {resource_id} hot ({hot_x}, {hot_y}) \
             {width}x{height}, {} bytes",
            data.len()
        );
    }

    fn on_cursor_moved(&mut self, scanout_id: u32, x: u32, y: u32) {
        trace!("NullPresenter::on_cursor_moved - scanout {scanout_id} ({x}, {y})");
    }

    fn on_context3d_created(&mut self, ctx_id: u32, capset_id: u32, name: &str) {
        trace!("NullPresenter::on_context3d_created - ctx {ctx_id} capset {capset_id} '{name}'");
    }

    fn on_context3d_destroyed(&mut self, ctx_id: u32) {
        trace!("NullPresenter::on_context3d_destroyed - ctx {ctx_id}");
    }

    fn on_context3d_attach_resource(&mut self, ctx_id: u32, resource_id: u32) {
        trace!("NullPresenter::on_context3d_attach_resource - ctx {ctx_id} resource {resource_id}");
    }

    fn on_context3d_detach_resource(&mut self, ctx_id: u32, resource_id: u32) {
        trace!("NullPresenter::on_context3d_detach_resource - ctx {ctx_id} resource {resource_id}");
    }

    fn on_context3d_submit(&mut self, ctx_id: u32, commands: &[u8]) {
        trace!(
            "NullPresenter::on_context3d_submit - ctx {ctx_id}, {} bytes",
            commands.len()
        );
    }
}
