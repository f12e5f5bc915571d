// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use log::{debug, info, warn};

use crate::{
    context::{Context3D, Context3DManager},
    fence::FenceTracker,
    gpu_types::{Error, ObjectKind, Rect, ResourceCreate, ResourceCreateBlob, Result, ScanoutMask},
    presenter::Presenter,
    resource::{GpuResource, ResourceManager},
    scanout::{ScanoutInfo, ScanoutManager},
    GpuCapabilities, GpuConfig,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    /// Scanout flushes delivered to the presenter.
    pub frames_rendered: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub commands_submitted: u64,
    /// Resources created since the device started.
    pub resources_allocated: u64,
    /// Bytes of backing currently attached to resources.
    pub texture_memory: u64,
    /// Fences created and not yet reaped.
    pub pending_fences: u64,
}

/// One emulated GPU: its resource, scanout, fence and context tables, and
/// the presenter that shows them.
pub struct GpuDevice<P: Presenter> {
    config: GpuConfig,
    capabilities: GpuCapabilities,
    presenter: P,
    resources: ResourceManager,
    scanouts: ScanoutManager,
    fences: FenceTracker,
    contexts: Context3DManager,
    stats: GpuStats,
}

impl<P: Presenter> GpuDevice<P> {
    pub fn new(config: GpuConfig, presenter: P) -> Self {
        let capabilities =
            GpuCapabilities::negotiate(config.preferred_backend(), presenter.probe());
        info!(
            "GPU device: backend {} ({} / {}), {} scanouts, {} resources, {} contexts",
            capabilities.backend,
            capabilities.vendor,
            capabilities.renderer,
            config.max_scanouts(),
            config.max_resources(),
            config.max_contexts()
        );

        Self {
            resources: ResourceManager::new(&config, capabilities.max_texture_size),
            scanouts: ScanoutManager::new(config.max_scanouts()),
            fences: FenceTracker::new(config.max_fences()),
            contexts: Context3DManager::new(config.max_contexts()),
            stats: GpuStats::default(),
            config,
            capabilities,
            presenter,
        }
    }

    pub const fn config(&self) -> &GpuConfig {
        &self.config
    }

    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    pub const fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn resource_create_2d(&mut self, resource_id: u32, info: ResourceCreate) -> Result<()> {
        self.resources.create(resource_id, info)?;
        self.stats.resources_allocated += 1;
        self.presenter
            .on_resource_created(resource_id, info.width, info.height, info.format);
        Ok(())
    }

    pub fn resource_create_blob(&mut self, info: ResourceCreateBlob) -> Result<()> {
        if !self.capabilities.supports_blob {
            warn!(
                "Blob resource {} requested but backend {} has no blob support",
                info.resource_id, self.capabilities.backend
            );
            return Err(Error::InvalidState(
                ObjectKind::Resource,
                info.resource_id.into(),
                "blob resources not supported",
            ));
        }
        self.resources.create_blob(info)?;
        self.stats.resources_allocated += 1;
        self.presenter.on_resource_created(info.resource_id, 0, 0, 0);
        Ok(())
    }

    pub fn resource_map_blob(&mut self, resource_id: u32) -> Result<&mut [u8]> {
        self.resources.map_blob(resource_id)
    }

    pub fn resource_unmap_blob(&mut self, resource_id: u32) -> Result<()> {
        self.resources.unmap_blob(resource_id)
    }

    /// Destroys a resource. Fails with `InvalidState` while the resource is
    /// shown on an enabled scanout.
    pub fn resource_destroy(&mut self, resource_id: u32) -> Result<GpuResource> {
        self.resources.get(resource_id)?;
        let scanouts = self.scanouts.enabled_for(resource_id);
        if scanouts.has_any_enabled() {
            warn!(
                "Resource {resource_id} is still displayed on scanouts {:?}",
                scanouts.iter_enabled().collect::<Vec<_>>()
            );
            return Err(Error::InvalidState(
                ObjectKind::Resource,
                resource_id.into(),
                "resource is bound to an enabled scanout",
            ));
        }

        for ctx_id in self.contexts.forget_resource(resource_id) {
            self.presenter
                .on_context3d_detach_resource(ctx_id, resource_id);
        }
        let resource = self.resources.destroy(resource_id)?;
        self.presenter.on_resource_destroyed(resource_id);
        Ok(resource)
    }

    pub fn resource(&self, resource_id: u32) -> Result<&GpuResource> {
        self.resources.get(resource_id)
    }

    pub fn attach_backing(
        &mut self,
        resource_id: u32,
        buffer: Box<[u8]>,
    ) -> Result<Option<Box<[u8]>>> {
        self.resources.attach_backing(resource_id, buffer)
    }

    pub fn detach_backing(&mut self, resource_id: u32) -> Result<Option<Box<[u8]>>> {
        self.resources.detach_backing(resource_id)
    }

    /// Guest view of a resource's backing.
    pub fn backing_mut(&mut self, resource_id: u32) -> Result<&mut [u8]> {
        self.resources.backing_mut(resource_id)
    }

    /// Uploads `rect` of the resource, read from its backing at `offset`.
    pub fn transfer_to_host(&mut self, resource_id: u32, rect: Rect, offset: u64) -> Result<()> {
        let data = self.resources.transfer_to_host(resource_id, rect, offset)?;
        self.stats.bytes_uploaded += data.len() as u64;
        self.presenter.on_texture_uploaded(resource_id, rect, data);
        Ok(())
    }

    /// Reads `rect` of the texture back into the backing at `offset`.
    pub fn transfer_from_host(
        &mut self,
        resource_id: u32,
        rect: Rect,
        offset: u64,
    ) -> Result<()> {
        let data = self
            .resources
            .transfer_from_host(resource_id, rect, offset)?;
        self.stats.bytes_downloaded += data.len() as u64;
        self.presenter.on_texture_readback(resource_id, rect, data);
        Ok(())
    }

    /// Adds `rect` to the damage of every enabled scanout showing the
    /// resource and tells the presenter about each of them. Returns the
    /// scanouts that were flushed, possibly none.
    pub fn flush_resource(&mut self, resource_id: u32, rect: Rect) -> Result<ScanoutMask> {
        self.resources.get(resource_id)?;
        let scanouts = self.scanouts.enabled_for(resource_id);
        for scanout_id in scanouts.iter_enabled() {
            self.scanouts.add_damage(scanout_id, rect)?;
            self.presenter.on_scanout_flushed(scanout_id, resource_id);
            self.stats.frames_rendered += 1;
        }
        Ok(scanouts)
    }

    pub fn set_scanout(
        &mut self,
        scanout_id: u32,
        resource_id: u32,
        rect: Rect,
        enabled: bool,
    ) -> Result<()> {
        self.scanouts
            .set_scanout(scanout_id, resource_id, rect, enabled)
    }

    pub fn scanout(&self, scanout_id: u32) -> Option<ScanoutInfo> {
        self.scanouts.get(scanout_id)
    }

    /// The presenter has consumed the damage pending on `scanout_id`.
    pub fn acknowledge_scanout(&mut self, scanout_id: u32) -> Result<()> {
        self.scanouts.acknowledge(scanout_id)
    }

    /// Sends the cursor image held by `resource_id`. A resource that is not
    /// live or has no pixels sends an empty image, which hides the cursor.
    pub fn update_cursor(&mut self, resource_id: u32, hot_x: u32, hot_y: u32) -> Result<()> {
        self.resources.check_range(resource_id)?;
        match self.resources.cursor_image(resource_id) {
            Some((data, width, height)) => {
                self.presenter
                    .on_cursor_updated(resource_id, hot_x, hot_y, data, width, height);
            }
            None => {
                self.presenter
                    .on_cursor_updated(resource_id, hot_x, hot_y, &[], 0, 0);
            }
        }
        Ok(())
    }

    pub fn move_cursor(&mut self, scanout_id: u32, x: u32, y: u32) -> Result<()> {
        if self.scanouts.get(scanout_id).is_none() {
            return Err(Error::IdOutOfRange {
                kind: ObjectKind::Scanout,
                id: scanout_id.into(),
                limit: self.scanouts.max_scanouts().into(),
            });
        }
        self.presenter.on_cursor_moved(scanout_id, x, y);
        Ok(())
    }

    /// Creates a fence owned by the live context `ctx_id`, or on the global
    /// timeline when `ctx_id` is `None`.
    pub fn create_fence(&mut self, ctx_id: Option<u32>, fence_id: u64) -> Result<()> {
        if let Some(ctx_id) = ctx_id.filter(|&id| !self.contexts.contains(id)) {
            warn!("Fence {fence_id} created on unknown ctx {ctx_id}");
            return Err(Error::NotFound(ObjectKind::Context, ctx_id.into()));
        }
        self.fences.create_fence(ctx_id, fence_id)
    }

    pub fn signal_fence(&mut self, fence_id: u64) -> bool {
        self.fences.signal(fence_id)
    }

    /// Signals all fences of `ctx_id` up to and including `fence_id`.
    pub fn signal_context_fences(&mut self, ctx_id: Option<u32>, fence_id: u64) -> usize {
        self.fences.signal_up_to(ctx_id, fence_id)
    }

    pub fn poll_fence(&mut self, fence_id: u64) -> bool {
        self.fences.poll(fence_id)
    }

    pub fn context_create(&mut self, ctx_id: u32, capset_id: u32, name: &str) -> Result<()> {
        self.contexts.create(ctx_id, capset_id, name)?;
        self.presenter.on_context3d_created(ctx_id, capset_id, name);
        Ok(())
    }

    /// Destroys a context and drops its fences. Returns the number of fences
    /// dropped.
    pub fn context_destroy(&mut self, ctx_id: u32) -> Result<usize> {
        self.contexts.destroy(ctx_id)?;
        let reaped = self.fences.destroy_context(ctx_id);
        self.presenter.on_context3d_destroyed(ctx_id);
        Ok(reaped)
    }

    pub fn context(&self, ctx_id: u32) -> Result<&Context3D> {
        self.contexts.get(ctx_id)
    }

    pub fn context_attach_resource(&mut self, ctx_id: u32, resource_id: u32) -> Result<()> {
        self.resources.get(resource_id)?;
        if self.contexts.attach_resource(ctx_id, resource_id)? {
            self.presenter
                .on_context3d_attach_resource(ctx_id, resource_id);
        }
        Ok(())
    }

    pub fn context_detach_resource(&mut self, ctx_id: u32, resource_id: u32) -> Result<()> {
        if self.contexts.detach_resource(ctx_id, resource_id)? {
            self.presenter
                .on_context3d_detach_resource(ctx_id, resource_id);
        }
        Ok(())
    }

    /// Forwards a command buffer to the presenter, uninterpreted.
    pub fn submit_3d(&mut self, ctx_id: u32, commands: &[u8]) -> Result<()> {
        let commands = self.contexts.submit(ctx_id, commands)?;
        self.stats.commands_submitted += 1;
        self.presenter.on_context3d_submit(ctx_id, commands);
        Ok(())
    }

    pub fn stats(&self) -> GpuStats {
        GpuStats {
            texture_memory: self.resources.texture_memory(),
            pending_fences: self.fences.len() as u64,
            ..self.stats
        }
    }

    /// Zeroes the traffic counters. The allocation count and the gauges
    /// (texture memory, pending fences) are kept.
    pub fn reset_stats(&mut self) {
        self.stats = GpuStats {
            resources_allocated: self.stats.resources_allocated,
            ..GpuStats::default()
        };
    }

    /// Tears down every scanout, context, fence and resource.
    pub fn shutdown(&mut self) {
        self.scanouts.disable_all();

        let contexts: Vec<u32> = self.contexts.drain().map(|(ctx_id, _)| ctx_id).collect();
        for ctx_id in contexts {
            self.presenter.on_context3d_destroyed(ctx_id);
        }
        let fences = self.fences.clear();

        let resources = self.resources.ids();
        for resource_id in &resources {
            if self.resources.destroy(*resource_id).is_ok() {
                self.presenter.on_resource_destroyed(*resource_id);
            }
        }
        debug!("Dropped {fences} fences");
        info!(
            "GPU device shut down, released {} resources",
            resources.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use mockall::{predicate::eq, Sequence};

    use super::*;
    use crate::{
        presenter::{MockPresenter, NullPresenter},
        testutils::{init_logger, mock_presenter, webgpu_probe},
        BackendProbe, BackendType, GpuConfigBuilder,
    };

    fn rgba(width: u32, height: u32) -> ResourceCreate {
        ResourceCreate {
            width,
            height,
            format: 1,
            bind: 2,
            target: 2,
        }
    }

    fn null_device() -> GpuDevice<NullPresenter> {
        init_logger();
        GpuDevice::new(GpuConfig::default(), NullPresenter)
    }

    #[test]
    fn test_negotiates_capabilities_from_probe() {
        let device = null_device();
        assert_eq!(device.capabilities().backend, BackendType::Canvas2d);
        assert!(!device.capabilities().supports_blob);

        let presenter = mock_presenter(webgpu_probe());
        let device = GpuDevice::new(GpuConfig::default(), presenter);
        assert_eq!(device.capabilities().backend, BackendType::WebGpu);
        assert!(device.capabilities().supports_blob);
    }

    #[test]
    fn test_create_notifies_presenter() {
        let mut presenter = mock_presenter(BackendProbe::default());
        presenter
            .expect_on_resource_created()
            .with(eq(1), eq(64), eq(32), eq(1))
            .times(1)
            .return_const(());
        presenter
            .expect_on_resource_destroyed()
            .with(eq(1))
            .times(1)
            .return_const(());

        let mut device = GpuDevice::new(GpuConfig::default(), presenter);
        device.resource_create_2d(1, rgba(64, 32)).unwrap();
        // A failed create does not notify.
        assert_matches!(
            device.resource_create_2d(1, rgba(64, 32)),
            Err(Error::AlreadyExists(ObjectKind::Resource, 1))
        );
        device.resource_destroy(1).unwrap();
        assert_matches!(
            device.resource(1),
            Err(Error::NotFound(ObjectKind::Resource, 1))
        );
        assert_eq!(device.stats().resources_allocated, 1);
    }

    #[test]
    fn test_transfer_uploads_backing_range() {
        let mut presenter = mock_presenter(BackendProbe::default());
        presenter.expect_on_resource_created().return_const(());
        presenter
            .expect_on_texture_uploaded()
            .withf(|id, rect, data| {
                *id == 1 && *rect == Rect::new(0, 0, 2, 2) && data.len() == 16 && data[0] == 4
            })
            .times(1)
            .return_const(());

        let mut device = GpuDevice::new(GpuConfig::default(), presenter);
        device.resource_create_2d(1, rgba(2, 2)).unwrap();
        assert_matches!(
            device.transfer_to_host(1, Rect::new(0, 0, 2, 2), 0),
            Err(Error::InvalidState(ObjectKind::Resource, 1, _))
        );

        let backing: Vec<u8> = (0..20).collect();
        device.attach_backing(1, backing.into_boxed_slice()).unwrap();
        device
            .transfer_to_host(1, Rect::new(0, 0, 2, 2), 4)
            .unwrap();
        assert_matches!(
            device.transfer_to_host(1, Rect::new(0, 0, 2, 2), 8),
            Err(Error::OutOfRange {
                offset: 8,
                len: 16,
                limit: 20
            })
        );
        assert_eq!(device.stats().bytes_uploaded, 16);
        assert_eq!(device.stats().texture_memory, 20);
    }

    #[test]
    fn test_transfer_from_host_fills_backing() {
        let mut presenter = mock_presenter(BackendProbe::default());
        presenter.expect_on_resource_created().return_const(());
        presenter
            .expect_on_texture_readback()
            .times(1)
            .returning(|_, _, data| data.fill(0xaa));

        let mut device = GpuDevice::new(GpuConfig::default(), presenter);
        device.resource_create_2d(3, rgba(1, 1)).unwrap();
        device
            .attach_backing(3, vec![0u8; 8].into_boxed_slice())
            .unwrap();
        device
            .transfer_from_host(3, Rect::new(0, 0, 1, 1), 4)
            .unwrap();
        assert_eq!(device.backing_mut(3).unwrap(), &[0, 0, 0, 0, 0xaa, 0xaa, 0xaa, 0xaa]);
        assert_eq!(device.stats().bytes_downloaded, 4);
    }

    #[test]
    fn test_flush_damages_every_bound_scanout() {
        let mut presenter = mock_presenter(BackendProbe::default());
        presenter.expect_on_resource_created().return_const(());
        let mut seq = Sequence::new();
        presenter
            .expect_on_scanout_flushed()
            .with(eq(0), eq(5))
            .times(2)
            .in_sequence(&mut seq)
            .return_const(());
        presenter
            .expect_on_scanout_flushed()
            .with(eq(2), eq(5))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let mut device = GpuDevice::new(GpuConfig::default(), presenter);
        device.resource_create_2d(5, rgba(64, 64)).unwrap();
        let mask = device.flush_resource(5, Rect::new(0, 0, 1, 1)).unwrap();
        assert!(!mask.has_any_enabled());

        device
            .set_scanout(0, 5, Rect::new(0, 0, 64, 64), true)
            .unwrap();
        device
            .flush_resource(5, Rect::new(0, 0, 10, 10))
            .unwrap();
        device
            .flush_resource(5, Rect::new(20, 20, 5, 5))
            .unwrap();
        assert_eq!(
            device.scanout(0).unwrap().damage,
            Some(Rect::new(0, 0, 25, 25))
        );

        device.acknowledge_scanout(0).unwrap();
        device
            .set_scanout(2, 5, Rect::new(0, 0, 64, 64), true)
            .unwrap();
        device.set_scanout(0, 5, Rect::default(), false).unwrap();
        let mask = device.flush_resource(5, Rect::new(1, 1, 1, 1)).unwrap();
        assert_eq!(mask.iter_enabled().collect::<Vec<_>>(), vec![2]);
        assert_eq!(device.scanout(0).unwrap().damage, None);
        assert_eq!(device.stats().frames_rendered, 3);

        assert_matches!(
            device.flush_resource(6, Rect::default()),
            Err(Error::NotFound(ObjectKind::Resource, 6))
        );
    }

    #[test]
    fn test_destroy_displayed_resource_is_refused() {
        let mut device = null_device();
        device.resource_create_2d(1, rgba(8, 8)).unwrap();
        device
            .set_scanout(0, 1, Rect::new(0, 0, 8, 8), true)
            .unwrap();
        assert_matches!(
            device.resource_destroy(1),
            Err(Error::InvalidState(ObjectKind::Resource, 1, _))
        );
        assert!(device.resource(1).is_ok());

        device.set_scanout(0, 1, Rect::new(0, 0, 8, 8), false).unwrap();
        device.resource_destroy(1).unwrap();
        assert_matches!(
            device.resource_destroy(1),
            Err(Error::NotFound(ObjectKind::Resource, 1))
        );
    }

    #[test]
    fn test_cursor_update_sends_image_or_nothing() {
        let mut presenter = mock_presenter(BackendProbe::default());
        presenter.expect_on_resource_created().return_const(());
        presenter
            .expect_on_cursor_updated()
            .withf(|id, _, _, data, w, h| *id == 2 && data.is_empty() && *w == 0 && *h == 0)
            .times(1)
            .return_const(());
        presenter
            .expect_on_cursor_updated()
            .withf(|id, hot_x, hot_y, data, w, h| {
                *id == 1 && (*hot_x, *hot_y) == (3, 4) && data.len() == 64 && (*w, *h) == (4, 4)
            })
            .times(1)
            .return_const(());
        presenter
            .expect_on_cursor_moved()
            .with(eq(0), eq(100), eq(200))
            .times(1)
            .return_const(());

        let mut device = GpuDevice::new(GpuConfig::default(), presenter);
        device.resource_create_2d(1, rgba(4, 4)).unwrap();
        device
            .attach_backing(1, vec![0xffu8; 64].into_boxed_slice())
            .unwrap();
        device.update_cursor(2, 0, 0).unwrap();
        device.update_cursor(1, 3, 4).unwrap();
        device.move_cursor(0, 100, 200).unwrap();

        assert_matches!(
            device.update_cursor(4096, 0, 0),
            Err(Error::IdOutOfRange { .. })
        );
        assert_matches!(
            device.move_cursor(16, 0, 0),
            Err(Error::IdOutOfRange {
                kind: ObjectKind::Scanout,
                ..
            })
        );
    }

    #[test]
    fn test_context_lifecycle_notifies_presenter() {
        let mut presenter = mock_presenter(BackendProbe::default());
        let mut seq = Sequence::new();
        presenter.expect_on_resource_created().return_const(());
        presenter
            .expect_on_context3d_created()
            .withf(|ctx, capset, name| *ctx == 1 && *capset == 2 && name == "gl")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        presenter
            .expect_on_context3d_attach_resource()
            .with(eq(1), eq(9))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        presenter
            .expect_on_context3d_submit()
            .withf(|ctx, commands| *ctx == 1 && commands == &[0xde, 0xad][..])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        presenter
            .expect_on_context3d_detach_resource()
            .with(eq(1), eq(9))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        presenter
            .expect_on_context3d_destroyed()
            .with(eq(1))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let mut device = GpuDevice::new(GpuConfig::default(), presenter);
        device.resource_create_2d(9, rgba(1, 1)).unwrap();
        device.context_create(1, 2, "gl").unwrap();
        device.context_attach_resource(1, 9).unwrap();
        // Attaching twice is not reported again.
        device.context_attach_resource(1, 9).unwrap();
        assert_matches!(
            device.context_attach_resource(1, 10),
            Err(Error::NotFound(ObjectKind::Resource, 10))
        );
        device.submit_3d(1, &[0xde, 0xad]).unwrap();
        assert_matches!(
            device.submit_3d(7, &[0]),
            Err(Error::NotFound(ObjectKind::Context, 7))
        );
        device.context_detach_resource(1, 9).unwrap();
        device.context_detach_resource(1, 9).unwrap();
        assert_eq!(device.context_destroy(1).unwrap(), 0);
        assert_eq!(device.stats().commands_submitted, 1);
    }

    #[test]
    fn test_destroying_resource_detaches_it_from_contexts() {
        let mut device = null_device();
        device.resource_create_2d(4, rgba(1, 1)).unwrap();
        device.context_create(1, 0, "").unwrap();
        device.context_attach_resource(1, 4).unwrap();
        device.resource_destroy(4).unwrap();
        assert!(!device.context(1).unwrap().has_resource(4));
    }

    #[test]
    fn test_context_destroy_reaps_fences() {
        let mut device = null_device();
        assert_matches!(
            device.create_fence(Some(3), 1),
            Err(Error::NotFound(ObjectKind::Context, 3))
        );
        device.context_create(3, 0, "").unwrap();
        device.create_fence(Some(3), 1).unwrap();
        device.create_fence(Some(3), 2).unwrap();
        device.create_fence(None, 3).unwrap();
        assert_eq!(device.stats().pending_fences, 3);

        assert!(!device.poll_fence(1));
        assert_eq!(device.context_destroy(3).unwrap(), 2);
        assert!(device.poll_fence(1));
        assert!(!device.poll_fence(3));
        assert_eq!(device.stats().pending_fences, 1);
    }

    #[test]
    fn test_context_zero_does_not_own_global_fences() {
        let mut device = null_device();
        device.create_fence(None, 5).unwrap();
        device.context_create(0, 0, "").unwrap();
        device.create_fence(Some(0), 6).unwrap();

        assert_eq!(device.context_destroy(0).unwrap(), 1);
        assert!(!device.poll_fence(5));
        assert_eq!(device.stats().pending_fences, 1);
        assert!(device.signal_fence(5));
        assert!(device.poll_fence(5));
    }

    #[test]
    fn test_fence_signal_and_poll() {
        let mut device = null_device();
        device.context_create(1, 0, "").unwrap();
        assert!(device.poll_fence(99));

        device.create_fence(Some(1), 10).unwrap();
        device.create_fence(Some(1), 11).unwrap();
        assert!(!device.poll_fence(10));
        assert_eq!(device.signal_context_fences(Some(1), 10), 1);
        assert!(device.poll_fence(10));
        assert!(device.poll_fence(10));

        assert!(device.signal_fence(11));
        assert!(!device.signal_fence(12));
        assert!(device.poll_fence(11));
    }

    #[test]
    fn test_fence_table_full_then_reaped() {
        let config = GpuConfigBuilder::default().set_max_fences(2).build().unwrap();
        let mut device = GpuDevice::new(config, NullPresenter);
        device.create_fence(None, 1).unwrap();
        device.create_fence(None, 2).unwrap();
        assert_matches!(
            device.create_fence(None, 3),
            Err(Error::OutOfCapacity(ObjectKind::Fence, 2))
        );
        device.signal_fence(1);
        assert!(device.poll_fence(1));
        device.create_fence(None, 3).unwrap();
    }

    #[test]
    fn test_blob_requires_capable_backend() {
        let blob = ResourceCreateBlob {
            resource_id: 1,
            blob_mem: 1,
            blob_flags: 1,
            blob_id: 0,
            size: 4096,
        };
        let mut device = null_device();
        assert_matches!(
            device.resource_create_blob(blob),
            Err(Error::InvalidState(ObjectKind::Resource, 1, _))
        );

        let mut presenter = mock_presenter(webgpu_probe());
        presenter
            .expect_on_resource_created()
            .with(eq(1), eq(0), eq(0), eq(0))
            .times(1)
            .return_const(());
        let mut device = GpuDevice::new(GpuConfig::default(), presenter);
        device.resource_create_blob(blob).unwrap();
        assert_eq!(device.resource_map_blob(1).unwrap().len(), 4096);
        device.resource_unmap_blob(1).unwrap();
        assert_eq!(device.stats().texture_memory, 4096);
        assert!(device.detach_backing(1).unwrap().is_some());
        assert_eq!(device.stats().texture_memory, 0);
    }

    #[test]
    fn test_reset_stats_keeps_allocation_and_gauges() {
        let mut device = null_device();
        device.resource_create_2d(1, rgba(2, 2)).unwrap();
        device
            .attach_backing(1, vec![0u8; 16].into_boxed_slice())
            .unwrap();
        device.transfer_to_host(1, Rect::new(0, 0, 2, 2), 0).unwrap();
        device.context_create(1, 0, "").unwrap();
        device.submit_3d(1, &[1]).unwrap();

        device.reset_stats();
        let stats = device.stats();
        assert_eq!(stats.bytes_uploaded, 0);
        assert_eq!(stats.commands_submitted, 0);
        assert_eq!(stats.resources_allocated, 1);
        assert_eq!(stats.texture_memory, 16);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut device = null_device();
        for id in 1..=3 {
            device.resource_create_2d(id, rgba(1, 1)).unwrap();
        }
        device
            .attach_backing(2, vec![0u8; 4].into_boxed_slice())
            .unwrap();
        device.set_scanout(0, 1, Rect::new(0, 0, 1, 1), true).unwrap();
        device.context_create(1, 0, "").unwrap();
        device.create_fence(Some(1), 1).unwrap();

        device.shutdown();

        assert!(!device.scanout(0).unwrap().enabled);
        assert_matches!(device.resource(1), Err(Error::NotFound(..)));
        assert_matches!(device.context(1), Err(Error::NotFound(..)));
        let stats = device.stats();
        assert_eq!(stats.texture_memory, 0);
        assert_eq!(stats.pending_fences, 0);
    }

    #[test]
    fn test_shutdown_notifies_presenter() {
        let mut presenter: MockPresenter = mock_presenter(BackendProbe::default());
        presenter.expect_on_resource_created().return_const(());
        presenter.expect_on_context3d_created().return_const(());
        presenter
            .expect_on_context3d_destroyed()
            .with(eq(4))
            .times(1)
            .return_const(());
        presenter
            .expect_on_resource_destroyed()
            .times(2)
            .return_const(());

        let mut device = GpuDevice::new(GpuConfig::default(), presenter);
        device.resource_create_2d(1, rgba(1, 1)).unwrap();
        device.resource_create_2d(2, rgba(1, 1)).unwrap();
        device.context_create(4, 0, "").unwrap();
        device.shutdown();
    }
}
