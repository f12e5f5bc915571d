// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use crate::{presenter::MockPresenter, BackendProbe, BackendType, GpuFeatures};

pub fn init_logger() {
    std::env::set_var("RUST_LOG", "trace");
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A mock presenter that reports `probe` once, when the device is built.
/// Every other notification needs its own expectation.
pub fn mock_presenter(probe: BackendProbe) -> MockPresenter {
    init_logger();
    let mut presenter = MockPresenter::new();
    presenter.expect_probe().times(1).return_const(probe);
    presenter
}

pub fn webgpu_probe() -> BackendProbe {
    BackendProbe {
        detected: BackendType::WebGpu,
        webgpu_compat: true,
        features: GpuFeatures::COMPUTE | GpuFeatures::STORAGE_BUFFER | GpuFeatures::FLOAT32,
        max_texture_size: 8192,
        vendor: "Test".to_string(),
        renderer: "WebGPU".to_string(),
    }
}
