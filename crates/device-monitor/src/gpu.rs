// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! GPU presence and API class.
//!
//! A DRM render node (`dev/dri/renderD*`) means a shader-capable GPU. The
//! compute class cannot be inferred from sysfs; hosts declare it through
//! [`GPU_OVERRIDE_ENV`](crate::GPU_OVERRIDE_ENV), which also forces `none`.

use crate::sysfs::{list_dir, read_parsed};
use crate::{GpuInfo, GpuKind};
use std::path::Path;

const DRI_DIR: &str = "dev/dri";
const DRM_CLASS_DIR: &str = "sys/class/drm";

pub(crate) fn read_gpu(root: &Path, kind_override: Option<GpuKind>) -> GpuInfo {
    let render_node = list_dir(&root.join(DRI_DIR))
        .iter()
        .any(|name| name.starts_with("renderD"));

    let kind = match (kind_override, render_node) {
        (Some(kind), _) => kind,
        (None, true) => GpuKind::Shader,
        (None, false) => GpuKind::None,
    };
    if kind == GpuKind::None {
        return GpuInfo::none();
    }

    GpuInfo {
        available: true,
        kind,
        memory_bytes: read_vram(root),
    }
}

/// Largest `mem_info_vram_total` reported by any DRM card.
fn read_vram(root: &Path) -> Option<u64> {
    let drm = root.join(DRM_CLASS_DIR);
    list_dir(&drm)
        .iter()
        .filter(|name| name.starts_with("card") && !name.contains('-'))
        .filter_map(|card| {
            read_parsed::<u64>(&drm.join(card).join("device/mem_info_vram_total")).ok()
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_no_gpu() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_gpu(dir.path(), None), GpuInfo::none());
    }

    #[test]
    fn test_render_node_is_shader() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "dev/dri/renderD128", "");
        touch(dir.path(), "sys/class/drm/card0/device/mem_info_vram_total", "8589934592\n");
        touch(dir.path(), "sys/class/drm/card0-HDMI-A-1/status", "connected");

        let gpu = read_gpu(dir.path(), None);
        assert!(gpu.available);
        assert_eq!(gpu.kind, GpuKind::Shader);
        assert_eq!(gpu.memory_bytes, Some(8_589_934_592));
    }

    #[test]
    fn test_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_gpu(dir.path(), Some(GpuKind::Compute)).kind, GpuKind::Compute);

        touch(dir.path(), "dev/dri/renderD128", "");
        assert!(!read_gpu(dir.path(), Some(GpuKind::None)).available);
    }
}
