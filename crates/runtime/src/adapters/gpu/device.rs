// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device boundary of the compute runtime.
//!
//! [`ComputeDevice`] mirrors the calls a WebGPU-class API exposes: buffers
//! with usage flags, pipelines from WGSL, dispatches over bind groups,
//! buffer copies and mapped reads. [`SoftwareDevice`] implements it on the
//! CPU, running each kernel lane by lane behind the same bounds guard the
//! shader carries. It backs sessions when no hardware adapter is found.

use super::shader::{eval_lane, ShaderModule, BOUNDS_GUARD};
use crate::RuntimeError;
use memory_manager::{BufferPool, BufferUsage, MemoryBudget, PooledBuffer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(super) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub(super) u64);

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: String,
    /// Length in `f32` elements.
    pub len: usize,
    pub usage: BufferUsage,
    /// Created mapped so the host can write it without a queued copy.
    pub mapped_at_creation: bool,
}

/// Counters kept by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub dispatches: u64,
    pub workgroups: u64,
    pub bytes_uploaded: u64,
    pub bytes_read_back: u64,
    pub zero_copy_uploads: u64,
    pub pipelines_compiled: u64,
    pub buffers_created: u64,
}

pub trait ComputeDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Whether buffers can be written while mapped at creation.
    fn supports_mapped_writes(&self) -> bool;

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferId, RuntimeError>;

    /// Fills a buffer created with `mapped_at_creation` and unmaps it.
    fn write_mapped(&self, buffer: BufferId, data: &[f32]) -> Result<(), RuntimeError>;

    /// Queues a write into a `COPY_DST` buffer.
    fn write_buffer(&self, buffer: BufferId, data: &[f32]) -> Result<(), RuntimeError>;

    fn create_pipeline(&self, shader: &ShaderModule) -> Result<PipelineId, RuntimeError>;

    fn destroy_pipeline(&self, pipeline: PipelineId);

    /// Runs `workgroups` workgroups of `pipeline`. `bindings` lists the
    /// operand buffers followed by the output buffer.
    fn dispatch(&self, pipeline: PipelineId, bindings: &[BufferId], workgroups: u32) -> Result<(), RuntimeError>;

    /// Copies `len` elements from a `COPY_SRC` buffer into a `COPY_DST` one.
    fn copy_buffer(&self, src: BufferId, dst: BufferId, len: usize) -> Result<(), RuntimeError>;

    /// Maps a `MAP_READ` buffer and returns its contents.
    fn map_read(&self, buffer: BufferId) -> Result<Vec<f32>, RuntimeError>;

    fn destroy_buffer(&self, buffer: BufferId);

    /// Buffers currently alive on the device.
    fn live_buffers(&self) -> usize;

    fn stats(&self) -> DeviceStats;
}

/// Rejects shaders without the bounds guard or the declared workgroup size.
pub(super) fn check_shader(shader: &ShaderModule) -> Result<(), RuntimeError> {
    if !shader.source.contains(BOUNDS_GUARD) {
        return Err(RuntimeError::loading(format!(
            "shader '{}' indexes without a bounds guard",
            shader.label
        )));
    }
    let declared = format!("@workgroup_size({})", shader.workgroup_size);
    if shader.workgroup_size == 0 || !shader.source.contains(&declared) {
        return Err(RuntimeError::loading(format!(
            "shader '{}' does not declare workgroup size {}",
            shader.label, shader.workgroup_size
        )));
    }
    Ok(())
}

struct DeviceBuffer {
    label: String,
    storage: PooledBuffer,
    /// Logical length; storage holds at least one element.
    len: usize,
    usage: BufferUsage,
    mapped: bool,
}

impl DeviceBuffer {
    fn data(&self) -> &[f32] {
        &self.storage.as_slice()[..self.len]
    }

    fn data_mut(&mut self) -> &mut [f32] {
        &mut self.storage.as_mut_slice()[..self.len]
    }

    fn require(&self, usage: BufferUsage, what: &str) -> Result<(), RuntimeError> {
        if self.usage.contains(usage) {
            Ok(())
        } else {
            Err(RuntimeError::execution(format!(
                "buffer '{}' lacks {usage:?} usage required for {what}",
                self.label
            )))
        }
    }
}

/// A CPU-backed [`ComputeDevice`] drawing buffers from a [`BufferPool`].
pub struct SoftwareDevice {
    pool: BufferPool,
    mapped_writes: bool,
    buffers: Mutex<HashMap<BufferId, DeviceBuffer>>,
    pipelines: Mutex<HashMap<PipelineId, ShaderModule>>,
    next_id: AtomicU64,
    stats: Mutex<DeviceStats>,
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SoftwareDevice {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            pool: BufferPool::new(budget),
            mapped_writes: true,
            buffers: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: Mutex::new(DeviceStats::default()),
        }
    }

    /// Disables mapped-at-creation writes, forcing queued uploads.
    pub fn without_mapped_writes(mut self) -> Self {
        self.mapped_writes = false;
        self
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn missing(buffer: BufferId) -> RuntimeError {
        RuntimeError::execution(format!("device buffer {} does not exist", buffer.0))
    }
}

impl ComputeDevice for SoftwareDevice {
    fn name(&self) -> &str {
        "software"
    }

    fn supports_mapped_writes(&self) -> bool {
        self.mapped_writes
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferId, RuntimeError> {
        if desc.mapped_at_creation && !self.mapped_writes {
            return Err(RuntimeError::execution("device does not support mapped writes"));
        }
        let storage = self.pool.allocate(desc.len.max(1), desc.usage)?;
        let id = BufferId(self.next());
        lock(&self.buffers).insert(
            id,
            DeviceBuffer {
                label: desc.label.clone(),
                storage,
                len: desc.len,
                usage: desc.usage,
                mapped: desc.mapped_at_creation,
            },
        );
        lock(&self.stats).buffers_created += 1;
        Ok(id)
    }

    fn write_mapped(&self, buffer: BufferId, data: &[f32]) -> Result<(), RuntimeError> {
        let mut buffers = lock(&self.buffers);
        let target = buffers.get_mut(&buffer).ok_or_else(|| Self::missing(buffer))?;
        if !target.mapped {
            return Err(RuntimeError::execution(format!(
                "buffer '{}' is not mapped",
                target.label
            )));
        }
        if data.len() != target.len {
            return Err(RuntimeError::execution(format!(
                "write of {} elements into buffer '{}' of {}",
                data.len(),
                target.label,
                target.len
            )));
        }
        target.data_mut().copy_from_slice(data);
        target.mapped = false;
        let mut stats = lock(&self.stats);
        stats.bytes_uploaded += std::mem::size_of_val(data) as u64;
        stats.zero_copy_uploads += 1;
        Ok(())
    }

    fn write_buffer(&self, buffer: BufferId, data: &[f32]) -> Result<(), RuntimeError> {
        let mut buffers = lock(&self.buffers);
        let target = buffers.get_mut(&buffer).ok_or_else(|| Self::missing(buffer))?;
        target.require(BufferUsage::COPY_DST, "a queued write")?;
        if data.len() != target.len {
            return Err(RuntimeError::execution(format!(
                "write of {} elements into buffer '{}' of {}",
                data.len(),
                target.label,
                target.len
            )));
        }
        target.data_mut().copy_from_slice(data);
        lock(&self.stats).bytes_uploaded += std::mem::size_of_val(data) as u64;
        Ok(())
    }

    fn create_pipeline(&self, shader: &ShaderModule) -> Result<PipelineId, RuntimeError> {
        check_shader(shader)?;
        let id = PipelineId(self.next());
        lock(&self.pipelines).insert(id, shader.clone());
        lock(&self.stats).pipelines_compiled += 1;
        tracing::debug!(shader = %shader.label, "pipeline compiled");
        Ok(id)
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        lock(&self.pipelines).remove(&pipeline);
    }

    fn dispatch(&self, pipeline: PipelineId, bindings: &[BufferId], workgroups: u32) -> Result<(), RuntimeError> {
        let shader = lock(&self.pipelines)
            .get(&pipeline)
            .cloned()
            .ok_or_else(|| RuntimeError::execution(format!("pipeline {} does not exist", pipeline.0)))?;
        if bindings.len() != shader.bindings() {
            return Err(RuntimeError::execution(format!(
                "shader '{}' binds {} buffers, got {}",
                shader.label,
                shader.bindings(),
                bindings.len()
            )));
        }
        let (out_id, operand_ids) = bindings
            .split_last()
            .ok_or_else(|| RuntimeError::execution("dispatch without bindings"))?;

        let mut buffers = lock(&self.buffers);
        let mut operands = Vec::with_capacity(operand_ids.len());
        for id in operand_ids {
            let buffer = buffers.get(id).ok_or_else(|| Self::missing(*id))?;
            buffer.require(BufferUsage::STORAGE, "binding")?;
            operands.push(buffer.data().to_vec());
        }
        let out = buffers.get_mut(out_id).ok_or_else(|| Self::missing(*out_id))?;
        out.require(BufferUsage::STORAGE, "binding")?;
        let dst = out.data_mut();

        let size = shader.workgroup_size as usize;
        for group in 0..workgroups as usize {
            for lane in 0..size {
                let i = group * size + lane;
                if i >= dst.len() {
                    continue;
                }
                let a = operands[0].get(i).copied().unwrap_or(0.0);
                let b = operands.get(1).and_then(|o| o.get(i)).copied().unwrap_or(0.0);
                dst[i] = eval_lane(shader.op, shader.factor, a, b);
            }
        }

        let mut stats = lock(&self.stats);
        stats.dispatches += 1;
        stats.workgroups += u64::from(workgroups);
        Ok(())
    }

    fn copy_buffer(&self, src: BufferId, dst: BufferId, len: usize) -> Result<(), RuntimeError> {
        let mut buffers = lock(&self.buffers);
        let source = buffers.get(&src).ok_or_else(|| Self::missing(src))?;
        source.require(BufferUsage::COPY_SRC, "a copy source")?;
        let data = source.data().get(..len).map(<[f32]>::to_vec).ok_or_else(|| {
            RuntimeError::execution(format!("copy of {len} elements overruns '{}'", source.label))
        })?;
        let target = buffers.get_mut(&dst).ok_or_else(|| Self::missing(dst))?;
        target.require(BufferUsage::COPY_DST, "a copy target")?;
        let slot = target.data_mut().get_mut(..len).ok_or_else(|| {
            RuntimeError::execution(format!("copy of {len} elements overruns target"))
        })?;
        slot.copy_from_slice(&data);
        Ok(())
    }

    fn map_read(&self, buffer: BufferId) -> Result<Vec<f32>, RuntimeError> {
        let buffers = lock(&self.buffers);
        let source = buffers.get(&buffer).ok_or_else(|| Self::missing(buffer))?;
        source.require(BufferUsage::MAP_READ, "mapping")?;
        let data = source.data().to_vec();
        lock(&self.stats).bytes_read_back += std::mem::size_of_val(data.as_slice()) as u64;
        Ok(data)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        lock(&self.buffers).remove(&buffer);
    }

    fn live_buffers(&self) -> usize {
        lock(&self.buffers).len()
    }

    fn stats(&self) -> DeviceStats {
        lock(&self.stats).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::gpu::shader::generate;
    use model_bundle::formats::{ComputeOp, ComputeStage};

    fn device() -> SoftwareDevice {
        SoftwareDevice::new(MemoryBudget::from_mb(1))
    }

    fn desc(len: usize, usage: BufferUsage) -> BufferDescriptor {
        BufferDescriptor {
            label: "t".into(),
            len,
            usage,
            mapped_at_creation: false,
        }
    }

    fn neg_pipeline(dev: &SoftwareDevice, workgroup_size: u32) -> PipelineId {
        let stage = ComputeStage {
            op: ComputeOp::Neg,
            inputs: vec!["x".into()],
            output: "out".into(),
            factor: None,
        };
        dev.create_pipeline(&generate(0, &stage, workgroup_size)).unwrap()
    }

    #[test]
    fn test_guard_stops_extra_lanes() {
        let dev = device();
        let io = BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC;
        let x = dev.create_buffer(&desc(5, io)).unwrap();
        let out = dev.create_buffer(&desc(5, io)).unwrap();
        dev.write_buffer(x, &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();

        let pipeline = neg_pipeline(&dev, 4);
        dev.dispatch(pipeline, &[x, out], 2).unwrap();

        let staging = dev
            .create_buffer(&desc(5, BufferUsage::MAP_READ | BufferUsage::COPY_DST))
            .unwrap();
        dev.copy_buffer(out, staging, 5).unwrap();
        assert_eq!(dev.map_read(staging).unwrap(), vec![-1.0, -2.0, -3.0, -4.0, -5.0]);

        let stats = dev.stats();
        assert_eq!(stats.dispatches, 1);
        assert_eq!(stats.workgroups, 2);
        assert_eq!(stats.bytes_uploaded, 20);
        assert_eq!(stats.bytes_read_back, 20);
    }

    #[test]
    fn test_unguarded_shader_rejected() {
        let dev = device();
        let stage = ComputeStage {
            op: ComputeOp::Relu,
            inputs: vec!["x".into()],
            output: "out".into(),
            factor: None,
        };
        let mut module = generate(0, &stage, 64);
        module.source = module.source.replace(BOUNDS_GUARD, "");
        assert!(dev.create_pipeline(&module).is_err());
    }

    #[test]
    fn test_usage_flags_enforced() {
        let dev = device();
        let buffer = dev.create_buffer(&desc(4, BufferUsage::STORAGE)).unwrap();
        assert!(dev.write_buffer(buffer, &[0.0; 4]).is_err());
        assert!(dev.map_read(buffer).is_err());
    }

    #[test]
    fn test_mapped_write_counts_zero_copy() {
        let dev = device();
        let mut d = desc(2, BufferUsage::STORAGE);
        d.mapped_at_creation = true;
        let buffer = dev.create_buffer(&d).unwrap();
        dev.write_mapped(buffer, &[1.0, 2.0]).unwrap();
        assert!(dev.write_mapped(buffer, &[1.0, 2.0]).is_err());
        assert_eq!(dev.stats().zero_copy_uploads, 1);

        let queued_only = SoftwareDevice::new(MemoryBudget::from_mb(1)).without_mapped_writes();
        assert!(queued_only.create_buffer(&d).is_err());
    }

    #[test]
    fn test_destroy_returns_storage_to_pool() {
        let dev = device();
        let buffer = dev.create_buffer(&desc(8, BufferUsage::STORAGE)).unwrap();
        assert_eq!(dev.pool().live_buffers(), 1);
        dev.destroy_buffer(buffer);
        assert_eq!(dev.live_buffers(), 0);
        assert_eq!(dev.pool().live_buffers(), 0);
    }
}
