// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! [`ComputeDevice`] on a hardware adapter through wgpu.
//!
//! Every call is synchronous: submissions are followed by a blocking poll
//! so results are visible when the call returns. Validation failures are
//! captured with error scopes and surface as [`RuntimeError`]s.

use super::device::{check_shader, lock, BufferDescriptor, BufferId, ComputeDevice, DeviceStats, PipelineId};
use super::shader::ShaderModule;
use crate::{ErrorKind, RuntimeError};
use futures::executor::block_on;
use memory_manager::BufferUsage;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const ELEMENT_BYTES: u64 = std::mem::size_of::<f32>() as u64;

struct HardwareBuffer {
    label: String,
    buffer: wgpu::Buffer,
    len: usize,
    usage: BufferUsage,
    mapped: bool,
}

impl HardwareBuffer {
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

    fn check_len(&self, len: usize) -> Result<(), RuntimeError> {
        if len == self.len {
            Ok(())
        } else {
            Err(RuntimeError::execution(format!(
                "write of {len} elements into buffer '{}' of {}",
                self.label, self.len
            )))
        }
    }
}

struct HardwarePipeline {
    label: String,
    pipeline: wgpu::ComputePipeline,
    bindings: usize,
}

fn wgpu_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::STORAGE) || usage.contains(BufferUsage::STORAGE_READ) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    if usage.contains(BufferUsage::MAP_READ) {
        out |= wgpu::BufferUsages::MAP_READ;
    }
    if usage.contains(BufferUsage::MAP_WRITE) {
        out |= wgpu::BufferUsages::MAP_WRITE;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    out
}

fn byte_len(len: usize) -> u64 {
    len.max(1) as u64 * ELEMENT_BYTES
}

/// A wgpu device and queue on the first adapter the instance offers.
pub struct WgpuDevice {
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: Mutex<HashMap<BufferId, HardwareBuffer>>,
    pipelines: Mutex<HashMap<PipelineId, HardwarePipeline>>,
    next_id: AtomicU64,
    stats: Mutex<DeviceStats>,
}

impl WgpuDevice {
    /// Opens a hardware adapter, or `None` when the host has none.
    pub fn open() -> Option<Self> {
        block_on(Self::request())
    }

    async fn request() -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await?;
        let info = adapter.get_info();
        let request = adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("polyrt"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        );
        let (device, queue) = match request.await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(adapter = %info.name, error = %e, "GPU device request failed");
                return None;
            }
        };
        device.on_uncaptured_error(Box::new(|e: wgpu::Error| {
            tracing::error!(error = %e, "uncaptured GPU error");
        }));
        tracing::info!(adapter = %info.name, backend = ?info.backend, "GPU adapter opened");
        Some(Self {
            name: format!("wgpu:{}", info.name),
            device,
            queue,
            buffers: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: Mutex::new(DeviceStats::default()),
        })
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn missing(buffer: BufferId) -> RuntimeError {
        RuntimeError::execution(format!("device buffer {} does not exist", buffer.0))
    }

    /// Pops a validation scope pushed before a device call.
    fn scope_result(&self, kind: ErrorKind, what: &str) -> Result<(), RuntimeError> {
        match block_on(self.device.pop_error_scope()) {
            None => Ok(()),
            Some(err) => {
                let text = err.to_string();
                Err(RuntimeError::new(kind, format!("{what} rejected by the GPU")).with_native(text))
            }
        }
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(Some(encoder.finish()));
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}

impl ComputeDevice for WgpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_mapped_writes(&self) -> bool {
        true
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferId, RuntimeError> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label.as_str()),
            size: byte_len(desc.len),
            usage: wgpu_usage(desc.usage),
            mapped_at_creation: desc.mapped_at_creation,
        });
        let id = BufferId(self.next());
        lock(&self.buffers).insert(
            id,
            HardwareBuffer {
                label: desc.label.clone(),
                buffer,
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
        target.check_len(data.len())?;
        {
            let bytes: &[u8] = bytemuck::cast_slice(data);
            let mut view = target.buffer.slice(..).get_mapped_range_mut();
            view[..bytes.len()].copy_from_slice(bytes);
        }
        target.buffer.unmap();
        target.mapped = false;
        let mut stats = lock(&self.stats);
        stats.bytes_uploaded += std::mem::size_of_val(data) as u64;
        stats.zero_copy_uploads += 1;
        Ok(())
    }

    fn write_buffer(&self, buffer: BufferId, data: &[f32]) -> Result<(), RuntimeError> {
        let buffers = lock(&self.buffers);
        let target = buffers.get(&buffer).ok_or_else(|| Self::missing(buffer))?;
        target.require(BufferUsage::COPY_DST, "a queued write")?;
        target.check_len(data.len())?;
        if !data.is_empty() {
            self.queue.write_buffer(&target.buffer, 0, bytemuck::cast_slice(data));
        }
        lock(&self.stats).bytes_uploaded += std::mem::size_of_val(data) as u64;
        Ok(())
    }

    fn create_pipeline(&self, shader: &ShaderModule) -> Result<PipelineId, RuntimeError> {
        check_shader(shader)?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(shader.label.as_str()),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader.source.as_str())),
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(shader.label.as_str()),
            layout: None,
            module: &module,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        self.scope_result(ErrorKind::Loading, &format!("shader '{}'", shader.label))?;

        let id = PipelineId(self.next());
        lock(&self.pipelines).insert(
            id,
            HardwarePipeline {
                label: shader.label.clone(),
                pipeline,
                bindings: shader.bindings(),
            },
        );
        lock(&self.stats).pipelines_compiled += 1;
        tracing::debug!(shader = %shader.label, "pipeline compiled");
        Ok(id)
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        lock(&self.pipelines).remove(&pipeline);
    }

    fn dispatch(&self, pipeline: PipelineId, bindings: &[BufferId], workgroups: u32) -> Result<(), RuntimeError> {
        let pipelines = lock(&self.pipelines);
        let compiled = pipelines
            .get(&pipeline)
            .ok_or_else(|| RuntimeError::execution(format!("pipeline {} does not exist", pipeline.0)))?;
        if bindings.len() != compiled.bindings {
            return Err(RuntimeError::execution(format!(
                "shader '{}' binds {} buffers, got {}",
                compiled.label,
                compiled.bindings,
                bindings.len()
            )));
        }

        let buffers = lock(&self.buffers);
        let mut entries = Vec::with_capacity(bindings.len());
        for (binding, id) in bindings.iter().enumerate() {
            let buffer = buffers.get(id).ok_or_else(|| Self::missing(*id))?;
            buffer.require(BufferUsage::STORAGE, "binding")?;
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.buffer.as_entire_binding(),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let layout = compiled.pipeline.get_bind_group_layout(0);
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(compiled.label.as_str()),
            layout: &layout,
            entries: &entries,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(compiled.label.as_str()) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(compiled.label.as_str()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compiled.pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        self.submit(encoder);
        self.scope_result(ErrorKind::Execution, &format!("dispatch of '{}'", compiled.label))?;

        let mut stats = lock(&self.stats);
        stats.dispatches += 1;
        stats.workgroups += u64::from(workgroups);
        Ok(())
    }

    fn copy_buffer(&self, src: BufferId, dst: BufferId, len: usize) -> Result<(), RuntimeError> {
        let buffers = lock(&self.buffers);
        let source = buffers.get(&src).ok_or_else(|| Self::missing(src))?;
        source.require(BufferUsage::COPY_SRC, "a copy source")?;
        if len > source.len {
            return Err(RuntimeError::execution(format!(
                "copy of {len} elements overruns '{}'",
                source.label
            )));
        }
        let target = buffers.get(&dst).ok_or_else(|| Self::missing(dst))?;
        target.require(BufferUsage::COPY_DST, "a copy target")?;
        if len > target.len {
            return Err(RuntimeError::execution(format!("copy of {len} elements overruns target")));
        }
        if len == 0 {
            return Ok(());
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("copy") });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &target.buffer, 0, len as u64 * ELEMENT_BYTES);
        self.submit(encoder);
        Ok(())
    }

    fn map_read(&self, buffer: BufferId) -> Result<Vec<f32>, RuntimeError> {
        let buffers = lock(&self.buffers);
        let source = buffers.get(&buffer).ok_or_else(|| Self::missing(buffer))?;
        source.require(BufferUsage::MAP_READ, "mapping")?;

        let slice = source.buffer.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match block_on(rx) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(RuntimeError::execution(format!("mapping '{}' failed", source.label))
                    .with_native(e.to_string()))
            }
            Err(_) => {
                return Err(RuntimeError::execution(format!(
                    "mapping '{}' was abandoned",
                    source.label
                )))
            }
        }
        let data = {
            let view = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&view)[..source.len].to_vec()
        };
        source.buffer.unmap();
        lock(&self.stats).bytes_read_back += std::mem::size_of_val(data.as_slice()) as u64;
        Ok(data)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        if let Some(removed) = lock(&self.buffers).remove(&buffer) {
            removed.buffer.destroy();
        }
    }

    fn live_buffers(&self) -> usize {
        lock(&self.buffers).len()
    }

    fn stats(&self) -> DeviceStats {
        lock(&self.stats).clone()
    }
}
