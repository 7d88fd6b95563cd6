// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! GPU compute-shader runtime.
//!
//! ```text
//! load:     ComputeProgram ──▶ WGSL per stage ──▶ create_pipeline
//!           (static input shape) ──▶ BufferSet
//! predict:  BufferSet for n elements (reused, or reallocated on a new n)
//!             ──▶ upload inputs (mapped on first use, queued after)
//!             ──▶ dispatch ceil(n / workgroup_size) per stage
//!             ──▶ copy output into MAP_READ | COPY_DST staging
//!             ──▶ map_read ──▶ JSON
//! unload:   destroy BufferSet and pipelines
//! ```
//!
//! Sessions run on a wgpu adapter when the `wgpu` feature is on and the
//! host has one, otherwise on [`SoftwareDevice`].
//!
//! A program comes from the bundle's model file when it is a
//! `compute-program`, otherwise it is synthesized from the manifest's
//! `operations`.

mod device;
#[cfg(feature = "wgpu")]
mod hardware;
mod shader;

pub use device::{BufferDescriptor, BufferId, ComputeDevice, DeviceStats, PipelineId, SoftwareDevice};
#[cfg(feature = "wgpu")]
pub use hardware::WgpuDevice;
pub use shader::{generate, ShaderModule, BOUNDS_GUARD};

use crate::adapter::{AdapterOptions, Backend, ManagedAdapter};
use crate::RuntimeError;
use device::lock;
use device_monitor::CapabilityReader;
use memory_manager::{BufferUsage, MemoryBudget};
use model_bundle::formats::ComputeProgram;
use model_bundle::{IoSpec, ModelBundle, ModelFormat, RuntimeKind};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tensor_core::{to_json, DType, Shape, Tensor, TensorView};

/// Which device a GPU session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceSelection {
    /// A hardware adapter when one exists, else the software device.
    #[default]
    Auto,
    Software,
}

/// Per-adapter GPU state.
pub struct GpuSession {
    device: Arc<dyn ComputeDevice>,
}

impl GpuSession {
    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }
}

/// Device buffers one model reuses across predictions, all sized for
/// `len` elements.
struct BufferSet {
    len: usize,
    arrays: HashMap<String, BufferId>,
    staging: Option<BufferId>,
    /// Inputs still mapped from creation.
    mapped: HashSet<String>,
}

impl BufferSet {
    fn allocate(
        device: &dyn ComputeDevice,
        program: &ComputeProgram,
        len: usize,
        map_inputs: bool,
    ) -> Result<Self, RuntimeError> {
        let mut set = Self {
            len,
            arrays: HashMap::new(),
            staging: None,
            mapped: HashSet::new(),
        };
        if let Err(e) = set.fill(device, program, map_inputs && device.supports_mapped_writes()) {
            set.release(device);
            return Err(e);
        }
        tracing::debug!(len, buffers = set.arrays.len() + 1, "GPU buffers allocated");
        Ok(set)
    }

    fn fill(&mut self, device: &dyn ComputeDevice, program: &ComputeProgram, map_inputs: bool) -> Result<(), RuntimeError> {
        let input_usage = BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC;
        for name in &program.inputs {
            let id = create(device, name, self.len, input_usage, map_inputs)?;
            self.arrays.insert(name.clone(), id);
            if map_inputs {
                self.mapped.insert(name.clone());
            }
        }
        for stage in &program.stages {
            if !self.arrays.contains_key(&stage.output) {
                let usage = BufferUsage::STORAGE | BufferUsage::COPY_SRC;
                let id = create(device, &stage.output, self.len, usage, false)?;
                self.arrays.insert(stage.output.clone(), id);
            }
        }
        let usage = BufferUsage::MAP_READ | BufferUsage::COPY_DST;
        self.staging = Some(create(device, "(staging)", self.len, usage, false)?);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<BufferId, RuntimeError> {
        self.arrays
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::execution(format!("array '{name}' has no buffer")))
    }

    /// Mapped-at-creation inputs take their first write zero-copy.
    fn upload(&mut self, device: &dyn ComputeDevice, name: &str, data: &[f32]) -> Result<(), RuntimeError> {
        let id = self.get(name)?;
        if self.mapped.remove(name) {
            device.write_mapped(id, data)
        } else {
            device.write_buffer(id, data)
        }
    }

    fn release(&mut self, device: &dyn ComputeDevice) {
        for (_, id) in self.arrays.drain() {
            device.destroy_buffer(id);
        }
        if let Some(id) = self.staging.take() {
            device.destroy_buffer(id);
        }
        self.mapped.clear();
    }
}

fn create(device: &dyn ComputeDevice, label: &str, len: usize, usage: BufferUsage, mapped: bool) -> Result<BufferId, RuntimeError> {
    device.create_buffer(&BufferDescriptor {
        label: label.to_string(),
        len,
        usage,
        mapped_at_creation: mapped,
    })
}

/// A compiled program and the buffers it runs in.
pub struct GpuModel {
    program: ComputeProgram,
    pipelines: Vec<PipelineId>,
    workgroup_size: u32,
    inputs: Vec<IoSpec>,
    buffers: Mutex<Option<BufferSet>>,
}

impl GpuModel {
    pub fn program(&self) -> &ComputeProgram {
        &self.program
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    /// Element count the model's buffers are currently sized for.
    pub fn buffer_len(&self) -> Option<usize> {
        lock(&self.buffers).as_ref().map(|set| set.len)
    }

    /// Element count fixed by the manifest, when the first program input
    /// declares a fully static shape.
    fn static_len(program: &ComputeProgram, specs: &[IoSpec]) -> Option<usize> {
        let first = program.inputs.first()?;
        let dims = specs.iter().find(|s| &s.name == first)?.shape.as_deref()?;
        dims.iter()
            .map(|&d| usize::try_from(d).ok())
            .product::<Option<usize>>()
    }

    /// Parses every program input, checking that lengths agree.
    fn read_inputs(&self, inputs: &Map<String, Value>) -> Result<(Shape, Vec<Tensor>), RuntimeError> {
        let mut shape: Option<Shape> = None;
        let mut tensors = Vec::with_capacity(self.program.inputs.len());
        for name in &self.program.inputs {
            let value = inputs
                .get(name)
                .ok_or_else(|| RuntimeError::validation(format!("missing compute input '{name}'")))?;
            let spec = self.inputs.iter().find(|s| &s.name == name);
            let tensor = Tensor::from_json(value, DType::F32, spec.and_then(|s| s.shape.as_deref()))
                .map_err(|e| RuntimeError::validation(format!("input '{name}': {e}")))?;
            match &shape {
                Some(expected) if expected.num_elements() != tensor.len() => {
                    return Err(RuntimeError::validation(format!(
                        "input '{name}' has {} elements, expected {}",
                        tensor.len(),
                        expected.num_elements()
                    )))
                }
                Some(_) => {}
                None => shape = Some(tensor.shape().clone()),
            }
            tensors.push(tensor);
        }
        let shape = shape.ok_or_else(|| RuntimeError::validation("compute program has no inputs"))?;
        Ok((shape, tensors))
    }
}

pub struct GpuBackend {
    reader: Arc<dyn CapabilityReader>,
    device: Option<Arc<dyn ComputeDevice>>,
    selection: DeviceSelection,
    budget: MemoryBudget,
    workgroup_size: u32,
}

impl GpuBackend {
    pub fn new(reader: Arc<dyn CapabilityReader>, budget: MemoryBudget, workgroup_size: u32) -> Self {
        Self {
            reader,
            device: None,
            selection: DeviceSelection::Auto,
            budget,
            workgroup_size,
        }
    }

    /// Uses `device` instead of opening one.
    pub fn with_device(mut self, device: Arc<dyn ComputeDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_selection(mut self, selection: DeviceSelection) -> Self {
        self.selection = selection;
        self
    }

    fn open_device(&self) -> Arc<dyn ComputeDevice> {
        #[cfg(feature = "wgpu")]
        {
            if self.selection == DeviceSelection::Auto {
                if let Some(device) = WgpuDevice::open() {
                    return Arc::new(device);
                }
                tracing::info!("no GPU adapter found, using the software device");
            }
        }
        Arc::new(SoftwareDevice::new(self.budget))
    }

    fn program_for(bundle: &ModelBundle) -> Result<ComputeProgram, RuntimeError> {
        if let Some((name, bytes)) = bundle.model_file() {
            if ModelFormat::detect(name, bytes) == Some(ModelFormat::ComputeProgram) {
                return Ok(ComputeProgram::parse(bytes)?);
            }
        }
        let manifest = bundle.manifest();
        if manifest.operations.is_empty() {
            return Err(RuntimeError::loading(format!(
                "bundle '{}' has neither a compute program nor operations",
                bundle.name()
            )));
        }
        let inputs: Vec<String> = manifest.inputs.iter().map(|s| s.name.clone()).collect();
        let output = manifest
            .outputs
            .first()
            .map_or("output", |spec| spec.name.as_str());
        Ok(ComputeProgram::from_operations(&manifest.operations, &inputs, output)?)
    }

    fn compile(session: &GpuSession, program: &ComputeProgram, workgroup_size: u32) -> Result<Vec<PipelineId>, RuntimeError> {
        let mut pipelines = Vec::with_capacity(program.stages.len());
        for (index, stage) in program.stages.iter().enumerate() {
            let module = generate(index, stage, workgroup_size);
            match session.device.create_pipeline(&module) {
                Ok(id) => pipelines.push(id),
                Err(e) => {
                    for id in pipelines {
                        session.device.destroy_pipeline(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(pipelines)
    }
}

impl Backend for GpuBackend {
    type Session = GpuSession;
    type Model = GpuModel;

    fn kind(&self) -> RuntimeKind {
        RuntimeKind::GpuCompute
    }

    fn initialize(&self) -> Result<GpuSession, RuntimeError> {
        let caps = self.reader.capture();
        if !caps.has_gpu_compute() {
            return Err(RuntimeError::initialization(
                "device exposes no GPU compute API",
            ));
        }
        let device = match &self.device {
            Some(device) => Arc::clone(device),
            None => self.open_device(),
        };
        tracing::info!(
            device = device.name(),
            selection = ?self.selection,
            gpu_memory = ?caps.gpu.memory_bytes,
            "GPU session created"
        );
        Ok(GpuSession { device })
    }

    fn load(&self, session: &GpuSession, bundle: &ModelBundle) -> Result<GpuModel, RuntimeError> {
        let program = Self::program_for(bundle)?;
        let workgroup_size = program.workgroup_size.unwrap_or(self.workgroup_size);
        let pipelines = Self::compile(session, &program, workgroup_size)?;

        let buffers = match GpuModel::static_len(&program, bundle.inputs()) {
            Some(len) => match BufferSet::allocate(session.device.as_ref(), &program, len, false) {
                Ok(set) => Some(set),
                Err(e) => {
                    for id in pipelines {
                        session.device.destroy_pipeline(id);
                    }
                    return Err(e);
                }
            },
            None => None,
        };
        tracing::debug!(
            stages = pipelines.len(),
            workgroup_size,
            preallocated = buffers.is_some(),
            "compute program compiled"
        );
        Ok(GpuModel {
            program,
            pipelines,
            workgroup_size,
            inputs: bundle.inputs().to_vec(),
            buffers: Mutex::new(buffers),
        })
    }

    fn predict(
        &self,
        session: &GpuSession,
        model: &GpuModel,
        inputs: &Map<String, Value>,
    ) -> Result<Value, RuntimeError> {
        let device = session.device.as_ref();
        let (shape, tensors) = model.read_inputs(inputs)?;
        let n = shape.num_elements();

        let mut slot = lock(&model.buffers);
        if slot.as_ref().map(|set| set.len) != Some(n) {
            if let Some(mut old) = slot.take() {
                tracing::debug!(from = old.len, to = n, "input length changed, reallocating GPU buffers");
                old.release(device);
            }
            *slot = Some(BufferSet::allocate(device, &model.program, n, true)?);
        }
        let set = slot
            .as_mut()
            .ok_or_else(|| RuntimeError::execution("model has no GPU buffers"))?;

        for (name, tensor) in model.program.inputs.iter().zip(&tensors) {
            set.upload(device, name, tensor.as_slice())?;
        }
        let workgroups = n.div_ceil(model.workgroup_size as usize) as u32;
        for (stage, pipeline) in model.program.stages.iter().zip(&model.pipelines) {
            let mut bindings = Vec::with_capacity(stage.inputs.len() + 1);
            for name in &stage.inputs {
                bindings.push(set.get(name)?);
            }
            bindings.push(set.get(&stage.output)?);
            device.dispatch(*pipeline, &bindings, workgroups)?;
        }

        let output = set.get(&model.program.output).map_err(|_| {
            RuntimeError::execution(format!("output '{}' was never written", model.program.output))
        })?;
        let staging = set
            .staging
            .ok_or_else(|| RuntimeError::execution("model has no staging buffer"))?;
        device.copy_buffer(output, staging, n)?;
        let data = device.map_read(staging)?;
        let view = TensorView::from_parts(&shape, DType::F32, &data)?;
        Ok(to_json(&view))
    }

    fn unload(&self, session: &GpuSession, model: &GpuModel) {
        if let Some(mut set) = lock(&model.buffers).take() {
            set.release(session.device.as_ref());
        }
        for id in &model.pipelines {
            session.device.destroy_pipeline(*id);
        }
    }
}

pub type GpuAdapter = ManagedAdapter<GpuBackend>;

pub fn gpu_adapter(options: AdapterOptions, reader: Arc<dyn CapabilityReader>) -> GpuAdapter {
    let backend = GpuBackend::new(reader, options.memory_budget, options.workgroup_size)
        .with_selection(options.gpu_device);
    ManagedAdapter::new(backend, options)
}
