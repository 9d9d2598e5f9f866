use std::collections::{BTreeMap, HashMap};

use bytemuck::Pod;

use crate::device::{
    AccelBufferSizes, BuildInput, DeviceError, DevicePtr, DeviceResult, EntryPoint, ExternalBuffer, ModuleHandle,
    PipelineHandle, PipelineOptions, ProgramGroupDesc, ProgramGroupHandle, RayTracingDevice, SbtHeader,
    ShaderBindingTable, SharedBufferHandle, StackBudget, StackSizes, TextureDesc, TextureHandle,
    TraversableHandle, INSTANCE_RECORD_SIZE, SBT_HEADER_SIZE,
};

const BASE_ADDRESS: u64 = 0x1000_0000;
const ALLOCATION_ALIGNMENT: u64 = 256;
const MAX_ALLOCATION: usize = 1 << 32;
const INJECTED_FAILURE: i32 = 7001;
const INVALID_VALUE: i32 = 7002;

/// Byte addressed memory behind a [`HostDevice`].
pub struct HostMemory {
    allocations: BTreeMap<u64, Vec<u8>>,
    next_address: u64,
}

impl HostMemory {
    fn new() -> Self {
        Self {
            allocations: BTreeMap::new(),
            next_address: BASE_ADDRESS,
        }
    }

    fn alloc(&mut self, size: usize) -> DevicePtr {
        let address = self.next_address;
        let span = (size as u64).max(1).div_ceil(ALLOCATION_ALIGNMENT) * ALLOCATION_ALIGNMENT;
        self.next_address += span;
        self.allocations.insert(address, vec![0; size]);
        DevicePtr(address)
    }

    fn free(&mut self, ptr: DevicePtr) -> DeviceResult<()> {
        self.allocations
            .remove(&ptr.0)
            .map(|_| ())
            .ok_or(DeviceError::InvalidPointer(ptr.0))
    }

    /// Finds the allocation containing `len` bytes at `addr`, returns its base and the offset into it.
    fn locate(&self, addr: u64, len: usize) -> DeviceResult<(u64, usize)> {
        let (&base, data) = self
            .allocations
            .range(..=addr)
            .next_back()
            .ok_or(DeviceError::InvalidPointer(addr))?;
        let offset = (addr - base) as usize;
        if offset > data.len() {
            return Err(DeviceError::InvalidPointer(addr));
        }
        if offset + len > data.len() {
            return Err(DeviceError::OutOfBounds { addr, len });
        }
        Ok((base, offset))
    }

    pub fn read(&self, ptr: DevicePtr, len: usize) -> DeviceResult<&[u8]> {
        let (base, offset) = self.locate(ptr.0, len)?;
        let data = self.allocations.get(&base).ok_or(DeviceError::InvalidPointer(ptr.0))?;
        Ok(&data[offset..offset + len])
    }

    pub fn write(&mut self, ptr: DevicePtr, bytes: &[u8]) -> DeviceResult<()> {
        let (base, offset) = self.locate(ptr.0, bytes.len())?;
        let data = self.allocations.get_mut(&base).ok_or(DeviceError::InvalidPointer(ptr.0))?;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_pod<T: Pod>(&self, ptr: DevicePtr) -> DeviceResult<T> {
        let bytes = self.read(ptr, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn allocation_size(&self, ptr: DevicePtr) -> Option<usize> {
        self.allocations.get(&ptr.0).map(Vec::len)
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }
}

/// Host side stand-in for the ray generation program, run on every launch.
pub trait HostKernel {
    fn launch(&mut self, memory: &mut HostMemory, params: DevicePtr, width: u32, height: u32) -> DeviceResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccelKind {
    Triangles,
    Instances,
}

/// One entry of the [`HostDevice`] call log.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    Alloc { ptr: DevicePtr, size: usize },
    Free { ptr: DevicePtr },
    CopyToDevice { dst: DevicePtr, len: usize },
    CopyFromDevice { src: DevicePtr, len: usize },
    Synchronize,
    AccelBuild { kind: AccelKind, temp: DevicePtr, output: DevicePtr },
    CreateModule { handle: ModuleHandle, name: String },
    DestroyModule(ModuleHandle),
    CreateProgramGroup(ProgramGroupHandle),
    DestroyProgramGroup(ProgramGroupHandle),
    PackHeader(ProgramGroupHandle),
    LinkPipeline { pipeline: PipelineHandle, groups: usize },
    SetStackSize { pipeline: PipelineHandle, budget: StackBudget },
    DestroyPipeline(PipelineHandle),
    CreateTexture(TextureHandle),
    DestroyTexture(TextureHandle),
    RegisterShared { handle: SharedBufferHandle, size: usize },
    UnregisterShared(SharedBufferHandle),
    MapShared { handle: SharedBufferHandle, ptr: DevicePtr },
    UnmapShared(SharedBufferHandle),
    /// `params` is the content of the parameter block at the time of the launch.
    Launch {
        pipeline: PipelineHandle,
        params: Vec<u8>,
        sbt: ShaderBindingTable,
        width: u32,
        height: u32,
    },
}

struct SharedSlot {
    size: usize,
    backing: [DevicePtr; 2],
    next: usize,
    mapped: bool,
}

/// In-memory [`RayTracingDevice`].
///
/// Allocations are plain byte vectors and handles are sequential numbers. Every call is
/// appended to a log so the order of device work can be inspected afterwards. Shared
/// buffers are double buffered: consecutive maps hand out alternating addresses while the
/// content stays the same.
pub struct HostDevice {
    memory: HostMemory,
    calls: Vec<DeviceCall>,
    next_handle: u32,
    modules: HashMap<u32, String>,
    groups: HashMap<u32, ProgramGroupDesc>,
    /// Pipeline id to "stack budget applied".
    pipelines: HashMap<u32, bool>,
    textures: HashMap<u64, DevicePtr>,
    shared: HashMap<u32, SharedSlot>,
    stack_usage: HashMap<&'static str, u32>,
    failures: Vec<&'static str>,
    kernel: Option<Box<dyn HostKernel>>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    pub fn new() -> Self {
        Self {
            memory: HostMemory::new(),
            calls: Vec::new(),
            next_handle: 1,
            modules: HashMap::new(),
            groups: HashMap::new(),
            pipelines: HashMap::new(),
            textures: HashMap::new(),
            shared: HashMap::new(),
            stack_usage: HashMap::new(),
            failures: Vec::new(),
            kernel: None,
        }
    }

    /// Reports `bytes` of stack for every program group using the entry point `entry`.
    pub fn with_stack_usage(mut self, entry: &'static str, bytes: u32) -> Self {
        self.stack_usage.insert(entry, bytes);
        self
    }

    pub fn with_kernel(mut self, kernel: Box<dyn HostKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Makes the next call of `operation` (a trait method name) fail.
    pub fn fail_on(&mut self, operation: &'static str) {
        self.failures.push(operation);
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn memory(&self) -> &HostMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut HostMemory {
        &mut self.memory
    }

    /// Parameter block snapshots of all launches so far, in issue order.
    pub fn launches(&self) -> impl Iterator<Item = &[u8]> {
        self.calls.iter().filter_map(|call| match call {
            DeviceCall::Launch { params, .. } => Some(params.as_slice()),
            _ => None,
        })
    }

    pub fn live_modules(&self) -> usize {
        self.modules.len()
    }

    pub fn live_program_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn check(&mut self, operation: &'static str) -> DeviceResult<()> {
        if let Some(index) = self.failures.iter().position(|failure| *failure == operation) {
            self.failures.remove(index);
            return Err(DeviceError::Call {
                operation,
                code: INJECTED_FAILURE,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn invalid_value(operation: &'static str, message: impl Into<String>) -> DeviceError {
        DeviceError::Call {
            operation,
            code: INVALID_VALUE,
            message: message.into(),
        }
    }

    fn required_sizes(&self, input: &BuildInput) -> DeviceResult<AccelBufferSizes> {
        match *input {
            BuildInput::Triangles {
                vertices,
                vertex_count,
                vertex_stride,
                indices,
                triangle_count,
            } => {
                if vertex_stride < 12 {
                    return Err(Self::invalid_value("accel_compute_memory_usage", "vertex stride below float3"));
                }
                self.memory.read(vertices, vertex_count as usize * vertex_stride as usize)?;
                self.memory.read(indices, triangle_count as usize * 12)?;
                Ok(AccelBufferSizes {
                    output_size: 128 + 64 * triangle_count as usize,
                    temp_size: 256 + 32 * triangle_count as usize,
                })
            }
            BuildInput::Instances { instances, count } => {
                self.memory.read(instances, count as usize * INSTANCE_RECORD_SIZE)?;
                Ok(AccelBufferSizes {
                    output_size: 128 + 128 * count as usize,
                    temp_size: 256 + 16 * count as usize,
                })
            }
        }
    }

    fn check_module(&self, entry: Option<&EntryPoint>) -> DeviceResult<()> {
        match entry {
            Some(entry) if !self.modules.contains_key(&entry.module.0) => {
                Err(DeviceError::InvalidHandle("module", entry.module.0 as u64))
            }
            Some(entry) if entry.name.is_empty() => {
                Err(Self::invalid_value("create_program_group", "empty entry function name"))
            }
            _ => Ok(()),
        }
    }

    fn usage(&self, entry: Option<&EntryPoint>) -> u32 {
        entry
            .and_then(|entry| self.stack_usage.get(entry.name))
            .copied()
            .unwrap_or(0)
    }
}

impl RayTracingDevice for HostDevice {
    fn alloc(&mut self, size: usize) -> DeviceResult<DevicePtr> {
        self.check("alloc")?;
        if size > MAX_ALLOCATION {
            return Err(DeviceError::OutOfMemory(size));
        }
        let ptr = self.memory.alloc(size);
        self.calls.push(DeviceCall::Alloc { ptr, size });
        Ok(ptr)
    }

    fn free(&mut self, ptr: DevicePtr) -> DeviceResult<()> {
        self.check("free")?;
        self.memory.free(ptr)?;
        self.calls.push(DeviceCall::Free { ptr });
        Ok(())
    }

    fn copy_to_device(&mut self, dst: DevicePtr, bytes: &[u8]) -> DeviceResult<()> {
        self.check("copy_to_device")?;
        if !bytes.is_empty() {
            self.memory.write(dst, bytes)?;
        }
        self.calls.push(DeviceCall::CopyToDevice { dst, len: bytes.len() });
        Ok(())
    }

    fn copy_from_device(&mut self, src: DevicePtr, out: &mut [u8]) -> DeviceResult<()> {
        self.check("copy_from_device")?;
        if !out.is_empty() {
            out.copy_from_slice(self.memory.read(src, out.len())?);
        }
        self.calls.push(DeviceCall::CopyFromDevice { src, len: out.len() });
        Ok(())
    }

    fn synchronize(&mut self) -> DeviceResult<()> {
        self.check("synchronize")?;
        self.calls.push(DeviceCall::Synchronize);
        Ok(())
    }

    fn accel_compute_memory_usage(&mut self, input: &BuildInput) -> DeviceResult<AccelBufferSizes> {
        self.check("accel_compute_memory_usage")?;
        self.required_sizes(input)
    }

    fn accel_build(
        &mut self,
        input: &BuildInput,
        temp: DevicePtr,
        temp_size: usize,
        output: DevicePtr,
        output_size: usize,
    ) -> DeviceResult<TraversableHandle> {
        self.check("accel_build")?;
        let required = self.required_sizes(input)?;
        if temp_size < required.temp_size || output_size < required.output_size {
            return Err(Self::invalid_value("accel_build", "build buffers are smaller than required"));
        }
        self.memory.read(temp, required.temp_size)?;
        self.memory.read(output, required.output_size)?;

        let kind = match input {
            BuildInput::Triangles { .. } => AccelKind::Triangles,
            BuildInput::Instances { .. } => AccelKind::Instances,
        };
        self.calls.push(DeviceCall::AccelBuild { kind, temp, output });
        Ok(TraversableHandle(output.0))
    }

    fn create_module(&mut self, name: &str, binary: &[u8], _options: &PipelineOptions) -> DeviceResult<ModuleHandle> {
        self.check("create_module")?;
        if binary.is_empty() {
            return Err(Self::invalid_value("create_module", format!("empty program input for {}", name)));
        }
        let handle = ModuleHandle(self.handle());
        self.modules.insert(handle.0, name.to_string());
        self.calls.push(DeviceCall::CreateModule {
            handle,
            name: name.to_string(),
        });
        Ok(handle)
    }

    fn destroy_module(&mut self, module: ModuleHandle) -> DeviceResult<()> {
        self.check("destroy_module")?;
        self.modules
            .remove(&module.0)
            .ok_or(DeviceError::InvalidHandle("module", module.0 as u64))?;
        self.calls.push(DeviceCall::DestroyModule(module));
        Ok(())
    }

    fn create_program_group(&mut self, desc: &ProgramGroupDesc) -> DeviceResult<ProgramGroupHandle> {
        self.check("create_program_group")?;
        match desc {
            ProgramGroupDesc::Raygen(entry) | ProgramGroupDesc::Exception(entry) | ProgramGroupDesc::Callables(entry) => {
                self.check_module(Some(entry))?
            }
            ProgramGroupDesc::Miss(entry) => self.check_module(entry.as_ref())?,
            ProgramGroupDesc::Hitgroup { closest_hit, any_hit } => {
                self.check_module(closest_hit.as_ref())?;
                self.check_module(any_hit.as_ref())?;
            }
        }
        let handle = ProgramGroupHandle(self.handle());
        self.groups.insert(handle.0, *desc);
        self.calls.push(DeviceCall::CreateProgramGroup(handle));
        Ok(handle)
    }

    fn destroy_program_group(&mut self, group: ProgramGroupHandle) -> DeviceResult<()> {
        self.check("destroy_program_group")?;
        self.groups
            .remove(&group.0)
            .ok_or(DeviceError::InvalidHandle("program group", group.0 as u64))?;
        self.calls.push(DeviceCall::DestroyProgramGroup(group));
        Ok(())
    }

    fn program_group_stack_size(&mut self, group: ProgramGroupHandle) -> DeviceResult<StackSizes> {
        self.check("program_group_stack_size")?;
        let desc = *self
            .groups
            .get(&group.0)
            .ok_or(DeviceError::InvalidHandle("program group", group.0 as u64))?;
        let mut sizes = StackSizes::default();
        match desc {
            ProgramGroupDesc::Raygen(entry) => sizes.css_rg = self.usage(Some(&entry)),
            ProgramGroupDesc::Exception(_) => {}
            ProgramGroupDesc::Miss(entry) => sizes.css_ms = self.usage(entry.as_ref()),
            ProgramGroupDesc::Hitgroup { closest_hit, any_hit } => {
                sizes.css_ch = self.usage(closest_hit.as_ref());
                sizes.css_ah = self.usage(any_hit.as_ref());
            }
            ProgramGroupDesc::Callables(entry) => sizes.dss_dc = self.usage(Some(&entry)),
        }
        Ok(sizes)
    }

    fn link_pipeline(&mut self, groups: &[ProgramGroupHandle], _options: &PipelineOptions) -> DeviceResult<PipelineHandle> {
        self.check("link_pipeline")?;
        if groups.is_empty() {
            return Err(Self::invalid_value("link_pipeline", "no program groups"));
        }
        if let Some(missing) = groups.iter().find(|group| !self.groups.contains_key(&group.0)) {
            return Err(DeviceError::InvalidHandle("program group", missing.0 as u64));
        }
        let pipeline = PipelineHandle(self.handle());
        self.pipelines.insert(pipeline.0, false);
        self.calls.push(DeviceCall::LinkPipeline {
            pipeline,
            groups: groups.len(),
        });
        Ok(pipeline)
    }

    fn set_pipeline_stack_size(&mut self, pipeline: PipelineHandle, budget: &StackBudget) -> DeviceResult<()> {
        self.check("set_pipeline_stack_size")?;
        let applied = self
            .pipelines
            .get_mut(&pipeline.0)
            .ok_or(DeviceError::InvalidHandle("pipeline", pipeline.0 as u64))?;
        *applied = true;
        self.calls.push(DeviceCall::SetStackSize {
            pipeline,
            budget: *budget,
        });
        Ok(())
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> DeviceResult<()> {
        self.check("destroy_pipeline")?;
        self.pipelines
            .remove(&pipeline.0)
            .ok_or(DeviceError::InvalidHandle("pipeline", pipeline.0 as u64))?;
        self.calls.push(DeviceCall::DestroyPipeline(pipeline));
        Ok(())
    }

    fn pack_header(&mut self, group: ProgramGroupHandle) -> DeviceResult<SbtHeader> {
        self.check("pack_header")?;
        if !self.groups.contains_key(&group.0) {
            return Err(DeviceError::InvalidHandle("program group", group.0 as u64));
        }
        let mut header = [0u8; SBT_HEADER_SIZE];
        header[..4].copy_from_slice(&group.0.to_le_bytes());
        for (i, byte) in header.iter_mut().enumerate().skip(4) {
            *byte = (group.0 as u8).wrapping_mul(37).wrapping_add(i as u8);
        }
        self.calls.push(DeviceCall::PackHeader(group));
        Ok(header)
    }

    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> DeviceResult<TextureHandle> {
        self.check("create_texture")?;
        let expected = desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel();
        if expected == 0 || pixels.len() != expected {
            return Err(Self::invalid_value("create_texture", "pixel data does not match the texture size"));
        }
        let storage = self.memory.alloc(pixels.len());
        self.memory.write(storage, pixels)?;
        let handle = TextureHandle(self.handle() as u64);
        self.textures.insert(handle.0, storage);
        self.calls.push(DeviceCall::CreateTexture(handle));
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> DeviceResult<()> {
        self.check("destroy_texture")?;
        let storage = self
            .textures
            .remove(&texture.0)
            .ok_or(DeviceError::InvalidHandle("texture", texture.0))?;
        self.memory.free(storage)?;
        self.calls.push(DeviceCall::DestroyTexture(texture));
        Ok(())
    }

    fn register_shared_buffer(&mut self, _buffer: ExternalBuffer, size: usize) -> DeviceResult<SharedBufferHandle> {
        self.check("register_shared_buffer")?;
        if size == 0 {
            return Err(Self::invalid_value("register_shared_buffer", "zero sized shared buffer"));
        }
        let backing = [self.memory.alloc(size), self.memory.alloc(size)];
        let handle = SharedBufferHandle(self.handle());
        self.shared.insert(
            handle.0,
            SharedSlot {
                size,
                backing,
                next: 0,
                mapped: false,
            },
        );
        self.calls.push(DeviceCall::RegisterShared { handle, size });
        Ok(handle)
    }

    fn unregister_shared_buffer(&mut self, handle: SharedBufferHandle) -> DeviceResult<()> {
        self.check("unregister_shared_buffer")?;
        let slot = self
            .shared
            .get(&handle.0)
            .ok_or(DeviceError::InvalidHandle("shared buffer", handle.0 as u64))?;
        if slot.mapped {
            return Err(Self::invalid_value("unregister_shared_buffer", "shared buffer is still mapped"));
        }
        let backing = slot.backing;
        self.shared.remove(&handle.0);
        for ptr in backing {
            self.memory.free(ptr)?;
        }
        self.calls.push(DeviceCall::UnregisterShared(handle));
        Ok(())
    }

    fn map_shared_buffer(&mut self, handle: SharedBufferHandle) -> DeviceResult<(DevicePtr, usize)> {
        self.check("map_shared_buffer")?;
        let slot = self
            .shared
            .get_mut(&handle.0)
            .ok_or(DeviceError::InvalidHandle("shared buffer", handle.0 as u64))?;
        if slot.mapped {
            return Err(Self::invalid_value("map_shared_buffer", "shared buffer is already mapped"));
        }
        slot.mapped = true;
        let ptr = slot.backing[slot.next];
        let previous = slot.backing[slot.next ^ 1];
        slot.next ^= 1;
        let size = slot.size;
        // same buffer seen through a new address, its content carries over
        let content = self.memory.read(previous, size)?.to_vec();
        self.memory.write(ptr, &content)?;
        self.calls.push(DeviceCall::MapShared { handle, ptr });
        Ok((ptr, size))
    }

    fn unmap_shared_buffer(&mut self, handle: SharedBufferHandle) -> DeviceResult<()> {
        self.check("unmap_shared_buffer")?;
        let slot = self
            .shared
            .get_mut(&handle.0)
            .ok_or(DeviceError::InvalidHandle("shared buffer", handle.0 as u64))?;
        if !slot.mapped {
            return Err(Self::invalid_value("unmap_shared_buffer", "shared buffer is not mapped"));
        }
        slot.mapped = false;
        self.calls.push(DeviceCall::UnmapShared(handle));
        Ok(())
    }

    fn launch(
        &mut self,
        pipeline: PipelineHandle,
        params: DevicePtr,
        params_size: usize,
        sbt: &ShaderBindingTable,
        width: u32,
        height: u32,
    ) -> DeviceResult<()> {
        self.check("launch")?;
        match self.pipelines.get(&pipeline.0) {
            None => return Err(DeviceError::InvalidHandle("pipeline", pipeline.0 as u64)),
            Some(false) => return Err(Self::invalid_value("launch", "pipeline stack size was never set")),
            Some(true) => {}
        }
        let snapshot = self.memory.read(params, params_size)?.to_vec();
        self.calls.push(DeviceCall::Launch {
            pipeline,
            params: snapshot,
            sbt: *sbt,
            width,
            height,
        });
        if let Some(kernel) = self.kernel.as_mut() {
            kernel.launch(&mut self.memory, params, width, height)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PipelineOptions {
        PipelineOptions {
            num_payload_values: 2,
            num_attribute_values: 2,
            launch_params_name: "params".to_string(),
            max_trace_depth: 1,
            single_level_instancing: true,
            debug_exceptions: false,
        }
    }

    #[test]
    fn test_memory_offsets_inside_allocation() {
        let mut device = HostDevice::new();
        let ptr = device.alloc(16).unwrap();
        device.copy_to_device(ptr.offset(4), &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 16];
        device.copy_from_device(ptr, &mut out).unwrap();
        assert_eq!(&out[..8], &[0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_write_past_allocation() {
        let mut device = HostDevice::new();
        let ptr = device.alloc(4).unwrap();
        assert!(matches!(
            device.copy_to_device(ptr.offset(2), &[0; 4]),
            Err(DeviceError::OutOfBounds { len: 4, .. })
        ));
    }

    #[test]
    fn test_free_unknown_pointer() {
        let mut device = HostDevice::new();
        assert!(matches!(device.free(DevicePtr(42)), Err(DeviceError::InvalidPointer(42))));
    }

    #[test]
    fn test_injected_failure_only_once() {
        let mut device = HostDevice::new();
        device.fail_on("alloc");
        assert!(matches!(
            device.alloc(8),
            Err(DeviceError::Call { operation: "alloc", .. })
        ));
        assert!(device.alloc(8).is_ok());
    }

    #[test]
    fn test_launch_requires_stack_size() {
        let mut device = HostDevice::new();
        let module = device.create_module("raygen", b"binary", &options()).unwrap();
        let group = device
            .create_program_group(&ProgramGroupDesc::Raygen(EntryPoint { module, name: "__raygen__main" }))
            .unwrap();
        let pipeline = device.link_pipeline(&[group], &options()).unwrap();
        let params = device.alloc(4).unwrap();
        let sbt = ShaderBindingTable::default();

        assert!(device.launch(pipeline, params, 4, &sbt, 1, 1).is_err());
        device.set_pipeline_stack_size(pipeline, &StackBudget::default()).unwrap();
        assert!(device.launch(pipeline, params, 4, &sbt, 1, 1).is_ok());
        assert_eq!(device.launches().count(), 1);
    }

    #[test]
    fn test_stack_usage_by_group_kind() {
        let mut device = HostDevice::new()
            .with_stack_usage("__closesthit__main", 96)
            .with_stack_usage("__anyhit__main", 16);
        let module = device.create_module("hit", b"binary", &options()).unwrap();
        let group = device
            .create_program_group(&ProgramGroupDesc::Hitgroup {
                closest_hit: Some(EntryPoint { module, name: "__closesthit__main" }),
                any_hit: Some(EntryPoint { module, name: "__anyhit__main" }),
            })
            .unwrap();

        let sizes = device.program_group_stack_size(group).unwrap();
        assert_eq!(sizes.css_ch, 96);
        assert_eq!(sizes.css_ah, 16);
        assert_eq!(sizes.css_rg, 0);
    }

    #[test]
    fn test_program_group_with_unknown_module() {
        let mut device = HostDevice::new();
        let result = device.create_program_group(&ProgramGroupDesc::Callables(EntryPoint {
            module: ModuleHandle(99),
            name: "__direct_callable__x",
        }));
        assert!(matches!(result, Err(DeviceError::InvalidHandle("module", 99))));
    }

    #[test]
    fn test_accel_build_checks_buffer_sizes() {
        let mut device = HostDevice::new();
        let instances = device.alloc(INSTANCE_RECORD_SIZE).unwrap();
        let input = BuildInput::Instances { instances, count: 1 };
        let sizes = device.accel_compute_memory_usage(&input).unwrap();
        let temp = device.alloc(sizes.temp_size).unwrap();
        let output = device.alloc(sizes.output_size - 1).unwrap();

        assert!(device.accel_build(&input, temp, sizes.temp_size, output, sizes.output_size - 1).is_err());
    }

    #[test]
    fn test_headers_differ_per_group() {
        let mut device = HostDevice::new();
        let module = device.create_module("callables", b"binary", &options()).unwrap();
        let a = device.create_program_group(&ProgramGroupDesc::Callables(EntryPoint { module, name: "a" })).unwrap();
        let b = device.create_program_group(&ProgramGroupDesc::Callables(EntryPoint { module, name: "b" })).unwrap();
        assert_ne!(device.pack_header(a).unwrap(), device.pack_header(b).unwrap());
        assert_eq!(device.pack_header(a).unwrap(), device.pack_header(a).unwrap());
    }
}
