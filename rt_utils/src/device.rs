use thiserror::Error;

/// Size of the opaque program selector at the start of every shader binding table record.
pub const SBT_HEADER_SIZE: usize = 32;
/// Every shader binding table record and record stride must be a multiple of this.
pub const SBT_RECORD_ALIGNMENT: usize = 16;

/// Size of one entry of the instance array consumed by a top-level build.
pub const INSTANCE_RECORD_SIZE: usize = 80;

pub type SbtHeader = [u8; SBT_HEADER_SIZE];

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors reported by a [`RayTracingDevice`].
///
/// Every variant is fatal for the operation that produced it. `Call` carries the
/// driver's own diagnostic code so it can be logged verbatim.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{operation} failed with code {code}: {message}")]
    Call {
        operation: &'static str,
        code: i32,
        message: String,
    },
    #[error("out of device memory while allocating {0} bytes")]
    OutOfMemory(usize),
    #[error("invalid device pointer {0:#x}")]
    InvalidPointer(u64),
    #[error("access of {len} bytes at {addr:#x} is outside of its allocation")]
    OutOfBounds { addr: u64, len: usize },
    #[error("unknown {0} handle {1}")]
    InvalidHandle(&'static str, u64),
}

/// A device virtual address.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    /// Address `bytes` past this one, inside the same allocation.
    pub fn offset(self, bytes: usize) -> Self {
        DevicePtr(self.0 + bytes as u64)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque handle of a built acceleration structure.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TraversableHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramGroupHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u32);

/// Texture object as it is stored inside device-side records.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TextureHandle(pub u64);

/// Buffer owned by the presentation layer (for example a pixel buffer object).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExternalBuffer(pub u32);

/// Registration of an [`ExternalBuffer`] with the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SharedBufferHandle(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccelBufferSizes {
    pub output_size: usize,
    pub temp_size: usize,
}

/// Input of a single acceleration structure build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildInput {
    /// Indexed triangles with a float3 position at the start of each vertex.
    Triangles {
        vertices: DevicePtr,
        vertex_count: u32,
        vertex_stride: u32,
        indices: DevicePtr,
        triangle_count: u32,
    },
    /// An array of instance records referencing bottom-level structures.
    Instances { instances: DevicePtr, count: u32 },
}

/// Per program group stack usage as reported by the device, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StackSizes {
    pub css_rg: u32,
    pub css_ms: u32,
    pub css_ch: u32,
    pub css_ah: u32,
    pub css_is: u32,
    pub css_cc: u32,
    pub dss_dc: u32,
}

impl StackSizes {
    /// Component-wise maximum.
    pub fn max(self, other: StackSizes) -> StackSizes {
        StackSizes {
            css_rg: self.css_rg.max(other.css_rg),
            css_ms: self.css_ms.max(other.css_ms),
            css_ch: self.css_ch.max(other.css_ch),
            css_ah: self.css_ah.max(other.css_ah),
            css_is: self.css_is.max(other.css_is),
            css_cc: self.css_cc.max(other.css_cc),
            dss_dc: self.dss_dc.max(other.dss_dc),
        }
    }
}

/// Stack reservation applied to a linked pipeline before it may be launched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StackBudget {
    pub direct_callable_from_traversal: u32,
    pub direct_callable_from_state: u32,
    pub continuation: u32,
    pub max_traversable_graph_depth: u32,
}

/// Compile and link options shared by every module of one pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineOptions {
    pub num_payload_values: u32,
    pub num_attribute_values: u32,
    pub launch_params_name: String,
    pub max_trace_depth: u32,
    pub single_level_instancing: bool,
    pub debug_exceptions: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub module: ModuleHandle,
    pub name: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgramGroupDesc {
    Raygen(EntryPoint),
    Exception(EntryPoint),
    /// A miss group without a program is valid, the ray then simply terminates.
    Miss(Option<EntryPoint>),
    Hitgroup {
        closest_hit: Option<EntryPoint>,
        any_hit: Option<EntryPoint>,
    },
    Callables(EntryPoint),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    Rgba32F,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba32F => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Wrap in u and clamp in v, as used for spherical environments.
    pub spherical: bool,
}

/// Device addresses of all shader binding table sections used by a launch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderBindingTable {
    pub raygen_record: DevicePtr,
    pub exception_record: DevicePtr,
    pub miss_record_base: DevicePtr,
    pub miss_record_stride: u32,
    pub miss_record_count: u32,
    pub hitgroup_record_base: DevicePtr,
    pub hitgroup_record_stride: u32,
    pub hitgroup_record_count: u32,
    pub callables_record_base: DevicePtr,
    pub callables_record_stride: u32,
    pub callables_record_count: u32,
}

/// Operations the renderer needs from a ray-tracing device and its single command stream.
///
/// Work issued through this trait is asynchronous past the point of issue. Only
/// [`RayTracingDevice::synchronize`] waits for previously issued work to finish.
pub trait RayTracingDevice {
    //-----------Memory-----------------
    fn alloc(&mut self, size: usize) -> DeviceResult<DevicePtr>;
    fn free(&mut self, ptr: DevicePtr) -> DeviceResult<()>;
    fn copy_to_device(&mut self, dst: DevicePtr, bytes: &[u8]) -> DeviceResult<()>;
    fn copy_from_device(&mut self, src: DevicePtr, out: &mut [u8]) -> DeviceResult<()>;
    fn synchronize(&mut self) -> DeviceResult<()>;

    //-----------Acceleration structures-----------------
    fn accel_compute_memory_usage(&mut self, input: &BuildInput) -> DeviceResult<AccelBufferSizes>;
    fn accel_build(
        &mut self,
        input: &BuildInput,
        temp: DevicePtr,
        temp_size: usize,
        output: DevicePtr,
        output_size: usize,
    ) -> DeviceResult<TraversableHandle>;

    //-----------Programs-----------------
    fn create_module(&mut self, name: &str, binary: &[u8], options: &PipelineOptions) -> DeviceResult<ModuleHandle>;
    fn destroy_module(&mut self, module: ModuleHandle) -> DeviceResult<()>;
    fn create_program_group(&mut self, desc: &ProgramGroupDesc) -> DeviceResult<ProgramGroupHandle>;
    fn destroy_program_group(&mut self, group: ProgramGroupHandle) -> DeviceResult<()>;
    fn program_group_stack_size(&mut self, group: ProgramGroupHandle) -> DeviceResult<StackSizes>;
    fn link_pipeline(&mut self, groups: &[ProgramGroupHandle], options: &PipelineOptions) -> DeviceResult<PipelineHandle>;
    fn set_pipeline_stack_size(&mut self, pipeline: PipelineHandle, budget: &StackBudget) -> DeviceResult<()>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> DeviceResult<()>;
    fn pack_header(&mut self, group: ProgramGroupHandle) -> DeviceResult<SbtHeader>;

    //-----------Textures-----------------
    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> DeviceResult<TextureHandle>;
    fn destroy_texture(&mut self, texture: TextureHandle) -> DeviceResult<()>;

    //-----------Shared output buffer-----------------
    fn register_shared_buffer(&mut self, buffer: ExternalBuffer, size: usize) -> DeviceResult<SharedBufferHandle>;
    fn unregister_shared_buffer(&mut self, handle: SharedBufferHandle) -> DeviceResult<()>;
    /// Maps the shared buffer for device access. The returned address is only valid until the matching unmap.
    fn map_shared_buffer(&mut self, handle: SharedBufferHandle) -> DeviceResult<(DevicePtr, usize)>;
    fn unmap_shared_buffer(&mut self, handle: SharedBufferHandle) -> DeviceResult<()>;

    //-----------Launch-----------------
    fn launch(
        &mut self,
        pipeline: PipelineHandle,
        params: DevicePtr,
        params_size: usize,
        sbt: &ShaderBindingTable,
        width: u32,
        height: u32,
    ) -> DeviceResult<()>;
}

/// Lets a borrowed device stand in for an owned one.
impl<T: RayTracingDevice + ?Sized> RayTracingDevice for &mut T {
    fn alloc(&mut self, size: usize) -> DeviceResult<DevicePtr> {
        (**self).alloc(size)
    }

    fn free(&mut self, ptr: DevicePtr) -> DeviceResult<()> {
        (**self).free(ptr)
    }

    fn copy_to_device(&mut self, dst: DevicePtr, bytes: &[u8]) -> DeviceResult<()> {
        (**self).copy_to_device(dst, bytes)
    }

    fn copy_from_device(&mut self, src: DevicePtr, out: &mut [u8]) -> DeviceResult<()> {
        (**self).copy_from_device(src, out)
    }

    fn synchronize(&mut self) -> DeviceResult<()> {
        (**self).synchronize()
    }

    fn accel_compute_memory_usage(&mut self, input: &BuildInput) -> DeviceResult<AccelBufferSizes> {
        (**self).accel_compute_memory_usage(input)
    }

    fn accel_build(
        &mut self,
        input: &BuildInput,
        temp: DevicePtr,
        temp_size: usize,
        output: DevicePtr,
        output_size: usize,
    ) -> DeviceResult<TraversableHandle> {
        (**self).accel_build(input, temp, temp_size, output, output_size)
    }

    fn create_module(&mut self, name: &str, binary: &[u8], options: &PipelineOptions) -> DeviceResult<ModuleHandle> {
        (**self).create_module(name, binary, options)
    }

    fn destroy_module(&mut self, module: ModuleHandle) -> DeviceResult<()> {
        (**self).destroy_module(module)
    }

    fn create_program_group(&mut self, desc: &ProgramGroupDesc) -> DeviceResult<ProgramGroupHandle> {
        (**self).create_program_group(desc)
    }

    fn destroy_program_group(&mut self, group: ProgramGroupHandle) -> DeviceResult<()> {
        (**self).destroy_program_group(group)
    }

    fn program_group_stack_size(&mut self, group: ProgramGroupHandle) -> DeviceResult<StackSizes> {
        (**self).program_group_stack_size(group)
    }

    fn link_pipeline(&mut self, groups: &[ProgramGroupHandle], options: &PipelineOptions) -> DeviceResult<PipelineHandle> {
        (**self).link_pipeline(groups, options)
    }

    fn set_pipeline_stack_size(&mut self, pipeline: PipelineHandle, budget: &StackBudget) -> DeviceResult<()> {
        (**self).set_pipeline_stack_size(pipeline, budget)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> DeviceResult<()> {
        (**self).destroy_pipeline(pipeline)
    }

    fn pack_header(&mut self, group: ProgramGroupHandle) -> DeviceResult<SbtHeader> {
        (**self).pack_header(group)
    }

    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> DeviceResult<TextureHandle> {
        (**self).create_texture(desc, pixels)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> DeviceResult<()> {
        (**self).destroy_texture(texture)
    }

    fn register_shared_buffer(&mut self, buffer: ExternalBuffer, size: usize) -> DeviceResult<SharedBufferHandle> {
        (**self).register_shared_buffer(buffer, size)
    }

    fn unregister_shared_buffer(&mut self, handle: SharedBufferHandle) -> DeviceResult<()> {
        (**self).unregister_shared_buffer(handle)
    }

    fn map_shared_buffer(&mut self, handle: SharedBufferHandle) -> DeviceResult<(DevicePtr, usize)> {
        (**self).map_shared_buffer(handle)
    }

    fn unmap_shared_buffer(&mut self, handle: SharedBufferHandle) -> DeviceResult<()> {
        (**self).unmap_shared_buffer(handle)
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
        (**self).launch(pipeline, params, params_size, sbt, width, height)
    }
}
