//! # rt_utils
//!
//! Thin layer between the renderer and a ray-tracing capable device.
//!
//! - `device`: the [`RayTracingDevice`] trait, opaque handles and the error type every call returns.
//! - `buffer`: helpers for creating and writing device buffers from `bytemuck` data.
//! - `interop`: scoped mapping of a buffer shared with the presentation layer.
//! - `host`: [`HostDevice`], an in-memory device that records every call.
mod buffer;
mod device;
mod host;
mod interop;

pub use buffer::{BufferInitDescriptor, DeviceBuffer};
pub use device::{
    AccelBufferSizes, BuildInput, DeviceError, DeviceResult, DevicePtr, EntryPoint, ExternalBuffer,
    ModuleHandle, PipelineHandle, PipelineOptions, ProgramGroupDesc, ProgramGroupHandle,
    RayTracingDevice, SbtHeader, ShaderBindingTable, SharedBufferHandle, StackBudget, StackSizes,
    TextureDesc, TextureFormat, TextureHandle, TraversableHandle, INSTANCE_RECORD_SIZE,
    SBT_HEADER_SIZE, SBT_RECORD_ALIGNMENT,
};
pub use host::{AccelKind, DeviceCall, HostDevice, HostKernel, HostMemory};
pub use interop::MappedBuffer;
