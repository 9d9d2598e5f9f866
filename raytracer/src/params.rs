use std::mem::{offset_of, size_of};

use rt_utils::{BufferInitDescriptor, DeviceBuffer, DevicePtr, RayTracingDevice, TextureHandle, TraversableHandle};
use scene::{CameraType, Frustum};

use crate::error::{device_error, RenderResult};

/// Scales the user facing scene epsilon factor to world units.
pub const SCENE_EPSILON_SCALE: f32 = 1.0e-7;

/// The launch parameter block, `sysParameter` on the device.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SystemParameter {
    pub top_object: TraversableHandle,
    pub output_buffer: DevicePtr,
    pub light_definitions: DevicePtr,
    pub material_parameters: DevicePtr,
    pub env_texture: TextureHandle,
    pub env_cdf_u: DevicePtr,
    pub env_cdf_v: DevicePtr,
    pub env_width: u32,
    pub env_height: u32,
    pub env_integral: f32,
    /// Rotation of the environment around the up axis in the range [0, 1).
    pub env_rotation: f32,
    pub path_lengths: [i32; 2],
    pub iteration_index: i32,
    pub scene_epsilon: f32,
    pub num_lights: u32,
    pub camera_type: i32,
    pub camera_position: [f32; 3],
    pub camera_u: [f32; 3],
    pub camera_v: [f32; 3],
    pub camera_w: [f32; 3],
}

const _: () = assert!(size_of::<SystemParameter>() == 144);

impl SystemParameter {
    pub fn frustum(&self) -> Frustum {
        Frustum {
            position: self.camera_position,
            u: self.camera_u,
            v: self.camera_v,
            w: self.camera_w,
        }
    }

    pub fn set_frustum(&mut self, frustum: &Frustum) {
        self.camera_position = frustum.position;
        self.camera_u = frustum.u;
        self.camera_v = frustum.v;
        self.camera_w = frustum.w;
    }

    pub fn set_camera_type(&mut self, camera: CameraType) {
        self.camera_type = camera as i32;
    }
}

/// Byte range of one field inside [`SystemParameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    pub offset: usize,
    pub size: usize,
}

fn field_size<F>(_: fn(&SystemParameter) -> &F) -> usize {
    size_of::<F>()
}

macro_rules! span {
    ($field:ident) => {
        FieldSpan {
            offset: offset_of!(SystemParameter, $field),
            size: field_size(|p| &p.$field),
        }
    };
}

/// The fields that are updated on their own during rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterField {
    OutputBuffer,
    IterationIndex,
    EnvRotation,
    PathLengths,
    SceneEpsilon,
    CameraType,
    CameraPosition,
    CameraU,
    CameraV,
    CameraW,
}

impl ParameterField {
    pub fn span(self) -> FieldSpan {
        match self {
            ParameterField::OutputBuffer => span!(output_buffer),
            ParameterField::IterationIndex => span!(iteration_index),
            ParameterField::EnvRotation => span!(env_rotation),
            ParameterField::PathLengths => span!(path_lengths),
            ParameterField::SceneEpsilon => span!(scene_epsilon),
            ParameterField::CameraType => span!(camera_type),
            ParameterField::CameraPosition => span!(camera_position),
            ParameterField::CameraU => span!(camera_u),
            ParameterField::CameraV => span!(camera_v),
            ParameterField::CameraW => span!(camera_w),
        }
    }
}

/// The authoritative host copy of the parameter block and its device mirror.
///
/// Edits go to `host` first and are then pushed either field by field or as a whole block.
#[derive(Debug, Clone)]
pub struct UniformBlock {
    pub host: SystemParameter,
    buffer: DeviceBuffer,
}

impl UniformBlock {
    pub fn new<D: RayTracingDevice + ?Sized>(device: &mut D, host: SystemParameter) -> RenderResult<Self> {
        let buffer = BufferInitDescriptor::new(Some("System parameter"))
            .create_new_buffer(device, &[host])
            .map_err(device_error("parameter block"))?;
        Ok(Self { host, buffer })
    }

    pub fn ptr(&self) -> DevicePtr {
        self.buffer.ptr
    }

    pub fn size(&self) -> usize {
        self.buffer.size
    }

    pub fn upload_all<D: RayTracingDevice + ?Sized>(&self, device: &mut D) -> RenderResult<()> {
        self.buffer
            .write(device, 0, &[self.host])
            .map_err(device_error("parameter block"))
    }

    /// Copies exactly the bytes of `field` from the host copy.
    pub fn upload_field<D: RayTracingDevice + ?Sized>(&self, device: &mut D, field: ParameterField) -> RenderResult<()> {
        let span = field.span();
        let bytes = bytemuck::bytes_of(&self.host);
        self.buffer
            .write(device, span.offset, &bytes[span.offset..span.offset + span.size])
            .map_err(device_error("parameter block"))
    }

    pub fn upload_fields<D: RayTracingDevice + ?Sized>(&self, device: &mut D, fields: &[ParameterField]) -> RenderResult<()> {
        for &field in fields {
            self.upload_field(device, field)?;
        }
        Ok(())
    }

    pub fn destroy<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> RenderResult<()> {
        self.buffer.free(device).map_err(device_error("parameter block teardown"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_utils::{DeviceCall, HostDevice};

    #[test]
    fn test_field_spans() {
        assert_eq!(ParameterField::OutputBuffer.span(), FieldSpan { offset: 8, size: 8 });
        assert_eq!(ParameterField::EnvRotation.span(), FieldSpan { offset: 68, size: 4 });
        assert_eq!(ParameterField::PathLengths.span(), FieldSpan { offset: 72, size: 8 });
        assert_eq!(ParameterField::IterationIndex.span(), FieldSpan { offset: 80, size: 4 });
        assert_eq!(ParameterField::CameraPosition.span(), FieldSpan { offset: 96, size: 12 });
        assert_eq!(ParameterField::CameraW.span(), FieldSpan { offset: 132, size: 12 });
    }

    #[test]
    fn test_upload_field_copies_only_the_field() {
        let mut device = HostDevice::new();
        let mut block = UniformBlock::new(&mut device, SystemParameter::default()).unwrap();
        block.host.iteration_index = 7;
        block.host.num_lights = 3;
        device.clear_calls();

        block.upload_field(&mut device, ParameterField::IterationIndex).unwrap();
        assert_eq!(
            device.calls(),
            &[DeviceCall::CopyToDevice {
                dst: block.ptr().offset(80),
                len: 4,
            }]
        );

        let mirror: SystemParameter = device.memory().read_pod(block.ptr()).unwrap();
        assert_eq!(mirror.iteration_index, 7);
        // not uploaded yet
        assert_eq!(mirror.num_lights, 0);

        block.upload_all(&mut device).unwrap();
        let mirror: SystemParameter = device.memory().read_pod(block.ptr()).unwrap();
        assert_eq!(mirror, block.host);
    }

    #[test]
    fn test_frustum_round_trip() {
        let frustum = Frustum {
            position: [0.0, 1.0, 2.0],
            u: [1.0, 0.0, 0.0],
            v: [0.0, 1.0, 0.0],
            w: [0.0, 0.0, -1.0],
        };
        let mut parameter = SystemParameter::default();
        parameter.set_frustum(&frustum);
        assert_eq!(parameter.frustum(), frustum);
        parameter.set_camera_type(CameraType::Sphere);
        assert_eq!(parameter.camera_type, 2);
    }
}
