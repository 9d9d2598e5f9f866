use rt_utils::{BufferInitDescriptor, BuildInput, DeviceBuffer, RayTracingDevice, TraversableHandle, INSTANCE_RECORD_SIZE};

use crate::error::{device_error, RenderResult};
use crate::programs::NUM_RAY_TYPES;

pub const VISIBILITY_MASK_ALL: u32 = 255;

/// Row major 3x4 object to world transform.
pub type Transform = [f32; 12];

pub const IDENTITY: Transform = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
];

/// Uniform scale followed by a translation.
pub fn scale_translate(scale: f32, translation: [f32; 3]) -> Transform {
    [
        scale, 0.0, 0.0, translation[0],
        0.0, scale, 0.0, translation[1],
        0.0, 0.0, scale, translation[2],
    ]
}

/// One entry of the top-level build input, laid out as the device expects it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRecord {
    pub transform: Transform,
    pub instance_id: u32,
    pub sbt_offset: u32,
    pub visibility_mask: u32,
    pub flags: u32,
    pub traversable_handle: TraversableHandle,
    pub _pad: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<InstanceRecord>() == INSTANCE_RECORD_SIZE);

/// The top-level acceleration structure and the instances it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    pub ias: DeviceBuffer,
    pub root: TraversableHandle,
    pub instances: Vec<InstanceRecord>,
    /// Index of the geometry each instance references, in instance order.
    pub instance_geometry: Vec<usize>,
}

impl SceneGraph {
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

/// Collects instances in id order and builds the top-level acceleration structure over them.
///
/// Ids are handed out in insertion order and fix the instance's dispatch table offset,
/// so instances can only be appended.
#[derive(Debug, Default)]
pub struct SceneAssembler {
    instances: Vec<InstanceRecord>,
    instance_geometry: Vec<usize>,
}

impl SceneAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instance and returns its id.
    pub fn add_instance(&mut self, handle: TraversableHandle, transform: Transform, geometry: usize) -> u32 {
        let id = self.instances.len() as u32;
        self.instances.push(InstanceRecord {
            transform,
            instance_id: id,
            sbt_offset: id * NUM_RAY_TYPES as u32,
            visibility_mask: VISIBILITY_MASK_ALL,
            flags: 0,
            traversable_handle: handle,
            _pad: [0; 2],
        });
        self.instance_geometry.push(geometry);
        id
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Builds the top-level acceleration structure. The uploaded instance array is only
    /// needed during the build and is released before returning.
    pub fn build<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> RenderResult<SceneGraph> {
        let stage = "instance acceleration structure";
        let instances = BufferInitDescriptor::new(Some("Instances"))
            .create_new_buffer(device, &self.instances)
            .map_err(device_error(stage))?;

        let input = BuildInput::Instances {
            instances: instances.ptr,
            count: self.instances.len() as u32,
        };
        let sizes = device.accel_compute_memory_usage(&input).map_err(device_error(stage))?;
        let ias = BufferInitDescriptor::new(Some("IAS"))
            .create_empty_buffer(device, sizes.output_size)
            .map_err(device_error(stage))?;
        let temp = BufferInitDescriptor::new(Some("IAS temp"))
            .create_empty_buffer(device, sizes.temp_size)
            .map_err(device_error(stage))?;

        let root = device
            .accel_build(&input, temp.ptr, temp.size, ias.ptr, ias.size)
            .map_err(device_error(stage))?;
        device.synchronize().map_err(device_error(stage))?;

        temp.free(device).map_err(device_error(stage))?;
        instances.free(device).map_err(device_error(stage))?;

        Ok(SceneGraph {
            ias,
            root,
            instances: self.instances,
            instance_geometry: self.instance_geometry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_utils::{AccelKind, DeviceCall, HostDevice};

    #[test]
    fn test_ids_and_offsets_follow_insertion() {
        let mut assembler = SceneAssembler::new();
        for i in 0..4 {
            let id = assembler.add_instance(TraversableHandle(100 + i), IDENTITY, i as usize);
            assert_eq!(id, i as u32);
        }
        let mut device = HostDevice::new();
        let graph = assembler.build(&mut device).unwrap();

        for (k, instance) in graph.instances.iter().enumerate() {
            assert_eq!(instance.instance_id, k as u32);
            assert_eq!(instance.sbt_offset, k as u32 * 2);
            assert_eq!(instance.visibility_mask, 255);
            assert_eq!(instance.traversable_handle, TraversableHandle(100 + k as u64));
        }
        assert_eq!(graph.instance_geometry, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_build_releases_instances_and_scratch() {
        let mut assembler = SceneAssembler::new();
        assembler.add_instance(TraversableHandle(1), scale_translate(8.0, [0.0; 3]), 0);
        let mut device = HostDevice::new();
        let graph = assembler.build(&mut device).unwrap();

        assert!(device
            .calls()
            .iter()
            .any(|call| matches!(call, DeviceCall::AccelBuild { kind: AccelKind::Instances, .. })));
        assert_eq!(device.memory().live_allocations(), 1);
        assert_eq!(device.memory().allocation_size(graph.ias.ptr), Some(graph.ias.size));
        assert_eq!(graph.root.0, graph.ias.ptr.0);
    }

    #[test]
    fn test_empty_scene_builds() {
        let mut device = HostDevice::new();
        let graph = SceneAssembler::new().build(&mut device).unwrap();
        assert_eq!(graph.instance_count(), 0);
    }

    #[test]
    fn test_instance_array_layout() {
        let mut assembler = SceneAssembler::new();
        assembler.add_instance(TraversableHandle(0xABCD), scale_translate(2.0, [1.0, 2.0, 3.0]), 0);
        let bytes: &[u8] = bytemuck::cast_slice(&assembler.instances);
        assert_eq!(bytes.len(), 80);
        assert_eq!(&bytes[12..16], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[48..56], &[0u8; 8]);
        assert_eq!(&bytes[56..60], &255u32.to_le_bytes());
        assert_eq!(&bytes[64..72], &0xABCDu64.to_le_bytes());
    }
}
