use rt_utils::{BufferInitDescriptor, BuildInput, DeviceBuffer, DeviceResult, RayTracingDevice, TraversableHandle};
use scene::{Mesh, VertexAttributes};

use crate::error::{device_error, RenderError, RenderResult};

/// Device side copy of one shape and its bottom-level acceleration structure.
///
/// The attribute and index buffers stay alive for the lifetime of the scene since the
/// hit records point into them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryRecord {
    pub attributes: DeviceBuffer,
    pub indices: DeviceBuffer,
    pub gas: DeviceBuffer,
    pub handle: TraversableHandle,
    pub num_attributes: u32,
    pub num_indices: u32,
}

impl GeometryRecord {
    pub fn destroy<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> RenderResult<()> {
        self.indices.free(device).map_err(device_error("geometry teardown"))?;
        self.attributes.free(device).map_err(device_error("geometry teardown"))?;
        self.gas.free(device).map_err(device_error("geometry teardown"))?;
        Ok(())
    }
}

fn validate(attributes: &[VertexAttributes], indices: &[u32]) -> RenderResult<()> {
    if indices.len() % 3 != 0 {
        return Err(RenderError::InvalidScene(format!(
            "{} indices do not form whole triangles",
            indices.len()
        )));
    }
    if let Some(index) = indices.iter().find(|&&index| index as usize >= attributes.len()) {
        return Err(RenderError::InvalidScene(format!(
            "index {} is out of range for {} vertices",
            index,
            attributes.len()
        )));
    }
    Ok(())
}

fn build_accel<D: RayTracingDevice + ?Sized>(
    device: &mut D,
    input: &BuildInput,
) -> DeviceResult<(DeviceBuffer, TraversableHandle)> {
    let sizes = device.accel_compute_memory_usage(input)?;
    let gas = BufferInitDescriptor::new(Some("GAS")).create_empty_buffer(device, sizes.output_size)?;
    let temp = BufferInitDescriptor::new(Some("GAS temp")).create_empty_buffer(device, sizes.temp_size)?;
    let handle = device.accel_build(input, temp.ptr, temp.size, gas.ptr, gas.size)?;
    device.synchronize()?;
    temp.free(device)?;
    Ok((gas, handle))
}

/// Uploads a shape and builds its bottom-level acceleration structure.
///
/// The build is synchronous: the scratch buffer is released as soon as the device has finished with it.
///
/// # Arguments
///
/// * `device` - The device that owns every buffer of the record.
/// * `attributes` - Per vertex data, the position is the first member.
/// * `indices` - Three indices per triangle.
///
/// # Returns
///
/// * `GeometryRecord` - Buffers, counts and the traversable handle of the shape.
pub fn build_geometry<D: RayTracingDevice + ?Sized>(
    device: &mut D,
    attributes: &[VertexAttributes],
    indices: &[u32],
) -> RenderResult<GeometryRecord> {
    validate(attributes, indices)?;

    let attributes_buffer = BufferInitDescriptor::new(Some("Vertex attributes"))
        .create_new_buffer(device, attributes)
        .map_err(device_error("geometry"))?;
    let indices_buffer = BufferInitDescriptor::new(Some("Indices"))
        .create_new_buffer(device, indices)
        .map_err(device_error("geometry"))?;

    let input = BuildInput::Triangles {
        vertices: attributes_buffer.ptr,
        vertex_count: attributes.len() as u32,
        vertex_stride: std::mem::size_of::<VertexAttributes>() as u32,
        indices: indices_buffer.ptr,
        triangle_count: (indices.len() / 3) as u32,
    };

    let (gas, handle) = build_accel(device, &input).map_err(device_error("geometry"))?;

    Ok(GeometryRecord {
        attributes: attributes_buffer,
        indices: indices_buffer,
        gas,
        handle,
        num_attributes: attributes.len() as u32,
        num_indices: indices.len() as u32,
    })
}

pub fn build_mesh<D: RayTracingDevice + ?Sized>(device: &mut D, mesh: &Mesh) -> RenderResult<GeometryRecord> {
    build_geometry(device, &mesh.attributes, &mesh.indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_utils::{AccelKind, DeviceCall, HostDevice};
    use scene::create_plane;

    #[test]
    fn test_build_frees_scratch_after_sync() {
        let mut device = HostDevice::new();
        let plane = create_plane(1, 1, 1);
        let record = build_mesh(&mut device, &plane).unwrap();

        let calls = device.calls();
        let build = calls
            .iter()
            .position(|call| matches!(call, DeviceCall::AccelBuild { kind: AccelKind::Triangles, .. }))
            .unwrap();
        let DeviceCall::AccelBuild { temp, output, .. } = calls[build].clone() else {
            unreachable!()
        };
        assert!(matches!(calls[build + 1], DeviceCall::Synchronize));
        assert_eq!(calls[build + 2], DeviceCall::Free { ptr: temp });

        assert_eq!(output, record.gas.ptr);
        assert_eq!(record.handle.0, output.0);
        assert_eq!(record.num_attributes, 4);
        assert_eq!(record.num_indices, 6);
        // attributes, indices and the GAS stay alive
        assert_eq!(device.memory().live_allocations(), 3);
    }

    #[test]
    fn test_inputs_are_uploaded() {
        let mut device = HostDevice::new();
        let plane = create_plane(1, 1, 1);
        let record = build_mesh(&mut device, &plane).unwrap();

        let mut indices = [0u32; 6];
        record.indices.read(&mut device, &mut indices).unwrap();
        assert_eq!(indices.to_vec(), plane.indices);
        assert_eq!(record.attributes.size, 4 * std::mem::size_of::<VertexAttributes>());
    }

    #[test]
    fn test_partial_triangle_is_rejected() {
        let mut device = HostDevice::new();
        let plane = create_plane(1, 1, 1);
        let result = build_geometry(&mut device, &plane.attributes, &plane.indices[..4]);
        assert!(matches!(result, Err(RenderError::InvalidScene(_))));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_build_failure_is_fatal() {
        let mut device = HostDevice::new();
        device.fail_on("accel_build");
        let plane = create_plane(1, 1, 1);
        let result = build_mesh(&mut device, &plane);
        assert!(matches!(result, Err(RenderError::Device { stage: "geometry", .. })));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut device = HostDevice::new();
        let record = build_mesh(&mut device, &create_plane(2, 2, 1)).unwrap();
        record.destroy(&mut device).unwrap();
        assert_eq!(device.memory().live_allocations(), 0);
    }
}
