use rt_utils::{
    BufferInitDescriptor, DeviceBuffer, DevicePtr, RayTracingDevice, SbtHeader, ShaderBindingTable, SBT_HEADER_SIZE,
    SBT_RECORD_ALIGNMENT,
};

use crate::error::{device_error, RenderResult};
use crate::programs::{hit_variant, ProgramCatalog, ProgramRole, RayType, NUM_RAY_TYPES};

/// Light index of instances that are not a light.
pub const NO_LIGHT: i32 = -1;

/// Per instance data the hit programs read.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GeometryInstanceData {
    pub indices: DevicePtr,
    pub attributes: DevicePtr,
    pub material_index: i32,
    pub light_index: i32,
}

/// A hit record: program header followed by the instance data.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SbtRecordGeometryInstanceData {
    pub header: SbtHeader,
    pub data: GeometryInstanceData,
    pub _pad: [u32; 2],
}

const HIT_RECORD_SIZE: usize = std::mem::size_of::<SbtRecordGeometryInstanceData>();
const _: () = assert!(HIT_RECORD_SIZE == 64);
const _: () = assert!(HIT_RECORD_SIZE % SBT_RECORD_ALIGNMENT == 0);
const _: () = assert!(SBT_HEADER_SIZE % SBT_RECORD_ALIGNMENT == 0);

/// What the dispatch table needs to know about one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceBinding {
    pub indices: DevicePtr,
    pub attributes: DevicePtr,
    pub uses_cutout: bool,
    pub light_index: i32,
}

const HIT_ROLES: [ProgramRole; 4] = [
    ProgramRole::HitRadiance,
    ProgramRole::HitShadow,
    ProgramRole::HitRadianceCutout,
    ProgramRole::HitShadowCutout,
];

/// The shader binding table of the pipeline.
///
/// Record `2 * id + ray` belongs to instance `id`, matching the offsets handed out when the
/// instances were assembled. Only the headers of the hit records change after the build.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    raygen: DeviceBuffer,
    exception: DeviceBuffer,
    miss: DeviceBuffer,
    hit: DeviceBuffer,
    callables: DeviceBuffer,
    records: Vec<SbtRecordGeometryInstanceData>,
    /// Packed headers of the hit variants, in `HIT_ROLES` order.
    hit_headers: [SbtHeader; 4],
    sbt: ShaderBindingTable,
}

impl DispatchTable {
    /// Packs every header and uploads all record sections.
    ///
    /// # Arguments
    ///
    /// * `device` - The device the pipeline was linked on.
    /// * `catalog` - Program groups the headers are packed from. It can be destroyed afterwards.
    /// * `instances` - One binding per instance, in instance id order.
    ///
    /// # Returns
    ///
    /// * `DispatchTable` - `NUM_RAY_TYPES` hit records per instance plus the shared sections.
    pub fn build<D: RayTracingDevice + ?Sized>(
        device: &mut D,
        catalog: &ProgramCatalog,
        instances: &[InstanceBinding],
    ) -> RenderResult<Self> {
        let stage = "shader binding table";
        let mut pack = |role: ProgramRole| device.pack_header(catalog.group(role)).map_err(device_error(stage));

        let raygen_header = pack(ProgramRole::RayGeneration)?;
        let exception_header = pack(ProgramRole::Exception)?;
        let miss_headers = [pack(ProgramRole::MissRadiance)?, pack(ProgramRole::MissShadow)?];
        let mut hit_headers = [[0u8; SBT_HEADER_SIZE]; 4];
        for (header, role) in hit_headers.iter_mut().zip(HIT_ROLES) {
            *header = pack(role)?;
        }
        let callable_headers = ProgramRole::callables()
            .iter()
            .map(|&role| pack(role))
            .collect::<RenderResult<Vec<_>>>()?;

        let records: Vec<SbtRecordGeometryInstanceData> = instances
            .iter()
            .enumerate()
            .flat_map(|(id, binding)| {
                [RayType::Radiance, RayType::Shadow].map(|ray| SbtRecordGeometryInstanceData {
                    header: hit_headers[hit_slot(hit_variant(binding.uses_cutout, ray))],
                    data: GeometryInstanceData {
                        indices: binding.indices,
                        attributes: binding.attributes,
                        material_index: id as i32,
                        light_index: binding.light_index,
                    },
                    _pad: [0; 2],
                })
            })
            .collect();

        let raygen = BufferInitDescriptor::new(Some("SBT raygen"))
            .create_new_buffer(device, &raygen_header)
            .map_err(device_error(stage))?;
        let exception = BufferInitDescriptor::new(Some("SBT exception"))
            .create_new_buffer(device, &exception_header)
            .map_err(device_error(stage))?;
        let miss = BufferInitDescriptor::new(Some("SBT miss"))
            .create_new_buffer(device, &miss_headers)
            .map_err(device_error(stage))?;
        let hit = BufferInitDescriptor::new(Some("SBT hit groups"))
            .create_new_buffer(device, &records)
            .map_err(device_error(stage))?;
        let callables = BufferInitDescriptor::new(Some("SBT callables"))
            .create_new_buffer(device, &callable_headers)
            .map_err(device_error(stage))?;

        let sbt = ShaderBindingTable {
            raygen_record: raygen.ptr,
            exception_record: exception.ptr,
            miss_record_base: miss.ptr,
            miss_record_stride: SBT_HEADER_SIZE as u32,
            miss_record_count: NUM_RAY_TYPES as u32,
            hitgroup_record_base: hit.ptr,
            hitgroup_record_stride: HIT_RECORD_SIZE as u32,
            hitgroup_record_count: records.len() as u32,
            callables_record_base: callables.ptr,
            callables_record_stride: SBT_HEADER_SIZE as u32,
            callables_record_count: callable_headers.len() as u32,
        };

        Ok(Self {
            raygen,
            exception,
            miss,
            hit,
            callables,
            records,
            hit_headers,
            sbt,
        })
    }

    /// Switches the hit programs of one instance between the plain and the cutout variant.
    ///
    /// Waits for in-flight work and then copies only the two records of the instance. An id
    /// outside of the table is ignored and reported as `false`.
    pub fn update_instance<D: RayTracingDevice + ?Sized>(
        &mut self,
        device: &mut D,
        instance: usize,
        uses_cutout: bool,
    ) -> RenderResult<bool> {
        let idx = instance * NUM_RAY_TYPES;
        if idx >= self.records.len() {
            log::debug!(
                "Ignoring dispatch update of instance {}, the table holds {} instances",
                instance,
                self.records.len() / NUM_RAY_TYPES
            );
            return Ok(false);
        }

        self.records[idx].header = self.variant_header(hit_variant(uses_cutout, RayType::Radiance));
        self.records[idx + 1].header = self.variant_header(hit_variant(uses_cutout, RayType::Shadow));

        device.synchronize().map_err(device_error("shader binding table update"))?;
        self.hit
            .write(device, idx * HIT_RECORD_SIZE, &self.records[idx..idx + NUM_RAY_TYPES])
            .map_err(device_error("shader binding table update"))?;
        Ok(true)
    }

    /// Host copy of the hit records, identical to the device copy between updates.
    pub fn records(&self) -> &[SbtRecordGeometryInstanceData] {
        &self.records
    }

    /// The packed header of one of the four hit group roles.
    ///
    /// # Panics
    ///
    /// If `role` is not a hit group.
    pub fn variant_header(&self, role: ProgramRole) -> SbtHeader {
        self.hit_headers[hit_slot(role)]
    }

    pub fn sbt(&self) -> &ShaderBindingTable {
        &self.sbt
    }

    pub fn destroy<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> RenderResult<()> {
        for buffer in [self.raygen, self.exception, self.miss, self.hit, self.callables] {
            buffer.free(device).map_err(device_error("shader binding table teardown"))?;
        }
        Ok(())
    }
}

fn hit_slot(role: ProgramRole) -> usize {
    HIT_ROLES
        .iter()
        .position(|&hit| hit == role)
        .unwrap_or_else(|| panic!("{:?} is not a hit group", role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipeline_options;
    use crate::programs::placeholder_binaries;
    use rt_utils::{DeviceCall, HostDevice};
    use scene::MissKind;

    fn binding(k: u64, uses_cutout: bool) -> InstanceBinding {
        InstanceBinding {
            indices: DevicePtr(0x100 * k + 0x10),
            attributes: DevicePtr(0x100 * k + 0x20),
            uses_cutout,
            light_index: NO_LIGHT,
        }
    }

    fn setup(instances: &[InstanceBinding]) -> (HostDevice, DispatchTable) {
        let mut device = HostDevice::new();
        let catalog =
            ProgramCatalog::create(&mut device, &placeholder_binaries(), MissKind::Constant, &pipeline_options()).unwrap();
        let table = DispatchTable::build(&mut device, &catalog, instances).unwrap();
        catalog.destroy(&mut device).unwrap();
        (device, table)
    }

    fn device_records(device: &mut HostDevice, table: &DispatchTable) -> Vec<SbtRecordGeometryInstanceData> {
        let mut records = vec![bytemuck::Zeroable::zeroed(); table.records().len()];
        table.hit.read(device, &mut records).unwrap();
        records
    }

    #[test]
    fn test_record_count_and_material_index() {
        for n in [0usize, 1, 3, 6] {
            let bindings: Vec<_> = (0..n as u64).map(|k| binding(k, k % 2 == 1)).collect();
            let (_, table) = setup(&bindings);
            assert_eq!(table.records().len(), n * NUM_RAY_TYPES);
            assert_eq!(table.sbt().hitgroup_record_count as usize, n * NUM_RAY_TYPES);
            for (i, record) in table.records().iter().enumerate() {
                let k = i / NUM_RAY_TYPES;
                assert_eq!(record.data.material_index, k as i32);
                assert_eq!(record.data.indices, bindings[k].indices);
                assert_eq!(record.data.light_index, NO_LIGHT);
            }
        }
    }

    #[test]
    fn test_headers_follow_cutout_flag() {
        let (_, table) = setup(&[binding(0, false), binding(1, true)]);
        let records = table.records();
        assert_eq!(records[0].header, table.variant_header(ProgramRole::HitRadiance));
        assert_eq!(records[1].header, table.variant_header(ProgramRole::HitShadow));
        assert_eq!(records[2].header, table.variant_header(ProgramRole::HitRadianceCutout));
        assert_eq!(records[3].header, table.variant_header(ProgramRole::HitShadowCutout));
        assert_ne!(records[0].header, records[2].header);
    }

    #[test]
    fn test_section_strides() {
        let (_, table) = setup(&[binding(0, false)]);
        let sbt = table.sbt();
        assert_eq!(sbt.miss_record_stride, 32);
        assert_eq!(sbt.miss_record_count, 2);
        assert_eq!(sbt.hitgroup_record_stride, 64);
        assert_eq!(sbt.callables_record_stride, 32);
        assert_eq!(sbt.callables_record_count, 11);
        assert_eq!(table.callables.size, 11 * 32);
        assert_eq!(table.raygen.size, 32);
    }

    #[test]
    fn test_update_only_touches_one_instance() {
        let bindings: Vec<_> = (0..3).map(|k| binding(k, false)).collect();
        let (mut device, mut table) = setup(&bindings);
        let before = device_records(&mut device, &table);

        assert!(table.update_instance(&mut device, 1, true).unwrap());
        let after = device_records(&mut device, &table);

        assert_eq!(after[2].header, table.variant_header(ProgramRole::HitRadianceCutout));
        assert_eq!(after[3].header, table.variant_header(ProgramRole::HitShadowCutout));
        for i in [0, 1, 4, 5] {
            assert_eq!(bytemuck::bytes_of(&before[i]), bytemuck::bytes_of(&after[i]));
        }
        for i in 0..6 {
            assert_eq!(before[i].data, after[i].data);
            assert_eq!(before[i]._pad, after[i]._pad);
        }
        assert_eq!(after, table.records());
    }

    #[test]
    fn test_update_synchronizes_before_copy() {
        let bindings: Vec<_> = (0..4).map(|k| binding(k, false)).collect();
        let (mut device, mut table) = setup(&bindings);
        device.clear_calls();

        table.update_instance(&mut device, 2, true).unwrap();
        assert_eq!(
            device.calls(),
            &[
                DeviceCall::Synchronize,
                DeviceCall::CopyToDevice {
                    dst: table.hit.ptr.offset(4 * 64),
                    len: 128,
                },
            ]
        );
    }

    #[test]
    fn test_flip_to_cutout_and_back() {
        let (mut device, mut table) = setup(&[binding(0, false)]);
        let material_index = table.records()[0].data.material_index;

        table.update_instance(&mut device, 0, true).unwrap();
        assert_eq!(table.records()[0].header, table.variant_header(ProgramRole::HitRadianceCutout));
        assert_eq!(table.records()[1].header, table.variant_header(ProgramRole::HitShadowCutout));
        assert_eq!(table.records()[0].data.material_index, material_index);

        table.update_instance(&mut device, 0, false).unwrap();
        assert_eq!(table.records()[0].header, table.variant_header(ProgramRole::HitRadiance));
    }

    #[test]
    fn test_out_of_range_update_is_ignored() {
        let (mut device, mut table) = setup(&[binding(0, false)]);
        device.clear_calls();
        let records = table.records().to_vec();
        assert!(!table.update_instance(&mut device, 1, true).unwrap());
        assert!(device.calls().is_empty());
        assert_eq!(records, table.records());
    }

    #[test]
    fn test_destroy_frees_sections() {
        let (mut device, table) = setup(&[binding(0, true)]);
        let live = device.memory().live_allocations();
        table.destroy(&mut device).unwrap();
        assert_eq!(device.memory().live_allocations(), live - 5);
    }
}
