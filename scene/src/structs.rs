use serde::Deserialize;

/// Upper bound for distances and coefficients on the device side.
pub const RT_DEFAULT_MAX: f32 = 1.0e27;

/// Material flag bit: the surface has no interior volume.
pub const FLAG_THINWALLED: u32 = 1;

pub const LIGHT_ENVIRONMENT: i32 = 0;
pub const LIGHT_PARALLELOGRAM: i32 = 1;

//-----------Geometry-----------------
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexAttributes {
    pub vertex: [f32; 3],
    pub tangent: [f32; 3],
    pub normal: [f32; 3],
    pub texcoord: [f32; 3],
}

impl VertexAttributes {
    pub fn new(vertex: glam::Vec3, tangent: glam::Vec3, normal: glam::Vec3, texcoord: glam::Vec3) -> Self {
        Self {
            vertex: vertex.into(),
            tangent: tangent.into(),
            normal: normal.into(),
            texcoord: texcoord.into(),
        }
    }
}

//-----------Material-----------------
/// Scattering model of a material. The discriminant selects the direct callables on the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BsdfKind {
    #[default]
    DiffuseReflection = 0,
    SpecularReflection = 1,
    SpecularReflectionTransmission = 2,
}

/// Device layout of one material.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialParameter {
    pub index_bsdf: i32,
    pub albedo: [f32; 3],
    pub texture_albedo: u64,
    pub texture_cutout: u64,
    pub flags: u32,
    pub absorption: [f32; 3],
    pub ior: f32,
    pub _pad: [u32; 3],
}

/// Editable description of a material, the way it is configured and shown to the user.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MaterialDesc {
    pub name: String,
    pub bsdf: BsdfKind,
    pub albedo: [f32; 3],
    pub use_albedo_texture: bool,
    pub use_cutout_texture: bool,
    pub thin_walled: bool,
    pub absorption_color: [f32; 3],
    pub volume_distance_scale: f32,
    pub ior: f32,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            name: String::from("material"),
            bsdf: BsdfKind::DiffuseReflection,
            albedo: [0.5; 3],
            use_albedo_texture: false,
            use_cutout_texture: false,
            thin_walled: false,
            absorption_color: [1.0; 3],
            volume_distance_scale: 1.0,
            ior: 1.5,
        }
    }
}

impl MaterialDesc {
    /// Converts the description into its device record.
    ///
    /// # Arguments
    ///
    /// * `texture_albedo` - Texture object used when `use_albedo_texture` is set.
    /// * `texture_cutout` - Texture object used when `use_cutout_texture` is set.
    pub fn to_parameter(&self, texture_albedo: u64, texture_cutout: u64) -> MaterialParameter {
        MaterialParameter {
            index_bsdf: self.bsdf as i32,
            albedo: self.albedo,
            texture_albedo: if self.use_albedo_texture { texture_albedo } else { 0 },
            texture_cutout: if self.use_cutout_texture { texture_cutout } else { 0 },
            flags: if self.thin_walled { FLAG_THINWALLED } else { 0 },
            absorption: absorption_coefficient(self.absorption_color, self.volume_distance_scale),
            ior: self.ior,
            _pad: [0; 3],
        }
    }
}

/// Volume absorption coefficient for a colour reached after one unit of distance.
///
/// Each channel becomes `-ln(c) * scale`. Channels that are zero, negative or NaN absorb
/// everything and map to [`RT_DEFAULT_MAX`]. Channels above one are treated as one. The result
/// is never negative, infinite or NaN.
pub fn absorption_coefficient(color: [f32; 3], volume_distance_scale: f32) -> [f32; 3] {
    color.map(|channel| {
        if !(channel > 0.0) {
            return RT_DEFAULT_MAX;
        }
        let coefficient = -channel.min(1.0).ln() * volume_distance_scale;
        if coefficient.is_nan() || coefficient <= 0.0 {
            0.0
        } else {
            coefficient.min(RT_DEFAULT_MAX)
        }
    })
}

/// Materials of the default scene in instance order.
///
/// The last entry is the black material of the area light and is only used when the light is enabled.
pub fn default_materials() -> Vec<MaterialDesc> {
    vec![
        MaterialDesc {
            name: String::from("diffuse"),
            use_albedo_texture: true,
            ..Default::default()
        },
        MaterialDesc {
            name: String::from("water"),
            bsdf: BsdfKind::SpecularReflectionTransmission,
            albedo: [1.0; 3],
            absorption_color: [0.75, 0.75, 0.95],
            ior: 1.33,
            ..Default::default()
        },
        MaterialDesc {
            name: String::from("glass"),
            bsdf: BsdfKind::SpecularReflectionTransmission,
            albedo: [1.0; 3],
            absorption_color: [0.5, 0.75, 0.5],
            ior: 1.52,
            ..Default::default()
        },
        MaterialDesc {
            name: String::from("cutout"),
            albedo: [0.75; 3],
            use_cutout_texture: true,
            thin_walled: true,
            absorption_color: [0.980392, 0.729412, 0.470588],
            ..Default::default()
        },
        MaterialDesc {
            name: String::from("tinted mirror"),
            bsdf: BsdfKind::SpecularReflection,
            albedo: [0.462745, 0.72549, 0.0],
            absorption_color: [0.9, 0.8, 0.8],
            ior: 1.33,
            ..Default::default()
        },
        light_material(),
    ]
}

/// Black specular material of the area light.
pub fn light_material() -> MaterialDesc {
    MaterialDesc {
        name: String::from("light"),
        bsdf: BsdfKind::SpecularReflection,
        albedo: [0.0; 3],
        ior: 1.0,
        ..Default::default()
    }
}

//-----------Light-----------------
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightDefinition {
    pub light_type: i32,
    pub position: [f32; 3],
    pub vec_u: [f32; 3],
    pub vec_v: [f32; 3],
    pub normal: [f32; 3],
    pub area: f32,
    pub emission: [f32; 3],
    pub _pad0: u32,
    pub texture_emission: u64,
    pub cdf_u: u64,
    pub cdf_v: u64,
    pub width: u32,
    pub height: u32,
    pub integral: f32,
    pub _pad1: u32,
}

impl LightDefinition {
    /// A light covering the whole sphere of directions. Texture and CDFs are filled in by the caller.
    pub fn environment() -> Self {
        Self {
            light_type: LIGHT_ENVIRONMENT,
            area: 4.0 * std::f32::consts::PI,
            emission: [1.0; 3],
            ..Default::default()
        }
    }

    /// A one sided rectangular light spanned by `vec_u` and `vec_v` from `position`.
    pub fn parallelogram(position: glam::Vec3, vec_u: glam::Vec3, vec_v: glam::Vec3, emission: [f32; 3]) -> Self {
        let n = vec_u.cross(vec_v);
        Self {
            light_type: LIGHT_PARALLELOGRAM,
            position: position.into(),
            vec_u: vec_u.into(),
            vec_v: vec_v.into(),
            normal: n.normalize_or_zero().into(),
            area: n.length(),
            emission,
            ..Default::default()
        }
    }
}

const _: () = assert!(std::mem::size_of::<VertexAttributes>() == 48);
const _: () = assert!(std::mem::size_of::<MaterialParameter>() % 16 == 0);
const _: () = assert!(std::mem::size_of::<LightDefinition>() % 16 == 0);
