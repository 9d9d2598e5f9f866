use glam::Vec3;
use rt_utils::{BufferInitDescriptor, DeviceBuffer, RayTracingDevice, TextureDesc, TextureFormat, TextureHandle};
use scene::{
    create_box, create_parallelogram, create_plane, create_sphere, create_torus, default_materials, light_material,
    load_environment, load_texture_or_placeholder, Config, EnvironmentConfig, EnvironmentMap, LightDefinition,
    MaterialDesc, MaterialParameter, Mesh, MissKind, TextureImage, TexturesConfig,
};

use crate::error::{device_error, RenderError, RenderResult};
use crate::instances::{scale_translate, Transform, IDENTITY};

/// A shape placed in the scene. Its position in [`SceneSetup::objects`] is its instance id.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    pub mesh: Mesh,
    pub transform: Transform,
}

/// Everything the renderer is built from, before anything touches the device.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSetup {
    pub objects: Vec<SceneObject>,
    /// One material per object, indexed by instance id.
    pub materials: Vec<MaterialDesc>,
    /// The area light. Its geometry is the last object when present.
    pub area_light: Option<LightDefinition>,
}

impl SceneSetup {
    /// A scene without any instances or lights.
    pub fn empty() -> Self {
        Self {
            objects: Vec::new(),
            materials: Vec::new(),
            area_light: None,
        }
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.materials.len() != self.objects.len() {
            return Err(RenderError::InvalidScene(format!(
                "{} materials for {} objects",
                self.materials.len(),
                self.objects.len()
            )));
        }
        Ok(())
    }
}

/// Builds the default scene: a floor plane, a box with a nested sphere, a sphere and a torus.
///
/// Materials are taken from the configuration if it has any, repeating the list when it is
/// shorter than the object list. When the light is enabled a parallelogram light over the
/// scene is appended with the non-editable light material.
///
/// # Arguments
///
/// * `config` - Provides the materials and the light switch.
///
/// # Returns
///
/// * `SceneSetup` - Objects and materials in instance id order.
///
/// # Example
///
/// ```
/// use raytracing_lib::helper::default_scene;
///
/// let setup = default_scene(&scene::Config::default());
/// assert_eq!(setup.objects.len(), 5);
/// assert!(setup.area_light.is_none());
/// ```
pub fn default_scene(config: &Config) -> SceneSetup {
    let objects = vec![
        SceneObject {
            name: String::from("plane"),
            mesh: create_plane(1, 1, 1),
            transform: scale_translate(8.0, [0.0, 0.0, 0.0]),
        },
        SceneObject {
            name: String::from("box"),
            mesh: create_box(),
            transform: scale_translate(1.0, [-2.5, 1.25, 0.0]),
        },
        SceneObject {
            name: String::from("nested sphere"),
            mesh: create_sphere(180, 90, 1.0, std::f32::consts::PI),
            transform: scale_translate(0.75, [-2.5, 1.25, 0.0]),
        },
        SceneObject {
            name: String::from("sphere"),
            mesh: create_sphere(180, 90, 1.0, std::f32::consts::PI),
            transform: scale_translate(1.0, [0.0, 1.25, 0.0]),
        },
        SceneObject {
            name: String::from("torus"),
            mesh: create_torus(180, 180, 0.75, 0.25),
            transform: scale_translate(1.0, [2.5, 1.25, 0.0]),
        },
    ];

    let available = match &config.materials {
        Some(materials) if !materials.is_empty() => materials.clone(),
        _ => default_materials(),
    };
    if available.len() < objects.len() {
        log::warn!(
            "Only {} materials for {} objects, repeating the material list",
            available.len(),
            objects.len()
        );
    }
    let mut materials: Vec<MaterialDesc> = (0..objects.len())
        .map(|i| available[i % available.len()].clone())
        .collect();

    let mut setup = SceneSetup {
        objects,
        materials: Vec::new(),
        area_light: None,
    };

    if config.light.enabled {
        let light = LightDefinition::parallelogram(
            Vec3::new(-2.0, 4.0, -2.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            config.light.emission,
        );
        setup.objects.push(SceneObject {
            name: String::from("light"),
            mesh: create_parallelogram(
                Vec3::from(light.position),
                Vec3::from(light.vec_u),
                Vec3::from(light.vec_v),
                Vec3::from(light.normal),
            ),
            transform: IDENTITY,
        });
        materials.push(light_material());
        setup.area_light = Some(light);
    }

    setup.materials = materials;
    setup
}

/// Lights in device order: the environment light in slot 0 if the miss kind has one, then the area light.
pub fn create_lights(
    miss: MissKind,
    environment: Option<&EnvironmentResources>,
    area_light: Option<LightDefinition>,
) -> Vec<LightDefinition> {
    let mut lights = Vec::new();
    match miss {
        MissKind::Null => {}
        MissKind::Constant => lights.push(LightDefinition::environment()),
        MissKind::Sphere => {
            let mut light = LightDefinition::environment();
            if let Some(environment) = environment {
                light.texture_emission = environment.texture.0;
                light.cdf_u = environment.cdf_u.ptr.0;
                light.cdf_v = environment.cdf_v.ptr.0;
                light.width = environment.width;
                light.height = environment.height;
                light.integral = environment.integral;
            }
            lights.push(light);
        }
    }
    lights.extend(area_light);
    lights
}

/// Index of the area light in the light list built by [`create_lights`].
pub fn area_light_index(miss: MissKind) -> i32 {
    match miss {
        MissKind::Null => 0,
        MissKind::Constant | MissKind::Sphere => 1,
    }
}

//-----------Textures-----------------
/// The albedo and cutout textures shared by all materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialTextures {
    pub albedo: TextureHandle,
    pub cutout: TextureHandle,
}

impl MaterialTextures {
    pub fn destroy<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> RenderResult<()> {
        device.destroy_texture(self.albedo).map_err(device_error("texture teardown"))?;
        device.destroy_texture(self.cutout).map_err(device_error("texture teardown"))?;
        Ok(())
    }
}

fn upload_texture<D: RayTracingDevice + ?Sized>(device: &mut D, image: &TextureImage) -> RenderResult<TextureHandle> {
    let desc = TextureDesc {
        width: image.width,
        height: image.height,
        format: TextureFormat::Rgba8,
        spherical: false,
    };
    device.create_texture(&desc, &image.pixels).map_err(device_error("textures"))
}

/// Loads and uploads the material textures. Images that can't be decoded are replaced by a placeholder.
pub fn setup_textures<D: RayTracingDevice + ?Sized>(
    device: &mut D,
    textures: &TexturesConfig,
) -> RenderResult<MaterialTextures> {
    let albedo = upload_texture(device, &load_texture_or_placeholder(&textures.albedo))?;
    let cutout = upload_texture(device, &load_texture_or_placeholder(&textures.cutout))?;
    Ok(MaterialTextures { albedo, cutout })
}

/// Converts the material descriptions into device records.
pub fn material_parameters(materials: &[MaterialDesc], textures: &MaterialTextures) -> Vec<MaterialParameter> {
    materials
        .iter()
        .map(|material| material.to_parameter(textures.albedo.0, textures.cutout.0))
        .collect()
}

//-----------Environment-----------------
/// Device copy of a spherical environment and its sampling tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentResources {
    pub texture: TextureHandle,
    pub cdf_u: DeviceBuffer,
    pub cdf_v: DeviceBuffer,
    pub width: u32,
    pub height: u32,
    pub integral: f32,
}

impl EnvironmentResources {
    pub fn upload<D: RayTracingDevice + ?Sized>(device: &mut D, map: &EnvironmentMap) -> RenderResult<Self> {
        let desc = TextureDesc {
            width: map.width,
            height: map.height,
            format: TextureFormat::Rgba32F,
            spherical: true,
        };
        let texture = device
            .create_texture(&desc, bytemuck::cast_slice(map.texels()))
            .map_err(device_error("environment"))?;
        let cdf_u = BufferInitDescriptor::new(Some("Environment CDF U"))
            .create_new_buffer(device, &map.cdf_u)
            .map_err(device_error("environment"))?;
        let cdf_v = BufferInitDescriptor::new(Some("Environment CDF V"))
            .create_new_buffer(device, &map.cdf_v)
            .map_err(device_error("environment"))?;
        Ok(Self {
            texture,
            cdf_u,
            cdf_v,
            width: map.width,
            height: map.height,
            integral: map.integral,
        })
    }

    pub fn destroy<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> RenderResult<()> {
        device.destroy_texture(self.texture).map_err(device_error("environment teardown"))?;
        self.cdf_u.free(device).map_err(device_error("environment teardown"))?;
        self.cdf_v.free(device).map_err(device_error("environment teardown"))?;
        Ok(())
    }
}

/// Uploads the environment of a sphere miss. Other miss kinds don't need one.
pub fn setup_environment<D: RayTracingDevice + ?Sized>(
    device: &mut D,
    environment: &EnvironmentConfig,
) -> RenderResult<Option<EnvironmentResources>> {
    if environment.miss != MissKind::Sphere {
        return Ok(None);
    }
    let map = match &environment.path {
        Some(path) => load_environment(path),
        None => EnvironmentMap::white(8, 8),
    };
    EnvironmentResources::upload(device, &map).map(Some)
}
