use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use rt_utils::{EntryPoint, ModuleHandle, PipelineOptions, ProgramGroupDesc, ProgramGroupHandle, RayTracingDevice};
use scene::MissKind;

use crate::error::{device_error, RenderError, RenderResult};

/// Radiance and shadow rays.
pub const NUM_RAY_TYPES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RayType {
    Radiance = 0,
    Shadow = 1,
}

/// The compiled device modules a pipeline is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleId {
    RayGeneration,
    Exception,
    Miss,
    ClosestHit,
    AnyHit,
    LensShader,
    LightSample,
    BsdfDiffuseReflection,
    BsdfSpecularReflection,
    BsdfSpecularReflectionTransmission,
}

impl ModuleId {
    pub const ALL: [ModuleId; 10] = [
        ModuleId::RayGeneration,
        ModuleId::Exception,
        ModuleId::Miss,
        ModuleId::ClosestHit,
        ModuleId::AnyHit,
        ModuleId::LensShader,
        ModuleId::LightSample,
        ModuleId::BsdfDiffuseReflection,
        ModuleId::BsdfSpecularReflection,
        ModuleId::BsdfSpecularReflectionTransmission,
    ];

    /// File name of the module without its extension.
    pub fn file_stem(self) -> &'static str {
        match self {
            ModuleId::RayGeneration => "raygeneration",
            ModuleId::Exception => "exception",
            ModuleId::Miss => "miss",
            ModuleId::ClosestHit => "closesthit",
            ModuleId::AnyHit => "anyhit",
            ModuleId::LensShader => "lens_shader",
            ModuleId::LightSample => "light_sample",
            ModuleId::BsdfDiffuseReflection => "bsdf_diffuse_reflection",
            ModuleId::BsdfSpecularReflection => "bsdf_specular_reflection",
            ModuleId::BsdfSpecularReflectionTransmission => "bsdf_specular_reflection_transmission",
        }
    }
}

/// Every program group of the pipeline, in the order they are created and linked.
///
/// The callables are the contiguous tail starting at [`ProgramRole::LensPinhole`], their
/// position in that tail is the index the device code calls them by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramRole {
    RayGeneration,
    Exception,
    MissRadiance,
    MissShadow,
    HitRadiance,
    HitShadow,
    HitRadianceCutout,
    HitShadowCutout,
    LensPinhole,
    LensFisheye,
    LensSphere,
    LightEnv,
    LightParallelogram,
    BrdfDiffuseSample,
    BrdfDiffuseEval,
    BrdfSpecularSample,
    BrdfSpecularEval,
    BsdfSpecularSample,
    BsdfSpecularEval,
}

impl ProgramRole {
    pub const ALL: [ProgramRole; 19] = [
        ProgramRole::RayGeneration,
        ProgramRole::Exception,
        ProgramRole::MissRadiance,
        ProgramRole::MissShadow,
        ProgramRole::HitRadiance,
        ProgramRole::HitShadow,
        ProgramRole::HitRadianceCutout,
        ProgramRole::HitShadowCutout,
        ProgramRole::LensPinhole,
        ProgramRole::LensFisheye,
        ProgramRole::LensSphere,
        ProgramRole::LightEnv,
        ProgramRole::LightParallelogram,
        ProgramRole::BrdfDiffuseSample,
        ProgramRole::BrdfDiffuseEval,
        ProgramRole::BrdfSpecularSample,
        ProgramRole::BrdfSpecularEval,
        ProgramRole::BsdfSpecularSample,
        ProgramRole::BsdfSpecularEval,
    ];
    pub const COUNT: usize = Self::ALL.len();
    pub const FIRST_CALLABLE: ProgramRole = ProgramRole::LensPinhole;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_callable(self) -> bool {
        self >= Self::FIRST_CALLABLE
    }

    /// All callable roles in call index order.
    pub fn callables() -> &'static [ProgramRole] {
        static ROLES: [ProgramRole; ProgramRole::COUNT] = ProgramRole::ALL;
        &ROLES[ProgramRole::FIRST_CALLABLE as usize..]
    }
}

/// Picks the hit group an instance uses for a ray type.
pub fn hit_variant(uses_cutout: bool, ray: RayType) -> ProgramRole {
    match (uses_cutout, ray) {
        (false, RayType::Radiance) => ProgramRole::HitRadiance,
        (false, RayType::Shadow) => ProgramRole::HitShadow,
        (true, RayType::Radiance) => ProgramRole::HitRadianceCutout,
        (true, RayType::Shadow) => ProgramRole::HitShadowCutout,
    }
}

/// Where the compiled module binaries come from.
pub trait BinarySource {
    fn load(&self, module: ModuleId) -> RenderResult<Vec<u8>>;
}

/// Loads `<directory>/<stem>.<extension>` for every module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySource {
    pub directory: PathBuf,
    pub extension: String,
}

impl DirectorySource {
    pub fn new(directory: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            extension: extension.into(),
        }
    }

    pub fn path(&self, module: ModuleId) -> PathBuf {
        self.directory.join(format!("{}.{}", module.file_stem(), self.extension))
    }
}

impl BinarySource for DirectorySource {
    fn load(&self, module: ModuleId) -> RenderResult<Vec<u8>> {
        let path = self.path(module);
        let missing = || RenderError::MissingProgram {
            module: module.file_stem(),
            path: path.display().to_string(),
        };
        match fs::read(&path) {
            Ok(binary) if !binary.is_empty() => Ok(binary),
            Ok(_) => Err(missing()),
            Err(e) => {
                log::error!("Could not read {}: {}", path.display(), e);
                Err(missing())
            }
        }
    }
}

/// In memory binaries, used when the programs are embedded or generated.
impl BinarySource for HashMap<ModuleId, Vec<u8>> {
    fn load(&self, module: ModuleId) -> RenderResult<Vec<u8>> {
        match self.get(&module) {
            Some(binary) if !binary.is_empty() => Ok(binary.clone()),
            _ => Err(RenderError::MissingProgram {
                module: module.file_stem(),
                path: String::from("<memory>"),
            }),
        }
    }
}

/// A stand-in binary for every module, holding just the module name.
///
/// Enough for devices that don't execute the programs themselves, like the host device.
pub fn placeholder_binaries() -> HashMap<ModuleId, Vec<u8>> {
    ModuleId::ALL
        .iter()
        .map(|&module| (module, module.file_stem().as_bytes().to_vec()))
        .collect()
}

/// Module handles indexed by `ModuleId as usize`.
pub type ModuleTable = [ModuleHandle; ModuleId::ALL.len()];

/// Describes the program group of `role`. The miss kind selects the radiance miss program
/// and the environment light sampler, every other role is fixed.
pub fn describe(role: ProgramRole, miss: MissKind, modules: &ModuleTable) -> ProgramGroupDesc {
    let entry = |module: ModuleId, name: &'static str| EntryPoint {
        module: modules[module as usize],
        name,
    };
    let callable = |module: ModuleId, name: &'static str| ProgramGroupDesc::Callables(entry(module, name));

    match role {
        ProgramRole::RayGeneration => ProgramGroupDesc::Raygen(entry(ModuleId::RayGeneration, "__raygen__pathtracer")),
        ProgramRole::Exception => ProgramGroupDesc::Exception(entry(ModuleId::Exception, "__exception__all")),
        ProgramRole::MissRadiance => {
            let name = match miss {
                MissKind::Null => "__miss__env_null",
                MissKind::Constant => "__miss__env_constant",
                MissKind::Sphere => "__miss__env_sphere",
            };
            ProgramGroupDesc::Miss(Some(entry(ModuleId::Miss, name)))
        }
        // Shadow rays that miss simply keep their visibility flag.
        ProgramRole::MissShadow => ProgramGroupDesc::Miss(None),
        ProgramRole::HitRadiance => ProgramGroupDesc::Hitgroup {
            closest_hit: Some(entry(ModuleId::ClosestHit, "__closesthit__radiance")),
            any_hit: None,
        },
        ProgramRole::HitShadow => ProgramGroupDesc::Hitgroup {
            closest_hit: None,
            any_hit: Some(entry(ModuleId::AnyHit, "__anyhit__shadow")),
        },
        ProgramRole::HitRadianceCutout => ProgramGroupDesc::Hitgroup {
            closest_hit: Some(entry(ModuleId::ClosestHit, "__closesthit__radiance")),
            any_hit: Some(entry(ModuleId::AnyHit, "__anyhit__radiance_cutout")),
        },
        ProgramRole::HitShadowCutout => ProgramGroupDesc::Hitgroup {
            closest_hit: None,
            any_hit: Some(entry(ModuleId::AnyHit, "__anyhit__shadow_cutout")),
        },
        ProgramRole::LensPinhole => callable(ModuleId::LensShader, "__direct_callable__pinhole"),
        ProgramRole::LensFisheye => callable(ModuleId::LensShader, "__direct_callable__fisheye"),
        ProgramRole::LensSphere => callable(ModuleId::LensShader, "__direct_callable__sphere"),
        ProgramRole::LightEnv => match miss {
            MissKind::Sphere => callable(ModuleId::LightSample, "__direct_callable__light_env_sphere"),
            MissKind::Null | MissKind::Constant => callable(ModuleId::LightSample, "__direct_callable__light_env_constant"),
        },
        ProgramRole::LightParallelogram => callable(ModuleId::LightSample, "__direct_callable__light_parallelogram"),
        ProgramRole::BrdfDiffuseSample => callable(
            ModuleId::BsdfDiffuseReflection,
            "__direct_callable__sample_bsdf_diffuse_reflection",
        ),
        ProgramRole::BrdfDiffuseEval => callable(
            ModuleId::BsdfDiffuseReflection,
            "__direct_callable__eval_bsdf_diffuse_reflection",
        ),
        ProgramRole::BrdfSpecularSample => callable(
            ModuleId::BsdfSpecularReflection,
            "__direct_callable__sample_bsdf_specular_reflection",
        ),
        ProgramRole::BrdfSpecularEval => callable(
            ModuleId::BsdfSpecularReflection,
            "__direct_callable__eval_bsdf_specular_reflection",
        ),
        ProgramRole::BsdfSpecularSample => callable(
            ModuleId::BsdfSpecularReflectionTransmission,
            "__direct_callable__sample_bsdf_specular_reflection_transmission",
        ),
        // A specular transmission can't be hit by a light sample either, so it shares the black eval.
        ProgramRole::BsdfSpecularEval => callable(
            ModuleId::BsdfSpecularReflection,
            "__direct_callable__eval_bsdf_specular_reflection",
        ),
    }
}

/// The modules and program groups of one pipeline configuration.
///
/// Only needed until the pipeline is linked and the record headers are packed, after that
/// the catalog is destroyed.
#[derive(Debug)]
pub struct ProgramCatalog {
    modules: ModuleTable,
    groups: Vec<ProgramGroupHandle>,
}

impl ProgramCatalog {
    /// Compiles every module and creates one program group per role.
    ///
    /// # Arguments
    ///
    /// * `device` - The device the modules are compiled for.
    /// * `source` - Provides the module binaries. A missing or empty binary is fatal.
    /// * `miss` - Selects the environment programs.
    /// * `options` - Compile options, identical to the ones the pipeline is linked with.
    ///
    /// # Returns
    ///
    /// * `ProgramCatalog` - Groups indexed by [`ProgramRole`].
    pub fn create<D: RayTracingDevice + ?Sized, S: BinarySource + ?Sized>(
        device: &mut D,
        source: &S,
        miss: MissKind,
        options: &PipelineOptions,
    ) -> RenderResult<Self> {
        let mut modules = [ModuleHandle(0); ModuleId::ALL.len()];
        for module in ModuleId::ALL {
            let binary = source.load(module)?;
            modules[module as usize] = device
                .create_module(module.file_stem(), &binary, options)
                .map_err(device_error("program modules"))?;
            log::debug!("Created module {} ({} bytes)", module.file_stem(), binary.len());
        }

        let mut groups = Vec::with_capacity(ProgramRole::COUNT);
        for role in ProgramRole::ALL {
            let desc = describe(role, miss, &modules);
            groups.push(device.create_program_group(&desc).map_err(device_error("program groups"))?);
        }

        Ok(Self { modules, groups })
    }

    pub fn group(&self, role: ProgramRole) -> ProgramGroupHandle {
        self.groups[role.index()]
    }

    /// All groups in link order.
    pub fn groups(&self) -> &[ProgramGroupHandle] {
        &self.groups
    }

    pub fn destroy<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> RenderResult<()> {
        for group in self.groups {
            device.destroy_program_group(group).map_err(device_error("program groups"))?;
        }
        for module in self.modules {
            device.destroy_module(module).map_err(device_error("program modules"))?;
        }
        Ok(())
    }
}
