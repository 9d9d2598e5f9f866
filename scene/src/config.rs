use std::fs;

use serde::Deserialize;

use crate::camera::CameraType;
use crate::structs::MaterialDesc;

/// What rays that leave the scene see. The discriminant selects the miss program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissKind {
    Null = 0,
    #[default]
    Constant = 1,
    Sphere = 2,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { width: 512, height: 512 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Render straight into a buffer shared with the display.
    pub interop: bool,
    /// Stop accumulating after this many iterations, 0 renders forever.
    pub frames: u32,
    /// Present every frame instead of once per second.
    pub present: bool,
    /// Minimum and maximum path length.
    pub path_lengths: [i32; 2],
    pub scene_epsilon_factor: f32,
    pub camera: CameraType,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            interop: false,
            frames: 0,
            present: false,
            path_lengths: [2, 10],
            scene_epsilon_factor: 500.0,
            camera: CameraType::Pinhole,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub miss: MissKind,
    pub path: Option<String>,
    /// Rotation around the up axis in the range [0, 1).
    pub rotation: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LightConfig {
    pub enabled: bool,
    pub emission: [f32; 3],
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            emission: [10.0; 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgramsConfig {
    pub directory: String,
    pub extension: String,
}

impl Default for ProgramsConfig {
    fn default() -> Self {
        Self {
            directory: String::from("./intro_runtime_core"),
            extension: String::from("ptx"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TexturesConfig {
    pub albedo: String,
    pub cutout: String,
}

impl Default for TexturesConfig {
    fn default() -> Self {
        Self {
            albedo: String::from("./NVIDIA_Logo.jpg"),
            cutout: String::from("./slots_alpha.png"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub position: [f32; 3],
    /// Yaw and pitch in degrees.
    pub rotation: [f32; 2],
    /// Vertical field of view in degrees.
    pub fov: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 1.25, 7.0],
            rotation: [0.0, -5.0],
            fov: 45.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub window: WindowConfig,
    pub render: RenderConfig,
    pub environment: EnvironmentConfig,
    pub light: LightConfig,
    pub programs: ProgramsConfig,
    pub textures: TexturesConfig,
    pub camera: CameraConfig,
    /// Replaces the default material list when present.
    pub materials: Option<Vec<MaterialDesc>>,
}

impl Config {
    pub fn new(config_path: &str) -> Result<Self, String> {
        let toml_str = fs::read_to_string(config_path)
            .map_err(|e| format!("Could not find/read config file: {}", e))?;
        Self::from_str(&toml_str)
    }

    /// Loads `config_path`, or the defaults when the file can't be read.
    ///
    /// A file that exists but is invalid is still an error.
    pub fn new_or_default(config_path: &str) -> Result<Self, String> {
        match fs::read_to_string(config_path) {
            Ok(toml_str) => Self::from_str(&toml_str),
            Err(e) => {
                println!("No config file at {} ({}), using default values", config_path, e);
                Ok(Self::default())
            }
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(toml_str: &str) -> Result<Self, String> {
        let mut config: Config = toml::from_str(toml_str).map_err(|e| format!("Could not parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<(), String> {
        if self.window.width == 0 || self.window.height == 0 {
            println!("Window size must be at least 1x1, clamping");
            self.window.width = self.window.width.max(1);
            self.window.height = self.window.height.max(1);
        }

        let [min, max] = self.render.path_lengths;
        if min < 0 || max < min {
            return Err(format!("Invalid path lengths [{}, {}], expected 0 <= min <= max", min, max));
        }
        if !(self.render.scene_epsilon_factor >= 0.0) {
            return Err("scene_epsilon_factor must not be negative".to_string());
        }
        if !(self.camera.fov > 0.0 && self.camera.fov < 180.0) {
            return Err(format!("Camera fov {} is outside of (0, 180)", self.camera.fov));
        }
        if self.environment.miss == MissKind::Sphere && self.environment.path.is_none() {
            println!("No environment path defined for the sphere environment, a white environment is used");
        }
        if let Some(materials) = &self.materials {
            if materials.is_empty() {
                return Err("Expected at least one material".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::BsdfKind;

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::from_str("");
        assert!(config.is_ok());
        let config = config.expect("Could not unwrap config");
        assert_eq!(config, Config::default());
        assert_eq!(config.render.path_lengths, [2, 10]);
        assert_eq!(config.environment.miss, MissKind::Constant);
    }

    #[test]
    fn test_invalid_toml() {
        let config = Config::from_str("[window\nwidth = 3");
        assert!(config.is_err());
        assert!(config.unwrap_err().starts_with("Could not parse TOML"));
    }

    #[test]
    fn test_unknown_field() {
        let config = Config::from_str("[window]\nwidht = 3");
        assert!(config.is_err());
    }

    #[test]
    fn test_window_zero_is_clamped() {
        let config = Config::from_str("[window]\nwidth = 0\nheight = 300").expect("Could not unwrap config");
        assert_eq!((config.window.width, config.window.height), (1, 300));
    }

    #[test]
    fn test_render_section() {
        let config = Config::from_str("[render]\ninterop = true\nframes = 16\npath_lengths = [1, 4]\ncamera = \"fisheye\"")
            .expect("Could not unwrap config");
        assert!(config.render.interop);
        assert_eq!(config.render.frames, 16);
        assert_eq!(config.render.path_lengths, [1, 4]);
        assert_eq!(config.render.camera, CameraType::Fisheye);
        assert!(!config.render.present);
    }

    #[test]
    fn test_path_lengths_inverted() {
        let config = Config::from_str("[render]\npath_lengths = [5, 2]");
        assert!(config.is_err());
    }

    #[test]
    fn test_environment_sphere() {
        let config = Config::from_str("[environment]\nmiss = \"sphere\"\npath = \"sky.hdr\"\nrotation = 0.25")
            .expect("Could not unwrap config");
        assert_eq!(config.environment.miss, MissKind::Sphere);
        assert_eq!(config.environment.path.as_deref(), Some("sky.hdr"));
        assert_eq!(config.environment.rotation, 0.25);
    }

    #[test]
    fn test_unknown_miss_kind() {
        let config = Config::from_str("[environment]\nmiss = \"cube\"");
        assert!(config.is_err());
    }

    #[test]
    fn test_camera_fov_out_of_range() {
        let config = Config::from_str("[camera]\nposition = [0.0, 1.0, 2.0]\nrotation = [0.0, 0.0]\nfov = 180.0");
        assert!(config.is_err());
    }

    #[test]
    fn test_materials_missing() {
        let config = Config::from_str("[camera]\nposition = [0.0, 1.0, 2.0]\nrotation = [0.0, 0.0]\nfov = 45.0");
        assert!(config.is_ok());
        let config = config.expect("Could not unwrap config");
        assert!(config.materials.is_none());
    }

    #[test]
    fn test_materials_material_array() {
        let config = Config::from_str(
            "[[materials]]\nname = \"red\"\nalbedo = [1.0, 0.0, 0.0]\n[[materials]]\nbsdf = \"specular_reflection_transmission\"\nabsorption_color = [0.5, 0.5, 0.5]\nior = 1.33",
        );
        assert!(config.is_ok());
        let config = config.expect("Could not unwrap config");

        let materials = config.materials.unwrap();
        assert_eq!(materials.len(), 2);
        assert_eq!(materials[0].name, "red");
        assert_eq!(materials[0].albedo, [1.0, 0.0, 0.0]);
        assert_eq!(materials[0].bsdf, BsdfKind::DiffuseReflection);
        assert_eq!(materials[1].bsdf, BsdfKind::SpecularReflectionTransmission);
        assert_eq!(materials[1].ior, 1.33);
        assert_eq!(materials[1].volume_distance_scale, 1.0);
    }

    #[test]
    fn test_missing_file_falls_back() {
        assert!(Config::new("does/not/exist.toml").is_err());
        let config = Config::new_or_default("does/not/exist.toml").expect("Could not unwrap config");
        assert_eq!(config, Config::default());
    }
}
