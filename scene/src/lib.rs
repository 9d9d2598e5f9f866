//! # Scene
//!
//! This module contains all the scene related code. It includes the camera, the device records, procedural models and textures.
//!
//! ## Modules
//!
//! - `camera`: Contains the `Camera` struct and the frustum the primary rays are spanned with.
//! - `config`: Loads the configuration file and creates the scene outline.
//! - `models`: Procedural meshes (plane, box, sphere, torus, parallelogram) and the HDRI loaders.
//! - `structs`: Device records for vertices, materials and lights, plus the editable material description.
//! - `texture`: Texture loading with placeholder fallback and the importance sampled environment map.
//!
//! ## Usage
//!
//! ```
//! use scene::{cgmath, create_sphere, default_materials, Camera, Config, Projection};
//!
//! let config = Config::from_str("[window]\nwidth = 640\nheight = 480").unwrap();
//! let projection = Projection::new(config.window.width, config.window.height, cgmath::Deg(config.camera.fov));
//! let frustum = Camera::default().frustum(&projection);
//!
//! let sphere = create_sphere(180, 90, 1.0, std::f32::consts::PI);
//! let parameter = default_materials()[1].to_parameter(0, 0);
//! # let _ = (frustum, sphere, parameter);
//! ```
mod camera;
mod config;
mod models;
mod structs;
mod texture;

pub use camera::{Camera, CameraType, Frustum, Projection};
pub use config::{
    CameraConfig, Config, EnvironmentConfig, LightConfig, MissKind, ProgramsConfig, RenderConfig, TexturesConfig,
    WindowConfig,
};
pub use models::{
    create_box, create_parallelogram, create_plane, create_sphere, create_torus, load_exr, load_hdr, load_hdri, HdrImage,
    Mesh,
};
pub use structs::{
    absorption_coefficient, default_materials, light_material, BsdfKind, LightDefinition, MaterialDesc,
    MaterialParameter, VertexAttributes, FLAG_THINWALLED, LIGHT_ENVIRONMENT, LIGHT_PARALLELOGRAM, RT_DEFAULT_MAX,
};
pub use texture::{load_environment, load_texture, load_texture_or_placeholder, placeholder_texture, EnvironmentMap, TextureImage};

// Re-exported so callers build vectors and angles with the same versions.
pub use cgmath;
pub use glam;
