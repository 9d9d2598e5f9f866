use std::path::{Path, PathBuf};

use anyhow::Context;
use instant::Instant;
use rt_utils::HostDevice;
use scene::{Config, MissKind};

pub mod display;
pub mod error;
pub mod geometry;
pub mod helper;
pub mod instances;
pub mod params;
pub mod pipeline;
pub mod preview;
pub mod programs;
pub mod sbt;
pub mod state;

pub use display::{Display, HeadlessDisplay};
pub use error::{RenderError, RenderResult};
pub use helper::{default_scene, SceneObject, SceneSetup};
pub use preview::PreviewKernel;
pub use programs::{placeholder_binaries, BinarySource, DirectorySource};
pub use state::{PresentCadence, RenderOptions, State};

/// Iterations rendered by [`run`] when the configuration doesn't limit them.
pub const DEFAULT_RUN_FRAMES: u32 = 64;

/// Settings of a headless [`run`] that override the configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSettings {
    pub config_path: PathBuf,
    pub output: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frames: Option<u32>,
    pub interop: Option<bool>,
    pub light: Option<bool>,
    pub miss: Option<MissKind>,
    pub environment: Option<String>,
    /// Use stand-in program binaries instead of the configured directory.
    pub placeholder_programs: bool,
}

impl RunSettings {
    /// Loads the configuration file and applies the overrides on top of it.
    pub fn config(&self) -> anyhow::Result<Config> {
        let path = self.config_path.to_string_lossy();
        let mut config = Config::new_or_default(&path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Loading configuration {}", path))?;

        if let Some(width) = self.width {
            config.window.width = width;
        }
        if let Some(height) = self.height {
            config.window.height = height;
        }
        if let Some(frames) = self.frames {
            config.render.frames = frames;
        }
        if let Some(interop) = self.interop {
            config.render.interop = interop;
        }
        if let Some(light) = self.light {
            config.light.enabled = light;
        }
        if let Some(miss) = self.miss {
            config.environment.miss = miss;
        }
        if let Some(environment) = &self.environment {
            config.environment.path = Some(environment.clone());
        }
        Ok(config)
    }
}

/// Renders the default scene without a window.
///
/// The host device stands in for the GPU, its primary rays are shaded by [`PreviewKernel`].
/// After the configured number of iterations the accumulated image is written as PNG when
/// an output path is given.
///
/// # Arguments
///
/// * `settings` - Configuration file and command line overrides.
///
/// # Returns
///
/// * `u32` - The number of iterations that were accumulated.
///
/// # Errors
///
/// Fails if the configuration is invalid, a program binary is missing, any device call of the
/// setup or a frame fails or the image can't be written.
pub fn run(settings: &RunSettings) -> anyhow::Result<u32> {
    let config = settings.config()?;
    let mut options = RenderOptions::from_config(&config);
    if options.frames == 0 {
        options.frames = DEFAULT_RUN_FRAMES;
    }
    let setup = default_scene(&config);
    log::info!(
        "Rendering {} objects at {}x{} for {} iterations",
        setup.objects.len(),
        options.width,
        options.height,
        options.frames
    );

    let device = HostDevice::new().with_kernel(Box::new(PreviewKernel::new(0x5EED)));
    let mut state = if settings.placeholder_programs {
        State::new(device, HeadlessDisplay::new(), &options, setup, &placeholder_binaries())
    } else {
        let source = DirectorySource::new(&config.programs.directory, config.programs.extension.as_str());
        State::new(device, HeadlessDisplay::new(), &options, setup, &source)
    }
    .context("Creating the renderer")?;

    let start = Instant::now();
    while state.iteration() < options.frames {
        state.render().context("Rendering a frame")?;
    }
    log::info!(
        "{} iterations in {:.3}s",
        state.iteration(),
        start.elapsed().as_secs_f64()
    );

    if let Some(output) = &settings.output {
        let (width, height) = state.size();
        let pixels = state.read_output().context("Reading the output buffer")?;
        save_png(output, width, height, &pixels)?;
        log::info!("Wrote {}", output.display());
    }
    Ok(state.iteration())
}

/// Converts linear RGBA to 8 bit, clamping to [0, 1].
pub fn to_rgba8(pixels: &[[f32; 4]]) -> Vec<u8> {
    pixels
        .iter()
        .flat_map(|pixel| pixel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        .collect()
}

fn save_png(path: &Path, width: u32, height: u32, pixels: &[[f32; 4]]) -> anyhow::Result<()> {
    // Row 0 is the bottom of the image on the device.
    let mut image = image::RgbaImage::from_raw(width, height, to_rgba8(pixels))
        .context("Output size does not match the viewport")?;
    image::imageops::flip_vertical_in_place(&mut image);
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_rgba8_clamps() {
        let bytes = to_rgba8(&[[0.0, 0.5, 2.0, -1.0], [1.0, 1.0, 1.0, 1.0]]);
        assert_eq!(bytes, vec![0, 128, 255, 0, 255, 255, 255, 255]);
    }

    #[test]
    fn test_overrides_apply_on_defaults() {
        let settings = RunSettings {
            config_path: PathBuf::from("does/not/exist.toml"),
            width: Some(32),
            frames: Some(3),
            miss: Some(MissKind::Null),
            light: Some(true),
            ..Default::default()
        };
        let config = settings.config().unwrap();
        assert_eq!(config.window.width, 32);
        assert_eq!(config.window.height, Config::default().window.height);
        assert_eq!(config.render.frames, 3);
        assert_eq!(config.environment.miss, MissKind::Null);
        assert!(config.light.enabled);
    }

    #[test]
    fn test_headless_run() {
        let settings = RunSettings {
            config_path: PathBuf::from("does/not/exist.toml"),
            width: Some(8),
            height: Some(4),
            frames: Some(3),
            placeholder_programs: true,
            ..Default::default()
        };
        assert_eq!(run(&settings).unwrap(), 3);
    }

    #[test]
    fn test_missing_programs_fail() {
        let settings = RunSettings {
            config_path: PathBuf::from("does/not/exist.toml"),
            width: Some(2),
            height: Some(2),
            frames: Some(1),
            ..Default::default()
        };
        let error = run(&settings).unwrap_err();
        assert!(error.chain().any(|cause| cause.to_string().contains("could not be read")));
    }
}
