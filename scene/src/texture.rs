use std::f32::consts::PI;

use crate::models::{load_hdr, HdrImage};

/// 8 bit RGBA image, row major, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub fn load_texture(path: &str) -> Result<TextureImage, image::ImageError> {
    let image = image::open(path)?.to_rgba8();
    let (width, height) = image.dimensions();
    Ok(TextureImage {
        width,
        height,
        pixels: image.into_raw(),
    })
}

/// 2x2 red, green, blue and yellow texture, stands in for images that could not be loaded.
pub fn placeholder_texture() -> TextureImage {
    TextureImage {
        width: 2,
        height: 2,
        pixels: vec![
            255, 0, 0, 255, 0, 255, 0, 255,
            0, 0, 255, 255, 255, 255, 0, 255,
        ],
    }
}

pub fn load_texture_or_placeholder(path: &str) -> TextureImage {
    match load_texture(path) {
        Ok(texture) => texture,
        Err(e) => {
            log::warn!("Failed to load texture {}: {}, using a placeholder", path, e);
            placeholder_texture()
        }
    }
}

/// Spherical environment with the tables needed to importance sample it.
///
/// `cdf_u` holds one row of `width + 1` entries per image row, `cdf_v` has `height + 1`
/// entries. Both are normalized to end at one. `integral` is the unnormalized end of `cdf_v`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentMap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
    pub cdf_u: Vec<f32>,
    pub cdf_v: Vec<f32>,
    pub integral: f32,
}

impl EnvironmentMap {
    pub fn from_hdr(image: HdrImage) -> Self {
        let (cdf_u, cdf_v, integral) = spherical_cdf(image.width as usize, image.height as usize, &image.pixels);
        Self {
            width: image.width,
            height: image.height,
            pixels: image.pixels,
            cdf_u,
            cdf_v,
            integral,
        }
    }

    pub fn white(width: u32, height: u32) -> Self {
        Self::from_hdr(HdrImage {
            width,
            height,
            pixels: vec![[1.0; 4]; (width * height) as usize],
        })
    }

    /// Flattens the pixels for an RGBA32F texture upload.
    pub fn texels(&self) -> &[f32] {
        bytemuck::cast_slice(&self.pixels)
    }
}

/// Loads an HDR or EXR environment. Falls back to an 8x8 white environment when it can't be read.
pub fn load_environment(path: &str) -> EnvironmentMap {
    match load_hdr(path) {
        Ok(image) if image.width > 0 && image.height > 0 => EnvironmentMap::from_hdr(image),
        Ok(_) => {
            log::warn!("Environment {} is empty, using a white environment", path);
            EnvironmentMap::white(8, 8)
        }
        Err(e) => {
            log::warn!("Failed to load environment {}: {}, using a white environment", path, e);
            EnvironmentMap::white(8, 8)
        }
    }
}

fn luminance(pixel: &[f32; 4]) -> f32 {
    (0.2126 * pixel[0] + 0.7152 * pixel[1] + 0.0722 * pixel[2]).max(0.0)
}

/// Accumulates `values` into `cdf[1..]` and normalizes. Returns the unnormalized sum.
fn integrate(values: impl Iterator<Item = f32>, cdf: &mut [f32]) -> f32 {
    let n = (cdf.len() - 1) as f32;
    cdf[0] = 0.0;
    for (i, value) in values.enumerate() {
        cdf[i + 1] = cdf[i] + value / n;
    }
    let integral = cdf[cdf.len() - 1];
    if integral > 0.0 {
        cdf.iter_mut().skip(1).for_each(|c| *c /= integral);
    } else {
        // Nothing to sample, fall back to uniform.
        let len = cdf.len();
        cdf.iter_mut().enumerate().for_each(|(i, c)| *c = i as f32 / (len - 1) as f32);
    }
    integral
}

fn spherical_cdf(width: usize, height: usize, pixels: &[[f32; 4]]) -> (Vec<f32>, Vec<f32>, f32) {
    let mut cdf_u = vec![0.0; (width + 1) * height];
    let mut cdf_v = vec![0.0; height + 1];
    let mut row_integrals = Vec::with_capacity(height);

    for (y, row) in cdf_u.chunks_exact_mut(width + 1).enumerate() {
        let sin_theta = (PI * (y as f32 + 0.5) / height as f32).sin();
        let texels = &pixels[y * width..(y + 1) * width];
        row_integrals.push(integrate(texels.iter().map(|p| luminance(p) * sin_theta), row));
    }
    let integral = integrate(row_integrals.into_iter(), &mut cdf_v);
    (cdf_u, cdf_v, integral)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        let texture = placeholder_texture();
        assert_eq!(texture.pixels.len(), 2 * 2 * 4);
        assert_eq!(&texture.pixels[12..16], &[255, 255, 0, 255]);
    }

    #[test]
    fn test_missing_texture_uses_placeholder() {
        assert_eq!(load_texture_or_placeholder("does/not/exist.png"), placeholder_texture());
    }

    #[test]
    fn test_texture_from_png() {
        let path = std::env::temp_dir().join("scene_texture_test.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 4])).save(&path).unwrap();

        let texture = load_texture(path.to_str().unwrap()).unwrap();
        assert_eq!((texture.width, texture.height), (3, 2));
        assert_eq!(&texture.pixels[..4], &[1, 2, 3, 4]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_environment_is_white() {
        let environment = load_environment("does/not/exist.hdr");
        assert_eq!((environment.width, environment.height), (8, 8));
        assert!(environment.pixels.iter().all(|p| *p == [1.0; 4]));
    }

    #[test]
    fn test_cdf_shapes_and_bounds() {
        let environment = EnvironmentMap::white(4, 3);
        assert_eq!(environment.cdf_u.len(), 5 * 3);
        assert_eq!(environment.cdf_v.len(), 4);
        for row in environment.cdf_u.chunks_exact(5) {
            assert_eq!(row[0], 0.0);
            assert!((row[4] - 1.0).abs() < 1e-6);
            assert!(row.windows(2).all(|w| w[0] <= w[1]));
        }
        assert!((environment.cdf_v[3] - 1.0).abs() < 1e-6);
        assert!(environment.integral > 0.0);
    }

    #[test]
    fn test_cdf_follows_brightness() {
        let mut pixels = vec![[0.0; 4]; 4];
        pixels[3] = [1.0; 4];
        let environment = EnvironmentMap::from_hdr(HdrImage { width: 4, height: 1, pixels });
        assert_eq!(&environment.cdf_u[..4], &[0.0, 0.0, 0.0, 0.0]);
        assert!((environment.cdf_u[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_black_environment_is_uniform() {
        let environment = EnvironmentMap::from_hdr(HdrImage {
            width: 2,
            height: 2,
            pixels: vec![[0.0; 4]; 4],
        });
        assert_eq!(environment.integral, 0.0);
        assert_eq!(&environment.cdf_u[..3], &[0.0, 0.5, 1.0]);
    }
}
