use std::f32::consts::PI;

use glam::{Vec3, Vec3A};

use crate::structs::VertexAttributes;

/// Indexed triangle mesh, three indices per triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub attributes: Vec<VertexAttributes>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Quads of a `columns` × `rows` vertex grid as two triangles each.
fn grid_indices(columns: u32, rows: u32) -> Vec<u32> {
    let mut indices = Vec::with_capacity(((columns - 1) * (rows - 1) * 6) as usize);
    for row in 0..rows - 1 {
        for column in 0..columns - 1 {
            let i = row * columns + column;
            indices.extend_from_slice(&[i, i + 1, i + columns + 1]);
            indices.extend_from_slice(&[i + columns + 1, i + columns, i]);
        }
    }
    indices
}

/// Creates a plane in the range [-1, 1] with its normal along `up_axis` (0 = x, 1 = y, 2 = z).
pub fn create_plane(tess_u: u32, tess_v: u32, up_axis: u32) -> Mesh {
    let tess_u = tess_u.max(1);
    let tess_v = tess_v.max(1);

    // Local frame: the plane is built in xy and then swizzled onto the requested axis.
    let swizzle = |p: Vec3| match up_axis {
        0 => Vec3::new(p.z, p.x, p.y),
        1 => Vec3::new(p.x, p.z, -p.y),
        _ => p,
    };

    let mut attributes = Vec::with_capacity(((tess_u + 1) * (tess_v + 1)) as usize);
    for j in 0..=tess_v {
        let v = j as f32 / tess_v as f32;
        for i in 0..=tess_u {
            let u = i as f32 / tess_u as f32;
            let position = Vec3::new(u * 2.0 - 1.0, v * 2.0 - 1.0, 0.0);
            attributes.push(VertexAttributes::new(
                swizzle(position),
                swizzle(Vec3::X),
                swizzle(Vec3::Z),
                Vec3::new(u, v, 0.0),
            ));
        }
    }

    Mesh {
        attributes,
        indices: grid_indices(tess_u + 1, tess_v + 1),
    }
}

/// Creates an axis aligned box in the range [-1, 1] with flat normals per face.
pub fn create_box() -> Mesh {
    // (normal, tangent) per face, the bitangent is normal × tangent.
    let faces = [
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
    ];
    let corners = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];

    let mut mesh = Mesh::default();
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let base = mesh.attributes.len() as u32;
        for (u, v) in corners {
            let position = normal + tangent * (u * 2.0 - 1.0) + bitangent * (v * 2.0 - 1.0);
            mesh.attributes.push(VertexAttributes::new(position, tangent, normal, Vec3::new(u, v, 0.0)));
        }
        mesh.indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    mesh
}

/// Creates a sphere around the origin.
///
/// # Arguments
///
/// * `tess_u` - Subdivisions around the y axis.
/// * `tess_v` - Subdivisions from the north pole down to `max_theta`.
/// * `radius` - Sphere radius.
/// * `max_theta` - Polar angle where the surface ends, `PI` closes the sphere.
pub fn create_sphere(tess_u: u32, tess_v: u32, radius: f32, max_theta: f32) -> Mesh {
    let tess_u = tess_u.max(3);
    let tess_v = tess_v.max(2);

    let mut attributes = Vec::with_capacity(((tess_u + 1) * (tess_v + 1)) as usize);
    for j in 0..=tess_v {
        let theta = (1.0 - j as f32 / tess_v as f32) * max_theta;
        let (sin_theta, cos_theta) = theta.sin_cos();
        for i in 0..=tess_u {
            let phi = i as f32 / tess_u as f32 * 2.0 * PI;
            let (sin_phi, cos_phi) = phi.sin_cos();

            let normal = Vec3::new(-sin_theta * sin_phi, cos_theta, -sin_theta * cos_phi);
            let tangent = Vec3::new(-cos_phi, 0.0, sin_phi);
            attributes.push(VertexAttributes::new(
                normal * radius,
                tangent,
                normal,
                Vec3::new(i as f32 / tess_u as f32, j as f32 / tess_v as f32, 0.0),
            ));
        }
    }

    Mesh {
        attributes,
        indices: grid_indices(tess_u + 1, tess_v + 1),
    }
}

/// Creates a torus lying in the xz plane.
///
/// `outer_radius` is the distance from the origin to the centre of the tube, `inner_radius` the tube radius.
pub fn create_torus(tess_u: u32, tess_v: u32, outer_radius: f32, inner_radius: f32) -> Mesh {
    let tess_u = tess_u.max(3);
    let tess_v = tess_v.max(3);

    let mut attributes = Vec::with_capacity(((tess_u + 1) * (tess_v + 1)) as usize);
    for j in 0..=tess_v {
        let psi = j as f32 / tess_v as f32 * 2.0 * PI;
        let (sin_psi, cos_psi) = psi.sin_cos();
        for i in 0..=tess_u {
            let phi = i as f32 / tess_u as f32 * 2.0 * PI;
            let (sin_phi, cos_phi) = phi.sin_cos();

            let ring = Vec3A::new(cos_phi, 0.0, -sin_phi);
            let normal = ring * cos_psi + Vec3A::Y * sin_psi;
            let position = ring * outer_radius + normal * inner_radius;
            let tangent = Vec3A::new(-sin_phi, 0.0, -cos_phi);
            attributes.push(VertexAttributes::new(
                position.into(),
                tangent.into(),
                normal.into(),
                Vec3::new(i as f32 / tess_u as f32, j as f32 / tess_v as f32, 0.0),
            ));
        }
    }

    Mesh {
        attributes,
        indices: grid_indices(tess_u + 1, tess_v + 1),
    }
}

/// Creates the two triangle quad of a parallelogram light.
pub fn create_parallelogram(position: Vec3, vec_u: Vec3, vec_v: Vec3, normal: Vec3) -> Mesh {
    let tangent = vec_u.normalize_or_zero();
    let corners = [
        (position, Vec3::new(0.0, 0.0, 0.0)),
        (position + vec_u, Vec3::new(1.0, 0.0, 0.0)),
        (position + vec_u + vec_v, Vec3::new(1.0, 1.0, 0.0)),
        (position + vec_v, Vec3::new(0.0, 1.0, 0.0)),
    ];
    Mesh {
        attributes: corners
            .iter()
            .map(|&(corner, texcoord)| VertexAttributes::new(corner, tangent, normal, texcoord))
            .collect(),
        indices: vec![0, 1, 2, 2, 3, 0],
    }
}

//-----------Environment images-----------------
/// Linear floating point RGBA image, row major, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

pub fn load_hdr(path: &str) -> Result<HdrImage, Box<dyn std::error::Error>> {
    // check file extension if hdr or exr
    let extension = std::path::Path::new(path)
        .extension()
        .and_then(|extension| extension.to_str())
        .ok_or("No file extension found")?;
    match extension.to_ascii_lowercase().as_str() {
        "hdr" => load_hdri(path),
        "exr" => load_exr(path),
        _ => Err("Unsupported file format for background image. Supported formats are: .hdr, .exr".into()),
    }
}

pub fn load_hdri(path: &str) -> Result<HdrImage, Box<dyn std::error::Error>> {
    let contents = std::fs::read(path)?;
    let mut data = zune_hdr::HdrDecoder::new(contents);
    let pix: Vec<f32> = data.decode()?;
    let (width, height) = data.get_dimensions().ok_or("HDR image without dimensions")?;
    if pix.len() < width * height * 3 {
        return Err("HDR image is truncated".into());
    }

    let pixels = pix
        .chunks_exact(3)
        .take(width * height)
        .map(|rgb| [rgb[0], rgb[1], rgb[2], 1.0])
        .collect();
    Ok(HdrImage {
        width: width as u32,
        height: height as u32,
        pixels,
    })
}

pub fn load_exr(path: &str) -> Result<HdrImage, Box<dyn std::error::Error>> {
    use exr::prelude as exrs;
    use exr::prelude::*;

    let reader = exrs::read()
        .no_deep_data()
        .largest_resolution_level()
        .rgba_channels(
            |resolution, _channels: &RgbaChannels| -> HdrImage {
                HdrImage {
                    width: resolution.width() as u32,
                    height: resolution.height() as u32,
                    pixels: vec![[0.0; 4]; resolution.width() * resolution.height()],
                }
            },
            |image: &mut HdrImage, position, (r, g, b, a): (f32, f32, f32, f32)| {
                let index = position.y() * image.width as usize + position.x();
                image.pixels[index] = [r, g, b, a];
            },
        )
        .first_valid_layer()
        .all_attributes();

    let image: Image<Layer<SpecificChannels<HdrImage, RgbaChannels>>> = reader.from_file(path)?;
    Ok(image.layer_data.channel_data.pixels)
}
