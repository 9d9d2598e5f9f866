use cgmath::*;
use serde::Deserialize;

/// Represents a camera in 3D space.
///
/// The camera has a position and a rotation. The position is a point in 3D space, and the rotation is a quaternion that represents the orientation of the camera.
/// Without rotation the camera looks down the negative z axis with y up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Point3<f32>,
    pub rotation: Quaternion<f32>,
}

impl Camera {
    pub fn new<V: Into<Point3<f32>>, Y: Into<Rad<f32>> + Copy, P: Into<Rad<f32>> + Copy>(
        position: V,
        yaw: Y,
        pitch: P,
    ) -> Self {
        let quaternion = Quaternion::from_angle_y(yaw) * Quaternion::from_angle_x(pitch);
        log::debug!("Camera initial rotation quaternion = {:?}", quaternion);
        Self {
            position: position.into(),
            rotation: quaternion,
        }
    }

    /// Computes the viewing frustum the ray generation program spans its primary rays with.
    ///
    /// # Arguments
    ///
    /// * `projection` - Aspect ratio and vertical field of view of the viewport.
    ///
    /// # Returns
    ///
    /// * `Frustum` - `w` points at the centre of the image plane, `u` and `v` reach from there to its right and top edges.
    pub fn frustum(&self, projection: &Projection) -> Frustum {
        let forward = self.rotation.rotate_vector(Vector3::new(0.0, 0.0, -1.0)).normalize();
        let right = self.rotation.rotate_vector(Vector3::unit_x()).normalize();
        let up = self.rotation.rotate_vector(Vector3::unit_y()).normalize();

        let tan_half = (projection.fovy / 2.0).tan();
        Frustum {
            position: self.position.into(),
            u: (right * tan_half * projection.aspect).into(),
            v: (up * tan_half).into(),
            w: forward.into(),
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Point3::new(0.0, 1.25, 7.0), Deg(0.0), Deg(-5.0))
    }
}

/// Represents a projection of a 3D scene onto the 2D plane of the camera.
///
/// The projection is defined by an aspect ratio and a vertical field of view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    aspect: f32,
    pub fovy: Rad<f32>,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F) -> Self {
        Self {
            aspect: width.max(1) as f32 / height.max(1) as f32,
            fovy: fovy.into(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.aspect = width as f32 / height as f32;
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }
}

/// Camera origin and the three vectors spanning the primary rays.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    pub position: [f32; 3],
    pub u: [f32; 3],
    pub v: [f32; 3],
    pub w: [f32; 3],
}

/// Lens model, selects the lens shader the ray generation program calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraType {
    #[default]
    Pinhole = 0,
    Fisheye = 1,
    Sphere = 2,
}
