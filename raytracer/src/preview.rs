use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rt_utils::{DeviceError, DevicePtr, DeviceResult, HostKernel, HostMemory};

use crate::params::SystemParameter;

/// Stand-in for the ray generation program on the host device.
///
/// Shades every primary ray by its direction with a jittered sample position and accumulates
/// the result into the output buffer the same way the device program does.
pub struct PreviewKernel {
    rng: StdRng,
}

impl PreviewKernel {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

fn sky(direction: Vec3) -> Vec3 {
    let t = 0.5 * (direction.y + 1.0);
    Vec3::ONE.lerp(Vec3::new(0.5, 0.7, 1.0), t)
}

impl HostKernel for PreviewKernel {
    fn launch(&mut self, memory: &mut HostMemory, params: DevicePtr, width: u32, height: u32) -> DeviceResult<()> {
        let parameter: SystemParameter = memory.read_pod(params)?;
        if parameter.output_buffer.is_null() {
            return Err(DeviceError::InvalidPointer(0));
        }

        let len = width as usize * height as usize;
        let mut pixels: Vec<[f32; 4]> =
            bytemuck::pod_collect_to_vec(memory.read(parameter.output_buffer, len * std::mem::size_of::<[f32; 4]>())?);

        let jitter = Vec3::new(self.rng.gen(), self.rng.gen(), 0.0);
        let u = Vec3::from(parameter.camera_u);
        let v = Vec3::from(parameter.camera_v);
        let w = Vec3::from(parameter.camera_w);
        let weight = 1.0 / (parameter.iteration_index.max(0) as f32 + 1.0);

        for y in 0..height {
            for x in 0..width {
                let fragment_x = (x as f32 + jitter.x) / width as f32 * 2.0 - 1.0;
                let fragment_y = (y as f32 + jitter.y) / height as f32 * 2.0 - 1.0;
                let direction = (w + u * fragment_x + v * fragment_y).normalize_or_zero();
                let radiance = sky(direction);

                let pixel = &mut pixels[(y * width + x) as usize];
                let accumulated = if parameter.iteration_index == 0 {
                    radiance
                } else {
                    Vec3::new(pixel[0], pixel[1], pixel[2]).lerp(radiance, weight)
                };
                *pixel = accumulated.extend(1.0).to_array();
            }
        }

        memory.write(parameter.output_buffer, bytemuck::cast_slice(&pixels))
    }
}
