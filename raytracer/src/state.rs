use cgmath::Deg;
use instant::Instant;
use rt_utils::{
    BufferInitDescriptor, DeviceBuffer, DeviceError, DevicePtr, ExternalBuffer, MappedBuffer, RayTracingDevice,
    SharedBufferHandle,
};
use scene::{
    Camera, CameraType, Config, EnvironmentConfig, LightDefinition, MaterialDesc, MissKind, Projection,
    TexturesConfig,
};

use crate::display::Display;
use crate::error::{device_error, RenderError, RenderResult};
use crate::geometry::{build_mesh, GeometryRecord};
use crate::helper::{
    area_light_index, create_lights, material_parameters, setup_environment, setup_textures, EnvironmentResources,
    MaterialTextures, SceneSetup,
};
use crate::instances::{SceneAssembler, SceneGraph};
use crate::params::{ParameterField, SystemParameter, UniformBlock, SCENE_EPSILON_SCALE};
use crate::pipeline::{pipeline_options, Pipeline};
use crate::programs::{BinarySource, ProgramCatalog};
use crate::sbt::{DispatchTable, InstanceBinding, NO_LIGHT};

const PIXEL_SIZE: usize = std::mem::size_of::<[f32; 4]>();

/// Start up settings of the renderer. Everything here can be changed later through the
/// setters of [`State`], except for the output mode and the miss program.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub interop: bool,
    pub frames: u32,
    pub present: bool,
    pub path_lengths: [i32; 2],
    pub scene_epsilon_factor: f32,
    pub camera_type: CameraType,
    pub camera: Camera,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub environment: EnvironmentConfig,
    pub textures: TexturesConfig,
}

impl RenderOptions {
    pub fn from_config(config: &Config) -> Self {
        let camera = Camera::new(
            config.camera.position,
            Deg(config.camera.rotation[0]),
            Deg(config.camera.rotation[1]),
        );
        Self {
            width: config.window.width,
            height: config.window.height,
            interop: config.render.interop,
            frames: config.render.frames,
            present: config.render.present,
            path_lengths: config.render.path_lengths,
            scene_epsilon_factor: config.render.scene_epsilon_factor,
            camera_type: config.render.camera,
            camera,
            fov: config.camera.fov,
            environment: config.environment.clone(),
            textures: config.textures.clone(),
        }
    }
}

/// Decides when the accumulated image is handed to the display.
///
/// Right after a restart every frame is shown for half a second, after that once per
/// second unless `present` asks for every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentCadence {
    present: bool,
    present_next: bool,
    present_at_second: f64,
}

impl PresentCadence {
    pub fn new(present: bool) -> Self {
        Self {
            present,
            present_next: true,
            present_at_second: 1.0,
        }
    }

    pub fn restart(&mut self) {
        self.present_next = true;
        self.present_at_second = 1.0;
    }

    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn is_pending(&self) -> bool {
        self.present_next
    }

    /// Returns whether the current frame is presented and arms the next one.
    pub fn take(&mut self) -> bool {
        if self.present_next {
            self.present_next = self.present;
            true
        } else {
            false
        }
    }

    /// Updates the schedule with the time since the last restart. Returns true once per
    /// full second, which is when the frame rate gets reported.
    pub fn tick(&mut self, seconds: f64) -> bool {
        if seconds < 0.5 {
            self.present_at_second = 1.0;
            self.present_next = true;
            false
        } else if self.present_at_second < seconds {
            self.present_at_second = seconds.ceil();
            self.present_next = true;
            true
        } else {
            false
        }
    }
}

/// Where the launches accumulate into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputSurface {
    /// Owned by the renderer, read back to present.
    Private(DeviceBuffer),
    /// Owned by the display. Its device address is only valid while mapped.
    Shared(SharedBufferHandle),
}

impl OutputSurface {
    fn destroy<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> RenderResult<()> {
        match self {
            OutputSurface::Private(buffer) => buffer.free(device).map_err(device_error("output teardown")),
            OutputSurface::Shared(handle) => device
                .unregister_shared_buffer(handle)
                .map_err(device_error("output teardown")),
        }
    }
}

fn output_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * PIXEL_SIZE
}

/// Registers the display's buffer and checks it is large enough. Returns the handle and the
/// address of the first mapping, which is only a hint since every map may move it.
fn register_shared<D: RayTracingDevice + ?Sized>(
    device: &mut D,
    buffer: ExternalBuffer,
    width: u32,
    height: u32,
) -> RenderResult<(SharedBufferHandle, DevicePtr)> {
    let required = output_size(width, height);
    let handle = device
        .register_shared_buffer(buffer, required)
        .map_err(device_error("output registration"))?;
    let mapped = MappedBuffer::map(&mut *device, handle).map_err(device_error("output registration"))?;
    let (ptr, size) = (mapped.ptr(), mapped.size());
    mapped.unmap().map_err(device_error("output registration"))?;
    if size < required {
        return Err(device_error("output registration")(DeviceError::OutOfBounds {
            addr: ptr.0,
            len: required,
        }));
    }
    Ok((handle, ptr))
}

fn create_private<D: RayTracingDevice + ?Sized>(device: &mut D, width: u32, height: u32) -> RenderResult<DeviceBuffer> {
    // No initialization, iteration 0 overwrites every pixel.
    BufferInitDescriptor::new(Some("Output"))
        .create_empty_buffer(device, output_size(width, height))
        .map_err(device_error("output"))
}

/// The progressive renderer.
///
/// Owns every device resource of the scene and the pipeline. Each [`State::render`] call
/// adds one iteration to the accumulation, any change of what is rendered restarts it.
pub struct State<D: RayTracingDevice, P: Display> {
    device: D,
    display: P,
    width: u32,
    height: u32,
    //Accumulation
    iteration: u32,
    frames: u32,
    cadence: PresentCadence,
    timer: Instant,
    //Camera
    camera: Camera,
    projection: Projection,
    //Scene
    geometries: Vec<GeometryRecord>,
    scene: SceneGraph,
    materials: Vec<MaterialDesc>,
    material_buffer: DeviceBuffer,
    textures: MaterialTextures,
    environment: Option<EnvironmentResources>,
    lights: Vec<LightDefinition>,
    light_buffer: DeviceBuffer,
    miss: MissKind,
    /// Instance id of the area light geometry.
    light_instance: Option<usize>,
    //Pipeline
    pipeline: Pipeline,
    dispatch: DispatchTable,
    params: UniformBlock,
    //Output
    output: OutputSurface,
    host_output: Vec<[f32; 4]>,
}

impl<D: RayTracingDevice, P: Display> State<D, P> {
    /// Builds the renderer.
    ///
    /// # Arguments
    ///
    /// * `device` - The device everything is created on.
    /// * `display` - Receives the presented frames and owns the shared buffer in interop mode.
    /// * `options` - Viewport, output mode and the initial render settings.
    /// * `setup` - Objects and materials, an object's position is its instance id.
    /// * `source` - The compiled program binaries.
    ///
    /// # Returns
    ///
    /// * `State` - Ready to render, no launch has been issued yet.
    ///
    /// # Setup Order
    /// Material textures; geometry and the instance acceleration structure; environment and
    /// lights; program modules and groups, the pipeline and the shader binding table, after
    /// which the groups and modules are destroyed; the output surface; the light, material and
    /// parameter buffers.
    ///
    /// A device error at any step is returned as is. Resources of the steps that already
    /// completed are not released when a later one fails.
    pub fn new<S: BinarySource + ?Sized>(
        mut device: D,
        mut display: P,
        options: &RenderOptions,
        setup: SceneSetup,
        source: &S,
    ) -> RenderResult<Self> {
        setup.validate()?;
        if options.width == 0 || options.height == 0 {
            return Err(RenderError::Config(format!(
                "Viewport {}x{} must not be empty",
                options.width, options.height
            )));
        }
        let start = Instant::now();

        let textures = setup_textures(&mut device, &options.textures)?;
        let time_materials = start.elapsed().as_secs_f64();

        let mut geometries = Vec::with_capacity(setup.objects.len());
        let mut assembler = SceneAssembler::new();
        for (i, object) in setup.objects.iter().enumerate() {
            let record = build_mesh(&mut device, &object.mesh)?;
            assembler.add_instance(record.handle, object.transform, i);
            geometries.push(record);
        }
        let scene = assembler.build(&mut device)?;
        let time_scene = start.elapsed().as_secs_f64();

        let miss = options.environment.miss;
        let environment = setup_environment(&mut device, &options.environment)?;
        let lights = create_lights(miss, environment.as_ref(), setup.area_light);
        let light_instance = setup.area_light.and(setup.objects.len().checked_sub(1));

        let compile_options = pipeline_options();
        let catalog = ProgramCatalog::create(&mut device, source, miss, &compile_options)?;
        let pipeline = Pipeline::build(&mut device, catalog.groups(), &compile_options)?;

        let bindings: Vec<InstanceBinding> = geometries
            .iter()
            .zip(&setup.materials)
            .enumerate()
            .map(|(id, (geometry, material))| InstanceBinding {
                indices: geometry.indices.ptr,
                attributes: geometry.attributes.ptr,
                uses_cutout: material.use_cutout_texture,
                light_index: if Some(id) == light_instance { area_light_index(miss) } else { NO_LIGHT },
            })
            .collect();
        let dispatch = DispatchTable::build(&mut device, &catalog, &bindings)?;
        catalog.destroy(&mut device)?;
        let time_pipeline = start.elapsed().as_secs_f64();

        let (output, output_ptr) = if options.interop {
            let buffer = display.shared_buffer(options.width, options.height);
            let (handle, ptr) = register_shared(&mut device, buffer, options.width, options.height)?;
            (OutputSurface::Shared(handle), ptr)
        } else {
            let buffer = create_private(&mut device, options.width, options.height)?;
            (OutputSurface::Private(buffer), buffer.ptr)
        };

        let light_buffer = BufferInitDescriptor::new(Some("Light definitions"))
            .create_new_buffer(&mut device, &lights)
            .map_err(device_error("lights"))?;
        let material_buffer = BufferInitDescriptor::new(Some("Material parameters"))
            .create_new_buffer(&mut device, &material_parameters(&setup.materials, &textures))
            .map_err(device_error("materials"))?;

        let projection = Projection::new(options.width, options.height, Deg(options.fov));
        let mut host = SystemParameter {
            top_object: scene.root,
            output_buffer: output_ptr,
            light_definitions: light_buffer.ptr,
            material_parameters: material_buffer.ptr,
            env_rotation: options.environment.rotation,
            path_lengths: options.path_lengths,
            iteration_index: 0,
            scene_epsilon: options.scene_epsilon_factor * SCENE_EPSILON_SCALE,
            num_lights: lights.len() as u32,
            ..Default::default()
        };
        if let Some(environment) = &environment {
            host.env_texture = environment.texture;
            host.env_cdf_u = environment.cdf_u.ptr;
            host.env_cdf_v = environment.cdf_v.ptr;
            host.env_width = environment.width;
            host.env_height = environment.height;
            host.env_integral = environment.integral;
        }
        host.set_camera_type(options.camera_type);
        host.set_frustum(&options.camera.frustum(&projection));
        let params = UniformBlock::new(&mut device, host)?;
        let time_params = start.elapsed().as_secs_f64();

        log::info!("renderer: {:.3}s overall", time_params);
        log::info!("materials: {:.3}s", time_materials);
        log::info!("scene: {:.3}s", time_scene - time_materials);
        log::info!("pipeline: {:.3}s", time_pipeline - time_scene);
        log::info!("parameters: {:.3}s", time_params - time_pipeline);

        Ok(Self {
            device,
            display,
            width: options.width,
            height: options.height,
            iteration: 0,
            frames: options.frames,
            cadence: PresentCadence::new(options.present),
            timer: Instant::now(),
            camera: options.camera,
            projection,
            geometries,
            scene,
            materials: setup.materials,
            material_buffer,
            textures,
            environment,
            lights,
            light_buffer,
            miss,
            light_instance,
            pipeline,
            dispatch,
            params,
            output,
            host_output: if options.interop {
                Vec::new()
            } else {
                vec![[0.0; 4]; options.width as usize * options.height as usize]
            },
        })
    }

    /// Renders one frame.
    ///
    /// Restarts first if the camera moved since the last frame, then adds one iteration unless
    /// the frame limit is reached and presents if the cadence asks for it.
    ///
    /// # Returns
    ///
    /// * `bool` - Whether a new image was handed to the display.
    pub fn render(&mut self) -> RenderResult<bool> {
        let frustum = self.camera.frustum(&self.projection);
        if frustum != self.params.host.frustum() {
            self.params.host.set_frustum(&frustum);
            self.restart_accumulation()?;
        }

        if self.frames == 0 || self.iteration < self.frames {
            self.advance()?;
        }

        let mut repaint = false;
        if self.cadence.take() {
            self.present()?;
            repaint = true;
        }

        let seconds = self.timer.elapsed().as_secs_f64();
        if self.cadence.tick(seconds) {
            let fps = self.iteration as f64 / seconds;
            log::info!("{} / {:.3} = {:.3} fps", self.iteration, seconds, fps);
        }
        Ok(repaint)
    }

    fn advance(&mut self) -> RenderResult<()> {
        self.params.host.iteration_index = self.iteration as i32;
        self.params.upload_field(&mut self.device, ParameterField::IterationIndex)?;

        match self.output {
            OutputSurface::Shared(handle) => {
                let mut mapped = MappedBuffer::map(&mut self.device, handle).map_err(device_error("output map"))?;
                self.params.host.output_buffer = mapped.ptr();
                self.params.upload_field(mapped.device(), ParameterField::OutputBuffer)?;
                mapped
                    .device()
                    .launch(
                        self.pipeline.handle,
                        self.params.ptr(),
                        self.params.size(),
                        self.dispatch.sbt(),
                        self.width,
                        self.height,
                    )
                    .map_err(device_error("launch"))?;
                mapped.unmap().map_err(device_error("output unmap"))?;
            }
            OutputSurface::Private(_) => {
                self.device
                    .launch(
                        self.pipeline.handle,
                        self.params.ptr(),
                        self.params.size(),
                        self.dispatch.sbt(),
                        self.width,
                        self.height,
                    )
                    .map_err(device_error("launch"))?;
            }
        }
        self.iteration += 1;
        Ok(())
    }

    fn present(&mut self) -> RenderResult<()> {
        match self.output {
            OutputSurface::Shared(_) => self.display.present_shared(self.width, self.height),
            OutputSurface::Private(buffer) => {
                self.device.synchronize().map_err(device_error("present"))?;
                buffer
                    .read(&mut self.device, &mut self.host_output)
                    .map_err(device_error("present"))?;
                self.display.present_pixels(self.width, self.height, &self.host_output);
            }
        }
        Ok(())
    }

    /// Discards the accumulated image. The next frame starts at iteration 0 and is presented.
    pub fn restart_accumulation(&mut self) -> RenderResult<()> {
        self.iteration = 0;
        self.cadence.restart();
        self.device.synchronize().map_err(device_error("restart"))?;
        self.params.upload_all(&mut self.device)?;
        self.timer = Instant::now();
        Ok(())
    }

    /// Reshapes the viewport. Zero or unchanged sizes are ignored.
    ///
    /// The output surface is reallocated, or registered again if it is shared, and the
    /// accumulation restarts once.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<bool> {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return Ok(false);
        }
        self.device.synchronize().map_err(device_error("resize"))?;

        match self.output {
            OutputSurface::Shared(handle) => {
                self.device
                    .unregister_shared_buffer(handle)
                    .map_err(device_error("resize"))?;
                let buffer = self.display.resize_shared_buffer(width, height);
                let (handle, ptr) = register_shared(&mut self.device, buffer, width, height)?;
                self.output = OutputSurface::Shared(handle);
                self.params.host.output_buffer = ptr;
            }
            OutputSurface::Private(buffer) => {
                buffer.free(&mut self.device).map_err(device_error("resize"))?;
                let buffer = create_private(&mut self.device, width, height)?;
                self.output = OutputSurface::Private(buffer);
                self.params.host.output_buffer = buffer.ptr;
                self.host_output = vec![[0.0; 4]; width as usize * height as usize];
            }
        }
        self.width = width;
        self.height = height;

        self.projection.resize(width, height);
        let frustum = self.camera.frustum(&self.projection);
        self.params.host.set_frustum(&frustum);
        self.restart_accumulation()?;
        Ok(true)
    }

    //-----------Edits-----------------
    /// Moves the camera. The change is picked up, and restarts, on the next frame.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn set_camera_type(&mut self, camera_type: CameraType) -> RenderResult<()> {
        self.params.host.set_camera_type(camera_type);
        self.restart_accumulation()
    }

    pub fn set_path_lengths(&mut self, path_lengths: [i32; 2]) -> RenderResult<()> {
        let [min, max] = path_lengths;
        if min < 0 || max < min {
            return Err(RenderError::Config(format!(
                "Invalid path lengths [{}, {}], expected 0 <= min <= max",
                min, max
            )));
        }
        self.params.host.path_lengths = path_lengths;
        self.restart_accumulation()
    }

    pub fn set_scene_epsilon_factor(&mut self, factor: f32) -> RenderResult<()> {
        self.params.host.scene_epsilon = factor.max(0.0) * SCENE_EPSILON_SCALE;
        self.restart_accumulation()
    }

    pub fn set_environment_rotation(&mut self, rotation: f32) -> RenderResult<()> {
        self.params.host.env_rotation = rotation;
        self.restart_accumulation()
    }

    /// Changes the emission of the area light. Returns false if the scene has none.
    pub fn set_light_emission(&mut self, emission: [f32; 3]) -> RenderResult<bool> {
        if self.light_instance.is_none() {
            return Ok(false);
        }
        let Some(light) = self.lights.last_mut() else {
            return Ok(false);
        };
        light.emission = emission;

        self.device.synchronize().map_err(device_error("lights"))?;
        self.light_buffer
            .write(&mut self.device, 0, &self.lights)
            .map_err(device_error("lights"))?;
        self.restart_accumulation()?;
        Ok(true)
    }

    /// Replaces the material of an instance.
    ///
    /// A change of the cutout flag also switches the instance's hit programs. The area
    /// light's material and ids outside of the scene are not editable, they return false.
    pub fn set_material(&mut self, index: usize, material: MaterialDesc) -> RenderResult<bool> {
        if index >= self.materials.len() || Some(index) == self.light_instance {
            log::debug!("Material {} is not editable", index);
            return Ok(false);
        }
        let cutout_changed = self.materials[index].use_cutout_texture != material.use_cutout_texture;
        self.materials[index] = material;

        if cutout_changed {
            self.dispatch
                .update_instance(&mut self.device, index, self.materials[index].use_cutout_texture)?;
        }

        self.device.synchronize().map_err(device_error("materials"))?;
        self.material_buffer
            .write(&mut self.device, 0, &material_parameters(&self.materials, &self.textures))
            .map_err(device_error("materials"))?;
        self.restart_accumulation()?;
        Ok(true)
    }

    /// Limits the number of iterations, 0 renders forever. Only restarts when the new limit
    /// is below what has already been accumulated.
    pub fn set_frames(&mut self, frames: u32) -> RenderResult<()> {
        self.frames = frames;
        if frames != 0 && frames < self.iteration {
            self.restart_accumulation()?;
        }
        Ok(())
    }

    /// Present every frame instead of following the cadence.
    pub fn set_present(&mut self, present: bool) {
        self.cadence.set_present(present);
    }

    //-----------Queries-----------------
    /// The current accumulation, row major RGBA.
    pub fn read_output(&mut self) -> RenderResult<Vec<[f32; 4]>> {
        self.device.synchronize().map_err(device_error("read output"))?;
        let mut pixels = vec![[0.0f32; 4]; self.width as usize * self.height as usize];
        match self.output {
            OutputSurface::Private(buffer) => {
                buffer.read(&mut self.device, &mut pixels).map_err(device_error("read output"))?;
            }
            OutputSurface::Shared(handle) => {
                let mut mapped = MappedBuffer::map(&mut self.device, handle).map_err(device_error("read output"))?;
                let ptr = mapped.ptr();
                mapped
                    .device()
                    .copy_from_device(ptr, bytemuck::cast_slice_mut(&mut pixels))
                    .map_err(device_error("read output"))?;
                mapped.unmap().map_err(device_error("read output"))?;
            }
        }
        Ok(pixels)
    }

    /// Number of iterations accumulated since the last restart.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_present_pending(&self) -> bool {
        self.cadence.is_pending()
    }

    pub fn params(&self) -> &SystemParameter {
        &self.params.host
    }

    pub fn materials(&self) -> &[MaterialDesc] {
        &self.materials
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn instance_count(&self) -> usize {
        self.scene.instance_count()
    }

    pub fn lights(&self) -> &[LightDefinition] {
        &self.lights
    }

    pub fn miss(&self) -> MissKind {
        self.miss
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn display(&self) -> &P {
        &self.display
    }
}

fn report(result: RenderResult<()>) {
    if let Err(e) = result {
        log::error!("Teardown: {}", e);
    }
}

impl<D: RayTracingDevice, P: Display> Drop for State<D, P> {
    fn drop(&mut self) {
        let device = &mut self.device;
        // Nothing may still be running on anything freed below.
        report(device.synchronize().map_err(device_error("teardown")));

        report(self.textures.destroy(device));
        if let Some(environment) = self.environment {
            report(environment.destroy(device));
        }
        report(self.output.destroy(device));
        report(self.light_buffer.free(device).map_err(device_error("teardown")));
        report(self.material_buffer.free(device).map_err(device_error("teardown")));
        report(self.params.clone().destroy(device));
        for geometry in &self.geometries {
            report(geometry.destroy(device));
        }
        report(self.scene.ias.free(device).map_err(device_error("teardown")));
        report(self.dispatch.clone().destroy(device));
        report(self.pipeline.destroy(device));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::HeadlessDisplay;
    use crate::helper::{default_scene, SceneObject};
    use crate::instances::scale_translate;
    use crate::programs::placeholder_binaries;
    use crate::programs::ProgramRole;
    use rt_utils::{DeviceCall, HostDevice};
    use scene::{create_plane, default_materials};

    type TestState<'a> = State<&'a mut HostDevice, HeadlessDisplay>;

    fn options(width: u32, height: u32) -> RenderOptions {
        let mut config = Config::default();
        config.window.width = width;
        config.window.height = height;
        config.environment.miss = MissKind::Null;
        config.textures.albedo = String::from("does/not/exist.png");
        config.textures.cutout = String::from("does/not/exist.png");
        RenderOptions::from_config(&config)
    }

    fn planes(n: usize) -> SceneSetup {
        let materials = default_materials();
        SceneSetup {
            objects: (0..n)
                .map(|i| SceneObject {
                    name: format!("plane {}", i),
                    mesh: create_plane(1, 1, 1),
                    transform: scale_translate(1.0, [i as f32, 0.0, 0.0]),
                })
                .collect(),
            materials: (0..n).map(|i| materials[i % 5].clone()).collect(),
            area_light: None,
        }
    }

    fn state<'a>(device: &'a mut HostDevice, options: &RenderOptions, setup: SceneSetup) -> TestState<'a> {
        State::new(device, HeadlessDisplay::new(), options, setup, &placeholder_binaries()).unwrap()
    }

    fn launches(device: &HostDevice) -> Vec<SystemParameter> {
        device.launches().map(bytemuck::pod_read_unaligned).collect()
    }

    fn full_uploads(device: &HostDevice, params: DevicePtr) -> usize {
        device
            .calls()
            .iter()
            .filter(|call| **call == DeviceCall::CopyToDevice { dst: params, len: 144 })
            .count()
    }

    #[test]
    fn test_empty_scene_first_frame() {
        let mut device = HostDevice::new();
        let mut state = state(&mut device, &options(4, 4), SceneSetup::empty());
        assert_eq!(state.dispatch().records().len(), 0);
        assert_eq!(state.instance_count(), 0);
        assert!(state.lights().is_empty());

        assert!(state.render().unwrap());
        assert_eq!(state.iteration(), 1);

        let launched = launches(state.device());
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].iteration_index, 0);
        assert_eq!(launched[0].num_lights, 0);
    }

    #[test]
    fn test_iteration_uploaded_before_launch() {
        let mut device = HostDevice::new();
        let mut state = state(&mut device, &options(4, 4), planes(1));
        state.render().unwrap();
        state.render().unwrap();

        let launched = launches(state.device());
        assert_eq!(launched[1].iteration_index, 1);

        let calls = state.device().calls();
        let launch = calls.iter().rposition(|call| matches!(call, DeviceCall::Launch { .. })).unwrap();
        let field = DeviceCall::CopyToDevice {
            dst: state.params.ptr().offset(80),
            len: 4,
        };
        let upload = calls.iter().rposition(|call| *call == field).unwrap();
        assert!(upload < launch);
    }

    #[test]
    fn test_frame_limit_stops_launches() {
        let mut device = HostDevice::new();
        let mut options = options(2, 2);
        options.frames = 3;
        let mut state = state(&mut device, &options, planes(1));
        for _ in 0..5 {
            state.render().unwrap();
        }
        assert_eq!(state.iteration(), 3);
        assert_eq!(state.device().launches().count(), 3);

        // raising the limit continues the accumulation
        state.set_frames(4).unwrap();
        state.render().unwrap();
        assert_eq!(state.iteration(), 4);

        // lowering it below the accumulated count restarts
        state.set_frames(2).unwrap();
        assert_eq!(state.iteration(), 0);
    }

    #[test]
    fn test_every_edit_restarts() {
        let mut device = HostDevice::new();
        let mut config = Config::default();
        config.environment.miss = MissKind::Null;
        config.light.enabled = true;
        config.window.width = 2;
        config.window.height = 2;
        let options = RenderOptions::from_config(&config);
        let mut state = state(&mut device, &options, default_scene(&config));

        for edit in 0..7 {
            for _ in 0..3 {
                state.render().unwrap();
            }
            state.cadence.present_next = false;
            assert!(state.iteration() >= 3);

            match edit {
                0 => state.set_scene_epsilon_factor(100.0).unwrap(),
                1 => state.set_path_lengths([1, 4]).unwrap(),
                2 => state.set_environment_rotation(0.5).unwrap(),
                3 => assert!(state.set_light_emission([2.0; 3]).unwrap()),
                4 => {
                    let mut material = state.materials()[1].clone();
                    material.ior = 1.4;
                    assert!(state.set_material(1, material).unwrap());
                }
                5 => state.set_camera_type(CameraType::Fisheye).unwrap(),
                _ => {
                    state.set_camera(Camera::new([0.0, 2.0, 5.0], Deg(10.0), Deg(0.0)));
                    // picked up by the next frame
                    state.render().unwrap();
                }
            }
            assert!(state.iteration() <= 1);
            assert!(state.is_present_pending());
        }

        let mirror: SystemParameter = state.device().memory().read_pod(state.params.ptr()).unwrap();
        assert_eq!(mirror.path_lengths, [1, 4]);
        assert_eq!(mirror.camera_type, CameraType::Fisheye as i32);
        assert_eq!(mirror.env_rotation, 0.5);
    }

    #[test]
    fn test_restart_forces_present() {
        let mut device = HostDevice::new();
        let mut state = state(&mut device, &options(2, 2), planes(1));
        state.render().unwrap();
        state.cadence.present_next = false;
        state.cadence.present_at_second = 100.0;
        state.timer = Instant::now() - std::time::Duration::from_secs(10);

        assert!(!state.render().unwrap());
        state.restart_accumulation().unwrap();
        assert!(state.is_present_pending());
        assert!(state.render().unwrap());
    }

    #[test]
    fn test_cadence() {
        let mut cadence = PresentCadence::new(false);
        assert!(cadence.take());
        assert!(!cadence.take());

        // the first half second shows every frame
        assert!(!cadence.tick(0.2));
        assert!(cadence.take());

        // then at most once per second
        assert!(!cadence.take());
        assert!(cadence.tick(1.2));
        assert!(cadence.take());
        assert!(!cadence.tick(1.7));
        assert!(!cadence.take());
        assert!(cadence.tick(2.1));
        assert!(cadence.take());

        cadence.set_present(true);
        cadence.restart();
        assert!(cadence.take());
        assert!(cadence.take());
    }

    #[test]
    fn test_resize_rejects_empty_and_unchanged() {
        let mut device = HostDevice::new();
        let mut state = state(&mut device, &options(4, 4), planes(1));
        let calls = state.device().calls().len();

        assert!(!state.resize(0, 8).unwrap());
        assert!(!state.resize(8, 0).unwrap());
        assert!(!state.resize(4, 4).unwrap());
        assert_eq!(state.device().calls().len(), calls);
        assert_eq!(state.size(), (4, 4));
    }

    #[test]
    fn test_resize_reallocates_once() {
        let mut device = HostDevice::new();
        let mut state = state(&mut device, &options(4, 4), planes(1));
        state.render().unwrap();
        state.render().unwrap();
        state.device.clear_calls();

        assert!(state.resize(8, 2).unwrap());
        assert_eq!(state.iteration(), 0);
        let allocs: Vec<_> = state
            .device()
            .calls()
            .iter()
            .filter_map(|call| match call {
                DeviceCall::Alloc { size, .. } => Some(*size),
                _ => None,
            })
            .collect();
        assert_eq!(allocs, vec![8 * 2 * 16]);
        assert_eq!(full_uploads(state.device(), state.params.ptr()), 1);

        // the aspect change doesn't cause a second restart
        state.render().unwrap();
        assert_eq!(state.iteration(), 1);
        assert_eq!(full_uploads(state.device(), state.params.ptr()), 1);
        assert_eq!(state.read_output().unwrap().len(), 16);
    }

    #[test]
    fn test_shared_output_is_mapped_per_frame() {
        let mut device = HostDevice::new();
        let mut options = options(2, 2);
        options.interop = true;
        let mut state = state(&mut device, &options, planes(1));
        state.device.clear_calls();
        state.render().unwrap();
        state.render().unwrap();

        let calls = state.device().calls();
        let maps: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, call)| matches!(call, DeviceCall::MapShared { .. }))
            .map(|(i, _)| i)
            .collect();
        let launches_at: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, call)| matches!(call, DeviceCall::Launch { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(maps.len(), 2);
        for (map, launch) in maps.iter().zip(&launches_at) {
            assert!(map < launch);
            assert!(matches!(calls[launch + 1], DeviceCall::UnmapShared(_)));
        }

        // every frame renders into the address of its own mapping
        let mapped: Vec<DevicePtr> = calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::MapShared { ptr, .. } => Some(*ptr),
                _ => None,
            })
            .collect();
        let launched = launches(state.device());
        assert_eq!(launched[0].output_buffer, mapped[0]);
        assert_eq!(launched[1].output_buffer, mapped[1]);
        assert_ne!(mapped[0], mapped[1]);
        // both frames fall into the first half second
        assert_eq!(state.display().presented, 2);
    }

    #[test]
    fn test_shared_resize_registers_again() {
        let mut device = HostDevice::new();
        let mut options = options(2, 2);
        options.interop = true;
        let mut state = state(&mut device, &options, planes(1));
        state.device.clear_calls();

        assert!(state.resize(3, 3).unwrap());
        let calls = state.device().calls();
        assert!(matches!(calls[1], DeviceCall::UnregisterShared(_)));
        assert!(matches!(calls[2], DeviceCall::RegisterShared { size: 144, .. }));
        assert!(matches!(calls[3], DeviceCall::MapShared { .. }));
        assert!(matches!(calls[4], DeviceCall::UnmapShared(_)));
        assert_eq!(state.display().size, (3, 3));
    }

    #[test]
    fn test_cutout_flip_switches_headers() {
        let mut device = HostDevice::new();
        let mut setup = planes(1);
        setup.materials[0].use_cutout_texture = false;
        let mut state = state(&mut device, &options(2, 2), setup);
        let material_index = state.dispatch().records()[0].data.material_index;

        let mut material = state.materials()[0].clone();
        material.use_cutout_texture = true;
        assert!(state.set_material(0, material).unwrap());

        let table = state.dispatch();
        assert_eq!(table.records()[0].header, table.variant_header(ProgramRole::HitRadianceCutout));
        assert_eq!(table.records()[1].header, table.variant_header(ProgramRole::HitShadowCutout));
        assert_eq!(table.records()[0].data.material_index, material_index);
    }

    #[test]
    fn test_area_light_material_is_locked() {
        let mut device = HostDevice::new();
        let mut config = Config::default();
        config.light.enabled = true;
        config.window.width = 2;
        config.window.height = 2;
        let options = RenderOptions::from_config(&config);
        let mut state = state(&mut device, &options, default_scene(&config));

        // constant environment in slot 0, the area light follows
        assert_eq!(state.lights().len(), 2);
        assert_eq!(state.dispatch().records()[10].data.light_index, 1);
        assert_eq!(state.dispatch().records()[8].data.light_index, NO_LIGHT);

        assert!(!state.set_material(5, default_materials()[0].clone()).unwrap());
        assert!(!state.set_material(17, default_materials()[0].clone()).unwrap());
        assert_eq!(state.materials()[5].name, "light");
    }

    #[test]
    fn test_light_emission_without_area_light() {
        let mut device = HostDevice::new();
        let mut state = state(&mut device, &options(2, 2), planes(2));
        assert!(!state.set_light_emission([1.0; 3]).unwrap());
        assert!(state.set_path_lengths([3, 1]).is_err());
    }

    #[test]
    fn test_private_present_reads_back() {
        let mut device = HostDevice::new();
        let mut state = state(&mut device, &options(2, 2), planes(1));
        state.device.clear_calls();
        state.render().unwrap();

        let calls = state.device().calls();
        let read = calls
            .iter()
            .position(|call| matches!(call, DeviceCall::CopyFromDevice { len: 64, .. }))
            .unwrap();
        assert_eq!(calls[read - 1], DeviceCall::Synchronize);
        assert!(state.display().last_frame.is_some());
    }

    #[test]
    fn test_missing_program_fails_construction() {
        let mut device = HostDevice::new();
        let mut binaries = placeholder_binaries();
        binaries.clear();
        let result = TestState::new(&mut device, HeadlessDisplay::new(), &options(2, 2), planes(1), &binaries);
        assert!(matches!(result, Err(RenderError::MissingProgram { .. })));
    }

    #[test]
    fn test_mismatched_materials_are_rejected() {
        let mut device = HostDevice::new();
        let mut setup = planes(2);
        setup.materials.pop();
        let result = TestState::new(&mut device, HeadlessDisplay::new(), &options(2, 2), setup, &placeholder_binaries());
        assert!(matches!(result, Err(RenderError::InvalidScene(_))));
        drop(result);
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_drop_releases_everything() {
        let mut device = HostDevice::new();
        {
            let mut config = Config::default();
            config.environment.miss = MissKind::Sphere;
            config.light.enabled = true;
            config.window.width = 2;
            config.window.height = 2;
            let mut options = RenderOptions::from_config(&config);
            options.textures.albedo = String::from("does/not/exist.png");
            let mut state = state(&mut device, &options, planes(2));
            state.render().unwrap();
        }
        assert_eq!(device.memory().live_allocations(), 0);
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.live_pipelines(), 0);
        assert_eq!(device.live_modules(), 0);
        assert_eq!(device.live_program_groups(), 0);
    }
}
