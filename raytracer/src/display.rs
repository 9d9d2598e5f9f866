use rt_utils::ExternalBuffer;

/// The presentation side of the renderer.
///
/// With interop the device renders straight into a buffer owned by the display, otherwise
/// the accumulated pixels are copied to the host and handed over.
pub trait Display {
    /// The pixel buffer shared with the device, sized for `width` x `height` RGBA32F pixels.
    fn shared_buffer(&mut self, width: u32, height: u32) -> ExternalBuffer;
    /// Reallocates the shared pixel buffer. It is not registered with the device while this runs.
    fn resize_shared_buffer(&mut self, width: u32, height: u32) -> ExternalBuffer;
    /// Shows the content of the shared buffer.
    fn present_shared(&mut self, width: u32, height: u32);
    /// Shows pixels that were read back from the device.
    fn present_pixels(&mut self, width: u32, height: u32, pixels: &[[f32; 4]]);
}

/// A display without a window. It only keeps what it was asked to show.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    pub buffer: ExternalBuffer,
    pub size: (u32, u32),
    pub presented: usize,
    pub last_frame: Option<Vec<[f32; 4]>>,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Display for HeadlessDisplay {
    fn shared_buffer(&mut self, width: u32, height: u32) -> ExternalBuffer {
        self.size = (width, height);
        self.buffer
    }

    fn resize_shared_buffer(&mut self, width: u32, height: u32) -> ExternalBuffer {
        self.size = (width, height);
        self.buffer
    }

    fn present_shared(&mut self, width: u32, height: u32) {
        log::trace!("Presenting shared buffer {:?} at {}x{}", self.buffer, width, height);
        self.presented += 1;
    }

    fn present_pixels(&mut self, width: u32, height: u32, pixels: &[[f32; 4]]) {
        self.size = (width, height);
        self.presented += 1;
        self.last_frame = Some(pixels.to_vec());
    }
}
