use crate::device::{DevicePtr, DeviceResult, RayTracingDevice, SharedBufferHandle};

/// A shared buffer that is mapped for device access for as long as this guard lives.
///
/// All device work touching the buffer has to be issued through [`MappedBuffer::device`]
/// so it is bracketed by the map and unmap. Dropping the guard unmaps on every exit path;
/// call [`MappedBuffer::unmap`] to observe the unmap result instead.
pub struct MappedBuffer<'a, D: RayTracingDevice + ?Sized> {
    device: &'a mut D,
    handle: SharedBufferHandle,
    ptr: DevicePtr,
    size: usize,
    mapped: bool,
}

impl<'a, D: RayTracingDevice + ?Sized> MappedBuffer<'a, D> {
    pub fn map(device: &'a mut D, handle: SharedBufferHandle) -> DeviceResult<Self> {
        let (ptr, size) = device.map_shared_buffer(handle)?;
        Ok(Self {
            device,
            handle,
            ptr,
            size,
            mapped: true,
        })
    }

    /// Device address of the buffer for this mapping only.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn device(&mut self) -> &mut D {
        self.device
    }

    pub fn unmap(mut self) -> DeviceResult<()> {
        self.mapped = false;
        self.device.unmap_shared_buffer(self.handle)
    }
}

impl<'a, D: RayTracingDevice + ?Sized> Drop for MappedBuffer<'a, D> {
    fn drop(&mut self) {
        if self.mapped {
            if let Err(error) = self.device.unmap_shared_buffer(self.handle) {
                log::error!("unmapping shared buffer {:?} failed: {}", self.handle, error);
            }
        }
    }
}
