use bytemuck::Pod;

use crate::device::{DeviceError, DevicePtr, DeviceResult, RayTracingDevice};

/// A linear device allocation together with its size in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub ptr: DevicePtr,
    pub size: usize,
}

impl DeviceBuffer {
    /// Copies `data` into the buffer starting `offset` bytes in.
    pub fn write<T: Pod, D: RayTracingDevice + ?Sized>(&self, device: &mut D, offset: usize, data: &[T]) -> DeviceResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if offset + bytes.len() > self.size {
            return Err(DeviceError::OutOfBounds {
                addr: self.ptr.offset(offset).0,
                len: bytes.len(),
            });
        }
        device.copy_to_device(self.ptr.offset(offset), bytes)
    }

    /// Reads `out.len()` elements starting at the beginning of the buffer.
    pub fn read<T: Pod, D: RayTracingDevice + ?Sized>(&self, device: &mut D, out: &mut [T]) -> DeviceResult<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        if bytes.len() > self.size {
            return Err(DeviceError::OutOfBounds {
                addr: self.ptr.0,
                len: bytes.len(),
            });
        }
        device.copy_from_device(self.ptr, bytes)
    }

    pub fn free<D: RayTracingDevice + ?Sized>(self, device: &mut D) -> DeviceResult<()> {
        device.free(self.ptr)
    }
}

/// A struct representing the initial descriptor for a buffer.
///
/// The label only shows up in trace logs, the device itself has no notion of names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferInitDescriptor<'a> {
    pub label: Option<&'a str>,
}

impl<'a> BufferInitDescriptor<'a> {
    pub fn new(label: Option<&'a str>) -> Self {
        Self { label }
    }

    /// Allocates a buffer that exactly fits `data` and uploads it.
    ///
    /// # Arguments
    ///
    /// * `device` - The device the buffer is allocated on.
    /// * `data` - Plain old data that gets copied byte for byte.
    ///
    /// # Returns
    ///
    /// * `DeviceBuffer` - The new allocation, sized `size_of_val(data)`.
    ///
    /// # Example
    ///
    /// ```
    /// use rt_utils::{BufferInitDescriptor, HostDevice};
    ///
    /// let mut device = HostDevice::new();
    /// let buffer = BufferInitDescriptor::new(Some("Indices")).create_new_buffer(&mut device, &[0u32, 1, 2]).unwrap();
    /// assert_eq!(buffer.size, 12);
    /// ```
    pub fn create_new_buffer<T: Pod, D: RayTracingDevice + ?Sized>(&self, device: &mut D, data: &[T]) -> DeviceResult<DeviceBuffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = self.create_empty_buffer(device, bytes.len())?;
        device.copy_to_device(buffer.ptr, bytes)?;
        Ok(buffer)
    }

    /// Allocates `size` bytes without initializing them.
    pub fn create_empty_buffer<D: RayTracingDevice + ?Sized>(&self, device: &mut D, size: usize) -> DeviceResult<DeviceBuffer> {
        let ptr = device.alloc(size)?;
        log::trace!("{}: {} bytes at {:#x}", self.label.unwrap_or("buffer"), size, ptr.0);
        Ok(DeviceBuffer { ptr, size })
    }
}

impl<'a> Default for BufferInitDescriptor<'a> {
    fn default() -> Self {
        Self {
            label: Some("Default BufferInitDescriptor"),
        }
    }
}
