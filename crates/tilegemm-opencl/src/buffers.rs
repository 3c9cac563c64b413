//! Device buffer lifecycle: allocate, stage, retrieve, release.

use crate::context::ExecutionContext;
use crate::runtime::{AccessMode, DeviceRuntime};
use tilegemm_common::matrix::element_count;
use tilegemm_common::{GemmError, Matrix, Result, ShapeError};
use tracing::debug;

/// A device allocation sized for a `rows x cols` `f32` matrix.
///
/// The device object is released when this is dropped or passed to
/// [`DeviceBuffer::release`].
pub struct DeviceBuffer<R: DeviceRuntime> {
    handle: R::Buffer,
    label: &'static str,
    access: AccessMode,
    rows: usize,
    cols: usize,
}

impl<R: DeviceRuntime> DeviceBuffer<R> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of `f32` elements.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }

    pub(crate) fn handle(&self) -> &R::Buffer {
        &self.handle
    }

    /// Release the device allocation now.
    pub fn release(self) {
        drop(self);
    }
}

impl<R: DeviceRuntime> Drop for DeviceBuffer<R> {
    fn drop(&mut self) {
        debug!(buffer = self.label, bytes = self.byte_len(), "device buffer released");
    }
}

/// Allocates and moves matrices between host and device.
pub struct BufferManager<'a, R: DeviceRuntime> {
    ctx: &'a ExecutionContext<R>,
    staged_bytes: usize,
    buffers_staged: usize,
}

impl<'a, R: DeviceRuntime> BufferManager<'a, R> {
    pub fn new(ctx: &'a ExecutionContext<R>) -> Self {
        Self { ctx, staged_bytes: 0, buffers_staged: 0 }
    }

    /// Allocate a buffer shaped like `matrix`; inputs are copied to the device
    /// with a blocking write before this returns.
    pub fn stage(&mut self, label: &'static str, matrix: &Matrix, access: AccessMode) -> Result<DeviceBuffer<R>> {
        let mut buffer = self.allocate(label, matrix.rows(), matrix.cols(), access)?;
        if access.is_input() {
            self.ctx
                .runtime()
                .write_buffer(&mut buffer.handle, matrix.as_slice())
                .map_err(|e| GemmError::dispatch("write", format!("staging {label}: {e}")))?;
            self.staged_bytes += matrix.byte_len();
            self.buffers_staged += 1;
            debug!(buffer = label, bytes = matrix.byte_len(), "staged host to device");
        }
        Ok(buffer)
    }

    /// Allocate an uninitialised `rows x cols` buffer.
    pub fn allocate(
        &mut self,
        label: &'static str,
        rows: usize,
        cols: usize,
        access: AccessMode,
    ) -> Result<DeviceBuffer<R>> {
        let len = element_count(rows, cols)?;
        let handle = self
            .ctx
            .runtime()
            .create_buffer(access, len)
            .map_err(|e| GemmError::dispatch("allocate", format!("buffer {label}: {e}")))?;
        debug!(buffer = label, %access, rows, cols, bytes = len * std::mem::size_of::<f32>(), "device buffer allocated");
        Ok(DeviceBuffer { handle, label, access, rows, cols })
    }

    /// Blocking copy of `buffer` into a new `rows x cols` host matrix.
    pub fn retrieve(&self, buffer: &DeviceBuffer<R>, rows: usize, cols: usize) -> Result<Matrix> {
        let len = element_count(rows, cols)?;
        let device_len = self.ctx.runtime().buffer_len(&buffer.handle);
        if device_len != len {
            return Err(ShapeError::BufferLength { buffer_len: device_len, rows, cols }.into());
        }
        let mut data = vec![0.0f32; len];
        self.ctx
            .runtime()
            .read_buffer(&buffer.handle, &mut data)
            .map_err(|e| GemmError::dispatch("read", format!("retrieving {}: {e}", buffer.label)))?;
        debug!(buffer = buffer.label, rows, cols, "retrieved device to host");
        Ok(Matrix::from_vec(rows, cols, data)?)
    }

    pub fn release(&mut self, buffer: DeviceBuffer<R>) {
        buffer.release();
    }

    /// Bytes copied host to device so far.
    pub fn staged_bytes(&self) -> usize {
        self.staged_bytes
    }

    pub fn buffers_staged(&self) -> usize {
        self.buffers_staged
    }
}
