//! OpenCL runtime via the `opencl3` crate.
//!
//! Compiled only with the `opencl` feature. The build log is fetched with a
//! size query followed by a read into an exactly sized buffer, which
//! `opencl3` does not expose, so that call goes through `opencl-sys`.

use crate::runtime::{AccessMode, DeviceInfo, DeviceRuntime, DeviceSelector, RuntimeError, status};
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
    Device,
};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY, ClMem};
use opencl3::platform::get_platforms;
use opencl3::program::Program;
use opencl3::types::{CL_BLOCKING, cl_device_id, cl_device_type};
use tilegemm_common::DeviceType;
use tracing::{debug, info};

fn cl_err(operation: &'static str) -> impl Fn(ClError) -> RuntimeError {
    move |e| RuntimeError::new(operation, e.0, e.to_string())
}

fn cl_device_type(device_type: DeviceType) -> cl_device_type {
    match device_type {
        DeviceType::Default => CL_DEVICE_TYPE_DEFAULT,
        DeviceType::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceType::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceType::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceType::All => CL_DEVICE_TYPE_ALL,
    }
}

fn reported_device_type(raw: cl_device_type, requested: DeviceType) -> DeviceType {
    if raw & CL_DEVICE_TYPE_GPU != 0 {
        DeviceType::Gpu
    } else if raw & CL_DEVICE_TYPE_CPU != 0 {
        DeviceType::Cpu
    } else if raw & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceType::Accelerator
    } else {
        requested
    }
}

/// Program object plus the device it is built for.
pub struct OclProgram {
    program: Program,
    device_id: cl_device_id,
}

pub struct OclBuffer {
    buffer: Buffer<f32>,
    len: usize,
}

/// One OpenCL device with its context and in-order queue.
///
/// Field order is release order: queue, then context.
pub struct OpenClRuntime {
    queue: CommandQueue,
    context: Context,
    device_id: cl_device_id,
    info: DeviceInfo,
}

impl std::fmt::Debug for OpenClRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClRuntime").field("info", &self.info).finish()
    }
}

impl DeviceRuntime for OpenClRuntime {
    type Program = OclProgram;
    type Kernel = Kernel;
    type Buffer = OclBuffer;

    fn open(selector: &DeviceSelector) -> Result<Self, RuntimeError> {
        let platforms = get_platforms().map_err(cl_err("clGetPlatformIDs"))?;
        if platforms.is_empty() {
            return Err(RuntimeError::new("clGetPlatformIDs", status::CL_INVALID_PLATFORM, "no OpenCL platforms found"));
        }
        let platform = platforms.get(selector.platform_index).ok_or_else(|| {
            RuntimeError::new(
                "clGetPlatformIDs",
                status::CL_INVALID_PLATFORM,
                format!("platform index {} out of range ({} available)", selector.platform_index, platforms.len()),
            )
        })?;
        let platform_name = platform.name().unwrap_or_default();
        debug!(platform = %platform_name, "checking OpenCL platform");

        let device_ids = platform
            .get_devices(cl_device_type(selector.device_type))
            .map_err(cl_err("clGetDeviceIDs"))?;
        let device_id = *device_ids.get(selector.device_index).ok_or_else(|| {
            RuntimeError::new(
                "clGetDeviceIDs",
                status::CL_DEVICE_NOT_FOUND,
                format!(
                    "no {} device at index {} on platform '{platform_name}' ({} found)",
                    selector.device_type,
                    selector.device_index,
                    device_ids.len()
                ),
            )
        })?;

        let device = Device::new(device_id);
        let info = DeviceInfo {
            platform: platform_name,
            name: device.name().unwrap_or_default(),
            vendor: device.vendor().unwrap_or_default(),
            device_type: reported_device_type(device.dev_type().unwrap_or(0), selector.device_type),
            max_work_group_size: device.max_work_group_size().map_err(cl_err("clGetDeviceInfo"))?,
            max_work_item_sizes: device.max_work_item_sizes().map_err(cl_err("clGetDeviceInfo"))?,
            local_mem_size: device.local_mem_size().unwrap_or(0),
        };

        let context = Context::from_device(&device).map_err(cl_err("clCreateContext"))?;
        let queue = CommandQueue::create_default_with_properties(&context, 0, 0)
            .map_err(cl_err("clCreateCommandQueueWithProperties"))?;

        info!(device = %info.name, vendor = %info.vendor, platform = %info.platform, "OpenCL device opened");
        Ok(Self { queue, context, device_id, info })
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_program(&self, source: &str) -> Result<OclProgram, RuntimeError> {
        let program =
            Program::create_from_source(&self.context, source).map_err(cl_err("clCreateProgramWithSource"))?;
        Ok(OclProgram { program, device_id: self.device_id })
    }

    fn build_program(&self, program: &mut OclProgram, options: &str) -> Result<(), RuntimeError> {
        program.program.build(&[program.device_id], options).map_err(cl_err("clBuildProgram"))
    }

    fn build_log_size(&self, program: &OclProgram) -> Result<usize, RuntimeError> {
        let mut size: usize = 0;
        // SAFETY: size query only; no output buffer is written.
        let code = unsafe {
            opencl_sys::clGetProgramBuildInfo(
                program.program.get(),
                program.device_id,
                opencl_sys::CL_PROGRAM_BUILD_LOG,
                0,
                std::ptr::null_mut(),
                &mut size,
            )
        };
        if code != status::CL_SUCCESS {
            return Err(RuntimeError::from_code("clGetProgramBuildInfo", code));
        }
        Ok(size)
    }

    fn read_build_log(&self, program: &OclProgram, buf: &mut [u8]) -> Result<(), RuntimeError> {
        // SAFETY: `buf` is valid for `buf.len()` bytes and the runtime writes
        // at most that many.
        let code = unsafe {
            opencl_sys::clGetProgramBuildInfo(
                program.program.get(),
                program.device_id,
                opencl_sys::CL_PROGRAM_BUILD_LOG,
                buf.len(),
                buf.as_mut_ptr() as *mut std::ffi::c_void,
                std::ptr::null_mut(),
            )
        };
        if code != status::CL_SUCCESS {
            return Err(RuntimeError::from_code("clGetProgramBuildInfo", code));
        }
        Ok(())
    }

    fn create_kernel(&self, program: &OclProgram, name: &str) -> Result<Kernel, RuntimeError> {
        Kernel::create(&program.program, name).map_err(cl_err("clCreateKernel"))
    }

    fn create_buffer(&self, access: AccessMode, len: usize) -> Result<OclBuffer, RuntimeError> {
        let flags = match access {
            AccessMode::ReadOnly => CL_MEM_READ_ONLY,
            AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
            AccessMode::ReadWrite => CL_MEM_READ_WRITE,
        };
        // SAFETY: no host pointer is passed, so the runtime owns the storage.
        let buffer = unsafe { Buffer::<f32>::create(&self.context, flags, len, std::ptr::null_mut()) }
            .map_err(cl_err("clCreateBuffer"))?;
        Ok(OclBuffer { buffer, len })
    }

    fn write_buffer(&self, buffer: &mut OclBuffer, data: &[f32]) -> Result<(), RuntimeError> {
        // SAFETY: blocking write; `data` outlives the call.
        unsafe {
            self.queue
                .enqueue_write_buffer(&mut buffer.buffer, CL_BLOCKING, 0, data, &[])
                .map_err(cl_err("clEnqueueWriteBuffer"))?;
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &OclBuffer, out: &mut [f32]) -> Result<(), RuntimeError> {
        // SAFETY: blocking read; `out` outlives the call.
        unsafe {
            self.queue
                .enqueue_read_buffer(&buffer.buffer, CL_BLOCKING, 0, out, &[])
                .map_err(cl_err("clEnqueueReadBuffer"))?;
        }
        Ok(())
    }

    fn buffer_len(&self, buffer: &OclBuffer) -> usize {
        buffer.len
    }

    fn set_arg_buffer(&self, kernel: &mut Kernel, index: u32, buffer: &OclBuffer) -> Result<(), RuntimeError> {
        // SAFETY: the argument is a `cl_mem` handle, matching a `__global` pointer parameter.
        unsafe { kernel.set_arg(index, &buffer.buffer.get()) }.map_err(cl_err("clSetKernelArg"))
    }

    fn set_arg_scalar(&self, kernel: &mut Kernel, index: u32, value: u32) -> Result<(), RuntimeError> {
        // SAFETY: `u32` matches the kernel's `uint` parameters.
        unsafe { kernel.set_arg(index, &value) }.map_err(cl_err("clSetKernelArg"))
    }

    fn enqueue_nd_range(&self, kernel: &Kernel, global: [usize; 2], local: [usize; 2]) -> Result<(), RuntimeError> {
        // SAFETY: both size arrays hold `work_dim` entries and outlive the call.
        unsafe {
            self.queue
                .enqueue_nd_range_kernel(kernel.get(), 2, std::ptr::null(), global.as_ptr(), local.as_ptr(), &[])
                .map_err(cl_err("clEnqueueNDRangeKernel"))?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), RuntimeError> {
        self.queue.finish().map_err(cl_err("clFinish"))
    }
}
