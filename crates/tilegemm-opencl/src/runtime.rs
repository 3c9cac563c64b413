//! Device runtime seam.
//!
//! [`DeviceRuntime`] is the minimal slice of the OpenCL host API the pipeline
//! needs. Program, kernel and buffer handles are associated types that release
//! their device object when dropped, so ownership alone decides lifetimes.

use std::fmt;
use tilegemm_common::{DeviceConfig, DeviceType};

/// OpenCL status codes reported by [`RuntimeError`].
pub mod status {
    pub const CL_SUCCESS: i32 = 0;
    pub const CL_DEVICE_NOT_FOUND: i32 = -1;
    pub const CL_DEVICE_NOT_AVAILABLE: i32 = -2;
    pub const CL_MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const CL_OUT_OF_RESOURCES: i32 = -5;
    pub const CL_OUT_OF_HOST_MEMORY: i32 = -6;
    pub const CL_BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const CL_INVALID_VALUE: i32 = -30;
    pub const CL_INVALID_PLATFORM: i32 = -32;
    pub const CL_INVALID_DEVICE: i32 = -33;
    pub const CL_INVALID_MEM_OBJECT: i32 = -38;
    pub const CL_INVALID_BUILD_OPTIONS: i32 = -43;
    pub const CL_INVALID_PROGRAM: i32 = -44;
    pub const CL_INVALID_PROGRAM_EXECUTABLE: i32 = -45;
    pub const CL_INVALID_KERNEL_NAME: i32 = -46;
    pub const CL_INVALID_KERNEL: i32 = -48;
    pub const CL_INVALID_ARG_INDEX: i32 = -49;
    pub const CL_INVALID_ARG_VALUE: i32 = -50;
    pub const CL_INVALID_ARG_SIZE: i32 = -51;
    pub const CL_INVALID_KERNEL_ARGS: i32 = -52;
    pub const CL_INVALID_WORK_DIMENSION: i32 = -53;
    pub const CL_INVALID_WORK_GROUP_SIZE: i32 = -54;
    pub const CL_INVALID_WORK_ITEM_SIZE: i32 = -55;
    pub const CL_INVALID_BUFFER_SIZE: i32 = -61;
    pub const CL_INVALID_GLOBAL_WORK_SIZE: i32 = -63;

    /// Symbolic name of an OpenCL status code.
    pub fn name(code: i32) -> &'static str {
        match code {
            CL_SUCCESS => "CL_SUCCESS",
            CL_DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
            CL_DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
            CL_MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            CL_OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
            CL_OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
            CL_BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
            CL_INVALID_VALUE => "CL_INVALID_VALUE",
            CL_INVALID_PLATFORM => "CL_INVALID_PLATFORM",
            CL_INVALID_DEVICE => "CL_INVALID_DEVICE",
            CL_INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
            CL_INVALID_BUILD_OPTIONS => "CL_INVALID_BUILD_OPTIONS",
            CL_INVALID_PROGRAM => "CL_INVALID_PROGRAM",
            CL_INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
            CL_INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
            CL_INVALID_KERNEL => "CL_INVALID_KERNEL",
            CL_INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
            CL_INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
            CL_INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
            CL_INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
            CL_INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
            CL_INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
            CL_INVALID_WORK_ITEM_SIZE => "CL_INVALID_WORK_ITEM_SIZE",
            CL_INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
            CL_INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
            _ => "CL_UNKNOWN_ERROR",
        }
    }
}

/// A failed runtime call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed with {} ({code}): {message}", status::name(*.code))]
pub struct RuntimeError {
    /// Runtime entry point that failed, e.g. `clBuildProgram`.
    pub operation: &'static str,
    /// OpenCL status code.
    pub code: i32,
    pub message: String,
}

impl RuntimeError {
    pub fn new(operation: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self { operation, code, message: message.into() }
    }

    /// Error carrying only a status code.
    pub fn from_code(operation: &'static str, code: i32) -> Self {
        Self::new(operation, code, status::name(code))
    }

    pub fn code_name(&self) -> &'static str {
        status::name(self.code)
    }
}

/// Device-side access permitted on a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Whether the host may stage data into a buffer of this mode.
    pub fn is_input(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::WriteOnly => write!(f, "write-only"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Which device to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelector {
    pub platform_index: usize,
    pub device_index: usize,
    pub device_type: DeviceType,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self { platform_index: 0, device_index: 0, device_type: DeviceType::Default }
    }
}

impl From<&DeviceConfig> for DeviceSelector {
    fn from(cfg: &DeviceConfig) -> Self {
        Self {
            platform_index: cfg.platform_index,
            device_index: cfg.device_index,
            device_type: cfg.device_type,
        }
    }
}

/// Properties of the opened device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub platform: String,
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceType,
    /// Upper bound on work-items per work-group.
    pub max_work_group_size: usize,
    /// Per-dimension upper bound on work-group extent.
    pub max_work_item_sizes: Vec<usize>,
    pub local_mem_size: u64,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {}) on {}", self.name, self.vendor, self.device_type, self.platform)
    }
}

/// Host-side interface to one device, its context and a single in-order
/// command queue.
///
/// All transfers are blocking. `enqueue_nd_range` may return before the
/// kernel finishes; `finish` waits for all queued work.
pub trait DeviceRuntime {
    type Program;
    type Kernel;
    type Buffer;

    /// Open the selected device and create its context and queue.
    fn open(selector: &DeviceSelector) -> Result<Self, RuntimeError>
    where
        Self: Sized;

    fn info(&self) -> &DeviceInfo;

    /// Create an unbuilt program from source text.
    fn create_program(&self, source: &str) -> Result<Self::Program, RuntimeError>;

    /// Compile and link `program` for this device.
    fn build_program(&self, program: &mut Self::Program, options: &str) -> Result<(), RuntimeError>;

    /// Size in bytes of the build log, including the NUL terminator.
    fn build_log_size(&self, program: &Self::Program) -> Result<usize, RuntimeError>;

    /// Copy the build log into `buf`, which must hold at least
    /// [`build_log_size`](Self::build_log_size) bytes.
    fn read_build_log(&self, program: &Self::Program, buf: &mut [u8]) -> Result<(), RuntimeError>;

    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel, RuntimeError>;

    /// Allocate a buffer of `len` `f32` elements.
    fn create_buffer(&self, access: AccessMode, len: usize) -> Result<Self::Buffer, RuntimeError>;

    /// Blocking host-to-device copy of `data` into the start of `buffer`.
    fn write_buffer(&self, buffer: &mut Self::Buffer, data: &[f32]) -> Result<(), RuntimeError>;

    /// Blocking device-to-host copy filling `out` from the start of `buffer`.
    fn read_buffer(&self, buffer: &Self::Buffer, out: &mut [f32]) -> Result<(), RuntimeError>;

    /// Number of `f32` elements `buffer` holds.
    fn buffer_len(&self, buffer: &Self::Buffer) -> usize;

    fn set_arg_buffer(&self, kernel: &mut Self::Kernel, index: u32, buffer: &Self::Buffer) -> Result<(), RuntimeError>;

    fn set_arg_scalar(&self, kernel: &mut Self::Kernel, index: u32, value: u32) -> Result<(), RuntimeError>;

    /// Enqueue a 2D launch.
    fn enqueue_nd_range(&self, kernel: &Self::Kernel, global: [usize; 2], local: [usize; 2]) -> Result<(), RuntimeError>;

    /// Block until every queued command has completed.
    fn finish(&self) -> Result<(), RuntimeError>;
}
