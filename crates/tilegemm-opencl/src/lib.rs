//! Offload pipeline for tiled matrix multiplication.
//!
//! The pipeline runs over any [`DeviceRuntime`]:
//!
//! - [`HostRuntime`] is always available and executes the kernel contract on
//!   the CPU;
//! - `OpenClRuntime` drives real devices and needs the `opencl` feature.
//!
//! ```ignore
//! let ctx = ExecutionContext::<HostRuntime>::create(&DeviceSelector::default())?;
//! let out = run_multiply(&ctx, &a, &b, &MultiplyPlan::default())?;
//! ```

pub mod buffers;
pub mod context;
pub mod dispatch;
pub mod host;
pub mod kernels;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod partition;
pub mod pipeline;
pub mod program;
pub mod runtime;

pub use buffers::{BufferManager, DeviceBuffer};
pub use context::ExecutionContext;
pub use dispatch::{ArgKind, DispatchReport, Dispatcher, KernelArg, KernelArgs, MatmulDims};
pub use host::{HostRuntime, HostStats};
#[cfg(feature = "opencl")]
pub use opencl::OpenClRuntime;
pub use partition::{PartitionError, WorkPartition, check_device_limits, partition};
pub use pipeline::{KernelSource, MultiplyOutput, MultiplyPlan, VerifiedRun, run_and_verify, run_multiply};
pub use program::{CompiledProgram, ProgramBuilder};
pub use runtime::{AccessMode, DeviceInfo, DeviceRuntime, DeviceSelector, RuntimeError};

/// Whether this build can drive real OpenCL devices.
pub const fn opencl_available() -> bool {
    cfg!(feature = "opencl")
}
