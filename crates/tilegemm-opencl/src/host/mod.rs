//! In-process reference device.
//!
//! [`HostRuntime`] implements [`DeviceRuntime`] on the CPU. It follows the
//! OpenCL rules the pipeline depends on: programs are built with a build log,
//! kernels are looked up by name, buffers are sized and tagged with an access
//! mode, arguments are bound by position and launches are validated against
//! the work-group limits before any work-item runs. Launches of the
//! matrix-multiply signature execute work-group by work-group.
//!
//! Every program, kernel and buffer is counted so tests can assert that a run
//! released what it acquired.

mod compiler;
mod exec;

use crate::runtime::{AccessMode, DeviceInfo, DeviceRuntime, DeviceSelector, RuntimeError, status};
use compiler::{CompiledSource, ParamKind};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tilegemm_common::DeviceType;
use tracing::{debug, trace};

/// Platform name reported by the host device.
pub const HOST_PLATFORM_NAME: &str = "tilegemm host";

/// Largest single allocation, in `f32` elements (1 GiB).
const MAX_ALLOC_ELEMENTS: usize = (1 << 30) / std::mem::size_of::<f32>();

#[derive(Debug, Default)]
struct Counters {
    programs_created: Cell<usize>,
    programs_built: Cell<usize>,
    live_programs: Cell<usize>,
    kernels_created: Cell<usize>,
    live_kernels: Cell<usize>,
    buffers_created: Cell<usize>,
    live_buffers: Cell<usize>,
    kernels_enqueued: Cell<usize>,
    bytes_written: Cell<usize>,
    bytes_read: Cell<usize>,
}

fn bump(cell: &Cell<usize>, by: usize) {
    cell.set(cell.get() + by);
}

fn drop_one(cell: &Cell<usize>) {
    cell.set(cell.get().saturating_sub(1));
}

/// Snapshot of the host device's resource counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub programs_created: usize,
    pub programs_built: usize,
    pub live_programs: usize,
    pub kernels_created: usize,
    pub live_kernels: usize,
    pub buffers_created: usize,
    pub live_buffers: usize,
    pub kernels_enqueued: usize,
    pub bytes_written: usize,
    pub bytes_read: usize,
}

impl HostStats {
    /// True when no program, kernel or buffer is still alive.
    pub fn all_released(&self) -> bool {
        self.live_programs == 0 && self.live_kernels == 0 && self.live_buffers == 0
    }
}

enum ProgramState {
    Created,
    Built(CompiledSource),
    Failed,
}

pub struct HostProgram {
    source: String,
    state: ProgramState,
    log: String,
    counters: Rc<Counters>,
}

impl Drop for HostProgram {
    fn drop(&mut self) {
        drop_one(&self.counters.live_programs);
    }
}

#[derive(Clone)]
enum ArgValue {
    Buffer { storage: Rc<RefCell<Vec<f32>>>, access: AccessMode },
    Scalar(u32),
}

pub struct HostKernel {
    name: String,
    params: Vec<ParamKind>,
    tile_size: Option<usize>,
    args: Vec<Option<ArgValue>>,
    counters: Rc<Counters>,
}

impl HostKernel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for HostKernel {
    fn drop(&mut self) {
        drop_one(&self.counters.live_kernels);
    }
}

pub struct HostBuffer {
    storage: Rc<RefCell<Vec<f32>>>,
    access: AccessMode,
    counters: Rc<Counters>,
}

impl HostBuffer {
    pub fn access(&self) -> AccessMode {
        self.access
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        drop_one(&self.counters.live_buffers);
    }
}

/// CPU reference device.
pub struct HostRuntime {
    info: DeviceInfo,
    counters: Rc<Counters>,
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::with_info(Self::default_info())
    }
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host device reporting `info`, e.g. with a smaller work-group limit.
    pub fn with_info(info: DeviceInfo) -> Self {
        Self { info, counters: Rc::new(Counters::default()) }
    }

    pub fn default_info() -> DeviceInfo {
        DeviceInfo {
            platform: HOST_PLATFORM_NAME.to_string(),
            name: "host reference device".to_string(),
            vendor: "tilegemm".to_string(),
            device_type: DeviceType::Cpu,
            max_work_group_size: 1024,
            max_work_item_sizes: vec![1024, 1024, 64],
            local_mem_size: 64 * 1024,
        }
    }

    pub fn stats(&self) -> HostStats {
        let c = &self.counters;
        HostStats {
            programs_created: c.programs_created.get(),
            programs_built: c.programs_built.get(),
            live_programs: c.live_programs.get(),
            kernels_created: c.kernels_created.get(),
            live_kernels: c.live_kernels.get(),
            buffers_created: c.buffers_created.get(),
            live_buffers: c.live_buffers.get(),
            kernels_enqueued: c.kernels_enqueued.get(),
            bytes_written: c.bytes_written.get(),
            bytes_read: c.bytes_read.get(),
        }
    }

    fn check_launch(&self, kernel: &HostKernel, global: [usize; 2], local: [usize; 2]) -> Result<(), RuntimeError> {
        const OP: &str = "clEnqueueNDRangeKernel";
        if let Some(index) = kernel.args.iter().position(Option::is_none) {
            return Err(RuntimeError::new(
                OP,
                status::CL_INVALID_KERNEL_ARGS,
                format!("argument {index} of kernel '{}' is not set", kernel.name),
            ));
        }
        if global.contains(&0) {
            return Err(RuntimeError::new(OP, status::CL_INVALID_GLOBAL_WORK_SIZE, format!("global size {global:?} has a zero dimension")));
        }
        if local.contains(&0) {
            return Err(RuntimeError::new(OP, status::CL_INVALID_WORK_GROUP_SIZE, format!("local size {local:?} has a zero dimension")));
        }
        for d in 0..2 {
            let limit = self.info.max_work_item_sizes.get(d).copied().unwrap_or(1);
            if local[d] > limit {
                return Err(RuntimeError::new(
                    OP,
                    status::CL_INVALID_WORK_ITEM_SIZE,
                    format!("local size {} in dimension {d} exceeds device limit {limit}", local[d]),
                ));
            }
        }
        let items = local[0].saturating_mul(local[1]);
        if items > self.info.max_work_group_size {
            return Err(RuntimeError::new(
                OP,
                status::CL_INVALID_WORK_GROUP_SIZE,
                format!("work-group of {items} items exceeds device limit {}", self.info.max_work_group_size),
            ));
        }
        if global[0] % local[0] != 0 || global[1] % local[1] != 0 {
            return Err(RuntimeError::new(
                OP,
                status::CL_INVALID_WORK_GROUP_SIZE,
                format!("global size {global:?} is not a multiple of local size {local:?}"),
            ));
        }
        if let Some(t) = kernel.tile_size {
            if local != [t, t] {
                return Err(RuntimeError::new(
                    OP,
                    status::CL_INVALID_WORK_GROUP_SIZE,
                    format!("kernel built with TILE_SIZE={t} requires a {t}x{t} work-group, got {local:?}"),
                ));
            }
        }
        Ok(())
    }
}

fn param_at(kernel: &HostKernel, index: u32, op: &'static str) -> Result<ParamKind, RuntimeError> {
    kernel.params.get(index as usize).copied().ok_or_else(|| {
        RuntimeError::new(
            op,
            status::CL_INVALID_ARG_INDEX,
            format!("kernel '{}' takes {} arguments, index {index} is out of range", kernel.name, kernel.params.len()),
        )
    })
}

/// Split bound arguments into the matmul signature: three buffers followed by
/// six scalars.
fn matmul_args(kernel: &HostKernel) -> Option<([&ArgValue; 3], [u32; 6])> {
    let mut args = kernel.args.iter().flatten();
    let buffers = [args.next()?, args.next()?, args.next()?];
    if !buffers.iter().all(|a| matches!(a, ArgValue::Buffer { .. })) {
        return None;
    }
    let mut scalars = [0u32; 6];
    for slot in &mut scalars {
        match args.next()? {
            ArgValue::Scalar(v) => *slot = *v,
            ArgValue::Buffer { .. } => return None,
        }
    }
    if args.next().is_some() {
        return None;
    }
    Some((buffers, scalars))
}

impl DeviceRuntime for HostRuntime {
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Buffer = HostBuffer;

    fn open(selector: &DeviceSelector) -> Result<Self, RuntimeError> {
        if selector.platform_index != 0 {
            return Err(RuntimeError::new(
                "clGetPlatformIDs",
                status::CL_INVALID_PLATFORM,
                format!("platform index {} out of range (1 platform available)", selector.platform_index),
            ));
        }
        if matches!(selector.device_type, DeviceType::Gpu | DeviceType::Accelerator) {
            return Err(RuntimeError::new(
                "clGetDeviceIDs",
                status::CL_DEVICE_NOT_FOUND,
                format!("no {} devices on platform '{HOST_PLATFORM_NAME}'", selector.device_type),
            ));
        }
        if selector.device_index != 0 {
            return Err(RuntimeError::new(
                "clGetDeviceIDs",
                status::CL_DEVICE_NOT_FOUND,
                format!("device index {} out of range (1 device available)", selector.device_index),
            ));
        }
        Ok(Self::new())
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_program(&self, source: &str) -> Result<HostProgram, RuntimeError> {
        if source.is_empty() {
            return Err(RuntimeError::new("clCreateProgramWithSource", status::CL_INVALID_VALUE, "empty source"));
        }
        bump(&self.counters.programs_created, 1);
        bump(&self.counters.live_programs, 1);
        Ok(HostProgram {
            source: source.to_string(),
            state: ProgramState::Created,
            log: String::new(),
            counters: Rc::clone(&self.counters),
        })
    }

    fn build_program(&self, program: &mut HostProgram, options: &str) -> Result<(), RuntimeError> {
        let defines = compiler::parse_options(options)
            .map_err(|reason| RuntimeError::new("clBuildProgram", status::CL_INVALID_BUILD_OPTIONS, reason))?;
        match compiler::compile(&program.source, defines) {
            Ok(compiled) => {
                debug!(kernels = ?compiled.kernel_names(), options, "host program built");
                program.state = ProgramState::Built(compiled);
                program.log.clear();
                bump(&self.counters.programs_built, 1);
                Ok(())
            }
            Err(diags) => {
                program.state = ProgramState::Failed;
                program.log = compiler::render_log(&diags);
                Err(RuntimeError::new(
                    "clBuildProgram",
                    status::CL_BUILD_PROGRAM_FAILURE,
                    format!("{} error(s) in program source", diags.len()),
                ))
            }
        }
    }

    fn build_log_size(&self, program: &HostProgram) -> Result<usize, RuntimeError> {
        Ok(program.log.len() + 1)
    }

    fn read_build_log(&self, program: &HostProgram, buf: &mut [u8]) -> Result<(), RuntimeError> {
        let bytes = program.log.as_bytes();
        if buf.len() < bytes.len() + 1 {
            return Err(RuntimeError::new(
                "clGetProgramBuildInfo",
                status::CL_INVALID_VALUE,
                format!("log buffer of {} bytes is smaller than the {}-byte log", buf.len(), bytes.len() + 1),
            ));
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()] = 0;
        Ok(())
    }

    fn create_kernel(&self, program: &HostProgram, name: &str) -> Result<HostKernel, RuntimeError> {
        const OP: &str = "clCreateKernel";
        let ProgramState::Built(compiled) = &program.state else {
            return Err(RuntimeError::new(OP, status::CL_INVALID_PROGRAM_EXECUTABLE, "program has not been built successfully"));
        };
        let signature = compiled.kernel(name).ok_or_else(|| {
            RuntimeError::new(
                OP,
                status::CL_INVALID_KERNEL_NAME,
                format!("no kernel named '{name}' in program (available: {})", compiled.kernel_names().join(", ")),
            )
        })?;
        bump(&self.counters.kernels_created, 1);
        bump(&self.counters.live_kernels, 1);
        Ok(HostKernel {
            name: signature.name.clone(),
            params: signature.params.clone(),
            tile_size: compiled.tile_size(),
            args: vec![None; signature.params.len()],
            counters: Rc::clone(&self.counters),
        })
    }

    fn create_buffer(&self, access: AccessMode, len: usize) -> Result<HostBuffer, RuntimeError> {
        if len == 0 || len > MAX_ALLOC_ELEMENTS {
            return Err(RuntimeError::new(
                "clCreateBuffer",
                status::CL_INVALID_BUFFER_SIZE,
                format!("cannot allocate {len} elements (limit {MAX_ALLOC_ELEMENTS})"),
            ));
        }
        bump(&self.counters.buffers_created, 1);
        bump(&self.counters.live_buffers, 1);
        trace!(len, %access, "host buffer created");
        // Unwritten elements read back as NaN.
        Ok(HostBuffer {
            storage: Rc::new(RefCell::new(vec![f32::NAN; len])),
            access,
            counters: Rc::clone(&self.counters),
        })
    }

    fn write_buffer(&self, buffer: &mut HostBuffer, data: &[f32]) -> Result<(), RuntimeError> {
        let mut storage = buffer.storage.borrow_mut();
        if data.len() > storage.len() {
            return Err(RuntimeError::new(
                "clEnqueueWriteBuffer",
                status::CL_INVALID_VALUE,
                format!("write of {} elements into a {}-element buffer", data.len(), storage.len()),
            ));
        }
        storage[..data.len()].copy_from_slice(data);
        bump(&self.counters.bytes_written, std::mem::size_of_val(data));
        Ok(())
    }

    fn read_buffer(&self, buffer: &HostBuffer, out: &mut [f32]) -> Result<(), RuntimeError> {
        let storage = buffer.storage.borrow();
        if out.len() > storage.len() {
            return Err(RuntimeError::new(
                "clEnqueueReadBuffer",
                status::CL_INVALID_VALUE,
                format!("read of {} elements from a {}-element buffer", out.len(), storage.len()),
            ));
        }
        out.copy_from_slice(&storage[..out.len()]);
        bump(&self.counters.bytes_read, std::mem::size_of_val(out));
        Ok(())
    }

    fn buffer_len(&self, buffer: &HostBuffer) -> usize {
        buffer.storage.borrow().len()
    }

    fn set_arg_buffer(&self, kernel: &mut HostKernel, index: u32, buffer: &HostBuffer) -> Result<(), RuntimeError> {
        const OP: &str = "clSetKernelArg";
        if param_at(kernel, index, OP)? == ParamKind::Scalar {
            return Err(RuntimeError::new(OP, status::CL_INVALID_ARG_SIZE, format!("argument {index} is a scalar, not a buffer")));
        }
        kernel.args[index as usize] =
            Some(ArgValue::Buffer { storage: Rc::clone(&buffer.storage), access: buffer.access });
        Ok(())
    }

    fn set_arg_scalar(&self, kernel: &mut HostKernel, index: u32, value: u32) -> Result<(), RuntimeError> {
        const OP: &str = "clSetKernelArg";
        if param_at(kernel, index, OP)? != ParamKind::Scalar {
            return Err(RuntimeError::new(OP, status::CL_INVALID_ARG_SIZE, format!("argument {index} is a pointer, not a scalar")));
        }
        kernel.args[index as usize] = Some(ArgValue::Scalar(value));
        Ok(())
    }

    fn enqueue_nd_range(&self, kernel: &HostKernel, global: [usize; 2], local: [usize; 2]) -> Result<(), RuntimeError> {
        const OP: &str = "clEnqueueNDRangeKernel";
        self.check_launch(kernel, global, local)?;

        let Some(([a, b, c], scalars)) = matmul_args(kernel) else {
            return Err(RuntimeError::new(
                OP,
                status::CL_INVALID_KERNEL,
                format!("host device cannot execute kernel '{}': expected 3 buffers followed by 6 uint scalars", kernel.name),
            ));
        };
        let (
            ArgValue::Buffer { storage: a, .. },
            ArgValue::Buffer { storage: b, .. },
            ArgValue::Buffer { storage: c, access: c_access },
        ) = (a, b, c)
        else {
            return Err(RuntimeError::from_code(OP, status::CL_INVALID_KERNEL));
        };
        if *c_access == AccessMode::ReadOnly {
            return Err(RuntimeError::new(OP, status::CL_INVALID_MEM_OBJECT, "output buffer is read-only"));
        }
        if Rc::ptr_eq(c, a) || Rc::ptr_eq(c, b) {
            return Err(RuntimeError::new(OP, status::CL_INVALID_MEM_OBJECT, "output buffer aliases an input buffer"));
        }

        let dims = exec::MatmulScalars::from_args(scalars);
        let (a, b, mut c) = (a.borrow(), b.borrow(), c.borrow_mut());
        let (need_a, need_b, need_c) = dims.required_lens();
        for (name, need, have) in [("A", need_a, a.len()), ("B", need_b, b.len()), ("C", need_c, c.len())] {
            if need > have {
                return Err(RuntimeError::new(
                    OP,
                    status::CL_OUT_OF_RESOURCES,
                    format!("kernel would access {need} elements of {name}, buffer holds {have}"),
                ));
            }
        }

        exec::run(&a, &b, &mut c, dims, global, local, kernel.tile_size);
        bump(&self.counters.kernels_enqueued, 1);
        debug!(kernel = %kernel.name, ?global, ?local, "host kernel executed");
        Ok(())
    }

    fn finish(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}
