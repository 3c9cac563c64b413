//! Kernel argument binding and launch.

use crate::buffers::DeviceBuffer;
use crate::context::ExecutionContext;
use crate::partition::{WorkPartition, check_device_limits};
use crate::program::CompiledProgram;
use crate::runtime::{AccessMode, DeviceRuntime};
use std::time::{Duration, Instant};
use tilegemm_common::reference::check_inner_dims;
use tilegemm_common::{GemmError, Matrix, Result, ShapeError};
use tracing::{debug, info};

/// Dimensions passed to the matmul kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulDims {
    pub a_rows: usize,
    pub a_cols: usize,
    pub b_rows: usize,
    pub b_cols: usize,
    pub c_rows: usize,
    pub c_cols: usize,
}

impl MatmulDims {
    /// Dimensions of `A x B`; fails when the inner dimensions differ.
    pub fn for_product(a: &Matrix, b: &Matrix) -> std::result::Result<Self, ShapeError> {
        check_inner_dims(a, b)?;
        Ok(Self {
            a_rows: a.rows(),
            a_cols: a.cols(),
            b_rows: b.rows(),
            b_cols: b.cols(),
            c_rows: a.rows(),
            c_cols: b.cols(),
        })
    }
}

/// What an argument carries, without the device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Buffer(AccessMode),
    Scalar(u32),
}

/// Position, name and kind of a bound argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelArg {
    pub index: u32,
    pub name: &'static str,
    pub kind: ArgKind,
}

enum ArgValue<'a, R: DeviceRuntime> {
    Buffer(&'a DeviceBuffer<R>),
    Scalar(u32),
}

/// Ordered kernel arguments.
pub struct KernelArgs<'a, R: DeviceRuntime> {
    args: Vec<(KernelArg, ArgValue<'a, R>)>,
}

impl<'a, R: DeviceRuntime> KernelArgs<'a, R> {
    /// Arguments of `matrix_multiply`, in order:
    /// `A, B, C, numARows, numAColumns, numBRows, numBColumns, numCRows, numCColumns`.
    pub fn matmul(
        a: &'a DeviceBuffer<R>,
        b: &'a DeviceBuffer<R>,
        c: &'a DeviceBuffer<R>,
        dims: &MatmulDims,
    ) -> Result<Self> {
        for (buf, rows, cols) in [(a, dims.a_rows, dims.a_cols), (b, dims.b_rows, dims.b_cols), (c, dims.c_rows, dims.c_cols)] {
            if buf.shape() != (rows, cols) {
                return Err(ShapeError::BufferLength { buffer_len: buf.len(), rows, cols }.into());
            }
        }

        let mut args = Self { args: Vec::with_capacity(9) };
        args.push_buffer("A", a);
        args.push_buffer("B", b);
        args.push_buffer("C", c);
        for (name, value) in [
            ("numARows", dims.a_rows),
            ("numAColumns", dims.a_cols),
            ("numBRows", dims.b_rows),
            ("numBColumns", dims.b_cols),
            ("numCRows", dims.c_rows),
            ("numCColumns", dims.c_cols),
        ] {
            args.push_scalar(name, kernel_uint(name, value)?);
        }
        Ok(args)
    }

    fn next_index(&self) -> u32 {
        self.args.len() as u32
    }

    fn push_buffer(&mut self, name: &'static str, buffer: &'a DeviceBuffer<R>) {
        let arg = KernelArg { index: self.next_index(), name, kind: ArgKind::Buffer(buffer.access()) };
        self.args.push((arg, ArgValue::Buffer(buffer)));
    }

    fn push_scalar(&mut self, name: &'static str, value: u32) {
        let arg = KernelArg { index: self.next_index(), name, kind: ArgKind::Scalar(value) };
        self.args.push((arg, ArgValue::Scalar(value)));
    }

    /// The argument list as bound, in index order.
    pub fn describe(&self) -> Vec<KernelArg> {
        self.args.iter().map(|(arg, _)| *arg).collect()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

fn kernel_uint(name: &str, value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| GemmError::dispatch("bind", format!("{name} = {value} does not fit in a 32-bit uint")))
}

/// Timing and geometry of a completed launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub global: [usize; 2],
    pub local: [usize; 2],
    /// Enqueue to completion, as seen by the host.
    pub elapsed: Duration,
}

/// Binds arguments, launches the kernel and waits for it.
pub struct Dispatcher;

impl Dispatcher {
    pub fn dispatch<R: DeviceRuntime>(
        ctx: &ExecutionContext<R>,
        program: &mut CompiledProgram<R>,
        args: &KernelArgs<'_, R>,
        partition: &WorkPartition,
    ) -> Result<DispatchReport> {
        check_device_limits(partition, ctx.device().max_work_group_size)?;
        if let Some(tile) = program.tile_size() {
            if partition.local != [tile, tile] {
                return Err(GemmError::dispatch(
                    "launch",
                    format!(
                        "work-group {}x{} does not match the kernel's TILE_SIZE={tile}",
                        partition.local[0], partition.local[1]
                    ),
                ));
            }
        }

        let runtime = ctx.runtime();
        let entry_point = program.entry_point().to_string();
        let kernel = program.kernel_mut();
        for (arg, value) in &args.args {
            let bound = match value {
                ArgValue::Buffer(buf) => runtime.set_arg_buffer(kernel, arg.index, buf.handle()),
                ArgValue::Scalar(v) => runtime.set_arg_scalar(kernel, arg.index, *v),
            };
            bound.map_err(|e| GemmError::dispatch("bind", format!("argument {} ({}): {e}", arg.index, arg.name)))?;
        }
        debug!(kernel = %entry_point, args = args.len(), "kernel arguments bound");

        let start = Instant::now();
        runtime
            .enqueue_nd_range(kernel, partition.global, partition.local)
            .map_err(|e| GemmError::dispatch("enqueue", e))?;
        runtime.finish().map_err(|e| GemmError::dispatch("finish", e))?;
        let elapsed = start.elapsed();

        info!(
            kernel = %entry_point,
            global = ?partition.global,
            local = ?partition.local,
            elapsed_us = elapsed.as_micros() as u64,
            "kernel completed"
        );
        Ok(DispatchReport { global: partition.global, local: partition.local, elapsed })
    }
}
