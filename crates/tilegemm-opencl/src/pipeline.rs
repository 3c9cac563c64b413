//! End-to-end multiply: compile, stage, dispatch, retrieve, release.
//!
//! The program is built before any buffer exists, so a build failure never
//! touches device memory. Buffers are owned locals and are released in
//! reverse order of creation on every exit path.

use crate::buffers::BufferManager;
use crate::context::ExecutionContext;
use crate::dispatch::{DispatchReport, Dispatcher, KernelArgs, MatmulDims};
use crate::kernels::{MATMUL_ENTRY_POINT, MATMUL_TILED_SRC};
use crate::partition::{WorkPartition, partition};
use crate::program::ProgramBuilder;
use crate::runtime::{AccessMode, DeviceRuntime};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tilegemm_common::{GemmConfig, GemmError, Matrix, Result, VerificationReport, verify};
use tracing::info;

/// Where the kernel program text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    /// The tiled kernel compiled into this crate.
    Embedded,
    /// Read from disk.
    File { path: PathBuf, text: String },
    Text(String),
}

impl KernelSource {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| GemmError::io(path, e))?;
        Ok(Self::File { path: path.to_path_buf(), text })
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// `kernel_path` from the config, or the embedded kernel.
    pub fn from_config(config: &GemmConfig) -> Result<Self> {
        match &config.kernel.kernel_path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::Embedded),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Embedded => MATMUL_TILED_SRC,
            Self::File { text, .. } | Self::Text(text) => text,
        }
    }

    /// Short description for logs.
    pub fn origin(&self) -> Cow<'_, str> {
        match self {
            Self::Embedded => Cow::Borrowed("embedded matmul_tiled.cl"),
            Self::File { path, .. } => Cow::Owned(path.display().to_string()),
            Self::Text(_) => Cow::Borrowed("inline source"),
        }
    }
}

/// Everything `run_multiply` needs besides the matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplyPlan {
    pub source: KernelSource,
    pub entry_point: String,
    pub tile_size: usize,
    pub build_options: String,
}

impl Default for MultiplyPlan {
    fn default() -> Self {
        Self {
            source: KernelSource::Embedded,
            entry_point: MATMUL_ENTRY_POINT.to_string(),
            tile_size: 16,
            build_options: String::new(),
        }
    }
}

impl MultiplyPlan {
    /// Plan from the `[kernel]` section. Reads `kernel_path` if one is set.
    pub fn from_config(config: &GemmConfig) -> Result<Self> {
        Ok(Self {
            source: KernelSource::from_config(config)?,
            entry_point: config.kernel.entry_point.clone(),
            tile_size: config.kernel.tile_size,
            build_options: config.kernel.build_options.clone(),
        })
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_source(mut self, source: KernelSource) -> Self {
        self.source = source;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiplyOutput {
    pub product: Matrix,
    pub partition: WorkPartition,
    pub dispatch: DispatchReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedRun {
    pub output: MultiplyOutput,
    pub report: VerificationReport,
}

/// Compute `a x b` on the context's device.
pub fn run_multiply<R: DeviceRuntime>(
    ctx: &ExecutionContext<R>,
    a: &Matrix,
    b: &Matrix,
    plan: &MultiplyPlan,
) -> Result<MultiplyOutput> {
    let dims = MatmulDims::for_product(a, b)?;
    info!(
        a_rows = dims.a_rows,
        a_cols = dims.a_cols,
        b_cols = dims.b_cols,
        tile_size = plan.tile_size,
        source = %plan.source.origin(),
        "starting multiply"
    );

    let mut program = ProgramBuilder::new(ctx)
        .define("TILE_SIZE", plan.tile_size)
        .options(&plan.build_options)
        .build(plan.source.text(), &plan.entry_point)?;

    let mut buffers = BufferManager::new(ctx);
    let a_buf = buffers.stage("A", a, AccessMode::ReadOnly)?;
    let b_buf = buffers.stage("B", b, AccessMode::ReadOnly)?;
    let c_buf = buffers.allocate("C", dims.c_rows, dims.c_cols, AccessMode::WriteOnly)?;

    let partition = partition(dims.c_rows, dims.c_cols, plan.tile_size)?;
    info!(%partition, "work partition");

    let args = KernelArgs::matmul(&a_buf, &b_buf, &c_buf, &dims)?;
    let dispatch = Dispatcher::dispatch(ctx, &mut program, &args, &partition)?;
    let product = buffers.retrieve(&c_buf, dims.c_rows, dims.c_cols)?;
    drop(args);

    buffers.release(c_buf);
    buffers.release(b_buf);
    buffers.release(a_buf);
    info!(bytes_staged = buffers.staged_bytes(), "multiply complete");

    Ok(MultiplyOutput { product, partition, dispatch })
}

/// [`run_multiply`], then compare the product with `expected`.
pub fn run_and_verify<R: DeviceRuntime>(
    ctx: &ExecutionContext<R>,
    a: &Matrix,
    b: &Matrix,
    expected: &Matrix,
    plan: &MultiplyPlan,
    tolerance: f32,
) -> Result<VerifiedRun> {
    let output = run_multiply(ctx, a, b, plan)?;
    let report = verify(&output.product, expected, tolerance)?;
    if report.matches() {
        info!(compared = report.compared(), max_abs_diff = report.max_abs_diff, "verification passed");
    } else {
        info!(
            mismatches = report.mismatches.len(),
            compared = report.compared(),
            max_abs_diff = report.max_abs_diff,
            "verification failed"
        );
    }
    Ok(VerifiedRun { output, report })
}
