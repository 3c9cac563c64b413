//! tilegemm command-line driver.
//!
//! Multiplies two matrix files on the selected device, compares the product
//! with an expected matrix and prints `PASS` or `FAIL`. The binary in
//! `main.rs` only parses arguments, installs logging and maps the outcome to
//! an exit code.

pub mod exit;
pub mod logging;

use anyhow::Context;
use clap::Parser;
use console::style;
use std::io::Write;
use std::path::{Path, PathBuf};
use tilegemm_common::{
    Backend, DeviceType, GemmConfig, GemmError, Matrix, VerificationReport, load_matrix, save_matrix, verify,
};
use tilegemm_opencl::{
    DeviceRuntime, DeviceSelector, ExecutionContext, HostRuntime, MultiplyOutput, MultiplyPlan, VerifiedRun, run_multiply,
};
use tracing::info;

pub use logging::LogFormat;

/// Mismatches printed before the list is summarised.
pub const MAX_PRINTED_MISMATCHES: usize = 20;

/// Multiply A x B on an OpenCL device and check the result against C.
#[derive(Debug, Parser)]
#[command(name = "tilegemm", version)]
#[command(about = "Tiled OpenCL matrix multiplication with result verification")]
#[command(long_about = r#"
Multiplies A by B with a tiled kernel, compares the product with an expected
matrix and prints PASS or FAIL.

Matrix files hold a `rows cols` header followed by row-major values.

Examples:
  tilegemm A.txt B.txt C.txt
  tilegemm A.txt B.txt C.txt out.txt --tile-size 8 --backend host
  tilegemm A.txt B.txt C.txt --kernel my_kernel.cl --strict
"#)]
pub struct Args {
    /// Left operand
    #[arg(value_name = "A_FILE")]
    pub a: PathBuf,

    /// Right operand
    #[arg(value_name = "B_FILE")]
    pub b: PathBuf,

    /// Expected product
    #[arg(value_name = "EXPECTED_C_FILE")]
    pub expected: PathBuf,

    /// Where to write the computed product (written even on FAIL)
    #[arg(value_name = "OUTPUT_C_FILE")]
    pub output: Option<PathBuf>,

    /// Kernel source file instead of the built-in kernel
    #[arg(long, value_name = "PATH")]
    pub kernel: Option<PathBuf>,

    /// Maximum absolute difference counted as a match
    #[arg(long, value_name = "TOL")]
    pub tolerance: Option<f32>,

    /// Work-group tile edge, passed to the kernel as TILE_SIZE
    #[arg(long, value_name = "N")]
    pub tile_size: Option<usize>,

    /// Device runtime (opencl, host). Defaults to opencl, which needs a build
    /// with the `opencl` feature; other builds must pass `--backend host`
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<Backend>,

    /// OpenCL platform index
    #[arg(long, value_name = "INDEX")]
    pub platform: Option<usize>,

    /// Device index within the platform
    #[arg(long, value_name = "INDEX")]
    pub device: Option<usize>,

    /// Device class (default, gpu, cpu, accelerator, all)
    #[arg(long, value_name = "TYPE")]
    pub device_type: Option<DeviceType>,

    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Exit non-zero when the product does not match
    #[arg(long)]
    pub strict: bool,
}

impl Args {
    /// Defaults, then `--config` or environment, then flags.
    pub fn resolve_config(&self) -> Result<GemmConfig, GemmError> {
        let mut config = match &self.config {
            Some(path) => GemmConfig::load(path)?,
            None => GemmConfig::from_env()?,
        };
        if let Some(backend) = self.backend {
            config.device.backend = backend;
        }
        if let Some(index) = self.platform {
            config.device.platform_index = index;
        }
        if let Some(index) = self.device {
            config.device.device_index = index;
        }
        if let Some(device_type) = self.device_type {
            config.device.device_type = device_type;
        }
        if let Some(path) = &self.kernel {
            config.kernel.kernel_path = Some(path.clone());
        }
        if let Some(tile) = self.tile_size {
            config.kernel.tile_size = tile;
        }
        if let Some(tolerance) = self.tolerance {
            config.verify.tolerance = tolerance;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct Outcome {
    pub run: VerifiedRun,
    pub backend: Backend,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.run.report.matches()
    }

    pub fn exit_code(&self, strict: bool) -> i32 {
        if self.passed() || !strict { exit::EXIT_SUCCESS } else { exit::EXIT_MISMATCH }
    }
}

fn load(label: &str, path: &Path) -> anyhow::Result<Matrix> {
    load_matrix(path).with_context(|| format!("failed to load matrix {label} from {}", path.display()))
}

/// Load, multiply, write the output file, then verify and print the verdict.
///
/// The product is written before verification, so it is kept even when the
/// expected matrix has the wrong shape.
pub fn run(args: &Args) -> anyhow::Result<Outcome> {
    let config = args.resolve_config().context("invalid configuration")?;
    let a = load("A", &args.a)?;
    let b = load("B", &args.b)?;
    let expected = load("C", &args.expected)?;
    info!(a = ?a.shape(), b = ?b.shape(), expected = ?expected.shape(), "matrices loaded");

    let plan = MultiplyPlan::from_config(&config).context("failed to read kernel source")?;
    let output = execute(&config, &a, &b, &plan)?;

    if let Some(path) = &args.output {
        save_matrix(path, &output.product)
            .with_context(|| format!("failed to write result to {}", path.display()))?;
        info!(path = %path.display(), "result written");
    }

    let report = verify(&output.product, &expected, config.verify.tolerance)
        .map_err(GemmError::from)
        .with_context(|| format!("cannot compare with expected matrix {}", args.expected.display()))?;
    info!(mismatches = report.mismatches.len(), max_abs_diff = report.max_abs_diff, "verification done");

    let mut stdout = std::io::stdout().lock();
    print_report(&mut stdout, &report).context("failed to write report")?;
    Ok(Outcome { run: VerifiedRun { output, report }, backend: config.device.backend })
}

fn execute(config: &GemmConfig, a: &Matrix, b: &Matrix, plan: &MultiplyPlan) -> anyhow::Result<MultiplyOutput> {
    match config.device.backend {
        Backend::Host => run_on::<HostRuntime>(config, a, b, plan),
        #[cfg(feature = "opencl")]
        Backend::OpenCl => run_on::<tilegemm_opencl::OpenClRuntime>(config, a, b, plan),
        #[cfg(not(feature = "opencl"))]
        Backend::OpenCl => Err(GemmError::Device(
            "this build has no OpenCL support; rebuild with `--features opencl` or pass `--backend host`".into(),
        )
        .into()),
    }
}

fn run_on<R: DeviceRuntime>(
    config: &GemmConfig,
    a: &Matrix,
    b: &Matrix,
    plan: &MultiplyPlan,
) -> anyhow::Result<MultiplyOutput> {
    let selector = DeviceSelector::from(&config.device);
    let ctx = ExecutionContext::<R>::create(&selector)
        .with_context(|| format!("failed to open {} device", config.device.backend))?;
    let output =
        run_multiply(&ctx, a, b, plan).with_context(|| format!("multiply failed on {}", ctx.device().name))?;
    info!(partition = %output.partition, elapsed_us = output.dispatch.elapsed.as_micros() as u64, "run finished");
    Ok(output)
}

/// `PASS`/`FAIL` line followed by up to [`MAX_PRINTED_MISMATCHES`] mismatches.
pub fn print_report<W: Write>(out: &mut W, report: &VerificationReport) -> std::io::Result<()> {
    if report.matches() {
        writeln!(
            out,
            "{} {}x{} product matches within {} (max |diff| {})",
            style("PASS").green().bold(),
            report.rows,
            report.cols,
            report.tolerance,
            report.max_abs_diff
        )?;
        return Ok(());
    }

    writeln!(
        out,
        "{} {} of {} elements differ by more than {}",
        style("FAIL").red().bold(),
        report.mismatches.len(),
        report.compared(),
        report.tolerance
    )?;
    for m in report.mismatches.iter().take(MAX_PRINTED_MISMATCHES) {
        writeln!(out, "  {m}")?;
    }
    if report.mismatches.len() > MAX_PRINTED_MISMATCHES {
        writeln!(out, "  ... and {} more", report.mismatches.len() - MAX_PRINTED_MISMATCHES)?;
    }
    Ok(())
}

/// Print `err` and its causes to stderr, followed by the build log when the
/// failure was a kernel build.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {err}", style("error:").red().bold());
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
    if let Some(log) = err.chain().find_map(|e| e.downcast_ref::<GemmError>()).and_then(GemmError::build_log) {
        eprintln!("{}", style("build log:").yellow());
        for line in log.lines() {
            eprintln!("  {line}");
        }
    }
}
