//! Kernel program compilation.

use crate::context::ExecutionContext;
use crate::runtime::{DeviceRuntime, RuntimeError, status};
use std::fmt::Display;
use tilegemm_common::{BuildLog, GemmError, Result, option_defines};
use tracing::{info, warn};

/// A built program and the kernel for its entry point.
///
/// The kernel is declared first so it is released before the program.
pub struct CompiledProgram<R: DeviceRuntime> {
    kernel: R::Kernel,
    program: R::Program,
    entry_point: String,
    tile_size: Option<usize>,
}

impl<R: DeviceRuntime> CompiledProgram<R> {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// `TILE_SIZE` the program was compiled with, if it was defined.
    pub fn tile_size(&self) -> Option<usize> {
        self.tile_size
    }

    pub fn program(&self) -> &R::Program {
        &self.program
    }

    pub(crate) fn kernel_mut(&mut self) -> &mut R::Kernel {
        &mut self.kernel
    }
}

/// Compiles kernel source for the context's device.
///
/// ```ignore
/// let program = ProgramBuilder::new(&ctx)
///     .define("TILE_SIZE", 16)
///     .options("-cl-mad-enable")
///     .build(MATMUL_TILED_SRC, "matrix_multiply")?;
/// ```
pub struct ProgramBuilder<'a, R: DeviceRuntime> {
    ctx: &'a ExecutionContext<R>,
    defines: Vec<(String, String)>,
    extra_options: String,
}

impl<'a, R: DeviceRuntime> ProgramBuilder<'a, R> {
    pub fn new(ctx: &'a ExecutionContext<R>) -> Self {
        Self { ctx, defines: Vec::new(), extra_options: String::new() }
    }

    /// Add `-D<name>=<value>`. A later define of the same name replaces it.
    pub fn define(mut self, name: &str, value: impl Display) -> Self {
        self.defines.retain(|(n, _)| n != name);
        self.defines.push((name.to_string(), value.to_string()));
        self
    }

    /// Extra compiler options appended after the defines.
    pub fn options(mut self, extra: &str) -> Self {
        self.extra_options = extra.trim().to_string();
        self
    }

    /// The full option string passed to the compiler.
    pub fn option_string(&self) -> String {
        let mut parts: Vec<String> = self.defines.iter().map(|(n, v)| format!("-D{n}={v}")).collect();
        if !self.extra_options.is_empty() {
            parts.push(self.extra_options.clone());
        }
        parts.join(" ")
    }

    /// Compile `source` and create the kernel named `entry_point`.
    ///
    /// Any failure, including an unknown entry point, is a
    /// [`GemmError::Build`] carrying a non-empty log. Nothing allocated here
    /// survives a failure.
    pub fn build(self, source: &str, entry_point: &str) -> Result<CompiledProgram<R>> {
        let fail = |log: String| GemmError::Build { entry_point: entry_point.to_string(), log: BuildLog::new(log) };

        if source.trim().is_empty() {
            return Err(fail("<source>: error: kernel source is empty".into()));
        }
        if entry_point.trim().is_empty() {
            return Err(fail("<source>: error: no kernel entry point was given".into()));
        }

        let runtime = self.ctx.runtime();
        let options = self.option_string();
        let mut program = runtime
            .create_program(source)
            .map_err(|e| fail(format!("could not create program: {e}")))?;

        if let Err(e) = runtime.build_program(&mut program, &options) {
            let log = fetch_build_log(runtime, &program, &e);
            warn!(entry_point, code = e.code_name(), log_bytes = log.as_str().len(), "kernel build failed");
            return Err(GemmError::Build { entry_point: entry_point.to_string(), log });
        }

        let kernel = runtime.create_kernel(&program, entry_point).map_err(|e| {
            if e.code == status::CL_INVALID_KERNEL_NAME {
                fail(format!("<source>: error: no kernel named '{entry_point}' in program source ({e})"))
            } else {
                fail(format!("could not create kernel '{entry_point}': {e}"))
            }
        })?;

        info!(entry_point, options = %options, "kernel program built");
        // The compiler keeps the last definition, so extra options can override ours.
        let tile_size = option_defines(&options)
            .into_iter()
            .rev()
            .find(|(n, _)| *n == "TILE_SIZE")
            .and_then(|(_, v)| v.parse().ok());
        Ok(CompiledProgram { kernel, program, entry_point: entry_point.to_string(), tile_size })
    }
}

/// Query the log size, then read exactly that many bytes. An empty or
/// unreadable log is replaced by a diagnostic naming the failure.
fn fetch_build_log<R: DeviceRuntime>(runtime: &R, program: &R::Program, build_err: &RuntimeError) -> BuildLog {
    let fetched = runtime.build_log_size(program).and_then(|size| {
        let mut buf = vec![0u8; size];
        runtime.read_build_log(program, &mut buf).map(|()| BuildLog::from_bytes(&buf))
    });
    match fetched {
        Ok(log) if !log.is_empty() => log,
        Ok(_) => BuildLog::new(format!("{build_err}; the device returned an empty build log")),
        Err(log_err) => BuildLog::new(format!("{build_err}; the build log could not be read: {log_err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRuntime;
    use crate::kernels::{MATMUL_ENTRY_POINT, MATMUL_TILED_SRC};
    use tilegemm_common::ErrorKind;

    fn ctx() -> ExecutionContext<HostRuntime> {
        ExecutionContext::from_runtime(HostRuntime::new())
    }

    #[test]
    fn builds_embedded_kernel() {
        let ctx = ctx();
        let program = ProgramBuilder::new(&ctx)
            .define("TILE_SIZE", 16)
            .build(MATMUL_TILED_SRC, MATMUL_ENTRY_POINT)
            .unwrap();
        assert_eq!(program.entry_point(), "matrix_multiply");
        assert_eq!(program.tile_size(), Some(16));
    }

    #[test]
    fn option_string_puts_defines_first() {
        let ctx = ctx();
        let builder = ProgramBuilder::new(&ctx).define("TILE_SIZE", 8).options(" -cl-mad-enable ").define("TILE_SIZE", 4);
        assert_eq!(builder.option_string(), "-DTILE_SIZE=4 -cl-mad-enable");
    }

    #[test]
    fn tile_size_follows_last_define_in_options() {
        let ctx = ctx();
        let program = ProgramBuilder::new(&ctx)
            .define("TILE_SIZE", 16)
            .options("-D TILE_SIZE=8")
            .build(MATMUL_TILED_SRC, MATMUL_ENTRY_POINT)
            .unwrap();
        assert_eq!(program.tile_size(), Some(8));
    }

    #[test]
    fn syntax_error_returns_full_log() {
        let ctx = ctx();
        let err = ProgramBuilder::new(&ctx)
            .define("TILE_SIZE", 16)
            .build("__kernel void matrix_multiply(__global float *A) {\n  A[0] = 1.0f;\n", "matrix_multiply")
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Build);
        let log = err.build_log().unwrap();
        assert!(!log.is_empty());
        assert!(log.as_str().contains("<source>:1:"), "{log}");
        assert!(log.as_str().contains("1 error generated."));
        assert_eq!(ctx.runtime().stats().live_programs, 0);
    }

    #[test]
    fn missing_tile_define_fails_build() {
        let ctx = ctx();
        let err = ProgramBuilder::new(&ctx).build(MATMUL_TILED_SRC, MATMUL_ENTRY_POINT).err().unwrap();
        assert!(err.build_log().unwrap().as_str().contains("TILE_SIZE must be defined"));
    }

    #[test]
    fn empty_source_is_build_error() {
        let ctx = ctx();
        let err = ProgramBuilder::new(&ctx).build("  \n", "matrix_multiply").err().unwrap();
        assert!(err.build_log().unwrap().as_str().contains("empty"));
        assert_eq!(ctx.runtime().stats().programs_created, 0);
    }

    #[test]
    fn unknown_entry_point_is_build_error() {
        let ctx = ctx();
        let err = ProgramBuilder::new(&ctx)
            .define("TILE_SIZE", 16)
            .build(MATMUL_TILED_SRC, "tiledMatrixMul")
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Build);
        assert!(err.build_log().unwrap().as_str().contains("no kernel named 'tiledMatrixMul'"));
        assert!(ctx.runtime().stats().all_released());
    }

    #[test]
    fn bad_build_options_surface_in_log() {
        let ctx = ctx();
        let err = ProgramBuilder::new(&ctx)
            .define("TILE_SIZE", 16)
            .options("--bogus")
            .build(MATMUL_TILED_SRC, MATMUL_ENTRY_POINT)
            .err()
            .unwrap();
        let log = err.build_log().unwrap().as_str().to_string();
        assert!(log.contains("CL_INVALID_BUILD_OPTIONS"), "{log}");
    }
}
