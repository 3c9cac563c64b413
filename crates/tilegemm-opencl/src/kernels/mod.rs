//! OpenCL kernel sources.
//!
//! Kernel sources are embedded at compile time via `include_str!` and
//! compiled to programs at runtime with `-DTILE_SIZE=<n>` prepended to the
//! build options.

/// Tiled matrix multiplication kernel source.
pub const MATMUL_TILED_SRC: &str = include_str!("matmul_tiled.cl");

/// Entry point of [`MATMUL_TILED_SRC`].
pub const MATMUL_ENTRY_POINT: &str = "matrix_multiply";

/// Number of arguments taken by the matmul entry point.
pub const MATMUL_ARG_COUNT: usize = 9;
