//! Common types for the tilegemm offload pipeline.
//!
//! This crate holds everything that does not touch a device: the [`Matrix`]
//! type and its text format, the CPU reference multiply, result verification,
//! the error taxonomy shared by every pipeline stage, and configuration.

pub mod config;
pub mod error;
pub mod matrix;
pub mod reference;
pub mod store;
pub mod verify;

pub use config::{
    Backend, ConfigError, DeviceConfig, DeviceType, GemmConfig, KernelConfig, VerifyConfig, option_defines,
};
pub use error::{BuildLog, ErrorKind, GemmError, Result, ShapeError};
pub use matrix::Matrix;
pub use store::{load_matrix, parse_matrix, save_matrix, write_matrix};
pub use verify::{Mismatch, VerificationReport, verify};
