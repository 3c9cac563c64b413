//! Run configuration for the offload pipeline.
//!
//! Loads [`GemmConfig`] from a TOML file with environment variable overrides
//! via `TILEGEMM_*` prefixed variables. Command-line flags are applied on top
//! by the binary.

use crate::error::GemmError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which device runtime executes the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A real OpenCL platform (requires the `opencl` feature).
    OpenCl,
    /// The in-process reference device.
    Host,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenCl => write!(f, "opencl"),
            Self::Host => write!(f, "host"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opencl" | "cl" => Ok(Self::OpenCl),
            "host" | "cpu-reference" => Ok(Self::Host),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// OpenCL device class to request from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Default,
    Gpu,
    Cpu,
    Accelerator,
    All,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Gpu => write!(f, "gpu"),
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator => write!(f, "accelerator"),
            Self::All => write!(f, "all"),
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "gpu" => Ok(Self::Gpu),
            "cpu" => Ok(Self::Cpu),
            "accelerator" => Ok(Self::Accelerator),
            "all" => Ok(Self::All),
            other => Err(format!("unknown device type: {other}")),
        }
    }
}

/// `[device]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Override: `TILEGEMM_BACKEND`
    pub backend: Backend,
    /// Zero-based platform index.
    /// Override: `TILEGEMM_PLATFORM_INDEX`
    pub platform_index: usize,
    /// Zero-based device index within the platform.
    /// Override: `TILEGEMM_DEVICE_INDEX`
    pub device_index: usize,
    /// Override: `TILEGEMM_DEVICE_TYPE`
    pub device_type: DeviceType,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: Backend::OpenCl,
            platform_index: 0,
            device_index: 0,
            device_type: DeviceType::Default,
        }
    }
}

/// `[kernel]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Name of the `__kernel` function to launch.
    /// Override: `TILEGEMM_ENTRY_POINT`
    pub entry_point: String,
    /// Work-group edge length; also passed to the compiler as `TILE_SIZE`.
    /// Override: `TILEGEMM_TILE_SIZE`
    pub tile_size: usize,
    /// Extra compiler options appended after `-DTILE_SIZE=<n>`.
    /// Override: `TILEGEMM_BUILD_OPTIONS`
    pub build_options: String,
    /// Kernel source file. `None` uses the embedded tiled kernel.
    /// Override: `TILEGEMM_KERNEL_PATH`
    pub kernel_path: Option<PathBuf>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            entry_point: "matrix_multiply".to_string(),
            tile_size: 16,
            build_options: String::new(),
            kernel_path: None,
        }
    }
}

/// `[verify]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Maximum absolute element difference that still counts as a match.
    /// Override: `TILEGEMM_TOLERANCE`
    pub tolerance: f32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { tolerance: 1e-3 }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GemmConfig {
    pub device: DeviceConfig,
    pub kernel: KernelConfig,
    pub verify: VerifyConfig,
}

/// Errors that can occur when loading or validating a [`GemmConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl From<ConfigError> for GemmError {
    fn from(err: ConfigError) -> Self {
        GemmError::Config(err.to_string())
    }
}

/// Largest accepted tile edge. 32x32 work-items is above the work-group limit
/// of most devices already.
pub const MAX_TILE_SIZE: usize = 32;

impl GemmConfig {
    /// Default configuration rendered as TOML.
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Load a TOML file, fill missing fields with defaults, then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: GemmConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tile = self.kernel.tile_size;
        if tile == 0 || tile > MAX_TILE_SIZE {
            return Err(ConfigError::Validation(format!(
                "tile_size must be in 1..={MAX_TILE_SIZE}, got {tile}"
            )));
        }
        if !tile.is_power_of_two() {
            return Err(ConfigError::Validation(format!(
                "tile_size must be a power of two, got {tile}"
            )));
        }
        let tol = self.verify.tolerance;
        if !tol.is_finite() || tol < 0.0 {
            return Err(ConfigError::Validation(format!(
                "tolerance must be finite and >= 0, got {tol}"
            )));
        }
        if self.kernel.entry_point.trim().is_empty() {
            return Err(ConfigError::Validation("entry_point must not be empty".into()));
        }
        if option_defines(&self.kernel.build_options).iter().any(|(name, _)| *name == "TILE_SIZE") {
            return Err(ConfigError::Validation(
                "build_options must not define TILE_SIZE; set tile_size instead".into(),
            ));
        }
        Ok(())
    }

    /// Apply `TILEGEMM_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = env_var("TILEGEMM_BACKEND") {
            self.device.backend = parse_override("TILEGEMM_BACKEND", &val, |v| v.parse())?;
        }
        if let Some(val) = env_var("TILEGEMM_PLATFORM_INDEX") {
            self.device.platform_index =
                parse_override("TILEGEMM_PLATFORM_INDEX", &val, |v| v.parse().map_err(|e| format!("{e}")))?;
        }
        if let Some(val) = env_var("TILEGEMM_DEVICE_INDEX") {
            self.device.device_index =
                parse_override("TILEGEMM_DEVICE_INDEX", &val, |v| v.parse().map_err(|e| format!("{e}")))?;
        }
        if let Some(val) = env_var("TILEGEMM_DEVICE_TYPE") {
            self.device.device_type = parse_override("TILEGEMM_DEVICE_TYPE", &val, |v| v.parse())?;
        }
        if let Some(val) = env_var("TILEGEMM_TILE_SIZE") {
            self.kernel.tile_size =
                parse_override("TILEGEMM_TILE_SIZE", &val, |v| v.parse().map_err(|e| format!("{e}")))?;
        }
        if let Some(val) = env_var("TILEGEMM_ENTRY_POINT") {
            self.kernel.entry_point = val;
        }
        if let Some(val) = env_var("TILEGEMM_BUILD_OPTIONS") {
            self.kernel.build_options = val;
        }
        if let Some(val) = env_var("TILEGEMM_KERNEL_PATH") {
            self.kernel.kernel_path = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
        }
        if let Some(val) = env_var("TILEGEMM_TOLERANCE") {
            self.verify.tolerance =
                parse_override("TILEGEMM_TOLERANCE", &val, |v| v.parse().map_err(|e| format!("{e}")))?;
        }
        Ok(())
    }
}

/// Macro definitions in a compiler option string, in order. Accepts both
/// `-DNAME=value` and `-D NAME=value`; a define without `=` has value `"1"`.
pub fn option_defines(options: &str) -> Vec<(&str, &str)> {
    let mut defines = Vec::new();
    let mut tokens = options.split_whitespace();
    while let Some(tok) = tokens.next() {
        let Some(rest) = tok.strip_prefix("-D") else { continue };
        let def = if rest.is_empty() {
            match tokens.next() {
                Some(next) => next,
                None => break,
            }
        } else {
            rest
        };
        defines.push(def.split_once('=').unwrap_or((def, "1")));
    }
    defines
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_override<T>(
    key: &str,
    value: &str,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    parse(value.trim()).map_err(|reason| ConfigError::EnvOverride {
        key: key.into(),
        value: value.into(),
        reason,
    })
}

#[cfg(test)]
mod tests;
