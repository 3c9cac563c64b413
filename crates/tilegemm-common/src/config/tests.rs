//! Configuration tests

use super::*;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 9] = [
    "TILEGEMM_BACKEND",
    "TILEGEMM_PLATFORM_INDEX",
    "TILEGEMM_DEVICE_INDEX",
    "TILEGEMM_DEVICE_TYPE",
    "TILEGEMM_TILE_SIZE",
    "TILEGEMM_ENTRY_POINT",
    "TILEGEMM_BUILD_OPTIONS",
    "TILEGEMM_KERNEL_PATH",
    "TILEGEMM_TOLERANCE",
];

fn clear_env() {
    for var in ENV_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

#[test]
fn test_default_config_is_valid() {
    let cfg = GemmConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.kernel.entry_point, "matrix_multiply");
    assert_eq!(cfg.kernel.tile_size, 16);
    assert_eq!(cfg.verify.tolerance, 1e-3);
    assert_eq!(cfg.device.backend, Backend::OpenCl);
    assert_eq!(cfg.device.device_type, DeviceType::Default);
}

#[test]
fn test_default_toml_round_trips() {
    let toml_str = GemmConfig::default_toml().unwrap();
    let cfg: GemmConfig = toml::from_str(&toml_str).unwrap();
    assert_eq!(cfg, GemmConfig::default());
}

#[test]
#[serial]
fn test_partial_toml_fills_defaults() {
    clear_env();
    let cfg = GemmConfig::from_toml(
        r#"
[kernel]
tile_size = 8
"#,
    )
    .unwrap();
    assert_eq!(cfg.kernel.tile_size, 8);
    assert_eq!(cfg.kernel.entry_point, "matrix_multiply");
    assert_eq!(cfg.device, DeviceConfig::default());
}

#[test]
#[serial]
fn test_load_from_file() {
    clear_env();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[device]
backend = "host"
platform_index = 1
device_type = "gpu"

[kernel]
entry_point = "tiledMatrixMul"
build_options = "-cl-fast-relaxed-math"
kernel_path = "kernels/custom.cl"

[verify]
tolerance = 0.01
"#
    )
    .unwrap();

    let cfg = GemmConfig::load(file.path()).unwrap();
    assert_eq!(cfg.device.backend, Backend::Host);
    assert_eq!(cfg.device.platform_index, 1);
    assert_eq!(cfg.device.device_type, DeviceType::Gpu);
    assert_eq!(cfg.kernel.entry_point, "tiledMatrixMul");
    assert_eq!(cfg.kernel.build_options, "-cl-fast-relaxed-math");
    assert_eq!(cfg.kernel.kernel_path, Some(PathBuf::from("kernels/custom.cl")));
    assert_eq!(cfg.verify.tolerance, 0.01);
}

#[test]
fn test_load_missing_file_is_io_error() {
    let err = GemmConfig::load(Path::new("/nonexistent/tilegemm.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let err = GemmConfig::from_toml("[kernel\ntile_size = 8").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_unknown_backend_in_toml_is_parse_error() {
    let err = GemmConfig::from_toml("[device]\nbackend = \"cuda\"").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_validation_tile_size() {
    let mut cfg = GemmConfig::default();
    cfg.kernel.tile_size = 0;
    assert!(cfg.validate().unwrap_err().to_string().contains("tile_size"));

    cfg.kernel.tile_size = 12;
    assert!(cfg.validate().unwrap_err().to_string().contains("power of two"));

    cfg.kernel.tile_size = 64;
    assert!(cfg.validate().is_err());

    for ok in [1, 2, 4, 8, 16, 32] {
        cfg.kernel.tile_size = ok;
        assert!(cfg.validate().is_ok(), "tile_size {ok} should be accepted");
    }
}

#[test]
fn test_validation_tolerance() {
    let mut cfg = GemmConfig::default();
    cfg.verify.tolerance = -0.1;
    assert!(cfg.validate().is_err());
    cfg.verify.tolerance = f32::NAN;
    assert!(cfg.validate().is_err());
    cfg.verify.tolerance = f32::INFINITY;
    assert!(cfg.validate().is_err());
    cfg.verify.tolerance = 0.0;
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_validation_entry_point_and_options() {
    let mut cfg = GemmConfig::default();
    cfg.kernel.entry_point = "  ".into();
    assert!(cfg.validate().unwrap_err().to_string().contains("entry_point"));

    let mut cfg = GemmConfig::default();
    cfg.kernel.build_options = "-DTILE_SIZE=8".into();
    assert!(cfg.validate().unwrap_err().to_string().contains("TILE_SIZE"));
}

#[test]
fn test_validation_rejects_spaced_tile_define() {
    for opts in ["-D TILE_SIZE=8", "-cl-mad-enable -D TILE_SIZE", "-DFOO=1 -D  TILE_SIZE=32"] {
        let mut cfg = GemmConfig::default();
        cfg.kernel.build_options = opts.into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("TILE_SIZE"), "{opts}: {err}");
    }

    let mut cfg = GemmConfig::default();
    cfg.kernel.build_options = "-D TILE_SIZE_HINT=8 -DUNROLL".into();
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_option_defines_both_spellings() {
    assert_eq!(
        option_defines("-DTILE_SIZE=16 -cl-mad-enable -D TILE_SIZE=8 -DFAST"),
        vec![("TILE_SIZE", "16"), ("TILE_SIZE", "8"), ("FAST", "1")]
    );
    assert!(option_defines("-cl-fast-relaxed-math -w").is_empty());
    assert!(option_defines("-D").is_empty());
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    unsafe {
        env::set_var("TILEGEMM_BACKEND", "host");
        env::set_var("TILEGEMM_DEVICE_INDEX", "2");
        env::set_var("TILEGEMM_DEVICE_TYPE", "CPU");
        env::set_var("TILEGEMM_TILE_SIZE", "8");
        env::set_var("TILEGEMM_TOLERANCE", "0.5");
        env::set_var("TILEGEMM_ENTRY_POINT", "matrixMultiply");
    }

    let cfg = GemmConfig::from_env();
    clear_env();
    let cfg = cfg.unwrap();

    assert_eq!(cfg.device.backend, Backend::Host);
    assert_eq!(cfg.device.device_index, 2);
    assert_eq!(cfg.device.device_type, DeviceType::Cpu);
    assert_eq!(cfg.kernel.tile_size, 8);
    assert_eq!(cfg.verify.tolerance, 0.5);
    assert_eq!(cfg.kernel.entry_point, "matrixMultiply");
}

#[test]
#[serial]
fn test_env_overrides_toml() {
    clear_env();
    unsafe {
        env::set_var("TILEGEMM_TILE_SIZE", "4");
    }
    let cfg = GemmConfig::from_toml("[kernel]\ntile_size = 32");
    clear_env();
    assert_eq!(cfg.unwrap().kernel.tile_size, 4);
}

#[test]
#[serial]
fn test_invalid_env_override_names_key() {
    clear_env();
    unsafe {
        env::set_var("TILEGEMM_TILE_SIZE", "sixteen");
    }
    let err = GemmConfig::from_env().unwrap_err();
    clear_env();
    match err {
        ConfigError::EnvOverride { key, value, .. } => {
            assert_eq!(key, "TILEGEMM_TILE_SIZE");
            assert_eq!(value, "sixteen");
        }
        other => panic!("expected EnvOverride, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_env_override_still_validated() {
    clear_env();
    unsafe {
        env::set_var("TILEGEMM_TILE_SIZE", "48");
    }
    let err = GemmConfig::from_env().unwrap_err();
    clear_env();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
#[serial]
fn test_empty_kernel_path_env_clears_path() {
    clear_env();
    unsafe {
        env::set_var("TILEGEMM_KERNEL_PATH", "");
    }
    let cfg = GemmConfig::from_toml("[kernel]\nkernel_path = \"a.cl\"");
    clear_env();
    assert_eq!(cfg.unwrap().kernel.kernel_path, None);
}

#[test]
fn test_backend_and_device_type_parse() {
    assert_eq!("OpenCL".parse::<Backend>().unwrap(), Backend::OpenCl);
    assert_eq!("host".parse::<Backend>().unwrap(), Backend::Host);
    assert!("metal".parse::<Backend>().is_err());
    assert_eq!("accelerator".parse::<DeviceType>().unwrap(), DeviceType::Accelerator);
    assert_eq!(DeviceType::All.to_string(), "all");
    assert_eq!(Backend::OpenCl.to_string(), "opencl");
}

#[test]
fn test_config_error_converts_to_gemm_error() {
    let err: GemmError = ConfigError::Validation("tile_size must be a power of two".into()).into();
    assert_eq!(err.kind(), crate::error::ErrorKind::Config);
}
