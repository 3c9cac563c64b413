//! End-to-end CLI tests on the host backend.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn tilegemm() -> Command {
    let mut cmd = Command::cargo_bin("tilegemm").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

/// A = 2x3 ones, B = 3x2 ones, C = 2x2 of `c`.
fn ones_dataset(dir: &Path, c: f32) -> [PathBuf; 3] {
    [
        write(dir, "A.txt", "2 3\n1 1 1\n1 1 1\n"),
        write(dir, "B.txt", "3 2\n1 1\n1 1\n1 1\n"),
        write(dir, "C.txt", &format!("2 2\n{c} {c}\n{c} {c}\n")),
    ]
}

// ── Verdicts ─────────────────────────────────────────────────────────────────

#[test]
fn matching_product_passes() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 3.0);
    let out = dir.path().join("out.txt");

    tilegemm()
        .args([&a, &b, &c, &out])
        .args(["--backend", "host"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS"));

    assert_eq!(fs::read_to_string(&out).unwrap(), "2 2\n3 3\n3 3\n");
}

#[test]
fn mismatch_prints_fail_and_still_writes_output() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 4.0);
    let out = dir.path().join("out.txt");

    tilegemm()
        .args([&a, &b, &c, &out])
        .args(["--backend", "host"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("FAIL").and(predicate::str::contains("4 of 4")));

    assert!(out.exists());
}

#[test]
fn strict_mismatch_exits_nine() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 4.0);
    tilegemm().args([&a, &b, &c]).args(["--backend", "host", "--strict"]).assert().code(9);
}

#[test]
fn loose_tolerance_accepts_small_error() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 3.25);
    tilegemm()
        .args([&a, &b, &c])
        .args(["--backend", "host", "--tolerance", "0.5", "--strict"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS"));
}

#[test]
fn non_tile_aligned_with_small_tile() {
    let dir = TempDir::new().unwrap();
    let row = vec!["1"; 17].join(" ");
    let body: String = (0..17).map(|_| format!("{row}\n")).collect();
    let a = write(dir.path(), "A.txt", &format!("17 17\n{body}"));
    let c_row = vec!["17"; 17].join(" ");
    let c_body: String = (0..17).map(|_| format!("{c_row}\n")).collect();
    let c = write(dir.path(), "C.txt", &format!("17 17\n{c_body}"));

    for tile in ["4", "16"] {
        tilegemm()
            .args([&a, &a, &c])
            .args(["--backend", "host", "--strict", "--tile-size", tile])
            .assert()
            .success();
    }
}

// ── Error exit codes ─────────────────────────────────────────────────────────

#[test]
fn missing_input_exits_with_io_code() {
    let dir = TempDir::new().unwrap();
    let [_, b, c] = ones_dataset(dir.path(), 3.0);
    tilegemm()
        .args([&dir.path().join("nope.txt"), &b, &c])
        .args(["--backend", "host"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nope.txt"));
}

#[test]
fn expected_shape_mismatch_exits_with_shape_code() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "A.txt", "3 3\n1 0 0\n0 1 0\n0 0 1\n");
    let c = write(dir.path(), "C.txt", "3 4\n1 0 0 0\n0 1 0 0\n0 0 1 0\n");
    tilegemm().args([&a, &a, &c]).args(["--backend", "host"]).assert().code(3);
}

#[test]
fn product_is_written_even_when_expected_shape_differs() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "A.txt", "3 3\n1 0 0\n0 1 0\n0 0 1\n");
    let c = write(dir.path(), "C.txt", "3 4\n1 0 0 0\n0 1 0 0\n0 0 1 0\n");
    let out = dir.path().join("out.txt");

    tilegemm().args([&a, &a, &c]).arg(&out).args(["--backend", "host"]).assert().code(3);
    assert_eq!(fs::read_to_string(&out).unwrap(), "3 3\n1 0 0\n0 1 0\n0 0 1\n");
}

#[test]
fn broken_kernel_prints_build_log() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 3.0);
    let kernel = write(dir.path(), "broken.cl", "__kernel void matrix_multiply(__global float *A) {\n  A[0] = 1.0f;\n");
    let out = dir.path().join("out.txt");

    tilegemm()
        .args([&a, &b, &c, &out])
        .args(["--backend", "host", "--kernel"])
        .arg(&kernel)
        .assert()
        .code(5)
        .stderr(predicate::str::contains("build log").and(predicate::str::contains("error generated")));

    assert!(!out.exists());
}

#[test]
fn build_log_is_printed_once() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 3.0);
    let kernel = write(dir.path(), "broken.cl", "__kernel void matrix_multiply(__global float *A) {\n  A[0] = 1.0f;\n");

    let output = tilegemm().args([&a, &b, &c]).args(["--backend", "host", "--kernel"]).arg(&kernel).output().unwrap();
    assert_eq!(output.status.code(), Some(5));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert_eq!(stderr.matches("error generated").count(), 1, "{stderr}");
}

#[test]
fn invalid_tile_size_exits_with_config_code() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 3.0);
    tilegemm().args([&a, &b, &c]).args(["--backend", "host", "--tile-size", "3"]).assert().code(7);
}

#[test]
fn unavailable_device_exits_with_device_code() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 3.0);
    tilegemm().args([&a, &b, &c]).args(["--backend", "host", "--device", "2"]).assert().code(4);
}

#[cfg(not(feature = "opencl"))]
#[test]
fn opencl_backend_without_feature_is_device_error() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 3.0);
    tilegemm()
        .args([&a, &b, &c])
        .args(["--backend", "opencl"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("--features opencl"));
}

// ── Configuration sources ────────────────────────────────────────────────────

#[test]
fn backend_from_environment() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 3.0);
    tilegemm().env("TILEGEMM_BACKEND", "host").args([&a, &b, &c]).assert().success();
}

#[test]
fn config_file_sets_backend_and_tile() {
    let dir = TempDir::new().unwrap();
    let [a, b, c] = ones_dataset(dir.path(), 3.0);
    let config = write(dir.path(), "tilegemm.toml", "[device]\nbackend = \"host\"\n\n[kernel]\ntile_size = 2\n");
    tilegemm().args([&a, &b, &c]).arg("--config").arg(&config).assert().success();
}

#[test]
fn help_lists_options() {
    let out = tilegemm().arg("--help").assert().success().get_output().stdout.clone();
    let s = String::from_utf8(out).unwrap();
    for needle in ["--kernel", "--tolerance", "--tile-size", "--backend", "--strict", "--config"] {
        assert!(s.contains(needle), "help missing `{needle}`");
    }
    assert!(s.contains("`opencl` feature"), "help should say when the default backend works");
}

// ── Dataset generator ────────────────────────────────────────────────────────

#[test]
fn generated_dataset_verifies() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("tilegemm-datagen")
        .unwrap()
        .args(["19", "23", "11", "--seed", "7", "--out-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("seed 7"));

    let p = |n: &str| dir.path().join(n);
    tilegemm()
        .args([p("A.txt"), p("B.txt"), p("C.txt")])
        .args(["--backend", "host", "--strict"])
        .assert()
        .success();
}

#[test]
fn same_seed_same_dataset() {
    let dirs = [TempDir::new().unwrap(), TempDir::new().unwrap()];
    for d in &dirs {
        Command::cargo_bin("tilegemm-datagen")
            .unwrap()
            .args(["4", "5", "6", "--seed", "99", "--out-dir"])
            .arg(d.path())
            .assert()
            .success();
    }
    for name in ["A.txt", "B.txt", "C.txt"] {
        assert_eq!(
            fs::read_to_string(dirs[0].path().join(name)).unwrap(),
            fs::read_to_string(dirs[1].path().join(name)).unwrap()
        );
    }
}

#[test]
fn zero_dimension_dataset_rejected() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("tilegemm-datagen")
        .unwrap()
        .args(["0", "5", "6", "--out-dir"])
        .arg(dir.path())
        .assert()
        .code(3);
}

#[test]
fn overflowing_dataset_shape_rejected_before_allocation() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("tilegemm-datagen")
        .unwrap()
        .args(["18446744073709551615", "2", "2", "--out-dir"])
        .arg(dir.path())
        .assert()
        .code(3);
    assert!(!dir.path().join("A.txt").exists());
}
