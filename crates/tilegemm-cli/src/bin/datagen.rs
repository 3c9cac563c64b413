//! `tilegemm-datagen`: write a random A, B and their product C.

use anyhow::Context;
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use tilegemm_cli::{LogFormat, exit, logging, print_error};
use tilegemm_common::matrix::element_count;
use tilegemm_common::{GemmError, Matrix, reference, save_matrix};
use tracing::info;

/// Generate a verification dataset: A (rows x inner), B (inner x cols) and
/// C = A x B computed on the CPU.
#[derive(Debug, Parser)]
#[command(name = "tilegemm-datagen", version)]
struct Args {
    rows: usize,
    inner: usize,
    cols: usize,

    /// Directory receiving A.txt, B.txt and C.txt
    #[arg(long, value_name = "DIR", default_value = ".")]
    out_dir: PathBuf,

    /// RNG seed; a random seed is used and logged when omitted
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

fn random_matrix(rng: &mut ChaCha8Rng, rows: usize, cols: usize) -> anyhow::Result<Matrix> {
    let len = element_count(rows, cols).map_err(GemmError::from)?;
    let data = (0..len).map(|_| rng.random_range(-1.0f32..1.0)).collect();
    Ok(Matrix::from_vec(rows, cols, data).map_err(GemmError::from)?)
}

fn generate(args: &Args) -> anyhow::Result<()> {
    let seed = args.seed.unwrap_or_else(|| rand::rng().random());
    info!(seed, rows = args.rows, inner = args.inner, cols = args.cols, "generating dataset");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let a = random_matrix(&mut rng, args.rows, args.inner).context("invalid shape for A")?;
    let b = random_matrix(&mut rng, args.inner, args.cols).context("invalid shape for B")?;
    let c = reference::matmul(&a, &b).map_err(GemmError::from)?;

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    for (name, m) in [("A.txt", &a), ("B.txt", &b), ("C.txt", &c)] {
        let path = args.out_dir.join(name);
        save_matrix(&path, m).with_context(|| format!("failed to write {}", path.display()))?;
    }
    println!("wrote A.txt, B.txt, C.txt to {} (seed {seed})", args.out_dir.display());
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = logging::init(&args.log_level, LogFormat::Compact) {
        eprintln!("warning: {e}");
    }
    if let Err(err) = generate(&args) {
        print_error(&err);
        std::process::exit(exit::for_error(&err));
    }
}
