//! `tilegemm`: multiply two matrix files on a device and verify the product.

use clap::Parser;
use tilegemm_cli::{Args, exit, logging, print_error, run};
use tracing::debug;

fn main() {
    let args = Args::parse();
    if let Err(e) = logging::init(&args.log_level, args.log_format) {
        eprintln!("warning: {e}");
    }

    let code = match run(&args) {
        Ok(outcome) => {
            debug!(backend = %outcome.backend, passed = outcome.passed(), "done");
            outcome.exit_code(args.strict)
        }
        Err(err) => {
            print_error(&err);
            exit::for_error(&err)
        }
    };
    std::process::exit(code);
}
