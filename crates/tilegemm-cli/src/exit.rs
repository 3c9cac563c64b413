// Exit codes for scripted triage
use tilegemm_common::{ErrorKind, GemmError};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_IO: i32 = 2;
pub const EXIT_SHAPE: i32 = 3;
pub const EXIT_DEVICE: i32 = 4;
pub const EXIT_BUILD: i32 = 5;
pub const EXIT_DISPATCH: i32 = 6;
pub const EXIT_CONFIG: i32 = 7;
pub const EXIT_MISMATCH: i32 = 9;

pub fn for_kind(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Io => EXIT_IO,
        ErrorKind::Shape => EXIT_SHAPE,
        ErrorKind::Device => EXIT_DEVICE,
        ErrorKind::Build => EXIT_BUILD,
        ErrorKind::Dispatch => EXIT_DISPATCH,
        ErrorKind::Config => EXIT_CONFIG,
    }
}

/// Exit code for an error from [`crate::run`]; errors without a
/// [`GemmError`] in their chain are generic failures.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<GemmError>())
        .map_or(EXIT_GENERIC_FAIL, |e| for_kind(e.kind()))
}
