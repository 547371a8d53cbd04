//! Exit codes following sysexits.h conventions.
//!
//! These codes let scripts tell "no match" apart from a broken input or a
//! network failure.

use encounter_core::MatchError;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage or configuration error.
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Data error: no acceptable match, or a reference check found problems.
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Service unavailable (image download).
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const NETWORK_ERROR: i32 = 69;

/// I/O error (cannot write output file).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
#[derive(Debug)]
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Context messages first, then the core error kind.
        let code = if message.contains("Failed to read") || message.contains("Failed to load") {
            INPUT_ERROR
        } else if message.contains("No match found") || message.contains("reference check failed") {
            DATA_ERROR
        } else if message.contains("Failed to write") || message.contains("Failed to save") {
            IO_ERROR
        } else if message.contains("Invalid config") {
            USAGE_ERROR
        } else {
            err.chain()
                .find_map(|cause| cause.downcast_ref::<MatchError>())
                .map_or(GENERAL_ERROR, classify)
        };

        Self {
            code,
            message: Some(message),
        }
    }
}

fn classify(err: &MatchError) -> i32 {
    match err {
        MatchError::InvalidConfig(_) => USAGE_ERROR,
        MatchError::ImageNotFound(_) | MatchError::ImageDecode { .. } | MatchError::Database(_) => INPUT_ERROR,
        MatchError::Fetch(_) => NETWORK_ERROR,
        #[cfg(feature = "network")]
        MatchError::HttpError(_) => NETWORK_ERROR,
        MatchError::ImageEncode { .. } | MatchError::Io(_) => IO_ERROR,
        _ => GENERAL_ERROR,
    }
}
