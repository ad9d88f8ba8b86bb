//! Exit codes for the tp-core CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing:
//! - 0: success
//! - 1: runtime error (storage, transport, I/O)
//! - 2: usage or configuration error

use tp_common::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Command completed.
    Success = 0,

    /// Storage, transport or I/O failure while running the command.
    RuntimeError = 1,

    /// Invalid arguments or configuration.
    UsageError = 2,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    /// Get the code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Success => "OK",
            ExitCode::RuntimeError => "ERR_RUNTIME",
            ExitCode::UsageError => "ERR_USAGE",
        }
    }

    /// Exit code for a pipeline error.
    pub fn for_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Config | ErrorCategory::Input => ExitCode::UsageError,
            _ => ExitCode::RuntimeError,
        }
    }
}
