// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! The user-facing error taxonomy.
//!
//! Everything else in the crate propagates [`anyhow::Error`]; the variants
//! here are the conditions that abort a reduction and need to stay
//! recognizable all the way up to `main`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReduceError {
    /// A supplied input file is unreadable or unwritable.
    #[error("test case `{}` is not usable: {reason}", .path.display())]
    InvalidTestCase { path: PathBuf, reason: String },

    /// The interestingness test is missing or not executable.
    #[error("interestingness test `{}` does not exist or is not executable", .0.display())]
    InvalidInterestingnessTest(PathBuf),

    /// The interestingness test rejects the unmodified inputs, so there is
    /// nothing to preserve while reducing.
    #[error("the interestingness test rejects the initial test cases (exit code {exit_code})")]
    InsaneTestCase { exit_code: i32 },

    /// Every supplied input is empty.
    #[error("all test cases are empty")]
    ZeroSize,

    /// A pass violated its contract and `die_on_pass_bug` is set.
    #[error("pass `{pass}` has a bug: {problem} (details preserved in `{}`)", .crash_dir.display())]
    PassBug {
        pass: String,
        problem: String,
        crash_dir: PathBuf,
    },
}
