// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! Capture of misbehaving passes.
//!
//! When a pass violates its contract the offending sandbox is preserved in
//! a numbered crash directory together with enough metadata to reproduce
//! the state, so the bug can be reported without rerunning the whole
//! reduction. The same numbered-directory scheme is reused for the
//! `also_interesting` captures.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{config::ReduceOptions, error::ReduceError, pass::PassState, sandbox::Sandbox};

pub const MAX_CRASH_DIRS: u32 = 10;
pub const MAX_EXTRA_DIRS: u32 = 25_000;

pub const CRASH_DIR_PREFIX: &str = "whittle_bug_";
pub const EXTRA_DIR_PREFIX: &str = "whittle_extra_";

/// Find the first unused numbered directory name under `base`, zero-padded
/// to as many digits as the cap needs. Returns `None` once the cap is
/// reached; at that point more directories would just be clutter.
pub fn next_numbered_dir(base: &Path, prefix: &str, max_number: u32) -> Option<PathBuf> {
    let digits = (max_number as f64).log10().round() as usize;
    for i in 0..=max_number {
        let dir = base.join(format!("{prefix}{i:0width$}", width = digits));
        if !dir.exists() {
            return Some(dir);
        }
    }
    None
}

pub struct BugReporter<'a> {
    opts: &'a ReduceOptions,
    /// Where crash directories are created; the working directory in a
    /// real run.
    base: PathBuf,
    test_script: PathBuf,
}

impl<'a> BugReporter<'a> {
    pub fn new(opts: &'a ReduceOptions, base: PathBuf, test_script: PathBuf) -> Self {
        BugReporter {
            opts,
            base,
            test_script,
        }
    }

    /// Preserve the offending sandbox and state in a crash directory.
    ///
    /// Under `die_on_pass_bug` this returns the bug as a fatal error;
    /// otherwise it logs (unless `silent_pass_bug`) and the reduction
    /// continues. The crash directory is written in either case.
    pub fn report(
        &self,
        pass_key: &str,
        sandbox: &Sandbox,
        state: &dyn PassState,
        problem: &str,
    ) -> Result<()> {
        if !self.opts.die_on_pass_bug && !self.opts.silent_pass_bug {
            warn!("{pass_key} has encountered a non fatal bug: {problem}");
        }

        let Some(crash_dir) = next_numbered_dir(&self.base, CRASH_DIR_PREFIX, MAX_CRASH_DIRS)
        else {
            return Ok(());
        };

        fs::create_dir(&crash_dir).with_context(|| {
            format!("failed to create crash directory `{}`", crash_dir.display())
        })?;
        sandbox.dump(&crash_dir, &self.test_script)?;
        self.write_info(&crash_dir, pass_key, state, problem)?;

        if self.opts.die_on_pass_bug {
            Err(ReduceError::PassBug {
                pass: pass_key.to_owned(),
                problem: problem.to_owned(),
                crash_dir,
            }
            .into())
        } else {
            debug!(
                "please consider tarring up `{}` and filing an issue so the bug can be fixed",
                crash_dir.display()
            );
            Ok(())
        }
    }

    fn write_info(
        &self,
        crash_dir: &Path,
        pass_key: &str,
        state: &dyn PassState,
        problem: &str,
    ) -> Result<()> {
        let path = crash_dir.join("PASS_BUG_INFO.TXT");
        let mut f = fs::File::create(&path)
            .with_context(|| format!("failed to create `{}`", path.display()))?;
        writeln!(f, "{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))?;
        writeln!(f, "{} {}", std::env::consts::OS, std::env::consts::ARCH)?;
        writeln!(f, "pass: {pass_key}")?;
        writeln!(f, "problem: {problem}")?;
        writeln!(f, "state: {state:?}")?;
        Ok(())
    }
}
