// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! The `clang_delta` external-tool pass.
//!
//! Each sub-mode names one of clang_delta's source-to-source
//! transformations (e.g. `remove-unused-function`); the state is the
//! tool's 1-based transformation counter. The tool prints the candidate to
//! stdout on success, exits 1 or 255 when the counter runs past the last
//! opportunity, and anything else means it fell over.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::{
    pass::{downcast_state, Pass, PassOutcome, PassState},
    variant::ProcessNotifier,
};

const CLANG_DELTA: &str = "clang_delta";

#[derive(Debug)]
pub struct ClangPass {
    arg: String,
    std: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ClangState {
    counter: u64,
}

impl ClangPass {
    pub fn new(arg: &str) -> Self {
        ClangPass {
            arg: arg.to_owned(),
            std: None,
        }
    }

    /// Select the C++ standard clang_delta parses with.
    pub fn with_std(mut self, std: &str) -> Self {
        self.std = Some(std.to_owned());
        self
    }
}

impl Pass for ClangPass {
    fn name(&self) -> &str {
        "clang"
    }

    fn arg(&self) -> &str {
        &self.arg
    }

    fn check_prerequisites(&self) -> bool {
        which::which(CLANG_DELTA).is_ok()
    }

    fn new(&self, _test_case: &Path) -> Result<Option<Box<dyn PassState>>> {
        Ok(Some(Box::new(ClangState { counter: 1 })))
    }

    fn advance(
        &self,
        _test_case: &Path,
        state: Box<dyn PassState>,
    ) -> Result<Option<Box<dyn PassState>>> {
        let state: ClangState = downcast_state(&*state)?;
        Ok(Some(Box::new(ClangState {
            counter: state.counter + 1,
        })))
    }

    fn advance_on_success(
        &self,
        _test_case: &Path,
        state: Box<dyn PassState>,
    ) -> Result<Option<Box<dyn PassState>>> {
        Ok(Some(state))
    }

    fn transform(
        &self,
        test_case: &Path,
        state: Box<dyn PassState>,
        notifier: &mut ProcessNotifier,
    ) -> Result<(PassOutcome, Box<dyn PassState>)> {
        let current: ClangState = downcast_state(&*state)?;

        let mut cmd = std::process::Command::new(CLANG_DELTA);
        cmd.arg(format!("--transformation={}", self.arg))
            .arg(format!("--counter={}", current.counter));
        if let Some(std) = &self.std {
            cmd.arg(format!("--std={std}"));
        }
        cmd.arg(test_case);

        debug!("running {cmd:?}");
        let output = notifier.run_process(&mut cmd)?;

        match output.status.code() {
            Some(0) => {
                // Write the candidate next to the test case and move it
                // into place, so a crash mid-write can never leave a
                // half-formed variant behind.
                let dir = test_case.parent().unwrap_or_else(|| Path::new("."));
                let tmp = NamedTempFile::new_in(dir)
                    .with_context(|| format!("failed to create a temp file in `{}`", dir.display()))?;
                std::fs::write(tmp.path(), &output.stdout)?;
                tmp.persist(test_case)
                    .with_context(|| format!("failed to replace `{}`", test_case.display()))?;
                Ok((PassOutcome::Ok, state))
            }
            Some(1) | Some(255) => Ok((PassOutcome::Stop, state)),
            _ => Ok((PassOutcome::Error, state)),
        }
    }

    fn load_state(&self, value: serde_json::Value) -> Result<Box<dyn PassState>> {
        Ok(Box::new(serde_json::from_value::<ClangState>(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_counter_starts_at_one_and_holds_on_success() {
        let pass = ClangPass::new("remove-unused-function");
        let path = Path::new("unused.c");

        let state = pass.new(path).unwrap().unwrap();
        let state = pass.advance(path, state).unwrap().unwrap();
        let state = pass.advance(path, state).unwrap().unwrap();
        let state = pass.advance_on_success(path, state).unwrap().unwrap();

        let state: ClangState = downcast_state(&*state).unwrap();
        assert_eq!(state.counter, 3);
    }

    #[test]
    fn the_sub_mode_is_part_of_the_identity() {
        let pass = ClangPass::new("reduce-class-template-param");
        assert_eq!(pass.key(), "clang::reduce-class-template-param");
    }
}
