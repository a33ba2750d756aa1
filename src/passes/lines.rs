// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! Removal of individual lines.
//!
//! The state is the index of the line to try deleting next. After a
//! committed deletion the following lines shift up, so the index stays
//! put; after a rejection it moves on.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::{
    pass::{downcast_state, Pass, PassOutcome, PassState},
    variant::ProcessNotifier,
};

#[derive(Debug)]
pub struct LinesPass;

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct LinesState {
    index: usize,
}

impl Pass for LinesPass {
    fn name(&self) -> &str {
        "lines"
    }

    fn arg(&self) -> &str {
        ""
    }

    fn new(&self, _test_case: &Path) -> Result<Option<Box<dyn PassState>>> {
        Ok(Some(Box::new(LinesState { index: 0 })))
    }

    fn advance(
        &self,
        _test_case: &Path,
        state: Box<dyn PassState>,
    ) -> Result<Option<Box<dyn PassState>>> {
        let state: LinesState = downcast_state(&*state)?;
        Ok(Some(Box::new(LinesState {
            index: state.index + 1,
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
        _notifier: &mut ProcessNotifier,
    ) -> Result<(PassOutcome, Box<dyn PassState>)> {
        let current: LinesState = downcast_state(&*state)?;
        let data = fs::read(test_case)?;

        let lines: Vec<&[u8]> = data.split_inclusive(|&b| b == b'\n').collect();
        if current.index >= lines.len() {
            return Ok((PassOutcome::Stop, state));
        }

        let mut edited = Vec::with_capacity(data.len());
        for (i, line) in lines.iter().enumerate() {
            if i != current.index {
                edited.extend_from_slice(line);
            }
        }

        fs::write(test_case, edited)?;
        Ok((PassOutcome::Ok, state))
    }

    fn load_state(&self, value: serde_json::Value) -> Result<Box<dyn PassState>> {
        Ok(Box::new(serde_json::from_value::<LinesState>(value)?))
    }
}
