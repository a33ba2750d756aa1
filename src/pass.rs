// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! The contract between the driver and its reduction strategies.
//!
//! A pass enumerates candidate edits of a test case through an opaque state
//! value. The driver only ever moves a state between the three advance
//! operations and the variant workers; it never looks inside. Because
//! workers are separate OS processes, a state must additionally survive a
//! JSON round trip, which each pass implements for its own concrete type.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{any::Any, fmt, path::Path};

use crate::variant::ProcessNotifier;

/// What a single `transform` attempt produced.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// A candidate was written; the interestingness test decides its fate.
    Ok,

    /// This state and every later one is exhausted; the driver should end
    /// the pass for this test case.
    Stop,

    /// The pass hit an internal error.
    Error,

    /// The pass had nothing meaningful to write for this state.
    Invalid,
}

/// An opaque enumeration cursor owned by a single pass.
///
/// The driver holds these only as snapshots: one per in-flight attempt, so
/// that a bug report can record exactly which state misbehaved, and one
/// "current" value that the pass advances. The blanket impl below covers
/// any plain data type, so passes just derive `Clone`, `Debug`, `Serialize`
/// and get the whole contract for free.
pub trait PassState: Any + Send + fmt::Debug {
    fn clone_box(&self) -> Box<dyn PassState>;

    fn as_any(&self) -> &dyn Any;

    /// Serialize the state for transport to a variant worker process.
    fn save(&self) -> Result<serde_json::Value>;
}

impl<T> PassState for T
where
    T: Any + Send + fmt::Debug + Clone + Serialize,
{
    fn clone_box(&self) -> Box<dyn PassState> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn save(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl Clone for Box<dyn PassState> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Recover a pass's concrete state type from the opaque box.
///
/// Only the originating pass may call this; the driver never does.
pub fn downcast_state<T: Clone + 'static>(state: &dyn PassState) -> Result<T> {
    state
        .as_any()
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| anyhow!("pass state has an unexpected type"))
}

/// A named reduction strategy with a sub-mode argument.
pub trait Pass: Send + Sync {
    /// The strategy name, e.g. `balanced`.
    fn name(&self) -> &str;

    /// The sub-mode argument, e.g. `parens-inside`.
    fn arg(&self) -> &str;

    /// The identity used for logging and cache keys. It includes the
    /// sub-mode so that, say, `parens` and `parens-only` never share
    /// cached results.
    fn key(&self) -> String {
        if self.arg().is_empty() {
            self.name().to_owned()
        } else {
            format!("{}::{}", self.name(), self.arg())
        }
    }

    /// Whether the external tools this pass needs are available.
    fn check_prerequisites(&self) -> bool {
        true
    }

    /// Produce the initial state for a fresh pass over a test case, or
    /// `None` if there is nothing to try.
    fn new(&self, test_case: &Path) -> Result<Option<Box<dyn PassState>>>;

    /// Produce the next state after a failed attempt.
    fn advance(
        &self,
        test_case: &Path,
        state: Box<dyn PassState>,
    ) -> Result<Option<Box<dyn PassState>>>;

    /// Produce the next state after a successful, committed attempt. The
    /// test case has shrunk at this point; a pass whose edit leaves its
    /// target in place must move past it here.
    fn advance_on_success(
        &self,
        test_case: &Path,
        state: Box<dyn PassState>,
    ) -> Result<Option<Box<dyn PassState>>>;

    /// Mutate `test_case` in place, producing a candidate variant.
    fn transform(
        &self,
        test_case: &Path,
        state: Box<dyn PassState>,
        notifier: &mut ProcessNotifier,
    ) -> Result<(PassOutcome, Box<dyn PassState>)>;

    /// Restore a state previously produced by [`PassState::save`].
    fn load_state(&self, value: serde_json::Value) -> Result<Box<dyn PassState>>;
}
