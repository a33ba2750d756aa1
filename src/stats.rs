// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! Per-pass bookkeeping reported at the end of a reduction.

use log::info;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Default)]
pub struct PassCounters {
    /// Committed variants produced by this pass.
    pub worked: u32,

    /// Times this pass ran to exhaustion without finding anything.
    pub failed: u32,
}

#[derive(Debug, Default)]
pub struct PassStatistics {
    entries: BTreeMap<String, PassCounters>,
}

impl PassStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, pass_key: &str, success: bool) {
        let counters = self.entries.entry(pass_key.to_owned()).or_default();
        if success {
            counters.worked += 1;
        } else {
            counters.failed += 1;
        }
    }

    pub fn log_summary(&self) {
        if self.entries.is_empty() {
            return;
        }

        info!("pass statistics:");
        for (key, counters) in &self.entries {
            info!(
                "  {}: {} worked, {} failed",
                key, counters.worked, counters.failed
            );
        }
    }
}
