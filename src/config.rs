// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! Settings that steer the reduction driver.

use std::time::Duration;

/// The default per-attempt wall clock, in seconds.
pub const DEFAULT_TIMEOUT: u64 = 300;

/// The default attempt count after which a pass that keeps producing
/// meaningless variants is reported as stuck.
pub const DEFAULT_GIVE_UP_THRESHOLD: u64 = 50_000;

/// Options consumed by the driver. These are filled in from the CLI by
/// `ReduceArgs` and never change during a run, except for `print_diff`,
/// whose live value is owned by the runner so the `d` key can toggle it.
#[derive(Clone, Debug)]
pub struct ReduceOptions {
    /// Number of concurrently running variant workers.
    pub parallel_tests: usize,

    /// Wall-clock limit for one variant attempt.
    pub timeout: Duration,

    /// Keep every sandbox and the per-run temp root on disk.
    pub save_temps: bool,

    /// Disable cross-pass result caching.
    pub no_cache: bool,

    /// Disable the interactive `s`/`d` key handling.
    pub skip_key_off: bool,

    /// Suppress the warning log for non-fatal pass bugs. The crash
    /// directory is still written.
    pub silent_pass_bug: bool,

    /// Promote pass bugs to fatal errors.
    pub die_on_pass_bug: bool,

    /// Log a unified diff for every commit.
    pub print_diff: bool,

    /// Reject successful variants that shrink the file by more than this
    /// many bytes in one step.
    pub max_improvement: Option<u64>,

    /// Never conclude that a pass is stuck.
    pub no_give_up: bool,

    /// Preserve (but do not commit) variants whose test exits with this
    /// code.
    pub also_interesting: Option<i32>,

    /// Submission order past which a pass producing only meaningless
    /// variants is reported as stuck.
    pub give_up_threshold: u64,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        ReduceOptions {
            parallel_tests: 1,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT),
            save_temps: false,
            no_cache: false,
            skip_key_off: false,
            silent_pass_bug: false,
            die_on_pass_bug: false,
            print_diff: false,
            max_improvement: None,
            no_give_up: false,
            also_interesting: None,
            give_up_threshold: DEFAULT_GIVE_UP_THRESHOLD,
        }
    }
}
