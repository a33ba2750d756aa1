// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! Selection of the winning variant among completed workers.
//!
//! Workers finish in arbitrary order, but reduction trajectories must be
//! deterministic given a deterministic pass. The arbiter restores order by
//! scanning the submission ledger front to back: completed attempts are
//! judged in submission order, and the scan never decides anything past the
//! first attempt that is still pending. Once an attempt is accepted (or the
//! pass signals the end), `quit` latches and every later attempt is
//! cancelled, so the lowest submission order always wins.

use anyhow::{bail, Result};
use log::{debug, info};
use std::{fs, path::Path};

use crate::{
    bug::{self, BugReporter},
    config::ReduceOptions,
    pass::PassOutcome,
    pool::ProcessPool,
    variant::DriveOutcome,
};

/// The outcome of one ledger scan.
pub(crate) struct Verdict {
    /// Whether this scheduling burst is over.
    pub quit: bool,

    /// Ledger index of the accepted attempt, if any.
    pub winner: Option<usize>,
}

pub(crate) struct ResultArbiter<'a> {
    pub opts: &'a ReduceOptions,
    pub pass_key: &'a str,

    /// The canonical test case the variants are competing to replace.
    pub canonical: &'a Path,

    pub bugs: &'a BugReporter<'a>,

    /// Where `also_interesting` captures are created.
    pub extras_base: &'a Path,
}

impl ResultArbiter<'_> {
    pub fn scan(&mut self, pool: &mut ProcessPool) -> Result<Verdict> {
        pool.drain_ready();

        let mut quit = false;
        let mut winner = None;

        for index in 0..pool.attempts().len() {
            if pool.attempts()[index].settled() {
                continue;
            }

            if quit {
                pool.terminate(index);
                continue;
            }

            let Some(outcome) = pool.attempts()[index].outcome.clone() else {
                // First still-pending attempt: nothing past it can be
                // decided yet.
                break;
            };

            match outcome {
                DriveOutcome::TimedOut => {
                    debug!("test timed out");
                    pool.terminate(index);
                }

                DriveOutcome::Cancelled => {
                    pool.release(index);
                }

                DriveOutcome::Failed(msg) => {
                    bail!("variant worker failed: {msg}");
                }

                DriveOutcome::Finished(result) => {
                    let order = pool.attempts()[index].order;

                    if result.success() {
                        if self
                            .opts
                            .max_improvement
                            .is_some_and(|max| result.size_improvement() > max as i64)
                        {
                            debug!("too large improvement: {} B", result.size_improvement());
                            pool.release(index);
                        } else if self.variant_is_noop(pool, index)? {
                            let attempt = &pool.attempts()[index];
                            if let Some(sandbox) = attempt.sandbox.as_ref() {
                                self.bugs.report(
                                    self.pass_key,
                                    sandbox,
                                    &*attempt.state,
                                    "pass failed to modify the variant",
                                )?;
                            }
                            pool.release(index);
                        } else {
                            quit = true;
                            winner = Some(index);
                        }
                    } else if result.outcome == PassOutcome::Ok {
                        // The candidate was written but the test rejected it.
                        if self.opts.also_interesting.is_some()
                            && self.opts.also_interesting == result.exit_code
                        {
                            self.preserve_extra(pool, index)?;
                        }
                        pool.release(index);
                    } else if result.outcome == PassOutcome::Stop {
                        quit = true;
                        pool.release(index);
                    } else if result.outcome == PassOutcome::Error {
                        let attempt = &pool.attempts()[index];
                        if let Some(sandbox) = attempt.sandbox.as_ref() {
                            self.bugs
                                .report(self.pass_key, sandbox, &*attempt.state, "pass error")?;
                        }
                        quit = true;
                        pool.release(index);
                    } else {
                        // PassOutcome::Invalid: the pass wrote nothing for
                        // this state. Tolerated up to the give-up threshold.
                        if !self.opts.no_give_up && order > self.opts.give_up_threshold {
                            let attempt = &pool.attempts()[index];
                            if let Some(sandbox) = attempt.sandbox.as_ref() {
                                self.bugs.report(
                                    self.pass_key,
                                    sandbox,
                                    &*attempt.state,
                                    "pass got stuck",
                                )?;
                            }
                            quit = true;
                        }
                        pool.release(index);
                    }
                }
            }
        }

        Ok(Verdict { quit, winner })
    }

    fn variant_is_noop(&self, pool: &ProcessPool, index: usize) -> Result<bool> {
        match pool.attempts()[index].variant_path() {
            Some(path) => files_equal(self.canonical, &path),
            None => Ok(false),
        }
    }

    /// Move a rejected-but-interesting variant into a numbered extra
    /// directory for the user to look at later.
    fn preserve_extra(&self, pool: &ProcessPool, index: usize) -> Result<()> {
        let Some(path) = pool.attempts()[index].variant_path() else {
            return Ok(());
        };
        let Some(extra_dir) =
            bug::next_numbered_dir(self.extras_base, bug::EXTRA_DIR_PREFIX, bug::MAX_EXTRA_DIRS)
        else {
            return Ok(());
        };

        fs::create_dir(&extra_dir)?;
        // A rename would not survive crossing out of the temp filesystem.
        let name = path.file_name().unwrap_or_else(|| "variant".as_ref());
        fs::copy(&path, extra_dir.join(name))?;
        let _ = fs::remove_file(&path);

        info!(
            "created extra directory `{}` for you to look at later",
            extra_dir.display()
        );
        Ok(())
    }
}

fn files_equal(a: &Path, b: &Path) -> Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}
