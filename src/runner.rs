// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! The reduction driver.
//!
//! The runner owns the canonical test cases and everything the individual
//! attempts must not touch: it validates the inputs once, runs each pass
//! over each test case (smallest first), keeps the pool fed with sandboxed
//! attempts, and commits whichever variant the arbiter accepts. The
//! canonical files are only ever overwritten with bytes that a successful
//! interestingness-test run has vouched for.

use anyhow::{bail, Context, Result};
use clap::Args;
use log::{debug, info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    arbiter::ResultArbiter,
    bug::BugReporter,
    cache::PassCache,
    config::{ReduceOptions, DEFAULT_GIVE_UP_THRESHOLD, DEFAULT_TIMEOUT},
    error::ReduceError,
    pass::{Pass, PassState},
    passes,
    pool::ProcessPool,
    readkey::KeyLogger,
    sandbox::{Sandbox, TEMP_PREFIX},
    stats::PassStatistics,
    variant::{VariantJob, VariantResult},
};

/// Reduce test cases while keeping the interestingness test passing.
#[derive(Args, Debug)]
pub struct ReduceArgs {
    /// The interestingness test: an executable that exits 0 iff its
    /// arguments are still interesting.
    pub test_script: PathBuf,

    /// The files to reduce.
    #[arg(required = true)]
    pub test_cases: Vec<PathBuf>,

    /// Number of parallel variant workers (default: one per CPU).
    #[arg(long, short = 'n')]
    pub parallel_tests: Option<usize>,

    /// Wall-clock limit for one variant attempt, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT)]
    pub timeout: u64,

    /// Comma-separated pass schedule, e.g. `lines,balanced:parens-only`.
    #[arg(long)]
    pub passes: Option<String>,

    /// Pass `--std=<std>` to clang_delta.
    #[arg(long)]
    pub clang_delta_std: Option<String>,

    /// Keep all sandboxes and the per-run temp roots on disk.
    #[arg(long)]
    pub save_temps: bool,

    /// Disable cross-pass result caching.
    #[arg(long)]
    pub no_cache: bool,

    /// Disable the interactive `s` (skip pass) and `d` (toggle diff) keys.
    #[arg(long)]
    pub skip_key_off: bool,

    /// Do not log non-fatal pass bugs.
    #[arg(long)]
    pub silent_pass_bug: bool,

    /// Treat any pass bug as fatal.
    #[arg(long)]
    pub die_on_pass_bug: bool,

    /// Log a unified diff for every commit.
    #[arg(long)]
    pub print_diff: bool,

    /// Reject variants that shrink a file by more than this many bytes in
    /// one step.
    #[arg(long)]
    pub max_improvement: Option<u64>,

    /// Never conclude that a pass is stuck.
    #[arg(long)]
    pub no_give_up: bool,

    /// Preserve (but do not commit) variants whose test exits with this
    /// code.
    #[arg(long)]
    pub also_interesting: Option<i32>,

    /// Attempt count after which a non-advancing pass is reported as
    /// stuck.
    #[arg(long, default_value_t = DEFAULT_GIVE_UP_THRESHOLD)]
    pub give_up_threshold: u64,
}

impl ReduceArgs {
    pub fn exec(self) -> Result<()> {
        let opts = ReduceOptions {
            parallel_tests: self.parallel_tests.unwrap_or_else(num_cpus::get).max(1),
            timeout: Duration::from_secs(self.timeout.max(1)),
            save_temps: self.save_temps,
            no_cache: self.no_cache,
            skip_key_off: self.skip_key_off,
            silent_pass_bug: self.silent_pass_bug,
            die_on_pass_bug: self.die_on_pass_bug,
            print_diff: self.print_diff,
            max_improvement: self.max_improvement,
            no_give_up: self.no_give_up,
            also_interesting: self.also_interesting,
            give_up_threshold: self.give_up_threshold,
        };

        let schedule = match &self.passes {
            Some(spec) => passes::parse_schedule(spec, self.clang_delta_std.as_deref())?,
            None => passes::default_schedule()?,
        };

        let mut runner = PassRunner::new(opts, &self.test_script, &self.test_cases)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the async runtime")?;
        runtime.block_on(runner.run(&schedule))
    }
}

pub struct PassRunner {
    opts: ReduceOptions,
    test_script: PathBuf,
    test_cases: Vec<PathBuf>,
    self_path: PathBuf,
    work_dir: PathBuf,
    orig_total_size: u64,
    cache: PassCache,
    stats: PassStatistics,
    print_diff: bool,
}

impl PassRunner {
    pub fn new(opts: ReduceOptions, test_script: &Path, test_cases: &[PathBuf]) -> Result<Self> {
        let test_script = fs::canonicalize(test_script)
            .map_err(|_| ReduceError::InvalidInterestingnessTest(test_script.to_owned()))?;
        if !is_executable(&test_script) {
            return Err(ReduceError::InvalidInterestingnessTest(test_script).into());
        }

        let mut cases = Vec::new();
        for case in test_cases {
            // The driver rewrites these files in place, so probe for
            // read-write access up front.
            fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(case)
                .map_err(|e| ReduceError::InvalidTestCase {
                    path: case.clone(),
                    reason: e.to_string(),
                })?;
            cases.push(fs::canonicalize(case)?);
        }
        cases.sort();
        cases.dedup();

        let orig_total_size = total_file_size(&cases)?;
        let self_path =
            std::env::current_exe().context("cannot obtain the path to the current executable")?;
        let work_dir = std::env::current_dir()?;
        let print_diff = opts.print_diff;

        Ok(PassRunner {
            opts,
            test_script,
            test_cases: cases,
            self_path,
            work_dir,
            orig_total_size,
            cache: PassCache::new(),
            stats: PassStatistics::new(),
            print_diff,
        })
    }

    pub async fn run(&mut self, schedule: &[Box<dyn Pass>]) -> Result<()> {
        if self.orig_total_size == 0 {
            return Err(ReduceError::ZeroSize.into());
        }

        self.check_sanity()?;
        self.backup_test_cases()?;

        let usable: Vec<&dyn Pass> = schedule
            .iter()
            .map(AsRef::as_ref)
            .filter(|pass| {
                let ok = pass.check_prerequisites();
                if !ok {
                    warn!("pass `{}` is missing its external tools; skipping", pass.key());
                }
                ok
            })
            .collect();
        if usable.is_empty() {
            bail!("no usable passes in the schedule");
        }

        // Keep running the schedule until a full round stops shrinking.
        loop {
            let before = total_file_size(&self.test_cases)?;
            for pass in &usable {
                self.run_pass(*pass).await?;
            }
            let after = total_file_size(&self.test_cases)?;
            if after >= before {
                break;
            }
            debug!("a pass round shrank the inputs from {before} to {after} bytes; going again");
        }

        self.stats.log_summary();
        for case in &self.test_cases {
            info!(
                "reduced `{}` to {} bytes",
                case.display(),
                fs::metadata(case)?.len()
            );
        }
        Ok(())
    }

    /// Run the interestingness test once against pristine copies of the
    /// inputs. If it rejects them, reducing would only preserve a property
    /// that never held.
    fn check_sanity(&self) -> Result<()> {
        debug!("performing sanity check");

        let root = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .context("failed to create the sanity-check directory")?;

        let Some((first, rest)) = self.test_cases.split_first() else {
            return Ok(());
        };
        let sandbox = Sandbox::new(root.path(), first, rest)?;

        let mut cmd = std::process::Command::new(&self.test_script);
        cmd.arg(sandbox.test_case_path());
        for aux in sandbox.aux_names() {
            cmd.arg(sandbox.path().join(aux));
        }
        cmd.current_dir(sandbox.path())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let status = cmd
            .status()
            .with_context(|| format!("failed to run `{}`", self.test_script.display()))?;

        if status.success() {
            debug!("sanity check successful");
            Ok(())
        } else {
            Err(ReduceError::InsaneTestCase {
                exit_code: status.code().unwrap_or(-1),
            }
            .into())
        }
    }

    /// Keep a pristine copy of each input next to it, written only once.
    fn backup_test_cases(&self) -> Result<()> {
        for case in &self.test_cases {
            let orig = case.with_extension("orig");
            if !orig.exists() {
                fs::copy(case, &orig)
                    .with_context(|| format!("failed to back up `{}`", case.display()))?;
            }
        }
        Ok(())
    }

    async fn run_pass(&mut self, pass: &dyn Pass) -> Result<()> {
        info!("===< {} >===", pass.key());

        if total_file_size(&self.test_cases)? == 0 {
            return Err(ReduceError::ZeroSize.into());
        }

        let root = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .context("failed to create the per-pass temp root")?;
        debug!("pass root folder: {}", root.path().display());

        let mut keys = if self.opts.skip_key_off {
            None
        } else {
            Some(KeyLogger::new())
        };

        for test_case in sorted_by_size(&self.test_cases)? {
            if fs::metadata(&test_case)?.len() == 0 {
                continue;
            }

            let before = if self.opts.no_cache {
                None
            } else {
                Some(fs::read(&test_case)?)
            };

            if let Some(before) = &before {
                if let Some(after) = self.cache.lookup(&pass.key(), before) {
                    fs::write(&test_case, after)?;
                    info!("cache hit for {}", test_case.display());
                    continue;
                }
            }

            let mut state = pass.new(&test_case)?;
            let mut skip = false;
            let mut next_order = 1;

            while state.is_some() && !skip {
                if let Some(keys) = keys.as_mut() {
                    match keys.pressed_key() {
                        Some('s') => {
                            skip = true;
                            info!("****** skipping the rest of this pass ******");
                        }
                        Some('d') => {
                            self.print_diff = !self.print_diff;
                            info!("****** toggle print diff ******");
                        }
                        _ => {}
                    }
                }

                let winner = self
                    .run_parallel_attempts(pass, root.path(), &test_case, &mut state, &mut next_order)
                    .await?;

                match winner {
                    Some(winner) => self.process_result(pass, &test_case, winner, &mut state)?,
                    None => {
                        self.stats.update(&pass.key(), false);
                        break;
                    }
                }
            }

            if let Some(before) = before {
                let after = fs::read(&test_case)?;
                self.cache.insert(&pass.key(), &before, after);
            }
        }

        if self.opts.save_temps {
            let _ = root.keep();
        }
        Ok(())
    }

    /// One scheduling burst: feed the pool from the pass's state stream
    /// until the arbiter ends it, and hand back the winner if there is
    /// one. `state` is left at the snapshot the next burst should resume
    /// from.
    async fn run_parallel_attempts(
        &mut self,
        pass: &dyn Pass,
        root: &Path,
        test_case: &Path,
        state: &mut Option<Box<dyn PassState>>,
        next_order: &mut u64,
    ) -> Result<Option<(Sandbox, VariantResult)>> {
        let mut pool = ProcessPool::new(&self.opts, self.self_path.clone(), *next_order);
        let aux: Vec<PathBuf> = self
            .test_cases
            .iter()
            .filter(|p| p.as_path() != test_case)
            .cloned()
            .collect();

        let pass_key = pass.key();
        let bugs = BugReporter::new(&self.opts, self.work_dir.clone(), self.test_script.clone());

        let winner_index = 'burst: loop {
            let verdict = self.arbitrate(&pass_key, test_case, &bugs, &mut pool)?;
            if verdict.quit {
                break verdict.winner;
            }

            // Submission is gated on the window, not just on running
            // workers: completed attempts stuck behind an earlier pending
            // one still occupy their slot.
            if pool.is_full() {
                pool.wait_one().await?;
                continue;
            }

            let Some(current) = state.take() else {
                // The state stream is exhausted; wait out the in-flight
                // attempts.
                loop {
                    if !pool.has_running() {
                        let verdict = self.arbitrate(&pass_key, test_case, &bugs, &mut pool)?;
                        break 'burst verdict.winner;
                    }
                    pool.wait_one().await?;
                    let verdict = self.arbitrate(&pass_key, test_case, &bugs, &mut pool)?;
                    if verdict.quit {
                        break 'burst verdict.winner;
                    }
                }
            };

            let sandbox = Sandbox::new(root, test_case, &aux)?;
            let job = VariantJob {
                pass_name: pass.name().to_owned(),
                pass_arg: pass.arg().to_owned(),
                state: current.save()?,
                order: pool.next_order(),
                test_case: sandbox.test_case_name().to_owned(),
                aux_files: sandbox.aux_names().to_vec(),
                test_script: self.test_script.clone(),
                sandbox: sandbox.path().to_path_buf(),
            };
            pool.submit(job, current.clone_box(), sandbox);

            *state = pass.advance(test_case, current)?;
        };

        *next_order = pool.next_order();
        let winner = winner_index.and_then(|index| pool.take_winner(index));
        pool.stop_all();
        Ok(winner)
    }

    fn arbitrate(
        &self,
        pass_key: &str,
        test_case: &Path,
        bugs: &BugReporter,
        pool: &mut ProcessPool,
    ) -> Result<crate::arbiter::Verdict> {
        let mut arbiter = ResultArbiter {
            opts: &self.opts,
            pass_key,
            canonical: test_case,
            bugs,
            extras_base: &self.work_dir,
        };
        arbiter.scan(pool)
    }

    /// Commit an accepted variant: overwrite the canonical file with the
    /// verified bytes and move the pass to its success-side state.
    fn process_result(
        &mut self,
        pass: &dyn Pass,
        test_case: &Path,
        (sandbox, result): (Sandbox, VariantResult),
        state: &mut Option<Box<dyn PassState>>,
    ) -> Result<()> {
        debug!("processing an accepted variant");

        let variant = sandbox.test_case_path();
        if self.print_diff {
            info!("{}", diff_files(test_case, &variant)?);
        }

        fs::copy(&variant, test_case)
            .with_context(|| format!("failed to commit the variant to `{}`", test_case.display()))?;
        sandbox.release(self.opts.save_temps);

        let committed_state = pass.load_state(result.state.clone())?;
        *state = pass.advance_on_success(test_case, committed_state)?;
        self.stats.update(&pass.key(), true);

        let total = total_file_size(&self.test_cases)?;
        let pct = 100.0 - (total as f64 * 100.0 / self.orig_total_size as f64);
        info!("({:.1}%, {} bytes)", pct, total);
        Ok(())
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|md| md.is_file() && md.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn total_file_size(files: &[PathBuf]) -> Result<u64> {
    let mut total = 0;
    for f in files {
        total += fs::metadata(f)
            .with_context(|| format!("failed to probe `{}`", f.display()))?
            .len();
    }
    Ok(total)
}

/// Test cases ordered smallest-first, to amortise the cheap wins early.
fn sorted_by_size(files: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut sized = Vec::with_capacity(files.len());
    for f in files {
        sized.push((fs::metadata(f)?.len(), f.clone()));
    }
    sized.sort_by_key(|entry| entry.0);
    Ok(sized.into_iter().map(|entry| entry.1).collect())
}

fn diff_files(original: &Path, changed: &Path) -> Result<String> {
    let old = String::from_utf8_lossy(&fs::read(original)?).into_owned();
    let new = String::from_utf8_lossy(&fs::read(changed)?).into_owned();

    Ok(similar::TextDiff::from_lines(&old, &new)
        .unified_diff()
        .header(
            &original.display().to_string(),
            &changed.display().to_string(),
        )
        .to_string())
}
