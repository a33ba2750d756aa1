// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! Variant workers.
//!
//! - Each attempt runs in a subprocess so that a crashing pass or a runaway
//!   interestingness test can be killed without taking the driver down
//! - The worker is a re-execution of this binary with a hidden subcommand
//! - The job description travels to the worker over stdin as one JSON
//!   document; results and PID attributions come back as prefixed one-line
//!   stdout records

use anyhow::{anyhow, ensure, Context, Result};
use clap::Args;
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
    sync::{mpsc, oneshot},
};

use crate::{
    pass::PassOutcome,
    passes,
};

/// Prefix marking protocol records on a worker's stdout.
pub const RECORD_PREFIX: &str = "whittle:";

/// Everything a worker needs to run one attempt. File names are basenames
/// resolved against `sandbox`.
#[derive(Debug, Deserialize, Serialize)]
pub struct VariantJob {
    pub pass_name: String,
    pub pass_arg: String,
    pub state: serde_json::Value,
    pub order: u64,
    pub test_case: String,
    pub aux_files: Vec<String>,
    pub test_script: PathBuf,
    pub sandbox: PathBuf,
}

/// What a worker reports back for one attempt.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VariantResult {
    pub outcome: PassOutcome,

    /// Exit code of the interestingness test; `None` when the transform
    /// did not produce a candidate to test.
    pub exit_code: Option<i32>,

    /// The pass state as the transform left it.
    pub state: serde_json::Value,

    pub base_size: u64,
    pub final_size: u64,
}

impl VariantResult {
    /// A candidate was written and the interestingness test accepted it.
    pub fn success(&self) -> bool {
        self.outcome == PassOutcome::Ok && self.exit_code == Some(0)
    }

    pub fn size_improvement(&self) -> i64 {
        self.base_size as i64 - self.final_size as i64
    }
}

/// The PID-reporting channel handed to a pass's `transform`.
///
/// The interestingness test and any external tool a pass launches are two
/// process levels below the driver. Reporting their PIDs as stdout records
/// lets the driver SIGTERM the right grandchild when it cancels this
/// attempt.
pub struct ProcessNotifier {
    order: u64,
    enabled: bool,
}

impl ProcessNotifier {
    pub fn new(order: u64) -> Self {
        ProcessNotifier {
            order,
            enabled: true,
        }
    }

    /// A notifier that swallows reports, for driving passes outside a
    /// worker process.
    pub fn disabled() -> Self {
        ProcessNotifier {
            order: 0,
            enabled: false,
        }
    }

    pub fn notify(&self, pid: u32) {
        if self.enabled {
            println!("{RECORD_PREFIX}pid {} {}", self.order, pid);
        }
    }

    /// Run an external tool on behalf of a pass, reporting its PID and
    /// capturing its stdout.
    pub fn run_process(&self, cmd: &mut std::process::Command) -> Result<std::process::Output> {
        let child = cmd
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run external tool {cmd:?}"))?;
        self.notify(child.id());
        Ok(child.wait_with_output()?)
    }
}

// ---------------------------------------------------------------------------
// Worker side. This code runs in the subprocess and is fully synchronous.

/// Internal subcommand: run one variant attempt inside its sandbox.
#[derive(Args, Debug)]
pub struct VariantImplArgs {}

impl VariantImplArgs {
    pub fn exec(self) -> Result<()> {
        let job: VariantJob = serde_json::from_reader(io::stdin().lock())
            .context("failed to read the variant job from stdin")?;
        let result = run_job(&job)?;
        println!(
            "{RECORD_PREFIX}result {}",
            serde_json::to_string(&result).context("failed to serialize the variant result")?
        );
        Ok(())
    }
}

fn run_job(job: &VariantJob) -> Result<VariantResult> {
    let pass = passes::create(&job.pass_name, &job.pass_arg)?;
    let state = pass.load_state(job.state.clone())?;

    let test_case = job.sandbox.join(&job.test_case);
    let base_size = fs::metadata(&test_case)
        .with_context(|| format!("failed to probe `{}`", test_case.display()))?
        .len();

    let mut notifier = ProcessNotifier::new(job.order);
    let (outcome, state) = pass.transform(&test_case, state, &mut notifier)?;

    let exit_code = if outcome == PassOutcome::Ok {
        Some(run_test_script(job, &test_case, &notifier)?)
    } else {
        None
    };

    let final_size = fs::metadata(&test_case)?.len();

    Ok(VariantResult {
        outcome,
        exit_code,
        state: state.save()?,
        base_size,
        final_size,
    })
}

fn run_test_script(job: &VariantJob, test_case: &Path, notifier: &ProcessNotifier) -> Result<i32> {
    let mut cmd = std::process::Command::new(&job.test_script);
    cmd.arg(test_case);
    for aux in &job.aux_files {
        cmd.arg(job.sandbox.join(aux));
    }
    cmd.current_dir(&job.sandbox)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    let mut child = cmd.spawn().with_context(|| {
        format!(
            "failed to run interestingness test `{}`",
            job.test_script.display()
        )
    })?;
    notifier.notify(child.id());
    let status = child.wait()?;

    // A test killed by a signal counts as a rejection.
    Ok(status.code().unwrap_or(-1))
}

// ---------------------------------------------------------------------------
// Driver side. This code runs in the main process, one task per attempt.

/// How one attempt ended, as seen by the driver.
#[derive(Clone, Debug)]
pub enum DriveOutcome {
    /// The worker ran the whole protocol and reported a result.
    Finished(VariantResult),

    /// The wall clock expired; the worker has been killed.
    TimedOut,

    /// The driver cancelled this attempt before it finished.
    Cancelled,

    /// The worker died or broke protocol. Fatal to the pass.
    Failed(String),
}

pub(crate) struct AttemptSpec {
    pub self_path: PathBuf,
    pub job: VariantJob,
    pub timeout: Duration,
}

pub(crate) async fn run_variant(
    spec: AttemptSpec,
    cancel: oneshot::Receiver<()>,
    pid_tx: mpsc::UnboundedSender<(u64, u32)>,
) -> DriveOutcome {
    tokio::select! {
        _ = cancel => DriveOutcome::Cancelled,
        driven = tokio::time::timeout(spec.timeout, drive_worker(&spec, &pid_tx)) => {
            match driven {
                Err(_) => DriveOutcome::TimedOut,
                Ok(Ok(result)) => DriveOutcome::Finished(result),
                Ok(Err(e)) => DriveOutcome::Failed(format!("{e:#}")),
            }
        }
    }
}

async fn drive_worker(
    spec: &AttemptSpec,
    pid_tx: &mpsc::UnboundedSender<(u64, u32)>,
) -> Result<VariantResult> {
    let mut cmd = Command::new(&spec.self_path);
    cmd.arg("variant-impl")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .context("failed to relaunch self as a variant worker")?;

    if let Some(pid) = child.id() {
        let _ = pid_tx.send((spec.job.order, pid));
    }

    // Send the job over stdin; dropping the handle closes it.
    {
        let mut stdin = child.stdin.take().unwrap();
        let encoded = serde_json::to_vec(&spec.job)?;
        stdin
            .write_all(&encoded)
            .await
            .context("failed to send the job to the variant worker")?;
    }

    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();
    let mut result = None;

    while let Some(line) = lines
        .next_line()
        .await
        .context("error reading worker stdout")?
    {
        let Some(record) = line.strip_prefix(RECORD_PREFIX) else {
            debug!("unexpected worker stdout content: {line}");
            continue;
        };

        if let Some(rest) = record.strip_prefix("pid ") {
            match parse_pid_record(rest) {
                Some(pair) => {
                    let _ = pid_tx.send(pair);
                }
                None => debug!("malformed pid record: {rest}"),
            }
        } else if let Some(rest) = record.strip_prefix("result ") {
            result = Some(
                serde_json::from_str(rest).context("malformed worker result record")?,
            );
        } else {
            debug!("unrecognized worker record: {record}");
        }
    }

    let status = child
        .wait()
        .await
        .context("failed to wait for the variant worker")?;
    ensure!(status.success(), "variant worker exited with {status}");

    result.ok_or_else(|| anyhow!("variant worker exited without reporting a result"))
}

fn parse_pid_record(rest: &str) -> Option<(u64, u32)> {
    let (order, pid) = rest.split_once(' ')?;
    Some((order.parse().ok()?, pid.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_records_round_trip() {
        assert_eq!(parse_pid_record("17 4242"), Some((17, 4242)));
        assert_eq!(parse_pid_record("17"), None);
        assert_eq!(parse_pid_record("x y"), None);
    }

    #[test]
    fn result_records_round_trip() {
        let result = VariantResult {
            outcome: PassOutcome::Ok,
            exit_code: Some(0),
            state: serde_json::json!({ "index": 2 }),
            base_size: 24,
            final_size: 16,
        };
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: VariantResult = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.success());
        assert_eq!(decoded.size_improvement(), 8);
    }
}
