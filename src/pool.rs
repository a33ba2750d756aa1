// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! Bounded concurrent execution of variant workers.
//!
//! The pool owns the submission ledger for one scheduling burst: every
//! attempt in submission order, its opaque state snapshot, its sandbox,
//! and whatever its worker task has reported so far. Completions arrive
//! over an mpsc channel in whatever order the workers finish; the arbiter
//! restores submission order by scanning the ledger. A second channel
//! carries `(order, pid)` attributions so that cancelling an attempt can
//! SIGTERM the subprocesses it spawned.

use anyhow::{bail, Result};
use std::{collections::HashMap, path::PathBuf, time::Duration};
use tokio::sync::{mpsc, oneshot};

use crate::{
    config::ReduceOptions,
    pass::PassState,
    sandbox::Sandbox,
    variant::{self, AttemptSpec, DriveOutcome, VariantJob, VariantResult},
};

pub(crate) struct Attempt {
    pub order: u64,

    /// The state snapshot this attempt was submitted with, kept for bug
    /// reports.
    pub state: Box<dyn PassState>,

    /// `None` once the sandbox has been handed off or dropped.
    pub sandbox: Option<Sandbox>,

    /// `None` while the worker is still running.
    pub outcome: Option<DriveOutcome>,

    cancel: Option<oneshot::Sender<()>>,
    cancelled: bool,
    settled: bool,
}

impl Attempt {
    /// Whether the arbiter has already disposed of this attempt.
    pub fn settled(&self) -> bool {
        self.settled
    }

    /// Whether the worker for this attempt is still running.
    pub fn running(&self) -> bool {
        !self.settled && !self.cancelled && self.outcome.is_none()
    }

    /// The sandboxed test case path, while the sandbox is still held.
    pub fn variant_path(&self) -> Option<PathBuf> {
        self.sandbox.as_ref().map(Sandbox::test_case_path)
    }
}

pub(crate) struct ProcessPool {
    parallel: usize,
    timeout: Duration,
    save_temps: bool,
    self_path: PathBuf,
    first_order: u64,
    next_order: u64,
    attempts: Vec<Attempt>,
    results_tx: mpsc::UnboundedSender<(u64, DriveOutcome)>,
    results_rx: mpsc::UnboundedReceiver<(u64, DriveOutcome)>,
    pid_tx: mpsc::UnboundedSender<(u64, u32)>,
    pid_rx: mpsc::UnboundedReceiver<(u64, u32)>,
    known_pids: HashMap<u64, Vec<u32>>,
}

impl ProcessPool {
    pub fn new(opts: &ReduceOptions, self_path: PathBuf, first_order: u64) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (pid_tx, pid_rx) = mpsc::unbounded_channel();

        ProcessPool {
            parallel: opts.parallel_tests,
            timeout: opts.timeout,
            save_temps: opts.save_temps,
            self_path,
            first_order,
            next_order: first_order,
            attempts: Vec::new(),
            results_tx,
            results_rx,
            pid_tx,
            pid_rx,
            known_pids: HashMap::new(),
        }
    }

    /// The order the next submission will get.
    pub fn next_order(&self) -> u64 {
        self.next_order
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// Whether the submission window is full. Undecided attempts count
    /// even after their worker finished: the arbiter will not look past an
    /// earlier still-pending one, and the ledger (and its sandboxes) must
    /// not grow without bound behind it.
    pub fn is_full(&self) -> bool {
        self.attempts
            .iter()
            .filter(|a| !a.settled && !a.cancelled)
            .count()
            >= self.parallel
    }

    pub fn has_running(&self) -> bool {
        self.attempts.iter().any(Attempt::running)
    }

    /// Launch a worker for the given job. The job's `order` field must be
    /// [`Self::next_order`].
    pub fn submit(&mut self, job: VariantJob, state: Box<dyn PassState>, sandbox: Sandbox) -> u64 {
        let order = job.order;
        debug_assert_eq!(order, self.next_order);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let spec = AttemptSpec {
            self_path: self.self_path.clone(),
            job,
            timeout: self.timeout,
        };
        let results_tx = self.results_tx.clone();
        let pid_tx = self.pid_tx.clone();

        tokio::spawn(async move {
            let outcome = variant::run_variant(spec, cancel_rx, pid_tx).await;
            let _ = results_tx.send((order, outcome));
        });

        self.attempts.push(Attempt {
            order,
            state,
            sandbox: Some(sandbox),
            outcome: None,
            cancel: Some(cancel_tx),
            cancelled: false,
            settled: false,
        });
        self.next_order += 1;
        order
    }

    /// Block until at least one running worker reports in, then also pick
    /// up anything else that is already waiting.
    pub async fn wait_one(&mut self) -> Result<()> {
        if !self.has_running() {
            return Ok(());
        }

        let received = self.results_rx.recv().await;
        match received {
            Some((order, outcome)) => self.record(order, outcome),
            None => bail!("worker result channel closed unexpectedly"),
        }
        self.drain_ready();
        Ok(())
    }

    /// Record any completions that are already waiting, without blocking.
    pub fn drain_ready(&mut self) {
        loop {
            let received = self.results_rx.try_recv();
            match received {
                Ok((order, outcome)) => self.record(order, outcome),
                Err(_) => break,
            }
        }
    }

    fn record(&mut self, order: u64, outcome: DriveOutcome) {
        if let Some(attempt) = self.attempt_mut(order) {
            // A cancelled worker's parting report is of no interest.
            if !attempt.cancelled {
                attempt.outcome = Some(outcome);
            }
        }
    }

    fn attempt_mut(&mut self, order: u64) -> Option<&mut Attempt> {
        let index = order.checked_sub(self.first_order)? as usize;
        self.attempts.get_mut(index)
    }

    /// Stop an attempt wherever it is in its lifecycle: signal
    /// cancellation, SIGTERM every subprocess attributed to it, and
    /// release its sandbox.
    pub fn terminate(&mut self, index: usize) {
        self.drain_pids();

        let attempt = &mut self.attempts[index];
        let order = attempt.order;
        if let Some(tx) = attempt.cancel.take() {
            let _ = tx.send(());
        }
        attempt.cancelled = true;

        if let Some(pids) = self.known_pids.remove(&order) {
            for pid in pids {
                send_sigterm(pid);
            }
        }

        self.release(index);
    }

    /// Release an attempt's sandbox and drop it from further
    /// consideration.
    pub fn release(&mut self, index: usize) {
        let attempt = &mut self.attempts[index];
        attempt.settled = true;
        if let Some(sandbox) = attempt.sandbox.take() {
            sandbox.release(self.save_temps);
        }
    }

    /// Take the winning attempt's sandbox and result out of the ledger.
    pub fn take_winner(&mut self, index: usize) -> Option<(Sandbox, VariantResult)> {
        let attempt = &mut self.attempts[index];
        attempt.settled = true;
        let sandbox = attempt.sandbox.take()?;
        match &attempt.outcome {
            Some(DriveOutcome::Finished(result)) => Some((sandbox, result.clone())),
            _ => None,
        }
    }

    /// Terminate everything that is still unsettled.
    pub fn stop_all(&mut self) {
        for index in 0..self.attempts.len() {
            if !self.attempts[index].settled() {
                self.terminate(index);
            }
        }
    }

    fn drain_pids(&mut self) {
        loop {
            let received = self.pid_rx.try_recv();
            match received {
                Ok((order, pid)) => self.known_pids.entry(order).or_default().push(pid),
                Err(_) => break,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn push_attempt_for_tests(
        &mut self,
        state: Box<dyn PassState>,
        sandbox: Sandbox,
        outcome: Option<DriveOutcome>,
    ) -> u64 {
        let order = self.next_order;
        self.attempts.push(Attempt {
            order,
            state,
            sandbox: Some(sandbox),
            outcome,
            cancel: None,
            cancelled: false,
            settled: false,
        });
        self.next_order += 1;
        order
    }
}

/// Best-effort SIGTERM; the process may already be gone.
fn send_sigterm(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn dummy_job(order: u64, sandbox: &Sandbox) -> VariantJob {
        VariantJob {
            pass_name: "lines".into(),
            pass_arg: String::new(),
            state: serde_json::json!({ "index": 0 }),
            order,
            test_case: sandbox.test_case_name().into(),
            aux_files: Vec::new(),
            test_script: "/bin/true".into(),
            sandbox: sandbox.path().to_path_buf(),
        }
    }

    fn sandbox_with_case(root: &std::path::Path) -> Sandbox {
        let case = root.join("case.txt");
        fs::write(&case, "hello\n").unwrap();
        Sandbox::new(root, &case, &[]).unwrap()
    }

    #[tokio::test]
    async fn a_broken_worker_reports_failure() {
        let root = tempfile::tempdir().unwrap();
        let opts = ReduceOptions::default();
        // `/bin/true` ignores the protocol entirely, so the drive must
        // come back as a failure rather than hanging.
        let mut pool = ProcessPool::new(&opts, PathBuf::from("/bin/true"), 1);

        let sandbox = sandbox_with_case(root.path());
        let job = dummy_job(pool.next_order(), &sandbox);
        pool.submit(job, Box::new(42usize), sandbox);

        assert!(pool.has_running());
        pool.wait_one().await.unwrap();
        assert!(!pool.has_running());
        assert!(matches!(
            pool.attempts()[0].outcome,
            Some(DriveOutcome::Failed(_))
        ));
    }

    #[tokio::test]
    async fn terminate_releases_the_sandbox() {
        let root = tempfile::tempdir().unwrap();
        let opts = ReduceOptions::default();
        let mut pool = ProcessPool::new(&opts, PathBuf::from("/bin/true"), 1);

        let sandbox = sandbox_with_case(root.path());
        let sandbox_path = sandbox.path().to_path_buf();
        pool.push_attempt_for_tests(Box::new(0usize), sandbox, None);

        pool.terminate(0);
        assert!(pool.attempts()[0].settled());
        assert!(!sandbox_path.exists());
    }
}
