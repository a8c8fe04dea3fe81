use std::{
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, warn};

use crate::{
    context::BranchContext,
    error::{Result, TorqueError},
    remote::{RemoteService, Sandbox, SandboxStatus, temp_branch_releasable},
};

/// Delay between two status requests.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Timeout used when the caller does not give one.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 30;
/// Consecutive failed status requests after which the sandbox state is unknown.
pub const MAX_POLL_FAILURES: u32 = 3;

/// Source of elapsed time and blocking delays.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;
    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock [`Clock`].
#[derive(Debug)]
pub struct SystemClock {
    /// Instant the clock was created.
    start: Instant,
}

impl SystemClock {
    /// Start measuring from now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Sink for wait-loop progress.
pub trait Progress {
    /// Called after each poll with the seconds spent waiting so far.
    fn tick(&self, elapsed_seconds: u64);
    /// Called once when the wait ends successfully.
    fn done(&self);
}

/// [`Progress`] that reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn tick(&self, _elapsed_seconds: u64) {}

    fn done(&self) {}
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Last status observed.
    pub status: SandboxStatus,
    /// Seconds spent waiting.
    pub elapsed_seconds: u64,
    /// The timeout elapsed before a terminal or releasable state was seen.
    pub timed_out: bool,
}

/// Polls a launching sandbox and releases the temporary branch as early as possible.
pub struct Waiter<'a> {
    /// Service the sandbox was started on.
    remote: &'a dyn RemoteService,
    /// Time source.
    clock: &'a dyn Clock,
    /// Progress sink.
    progress: &'a dyn Progress,
    /// Decides when the remote no longer needs the temporary branch.
    releasable: &'a dyn Fn(&Sandbox) -> bool,
}

impl<'a> Waiter<'a> {
    /// Waiter using the default release predicate.
    pub fn new(
        remote: &'a dyn RemoteService,
        clock: &'a dyn Clock,
        progress: &'a dyn Progress,
    ) -> Self {
        Self {
            remote,
            clock,
            progress,
            releasable: &temp_branch_releasable,
        }
    }

    /// Replace the predicate deciding when the temporary branch may be deleted.
    pub fn with_release_predicate(mut self, releasable: &'a dyn Fn(&Sandbox) -> bool) -> Self {
        self.releasable = releasable;
        self
    }

    /// Wait for sandbox `sandbox_id` to finish launching.
    ///
    /// Returns `None` without polling when there is nothing to wait for: the
    /// caller did not ask to block and no temporary branch is in play. A timeout
    /// is reported through [`PollOutcome::timed_out`]; repeated status failures
    /// end the wait with [`TorqueError::Poll`].
    pub fn wait_for_completion(
        &self,
        sandbox_id: &str,
        timeout_minutes: Option<u64>,
        context: &mut BranchContext<'_>,
        block_until_active: bool,
    ) -> Result<Option<PollOutcome>> {
        if !block_until_active && !context.temp_branch_exists() {
            return Ok(None);
        }

        if context.temp_branch_exists() {
            // The pushed branch is all the remote needs; give the user their tree back.
            if let Err(e) = context.restore_working_tree() {
                error!("continuing to wait with an unrestored working tree: {e}");
            }
            debug!(sandbox_id, "waiting before deleting the temporary branch created for this sandbox");
        }

        self.poll(sandbox_id, timeout_minutes, Some(context), block_until_active)
            .map(Some)
    }

    /// Wait for a sandbox launched without a branch context to reach a terminal status.
    pub fn wait_until_active(
        &self,
        sandbox_id: &str,
        timeout_minutes: Option<u64>,
    ) -> Result<PollOutcome> {
        self.poll(sandbox_id, timeout_minutes, None, true)
    }

    /// Poll until a terminal status, an early release, or the timeout.
    fn poll(
        &self,
        sandbox_id: &str,
        timeout_minutes: Option<u64>,
        mut context: Option<&mut BranchContext<'_>>,
        block_until_active: bool,
    ) -> Result<PollOutcome> {
        debug!(sandbox_id, "waiting for the sandbox to finish launching");
        let timeout_minutes = timeout_minutes.unwrap_or(DEFAULT_TIMEOUT_MINUTES);
        let timeout = Duration::from_secs(timeout_minutes.saturating_mul(60));
        let started = self.clock.elapsed();
        let mut failures = 0;
        let mut sandbox = self.fetch(sandbox_id, &mut failures)?;

        loop {
            let elapsed = self.clock.elapsed().saturating_sub(started);

            if let Some(sandbox) = &sandbox {
                if sandbox.status.is_terminal() {
                    self.progress.done();
                    return Ok(finished(sandbox, elapsed));
                }
                if let Some(context) = context.as_deref_mut()
                    && context.temp_branch_exists()
                    && (self.releasable)(sandbox)
                {
                    context.delete_temp_branch();
                    if !block_until_active {
                        self.progress.done();
                        return Ok(finished(sandbox, elapsed));
                    }
                }
            }

            if elapsed >= timeout {
                error!(
                    sandbox_id,
                    "timeout reached: sandbox was not active after {timeout_minutes} minutes"
                );
                let status = sandbox.map_or(SandboxStatus::Launching, |s| s.status);
                return Ok(PollOutcome {
                    status,
                    elapsed_seconds: elapsed.as_secs(),
                    timed_out: true,
                });
            }

            self.clock.sleep(POLL_INTERVAL);
            self.progress
                .tick(self.clock.elapsed().saturating_sub(started).as_secs());
            if let Some(latest) = self.fetch(sandbox_id, &mut failures)? {
                sandbox = Some(latest);
            }
        }
    }

    /// Fetch the sandbox, tolerating up to [`MAX_POLL_FAILURES`] consecutive failures.
    fn fetch(&self, sandbox_id: &str, failures: &mut u32) -> Result<Option<Sandbox>> {
        match self.remote.sandbox(sandbox_id) {
            Ok(sandbox) => {
                *failures = 0;
                debug!(sandbox_id, status = %sandbox.status, "polled sandbox");
                Ok(Some(sandbox))
            }
            Err(e) => {
                *failures += 1;
                warn!(sandbox_id, attempt = *failures, "unable to poll sandbox: {e:#}");
                if *failures >= MAX_POLL_FAILURES {
                    return Err(TorqueError::Poll {
                        sandbox_id: sandbox_id.to_string(),
                        message: format!("{e:#}"),
                    });
                }
                Ok(None)
            }
        }
    }
}

/// Outcome of a wait that ended before the timeout.
fn finished(sandbox: &Sandbox, elapsed: Duration) -> PollOutcome {
    PollOutcome {
        status: sandbox.status.clone(),
        elapsed_seconds: elapsed.as_secs(),
        timed_out: false,
    }
}
