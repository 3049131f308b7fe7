//! Background batch checks run as separate processes.
//!
//! Each job owns its own rule state, geometry and output file, so the parent
//! only tracks which children are still alive.

use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use serde::Serialize;

use crate::error::DrcError;

/// Placeholder replaced by the cell name in [`BatchCommand`] arguments.
pub const CELL_PLACEHOLDER: &str = "{cell}";

/// How to launch one batch check.
#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl BatchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn command(&self, cell: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|a| a.replace(CELL_PLACEHOLDER, cell)))
            .stdin(Stdio::null());
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub cell: String,
    pub pid: u32,
}

#[derive(Debug)]
struct Job {
    handle: JobHandle,
    child: Child,
}

/// A finished job and how it exited.
#[derive(Debug)]
pub struct FinishedJob {
    pub handle: JobHandle,
    pub status: ExitStatus,
}

/// Live background jobs of this process.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: Vec<Job>,
    /// Untracked children that had not exited yet; reaped by [`JobTracker::poll`].
    exiting: Vec<Job>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a batch check of `cell`.
    pub fn start(&mut self, cell: &str, cmd: &BatchCommand) -> Result<JobHandle, DrcError> {
        let child = cmd.command(cell).spawn()?;
        let handle = JobHandle {
            cell: cell.to_string(),
            pid: child.id(),
        };
        log::info!("started background DRC of {cell} as pid {}", handle.pid);
        self.jobs.push(Job {
            handle: handle.clone(),
            child,
        });
        Ok(handle)
    }

    pub fn list(&self) -> Vec<JobHandle> {
        self.jobs.iter().map(|j| j.handle.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Children no longer tracked but not yet reaped.
    pub fn exiting(&self) -> usize {
        self.exiting.len()
    }

    /// Reap finished children and stop tracking them.
    pub fn poll(&mut self) -> Result<Vec<FinishedJob>, DrcError> {
        self.exiting.retain_mut(|job| match job.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                log::warn!("could not reap pid {}: {e}", job.handle.pid);
                false
            }
        });
        let mut finished = Vec::new();
        let mut i = 0;
        while i < self.jobs.len() {
            match self.jobs[i].child.try_wait()? {
                Some(status) => {
                    let job = self.jobs.swap_remove(i);
                    log::info!(
                        "background DRC of {} (pid {}) finished: {status}",
                        job.handle.cell,
                        job.handle.pid
                    );
                    finished.push(FinishedJob {
                        handle: job.handle,
                        status,
                    });
                }
                None => i += 1,
            }
        }
        Ok(finished)
    }

    /// Stop tracking `pid` once its completion has been observed elsewhere.
    pub fn on_job_complete(&mut self, pid: u32) -> Option<JobHandle> {
        let pos = self.jobs.iter().position(|j| j.handle.pid == pid)?;
        let mut job = self.jobs.swap_remove(pos);
        let handle = job.handle.clone();
        match job.child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                log::debug!("pid {pid} still running, reaped on a later poll");
                self.exiting.push(job);
            }
            Err(e) => log::warn!("could not reap pid {pid}: {e}"),
        }
        log::debug!("job {pid} for {} removed", handle.cell);
        Some(handle)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_all(tracker: &mut JobTracker) -> Vec<FinishedJob> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut done = Vec::new();
        while !tracker.is_empty() && Instant::now() < deadline {
            done.extend(tracker.poll().unwrap());
            std::thread::sleep(Duration::from_millis(10));
        }
        done
    }

    #[test]
    fn test_jobs_are_reaped() {
        let mut tracker = JobTracker::new();
        let cmd = BatchCommand::new("sh").arg("-c").arg("test \"$0\" = top").arg(CELL_PLACEHOLDER);
        let a = tracker.start("top", &cmd).unwrap();
        let b = tracker.start("other", &cmd).unwrap();
        assert_eq!(tracker.list().len(), 2);

        let done = wait_all(&mut tracker);
        assert!(tracker.is_empty());
        let status_of = |h: &JobHandle| done.iter().find(|f| &f.handle == h).map(|f| f.status.success());
        assert_eq!(status_of(&a), Some(true));
        assert_eq!(status_of(&b), Some(false));
    }

    #[test]
    fn test_on_job_complete_removes() {
        let mut tracker = JobTracker::new();
        let h = tracker.start("top", &BatchCommand::new("true")).unwrap();
        assert_eq!(tracker.on_job_complete(h.pid), Some(h));
        assert!(tracker.on_job_complete(12345678).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_running_child_is_reaped_later() {
        let mut tracker = JobTracker::new();
        let h = tracker.start("top", &BatchCommand::new("sleep").arg("0.2")).unwrap();
        assert_eq!(tracker.on_job_complete(h.pid), Some(h));
        assert!(tracker.is_empty());
        assert_eq!(tracker.exiting(), 1);

        let deadline = Instant::now() + Duration::from_secs(10);
        while tracker.exiting() > 0 && Instant::now() < deadline {
            assert!(tracker.poll().unwrap().is_empty());
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(tracker.exiting(), 0);
    }

    #[test]
    fn test_spawn_failure() {
        let mut tracker = JobTracker::new();
        let err = tracker.start("top", &BatchCommand::new("/nonexistent/opensilicon-drc"));
        assert!(matches!(err, Err(DrcError::Io(_))));
        assert!(tracker.is_empty());
    }
}
