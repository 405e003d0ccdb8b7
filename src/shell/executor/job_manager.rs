use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::shell::command::ExitCode;
use crate::shell::process::Process;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done(ExitCode),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub index: usize,
    /// OS pid, `None` for registered commands running on a thread.
    pub pid: Option<u32>,
    pub command: String,
    pub status: JobStatus,
    pub is_current: bool,
    pub is_previous: bool,
    pub process: Arc<Process>,
}

impl Job {
    fn new(index: usize, pid: Option<u32>, command: String, process: Arc<Process>) -> Self {
        Self {
            index,
            pid,
            command,
            status: JobStatus::Running,
            is_current: false,
            is_previous: false,
            process,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.is_current {
            "+"
        } else if self.is_previous {
            "-"
        } else {
            " "
        };
        match self.status {
            JobStatus::Running => write!(f, "[{}]{}  Running  {}", self.index, mark, self.command),
            JobStatus::Done(code) => write!(
                f,
                "[{}]{}  Done({})  {}",
                self.index, mark, code, self.command
            ),
        }
    }
}

/// Background jobs of one executor, shared with the threads that finish them.
#[derive(Debug, Default)]
pub struct JobManager {
    jobs: Mutex<Vec<Job>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find_available_index(jobs: &[Job]) -> usize {
        let mut index = 1;
        while jobs.iter().any(|job| job.index == index) {
            index += 1;
        }
        index
    }

    /// Records a started job as the current one and returns its index.
    pub fn add_job(&self, pid: Option<u32>, command: String, process: Arc<Process>) -> usize {
        let mut jobs = self.lock();
        let index = Self::find_available_index(&jobs);
        match pid {
            Some(pid) => debug!("job [{}] started (pid {}): {}", index, pid, command),
            None => debug!("job [{}] started: {}", index, command),
        }
        jobs.push(Job::new(index, pid, command, process));
        Self::update_marks(&mut jobs, index);
        index
    }

    /// Marks a job done and stops its lifecycle handle.
    pub fn finish(&self, index: usize, code: ExitCode) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.iter_mut().find(|job| job.index == index) {
            debug!("job [{}] done({}): {}", index, code, job.command);
            job.status = JobStatus::Done(code);
            job.process.stop();
        }
    }

    /// Removes and returns every finished job.
    pub fn reap(&self) -> Vec<Job> {
        let mut jobs = self.lock();
        let (done, running): (Vec<Job>, Vec<Job>) = jobs
            .drain(..)
            .partition(|job| matches!(job.status, JobStatus::Done(_)));
        *jobs = running;

        if !jobs.iter().any(|job| job.is_current) {
            // promote the previous job, else the newest one
            let promoted = jobs
                .iter()
                .find(|job| job.is_previous)
                .or_else(|| jobs.iter().max_by_key(|job| job.index))
                .map(|job| job.index);
            if let Some(index) = promoted {
                Self::update_marks(&mut jobs, index);
            }
        }
        done
    }

    pub fn get_jobs(&self) -> Vec<Job> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn update_marks(jobs: &mut [Job], current_job_index: usize) {
        for job in jobs.iter_mut() {
            if job.index == current_job_index {
                job.is_current = true;
                job.is_previous = false;
            } else if job.is_current {
                job.is_current = false;
                job.is_previous = true;
            } else {
                job.is_previous = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(manager: &JobManager, command: &str) -> usize {
        manager.add_job(None, command.to_string(), Arc::new(Process::new()))
    }

    #[test]
    fn test_indices_and_marks() {
        let manager = JobManager::new();
        assert_eq!(add(&manager, "sleep 1"), 1);
        assert_eq!(add(&manager, "sleep 2"), 2);

        let jobs = manager.get_jobs();
        assert!(jobs[1].is_current);
        assert!(jobs[0].is_previous);
        assert_eq!(jobs[1].to_string(), "[2]+  Running  sleep 2");
        assert_eq!(jobs[0].to_string(), "[1]-  Running  sleep 1");
    }

    #[test]
    fn test_finish_and_reap() {
        let manager = JobManager::new();
        let first = add(&manager, "a");
        let second = add(&manager, "b");

        manager.finish(second, 3);
        assert!(!manager.get_jobs()[1].process.running());

        let done = manager.reap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].to_string(), "[2]+  Done(3)  b");

        // the previous job takes over
        let jobs = manager.get_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].index, first);
        assert!(jobs[0].is_current);

        // freed indices are reused
        assert_eq!(add(&manager, "c"), 2);
    }

    #[test]
    fn test_reap_leaves_running_jobs() {
        let manager = JobManager::new();
        add(&manager, "a");
        assert!(manager.reap().is_empty());
        assert!(!manager.is_empty());
        manager.finish(1, 0);
        manager.finish(42, 0);
        assert_eq!(manager.reap().len(), 1);
        assert!(manager.is_empty());
    }
}
