use std::collections::HashMap;

use crate::executor::StageProc;
use crate::status::ProcStatus;

/// A pipeline registered with the shell: its display text, the pids of its
/// OS stages, the terminal stage's runtime object (kept for background jobs
/// so they can be reaped and killed), and the background flag.
pub struct JobRecord {
    pub cmds: String,
    pub pids: Vec<u32>,
    pub obj: Option<StageProc>,
    pub bg: bool,
}

struct Job {
    id: usize,
    record: JobRecord,
}

/// The shell's job registry.
///
/// Tracks every launched pipeline plus the single active foreground job.
/// Foreground jobs leave the table on completion; background jobs stay
/// until reaped or killed at shutdown.
#[derive(Default)]
pub struct JobTable {
    jobs: HashMap<usize, Job>,
    next_id: usize,
    active: Option<usize>,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable { jobs: HashMap::new(), next_id: 1, active: None }
    }

    /// Register a pipeline. Foreground jobs become the active job; nested
    /// foreground runs replace it, last writer wins.
    pub fn add_job(&mut self, record: JobRecord) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        let bg = record.bg;
        self.jobs.insert(id, Job { id, record });
        if !bg {
            self.active = Some(id);
        }
        id
    }

    /// Mark a job finished. Clears activity if it was the active job;
    /// foreground records are dropped, background records stay for `reap`.
    pub fn complete(&mut self, id: usize, _status: ProcStatus) {
        if self.active == Some(id) {
            self.active = None;
        }
        let fg = self.jobs.get(&id).is_some_and(|job| !job.record.bg);
        if fg {
            self.jobs.remove(&id);
        }
    }

    /// The active foreground job, if any.
    pub fn active(&self) -> Option<usize> {
        self.active
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Non-blocking sweep of background jobs. Finished ones are removed and
    /// reported as `[N]  Done  cmd` lines for the prompt loop to print.
    pub fn reap(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        let mut done = Vec::new();
        for (id, job) in self.jobs.iter_mut() {
            if !job.record.bg {
                continue;
            }
            let finished = match job.record.obj.as_mut() {
                Some(obj) => obj.poll().is_some(),
                None => false,
            };
            if finished {
                messages.push(format!("[{}]  Done  {}", job.id, job.record.cmds));
                done.push(*id);
            }
        }
        for id in done {
            self.jobs.remove(&id);
        }
        messages.sort();
        messages
    }

    /// Terminate every remaining job's processes. Called at shutdown.
    pub fn kill_all_jobs(&mut self) {
        for job in self.jobs.values_mut() {
            if let Some(obj) = job.record.obj.as_mut() {
                obj.kill();
            }
            #[cfg(unix)]
            for pid in &job.record.pids {
                crate::job_control::kill_pid(*pid);
            }
        }
        self.jobs.clear();
        self.active = None;
    }
}
