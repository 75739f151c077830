//! A small ordered job queue. Jobs run one at a time on a worker thread so a hung
//! job can be abandoned once its timeout passes.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use log::{info, warn};
use thiserror::Error;

pub const JOB_TIMEOUT_SECS: u64 = 1200;

type JobFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job `{job}` timed out after {secs}s")]
    TimedOut { job: String, secs: u64 },
    #[error("job `{job}` failed: {message}")]
    Failed { job: String, message: String },
    #[error("job `{job}` depends on unknown job `{dependency}`")]
    UnknownDependency { job: String, dependency: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed(String),
    /// Not run because its dependency didn't succeed.
    Skipped,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub name: String,
    pub status: JobStatus,
    pub elapsed: Duration,
}

pub struct Job {
    name: String,
    depends_on: Option<String>,
    timeout: Duration,
    run: JobFn,
}

impl Job {
    pub fn new(name: &str, run: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            name: name.to_string(),
            depends_on: None,
            timeout: Duration::from_secs(JOB_TIMEOUT_SECS),
            run: Box::new(run),
        }
    }

    pub fn depends_on(mut self, job: &str) -> Self {
        self.depends_on = Some(job.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Default)]
pub struct JobQueue {
    jobs: Vec<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: Job) -> &mut Self {
        self.jobs.push(job);
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs every job in order. A job whose dependency failed or was skipped is
    /// skipped. Returns one report per job.
    pub fn run(self) -> Result<Vec<JobReport>, JobError> {
        for (pos, job) in self.jobs.iter().enumerate() {
            if let Some(dependency) = &job.depends_on
                && !self.jobs[..pos].iter().any(|j| &j.name == dependency)
            {
                return Err(JobError::UnknownDependency {
                    job: job.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let mut reports: Vec<JobReport> = Vec::with_capacity(self.jobs.len());
        for job in self.jobs {
            let ready = job.depends_on.as_ref().is_none_or(|dependency| {
                reports
                    .iter()
                    .any(|r| &r.name == dependency && r.status == JobStatus::Succeeded)
            });
            if !ready {
                warn!("skipping job {} because its dependency didn't succeed", job.name);
                reports.push(JobReport {
                    name: job.name,
                    status: JobStatus::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            info!("running job {}", job.name);
            let report = run_one(job);
            info!("job {} finished: {:?} in {:.1?}", report.name, report.status, report.elapsed);
            reports.push(report);
        }
        Ok(reports)
    }
}

fn run_one(job: Job) -> JobReport {
    let Job {
        name, timeout, run, ..
    } = job;
    let started = Instant::now();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(run());
    });

    let status = match rx.recv_timeout(timeout) {
        Ok(Ok(())) => JobStatus::Succeeded,
        Ok(Err(err)) => JobStatus::Failed(format!("{err:#}")),
        Err(mpsc::RecvTimeoutError::Timeout) => JobStatus::TimedOut,
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            JobStatus::Failed("job panicked".to_string())
        }
    };
    JobReport {
        name,
        status,
        elapsed: started.elapsed(),
    }
}

/// The first timeout or failure in the reports, as an error.
pub fn first_failure(reports: &[JobReport], timeout_secs: u64) -> Result<()> {
    for report in reports {
        match &report.status {
            JobStatus::TimedOut => {
                return Err(anyhow!(JobError::TimedOut {
                    job: report.name.clone(),
                    secs: timeout_secs,
                }));
            }
            JobStatus::Failed(message) => {
                return Err(anyhow!(JobError::Failed {
                    job: report.name.clone(),
                    message: message.clone(),
                }));
            }
            JobStatus::Succeeded | JobStatus::Skipped => {}
        }
    }
    Ok(())
}
