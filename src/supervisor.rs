//! Job lifecycle and the update scheduler.
//!
//! Jobs run through three phases: a one-shot `check`, a one-shot `create`
//! that declares charts, and the update loop driving every surviving job on
//! its own period, multiplexed onto one output stream. Failures are
//! contained at the job boundary: a misbehaving job is removed, the rest
//! keep running, and only an empty job list ends the loop.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_yaml::{Mapping, Value};
use tracing::{debug, error};

use crate::config::{coerce_int, load_config, materialize};
use crate::job::{Job, now_secs};
use crate::modules::{JobError, Module};
use crate::protocol::ProtocolWriter;
use crate::settings::{BaseConfig, Environment};

/// Result of one guarded job-operation invocation.
#[derive(Debug)]
pub enum Outcome {
    /// The operation returned true.
    Ok,
    /// The operation returned false.
    DeclaredFalse,
    /// The module does not provide the operation.
    NotImplemented,
    /// The operation failed or panicked.
    Crashed(String),
}

/// Run one job operation with failures and panics folded into [`Outcome`].
async fn guard<F>(op: F) -> Outcome
where
    F: Future<Output = Result<bool, JobError>>,
{
    match AssertUnwindSafe(op).catch_unwind().await {
        Ok(Ok(true)) => Outcome::Ok,
        Ok(Ok(false)) => Outcome::DeclaredFalse,
        Ok(Err(JobError::NotImplemented)) => Outcome::NotImplemented,
        Ok(Err(e)) => Outcome::Crashed(e.to_string()),
        Err(panic) => Outcome::Crashed(panic_reason(panic)),
    }
}

fn panic_reason(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic".to_string()
    }
}

fn scheduling_key(config: &Mapping, key: &str) -> Option<i64> {
    config
        .get(Value::String(key.to_string()))
        .and_then(coerce_int)
}

/// Materialize each module's configuration and construct every job.
///
/// Construction failures are per-job: a multi-job module continues with its
/// remaining jobs. With `debug_override` set, every timetable runs on the
/// base `update_every` instead of the configured one.
pub fn spawn_jobs(
    modules: &[Arc<dyn Module>],
    env: &Environment,
    base: &BaseConfig,
    debug_override: bool,
    writer: &ProtocolWriter,
) -> Vec<Job> {
    let mut jobs = Vec::new();
    for module in modules {
        let doc = load_config(&env.module_conf(module.name()));
        let materialized = materialize(module.as_ref(), doc, base);
        for spec in materialized.jobs {
            let ident = match &spec.name {
                Some(job) => format!("{}/{}", module.name(), job),
                None => module.name().to_string(),
            };
            let Some(update_every) = scheduling_key(&spec.config, "update_every") else {
                error!("cannot create job {ident}: invalid update_every");
                continue;
            };
            let Some(retries) = scheduling_key(&spec.config, "retries") else {
                error!("cannot create job {ident}: invalid retries");
                continue;
            };
            let runtime = match module.create_job(&spec.config, spec.name.as_deref(), writer.clone())
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("cannot create job {ident}: {e}");
                    continue;
                }
            };
            let freq = if debug_override {
                base.update_every
            } else {
                update_every
            };
            jobs.push(Job::new(
                module.name().to_string(),
                spec.name,
                freq,
                retries,
                runtime,
            ));
        }
    }
    jobs
}

/// Terminal condition that ends the update loop.
#[derive(Debug)]
pub struct Fatal {
    pub message: String,
}

/// Drives the job list through its lifecycle.
pub struct Supervisor {
    jobs: Vec<Job>,
    writer: ProtocolWriter,
    first_run: bool,
}

impl Supervisor {
    pub fn new(jobs: Vec<Job>, writer: ProtocolWriter) -> Self {
        Self {
            jobs,
            writer,
            first_run: true,
        }
    }

    /// Surviving jobs, in creation order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Probe each job once; any non-true outcome drops the job.
    pub async fn check_jobs(&mut self) {
        let mut index = 0;
        while index < self.jobs.len() {
            let outcome = guard(self.jobs[index].runtime.check()).await;
            match outcome {
                Outcome::Ok => {
                    debug!("{}: is live", self.jobs[index].ident());
                    index += 1;
                }
                other => self.drop_job(index, "check", other),
            }
        }
    }

    /// Let each job declare its charts; on success the supervisor also
    /// declares the job's own runtime chart.
    pub async fn create_charts(&mut self) {
        let mut index = 0;
        while index < self.jobs.len() {
            let outcome = guard(self.jobs[index].runtime.create()).await;
            match outcome {
                Outcome::Ok => {
                    let job = &self.jobs[index];
                    if let Err(e) = self
                        .writer
                        .runtime_chart(&job.chart_name, job.timetable.freq as i64)
                    {
                        error!("cannot write runtime chart for {}: {}", job.ident(), e);
                    }
                    index += 1;
                }
                other => self.drop_job(index, "create", other),
            }
        }
    }

    /// Drive updates forever. Returns only when no jobs remain.
    pub async fn run(&mut self) -> Fatal {
        loop {
            let next_runs = self.run_pass().await;
            if self.jobs.is_empty() {
                return Fatal {
                    message: "no jobs left to run. Exiting.".to_string(),
                };
            }
            let target = next_runs.iter().copied().fold(f64::INFINITY, f64::min);
            let now = now_secs();
            if target > now {
                tokio::time::sleep(Duration::from_secs_f64(target - now)).await;
            }
        }
    }

    /// One scheduler pass over the live jobs, in creation order. Returns
    /// each surviving job's next eligible time.
    pub async fn run_pass(&mut self) -> Vec<f64> {
        let mut next_runs = Vec::with_capacity(self.jobs.len());
        let mut index = 0;
        while index < self.jobs.len() {
            if let Some(next) = self.update_one(index).await {
                next_runs.push(next);
                index += 1;
            }
        }
        next_runs
    }

    /// Update one job if it is due. Returns its next eligible time, or
    /// `None` when the job was stopped.
    async fn update_one(&mut self, index: usize) -> Option<f64> {
        let t_start = now_secs();
        if self.jobs[index].timetable.next > t_start {
            return Some(self.jobs[index].timetable.next);
        }

        let since_last = if self.first_run {
            0
        } else {
            ((t_start - self.jobs[index].timetable.last) * 1e6).round() as i64
        };

        let outcome = guard(self.jobs[index].runtime.update(since_last)).await;
        match outcome {
            Outcome::Ok => {
                let t_end = now_secs();
                let job = &mut self.jobs[index];
                job.timetable.align(t_end);
                let run_time_ms = ((t_end - t_start) * 1000.0) as i64;
                if let Err(e) = self
                    .writer
                    .runtime_frame(&job.chart_name, since_last, run_time_ms)
                {
                    error!("cannot write runtime frame for {}: {}", job.ident(), e);
                }
                job.retries_left = job.retries;
                job.timetable.last = t_start;
                self.first_run = false;
                Some(job.timetable.next)
            }
            Outcome::DeclaredFalse => {
                self.jobs[index].retries_left -= 1;
                if self.jobs[index].retries_left < 0 {
                    self.drop_job(index, "update", Outcome::DeclaredFalse);
                    None
                } else {
                    let job = &mut self.jobs[index];
                    job.timetable.defer();
                    debug!(
                        "{}: update failed, {} retries left",
                        job.ident(),
                        job.retries_left
                    );
                    Some(job.timetable.next)
                }
            }
            other => {
                self.drop_job(index, "update", other);
                None
            }
        }
    }

    /// Remove a job with the log line its outcome calls for. An `Ok`
    /// outcome is a voluntary exit and is removed silently.
    fn drop_job(&mut self, index: usize, op: &str, outcome: Outcome) {
        let job = self.jobs.remove(index);
        if let Some(message) = removal_message(&job.ident(), op, &outcome) {
            error!("{message}");
        }
    }
}

/// Log line reporting a job removal, one fixed phrasing per failure
/// category. A voluntary exit carries no message.
fn removal_message(ident: &str, op: &str, outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::Ok => None,
        Outcome::DeclaredFalse => Some(format!("{ident}: {op}() function reports failure.")),
        Outcome::NotImplemented => Some(format!("{ident}: no {op}() function. Disabling it.")),
        Outcome::Crashed(reason) => Some(format!("{ident}: misbehaving. Reason: {reason}")),
    }
}
