//! Job records and scheduling timetables.

use chrono::Utc;

use crate::modules::JobRuntime;

/// Wall-clock time as fractional epoch seconds.
pub(crate) fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Per-job scheduling record.
///
/// `next` is kept aligned to multiples of `freq`, so jobs with equal
/// periods fire in the same pass regardless of how long their updates take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timetable {
    /// Update period in seconds.
    pub freq: f64,
    /// Wall time of the last successful update, seeded to creation time.
    pub last: f64,
    /// Wall time at which the next update becomes eligible.
    pub next: f64,
}

impl Timetable {
    /// Timetable due immediately, aligned to the period grid.
    pub fn new(now: f64, update_every: i64) -> Self {
        let freq = update_every.max(1) as f64;
        Self {
            freq,
            last: now,
            next: now - now % freq,
        }
    }

    /// Realign after an update that finished at `t_end`: the earliest
    /// multiple of the period strictly greater than the finish time.
    pub fn align(&mut self, t_end: f64) {
        self.next = (t_end / self.freq).floor() * self.freq + self.freq;
    }

    /// Push the next eligible time back one period without realigning.
    pub fn defer(&mut self) {
        self.next += self.freq;
    }
}

/// One runtime instantiation of a module against one job configuration.
pub struct Job {
    /// Owning module name.
    pub module: String,
    /// Job name; `None` for single-job modules.
    pub name: Option<String>,
    /// Chart identity used for the supervisor's runtime chart.
    pub chart_name: String,
    pub timetable: Timetable,
    /// Configured ceiling of consecutive update failures.
    pub retries: i64,
    /// Remaining failure budget; refilled on every successful update.
    pub retries_left: i64,
    pub runtime: Box<dyn JobRuntime>,
}

impl Job {
    pub fn new(
        module: String,
        name: Option<String>,
        update_every: i64,
        retries: i64,
        runtime: Box<dyn JobRuntime>,
    ) -> Self {
        let chart_name = match &name {
            Some(job) => format!("{module}_{job}"),
            None => module.clone(),
        };
        Self {
            module,
            name,
            chart_name,
            timetable: Timetable::new(now_secs(), update_every),
            retries,
            retries_left: retries,
            runtime,
        }
    }

    /// Identity used in log lines.
    pub fn ident(&self) -> String {
        match &self.name {
            Some(job) => format!("{}/{}", self.module, job),
            None => self.module.clone(),
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("chart_name", &self.chart_name)
            .field("timetable", &self.timetable)
            .field("retries_left", &self.retries_left)
            .finish_non_exhaustive()
    }
}
