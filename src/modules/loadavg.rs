//! System load-average collector.

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use sysinfo::System;

use super::{JobError, JobRuntime, Module, ModuleError};
use crate::protocol::ProtocolWriter;

/// Load values are charted with two decimal places.
const PRECISION: i64 = 100;

#[derive(Debug, Deserialize)]
struct LoadavgConfig {
    update_every: i64,
    priority: i64,
}

/// Single-job module charting the 1/5/15 minute load averages.
pub struct Loadavg;

impl Module for Loadavg {
    fn name(&self) -> &'static str {
        "loadavg"
    }

    fn create_job(
        &self,
        config: &Mapping,
        _job_name: Option<&str>,
        writer: ProtocolWriter,
    ) -> Result<Box<dyn JobRuntime>, ModuleError> {
        let config: LoadavgConfig = serde_yaml::from_value(Value::Mapping(config.clone()))?;
        Ok(Box::new(LoadavgJob { config, writer }))
    }
}

struct LoadavgJob {
    config: LoadavgConfig,
    writer: ProtocolWriter,
}

#[async_trait]
impl JobRuntime for LoadavgJob {
    async fn check(&mut self) -> Result<bool, JobError> {
        let load = System::load_average();
        Ok(load.one.is_finite() && load.one >= 0.0)
    }

    async fn create(&mut self) -> Result<bool, JobError> {
        self.writer.chart(
            "system.load",
            "System Load Average",
            "load",
            "load",
            "system.load",
            "line",
            self.config.priority,
            self.config.update_every,
        )?;
        self.writer
            .dimension("load1", "load 1m", "absolute", 1, PRECISION)?;
        self.writer
            .dimension("load5", "load 5m", "absolute", 1, PRECISION)?;
        self.writer
            .dimension("load15", "load 15m", "absolute", 1, PRECISION)?;
        self.writer.blank()?;
        Ok(true)
    }

    async fn update(&mut self, since_last_us: i64) -> Result<bool, JobError> {
        let load = System::load_average();
        self.writer.begin("system.load", since_last_us)?;
        self.writer
            .set("load1", (load.one * PRECISION as f64) as i64)?;
        self.writer
            .set("load5", (load.five * PRECISION as f64) as i64)?;
        self.writer
            .set("load15", (load.fifteen * PRECISION as f64) as i64)?;
        self.writer.end()?;
        Ok(true)
    }
}
