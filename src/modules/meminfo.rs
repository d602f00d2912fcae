//! System memory collector.

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use sysinfo::System;

use super::{JobError, JobRuntime, Module, ModuleError};
use crate::protocol::ProtocolWriter;

/// Memory values are charted in MiB.
const MIB: i64 = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct MeminfoConfig {
    update_every: i64,
    priority: i64,
}

/// Single-job module charting RAM totals.
pub struct Meminfo;

impl Module for Meminfo {
    fn name(&self) -> &'static str {
        "meminfo"
    }

    fn create_job(
        &self,
        config: &Mapping,
        _job_name: Option<&str>,
        writer: ProtocolWriter,
    ) -> Result<Box<dyn JobRuntime>, ModuleError> {
        let config: MeminfoConfig = serde_yaml::from_value(Value::Mapping(config.clone()))?;
        Ok(Box::new(MeminfoJob {
            config,
            system: System::new(),
            writer,
        }))
    }
}

struct MeminfoJob {
    config: MeminfoConfig,
    system: System,
    writer: ProtocolWriter,
}

#[async_trait]
impl JobRuntime for MeminfoJob {
    async fn check(&mut self) -> Result<bool, JobError> {
        self.system.refresh_memory();
        Ok(self.system.total_memory() > 0)
    }

    async fn create(&mut self) -> Result<bool, JobError> {
        self.writer.chart(
            "mem.system",
            "System RAM",
            "MiB",
            "ram",
            "mem.system",
            "line",
            self.config.priority,
            self.config.update_every,
        )?;
        self.writer.dimension("total", "total", "absolute", 1, MIB)?;
        self.writer.dimension("used", "used", "absolute", 1, MIB)?;
        self.writer
            .dimension("available", "available", "absolute", 1, MIB)?;
        self.writer.blank()?;
        Ok(true)
    }

    async fn update(&mut self, since_last_us: i64) -> Result<bool, JobError> {
        self.system.refresh_memory();
        self.writer.begin("mem.system", since_last_us)?;
        self.writer
            .set("total", self.system.total_memory() as i64)?;
        self.writer.set("used", self.system.used_memory() as i64)?;
        self.writer
            .set("available", self.system.available_memory() as i64)?;
        self.writer.end()?;
        Ok(true)
    }
}
