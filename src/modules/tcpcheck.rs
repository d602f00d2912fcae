//! TCP connect-latency collector.
//!
//! Multi-job: each configured job probes one `host:port` endpoint and
//! charts the connection latency in milliseconds. A failed probe is a
//! valid observation and reports `-1`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{JobError, JobRuntime, Module, ModuleError};
use crate::protocol::ProtocolWriter;

/// Default probe timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Latency reported when the probe fails; distinguishes failure from a
/// genuine 0ms connect.
const FAILURE_LATENCY_MS: i64 = -1;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
struct TcpCheckConfig {
    update_every: i64,
    priority: i64,
    host: String,
    port: u16,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

/// Multi-job module probing TCP endpoints.
pub struct TcpCheck;

impl Module for TcpCheck {
    fn name(&self) -> &'static str {
        "tcpcheck"
    }

    // Connection probes are heavier than /proc reads; pace them down
    // unless configured otherwise.
    fn attribute(&self, key: &str) -> Option<i64> {
        (key == "update_every").then_some(5)
    }

    fn create_job(
        &self,
        config: &Mapping,
        job_name: Option<&str>,
        writer: ProtocolWriter,
    ) -> Result<Box<dyn JobRuntime>, ModuleError> {
        let config: TcpCheckConfig = serde_yaml::from_value(Value::Mapping(config.clone()))?;
        let chart = format!("tcpcheck_{}.latency", job_name.unwrap_or("local"));
        Ok(Box::new(TcpCheckJob {
            config,
            chart,
            writer,
        }))
    }
}

struct TcpCheckJob {
    config: TcpCheckConfig,
    chart: String,
    writer: ProtocolWriter,
}

impl TcpCheckJob {
    fn target(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    async fn probe(&self) -> Option<Duration> {
        let started = Instant::now();
        match timeout(
            Duration::from_secs(self.config.timeout),
            TcpStream::connect(self.target()),
        )
        .await
        {
            Ok(Ok(_)) => Some(started.elapsed()),
            Ok(Err(e)) => {
                debug!("tcpcheck {}: connect failed: {}", self.target(), e);
                None
            }
            Err(_) => {
                debug!("tcpcheck {}: connect timed out", self.target());
                None
            }
        }
    }
}

#[async_trait]
impl JobRuntime for TcpCheckJob {
    async fn check(&mut self) -> Result<bool, JobError> {
        Ok(self.probe().await.is_some())
    }

    async fn create(&mut self) -> Result<bool, JobError> {
        let title = format!("TCP connect latency to {}", self.target());
        self.writer.chart(
            &self.chart,
            &title,
            "milliseconds",
            "tcpcheck",
            "tcpcheck.latency",
            "line",
            self.config.priority,
            self.config.update_every,
        )?;
        self.writer
            .dimension("latency", "latency", "absolute", 1, 1)?;
        self.writer.blank()?;
        Ok(true)
    }

    async fn update(&mut self, since_last_us: i64) -> Result<bool, JobError> {
        let latency = match self.probe().await {
            Some(elapsed) => elapsed.as_millis().min(i64::MAX as u128) as i64,
            None => FAILURE_LATENCY_MS,
        };
        self.writer.begin(&self.chart, since_last_us)?;
        self.writer.set("latency", latency)?;
        self.writer.end()?;
        Ok(true)
    }
}
