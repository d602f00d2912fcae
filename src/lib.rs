//! Supervisor for python.d-style collector modules.
//!
//! The crate drives a set of statically registered collector modules the
//! way the netdata agent expects its external plugins to behave: modules
//! are discovered through the installed `<name>.chart.py` collector tree,
//! their YAML configuration is materialized into jobs, and every job runs
//! the three-phase lifecycle (check, create, update) on its own periodic
//! schedule, multiplexed onto one stdout chart-protocol stream.
//!
//! # Architecture
//!
//! - [`settings`]: environment resolution, base configuration, CLI tokens
//! - [`config`]: YAML loading and layered job-config materialization
//! - [`modules`]: the collector contract, registry and built-in modules
//! - [`job`] / [`supervisor`]: timetables, phases and the update scheduler
//! - [`protocol`]: the line protocol written to the host agent

pub mod config;
pub mod job;
pub mod logging;
pub mod modules;
pub mod protocol;
pub mod settings;
pub mod supervisor;

pub use job::{Job, Timetable};
pub use modules::{JobError, JobRuntime, LoadError, Module, ModuleError, Registry, load_modules};
pub use protocol::ProtocolWriter;
pub use settings::{BaseConfig, Environment, Options, PluginConf};
pub use supervisor::{Fatal, Outcome, Supervisor, spawn_jobs};
