//! Collector module contract and loading.
//!
//! Collectors are statically linked and registered by name; the modules
//! directory is still consulted so the set of active collectors follows the
//! same filesystem convention the host agent installs (`<name>.chart.py`
//! files). A module is an opaque factory producing one job runtime per
//! configured job.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::debug;

use crate::protocol::ProtocolWriter;
use crate::settings::MODULE_SUFFIX;

mod loadavg;
mod meminfo;
mod tcpcheck;

pub use loadavg::Loadavg;
pub use meminfo::Meminfo;
pub use tcpcheck::TcpCheck;

/// Failure constructing a job from its configuration.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The configuration does not deserialize into the module's config type.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Any other construction failure.
    #[error("{0}")]
    Failed(String),
}

/// Failure of a job operation.
#[derive(Debug, Error)]
pub enum JobError {
    /// The module does not provide this operation.
    #[error("not implemented")]
    NotImplemented,

    /// Writing to the host agent failed.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    /// Any other runtime failure.
    #[error("{0}")]
    Failed(String),
}

/// One live job produced by a module's constructor.
///
/// The supervisor drives the three operations and interprets their results.
/// A job emits its own chart lines through the writer it was constructed
/// with; `Ok(false)` reports a recoverable failure, an error stops the job.
#[async_trait]
pub trait JobRuntime: Send {
    /// Probe prerequisites once before scheduling.
    async fn check(&mut self) -> Result<bool, JobError>;

    /// Emit the job's one-time chart declarations.
    async fn create(&mut self) -> Result<bool, JobError>;

    /// Produce one round of metric lines. `since_last_us` is the wall time
    /// elapsed since the previous update in microseconds, or 0 on the first
    /// update of the process.
    async fn update(&mut self, since_last_us: i64) -> Result<bool, JobError>;
}

/// A loadable collector module.
pub trait Module: Send + Sync {
    /// Module name, equal to the file stem it is discovered by.
    fn name(&self) -> &'static str;

    /// Module-declared default for a scheduling key, if any.
    fn attribute(&self, _key: &str) -> Option<i64> {
        None
    }

    /// Module-declared configuration, used when no config file exists.
    fn default_config(&self) -> Option<Value> {
        None
    }

    /// Construct one job from its materialized configuration.
    fn create_job(
        &self,
        config: &Mapping,
        job_name: Option<&str>,
        writer: ProtocolWriter,
    ) -> Result<Box<dyn JobRuntime>, ModuleError>;
}

/// Name-keyed set of statically linked modules.
pub struct Registry {
    modules: HashMap<&'static str, Arc<dyn Module>>,
}

impl Registry {
    /// Registry of the collectors compiled into this binary.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Loadavg));
        registry.register(Arc::new(Meminfo));
        registry.register(Arc::new(TcpCheck));
        registry
    }

    /// Empty registry; callers register their own modules.
    pub fn empty() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Add a module, replacing any previous module of the same name.
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name(), module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The modules directory does not exist.
    #[error("cannot find modules directory {0}")]
    DirectoryMissing(PathBuf),

    /// The modules directory could not be listed.
    #[error("cannot read modules directory {0}: {1}")]
    DirectoryUnreadable(PathBuf, std::io::Error),

    /// An explicitly selected module is missing or unregistered.
    #[error("cannot load module {0}")]
    SelectedUnavailable(String),
}

/// Load the modules to run.
///
/// An explicit selection demands success: a selected module that is missing
/// or unregistered is fatal. Discovery tolerates individual failures and
/// skips them. Disabled names are filtered in both modes; a selection
/// consisting only of disabled names stays a selection (no fallback to
/// discovery), and loading nothing is the caller's problem.
pub fn load_modules(
    dir: &Path,
    selection: &[String],
    disabled: &HashSet<String>,
    registry: &Registry,
) -> Result<Vec<Arc<dyn Module>>, LoadError> {
    if !dir.is_dir() {
        return Err(LoadError::DirectoryMissing(dir.to_path_buf()));
    }

    let mut modules = Vec::new();
    if !selection.is_empty() {
        for name in selection {
            if disabled.contains(name) {
                debug!("module {name} is disabled");
                continue;
            }
            match resolve(dir, name, registry) {
                Some(module) => modules.push(module),
                None => return Err(LoadError::SelectedUnavailable(name.clone())),
            }
        }
    } else {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| LoadError::DirectoryUnreadable(dir.to_path_buf(), e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_suffix(MODULE_SUFFIX))
                    .map(str::to_owned)
            })
            .collect();
        names.sort();
        for name in names {
            if disabled.contains(&name) {
                debug!("module {name} is disabled");
                continue;
            }
            match registry.get(&name) {
                Some(module) => modules.push(module),
                None => debug!("cannot load module {name}, skipping"),
            }
        }
    }
    Ok(modules)
}

fn resolve(dir: &Path, name: &str, registry: &Registry) -> Option<Arc<dyn Module>> {
    if !dir.join(format!("{name}{MODULE_SUFFIX}")).is_file() {
        return None;
    }
    registry.get(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubModule(&'static str);

    impl Module for StubModule {
        fn name(&self) -> &'static str {
            self.0
        }

        fn create_job(
            &self,
            _config: &Mapping,
            _job_name: Option<&str>,
            _writer: ProtocolWriter,
        ) -> Result<Box<dyn JobRuntime>, ModuleError> {
            Err(ModuleError::Failed("stub".to_string()))
        }
    }

    fn registry_of(names: &[&'static str]) -> Registry {
        let mut registry = Registry::empty();
        for name in names {
            registry.register(Arc::new(StubModule(name)));
        }
        registry
    }

    fn touch(dir: &Path, file: &str) {
        std::fs::write(dir.join(file), "").unwrap();
    }

    #[test]
    fn test_discovery_skips_unregistered_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "foo.chart.py");
        touch(dir.path(), "bar.chart.py");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "xchart.py");

        let registry = registry_of(&["foo"]);
        let modules =
            load_modules(dir.path(), &[], &HashSet::new(), &registry).unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["foo"]);
    }

    #[test]
    fn test_discovery_requires_exact_suffix() {
        let dir = tempfile::tempdir().unwrap();
        // Only letters from the suffix, but not the suffix itself.
        touch(dir.path(), "trapchy");
        touch(dir.path(), "real.chart.py");

        let registry = registry_of(&["trapchy", "real"]);
        let modules =
            load_modules(dir.path(), &[], &HashSet::new(), &registry).unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["real"]);
    }

    #[test]
    fn test_discovery_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "zeta.chart.py");
        touch(dir.path(), "alpha.chart.py");

        let registry = registry_of(&["zeta", "alpha"]);
        let modules =
            load_modules(dir.path(), &[], &HashSet::new(), &registry).unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_discovery_honors_disable_list() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "foo.chart.py");

        let registry = registry_of(&["foo"]);
        let disabled: HashSet<String> = ["foo".to_string()].into();
        let modules = load_modules(dir.path(), &[], &disabled, &registry).unwrap();
        assert!(modules.is_empty());
    }

    #[test]
    fn test_selection_demands_success() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "foo.chart.py");

        let registry = registry_of(&["foo"]);
        let selection = vec!["foo".to_string(), "missing".to_string()];
        let result = load_modules(dir.path(), &selection, &HashSet::new(), &registry);
        assert!(matches!(result, Err(LoadError::SelectedUnavailable(name)) if name == "missing"));
    }

    #[test]
    fn test_selection_requires_registered_module() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ghost.chart.py");

        let registry = registry_of(&[]);
        let selection = vec!["ghost".to_string()];
        let result = load_modules(dir.path(), &selection, &HashSet::new(), &registry);
        assert!(matches!(result, Err(LoadError::SelectedUnavailable(_))));
    }

    #[test]
    fn test_selected_but_disabled_is_filtered_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "foo.chart.py");

        let registry = registry_of(&["foo"]);
        let selection = vec!["foo".to_string()];
        let disabled: HashSet<String> = ["foo".to_string()].into();
        let modules = load_modules(dir.path(), &selection, &disabled, &registry).unwrap();
        assert!(modules.is_empty());
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let registry = registry_of(&[]);
        let result = load_modules(&missing, &[], &HashSet::new(), &registry);
        assert!(matches!(result, Err(LoadError::DirectoryMissing(_))));
    }

    #[test]
    fn test_registry_replaces_same_name() {
        let mut registry = registry_of(&["foo"]);
        registry.register(Arc::new(StubModule("foo")));
        assert!(registry.get("foo").is_some());
        assert!(registry.get("bar").is_none());
    }
}
