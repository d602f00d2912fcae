//! Job-configuration materialization.
//!
//! Each module's configuration document is flattened into one or more job
//! configurations. The three scheduling keys are resolved per key with a
//! fixed precedence: the value at the top level of the document, then the
//! attribute of the same name declared on the module, then the process-wide
//! base configuration. A document whose remaining top-level values include
//! a mapping configures multiple named jobs; anything else configures a
//! single anonymous job.

use serde_yaml::{Mapping, Value};
use tracing::{debug, error};

use crate::modules::Module;
use crate::settings::{BaseConfig, REQUIRED_KEYS};

/// One job's name and configuration body.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Job name; `None` for the single job of a single-job module.
    pub name: Option<String>,
    /// Configuration mapping handed to the module's job constructor.
    /// Always carries the three scheduling keys.
    pub config: Mapping,
}

/// All jobs materialized for one module, in document order.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    pub jobs: Vec<JobSpec>,
}

/// Coerce a scalar to an integer the way the scheduling keys expect.
/// Strings holding integers count; everything else does not.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Flatten a module's configuration document into its job configurations.
///
/// `doc` is the parsed per-module file, if one existed; a module-declared
/// config stands in when it did not. With neither, the module gets a single
/// job configured from its attributes and the base configuration alone.
pub fn materialize(module: &dyn Module, doc: Option<Value>, base: &BaseConfig) -> ModuleConfig {
    let mut mapping = match doc.or_else(|| module.default_config()) {
        Some(Value::Mapping(mapping)) => mapping,
        Some(_) => {
            error!(
                "{}: configuration root is not a mapping, using defaults",
                module.name()
            );
            Mapping::new()
        }
        None => Mapping::new(),
    };

    // Per-module defaults for the scheduling keys. A top-level value is
    // consumed even when it fails integer coercion.
    let defaults: Vec<(&str, i64)> = REQUIRED_KEYS
        .iter()
        .map(|&key| {
            let from_doc = mapping
                .remove(Value::String(key.to_string()))
                .as_ref()
                .and_then(coerce_int);
            let value = from_doc
                .or_else(|| module.attribute(key))
                .or_else(|| base.get(key))
                .unwrap_or_default();
            (key, value)
        })
        .collect();

    let multi_job = mapping.values().any(Value::is_mapping);

    let mut jobs = Vec::new();
    if multi_job {
        for (key, value) in mapping {
            let Value::Mapping(mut job) = value else {
                continue;
            };
            let Some(name) = key.as_str().map(str::to_owned) else {
                debug!("{}: ignoring non-string job name", module.name());
                continue;
            };
            for (key, value) in &defaults {
                let key = Value::String((*key).to_string());
                if !job.contains_key(&key) {
                    job.insert(key, Value::from(*value));
                }
            }
            jobs.push(JobSpec {
                name: Some(name),
                config: job,
            });
        }
    } else {
        let mut job = mapping;
        for (key, value) in &defaults {
            job.insert(Value::String((*key).to_string()), Value::from(*value));
        }
        jobs.push(JobSpec { name: None, config: job });
    }

    ModuleConfig { jobs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{JobRuntime, ModuleError};
    use crate::protocol::ProtocolWriter;

    struct TestModule {
        attributes: Vec<(&'static str, i64)>,
        default_config: Option<&'static str>,
    }

    impl TestModule {
        fn plain() -> Self {
            Self {
                attributes: Vec::new(),
                default_config: None,
            }
        }
    }

    impl Module for TestModule {
        fn name(&self) -> &'static str {
            "test"
        }

        fn attribute(&self, key: &str) -> Option<i64> {
            self.attributes
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| *value)
        }

        fn default_config(&self) -> Option<Value> {
            self.default_config
                .map(|text| serde_yaml::from_str(text).unwrap())
        }

        fn create_job(
            &self,
            _config: &Mapping,
            _job_name: Option<&str>,
            _writer: ProtocolWriter,
        ) -> Result<Box<dyn JobRuntime>, ModuleError> {
            Err(ModuleError::Failed("not constructible".to_string()))
        }
    }

    fn doc(text: &str) -> Option<Value> {
        Some(serde_yaml::from_str(text).unwrap())
    }

    fn key_of(config: &Mapping, key: &str) -> Option<i64> {
        config
            .get(Value::String(key.to_string()))
            .and_then(coerce_int)
    }

    #[test]
    fn test_empty_document_uses_base_defaults() {
        let base = BaseConfig::default();
        let config = materialize(&TestModule::plain(), None, &base);

        assert_eq!(config.jobs.len(), 1);
        let job = &config.jobs[0];
        assert!(job.name.is_none());
        assert_eq!(key_of(&job.config, "update_every"), Some(1));
        assert_eq!(key_of(&job.config, "priority"), Some(90_000));
        assert_eq!(key_of(&job.config, "retries"), Some(10));
    }

    #[test]
    fn test_document_value_beats_attribute_beats_base() {
        let base = BaseConfig::default();
        let module = TestModule {
            attributes: vec![("update_every", 7), ("priority", 500)],
            default_config: None,
        };
        let config = materialize(&module, doc("update_every: 3\n"), &base);

        let job = &config.jobs[0].config;
        assert_eq!(key_of(job, "update_every"), Some(3)); // document
        assert_eq!(key_of(job, "priority"), Some(500)); // attribute
        assert_eq!(key_of(job, "retries"), Some(10)); // base
    }

    #[test]
    fn test_coercion_failure_falls_through() {
        let base = BaseConfig::default();
        let module = TestModule {
            attributes: vec![("update_every", 7)],
            default_config: None,
        };
        let config = materialize(&module, doc("update_every: fast\n"), &base);

        let job = &config.jobs[0].config;
        assert_eq!(key_of(job, "update_every"), Some(7));
        // The unparsable value was consumed, not kept in the body.
        assert_eq!(
            job.get(Value::String("update_every".to_string())),
            Some(&Value::from(7))
        );
    }

    #[test]
    fn test_string_integer_coerces() {
        let base = BaseConfig::default();
        let config = materialize(&TestModule::plain(), doc("update_every: '4'\n"), &base);
        assert_eq!(key_of(&config.jobs[0].config, "update_every"), Some(4));
    }

    #[test]
    fn test_single_job_keeps_body() {
        let base = BaseConfig::default();
        let config = materialize(
            &TestModule::plain(),
            doc("update_every: 2\nhost: 127.0.0.1\nport: 6379\n"),
            &base,
        );

        assert_eq!(config.jobs.len(), 1);
        let job = &config.jobs[0].config;
        assert_eq!(
            job.get(Value::String("host".to_string())),
            Some(&Value::String("127.0.0.1".to_string()))
        );
        assert_eq!(key_of(job, "update_every"), Some(2));
        assert_eq!(key_of(job, "retries"), Some(10));
    }

    #[test]
    fn test_multi_job_fills_missing_keys() {
        let base = BaseConfig::default();
        let config = materialize(
            &TestModule::plain(),
            doc("jobA:\n  update_every: 1\njobB:\n  update_every: 5\n  retries: 2\n"),
            &base,
        );

        assert_eq!(config.jobs.len(), 2);
        let job_a = &config.jobs[0];
        let job_b = &config.jobs[1];
        assert_eq!(job_a.name.as_deref(), Some("jobA"));
        assert_eq!(job_b.name.as_deref(), Some("jobB"));
        assert_eq!(key_of(&job_a.config, "update_every"), Some(1));
        assert_eq!(key_of(&job_a.config, "retries"), Some(10));
        assert_eq!(key_of(&job_b.config, "update_every"), Some(5));
        assert_eq!(key_of(&job_b.config, "retries"), Some(2));
        assert_eq!(key_of(&job_b.config, "priority"), Some(90_000));
    }

    #[test]
    fn test_multi_job_top_level_default_applies() {
        let base = BaseConfig::default();
        let config = materialize(
            &TestModule::plain(),
            doc("update_every: 9\njobA: {}\nscalar: 1\n"),
            &base,
        );

        // Non-mapping leftovers are dropped in multi-job mode.
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(key_of(&config.jobs[0].config, "update_every"), Some(9));
    }

    #[test]
    fn test_module_default_config_stands_in() {
        let base = BaseConfig::default();
        let module = TestModule {
            attributes: Vec::new(),
            default_config: Some("jobA:\n  host: localhost\n"),
        };
        let config = materialize(&module, None, &base);

        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].name.as_deref(), Some("jobA"));
    }

    #[test]
    fn test_non_mapping_root_uses_defaults() {
        let base = BaseConfig::default();
        let config = materialize(&TestModule::plain(), doc("- a\n- b\n"), &base);

        assert_eq!(config.jobs.len(), 1);
        assert_eq!(key_of(&config.jobs[0].config, "update_every"), Some(1));
    }

    #[test]
    fn test_explicit_defaults_match_empty_file() {
        let base = BaseConfig::default();
        let explicit = materialize(
            &TestModule::plain(),
            doc("update_every: 1\npriority: 90000\nretries: 10\n"),
            &base,
        );
        let empty = materialize(&TestModule::plain(), doc("{}\n"), &base);

        assert_eq!(explicit.jobs.len(), empty.jobs.len());
        assert_eq!(explicit.jobs[0].config, empty.jobs[0].config);
    }
}
