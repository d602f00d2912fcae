//! Process environment and startup settings.
//!
//! Resolves the modules and configuration directories from the environment,
//! owns the process-wide base configuration, and interprets the positional
//! command-line tokens and the plugin-level `python.d.conf` document.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::config::coerce_int;

/// Filename suffix collector modules are discovered by. Kept for host
/// compatibility with the installed collector tree.
pub const MODULE_SUFFIX: &str = ".chart.py";

/// Plugin-level configuration file under the configuration directory.
pub const PLUGIN_CONF: &str = "python.d.conf";

/// Subdirectory of the configuration directory holding per-module files.
pub const MODULE_CONF_DIR: &str = "python.d";

/// Scheduling keys every materialized job configuration carries.
pub const REQUIRED_KEYS: [&str; 3] = ["update_every", "priority", "retries"];

const DEFAULT_CONFIG_DIR: &str = "/etc/netdata/";
const MODULES_SUBDIR: &str = "python.d";
const PROGRAM_SUFFIX: &str = ".plugin";

/// Directories and identity resolved once at startup.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Directory holding the `<name>.chart.py` collector files.
    pub modules_dir: PathBuf,
    /// Root configuration directory.
    pub config_dir: PathBuf,
    /// Log prefix: the binary's basename with any `.plugin` suffix stripped.
    pub program: String,
}

impl Environment {
    /// Resolve directories and the program name from the process environment.
    pub fn resolve() -> Self {
        let plugins_dir = env::var_os("NETDATA_PLUGINS_DIR")
            .map(PathBuf::from)
            .or_else(|| {
                env::current_exe()
                    .ok()
                    .and_then(|exe| exe.parent().map(Path::to_path_buf))
            })
            .unwrap_or_else(|| PathBuf::from("."));

        let config_dir = env::var_os("NETDATA_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));

        let program = env::current_exe()
            .ok()
            .and_then(|exe| {
                exe.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .map(|name| match name.strip_suffix(PROGRAM_SUFFIX) {
                Some(stem) => stem.to_string(),
                None => name,
            })
            .unwrap_or_else(|| "python.d".to_string());

        Self {
            modules_dir: plugins_dir.join(MODULES_SUBDIR),
            config_dir,
            program,
        }
    }

    /// Path of the plugin-level configuration file.
    pub fn plugin_conf(&self) -> PathBuf {
        self.config_dir.join(PLUGIN_CONF)
    }

    /// Path of a module's configuration file.
    pub fn module_conf(&self, module: &str) -> PathBuf {
        self.config_dir
            .join(MODULE_CONF_DIR)
            .join(format!("{module}.conf"))
    }
}

/// Process-wide scheduling defaults, the lowest layer of every job
/// configuration. Frozen before the first job is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseConfig {
    /// Default update period in seconds.
    pub update_every: i64,
    /// Default chart priority.
    pub priority: i64,
    /// Default consecutive-failure budget.
    pub retries: i64,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            update_every: 1,
            priority: 90_000,
            retries: 10,
        }
    }
}

impl BaseConfig {
    /// Defaults with `update_every` taken from `NETDATA_UPDATE_EVERY` when
    /// it holds a positive integer.
    pub fn from_env() -> Self {
        let mut base = Self::default();
        if let Some(seconds) = env::var("NETDATA_UPDATE_EVERY")
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            && seconds > 0
        {
            base.update_every = seconds;
        }
        base
    }

    /// Look up a scheduling key by name.
    pub fn get(&self, key: &str) -> Option<i64> {
        match key {
            "update_every" => Some(self.update_every),
            "priority" => Some(self.priority),
            "retries" => Some(self.retries),
            _ => None,
        }
    }

    /// Overwrite a scheduling key by name. Unknown keys are rejected.
    pub fn set(&mut self, key: &str, value: i64) -> bool {
        match key {
            "update_every" => self.update_every = value,
            "priority" => self.priority = value,
            "retries" => self.retries = value,
            _ => return false,
        }
        true
    }
}

/// Switches derived from the positional command-line tokens.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Options {
    /// Debug logging requested.
    pub debug: bool,
    /// A positive-integer token replaced the base `update_every`.
    pub override_update_every: bool,
    /// Explicitly selected modules; empty means discovery mode.
    pub selected: Vec<String>,
}

impl Options {
    /// Interpret positional command-line tokens.
    ///
    /// `check` is accepted and ignored; `debug` and `all` switch debug
    /// logging on; a token naming an existing collector file under
    /// `modules_dir` selects that module and switches debug on; a positive
    /// integer replaces the base `update_every`. Anything else is silently
    /// ignored.
    pub fn from_tokens(tokens: &[String], modules_dir: &Path, base: &mut BaseConfig) -> Self {
        let mut opts = Self::default();
        for token in tokens {
            match token.as_str() {
                "check" => {}
                "debug" | "all" => opts.debug = true,
                other => {
                    if modules_dir.join(format!("{other}{MODULE_SUFFIX}")).is_file() {
                        opts.debug = true;
                        if !opts.selected.iter().any(|s| s == other) {
                            opts.selected.push(other.to_string());
                        }
                    } else if let Ok(seconds) = other.parse::<i64>()
                        && seconds > 0
                    {
                        base.update_every = seconds;
                        opts.override_update_every = true;
                    }
                }
            }
        }
        opts
    }
}

/// Directives read from `python.d.conf`.
#[derive(Debug, PartialEq, Eq)]
pub struct PluginConf {
    /// False when the whole plugin is switched off.
    pub enabled: bool,
    /// Value of the `debug` key, when present and boolean.
    pub debug: Option<bool>,
    /// Module names disabled with `<name>: false`.
    pub disabled: HashSet<String>,
}

impl PluginConf {
    /// Fold the plugin-level configuration document into the base config
    /// and collect the module disable list.
    ///
    /// Keys matching base-config entries override them (with integer
    /// coercion); any other top-level key whose value is the boolean false
    /// names a disabled module.
    pub fn apply(doc: Option<Value>, base: &mut BaseConfig) -> Self {
        let mut conf = Self {
            enabled: true,
            debug: None,
            disabled: HashSet::new(),
        };
        let Some(Value::Mapping(mapping)) = doc else {
            return conf;
        };
        for (key, value) in &mapping {
            let Some(key) = key.as_str() else { continue };
            match key {
                "enabled" => {
                    if value.as_bool() == Some(false) {
                        conf.enabled = false;
                    }
                }
                "debug" => conf.debug = value.as_bool(),
                _ if REQUIRED_KEYS.contains(&key) => {
                    if let Some(v) = coerce_int(value) {
                        base.set(key, v);
                    }
                }
                module => {
                    if value.as_bool() == Some(false) {
                        conf.disabled.insert(module.to_string());
                    }
                }
            }
        }
        conf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_base_config_defaults() {
        let base = BaseConfig::default();
        assert_eq!(base.update_every, 1);
        assert_eq!(base.priority, 90_000);
        assert_eq!(base.retries, 10);
    }

    #[test]
    fn test_base_config_key_access() {
        let mut base = BaseConfig::default();
        assert_eq!(base.get("retries"), Some(10));
        assert_eq!(base.get("unknown"), None);
        assert!(base.set("priority", 1000));
        assert_eq!(base.priority, 1000);
        assert!(!base.set("unknown", 1));
    }

    #[test]
    fn test_tokens_debug_and_check() {
        let mut base = BaseConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let opts = Options::from_tokens(&tokens(&["check", "debug"]), dir.path(), &mut base);

        assert!(opts.debug);
        assert!(!opts.override_update_every);
        assert!(opts.selected.is_empty());
        assert_eq!(base, BaseConfig::default());
    }

    #[test]
    fn test_tokens_integer_override() {
        let mut base = BaseConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let opts = Options::from_tokens(&tokens(&["7"]), dir.path(), &mut base);

        assert!(opts.override_update_every);
        assert_eq!(base.update_every, 7);
        // A non-positive integer is an unrecognized token.
        let opts = Options::from_tokens(&tokens(&["0", "-3"]), dir.path(), &mut base);
        assert!(!opts.override_update_every);
        assert_eq!(base.update_every, 7);
    }

    #[test]
    fn test_tokens_module_selection() {
        let mut base = BaseConfig::default();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("foo.chart.py"), "").unwrap();

        let opts = Options::from_tokens(&tokens(&["foo", "foo", "bar"]), dir.path(), &mut base);
        assert!(opts.debug);
        assert_eq!(opts.selected, vec!["foo".to_string()]);
    }

    #[test]
    fn test_tokens_unrecognized_ignored() {
        let mut base = BaseConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let opts = Options::from_tokens(&tokens(&["frobnicate"]), dir.path(), &mut base);
        assert_eq!(opts, Options::default());
    }

    #[test]
    fn test_plugin_conf_disable_and_overrides() {
        let mut base = BaseConfig::default();
        let doc: Value = serde_yaml::from_str(
            "enabled: true\nupdate_every: 3\nretries: 2\ndebug: true\napache: false\nnginx: true\n",
        )
        .unwrap();
        let conf = PluginConf::apply(Some(doc), &mut base);

        assert!(conf.enabled);
        assert_eq!(conf.debug, Some(true));
        assert!(conf.disabled.contains("apache"));
        assert!(!conf.disabled.contains("nginx"));
        assert_eq!(base.update_every, 3);
        assert_eq!(base.retries, 2);
        assert_eq!(base.priority, 90_000);
    }

    #[test]
    fn test_plugin_conf_enabled_false() {
        let mut base = BaseConfig::default();
        let doc: Value = serde_yaml::from_str("enabled: false\n").unwrap();
        let conf = PluginConf::apply(Some(doc), &mut base);
        assert!(!conf.enabled);
    }

    #[test]
    fn test_plugin_conf_absent() {
        let mut base = BaseConfig::default();
        let conf = PluginConf::apply(None, &mut base);
        assert!(conf.enabled);
        assert!(conf.disabled.is_empty());
        assert_eq!(base, BaseConfig::default());
    }

    #[test]
    fn test_environment_from_vars() {
        // SAFETY: this test is the only reader/writer of these variables.
        unsafe {
            env::set_var("NETDATA_PLUGINS_DIR", "/opt/netdata/plugins.d");
            env::set_var("NETDATA_CONFIG_DIR", "/opt/netdata/etc/");
        }
        let environment = Environment::resolve();
        assert_eq!(
            environment.modules_dir,
            PathBuf::from("/opt/netdata/plugins.d/python.d")
        );
        assert_eq!(
            environment.plugin_conf(),
            PathBuf::from("/opt/netdata/etc/python.d.conf")
        );
        assert_eq!(
            environment.module_conf("apache"),
            PathBuf::from("/opt/netdata/etc/python.d/apache.conf")
        );
        // SAFETY: cleanup of test-specific variables.
        unsafe {
            env::remove_var("NETDATA_PLUGINS_DIR");
            env::remove_var("NETDATA_CONFIG_DIR");
        }
    }
}
