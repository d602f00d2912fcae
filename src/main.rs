//! python.d.plugin entry point.
//!
//! The host agent launches this binary as a child process and reads chart
//! declarations and value frames from its standard output. Exit paths emit
//! the `DISABLE` line first so the host does not relaunch the plugin: exit
//! code 0 when the configuration disables the plugin voluntarily, 1 on any
//! fatal condition.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use pythond::config::read_document;
use pythond::modules::{Registry, load_modules};
use pythond::protocol::ProtocolWriter;
use pythond::settings::{BaseConfig, Environment, Options, PluginConf};
use pythond::supervisor::{Supervisor, spawn_jobs};

/// Supervisor for python.d-style collector modules.
#[derive(Parser, Debug)]
#[command(name = "python.d.plugin", version, about, long_about = None)]
struct Cli {
    /// Positional tokens: `check`, `debug`, `all`, a module name, or an
    /// update period in seconds. Unrecognized tokens are ignored.
    tokens: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = Environment::resolve();
    let mut base = BaseConfig::from_env();
    let opts = Options::from_tokens(&cli.tokens, &env.modules_dir, &mut base);

    // The plugin-level conf decides the debug flag, so it is read before
    // the subscriber goes up; a read failure is reported right after.
    let (conf_doc, conf_error) = match read_document(&env.plugin_conf()) {
        Ok(doc) => (doc, None),
        Err(e) => (None, Some(e)),
    };
    let conf = PluginConf::apply(conf_doc, &mut base);
    let debug = opts.debug || conf.debug == Some(true);
    pythond::logging::init(&env.program, debug);

    if let Some(e) = conf_error {
        error!(
            "cannot use configuration file {}: {}",
            env.plugin_conf().display(),
            e
        );
    }

    let writer = ProtocolWriter::stdout();
    if !conf.enabled {
        return disable(
            &writer,
            &env.program,
            "disabled in configuration file.",
            ExitCode::SUCCESS,
        );
    }

    let registry = Registry::builtin();
    let modules = match load_modules(&env.modules_dir, &opts.selected, &conf.disabled, &registry) {
        Ok(modules) => modules,
        Err(e) => return disable(&writer, &env.program, &e.to_string(), ExitCode::FAILURE),
    };
    if modules.is_empty() {
        return disable(&writer, &env.program, "no modules loaded.", ExitCode::FAILURE);
    }
    info!("loaded {} module(s)", modules.len());

    let debug_override = debug && opts.override_update_every;
    let jobs = spawn_jobs(&modules, &env, &base, debug_override, &writer);
    let mut supervisor = Supervisor::new(jobs, writer.clone());
    supervisor.check_jobs().await;
    supervisor.create_charts().await;

    let fatal = supervisor.run().await;
    disable(&writer, &env.program, &fatal.message, ExitCode::FAILURE)
}

/// Emit the `DISABLE` line so the host stops relaunching the plugin, log
/// the reason, and hand back the exit code.
fn disable(writer: &ProtocolWriter, program: &str, message: &str, code: ExitCode) -> ExitCode {
    // If stdout is gone the host is gone too; stderr still carries the reason.
    let _ = writer.disable();
    pythond::logging::fatal(program, message);
    code
}
