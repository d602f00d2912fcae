//! Supervisor logging.
//!
//! The host agent reads the plugin's standard error as lines of the form
//! `<program> <LEVEL>:  <message>`. A custom event formatter produces that
//! shape; `DEBUG` lines are filtered out unless debug mode is on.

use std::fmt;
use std::io;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Event formatter producing the host-agent stderr line shape.
struct HostFormat {
    program: String,
}

impl<S, N> FormatEvent<S, N> for HostFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = *event.metadata().level();
        // The host protocol knows DEBUG, INFO, ERROR and FATAL only; WARN
        // folds into ERROR and TRACE into DEBUG. FATAL is written by the
        // exit helper, never through a tracing event.
        let label = if level == Level::ERROR || level == Level::WARN {
            "ERROR"
        } else if level == Level::INFO {
            "INFO"
        } else {
            "DEBUG"
        };
        write!(writer, "{} {}:  ", self.program, label)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber. `DEBUG` lines are emitted only when
/// `debug` is set.
pub fn init(program: &str, debug: bool) {
    let filter = EnvFilter::new(if debug { "debug" } else { "info" });
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .event_format(HostFormat {
                    program: program.to_string(),
                }),
        )
        .init();
}

/// Write a `FATAL` line directly to standard error. Fatal conditions end
/// the process, so this bypasses the subscriber.
pub fn fatal(program: &str, message: &str) {
    eprintln!("{program} FATAL:  {message}");
}
