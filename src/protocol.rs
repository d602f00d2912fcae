//! Host-agent line protocol.
//!
//! The supervisor talks to the host agent over standard output with a
//! line-oriented chart protocol: one-time `CHART`/`DIMENSION` declarations
//! followed by repeated `BEGIN`/`SET`/`END` frames. [`ProtocolWriter`] is a
//! cloneable handle over the shared sink; every job receives its own clone
//! at construction time and the supervisor keeps one for the framing lines
//! it emits itself.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Priority of the supervisor's per-job runtime charts.
const RUNTIME_CHART_PRIORITY: u32 = 145_000;

/// Cloneable writer over the single output stream.
///
/// All writes go through one shared sink, so a job's chart lines and the
/// supervisor's framing lines form one ordered sequence.
#[derive(Clone)]
pub struct ProtocolWriter {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ProtocolWriter {
    /// Writer over standard output, the channel the host agent reads.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// In-memory writer returning the shared buffer alongside the handle.
    /// Used by tests and embedders that capture the stream.
    pub fn capture() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = Self::new(Box::new(CaptureSink(Arc::clone(&buffer))));
        (writer, buffer)
    }

    fn with_sink<R>(&self, f: impl FnOnce(&mut dyn Write) -> io::Result<R>) -> io::Result<R> {
        let mut guard = self
            .sink
            .lock()
            .map_err(|_| io::Error::other("output sink poisoned"))?;
        f(guard.as_mut())
    }

    /// Write one raw protocol line.
    pub fn line(&self, text: &str) -> io::Result<()> {
        self.with_sink(|w| writeln!(w, "{text}"))
    }

    /// Separator line ending a chart declaration block.
    pub fn blank(&self) -> io::Result<()> {
        self.with_sink(|w| writeln!(w))
    }

    /// Declare a chart: `CHART id '' 'title' 'units' family context type priority update_every`.
    #[allow(clippy::too_many_arguments)]
    pub fn chart(
        &self,
        id: &str,
        title: &str,
        units: &str,
        family: &str,
        context: &str,
        chart_type: &str,
        priority: i64,
        update_every: i64,
    ) -> io::Result<()> {
        self.line(&format!(
            "CHART {id} '' '{title}' '{units}' {family} {context} {chart_type} {priority} {update_every}"
        ))
    }

    /// Declare a dimension of the most recently declared chart.
    pub fn dimension(
        &self,
        id: &str,
        name: &str,
        algorithm: &str,
        multiplier: i64,
        divisor: i64,
    ) -> io::Result<()> {
        self.line(&format!(
            "DIMENSION {id} '{name}' {algorithm} {multiplier} {divisor}"
        ))
    }

    /// Open a value frame for `chart`.
    pub fn begin(&self, chart: &str, since_last_us: i64) -> io::Result<()> {
        self.line(&format!("BEGIN {chart} {since_last_us}"))
    }

    /// Set one dimension value inside an open frame.
    pub fn set(&self, dimension: &str, value: i64) -> io::Result<()> {
        self.line(&format!("SET {dimension} = {value}"))
    }

    /// Close the open value frame.
    pub fn end(&self) -> io::Result<()> {
        self.line("END")
    }

    /// One-time declaration of the self-monitoring chart for `chart_name`,
    /// tracking the wall time each update takes.
    pub fn runtime_chart(&self, chart_name: &str, update_every: i64) -> io::Result<()> {
        self.with_sink(|w| {
            writeln!(
                w,
                "CHART netdata.plugin_pythond_{chart_name} '' 'Execution time for {chart_name} plugin' 'milliseconds / run' python.d netdata.plugin_python area {RUNTIME_CHART_PRIORITY} {update_every}"
            )?;
            writeln!(w, "DIMENSION run_time 'run time' absolute 1 1")?;
            writeln!(w)
        })
    }

    /// Runtime frame emitted after each successful update.
    pub fn runtime_frame(
        &self,
        chart_name: &str,
        since_last_us: i64,
        run_time_ms: i64,
    ) -> io::Result<()> {
        self.with_sink(|w| {
            writeln!(w, "BEGIN netdata.plugin_pythond_{chart_name} {since_last_us}")?;
            writeln!(w, "SET run_time = {run_time_ms}")?;
            writeln!(w, "END")
        })
    }

    /// Tell the host agent to stop relaunching the plugin.
    pub fn disable(&self) -> io::Result<()> {
        self.with_sink(|w| {
            writeln!(w, "DISABLE")?;
            w.flush()
        })
    }

    pub fn flush(&self) -> io::Result<()> {
        self.with_sink(|w| w.flush())
    }
}

impl std::fmt::Debug for ProtocolWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolWriter").finish_non_exhaustive()
    }
}

struct CaptureSink(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::other("capture buffer poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
