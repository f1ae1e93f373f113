//! `tracing` output for environments without stderr.
//!
//! In the browser every event ends up as one `console.log` line, see
//! [`init`]. The sink is a plain function so tests can capture the lines.

use std::io;

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Receives one formatted event, without the trailing newline.
pub type Sink = fn(&str);

/// [`MakeWriter`] handing each event to a [`Sink`].
#[derive(Debug, Clone, Copy)]
pub struct SinkWriter {
    sink: Sink,
}

/// Buffers one event and passes it on when dropped.
pub struct EventWriter {
    sink: Sink,
    buf: Vec<u8>,
}

impl io::Write for EventWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.buf);
        let line = line.trim_end();
        if !line.is_empty() {
            (self.sink)(line);
        }
    }
}

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter {
            sink: self.sink,
            buf: Vec::new(),
        }
    }
}

/// `"warn"`, `"DEBUG"`, ... Unknown names give `WARN`.
pub fn parse_level(name: &str) -> Level {
    name.trim().parse::<Level>().unwrap_or(Level::WARN)
}

/// Subscriber writing events up to `level` to `sink`. No timestamps, the
/// browser console has its own.
pub fn subscriber(sink: Sink, level: Level) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_writer(SinkWriter { sink })
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish()
}

/// Installs the global subscriber. Only the first call has an effect.
pub fn init(sink: Sink, level: Level) {
    if tracing::subscriber::set_global_default(subscriber(sink, level)).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
