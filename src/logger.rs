use std::fmt;

use tracing::debug;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::config::Config;

/// Prints `SPAN_FILTER | LEVEL | message` lines so host logs can be grepped by
/// component.
#[derive(Clone, Copy, Debug, Default)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
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
        let level = event.metadata().level();
        write!(writer, "SPAN_FILTER | {level} | ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn env_filter(config: &Config) -> EnvFilter {
    EnvFilter::default().add_directive(config.log_level.as_level_filter().into())
}

/// Installs a global `tracing` subscriber honouring the configured log level.
///
/// Fails instead of panicking when the host already installed one.
pub fn enable_logging_subsystem(config: &Config) -> Result<(), SetGlobalDefaultError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(config))
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    debug!("Logging subsystem enabled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing::{debug, info, warn};

    use super::*;
    use crate::config::log_level::LogLevel;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().expect("lock poisoned").clone()).expect("utf8 output")
        }
    }

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock poisoned").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(config: &Config, emit: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter(config))
            .with_writer(move || writer.clone())
            .event_format(Formatter)
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        buffer.contents()
    }

    #[test]
    fn test_formatter_prefixes_lines() {
        let output = capture(&Config::default(), || {
            warn!("FILTER | something happened");
        });

        assert_eq!(output, "SPAN_FILTER | WARN | FILTER | something happened\n");
    }

    fn failing_lookup() -> u8 {
        panic!("lookup failed")
    }

    #[test]
    fn test_caught_panic_is_logged_under_subsystem() {
        let mut result = None;
        let output = capture(&Config::default(), || {
            result = Some(catch_panic!("SAMPLER", failing_lookup(), 0));
        });

        assert_eq!(result, Some(0));
        assert_eq!(output, "SPAN_FILTER | ERROR | SAMPLER | Panic caught: lookup failed\n");
    }

    #[test]
    fn test_configured_level_filters_events() {
        let config = Config {
            log_level: LogLevel::Info,
            ..Config::default()
        };
        let output = capture(&config, || {
            debug!("hidden");
            info!("shown");
        });

        assert_eq!(output, "SPAN_FILTER | INFO | shown\n");
    }
}
