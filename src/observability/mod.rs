use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::session::SessionReport;

/// Map a configured log level to an `EnvFilter` directive.
///
/// Returns `None` for `DISABLED`. `WARNING` maps to `WARN` and `CRITICAL`
/// to `ERROR`; anything else is passed through upper-cased.
#[must_use]
pub fn level_directive(log_level: &str) -> Option<String> {
    let level = log_level.trim().to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Initialize the tracing subscriber with the configured log level.
///
/// Nothing is installed for `DISABLED`; an unparseable level falls back to
/// `INFO`.
pub fn init_tracing(log_level: &str) {
    let Some(directive) = level_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Log the summary of a closed stream.
pub fn log_stream_complete(report: &SessionReport, bytes: u64) {
    let message = &report.message;
    info!(
        session_id = %message.session_id(),
        agent_id = %message.agent_id(),
        outcome = report.outcome.label(),
        tokens = report.tokens,
        suppressed = report.suppressed,
        bytes,
        chars = message.content().chars().count(),
        elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        "stream complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive_mapping() {
        assert_eq!(level_directive("DISABLED"), None);
        assert_eq!(level_directive("disabled"), None);
        assert_eq!(level_directive("WARNING").as_deref(), Some("WARN"));
        assert_eq!(level_directive("CRITICAL").as_deref(), Some("ERROR"));
        assert_eq!(level_directive("debug").as_deref(), Some("DEBUG"));
        assert_eq!(level_directive(" INFO ").as_deref(), Some("INFO"));
    }
}
