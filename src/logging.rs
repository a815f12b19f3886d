/// Logging setup with verbose mode and optional JSON lines
///
/// `RUST_LOG` wins over the configured level; `--verbose` raises it to debug.
use crate::config::LoggingConfig;
use env_logger::{Builder, Env};
use std::io::Write;

/// Output layout of log records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Filter string handed to env_logger when RUST_LOG is unset
pub fn default_filter(config: &LoggingConfig, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        config.level.to_lowercase()
    }
}

/// Install the global logger. Safe to call more than once (later calls are ignored).
pub fn init(config: &LoggingConfig, verbose: bool) {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter(config, verbose)));

    if LogFormat::parse(&config.format) == LogFormat::Json {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "ts": chrono::Utc::now().to_rfc3339(),
                "level": record.level().as_str(),
                "target": record.target(),
                "msg": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        });
    }

    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Text);
    }

    #[test]
    fn test_verbose_overrides_level() {
        let config = LoggingConfig {
            level: "WARN".to_string(),
            format: "text".to_string(),
        };
        assert_eq!(default_filter(&config, false), "warn");
        assert_eq!(default_filter(&config, true), "debug");
    }
}
