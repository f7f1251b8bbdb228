//! tracing setup: rolling file output, plus stdout in text mode

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

fn rotation(name: &str) -> Rotation {
    match name {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// Filter used when `RUST_LOG` is unset. Driver chatter (sqlx statements,
/// reqwest/hyper connection logs) stays at warn unless tracing is enabled.
fn default_directives(config: &AppConfig) -> String {
    if config.enable_tracing {
        config.log_level.clone()
    } else {
        format!("{},sqlx=warn,hyper=warn,reqwest=warn", config.log_level)
    }
}

pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // JSON lines keep targets and span context for log search
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(writer).with_ansi(false))
            .with(fmt::layer().with_target(false))
            .init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enable_tracing: bool) -> AppConfig {
        let mut config = AppConfig::from_yaml(
            r#"
log_level: "debug"
log_dir: "./logs"
log_file: "payout.log"
use_json: false
rotation: "daily"
enable_tracing: false
postgres_url: "postgres://localhost/payouts"
gateway:
  base_url: "https://api.gateway.test"
  api_key: "sk_test"
  platform_account_id: "acct_platform"
"#,
        )
        .unwrap();
        config.enable_tracing = enable_tracing;
        config
    }

    #[test]
    fn test_driver_logs_quiet_unless_tracing() {
        assert_eq!(
            default_directives(&config(false)),
            "debug,sqlx=warn,hyper=warn,reqwest=warn"
        );
        assert_eq!(default_directives(&config(true)), "debug");
    }

    #[test]
    fn test_unknown_rotation_never_rolls() {
        assert_eq!(rotation("daily"), Rotation::DAILY);
        assert_eq!(rotation("weekly"), Rotation::NEVER);
    }
}
