//! Subscriber installation installs a process-wide default, so it gets its
//! own test binary.

use tiger_rig::config::RigConfig;
use tiger_rig::logging::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn init_is_idempotent() {
    let config = TracingConfig::new(Level::WARN)
        .with_format(OutputFormat::Json)
        .with_span_events(false);

    assert!(logging::init(config.clone()).is_ok());
    assert!(logging::init(config).is_ok());
    assert!(logging::init_from_config(&RigConfig::default()).is_ok());
}

#[test]
fn invalid_level_is_rejected_before_install() {
    let mut config = RigConfig::default();
    config.application.log_level = "chatty".to_string();
    assert!(logging::init_from_config(&config).is_err());
}
