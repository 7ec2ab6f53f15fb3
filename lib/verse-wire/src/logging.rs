use serdeconv;
use slog::Logger;
use sloggers::{Config, LoggerConfig};

/// Builds the root logger from a TOML-formatted `sloggers` config, falling back to a terminal
/// outputter at debug level when no config is supplied.
pub fn init(config_toml: Option<&str>) -> Logger {
    let toml = config_toml.unwrap_or(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    );

    let config: LoggerConfig =
        serdeconv::from_toml_str(toml).expect("invalid logger configuration");

    config.build_logger().expect("failed to build logger")
}
