use sloggers::{Config, LoggerConfig};

/// Builds the default terminal logger used by the demo binaries and by any test
/// that wants real log output instead of `slog::Discard`.
pub fn default_logger() -> slog::Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("default logger config is a fixed, known-good literal");

    config.build_logger().expect("terminal logger always builds")
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::info;

    #[test]
    fn builds_a_usable_logger() {
        let log = default_logger();
        info!(log, "wire crate logging smoke test");
    }
}
