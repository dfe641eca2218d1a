use tracing_subscriber::EnvFilter;

/// The crates that make up this service, for verbosity filtering.
const SERVICE_TARGETS: &[&str] = &[
    "forcebridge",
    "forcebridge_common",
    "forcebridge_salesforce",
    "forcebridge_amqp",
    "forcebridge_runner",
];

/// Initialize structured logging with tracing-subscriber.
///
/// Verbosity 1 logs the service at INFO, 2 at DEBUG, 3 turns on DEBUG for
/// every dependency as well. `RUST_LOG`, when set, overrides all of this.
pub fn init(verbosity: u8) {
    let directives = match verbosity {
        1 => service_filter("info"),
        2 => service_filter("debug"),
        _ => "debug".to_string(),
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

fn service_filter(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        SERVICE_TARGETS
            .iter()
            .map(|target| format!("{target}={level}")),
    );
    directives.join(",")
}
