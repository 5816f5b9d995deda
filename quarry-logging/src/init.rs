use anyhow::Result;
use quarry_config::{LogFormat, LoggingConfig, QuarryConfig};
use tracing_subscriber::EnvFilter;

/// Filter directive for a logging config, raised by the worker's verbosity flags.
pub fn filter_directive(config: &LoggingConfig, verbose: bool, very_verbose: bool) -> String {
    match &config.filter {
        Some(filter) => filter.trim().to_string(),
        None => config
            .level
            .for_verbosity(verbose, very_verbose)
            .as_str()
            .to_string(),
    }
}

/// Initialize logging for a worker process from the full configuration
pub fn init_worker_logging(config: &QuarryConfig) -> Result<()> {
    let directive = filter_directive(&config.logging, config.worker.verbose, config.worker.very_verbose);
    init_with_directive(&directive, config.logging.format)
}

/// Initialize logging from the logging domain alone
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    init_with_directive(&filter_directive(config, false, false), config.format)
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    init_with_directive(log_level, LogFormat::Text)
}

fn init_with_directive(directive: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_new(directive)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Use try_init to avoid panic if global subscriber already set
    let installed = match format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}
