//! Shared plumbing for the wavetrap binaries.

/// Match the clap verbosity filter with tracing subscriber log levels.
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

/// Install the fmt subscriber at the level the flags asked for.
pub fn init_logging(filter: log::LevelFilter) {
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(filter))
        .init();
}
