pub mod api;
#[cfg(feature = "gstreamer")]
pub mod backend;
pub mod core;

/// Installs `env_logger` once; `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
