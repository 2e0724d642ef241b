use clap::Parser;
use peregrine_core::Config;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Server configuration, settable by flag or environment.
#[derive(Debug, Parser)]
#[clap(name = "peregrine", about = "A native HTTP request-dispatch engine")]
pub struct Args {
    #[clap(long, default_value = "peregrine=info,warn", env = "PEREGRINE_LOG")]
    pub log_level: String,

    #[clap(long, default_value = "0.0.0.0:8000")]
    pub addr: SocketAddr,

    /// Terse JSON error bodies without detail or stack traces.
    #[clap(long)]
    pub production: bool,

    /// Treat `/x` and `/x/` as the same path.
    #[clap(long)]
    pub lax_trailing_slash: bool,

    #[clap(long, default_value = "application/json")]
    pub default_error_content_type: String,
}

// === impl Args ===

impl Args {
    /// The core configuration these arguments describe.
    pub fn config(&self) -> Config {
        Config {
            production: self.production,
            strict_trailing_slash: !self.lax_trailing_slash,
            default_error_content_type: self.default_error_content_type.clone(),
        }
    }

    /// Initializes structured logging from the configured filter.
    pub fn init_logging(&self) {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(&self.log_level))
            .init();
    }
}
