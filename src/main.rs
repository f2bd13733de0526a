//! `portbroker` binary entrypoint.
//!
//! Starts the gateway using configuration from environment variables.

use portbroker::api_proxy::run_server_from_env;

#[tokio::main]
async fn main() {
    // Respect `RUST_LOG` if set; otherwise default to info.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run_server_from_env().await {
        log::error!("portbroker stopped: {}", e);
        std::process::exit(1);
    }
}
