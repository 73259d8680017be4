use std::path::PathBuf;
use std::process::ExitCode;

use tracing::info;

use estuary::config;
use estuary::server::Server;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let path = PathBuf::from(&config_path);

    if !path.exists() {
        if let Err(e) = config::write_default(&path) {
            eprintln!("failed to create default config at {config_path}: {e}");
            return ExitCode::FAILURE;
        }
        eprintln!("No config found at {config_path}; wrote a default one.");
        eprintln!("Please edit it with your GitHub OAuth Client ID and start again.");
        return ExitCode::FAILURE;
    }

    let mut config = match config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // ESTUARY_BIND=host:port overrides [server] for containerized runs.
    if let Ok(bind) = std::env::var("ESTUARY_BIND") {
        if let Some((host, port)) = bind.rsplit_once(':') {
            match port.parse() {
                Ok(port) => {
                    config.server.host = host.to_string();
                    config.server.port = port;
                }
                Err(_) => eprintln!("ignoring malformed ESTUARY_BIND: {bind}"),
            }
        }
    }

    info!("estuary — one room, many servers");
    if !config.federation.peers.is_empty() {
        info!(peers = %config.federation.peers.join(", "), "federating");
    }

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("could not bind listener: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = server.run_until_shutdown().await {
        eprintln!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
