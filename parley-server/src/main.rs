use std::path::PathBuf;

use clap::Parser;
use parley_server::{AppState, Directory, serve};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "parley-server", about = "Serves dialogs and contacts over WebSocket RPC")]
struct ServerArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind_address: String,
    /// JSON fixture with `dialogs` and `contacts` arrays.
    #[arg(long, conflicts_with = "generate")]
    fixture: Option<PathBuf>,
    /// Number of dialogs to generate when no fixture is given.
    #[arg(long, default_value_t = 200)]
    generate: usize,
    /// Include the total dialog count in every page.
    #[arg(long)]
    report_count: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = ServerArgs::parse();
    let directory = match &args.fixture {
        Some(path) => match Directory::load(path) {
            Ok(directory) => directory,
            Err(err) => {
                error!("{}", err);
                std::process::exit(1);
            }
        },
        None => Directory::generate(args.generate),
    };
    let directory = if args.report_count {
        directory.with_report_count(true)
    } else {
        directory
    };
    info!(
        dialogs = directory.dialogs.len(),
        contacts = directory.contacts.len(),
        "directory ready"
    );

    let listener = match tokio::net::TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", args.bind_address, err);
            std::process::exit(1);
        }
    };

    info!("rpc server starting on {}", args.bind_address);
    if let Err(err) = serve(listener, AppState::new(directory)).await {
        warn!("rpc server exited: {}", err);
    }
}
