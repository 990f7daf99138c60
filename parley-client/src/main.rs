use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use clap::Parser;
use parley_client::{
    config::{self, ClientConfig},
    instance::{
        ChannelName, ChannelScope, Coordinator, ForwardRequest, PendingActions, StartOutcome,
    },
    runtime::{RuntimeOptions, run_client_runtime},
    storage::JsonFileStorage,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug)]
#[command(name = "parley", about = "Headless Parley client")]
struct ClientArgs {
    #[arg(long)]
    server_url: Option<String>,
    /// Directory the single-instance channel is derived from.
    #[arg(long)]
    working_dir: Option<PathBuf>,
    /// Discriminator for running several independent clients side by side.
    #[arg(long)]
    instance: Option<String>,
    /// Use the short channel name of sandboxed builds.
    #[arg(long, default_value_t = false)]
    sandboxed: bool,
    /// Skip single-instance coordination entirely.
    #[arg(long, default_value_t = false)]
    many_instance: bool,
    #[arg(long = "send", value_name = "PATH")]
    send: Vec<String>,
    #[arg(long, value_name = "URL")]
    open: Option<String>,
    #[arg(long, value_name = "TEXT")]
    filter: Option<String>,
    #[arg(long, default_value_t = false)]
    preload_all: bool,
    /// Exit after the initial sync instead of staying connected.
    #[arg(long, default_value_t = false)]
    once: bool,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Persist the effective configuration.
    #[arg(long, default_value_t = false)]
    save_config: bool,
}

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

fn main() {
    init_logging();

    let args = ClientArgs::parse();
    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("config resolution failed: {}", err);
            eprintln!("parley: {err}");
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to build tokio runtime: {}", err);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(args, config));
    std::process::exit(code);
}

fn resolve_config(args: &ClientArgs) -> Result<ClientConfig, String> {
    let path = args.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = match config::load_config(&path) {
        Ok(Some(cfg)) => cfg,
        Ok(None) => ClientConfig::default(),
        Err(err) => {
            warn!("saved config invalid; using defaults: {}", err);
            ClientConfig::default()
        }
    };

    if let Some(server_url) = &args.server_url {
        cfg.server_url = server_url.clone();
    }
    if let Some(instance) = &args.instance {
        cfg.instance = instance.clone();
    }
    if args.preload_all {
        cfg.preload_all = true;
    }
    config::validate_config(&cfg)?;

    if args.save_config {
        config::save_config_with_retry(&path, &cfg)
            .map_err(|err| format!("failed to save config {}: {err}", path.display()))?;
        info!(path = %path.display(), "config saved");
    }
    Ok(cfg)
}

async fn run(args: ClientArgs, config: ClientConfig) -> i32 {
    let actions = PendingActions::new();
    actions.offer_send_paths(args.send.clone());
    if let Some(url) = args.open.clone() {
        actions.offer_start_url(url);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut instance_events = None;
    let mut coordinator = None;
    let mut channel_task = None;

    if args.many_instance {
        info!("single-instance coordination disabled");
    } else {
        let working_dir = match args.working_dir.clone().map_or_else(std::env::current_dir, Ok) {
            Ok(dir) => dir.canonicalize().unwrap_or(dir),
            Err(err) => {
                error!("failed to resolve working directory: {}", err);
                return 1;
            }
        };
        let scope = if args.sandboxed {
            ChannelScope::Sandboxed
        } else {
            ChannelScope::Standard
        };
        let channel = ChannelName::derive(&working_dir, &config.instance, scope);
        let mut instance = Coordinator::new(channel.endpoint(), config.ack_timeout());

        let forward = ForwardRequest {
            send_paths: args.send.clone(),
            start_url: args.open.clone(),
            ..ForwardRequest::default()
        };
        match instance.start(&forward).await {
            Ok(StartOutcome::Forwarded { pid }) => {
                println!("forwarded to running instance (pid {pid})");
                return 0;
            }
            Ok(StartOutcome::Server(listener)) => {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                channel_task = Some(tokio::spawn(parley_client::instance::serve(
                    listener,
                    actions.clone(),
                    events_tx,
                    shutdown_rx,
                )));
                instance_events = Some(events_rx);
            }
            Err(err) => {
                error!("instance coordination failed: {}", err);
                eprintln!("parley: {err}");
                return 1;
            }
        }
        coordinator = Some(instance);
    }

    let store_path = config::data_dir()
        .join("store")
        .join(format!("{}.json", config.instance));
    let storage = Box::new(JsonFileStorage::open(store_path));

    let options = RuntimeOptions {
        config,
        filter: args.filter.clone(),
        exit_when_synced: args.once,
    };
    let result = run_client_runtime(options, storage, instance_events, actions).await;

    let _ = shutdown_tx.send(true);
    if let Some(task) = channel_task {
        let _ = task.await;
    }
    if let Some(mut instance) = coordinator {
        instance.terminate();
    }

    match result {
        Ok(summary) => {
            println!("dialogs: {}", summary.dialogs);
            println!("contacts: {}", summary.contacts);
            for name in &summary.visible {
                println!("  {name}");
            }
            0
        }
        Err(err) => {
            error!("runtime failed: {}", err);
            eprintln!("parley: {err}");
            1
        }
    }
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    let log_path = client_log_path();
    let file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(make_writer)
        .init();
}

fn client_log_path() -> PathBuf {
    let dir = config::data_dir().join("logs");
    let _ = std::fs::create_dir_all(&dir);
    dir.join("parley.log")
}
