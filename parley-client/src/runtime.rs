use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_core::{FetchOutcome, Section, Session, Storage, StreamKind, SyncEvent};
use tokio::{sync::mpsc, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::instance::{InstanceEvent, PendingActions};

const MAX_CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
const BACKOFF_BASE_MS: u64 = 200;
/// Consecutive failed page fetches tolerated before the runtime gives up.
const MAX_FETCH_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub config: ClientConfig,
    pub filter: Option<String>,
    /// Return once the initial sync is complete instead of staying connected.
    pub exit_when_synced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub dialogs: usize,
    pub contacts: usize,
    /// Names in visible order; only the matches when a filter is active.
    pub visible: Vec<String>,
}

impl SyncSummary {
    fn from_session(session: &Session) -> Self {
        let list = session.sync().list();
        Self {
            dialogs: list.section_len(Section::Dialogs),
            contacts: list.section_len(Section::Contacts),
            visible: session
                .entries()
                .into_iter()
                .map(|row| row.peer.name.clone())
                .collect(),
        }
    }
}

pub async fn run_client_runtime(
    options: RuntimeOptions,
    storage: Box<dyn Storage>,
    mut instance_events: Option<mpsc::UnboundedReceiver<InstanceEvent>>,
    actions: PendingActions,
) -> Result<SyncSummary, String> {
    let config = &options.config;
    info!(
        server_url = %config.server_url,
        first_page_size = config.first_page_size,
        page_size = config.page_size,
        preload_all = config.preload_all,
        "runtime starting"
    );

    if let Err(err) = Url::parse(&config.server_url) {
        error!(server_url = %config.server_url, "invalid server url: {err}");
        return Err(format!("invalid server URL: {err}"));
    }

    let (ws_stream, _) = {
        let mut attempt: u32 = 1;
        loop {
            info!(
                attempt,
                max_attempts = MAX_CONNECT_ATTEMPTS,
                server_url = %config.server_url,
                "connecting"
            );

            match timeout(CONNECT_TIMEOUT, connect_async(config.server_url.as_str())).await {
                Ok(Ok(ok)) => break ok,
                Ok(Err(err)) => {
                    let msg = format!("connect failed: {err}");
                    error!(attempt, server_url = %config.server_url, "{msg}");
                    if attempt >= MAX_CONNECT_ATTEMPTS {
                        return Err(msg);
                    }
                }
                Err(_) => {
                    let msg = format!("connect timed out after {:?}", CONNECT_TIMEOUT);
                    error!(attempt, server_url = %config.server_url, "{msg}");
                    if attempt >= MAX_CONNECT_ATTEMPTS {
                        return Err(msg);
                    }
                }
            }

            let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            attempt += 1;
        }
    };

    info!("connected");

    let (mut write_half, mut read_half) = ws_stream.split();
    let mut session = Session::new(config.sync_config(), config.max_pending, storage);
    if let Some(filter) = options.filter.as_deref() {
        session.on_filter_changed(filter);
    }
    request_page(&mut session, StreamKind::Dialogs)?;

    let mut failures: u32 = 0;
    let mut synced = false;

    loop {
        for frame in session.outbound() {
            if let Err(err) = write_half.send(Message::Binary(frame)).await {
                let reason = format!("websocket send failed: {err}");
                session.transport_failed(&reason);
                return Err(reason);
            }
        }

        let events = session.drain_events();
        if !events.is_empty() {
            for event in events {
                match event {
                    SyncEvent::PageMerged {
                        stream,
                        received,
                        offset,
                    } => {
                        info!(stream = stream.as_str(), received, offset, "page merged");
                        failures = 0;
                        // Headless: behave like a list scrolled to its end.
                        if stream == StreamKind::Dialogs {
                            request_page(&mut session, StreamKind::Dialogs)?;
                        }
                    }
                    SyncEvent::FetchFailed { stream, error } => {
                        if error.is_transport() {
                            return Err(format!("{} fetch failed: {error}", stream.as_str()));
                        }
                        failures += 1;
                        if failures > MAX_FETCH_RETRIES {
                            return Err(format!(
                                "{} fetch failed after {} attempts: {error}",
                                stream.as_str(),
                                failures
                            ));
                        }
                        let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (failures - 1));
                        warn!(
                            stream = stream.as_str(),
                            attempt = failures,
                            backoff_ms,
                            "retrying page fetch: {error}"
                        );
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        request_page(&mut session, stream)?;
                    }
                    SyncEvent::Complete => {
                        synced = true;
                        let summary = SyncSummary::from_session(&session);
                        info!(
                            dialogs = summary.dialogs,
                            contacts = summary.contacts,
                            visible = summary.visible.len(),
                            "sync complete"
                        );
                    }
                }
            }
            continue;
        }

        if synced
            && options.exit_when_synced
            && !session.sync().cursor(StreamKind::Contacts).in_flight()
        {
            let _ = write_half.send(Message::Close(None)).await;
            return Ok(SyncSummary::from_session(&session));
        }

        tokio::select! {
            message = read_half.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    if let Err(err) = session.handle_frame(&data) {
                        warn!("dropping malformed frame: {}", err);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    let reason = "server closed the connection";
                    session.transport_failed(reason);
                    return Err(reason.to_owned());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let reason = format!("websocket receive error: {err}");
                    session.transport_failed(&reason);
                    return Err(reason);
                }
            },
            event = next_instance_event(&mut instance_events) => match event {
                Some(InstanceEvent::Command(word)) => {
                    info!(command = %word, "command from another launch");
                }
                Some(InstanceEvent::ActionsPending) => {
                    let pending = actions.take();
                    info!(
                        paths = ?pending.send_paths,
                        start_url = ?pending.start_url,
                        "handling forwarded actions"
                    );
                }
                None => {
                    debug!("instance channel closed");
                    instance_events = None;
                }
            },
        }
    }
}

fn request_page(session: &mut Session, stream: StreamKind) -> Result<(), String> {
    match session.trigger_fetch(stream) {
        FetchOutcome::Refused(err) => Err(format!("{} fetch refused: {err}", stream.as_str())),
        FetchOutcome::Issued(_) | FetchOutcome::InFlight(_) | FetchOutcome::Complete => Ok(()),
    }
}

async fn next_instance_event(
    events: &mut Option<mpsc::UnboundedReceiver<InstanceEvent>>,
) -> Option<InstanceEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
