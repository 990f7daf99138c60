//! Single-instance coordination over a local socket.
//!
//! The first launch for a working directory owns the channel and serves it.
//! Later launches connect as clients, forward their paths, start URL and a
//! `CMD:show;`, wait for the owner's `RES:<pid>;` and exit.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use parley_core::command::{
    Command, CommandBuffer, MAX_START_URL_CHARS, ProtocolFault, encode_command,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{mpsc, watch},
    task::AbortHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

pub use local::Listener;

pub const CHANNEL_PREFIX: &str = "parley-";
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelScope {
    Standard,
    /// Sandboxed builds get a short name without the discriminator.
    Sandboxed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    /// Derive the channel name from the absolute working directory.
    pub fn derive(working_dir: &Path, discriminator: &str, scope: ChannelScope) -> Self {
        let digest = hex::encode(Sha256::digest(working_dir.to_string_lossy().as_bytes()));
        let name = match scope {
            ChannelScope::Standard => {
                format!("{CHANNEL_PREFIX}{}-{discriminator}", &digest[..32])
            }
            ChannelScope::Sandboxed => format!("{CHANNEL_PREFIX}{}", &digest[..4]),
        };
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint(local::endpoint_path(self.as_str()))
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filesystem location of a channel: a socket file or a named pipe path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(PathBuf);

impl Endpoint {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to listen on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write to running instance: {0}")]
    Write(#[source] io::Error),
    #[error("failed to read from running instance: {0}")]
    Read(#[source] io::Error),
    #[error("running instance disconnected before acknowledging")]
    Disconnected,
    #[error("no acknowledgment from running instance within {0:?}")]
    AckTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Unstarted,
    Probing,
    Client,
    Server,
    Terminated,
}

/// What a secondary launch hands to the owning instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub send_paths: Vec<String>,
    pub start_url: Option<String>,
    pub command: String,
}

impl Default for ForwardRequest {
    fn default() -> Self {
        Self {
            send_paths: Vec::new(),
            start_url: None,
            command: "show".to_owned(),
        }
    }
}

#[derive(Debug)]
pub enum StartOutcome {
    /// Another instance owns the channel and acknowledged our commands.
    Forwarded { pid: u32 },
    /// This process owns the channel.
    Server(Listener),
}

#[derive(Debug)]
pub struct Coordinator {
    endpoint: Endpoint,
    state: InstanceState,
    ack_timeout: Duration,
}

impl Coordinator {
    pub fn new(endpoint: Endpoint, ack_timeout: Duration) -> Self {
        Self {
            endpoint,
            state: InstanceState::Unstarted,
            ack_timeout,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    fn transition(&mut self, next: InstanceState) {
        info!(
            endpoint = %self.endpoint,
            from = ?self.state,
            to = ?next,
            "instance state changed"
        );
        self.state = next;
    }

    /// Probe for a running owner; forward to it, or become the owner.
    pub async fn start(&mut self, forward: &ForwardRequest) -> Result<StartOutcome, InstanceError> {
        self.transition(InstanceState::Probing);

        match local::connect(&self.endpoint).await {
            Ok(stream) => {
                self.transition(InstanceState::Client);
                let result = forward_to_owner(stream, forward, self.ack_timeout).await;
                self.transition(InstanceState::Terminated);
                let pid = result?;
                info!(pid, "running instance acknowledged");
                Ok(StartOutcome::Forwarded { pid })
            }
            Err(err) if local::is_channel_absent(&err) => {
                debug!(endpoint = %self.endpoint, error = %err, "no running instance");
                if let Err(source) = local::remove_stale(&self.endpoint, &err) {
                    self.transition(InstanceState::Terminated);
                    return Err(InstanceError::Bind {
                        endpoint: self.endpoint.to_string(),
                        source,
                    });
                }
                match local::bind(&self.endpoint) {
                    Ok(listener) => {
                        self.transition(InstanceState::Server);
                        Ok(StartOutcome::Server(listener))
                    }
                    Err(source) => {
                        self.transition(InstanceState::Terminated);
                        Err(InstanceError::Bind {
                            endpoint: self.endpoint.to_string(),
                            source,
                        })
                    }
                }
            }
            Err(source) => {
                self.transition(InstanceState::Terminated);
                Err(InstanceError::Connect {
                    endpoint: self.endpoint.to_string(),
                    source,
                })
            }
        }
    }

    pub fn terminate(&mut self) {
        if self.state != InstanceState::Terminated {
            self.transition(InstanceState::Terminated);
        }
    }
}

async fn forward_to_owner(
    mut stream: local::ClientStream,
    forward: &ForwardRequest,
    ack_timeout: Duration,
) -> Result<u32, InstanceError> {
    let mut payload = Vec::new();
    for path in &forward.send_paths {
        payload.extend(encode_command(&Command::Send(path.clone())));
    }
    if let Some(url) = &forward.start_url {
        payload.extend(encode_command(&Command::Open(url.clone())));
    }
    payload.extend(encode_command(&Command::Cmd(forward.command.clone())));

    stream
        .write_all(&payload)
        .await
        .map_err(InstanceError::Write)?;
    stream.flush().await.map_err(InstanceError::Write)?;
    debug!(
        bytes = payload.len(),
        paths = forward.send_paths.len(),
        "forwarded commands to running instance"
    );

    let wait_for_ack = async {
        let mut buffer = CommandBuffer::new();
        let mut chunk = [0_u8; 1024];
        loop {
            let read = stream.read(&mut chunk).await.map_err(InstanceError::Read)?;
            if read == 0 {
                return Err(InstanceError::Disconnected);
            }
            for unit in buffer.feed(&chunk[..read]) {
                match unit {
                    Ok(Command::Res(pid)) => return Ok(pid),
                    Ok(other) => debug!(prefix = other.prefix(), "ignoring command from owner"),
                    Err(fault) => warn!(%fault, "bad reply from running instance"),
                }
            }
        }
    };

    timeout(ack_timeout, wait_for_ack)
        .await
        .map_err(|_| InstanceError::AckTimeout(ack_timeout))?
}

/// State forwarded by later launches. Each part is taken by the first
/// launch that fills it; later offers are ignored until it is drained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedActions {
    pub send_paths: Vec<String>,
    pub start_url: Option<String>,
}

impl ForwardedActions {
    pub fn is_empty(&self) -> bool {
        self.send_paths.is_empty() && self.start_url.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PendingActions {
    inner: Arc<Mutex<ForwardedActions>>,
}

impl PendingActions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ForwardedActions> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept `paths` only when no paths are pending.
    pub fn offer_send_paths(&self, paths: Vec<String>) -> bool {
        if paths.is_empty() {
            return false;
        }
        let mut actions = self.lock();
        if !actions.send_paths.is_empty() {
            return false;
        }
        actions.send_paths = paths;
        true
    }

    /// Accept `url` only when no start URL is pending. Over-long URLs are
    /// truncated.
    pub fn offer_start_url(&self, url: String) -> bool {
        if url.is_empty() {
            return false;
        }
        let mut actions = self.lock();
        if actions.start_url.is_some() {
            return false;
        }
        let url = truncate_utf16(url, MAX_START_URL_CHARS);
        actions.start_url = Some(url);
        true
    }

    pub fn snapshot(&self) -> ForwardedActions {
        self.lock().clone()
    }

    pub fn take(&self) -> ForwardedActions {
        std::mem::take(&mut *self.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Keep at most `max` UTF-16 units without splitting a surrogate pair.
fn truncate_utf16(text: String, max: usize) -> String {
    if text.encode_utf16().count() <= max {
        return text;
    }
    let mut units = 0;
    let end = text
        .char_indices()
        .find_map(|(at, ch)| {
            units += ch.len_utf16();
            (units > max).then_some(at)
        })
        .unwrap_or(text.len());
    text[..end].to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
    /// A `CMD:` word from a later launch, e.g. `show`.
    Command(String),
    /// New paths or a start URL landed in `PendingActions`.
    ActionsPending,
}

#[derive(Debug)]
enum PeerEventKind {
    Data(Vec<u8>),
    Closed,
}

#[derive(Debug)]
struct PeerEvent {
    slot: usize,
    serial: u64,
    kind: PeerEventKind,
}

struct PeerSlot {
    serial: u64,
    buffer: CommandBuffer,
    writer: WriteHalf<local::ServerStream>,
    reader: AbortHandle,
}

/// Connected peers. Slots are tombstoned on disconnect and reused; trailing
/// tombstones are dropped by `compact`. Events carry the slot serial so
/// nothing reaches a reused slot from a previous peer.
#[derive(Default)]
struct PeerArena {
    slots: Vec<Option<PeerSlot>>,
    next_serial: u64,
}

impl PeerArena {
    fn insert(&mut self, stream: local::ServerStream, events: &mpsc::UnboundedSender<PeerEvent>) {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.slots.len());
        self.next_serial += 1;
        let serial = self.next_serial;

        let (reader, writer) = tokio::io::split(stream);
        let reader = tokio::spawn(read_peer(reader, slot, serial, events.clone())).abort_handle();
        let peer = PeerSlot {
            serial,
            buffer: CommandBuffer::new(),
            writer,
            reader,
        };
        if slot == self.slots.len() {
            self.slots.push(Some(peer));
        } else {
            self.slots[slot] = Some(peer);
        }
        debug!(slot, serial, "instance peer connected");
    }

    fn get_mut(&mut self, slot: usize, serial: u64) -> Option<&mut PeerSlot> {
        self.slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .filter(|peer| peer.serial == serial)
    }

    fn remove(&mut self, slot: usize, serial: u64) {
        if self.get_mut(slot, serial).is_some()
            && let Some(peer) = self.slots[slot].take()
        {
            peer.reader.abort();
            debug!(slot, serial, "instance peer removed");
        }
    }

    fn compact(&mut self) {
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
    }

    fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl Drop for PeerArena {
    fn drop(&mut self) {
        for peer in self.slots.iter().flatten() {
            peer.reader.abort();
        }
    }
}

async fn read_peer(
    mut reader: ReadHalf<local::ServerStream>,
    slot: usize,
    serial: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => {
                let event = PeerEvent {
                    slot,
                    serial,
                    kind: PeerEventKind::Data(chunk[..read].to_vec()),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(slot, error = %err, "instance peer read failed");
                break;
            }
        }
    }
    let _ = events.send(PeerEvent {
        slot,
        serial,
        kind: PeerEventKind::Closed,
    });
}

/// Accept later launches until `shutdown` flips to `true`.
pub async fn serve(
    mut listener: Listener,
    actions: PendingActions,
    events: mpsc::UnboundedSender<InstanceEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel::<PeerEvent>();
    let mut peers = PeerArena::default();
    info!(endpoint = %listener.endpoint(), "instance channel listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(stream) => peers.insert(stream, &peer_tx),
                Err(err) => warn!(error = %err, "instance accept failed"),
            },
            Some(first) = peer_rx.recv() => {
                let mut batch = vec![first];
                while let Ok(next) = peer_rx.try_recv() {
                    batch.push(next);
                }
                for event in batch {
                    handle_peer_event(&mut peers, event, &actions, &events).await;
                }
                peers.compact();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(peers = peers.live(), "instance channel closed");
}

async fn handle_peer_event(
    peers: &mut PeerArena,
    event: PeerEvent,
    actions: &PendingActions,
    events: &mpsc::UnboundedSender<InstanceEvent>,
) {
    let PeerEvent { slot, serial, kind } = event;
    let bytes = match kind {
        PeerEventKind::Data(bytes) => bytes,
        PeerEventKind::Closed => {
            peers.remove(slot, serial);
            return;
        }
    };
    let Some(peer) = peers.get_mut(slot, serial) else {
        return;
    };

    let mut send_paths = Vec::new();
    let mut start_urls = Vec::new();
    let mut commands = Vec::new();
    for unit in peer.buffer.feed(&bytes) {
        match unit {
            Ok(Command::Cmd(word)) => commands.push(word),
            Ok(Command::Send(path)) => send_paths.push(path),
            Ok(Command::Open(url)) => start_urls.push(url),
            Ok(Command::Res(pid)) => debug!(slot, pid, "ignoring acknowledgment from peer"),
            Err(ProtocolFault::Overflow { len }) => {
                warn!(slot, len, "instance peer sent no delimiter; buffer dropped")
            }
            Err(fault) => warn!(slot, %fault, "skipping instance command"),
        }
    }

    let mut accepted = false;
    if !send_paths.is_empty() {
        let count = send_paths.len();
        if actions.offer_send_paths(send_paths) {
            info!(slot, count, "accepted forwarded paths");
            accepted = true;
        } else {
            debug!(slot, count, "paths already pending; ignoring");
        }
    }
    for url in start_urls {
        if actions.offer_start_url(url) {
            info!(slot, "accepted forwarded start url");
            accepted = true;
        } else {
            debug!(slot, "start url already pending; ignoring");
        }
    }
    if accepted {
        let _ = events.send(InstanceEvent::ActionsPending);
    }

    if commands.is_empty() {
        return;
    }
    let mut reply = Vec::new();
    for word in commands {
        info!(slot, command = %word, "instance command received");
        let _ = events.send(InstanceEvent::Command(word));
        reply.extend(encode_command(&Command::Res(std::process::id())));
    }
    let written = async {
        peer.writer.write_all(&reply).await?;
        peer.writer.flush().await
    }
    .await;
    if let Err(err) = written {
        warn!(slot, error = %err, "failed to acknowledge instance command");
        peers.remove(slot, serial);
    }
}

#[cfg(unix)]
mod local {
    use std::{
        io,
        os::unix::fs::FileTypeExt,
        path::{Path, PathBuf},
    };

    use tokio::net::{UnixListener, UnixStream};
    use tracing::{debug, info};

    use super::Endpoint;

    pub type ClientStream = UnixStream;
    pub type ServerStream = UnixStream;

    pub fn endpoint_path(name: &str) -> PathBuf {
        let dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .filter(|dir| dir.is_dir())
            .unwrap_or_else(std::env::temp_dir);
        dir.join(format!("{name}.sock"))
    }

    pub async fn connect(endpoint: &Endpoint) -> io::Result<ClientStream> {
        UnixStream::connect(endpoint.path()).await
    }

    /// Nobody is listening: no socket file, or a file left by a dead owner.
    pub fn is_channel_absent(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
        )
    }

    pub fn remove_stale(endpoint: &Endpoint, err: &io::Error) -> io::Result<()> {
        if err.kind() != io::ErrorKind::ConnectionRefused {
            return Ok(());
        }
        match std::fs::symlink_metadata(endpoint.path()) {
            Ok(meta) if !meta.file_type().is_socket() => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{endpoint} exists and is not a socket"),
                ));
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        }
        match std::fs::remove_file(endpoint.path()) {
            Ok(()) => {
                info!(endpoint = %endpoint, "removed stale instance socket");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn bind(endpoint: &Endpoint) -> io::Result<Listener> {
        let inner = UnixListener::bind(endpoint.path())?;
        Ok(Listener {
            inner,
            endpoint: endpoint.clone(),
        })
    }

    #[derive(Debug)]
    pub struct Listener {
        inner: UnixListener,
        endpoint: Endpoint,
    }

    impl Listener {
        pub fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            let (stream, _) = self.inner.accept().await?;
            Ok(stream)
        }

        fn path(&self) -> &Path {
            self.endpoint.path()
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            if let Err(err) = std::fs::remove_file(self.path()) {
                debug!(endpoint = %self.endpoint, error = %err, "instance socket not removed");
            }
        }
    }
}

#[cfg(windows)]
mod local {
    use std::{io, path::PathBuf, time::Duration};

    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    use super::Endpoint;

    pub type ClientStream = NamedPipeClient;
    pub type ServerStream = NamedPipeServer;

    const ERROR_PIPE_BUSY: i32 = 231;

    pub fn endpoint_path(name: &str) -> PathBuf {
        PathBuf::from(format!(r"\\.\pipe\{name}"))
    }

    pub async fn connect(endpoint: &Endpoint) -> io::Result<ClientStream> {
        loop {
            match ClientOptions::new().open(endpoint.path()) {
                Ok(client) => return Ok(client),
                Err(err) if err.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
                Err(err) => return Err(err),
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn is_channel_absent(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::NotFound
    }

    /// Pipes vanish with their owner.
    pub fn remove_stale(_endpoint: &Endpoint, _err: &io::Error) -> io::Result<()> {
        Ok(())
    }

    pub fn bind(endpoint: &Endpoint) -> io::Result<Listener> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(endpoint.path())?;
        Ok(Listener {
            next,
            endpoint: endpoint.clone(),
        })
    }

    #[derive(Debug)]
    pub struct Listener {
        next: NamedPipeServer,
        endpoint: Endpoint,
    }

    impl Listener {
        pub fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            self.next.connect().await?;
            let fresh = ServerOptions::new().create(self.endpoint.path())?;
            Ok(std::mem::replace(&mut self.next, fresh))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_depends_on_directory_and_discriminator() {
        let a = ChannelName::derive(Path::new("/home/a/parley"), "main", ChannelScope::Standard);
        let b = ChannelName::derive(Path::new("/home/b/parley"), "main", ChannelScope::Standard);
        let c = ChannelName::derive(Path::new("/home/a/parley"), "beta", ChannelScope::Standard);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with(CHANNEL_PREFIX));
        assert!(a.as_str().ends_with("-main"));
        assert_eq!(a.as_str().len(), CHANNEL_PREFIX.len() + 32 + "-main".len());
    }

    #[test]
    fn sandboxed_channel_name_is_short() {
        let name = ChannelName::derive(Path::new("/data"), "main", ChannelScope::Sandboxed);
        assert_eq!(name.as_str().len(), CHANNEL_PREFIX.len() + 4);
        let standard = ChannelName::derive(Path::new("/data"), "main", ChannelScope::Standard);
        assert!(standard.as_str().starts_with(name.as_str()));
    }

    #[test]
    fn pending_actions_are_first_writer_wins() {
        let actions = PendingActions::new();
        assert!(actions.offer_send_paths(vec!["/a".into(), "/b".into()]));
        assert!(!actions.offer_send_paths(vec!["/c".into()]));
        assert!(actions.offer_start_url("parley://one".into()));
        assert!(!actions.offer_start_url("parley://two".into()));

        let taken = actions.take();
        assert_eq!(taken.send_paths, vec!["/a", "/b"]);
        assert_eq!(taken.start_url.as_deref(), Some("parley://one"));
        assert!(actions.is_empty());
        assert!(actions.offer_send_paths(vec!["/c".into()]));
    }

    #[test]
    fn start_url_is_truncated() {
        let actions = PendingActions::new();
        let long = "x".repeat(MAX_START_URL_CHARS + 10);
        assert!(actions.offer_start_url(long));
        let url = actions.snapshot().start_url.unwrap_or_default();
        assert_eq!(url.chars().count(), MAX_START_URL_CHARS);
    }

    #[test]
    fn start_url_limit_counts_utf16_units() {
        // Each emoji is two UTF-16 units.
        let actions = PendingActions::new();
        let url = format!("a{}", "\u{1f600}".repeat(MAX_START_URL_CHARS));
        assert!(actions.offer_start_url(url));
        let kept = actions.snapshot().start_url.unwrap_or_default();
        assert_eq!(kept.encode_utf16().count(), MAX_START_URL_CHARS - 1);
        assert_eq!(kept.chars().count(), 1 + (MAX_START_URL_CHARS - 1) / 2);

        let exact = "\u{e9}".repeat(MAX_START_URL_CHARS);
        assert_eq!(truncate_utf16(exact.clone(), MAX_START_URL_CHARS), exact);
    }
}
