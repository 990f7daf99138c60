//! Paginated bulk sync of dialogs and contacts.
//!
//! Each stream has a cursor with at most one request in flight. Fetches are
//! caller-driven: nothing here retries on its own. An empty page always ends
//! a stream.

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{ContactsPage, DialogsPage, Request, decode_body};
use crate::dialogs::{DialogList, Row};
use crate::rpc::{Priority, RpcContext, RpcError, RpcResult};
use crate::storage::Storage;
use crate::RequestId;

pub const DEFAULT_FIRST_PAGE_SIZE: u32 = 20;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Dialogs,
    Contacts,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Dialogs => "dialogs",
            StreamKind::Contacts => "contacts",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCursor {
    offset: u32,
    total_count: Option<u32>,
    request: Option<RequestId>,
}

impl SyncCursor {
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn total_count(&self) -> Option<u32> {
        self.total_count
    }

    pub fn in_flight(&self) -> bool {
        self.request.is_some()
    }

    pub fn request(&self) -> Option<RequestId> {
        self.request
    }

    pub fn is_complete(&self) -> bool {
        self.total_count.is_some_and(|total| self.offset >= total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub first_page_size: u32,
    pub page_size: u32,
    /// Chain the next dialogs page as soon as one lands.
    pub preload_all: bool,
    pub priority: Priority,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            first_page_size: DEFAULT_FIRST_PAGE_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            preload_all: false,
            priority: Priority::INTERACTIVE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    PageMerged {
        stream: StreamKind,
        received: u32,
        offset: u32,
    },
    /// Fired once per controller, the first time a trigger finds the dialogs
    /// stream exhausted.
    Complete,
    FetchFailed {
        stream: StreamKind,
        error: RpcError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Issued(RequestId),
    InFlight(RequestId),
    Complete,
    Refused(RpcError),
}

/// Context object that owns a sync controller and its storage.
pub trait SyncContext: RpcContext + 'static {
    fn sync_mut(&mut self) -> &mut SyncController;

    fn storage_mut(&mut self) -> &mut dyn Storage;
}

#[derive(Debug, Default)]
pub struct SyncController {
    config: SyncConfig,
    dialogs: SyncCursor,
    contacts: SyncCursor,
    list: DialogList,
    events: Vec<SyncEvent>,
    completed: bool,
}

impl SyncController {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cursor(&self, stream: StreamKind) -> &SyncCursor {
        match stream {
            StreamKind::Dialogs => &self.dialogs,
            StreamKind::Contacts => &self.contacts,
        }
    }

    fn cursor_mut(&mut self, stream: StreamKind) -> &mut SyncCursor {
        match stream {
            StreamKind::Dialogs => &mut self.dialogs,
            StreamKind::Contacts => &mut self.contacts,
        }
    }

    pub fn list(&self) -> &DialogList {
        &self.list
    }

    pub fn list_mut(&mut self) -> &mut DialogList {
        &mut self.list
    }

    /// Whether the one-time completion effect has fired.
    pub fn is_synced(&self) -> bool {
        self.completed
    }

    /// Re-filter the in-memory rows. Never fetches.
    pub fn on_filter_changed(&mut self, text: &str) -> bool {
        let changed = self.list.set_filter(text);
        if changed {
            debug!(
                query = %self.list.filter_query().unwrap_or_default(),
                matches = self.list.entries().len(),
                "filter updated"
            );
        }
        changed
    }

    pub fn clear_filter(&mut self) -> bool {
        self.list.clear_filter()
    }

    pub fn entries(&self) -> Vec<&Row> {
        self.list.entries()
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    fn page_limit(&self) -> u32 {
        if self.dialogs.offset == 0 {
            self.config.first_page_size
        } else {
            self.config.page_size
        }
    }
}

/// Ask for the next page of `stream` unless one is already in flight.
pub fn trigger_fetch<C: SyncContext>(ctx: &mut C, stream: StreamKind) -> FetchOutcome {
    let sync = ctx.sync_mut();
    let cursor = sync.cursor(stream);
    if let Some(id) = cursor.request {
        debug!(stream = stream.as_str(), request_id = %id, "fetch already in flight");
        return FetchOutcome::InFlight(id);
    }
    if cursor.is_complete() {
        if stream == StreamKind::Dialogs && !sync.completed {
            sync.completed = true;
            sync.events.push(SyncEvent::Complete);
            info!(
                dialogs = sync.dialogs.offset,
                contacts = sync.contacts.offset,
                "initial sync complete"
            );
        }
        return FetchOutcome::Complete;
    }

    let offset = cursor.offset;
    let limit = sync.page_limit();
    let priority = sync.config.priority;
    let request = match stream {
        StreamKind::Dialogs => Request::GetDialogs { offset, limit },
        StreamKind::Contacts => Request::GetContacts,
    };
    let payload = match request.encode() {
        Ok(payload) => payload,
        Err(err) => return FetchOutcome::Refused(RpcError::Encode(err.to_string())),
    };

    let sent = match stream {
        StreamKind::Dialogs => ctx.rpc_mut().send(payload, priority, move |ctx: &mut C, result| {
            on_dialogs_page(ctx, limit, result)
        }),
        StreamKind::Contacts => ctx
            .rpc_mut()
            .send(payload, Priority::NORMAL, |ctx: &mut C, result| {
                on_contacts_page(ctx, result)
            }),
    };

    match sent {
        Ok(id) => {
            ctx.sync_mut().cursor_mut(stream).request = Some(id);
            debug!(stream = stream.as_str(), request_id = %id, offset, limit, "fetch issued");
            FetchOutcome::Issued(id)
        }
        Err(err) => {
            warn!(stream = stream.as_str(), error = %err, "fetch refused");
            FetchOutcome::Refused(err)
        }
    }
}

/// Drop the in-flight request for `stream`, if any.
pub fn cancel_fetch<C: SyncContext>(ctx: &mut C, stream: StreamKind) -> bool {
    let Some(id) = ctx.sync_mut().cursor_mut(stream).request.take() else {
        return false;
    };
    ctx.rpc_mut().cancel(id)
}

fn decode_page<T: serde::de::DeserializeOwned>(result: RpcResult) -> Result<T, RpcError> {
    let bytes: Bytes = result?;
    decode_body(&bytes).map_err(|err| RpcError::Decode(err.to_string()))
}

fn fetch_failed(sync: &mut SyncController, stream: StreamKind, error: RpcError) {
    warn!(
        stream = stream.as_str(),
        offset = sync.cursor(stream).offset,
        error = %error,
        "page fetch failed"
    );
    sync.events.push(SyncEvent::FetchFailed { stream, error });
}

fn on_dialogs_page<C: SyncContext>(ctx: &mut C, requested: u32, result: RpcResult) {
    let sync = ctx.sync_mut();
    sync.dialogs.request = None;
    let page: DialogsPage = match decode_page(result) {
        Ok(page) => page,
        Err(error) => return fetch_failed(sync, StreamKind::Dialogs, error),
    };

    let received = u32::try_from(page.dialogs.len()).unwrap_or(u32::MAX);
    let writes = page
        .dialogs
        .iter()
        .map(|dialog| (format!("dialog/{}", dialog.peer.id), dialog))
        .filter_map(|(key, dialog)| serialize_entry(&key, dialog).map(|value| (key, value)))
        .collect::<Vec<_>>();
    sync.list.append_dialogs(page.dialogs);

    let cursor = &mut sync.dialogs;
    cursor.offset = cursor.offset.saturating_add(received);
    if received == 0 {
        cursor.total_count = Some(cursor.offset);
    } else if let Some(count) = page.count {
        cursor.total_count = Some(count);
    } else if received < requested {
        cursor.total_count = Some(cursor.offset);
    }
    let offset = cursor.offset;
    debug!(
        received,
        offset,
        total = ?cursor.total_count,
        "dialogs page merged"
    );
    sync.events.push(SyncEvent::PageMerged {
        stream: StreamKind::Dialogs,
        received,
        offset,
    });
    let preload = sync.config.preload_all;

    write_through(ctx, writes);
    trigger_fetch(ctx, StreamKind::Contacts);
    if preload {
        trigger_fetch(ctx, StreamKind::Dialogs);
    }
}

fn on_contacts_page<C: SyncContext>(ctx: &mut C, result: RpcResult) {
    let sync = ctx.sync_mut();
    sync.contacts.request = None;
    let page: ContactsPage = match decode_page(result) {
        Ok(page) => page,
        Err(error) => return fetch_failed(sync, StreamKind::Contacts, error),
    };

    let received = u32::try_from(page.contacts.len()).unwrap_or(u32::MAX);
    let writes = page
        .contacts
        .iter()
        .map(|peer| (format!("contact/{}", peer.id), peer))
        .filter_map(|(key, peer)| serialize_entry(&key, peer).map(|value| (key, value)))
        .collect::<Vec<_>>();
    let added = sync.list.append_contacts(page.contacts);

    // Contacts arrive in one page.
    let cursor = &mut sync.contacts;
    cursor.offset = cursor.offset.saturating_add(received);
    cursor.total_count = Some(cursor.offset);
    let offset = cursor.offset;
    debug!(received, added, "contacts merged");
    sync.events.push(SyncEvent::PageMerged {
        stream: StreamKind::Contacts,
        received,
        offset,
    });

    write_through(ctx, writes);
}

fn serialize_entry<T: Serialize>(key: &str, value: &T) -> Option<Vec<u8>> {
    match serde_json::to_vec(value) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            warn!(key, error = %err, "failed to serialize entry for storage");
            None
        }
    }
}

fn write_through<C: SyncContext>(ctx: &mut C, writes: Vec<(String, Vec<u8>)>) {
    let storage = ctx.storage_mut();
    for (key, value) in writes {
        if let Err(err) = storage.put(&key, value) {
            warn!(key = %key, error = %err, "storage write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Dialog, Peer, encode_body};
    use crate::frame::{ErrorBody, Frame, decode_frame, encode_frame};
    use crate::rpc::{RpcClient, deliver_frame, fail_transport};
    use crate::storage::MemoryStorage;

    struct Ctx {
        rpc: RpcClient<Ctx>,
        sync: SyncController,
        storage: MemoryStorage,
    }

    impl Ctx {
        fn new(config: SyncConfig) -> Self {
            Self {
                rpc: RpcClient::new(),
                sync: SyncController::new(config),
                storage: MemoryStorage::new(),
            }
        }
    }

    impl RpcContext for Ctx {
        fn rpc_mut(&mut self) -> &mut RpcClient<Self> {
            &mut self.rpc
        }
    }

    impl SyncContext for Ctx {
        fn sync_mut(&mut self) -> &mut SyncController {
            &mut self.sync
        }

        fn storage_mut(&mut self) -> &mut dyn Storage {
            &mut self.storage
        }
    }

    struct Directory {
        dialogs: Vec<Dialog>,
        contacts: Vec<Peer>,
        count: Option<u32>,
    }

    impl Directory {
        fn with_dialogs(n: u64) -> Self {
            Self {
                dialogs: (1..=n)
                    .map(|id| Dialog {
                        peer: Peer {
                            id,
                            name: format!("Peer {id}"),
                            username: None,
                        },
                        unread_count: 0,
                    })
                    .collect(),
                contacts: Vec::new(),
                count: None,
            }
        }

        fn answer(&self, payload: &[u8]) -> Bytes {
            match Request::decode(payload).unwrap() {
                Request::GetDialogs { offset, limit } => {
                    let start = (offset as usize).min(self.dialogs.len());
                    let end = (start + limit as usize).min(self.dialogs.len());
                    encode_body(&DialogsPage {
                        dialogs: self.dialogs[start..end].to_vec(),
                        count: self.count,
                    })
                }
                Request::GetContacts => encode_body(&ContactsPage {
                    contacts: self.contacts.clone(),
                }),
            }
            .unwrap()
        }
    }

    fn requests(ctx: &mut Ctx) -> Vec<(RequestId, Request)> {
        ctx.rpc
            .drain_outbound()
            .into_iter()
            .map(|bytes| match decode_frame(&bytes).unwrap() {
                Frame::Request { id, payload } => (id, Request::decode(&payload).unwrap()),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
    }

    /// Answer everything queued, including follow-ups, until idle.
    fn serve(ctx: &mut Ctx, directory: &Directory) -> Vec<Request> {
        let mut served = Vec::new();
        loop {
            let frames = ctx.rpc.drain_outbound();
            if frames.is_empty() {
                return served;
            }
            for bytes in frames {
                let Frame::Request { id, payload } = decode_frame(&bytes).unwrap() else {
                    panic!("expected request frame");
                };
                served.push(Request::decode(&payload).unwrap());
                let response = Frame::Response {
                    id,
                    payload: directory.answer(&payload),
                };
                deliver_frame(ctx, &encode_frame(&response).unwrap()).unwrap();
            }
        }
    }

    fn small_pages() -> SyncConfig {
        SyncConfig {
            first_page_size: 50,
            page_size: 50,
            ..SyncConfig::default()
        }
    }

    #[test]
    fn second_trigger_while_in_flight_is_a_noop() {
        let mut ctx = Ctx::new(SyncConfig::default());
        let FetchOutcome::Issued(id) = trigger_fetch(&mut ctx, StreamKind::Dialogs) else {
            panic!("expected a request to be issued");
        };
        assert_eq!(
            trigger_fetch(&mut ctx, StreamKind::Dialogs),
            FetchOutcome::InFlight(id)
        );
        assert_eq!(
            requests(&mut ctx),
            vec![(
                id,
                Request::GetDialogs {
                    offset: 0,
                    limit: DEFAULT_FIRST_PAGE_SIZE
                }
            )]
        );
    }

    #[test]
    fn fifty_three_dialogs_take_two_pages_then_complete_once() {
        let directory = Directory::with_dialogs(53);
        let mut ctx = Ctx::new(small_pages());

        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        let served = serve(&mut ctx, &directory);
        assert_eq!(
            served,
            vec![
                Request::GetDialogs {
                    offset: 0,
                    limit: 50
                },
                Request::GetContacts,
            ]
        );
        assert_eq!(ctx.sync.cursor(StreamKind::Dialogs).offset(), 50);
        assert_eq!(ctx.sync.cursor(StreamKind::Dialogs).total_count(), None);

        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        serve(&mut ctx, &directory);
        let cursor = ctx.sync.cursor(StreamKind::Dialogs);
        assert_eq!(cursor.offset(), 53);
        assert_eq!(cursor.total_count(), Some(53));
        assert!(cursor.is_complete());

        assert_eq!(
            trigger_fetch(&mut ctx, StreamKind::Dialogs),
            FetchOutcome::Complete
        );
        assert_eq!(
            trigger_fetch(&mut ctx, StreamKind::Dialogs),
            FetchOutcome::Complete
        );
        assert!(!ctx.rpc.has_outbound());

        let completes = ctx
            .sync
            .drain_events()
            .into_iter()
            .filter(|event| *event == SyncEvent::Complete)
            .count();
        assert_eq!(completes, 1);
        assert!(ctx.sync.is_synced());
        assert_eq!(ctx.sync.entries().len(), 53);
    }

    #[test]
    fn empty_page_is_terminal_even_with_larger_count() {
        let mut directory = Directory::with_dialogs(0);
        directory.count = Some(100);
        let mut ctx = Ctx::new(SyncConfig::default());

        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        serve(&mut ctx, &directory);
        let cursor = ctx.sync.cursor(StreamKind::Dialogs);
        assert_eq!(cursor.total_count(), Some(0));
        assert_eq!(
            trigger_fetch(&mut ctx, StreamKind::Dialogs),
            FetchOutcome::Complete
        );
    }

    #[test]
    fn explicit_count_ends_stream_on_full_page() {
        let mut directory = Directory::with_dialogs(20);
        directory.count = Some(20);
        let mut ctx = Ctx::new(SyncConfig::default());

        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        serve(&mut ctx, &directory);
        assert!(ctx.sync.cursor(StreamKind::Dialogs).is_complete());
    }

    #[test]
    fn explicit_count_keeps_stream_open_after_short_page() {
        let mut directory = Directory::with_dialogs(10);
        directory.count = Some(30);
        let mut ctx = Ctx::new(SyncConfig::default());

        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        serve(&mut ctx, &directory);
        let cursor = ctx.sync.cursor(StreamKind::Dialogs);
        assert_eq!(cursor.offset(), 10);
        assert_eq!(cursor.total_count(), Some(30));
        assert!(!cursor.is_complete());
    }

    #[test]
    fn failed_page_keeps_offset_and_does_not_retry() {
        let mut ctx = Ctx::new(SyncConfig::default());
        let FetchOutcome::Issued(id) = trigger_fetch(&mut ctx, StreamKind::Dialogs) else {
            panic!("expected a request to be issued");
        };
        ctx.rpc.drain_outbound();
        let error = Frame::Error {
            id,
            error: ErrorBody::new(500, "INTERNAL", "database unavailable"),
        };
        deliver_frame(&mut ctx, &encode_frame(&error).unwrap()).unwrap();

        let cursor = ctx.sync.cursor(StreamKind::Dialogs);
        assert!(!cursor.in_flight());
        assert_eq!(cursor.offset(), 0);
        assert!(!ctx.rpc.has_outbound());
        assert!(matches!(
            ctx.sync.drain_events().as_slice(),
            [SyncEvent::FetchFailed {
                stream: StreamKind::Dialogs,
                error: RpcError::Application { code: 500, .. }
            }]
        ));

        assert!(matches!(
            trigger_fetch(&mut ctx, StreamKind::Dialogs),
            FetchOutcome::Issued(_)
        ));
        assert_eq!(
            requests(&mut ctx)[0].1,
            Request::GetDialogs {
                offset: 0,
                limit: DEFAULT_FIRST_PAGE_SIZE
            }
        );
    }

    #[test]
    fn malformed_page_is_a_decode_failure() {
        let mut ctx = Ctx::new(SyncConfig::default());
        let FetchOutcome::Issued(id) = trigger_fetch(&mut ctx, StreamKind::Dialogs) else {
            panic!("expected a request to be issued");
        };
        let response = Frame::Response {
            id,
            payload: Bytes::from_static(b"not json"),
        };
        deliver_frame(&mut ctx, &encode_frame(&response).unwrap()).unwrap();
        assert!(matches!(
            ctx.sync.drain_events().as_slice(),
            [SyncEvent::FetchFailed {
                error: RpcError::Decode(_),
                ..
            }]
        ));
    }

    #[test]
    fn malformed_error_frame_releases_the_cursor() {
        let mut ctx = Ctx::new(SyncConfig::default());
        let FetchOutcome::Issued(id) = trigger_fetch(&mut ctx, StreamKind::Dialogs) else {
            panic!("expected a request to be issued");
        };
        let mut frame = Vec::new();
        frame.extend_from_slice(&(9 + 5_u32).to_le_bytes());
        frame.push(crate::frame::FrameKind::Error as u8);
        frame.extend_from_slice(&id.0.to_le_bytes());
        frame.extend_from_slice(b"FLOOD");

        assert!(deliver_frame(&mut ctx, &frame).unwrap());
        assert!(!ctx.sync.cursor(StreamKind::Dialogs).in_flight());
        assert_eq!(ctx.rpc.pending_len(), 0);
        assert!(matches!(
            ctx.sync.drain_events().as_slice(),
            [SyncEvent::FetchFailed {
                stream: StreamKind::Dialogs,
                error: RpcError::Decode(_),
            }]
        ));
        assert!(matches!(
            trigger_fetch(&mut ctx, StreamKind::Dialogs),
            FetchOutcome::Issued(_)
        ));
    }

    #[test]
    fn transport_failure_clears_in_flight() {
        let mut ctx = Ctx::new(SyncConfig::default());
        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        assert_eq!(fail_transport(&mut ctx, "socket closed"), 1);
        assert!(!ctx.sync.cursor(StreamKind::Dialogs).in_flight());
        assert!(matches!(
            ctx.sync.drain_events().as_slice(),
            [SyncEvent::FetchFailed {
                error: RpcError::Transport(_),
                ..
            }]
        ));
    }

    #[test]
    fn contacts_are_requested_once_and_deduplicated() {
        let mut directory = Directory::with_dialogs(3);
        directory.contacts = vec![
            directory.dialogs[0].peer.clone(),
            Peer {
                id: 99,
                name: "Only Contact".into(),
                username: None,
            },
        ];
        let mut ctx = Ctx::new(SyncConfig::default());

        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        serve(&mut ctx, &directory);
        let contacts = ctx.sync.cursor(StreamKind::Contacts);
        assert!(contacts.is_complete());
        assert_eq!(contacts.offset(), 2);
        assert_eq!(ctx.sync.entries().len(), 4);
        assert_eq!(ctx.sync.entries()[3].peer.id, 99);

        assert_eq!(
            trigger_fetch(&mut ctx, StreamKind::Contacts),
            FetchOutcome::Complete
        );
    }

    #[test]
    fn preload_all_chains_pages_until_complete() {
        let directory = Directory::with_dialogs(123);
        let mut ctx = Ctx::new(SyncConfig {
            preload_all: true,
            ..SyncConfig::default()
        });

        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        let served = serve(&mut ctx, &directory);
        let dialog_requests = served
            .iter()
            .filter(|request| matches!(request, Request::GetDialogs { .. }))
            .count();
        assert_eq!(dialog_requests, 4);
        assert_eq!(ctx.sync.cursor(StreamKind::Dialogs).offset(), 123);
        assert!(ctx.sync.is_synced());
    }

    #[test]
    fn merged_entries_are_written_through() {
        let directory = Directory::with_dialogs(2);
        let mut ctx = Ctx::new(SyncConfig::default());
        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        serve(&mut ctx, &directory);

        let keys: Vec<_> = ctx.storage.keys().collect();
        assert_eq!(keys, vec!["dialog/1", "dialog/2"]);
        let stored: Dialog = serde_json::from_slice(&ctx.storage.get("dialog/2").unwrap()).unwrap();
        assert_eq!(stored.peer.name, "Peer 2");
    }

    #[test]
    fn cancelled_fetch_ignores_late_response() {
        let directory = Directory::with_dialogs(5);
        let mut ctx = Ctx::new(SyncConfig::default());
        let FetchOutcome::Issued(id) = trigger_fetch(&mut ctx, StreamKind::Dialogs) else {
            panic!("expected a request to be issued");
        };
        assert!(cancel_fetch(&mut ctx, StreamKind::Dialogs));
        assert!(!cancel_fetch(&mut ctx, StreamKind::Dialogs));

        let late = Frame::Response {
            id,
            payload: directory.answer(
                &Request::GetDialogs {
                    offset: 0,
                    limit: 20,
                }
                .encode()
                .unwrap(),
            ),
        };
        assert!(!deliver_frame(&mut ctx, &encode_frame(&late).unwrap()).unwrap());
        assert!(ctx.sync.entries().is_empty());
        assert_eq!(ctx.sync.cursor(StreamKind::Dialogs).offset(), 0);
    }

    #[test]
    fn filter_never_fetches() {
        let directory = Directory::with_dialogs(3);
        let mut ctx = Ctx::new(SyncConfig::default());
        trigger_fetch(&mut ctx, StreamKind::Dialogs);
        serve(&mut ctx, &directory);

        assert!(ctx.sync.on_filter_changed("peer 2"));
        assert!(!ctx.sync.on_filter_changed("Peer 2"));
        assert!(!ctx.rpc.has_outbound());
        let ids: Vec<_> = ctx.sync.entries().iter().map(|row| row.peer.id).collect();
        assert_eq!(ids, vec![2]);
    }
}
