use std::fmt;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::dialogs::Row;
use crate::rpc::{self, RpcClient, RpcContext};
use crate::storage::Storage;
use crate::sync::{self, FetchOutcome, StreamKind, SyncConfig, SyncContext, SyncController, SyncEvent};
use crate::CoreError;

/// The context object a driver owns: RPC table, sync state and storage.
///
/// Completions run against the session while the driver is inside
/// `handle_frame` or `transport_failed`; `end_tick` runs after each of them.
pub struct Session {
    rpc: RpcClient<Session>,
    sync: SyncController,
    storage: Box<dyn Storage>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("rpc", &self.rpc)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl RpcContext for Session {
    fn rpc_mut(&mut self) -> &mut RpcClient<Self> {
        &mut self.rpc
    }
}

impl SyncContext for Session {
    fn sync_mut(&mut self) -> &mut SyncController {
        &mut self.sync
    }

    fn storage_mut(&mut self) -> &mut dyn Storage {
        self.storage.as_mut()
    }
}

impl Session {
    pub fn new(config: SyncConfig, max_pending: usize, storage: Box<dyn Storage>) -> Self {
        Self {
            rpc: RpcClient::with_max_pending(max_pending),
            sync: SyncController::new(config),
            storage,
        }
    }

    pub fn rpc(&self) -> &RpcClient<Session> {
        &self.rpc
    }

    pub fn sync(&self) -> &SyncController {
        &self.sync
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn trigger_fetch(&mut self, stream: StreamKind) -> FetchOutcome {
        sync::trigger_fetch(self, stream)
    }

    pub fn cancel_fetch(&mut self, stream: StreamKind) -> bool {
        sync::cancel_fetch(self, stream)
    }

    /// Route one inbound transport frame, then close the tick.
    pub fn handle_frame(&mut self, bytes: &[u8]) -> Result<bool, CoreError> {
        let delivered = rpc::deliver_frame(self, bytes);
        self.end_tick();
        delivered
    }

    /// Fail everything pending after the transport went away.
    pub fn transport_failed(&mut self, reason: &str) -> usize {
        let failed = rpc::fail_transport(self, reason);
        self.end_tick();
        failed
    }

    pub fn outbound(&mut self) -> Vec<Bytes> {
        self.rpc.drain_outbound()
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        self.sync.drain_events()
    }

    pub fn on_filter_changed(&mut self, text: &str) -> bool {
        self.sync.on_filter_changed(text)
    }

    pub fn clear_filter(&mut self) -> bool {
        self.sync.clear_filter()
    }

    pub fn entries(&self) -> Vec<&Row> {
        self.sync.entries()
    }

    /// Compact tombstoned rows and flush storage writes.
    pub fn end_tick(&mut self) {
        let reclaimed = self.sync.list_mut().compact();
        if reclaimed > 0 {
            debug!(reclaimed, "compacted dialog list");
        }
        if let Err(err) = self.storage.flush() {
            warn!(error = %err, "storage flush failed");
        }
    }
}
