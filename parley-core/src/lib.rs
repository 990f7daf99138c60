//! Transport core of the Parley messaging client.
//!
//! Everything in this crate is sans-IO: the command codec, the RPC wire
//! frames, the pending-request table, the dialog list and the paginated sync
//! controller only ever see bytes handed to them by a driver. The `Session`
//! type ties them together into the context object a driver owns.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod api;
pub mod command;
pub mod dialogs;
pub mod frame;
pub mod rpc;
pub mod session;
pub mod storage;
pub mod sync;

pub use api::{ContactsPage, Dialog, DialogsPage, Peer, PeerId, Request};
pub use command::{Command, CommandBuffer, ProtocolFault, decode_commands, encode_command};
pub use dialogs::{DialogList, Row, RowHandle, Section};
pub use frame::{ErrorBody, Frame, decode_frame, encode_frame};
pub use rpc::{
    Completion, Priority, RpcClient, RpcContext, RpcError, RpcResult, deliver_frame, fail_transport,
};
pub use session::Session;
pub use storage::{MemoryStorage, Storage, StorageError};
pub use sync::{
    FetchOutcome, StreamKind, SyncConfig, SyncContext, SyncController, SyncCursor, SyncEvent,
    cancel_fetch, trigger_fetch,
};

/// Correlation token for one RPC request. Allocated monotonically per client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid frame length")]
    InvalidFrameLength,
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    #[error("unsupported frame kind {0}")]
    UnsupportedFrameKind(u8),
    #[error("unexpected {0} frame on client side")]
    UnexpectedFrame(&'static str),
    #[error("serialization error: {0}")]
    Serialization(String),
}
