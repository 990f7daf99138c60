//! Pending-request table and outbound queue.
//!
//! The client never touches a socket. `send` queues an encoded request frame
//! and registers its completion; the driver drains frames with
//! `drain_outbound` and hands inbound frames back through `deliver_frame`.
//! A pending entry is removed before its completion runs, so a request id is
//! delivered at most once.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::{Frame, FrameKind, decode_frame, decode_header, encode_frame};
use crate::{CoreError, RequestId};

pub const DEFAULT_MAX_PENDING: usize = 256;

pub type RpcResult = Result<Bytes, RpcError>;

type CompletionFn<C> = Box<dyn FnOnce(&mut C, RpcResult)>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rpc error {code} {kind}: {description}")]
    Application {
        code: i32,
        kind: String,
        description: String,
    },
    #[error("too many pending requests (max {max})")]
    TooManyPending { max: usize },
    #[error("failed to encode request: {0}")]
    Encode(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Transport faults are retryable on the next caller-driven trigger.
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}

/// Higher values are written to the transport first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    pub const BACKGROUND: Priority = Priority(-10);
    pub const NORMAL: Priority = Priority(0);
    pub const INTERACTIVE: Priority = Priority(10);
}

struct PendingRequest<C> {
    issued_at: Instant,
    priority: Priority,
    completion: CompletionFn<C>,
}

#[derive(Debug)]
struct Outbound {
    id: RequestId,
    priority: Priority,
    frame: Bytes,
}

/// A terminal result detached from the pending table, ready to run.
pub struct Completion<C> {
    id: RequestId,
    result: RpcResult,
    callback: CompletionFn<C>,
}

impl<C> Completion<C> {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn result(&self) -> &RpcResult {
        &self.result
    }

    pub fn run(self, ctx: &mut C) {
        (self.callback)(ctx, self.result);
    }
}

impl<C> fmt::Debug for Completion<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("id", &self.id)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

pub struct RpcClient<C> {
    next_id: u64,
    max_pending: usize,
    pending: BTreeMap<RequestId, PendingRequest<C>>,
    outbound: Vec<Outbound>,
}

impl<C> Default for RpcClient<C> {
    fn default() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }
}

impl<C> fmt::Debug for RpcClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("next_id", &self.next_id)
            .field("max_pending", &self.max_pending)
            .field("pending", &self.pending.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}

impl<C> RpcClient<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            next_id: 0,
            max_pending: max_pending.max(1),
            pending: BTreeMap::new(),
            outbound: Vec::new(),
        }
    }

    /// Queue `payload` and register `completion` for its terminal result.
    ///
    /// Never blocks. The only synchronous failures are a full pending table
    /// and a payload that cannot be framed; the completion is dropped in
    /// both cases.
    pub fn send<F>(
        &mut self,
        payload: Bytes,
        priority: Priority,
        completion: F,
    ) -> Result<RequestId, RpcError>
    where
        F: FnOnce(&mut C, RpcResult) + 'static,
    {
        if self.pending.len() >= self.max_pending {
            warn!(
                pending = self.pending.len(),
                max_pending = self.max_pending,
                "too many pending requests; refusing new request"
            );
            return Err(RpcError::TooManyPending {
                max: self.max_pending,
            });
        }

        let id = RequestId(self.next_id + 1);
        let frame = encode_frame(&Frame::Request { id, payload })
            .map_err(|err| RpcError::Encode(err.to_string()))?;
        self.next_id = id.0;

        self.pending.insert(
            id,
            PendingRequest {
                issued_at: Instant::now(),
                priority,
                completion: Box::new(completion),
            },
        );
        self.enqueue(Outbound {
            id,
            priority,
            frame,
        });
        debug!(request_id = %id, priority = priority.0, "request queued");
        Ok(id)
    }

    fn enqueue(&mut self, item: Outbound) {
        let at = self
            .outbound
            .iter()
            .position(|queued| queued.priority < item.priority)
            .unwrap_or(self.outbound.len());
        self.outbound.insert(at, item);
    }

    /// Best-effort cancel. Returns `false` when the id already completed.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        self.outbound.retain(|queued| queued.id != id);
        let cancelled = self.pending.remove(&id).is_some();
        if cancelled {
            debug!(request_id = %id, "request cancelled");
        }
        cancelled
    }

    /// Re-prioritise every pending request, then re-sort the queue.
    ///
    /// Requests of equal priority keep their submission order.
    pub fn adjust_priorities<F>(&mut self, mut adjust: F)
    where
        F: FnMut(RequestId, Priority) -> Priority,
    {
        for (id, pending) in self.pending.iter_mut() {
            pending.priority = adjust(*id, pending.priority);
        }
        for queued in &mut self.outbound {
            if let Some(pending) = self.pending.get(&queued.id) {
                queued.priority = pending.priority;
            }
        }
        self.outbound
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    }

    pub fn set_priority(&mut self, id: RequestId, priority: Priority) -> bool {
        if !self.pending.contains_key(&id) {
            return false;
        }
        self.adjust_priorities(|candidate, current| {
            if candidate == id { priority } else { current }
        });
        true
    }

    pub fn priority(&self, id: RequestId) -> Option<Priority> {
        self.pending.get(&id).map(|pending| pending.priority)
    }

    /// Frames for the transport, highest priority first.
    pub fn drain_outbound(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbound)
            .into_iter()
            .map(|queued| queued.frame)
            .collect()
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.pending.keys().copied().collect()
    }

    /// Match an inbound frame against the pending table.
    ///
    /// `Ok(None)` means the id is unknown (late, duplicate or cancelled) and
    /// the frame was dropped.
    ///
    /// A frame whose header names a pending request but whose kind or body
    /// is malformed completes that request with `RpcError::Decode`.
    pub fn on_frame(&mut self, bytes: &[u8]) -> Result<Option<Completion<C>>, CoreError> {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                return match decode_header(bytes) {
                    Ok((kind, id))
                        if kind != FrameKind::Request as u8 && self.pending.contains_key(&id) =>
                    {
                        warn!(
                            request_id = %id,
                            kind,
                            error = %err,
                            "malformed frame for pending request"
                        );
                        Ok(self.complete(id, Err(RpcError::Decode(err.to_string()))))
                    }
                    _ => Err(err),
                };
            }
        };
        let (id, result) = match frame {
            Frame::Response { id, payload } => (id, Ok(payload)),
            Frame::Error { id, error } => (
                id,
                Err(RpcError::Application {
                    code: error.code,
                    kind: error.kind,
                    description: error.description,
                }),
            ),
            Frame::Request { .. } => return Err(CoreError::UnexpectedFrame("request")),
        };
        Ok(self.complete(id, result))
    }

    fn complete(&mut self, id: RequestId, result: RpcResult) -> Option<Completion<C>> {
        let Some(pending) = self.pending.remove(&id) else {
            debug!(request_id = %id, "dropping result for unknown request");
            return None;
        };
        self.outbound.retain(|queued| queued.id != id);
        debug!(
            request_id = %id,
            ok = result.is_ok(),
            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
            "request completed"
        );
        Some(Completion {
            id,
            result,
            callback: pending.completion,
        })
    }
}

/// Context object that owns the RPC client its completions run against.
pub trait RpcContext: Sized {
    fn rpc_mut(&mut self) -> &mut RpcClient<Self>;
}

/// Route one inbound frame; returns whether a completion ran.
pub fn deliver_frame<C: RpcContext>(ctx: &mut C, bytes: &[u8]) -> Result<bool, CoreError> {
    match ctx.rpc_mut().on_frame(bytes)? {
        Some(completion) => {
            completion.run(ctx);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Fail every request pending at the time of the fault with a uniform
/// transport error, in submission order. Returns how many completions ran.
///
/// Requests cancelled by an earlier completion during this pass are skipped;
/// requests issued during this pass stay pending for the next connection.
pub fn fail_transport<C: RpcContext>(ctx: &mut C, reason: &str) -> usize {
    let ids = {
        let rpc = ctx.rpc_mut();
        rpc.outbound.clear();
        rpc.pending_ids()
    };
    if !ids.is_empty() {
        warn!(
            pending = ids.len(),
            reason, "transport failure; failing pending requests"
        );
    }

    let mut failed = 0;
    for id in ids {
        let completion = ctx
            .rpc_mut()
            .complete(id, Err(RpcError::Transport(reason.to_owned())));
        if let Some(completion) = completion {
            completion.run(ctx);
            failed += 1;
        }
    }
    failed
}
