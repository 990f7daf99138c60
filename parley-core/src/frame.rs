//! RPC wire frames.
//!
//! Layout: `len: u32 LE | kind: u8 | request_id: u64 LE | body`, where `len`
//! counts every byte after itself. Request and response bodies are opaque;
//! error bodies are JSON.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{CoreError, RequestId};

pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
const HEADER_BYTES: usize = 4 + 1 + 8;

/// Server-reported failure for one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: i32,
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

impl ErrorBody {
    pub fn new(code: i32, kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code,
            kind: kind.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request { id: RequestId, payload: Bytes },
    Response { id: RequestId, payload: Bytes },
    Error { id: RequestId, error: ErrorBody },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request = 0,
    Response = 1,
    Error = 2,
}

impl Frame {
    pub fn id(&self) -> RequestId {
        match self {
            Frame::Request { id, .. } | Frame::Response { id, .. } | Frame::Error { id, .. } => {
                *id
            }
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Request { .. } => FrameKind::Request,
            Frame::Response { .. } => FrameKind::Response,
            Frame::Error { .. } => FrameKind::Error,
        }
    }
}

pub fn encode_frame(frame: &Frame) -> Result<Bytes, CoreError> {
    let body: Bytes = match frame {
        Frame::Request { payload, .. } | Frame::Response { payload, .. } => payload.clone(),
        Frame::Error { error, .. } => serde_json::to_vec(error)
            .map_err(|err| CoreError::Serialization(err.to_string()))?
            .into(),
    };

    let total = HEADER_BYTES
        .checked_add(body.len())
        .ok_or(CoreError::InvalidFrameLength)?;
    if total > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge {
            size: total,
            max: MAX_FRAME_BYTES,
        });
    }
    let frame_len = u32::try_from(total - 4).map_err(|_| CoreError::InvalidFrameLength)?;

    let mut out = BytesMut::with_capacity(total);
    out.put_u32_le(frame_len);
    out.put_u8(frame.kind() as u8);
    out.put_u64_le(frame.id().0);
    out.extend_from_slice(&body);
    Ok(out.freeze())
}

/// Read the kind byte and request id without touching the body.
pub fn decode_header(frame: &[u8]) -> Result<(u8, RequestId), CoreError> {
    if frame.len() < HEADER_BYTES {
        return Err(CoreError::InvalidFrameLength);
    }
    if frame.len() > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_BYTES,
        });
    }

    let mut cursor = frame;
    let expected_len = cursor.get_u32_le() as usize;
    if expected_len + 4 != frame.len() {
        return Err(CoreError::InvalidFrameLength);
    }

    let kind = cursor.get_u8();
    Ok((kind, RequestId(cursor.get_u64_le())))
}

pub fn decode_frame(frame: &[u8]) -> Result<Frame, CoreError> {
    let (kind, id) = decode_header(frame)?;
    let body = &frame[HEADER_BYTES..];

    match kind {
        x if x == FrameKind::Request as u8 => Ok(Frame::Request {
            id,
            payload: Bytes::copy_from_slice(body),
        }),
        x if x == FrameKind::Response as u8 => Ok(Frame::Response {
            id,
            payload: Bytes::copy_from_slice(body),
        }),
        x if x == FrameKind::Error as u8 => {
            let error: ErrorBody = serde_json::from_slice(body)
                .map_err(|err| CoreError::Serialization(err.to_string()))?;
            Ok(Frame::Error { id, error })
        }
        other => Err(CoreError::UnsupportedFrameKind(other)),
    }
}
