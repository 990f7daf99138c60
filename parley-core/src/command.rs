//! Command protocol spoken between a running instance and later launches.
//!
//! A unit on the wire is `PREFIX:payload;`. Payloads are escaped so that any
//! text survives a byte-oriented, `;`-delimited stream: every UTF-16 code
//! unit outside printable ASCII, plus `%` and `;`, becomes `%` followed by
//! four lowercase hex digits.

use bytes::{Buf, BytesMut};
use thiserror::Error;

pub const COMMAND_DELIMITER: u8 = b';';
pub const ESCAPE_SENTINEL: char = '%';
/// Upper bound for a forwarded start URL, counted after unescaping.
pub const MAX_START_URL_CHARS: usize = 8192;
/// A peer that never sends a delimiter is cut off once its buffer grows past this.
pub const MAX_COMMAND_BUFFER_BYTES: usize = 256 * 1024;

const PREFIX_CMD: &[u8] = b"CMD:";
const PREFIX_RES: &[u8] = b"RES:";
const PREFIX_SEND: &[u8] = b"SEND:";
const PREFIX_OPEN: &[u8] = b"OPEN:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the owning instance to perform an action, e.g. `show`.
    Cmd(String),
    /// Acknowledgment carrying the owning process id.
    Res(u32),
    /// Forward a file path to the owning instance.
    Send(String),
    /// Forward a deep-link URL to the owning instance.
    Open(String),
}

impl Command {
    pub fn prefix(&self) -> &'static str {
        match self {
            Command::Cmd(_) => "CMD:",
            Command::Res(_) => "RES:",
            Command::Send(_) => "SEND:",
            Command::Open(_) => "OPEN:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolFault {
    #[error("unknown command {0:?}")]
    UnknownPrefix(String),
    #[error("invalid process id {0:?} in RES command")]
    InvalidPid(String),
    #[error("command buffer overflow ({len} bytes without delimiter)")]
    Overflow { len: usize },
}

pub type DecodedUnit = Result<Command, ProtocolFault>;

pub fn encode_command(command: &Command) -> Vec<u8> {
    let payload = match command {
        Command::Cmd(word) => escape_to_7bit(word),
        Command::Res(pid) => pid.to_string(),
        Command::Send(path) => escape_to_7bit(path),
        Command::Open(url) => escape_to_7bit(url),
    };

    let prefix = command.prefix();
    let mut out = Vec::with_capacity(prefix.len() + payload.len() + 1);
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(payload.as_bytes());
    out.push(COMMAND_DELIMITER);
    out
}

/// Decode every complete unit in `buffer`.
///
/// Returns the decoded units in order and the unconsumed tail, which is
/// everything after the last delimiter.
pub fn decode_commands(buffer: &[u8]) -> (Vec<DecodedUnit>, &[u8]) {
    let mut units = Vec::new();
    let mut from = 0;
    while let Some(pos) = buffer[from..]
        .iter()
        .position(|&byte| byte == COMMAND_DELIMITER)
    {
        units.push(parse_unit(&buffer[from..from + pos]));
        from += pos + 1;
    }
    (units, &buffer[from..])
}

fn parse_unit(unit: &[u8]) -> DecodedUnit {
    if let Some(payload) = unit.strip_prefix(PREFIX_CMD) {
        return Ok(Command::Cmd(unescape_from_7bit(&latin1(payload))));
    }
    if let Some(payload) = unit.strip_prefix(PREFIX_SEND) {
        return Ok(Command::Send(unescape_from_7bit(&latin1(payload))));
    }
    if let Some(payload) = unit.strip_prefix(PREFIX_OPEN) {
        return Ok(Command::Open(unescape_from_7bit(&latin1(payload))));
    }
    if let Some(payload) = unit.strip_prefix(PREFIX_RES) {
        return std::str::from_utf8(payload)
            .ok()
            .and_then(|digits| digits.parse::<u32>().ok())
            .map(Command::Res)
            .ok_or_else(|| ProtocolFault::InvalidPid(latin1(payload)));
    }
    Err(ProtocolFault::UnknownPrefix(latin1(unit)))
}

/// Bytes on the wire are single-byte characters.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

pub fn escape_to_7bit(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        if needs_escape(unit) {
            out.push(ESCAPE_SENTINEL);
            for shift in [12, 8, 4, 0] {
                out.push(to_hex(unit >> shift));
            }
        } else {
            out.push(char::from(unit as u8));
        }
    }
    out
}

pub fn unescape_from_7bit(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut units: Vec<u16> = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ESCAPE_SENTINEL
            && let Some(unit) = chars.get(i + 1..i + 5).and_then(parse_hex_unit)
        {
            units.push(unit);
            i += 5;
            continue;
        }
        let mut encoded = [0_u16; 2];
        units.extend_from_slice(chars[i].encode_utf16(&mut encoded));
        i += 1;
    }
    String::from_utf16_lossy(&units)
}

fn needs_escape(unit: u16) -> bool {
    unit < 0x20
        || unit > 0x7e
        || unit == ESCAPE_SENTINEL as u16
        || unit == u16::from(COMMAND_DELIMITER)
}

fn to_hex(value: u16) -> char {
    let nibble = (value & 0x000f) as u8;
    char::from(if nibble >= 10 {
        b'a' + (nibble - 10)
    } else {
        b'0' + nibble
    })
}

fn parse_hex_unit(digits: &[char]) -> Option<u16> {
    digits.iter().try_fold(0_u16, |acc, digit| {
        digit.to_digit(16).map(|value| (acc << 4) | value as u16)
    })
}

/// Per-peer accumulator for the streaming decoder.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    pending: BytesMut,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every unit that became complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodedUnit> {
        self.pending.extend_from_slice(bytes);
        let (units, leftover) = {
            let (units, rest) = decode_commands(&self.pending);
            (units, rest.len())
        };
        let consumed = self.pending.len() - leftover;
        self.pending.advance(consumed);

        if self.pending.len() > MAX_COMMAND_BUFFER_BYTES {
            let len = self.pending.len();
            self.pending.clear();
            let mut units = units;
            units.push(Err(ProtocolFault::Overflow { len }));
            return units;
        }
        units
    }

    pub fn leftover(&self) -> &[u8] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
