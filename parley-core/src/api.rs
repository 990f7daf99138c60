//! The handful of typed calls the sync controller issues.
//!
//! Bodies are JSON. Everything else the server speaks stays opaque to the
//! core.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::CoreError;

pub type PeerId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dialog {
    pub peer: Peer,
    #[serde(default)]
    pub unread_count: u32,
}

/// One page of dialogs. `count` is present when the server reports the
/// total explicitly (a "slice"); absent when the page is all it sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DialogsPage {
    pub dialogs: Vec<Dialog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContactsPage {
    pub contacts: Vec<Peer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    #[serde(rename = "messages.getDialogs")]
    GetDialogs { offset: u32, limit: u32 },
    #[serde(rename = "contacts.getContacts")]
    GetContacts,
}

impl Request {
    pub fn encode(&self) -> Result<Bytes, CoreError> {
        encode_body(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        decode_body(bytes)
    }
}

pub fn encode_body<T: Serialize>(value: &T) -> Result<Bytes, CoreError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| CoreError::Serialization(err.to_string()))
}

pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    serde_json::from_slice(bytes).map_err(|err| CoreError::Serialization(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_method_tag() {
        let bytes = Request::GetDialogs {
            offset: 50,
            limit: 50,
        }
        .encode()
        .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["method"], "messages.getDialogs");
        assert_eq!(json["params"]["offset"], 50);

        let contacts = Request::decode(br#"{"method":"contacts.getContacts"}"#).unwrap();
        assert_eq!(contacts, Request::GetContacts);
    }

    #[test]
    fn dialogs_page_count_is_optional() {
        let page: DialogsPage =
            decode_body(br#"{"dialogs":[{"peer":{"id":1,"name":"John Smith"}}]}"#).unwrap();
        assert_eq!(page.count, None);
        assert_eq!(page.dialogs[0].unread_count, 0);
        assert_eq!(page.dialogs[0].peer.username, None);
    }
}
