// Copyright (C) 2022-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of rpc-binlog.
//
// rpc-binlog is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// rpc-binlog is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with rpc-binlog.  If
// not, see <http://www.gnu.org/licenses/>.

//! The published wire form of a [`LogEntry`].
//!
//! Log entries are exchanged between implementations as protobuf-encoded `GrpcLogEntry` messages.
//! The types below mirror that schema field-for-field (tags included) so that [`prost`] can
//! encode them without a build step. They exist only to be encoded; the rest of the crate deals
//! in [`LogEntry`] and friends.
//!
//! [`prost`]: https://docs.rs/prost

use crate::entry::{CallId, EventType, LogEntry, MessageRecord, MetadataEntry, Payload, Peer};
use crate::entry::{PeerType, Role};

use prost::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EntryType {
    UnknownType = 0,
    SendInitialMetadata = 1,
    SendTrailingMetadata = 2,
    SendMessage = 3,
    RecvInitialMetadata = 4,
    RecvTrailingMetadata = 5,
    RecvMessage = 6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EntryLogger {
    UnknownLogger = 0,
    Client = 1,
    Server = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum WirePeerType {
    UnknownPeertype = 0,
    PeerIpv4 = 1,
    PeerIpv6 = 2,
    PeerUnix = 3,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GrpcLogEntry {
    #[prost(enumeration = "EntryType", tag = "1")]
    pub r#type: i32,
    #[prost(enumeration = "EntryLogger", tag = "2")]
    pub logger: i32,
    #[prost(message, optional, tag = "3")]
    pub call_id: Option<Uint128>,
    #[prost(oneof = "WirePayload", tags = "4, 5")]
    pub payload: Option<WirePayload>,
    #[prost(message, optional, tag = "6")]
    pub peer: Option<WirePeer>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum WirePayload {
    #[prost(message, tag = "4")]
    Metadata(WireMetadata),
    #[prost(message, tag = "5")]
    Message(WireMessage),
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Uint128 {
    #[prost(fixed64, tag = "1")]
    pub high: u64,
    #[prost(fixed64, tag = "2")]
    pub low: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireMetadata {
    #[prost(message, repeated, tag = "1")]
    pub entry: Vec<WireMetadataEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireMetadataEntry {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireMessage {
    #[prost(uint32, tag = "1")]
    pub flags: u32,
    #[prost(uint32, tag = "2")]
    pub length: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WirePeer {
    #[prost(enumeration = "WirePeerType", tag = "1")]
    pub peer_type: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub peer: Vec<u8>,
}

impl std::convert::From<EventType> for EntryType {
    fn from(x: EventType) -> Self {
        match x {
            EventType::SendInitialMetadata => EntryType::SendInitialMetadata,
            EventType::RecvInitialMetadata => EntryType::RecvInitialMetadata,
            EventType::SendTrailingMetadata => EntryType::SendTrailingMetadata,
            EventType::RecvTrailingMetadata => EntryType::RecvTrailingMetadata,
            EventType::SendMessage => EntryType::SendMessage,
            EventType::RecvMessage => EntryType::RecvMessage,
        }
    }
}

impl std::convert::From<Role> for EntryLogger {
    fn from(x: Role) -> Self {
        match x {
            Role::Client => EntryLogger::Client,
            Role::Server => EntryLogger::Server,
        }
    }
}

impl std::convert::From<PeerType> for WirePeerType {
    fn from(x: PeerType) -> Self {
        match x {
            PeerType::Unknown => WirePeerType::UnknownPeertype,
            PeerType::Ipv4 => WirePeerType::PeerIpv4,
            PeerType::Ipv6 => WirePeerType::PeerIpv6,
            PeerType::Unix => WirePeerType::PeerUnix,
        }
    }
}

impl std::convert::From<CallId> for Uint128 {
    fn from(x: CallId) -> Self {
        Uint128 {
            high: x.hi,
            low: x.lo,
        }
    }
}

impl std::convert::From<&Peer> for WirePeer {
    fn from(x: &Peer) -> Self {
        WirePeer {
            peer_type: WirePeerType::from(x.peer_type) as i32,
            peer: x.address.clone(),
        }
    }
}

impl std::convert::From<&MetadataEntry> for WireMetadataEntry {
    fn from(x: &MetadataEntry) -> Self {
        WireMetadataEntry {
            key: x.key.clone(),
            value: x.value.clone(),
        }
    }
}

impl std::convert::From<&MessageRecord> for WireMessage {
    fn from(x: &MessageRecord) -> Self {
        WireMessage {
            flags: x.flags,
            // The schema's length is a uint32; anything larger than that is pinned.
            length: u32::try_from(x.length).unwrap_or(u32::MAX),
            data: x.data.clone(),
        }
    }
}

impl std::convert::From<&LogEntry> for GrpcLogEntry {
    fn from(x: &LogEntry) -> Self {
        GrpcLogEntry {
            r#type: EntryType::from(x.event()) as i32,
            logger: EntryLogger::from(x.role()) as i32,
            call_id: Some(x.call_id().into()),
            payload: Some(match x.payload() {
                Payload::Metadata(entries) => WirePayload::Metadata(WireMetadata {
                    entry: entries.iter().map(WireMetadataEntry::from).collect(),
                }),
                Payload::Message(msg) => WirePayload::Message(msg.into()),
            }),
            peer: x.peer().map(WirePeer::from),
        }
    }
}

impl LogEntry {
    /// Encode this entry as a protobuf `GrpcLogEntry`
    pub fn encode_to_vec(&self) -> Vec<u8> {
        GrpcLogEntry::from(self).encode_to_vec()
    }
    /// Encode this entry as a protobuf `GrpcLogEntry`, prefixed with its varint-encoded length
    pub fn encode_length_delimited_to_vec(&self) -> Vec<u8> {
        GrpcLogEntry::from(self).encode_length_delimited_to_vec()
    }
}
