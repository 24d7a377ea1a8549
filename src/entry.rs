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

//! The canonical log entry & its parts.
//!
//! One [`LogEntry`] is produced for each lifecycle event of a logged call. Entries are built by a
//! [`CallLogger`](crate::logger::CallLogger), handed by value to a [`Sink`](crate::sink::Sink),
//! and never modified after construction; the fields are therefore exposed only through
//! accessors.

/// A 128-bit value uniquely identifying one call within a process.
///
/// Generated once per call by the surrounding RPC framework and stamped onto every entry that
/// call produces.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CallId {
    pub hi: u64,
    pub lo: u64,
}

impl CallId {
    /// The all-zeroes id; only useful in tests
    pub const EMPTY: CallId = CallId { hi: 0, lo: 0 };

    pub const fn new(hi: u64, lo: u64) -> CallId {
        CallId { hi, lo }
    }
    pub const fn as_u128(&self) -> u128 {
        ((self.hi as u128) << 64) | self.lo as u128
    }
}

impl std::convert::From<u128> for CallId {
    fn from(x: u128) -> Self {
        CallId {
            hi: (x >> 64) as u64,
            lo: x as u64,
        }
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

/// Which side of the call produced an entry
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }
}

/// The six lifecycle moments of a call
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    SendInitialMetadata,
    RecvInitialMetadata,
    SendTrailingMetadata,
    RecvTrailingMetadata,
    SendMessage,
    RecvMessage,
}

/// How the remote peer was reached
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PeerType {
    Unknown,
    Ipv4,
    Ipv6,
    Unix,
}

/// One logged header: raw key & value bytes, never partially captured
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A logged message: its flags, true length & whatever prefix of it the budget allowed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    /// 1 if the message was compressed, else 0
    pub flags: u32,
    /// The length of the complete message, regardless of how much of it was captured
    pub length: usize,
    pub data: Vec<u8>,
}

/// The remote end of a call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub peer_type: PeerType,
    pub address: Vec<u8>,
}

/// Event-specific content of a [`LogEntry`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Metadata(Vec<MetadataEntry>),
    Message(MessageRecord),
}

/// A single, finished log record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    event: EventType,
    role: Role,
    call_id: CallId,
    peer: Option<Peer>,
    payload: Payload,
}

impl LogEntry {
    pub(crate) fn metadata(
        event: EventType,
        role: Role,
        call_id: CallId,
        entries: Vec<MetadataEntry>,
        peer: Option<Peer>,
    ) -> LogEntry {
        LogEntry {
            event,
            role,
            call_id,
            peer,
            payload: Payload::Metadata(entries),
        }
    }
    pub(crate) fn message(
        event: EventType,
        role: Role,
        call_id: CallId,
        message: MessageRecord,
    ) -> LogEntry {
        LogEntry {
            event,
            role,
            call_id,
            peer: None,
            payload: Payload::Message(message),
        }
    }
    pub fn event(&self) -> EventType {
        self.event
    }
    pub fn role(&self) -> Role {
        self.role
    }
    pub fn call_id(&self) -> CallId {
        self.call_id
    }
    /// Present only on [`EventType::RecvInitialMetadata`] entries
    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
    /// The captured headers, if this is a metadata event
    pub fn metadata_entries(&self) -> Option<&[MetadataEntry]> {
        match &self.payload {
            Payload::Metadata(entries) => Some(entries),
            Payload::Message(_) => None,
        }
    }
    /// The captured message, if this is a message event
    pub fn message_record(&self) -> Option<&MessageRecord> {
        match &self.payload {
            Payload::Message(msg) => Some(msg),
            Payload::Metadata(_) => None,
        }
    }
}
