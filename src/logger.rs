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

//! Per-policy call loggers.
//!
//! A [`CallLogger`] pairs a [`LogPolicy`] (how many header & message bytes to capture) with a
//! shared [`Sink`]. It has one method per lifecycle event; each builds a single [`LogEntry`] and
//! writes it to the sink before returning. One logger is shared by every call that resolved to
//! its policy; it holds nothing per-call & so needs no locking.

use crate::{
    call::{Metadata, PeerAddress},
    encoder::{encode_message, encode_metadata, encode_peer},
    entry::{CallId, EventType, LogEntry, Role},
    error::Result,
    sink::Sink,
};

use std::sync::Arc;

/// How much of a call to capture.
///
/// A budget of zero records that a field was present (and, for messages, its length) without
/// capturing any of its bytes; [`LogPolicy::UNBOUNDED`] captures everything.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogPolicy {
    max_header_bytes: usize,
    max_message_bytes: usize,
}

impl LogPolicy {
    /// The "no limit" budget
    pub const UNBOUNDED: usize = i32::MAX as usize;

    pub const fn new(max_header_bytes: usize, max_message_bytes: usize) -> LogPolicy {
        LogPolicy {
            max_header_bytes,
            max_message_bytes,
        }
    }
    pub const fn unbounded() -> LogPolicy {
        LogPolicy::new(LogPolicy::UNBOUNDED, LogPolicy::UNBOUNDED)
    }
    pub const fn headers_only(max_header_bytes: usize) -> LogPolicy {
        LogPolicy::new(max_header_bytes, 0)
    }
    pub const fn messages_only(max_message_bytes: usize) -> LogPolicy {
        LogPolicy::new(0, max_message_bytes)
    }
    pub const fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }
    pub const fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }
}

impl std::default::Default for LogPolicy {
    fn default() -> Self {
        LogPolicy::unbounded()
    }
}

/// Renders in configuration syntax, e.g. `{h:256;m}`
impl std::fmt::Display for LogPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn budget(f: &mut std::fmt::Formatter<'_>, tag: char, n: usize) -> std::fmt::Result {
            if n == LogPolicy::UNBOUNDED {
                write!(f, "{}", tag)
            } else {
                write!(f, "{}:{}", tag, n)
            }
        }
        write!(f, "{{")?;
        budget(f, 'h', self.max_header_bytes)?;
        write!(f, ";")?;
        budget(f, 'm', self.max_message_bytes)?;
        write!(f, "}}")
    }
}

/// Turns call lifecycle events into [`LogEntry`]s under a fixed [`LogPolicy`].
pub struct CallLogger {
    policy: LogPolicy,
    sink: Arc<dyn Sink>,
}

impl std::fmt::Debug for CallLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLogger")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CallLogger {
    pub fn new(policy: LogPolicy, sink: Arc<dyn Sink>) -> CallLogger {
        CallLogger { policy, sink }
    }
    pub fn policy(&self) -> LogPolicy {
        self.policy
    }

    fn log_metadata(
        &self,
        event: EventType,
        metadata: &Metadata,
        role: Role,
        call_id: CallId,
        peer: Option<&PeerAddress>,
    ) -> Result<()> {
        self.sink.write(LogEntry::metadata(
            event,
            role,
            call_id,
            encode_metadata(metadata, self.policy.max_header_bytes),
            peer.map(encode_peer),
        ))
    }

    fn log_message(
        &self,
        event: EventType,
        message: &[u8],
        compressed: bool,
        role: Role,
        call_id: CallId,
    ) -> Result<()> {
        self.sink.write(LogEntry::message(
            event,
            role,
            call_id,
            encode_message(message, compressed, self.policy.max_message_bytes),
        ))
    }

    /// Log the sending of initial metadata
    pub fn log_send_initial_metadata(
        &self,
        metadata: &Metadata,
        role: Role,
        call_id: CallId,
    ) -> Result<()> {
        self.log_metadata(EventType::SendInitialMetadata, metadata, role, call_id, None)
    }

    /// Log the receipt of initial metadata, along with the peer it came from
    pub fn log_recv_initial_metadata(
        &self,
        metadata: &Metadata,
        role: Role,
        call_id: CallId,
        peer: &PeerAddress,
    ) -> Result<()> {
        self.log_metadata(
            EventType::RecvInitialMetadata,
            metadata,
            role,
            call_id,
            Some(peer),
        )
    }

    pub fn log_send_trailing_metadata(
        &self,
        metadata: &Metadata,
        role: Role,
        call_id: CallId,
    ) -> Result<()> {
        self.log_metadata(EventType::SendTrailingMetadata, metadata, role, call_id, None)
    }

    pub fn log_recv_trailing_metadata(
        &self,
        metadata: &Metadata,
        role: Role,
        call_id: CallId,
    ) -> Result<()> {
        self.log_metadata(EventType::RecvTrailingMetadata, metadata, role, call_id, None)
    }

    /// Log trailing metadata from `role`'s point of view: servers send trailers, clients receive
    /// them.
    pub fn log_trailing_metadata(
        &self,
        metadata: &Metadata,
        role: Role,
        call_id: CallId,
    ) -> Result<()> {
        match role {
            Role::Server => self.log_send_trailing_metadata(metadata, role, call_id),
            Role::Client => self.log_recv_trailing_metadata(metadata, role, call_id),
        }
    }

    /// Log a message this side sent
    pub fn log_outbound_message(
        &self,
        message: &[u8],
        compressed: bool,
        role: Role,
        call_id: CallId,
    ) -> Result<()> {
        self.log_message(EventType::SendMessage, message, compressed, role, call_id)
    }

    /// Log a message this side received
    pub fn log_inbound_message(
        &self,
        message: &[u8],
        compressed: bool,
        role: Role,
        call_id: CallId,
    ) -> Result<()> {
        self.log_message(EventType::RecvMessage, message, compressed, role, call_id)
    }
}
