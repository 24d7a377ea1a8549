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

//! The generic call abstraction [rpc-binlog](crate) hooks into.
//!
//! [rpc-binlog](crate) does not own a transport. Instead, an RPC framework implements the traits
//! in this module for its own client & server calls, and the binlog
//! [interceptors](crate::interceptor) wrap those implementations. Payloads are raw bytes: the
//! framework's marshaller has already run by the time a message gets here.

use crate::error::Result;

use bytes::Bytes;
use once_cell::sync::OnceCell;

use std::{net::SocketAddr, sync::Arc};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          call values                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An ordered collection of header key/value pairs, in their serialized (on-the-wire) form.
///
/// Order is preserved and a key may appear more than once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(Bytes, Bytes)>,
}

impl Metadata {
    pub fn new() -> Metadata {
        Metadata::default()
    }
    pub fn insert<K: Into<Bytes>, V: Into<Bytes>>(&mut self, key: K, value: V) {
        self.entries.push((key.into(), value.into()));
    }
    /// Builder-style [`insert`](Metadata::insert)
    pub fn with<K: Into<Bytes>, V: Into<Bytes>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (&k[..], &v[..]))
    }
}

impl<K: Into<Bytes>, V: Into<Bytes>> std::iter::FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Metadata {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// The status with which a call completed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub code: u32,
    pub message: Option<String>,
}

impl Status {
    pub fn ok() -> Status {
        Status {
            code: 0,
            message: None,
        }
    }
    pub fn new<S: Into<String>>(code: u32, message: S) -> Status {
        Status {
            code,
            message: Some(message.into()),
        }
    }
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// The remote address of a call, as exposed by the transport.
///
/// Transports that are not internet sockets need not depend on anything here: a local
/// (domain-socket) peer is [`PeerAddress::Local`], and anything else is [`PeerAddress::Other`]
/// carrying its textual rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerAddress {
    Inet(SocketAddr),
    /// A local domain socket, with its raw address bytes if the transport supplies them
    Local(Option<Vec<u8>>),
    Other(String),
    /// Stands in for a peer the call never exposed
    Dummy,
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerAddress::Inet(addr) => write!(f, "{}", addr),
            PeerAddress::Local(Some(path)) => write!(f, "unix:{}", String::from_utf8_lossy(path)),
            PeerAddress::Local(None) => write!(f, "unix:"),
            PeerAddress::Other(text) => write!(f, "{}", text),
            PeerAddress::Dummy => write!(f, "dummy-peer"),
        }
    }
}

impl std::convert::From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        PeerAddress::Inet(addr)
    }
}

/// Transport-level attributes of a call.
///
/// Cloning yields another handle onto the same attributes. The transport may learn the remote
/// address only once the stream is established, so it is set at most once, at any time.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
    remote_addr: Arc<OnceCell<PeerAddress>>,
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes::default()
    }
    pub fn with_remote_addr<A: Into<PeerAddress>>(addr: A) -> Attributes {
        let attrs = Attributes::default();
        attrs.set_remote_addr(addr);
        attrs
    }
    /// Record the remote address; returns false if one was already recorded
    pub fn set_remote_addr<A: Into<PeerAddress>>(&self, addr: A) -> bool {
        self.remote_addr.set(addr.into()).is_ok()
    }
    pub fn remote_addr(&self) -> Option<&PeerAddress> {
        self.remote_addr.get()
    }
    /// The remote address, or [`PeerAddress::Dummy`] if the transport never exposed one
    pub fn peer(&self) -> PeerAddress {
        self.remote_addr
            .get()
            .cloned()
            .unwrap_or(PeerAddress::Dummy)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          client side                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Receives the response side of a client call.
///
/// There are no default implementations: a wrapper that forgot to forward a callback would
/// silently drop it.
pub trait ClientCallListener: Send {
    /// The server's initial metadata arrived
    fn on_headers(&mut self, headers: Metadata) -> Result<()>;
    /// A response message arrived
    fn on_message(&mut self, message: Bytes) -> Result<()>;
    /// The call is over
    fn on_close(&mut self, status: Status, trailers: Metadata) -> Result<()>;
    /// The call can accept more outbound messages without buffering
    fn on_ready(&mut self) -> Result<()>;
}

/// The request side of a client call.
pub trait ClientCall: Send {
    /// Start the call, sending `headers` and registering `listener` for the response
    fn start(&mut self, listener: Box<dyn ClientCallListener>, headers: Metadata) -> Result<()>;
    /// Ask for up to `num_messages` more response messages
    fn request(&mut self, num_messages: usize) -> Result<()>;
    fn send_message(&mut self, message: Bytes) -> Result<()>;
    /// No more messages will be sent
    fn half_close(&mut self) -> Result<()>;
    fn cancel(&mut self, message: Option<&str>) -> Result<()>;
    fn attributes(&self) -> Attributes;
}

/// Creates client calls
pub trait Channel {
    fn new_call(&self, full_method_name: &str) -> Box<dyn ClientCall>;
}

/// Wraps the calls a [`Channel`] creates
pub trait ClientInterceptor {
    fn intercept_call(&self, full_method_name: &str, next: &dyn Channel) -> Box<dyn ClientCall>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          server side                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Receives the request side of a server call.
pub trait ServerCallListener: Send {
    /// A request message arrived
    fn on_message(&mut self, message: Bytes) -> Result<()>;
    /// The client will send no more messages
    fn on_half_close(&mut self) -> Result<()>;
    fn on_cancel(&mut self) -> Result<()>;
    fn on_complete(&mut self) -> Result<()>;
    fn on_ready(&mut self) -> Result<()>;
}

/// The response side of a server call.
pub trait ServerCall: Send {
    /// Ask for up to `num_messages` more request messages
    fn request(&mut self, num_messages: usize) -> Result<()>;
    fn send_headers(&mut self, headers: Metadata) -> Result<()>;
    fn send_message(&mut self, message: Bytes) -> Result<()>;
    fn close(&mut self, status: Status, trailers: Metadata) -> Result<()>;
    fn is_cancelled(&self) -> bool;
    fn attributes(&self) -> Attributes;
    fn full_method_name(&self) -> &str;
}

/// Application logic for an incoming call
pub trait ServerCallHandler {
    fn start_call(
        &self,
        call: Box<dyn ServerCall>,
        headers: Metadata,
    ) -> Result<Box<dyn ServerCallListener>>;
}

/// Sits between the transport & a [`ServerCallHandler`]
pub trait ServerInterceptor {
    fn intercept_call(
        &self,
        call: Box<dyn ServerCall>,
        headers: Metadata,
        next: &dyn ServerCallHandler,
    ) -> Result<Box<dyn ServerCallListener>>;
}
