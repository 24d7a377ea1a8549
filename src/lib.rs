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
//! Capture-side RPC binary logging
//!
//! # Introduction
//!
//! A binary log ("binlog") is a record of what actually crossed the wire during an RPC: the
//! headers each side sent, the messages in each direction, the trailers that closed the call &
//! the peer at the other end. It is invaluable for debugging and auditing, but capturing
//! *everything* is rarely affordable, so this crate lets the operator say, per method, per
//! service or globally, how many bytes of headers & of each message are worth keeping.
//!
//! The pieces are:
//!
//! - a [configuration compiler](crate::config) that turns strings like
//!   `"*{h:256},pkg.Svc/Method{h;m:1024}"` into a [`Resolver`]
//! - a [`CallLogger`] per configured rule, which turns call events into [`LogEntry`] records
//!   under that rule's byte budgets
//! - [client & server interceptors](crate::interceptor), which wrap an RPC framework's calls
//!   (described by the traits in [`call`]) & report each event to the logger
//! - a [`Sink`] abstraction, along with a few implementations, to receive the finished records;
//!   the [`wire`] module defines their protobuf form
//!
//! # Usage
//!
//! ```rust
//! use rpc_binlog::{CallId, Metadata, MemorySink, Resolver, Role};
//! use std::sync::Arc;
//!
//! let sink = Arc::new(MemorySink::new());
//! let resolver = Resolver::compile(sink.clone(), "*{h},pkg.Svc/Echo{h:64;m:4}").unwrap();
//!
//! // Calls to methods without a rule of their own fall back to the global one
//! assert_eq!(resolver.resolve("other.Svc/Any").unwrap().policy().max_message_bytes(), 0);
//!
//! let logger = resolver.resolve("pkg.Svc/Echo").unwrap();
//! let call_id = CallId::new(0, 1);
//! logger
//!     .log_send_initial_metadata(&Metadata::new().with("k", "v"), Role::Client, call_id)
//!     .unwrap();
//! logger
//!     .log_outbound_message(b"hello, world", false, Role::Client, call_id)
//!     .unwrap();
//!
//! let entries = sink.take();
//! assert_eq!(entries.len(), 2);
//! let message = entries[1].message_record().unwrap();
//! assert_eq!(message.length, 12);
//! assert_eq!(message.data, b"hell");
//! ```
//!
//! In practice, the logger is driven by an interceptor rather than directly: ask the
//! [`Resolver`] for a [`BinlogClientInterceptor`] or [`BinlogServerInterceptor`] when a call
//! begins, and install it around the call.
//!
//! # Diagnostics
//!
//! The crate itself logs through [`tracing`]: each bound rule at `INFO`, each dropped clause at
//! `WARN`.
//!
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html

pub mod call;
pub mod config;
pub mod encoder;
pub mod entry;
pub mod error;
pub mod interceptor;
pub mod logger;
pub mod sink;
pub mod wire;

pub use call::{Attributes, Metadata, PeerAddress, Status};
pub use config::{ConfigWarning, Resolver};
pub use entry::{CallId, EventType, LogEntry, Role};
pub use error::{Error, Result};
pub use interceptor::{BinlogClientInterceptor, BinlogServerInterceptor};
pub use logger::{CallLogger, LogPolicy};
pub use sink::{MemorySink, Sink, WriterSink};
