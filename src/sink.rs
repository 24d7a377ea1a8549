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

//! Where finished log entries go.
//!
//! This module defines the [`Sink`] trait that all implementations must support, along with a few
//! simple implementations: an in-memory collector, a length-delimited stream writer, and UDP &
//! Unix datagram senders.
//!
//! # Examples
//!
//! To collect entries in memory (handy for tests):
//!
//! ```rust
//! use rpc_binlog::sink::MemorySink;
//! let sink = MemorySink::new();
//! assert!(sink.entries().is_empty());
//! ```
//!
//! To append entries to a file:
//!
//! ```no_run
//! use rpc_binlog::sink::WriterSink;
//! let sink = WriterSink::new(std::fs::File::create("/tmp/binlog.pb").unwrap());
//! ```
//!
//! To send each entry as a UDP datagram:
//!
//! ```no_run
//! use rpc_binlog::sink::UdpSink;
//! let sink = UdpSink::new("127.0.0.1:5514").unwrap();
//! ```

use crate::{
    entry::LogEntry,
    error::{Error, Result},
};

use backtrace::Backtrace;

use std::{
    io::Write,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    sync::{Mutex, PoisonError},
};

#[cfg(target_os = "linux")]
use std::{os::unix::net::UnixDatagram, path::Path};

/// Operations all sinks must support.
///
/// A sink is shared by every call that resolved to a given policy, across threads; it is
/// responsible for whatever serialization it needs between concurrent writers. Entries are handed
/// over by value. A failure is returned to the logger, which returns it to whoever triggered the
/// lifecycle event; sinks should not retry on their own.
pub trait Sink: Send + Sync {
    fn write(&self, entry: LogEntry) -> Result<()>;
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Sink {
        source: "sink lock poisoned".into(),
        back: Backtrace::new(),
    }
}

/// Collects entries in memory, in the order they were written.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }
    /// A copy of everything written so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
    /// Remove & return everything written so far
    pub fn take(&self) -> Vec<LogEntry> {
        std::mem::take(
            &mut *self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl Sink for MemorySink {
    fn write(&self, entry: LogEntry) -> Result<()> {
        self.entries.lock().map_err(poisoned)?.push(entry);
        Ok(())
    }
}

/// Writes each entry, protobuf-encoded & length-delimited, to an [`std::io::Write`]
/// implementation, flushing after each one.
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> WriterSink<W> {
        WriterSink {
            writer: Mutex::new(writer),
        }
    }
    /// Recover the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(poisoned)
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn write(&self, entry: LogEntry) -> Result<()> {
        let buf = entry.encode_length_delimited_to_vec();
        let mut writer = self.writer.lock().map_err(poisoned)?;
        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(())
    }
}

/// Sends each entry, protobuf-encoded, as a single UDP datagram.
pub struct UdpSink {
    socket: UdpSocket,
}

impl UdpSink {
    /// Construct a [`Sink`] implementation that sends to `addr`.
    ///
    /// Each address `addr` resolves to is tried in turn, from a socket bound to any available port
    /// on all interfaces of that address' family.
    pub fn new<A: ToSocketAddrs>(addr: A) -> Result<UdpSink> {
        let mut last_err = None;
        for target in addr.to_socket_addrs()? {
            let local: SocketAddr = match target {
                SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
                SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
            };
            match UdpSocket::bind(local).and_then(|socket| socket.connect(target).map(|_| socket)) {
                Ok(socket) => return Ok(UdpSink { socket }),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err
            .unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "could not resolve to any addresses",
                )
            })
            .into())
    }
    /// The local address datagrams are sent from
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Sink for UdpSink {
    fn write(&self, entry: LogEntry) -> Result<()> {
        self.socket.send(&entry.encode_to_vec())?;
        Ok(())
    }
}

/// Sends each entry, protobuf-encoded, as a single datagram on a Unix socket.
#[cfg(target_os = "linux")]
pub struct UnixDatagramSink {
    socket: UnixDatagram,
}

#[cfg(target_os = "linux")]
impl UnixDatagramSink {
    /// Construct a [`Sink`] implementation via Unix datagram sockets at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<UnixDatagramSink> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(path)?;
        Ok(UnixDatagramSink { socket })
    }
}

#[cfg(target_os = "linux")]
impl Sink for UnixDatagramSink {
    fn write(&self, entry: LogEntry) -> Result<()> {
        self.socket.send(&entry.encode_to_vec())?;
        Ok(())
    }
}
