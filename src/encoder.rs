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

//! Wire encoding primitives.
//!
//! # Introduction
//!
//! The translation from call lifecycle events to log entries occurs in three parts:
//!
//! 1. the [interceptors](crate::interceptor) notice the event
//!
//! 2. a [`CallLogger`](crate::logger::CallLogger) assembles a [`LogEntry`] for it
//!
//! 3. a [`Sink`](crate::sink::Sink) stores or forwards that entry
//!
//! This module supplies the field encoders used in step 2. They are pure functions: given the
//! same inputs & budgets they produce the same fields, byte-for-byte. That matters, since other
//! readers & writers of the same log stream depend on the exact truncation rules implemented here.
//!
//! [`LogEntry`]: crate::entry::LogEntry

use crate::{
    call::{Metadata, PeerAddress},
    entry::{MessageRecord, MetadataEntry, Peer, PeerType},
};

use bytes::BufMut;

use std::net::SocketAddr;

/// Capture as many headers as will fit in `max_header_bytes`.
///
/// Pairs are considered in order; each one whose key & value fit in what remains of the budget is
/// captured whole, and each one that doesn't is skipped. A skipped pair does *not* end the scan:
/// a later, smaller pair may still fit. A pair is never split.
pub fn encode_metadata(metadata: &Metadata, max_header_bytes: usize) -> Vec<MetadataEntry> {
    let mut entries = Vec::new();
    let mut written = 0usize;
    for (key, value) in metadata.iter() {
        // Budget exhausted; nothing further can fit.
        if written >= max_header_bytes {
            break;
        }
        let cb = key.len() + value.len();
        if written + cb <= max_header_bytes {
            entries.push(MetadataEntry {
                key: key.to_vec(),
                value: value.to_vec(),
            });
            written += cb;
        }
    }
    entries
}

/// The flags field for a message
pub fn flags_for_message(compressed: bool) -> u32 {
    if compressed {
        1
    } else {
        0
    }
}

/// Record a message, capturing at most `max_message_bytes` of it.
///
/// The length & flags are always recorded, so a budget of zero still notes that a message of a
/// given size went by.
pub fn encode_message(message: &[u8], compressed: bool, max_message_bytes: usize) -> MessageRecord {
    let cb = std::cmp::min(max_message_bytes, message.len());
    MessageRecord {
        flags: flags_for_message(compressed),
        length: message.len(),
        data: message[..cb].to_vec(),
    }
}

/// Describe the remote end of a call.
///
/// Internet peers are encoded as the raw address bytes followed by the port in two bytes,
/// big-endian. Local (domain-socket) peers carry whatever raw address the transport handed us, if
/// any. Anything else falls back to the peer's textual rendering.
pub fn encode_peer(address: &PeerAddress) -> Peer {
    match address {
        PeerAddress::Inet(SocketAddr::V4(addr)) => {
            let mut buf = Vec::with_capacity(6);
            buf.put_slice(&addr.ip().octets());
            buf.put_u16(addr.port());
            Peer {
                peer_type: PeerType::Ipv4,
                address: buf,
            }
        }
        PeerAddress::Inet(SocketAddr::V6(addr)) => {
            let mut buf = Vec::with_capacity(18);
            buf.put_slice(&addr.ip().octets());
            buf.put_u16(addr.port());
            Peer {
                peer_type: PeerType::Ipv6,
                address: buf,
            }
        }
        PeerAddress::Local(raw) => Peer {
            peer_type: PeerType::Unix,
            address: raw.clone().unwrap_or_default(),
        },
        PeerAddress::Other(_) | PeerAddress::Dummy => Peer {
            peer_type: PeerType::Unknown,
            address: address.to_string().into_bytes(),
        },
    }
}

#[cfg(test)]
mod test {

    use super::*;

    fn keys(entries: &[MetadataEntry]) -> Vec<&[u8]> {
        entries.iter().map(|e| &e.key[..]).collect()
    }

    #[test]
    fn metadata_skips_and_continues() {
        // "a"+"xxxxxxxxx" is 10 bytes; the others are 2 each
        let md = Metadata::new()
            .with("k", "1")
            .with("a", "xxxxxxxxx")
            .with("b", "2")
            .with("c", "3");

        let entries = encode_metadata(&md, 5);
        assert_eq!(keys(&entries), vec![&b"k"[..], &b"b"[..]]);

        // An exact fit is allowed...
        let entries = encode_metadata(&md, 12);
        assert_eq!(keys(&entries), vec![&b"k"[..], &b"a"[..]]);
        // and the rest fits once the budget permits
        let entries = encode_metadata(&md, 16);
        assert_eq!(keys(&entries), vec![&b"k"[..], &b"a"[..], &b"b"[..], &b"c"[..]]);
        let entries = encode_metadata(&md, usize::MAX >> 1);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].value, b"xxxxxxxxx".to_vec());

        // Running total never exceeds the budget, for any budget
        for budget in 0..20 {
            let total: usize = encode_metadata(&md, budget)
                .iter()
                .map(|e| e.key.len() + e.value.len())
                .sum();
            assert!(total <= budget);
        }
    }

    #[test]
    fn metadata_zero_budget() {
        let md = Metadata::new().with("k", "v");
        assert!(encode_metadata(&md, 0).is_empty());
        assert!(encode_metadata(&Metadata::new(), 100).is_empty());
    }

    #[test]
    fn message_budgets() {
        let msg = b"0123456789";

        let rec = encode_message(msg, false, 4);
        assert_eq!(rec.flags, 0);
        assert_eq!(rec.length, 10);
        assert_eq!(rec.data, b"0123".to_vec());

        let rec = encode_message(msg, true, 1000);
        assert_eq!(rec.flags, 1);
        assert_eq!(rec.length, 10);
        assert_eq!(rec.data, msg.to_vec());

        let rec = encode_message(msg, false, 0);
        assert_eq!(rec.length, 10);
        assert!(rec.data.is_empty());

        let rec = encode_message(b"", false, 5);
        assert_eq!(rec.length, 0);
        assert!(rec.data.is_empty());

        for budget in 1..12 {
            let rec = encode_message(msg, false, budget);
            assert_eq!(rec.data.len(), std::cmp::min(budget, msg.len()));
            assert!(msg.starts_with(&rec.data));
        }
    }

    #[test]
    fn peers() {
        let peer = encode_peer(&PeerAddress::Inet("1.2.3.4:80".parse().unwrap()));
        assert_eq!(peer.peer_type, PeerType::Ipv4);
        assert_eq!(peer.address, vec![1, 2, 3, 4, 0, 80]);

        let peer = encode_peer(&PeerAddress::Inet("1.2.3.4:256".parse().unwrap()));
        assert_eq!(peer.address, vec![1, 2, 3, 4, 1, 0]);

        let peer = encode_peer(&PeerAddress::Inet("[2001:db8::1]:65535".parse().unwrap()));
        assert_eq!(peer.peer_type, PeerType::Ipv6);
        let mut golden = vec![0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        golden.push(0xff);
        golden.push(0xff);
        assert_eq!(peer.address, golden);

        let peer = encode_peer(&PeerAddress::Local(None));
        assert_eq!(peer.peer_type, PeerType::Unix);
        assert!(peer.address.is_empty());
        let peer = encode_peer(&PeerAddress::Local(Some(b"/tmp/s.sock".to_vec())));
        assert_eq!(peer.address, b"/tmp/s.sock".to_vec());

        let peer = encode_peer(&PeerAddress::Other("inproc:7".to_owned()));
        assert_eq!(peer.peer_type, PeerType::Unknown);
        assert_eq!(peer.address, b"inproc:7".to_vec());

        let peer = encode_peer(&PeerAddress::Dummy);
        assert_eq!(peer.peer_type, PeerType::Unknown);
        assert_eq!(peer.address, b"dummy-peer".to_vec());
    }
}
