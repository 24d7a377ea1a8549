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

//! Client & server binlog interceptors.
//!
//! Each interceptor is parameterized by the [`CallId`] of the call it attaches to & the
//! [`CallLogger`] that call's method resolved to. It wraps the framework's call (and the listener
//! on the other side of it) so that every lifecycle event is logged *before* it is forwarded. Since
//! each log write completes before the wrapped operation runs, a sink sees a call's events in the
//! order the call experienced them. If the write fails, the error is returned & the wrapped
//! operation is not performed.

use crate::{
    call::{
        Attributes, Channel, ClientCall, ClientCallListener, ClientInterceptor, Metadata,
        ServerCall, ServerCallHandler, ServerCallListener, ServerInterceptor, Status,
    },
    entry::{CallId, Role},
    error::Result,
    logger::CallLogger,
};

use bytes::Bytes;

use std::sync::Arc;

/// Compression isn't visible through the call traits, so every message is recorded as
/// uncompressed.
pub const ASSUMED_COMPRESSED: bool = false;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       client interceptor                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Logs the client side of a single call.
#[derive(Clone, Debug)]
pub struct BinlogClientInterceptor {
    logger: Arc<CallLogger>,
    call_id: CallId,
}

impl BinlogClientInterceptor {
    pub fn new(logger: Arc<CallLogger>, call_id: CallId) -> BinlogClientInterceptor {
        BinlogClientInterceptor { logger, call_id }
    }
    pub fn call_id(&self) -> CallId {
        self.call_id
    }
    /// Wrap an existing client call
    pub fn wrap(&self, call: Box<dyn ClientCall>) -> Box<dyn ClientCall> {
        Box::new(LoggingClientCall {
            inner: call,
            logger: self.logger.clone(),
            call_id: self.call_id,
        })
    }
}

impl ClientInterceptor for BinlogClientInterceptor {
    fn intercept_call(&self, full_method_name: &str, next: &dyn Channel) -> Box<dyn ClientCall> {
        self.wrap(next.new_call(full_method_name))
    }
}

struct LoggingClientCall {
    inner: Box<dyn ClientCall>,
    logger: Arc<CallLogger>,
    call_id: CallId,
}

impl ClientCall for LoggingClientCall {
    fn start(&mut self, listener: Box<dyn ClientCallListener>, headers: Metadata) -> Result<()> {
        self.logger
            .log_send_initial_metadata(&headers, Role::Client, self.call_id)?;
        let listener = Box::new(LoggingClientListener {
            inner: listener,
            logger: self.logger.clone(),
            call_id: self.call_id,
            attributes: self.inner.attributes(),
            saw_headers: false,
        });
        self.inner.start(listener, headers)
    }
    fn request(&mut self, num_messages: usize) -> Result<()> {
        self.inner.request(num_messages)
    }
    fn send_message(&mut self, message: Bytes) -> Result<()> {
        self.logger
            .log_outbound_message(&message, ASSUMED_COMPRESSED, Role::Client, self.call_id)?;
        self.inner.send_message(message)
    }
    fn half_close(&mut self) -> Result<()> {
        self.inner.half_close()
    }
    fn cancel(&mut self, message: Option<&str>) -> Result<()> {
        self.inner.cancel(message)
    }
    fn attributes(&self) -> Attributes {
        self.inner.attributes()
    }
}

struct LoggingClientListener {
    inner: Box<dyn ClientCallListener>,
    logger: Arc<CallLogger>,
    call_id: CallId,
    // The remote address may only be known once the response begins, so we hold a handle onto the
    // call's attributes rather than a snapshot.
    attributes: Attributes,
    saw_headers: bool,
}

impl ClientCallListener for LoggingClientListener {
    fn on_headers(&mut self, headers: Metadata) -> Result<()> {
        if !self.saw_headers {
            self.logger.log_recv_initial_metadata(
                &headers,
                Role::Client,
                self.call_id,
                &self.attributes.peer(),
            )?;
            self.saw_headers = true;
        }
        self.inner.on_headers(headers)
    }
    fn on_message(&mut self, message: Bytes) -> Result<()> {
        self.logger
            .log_inbound_message(&message, ASSUMED_COMPRESSED, Role::Client, self.call_id)?;
        self.inner.on_message(message)
    }
    fn on_close(&mut self, status: Status, trailers: Metadata) -> Result<()> {
        self.logger
            .log_trailing_metadata(&trailers, Role::Client, self.call_id)?;
        self.inner.on_close(status, trailers)
    }
    fn on_ready(&mut self) -> Result<()> {
        self.inner.on_ready()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       server interceptor                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Logs the server side of a single call.
#[derive(Clone, Debug)]
pub struct BinlogServerInterceptor {
    logger: Arc<CallLogger>,
    call_id: CallId,
}

impl BinlogServerInterceptor {
    pub fn new(logger: Arc<CallLogger>, call_id: CallId) -> BinlogServerInterceptor {
        BinlogServerInterceptor { logger, call_id }
    }
    pub fn call_id(&self) -> CallId {
        self.call_id
    }
}

impl ServerInterceptor for BinlogServerInterceptor {
    fn intercept_call(
        &self,
        call: Box<dyn ServerCall>,
        headers: Metadata,
        next: &dyn ServerCallHandler,
    ) -> Result<Box<dyn ServerCallListener>> {
        self.logger.log_recv_initial_metadata(
            &headers,
            Role::Server,
            self.call_id,
            &call.attributes().peer(),
        )?;
        let call = Box::new(LoggingServerCall {
            inner: call,
            logger: self.logger.clone(),
            call_id: self.call_id,
        });
        let listener = next.start_call(call, headers)?;
        Ok(Box::new(LoggingServerListener {
            inner: listener,
            logger: self.logger.clone(),
            call_id: self.call_id,
        }))
    }
}

struct LoggingServerCall {
    inner: Box<dyn ServerCall>,
    logger: Arc<CallLogger>,
    call_id: CallId,
}

impl ServerCall for LoggingServerCall {
    fn request(&mut self, num_messages: usize) -> Result<()> {
        self.inner.request(num_messages)
    }
    fn send_headers(&mut self, headers: Metadata) -> Result<()> {
        self.logger
            .log_send_initial_metadata(&headers, Role::Server, self.call_id)?;
        self.inner.send_headers(headers)
    }
    fn send_message(&mut self, message: Bytes) -> Result<()> {
        self.logger
            .log_outbound_message(&message, ASSUMED_COMPRESSED, Role::Server, self.call_id)?;
        self.inner.send_message(message)
    }
    fn close(&mut self, status: Status, trailers: Metadata) -> Result<()> {
        self.logger
            .log_trailing_metadata(&trailers, Role::Server, self.call_id)?;
        self.inner.close(status, trailers)
    }
    fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
    fn attributes(&self) -> Attributes {
        self.inner.attributes()
    }
    fn full_method_name(&self) -> &str {
        self.inner.full_method_name()
    }
}

struct LoggingServerListener {
    inner: Box<dyn ServerCallListener>,
    logger: Arc<CallLogger>,
    call_id: CallId,
}

impl ServerCallListener for LoggingServerListener {
    fn on_message(&mut self, message: Bytes) -> Result<()> {
        self.logger
            .log_inbound_message(&message, ASSUMED_COMPRESSED, Role::Server, self.call_id)?;
        self.inner.on_message(message)
    }
    fn on_half_close(&mut self) -> Result<()> {
        self.inner.on_half_close()
    }
    fn on_cancel(&mut self) -> Result<()> {
        self.inner.on_cancel()
    }
    fn on_complete(&mut self) -> Result<()> {
        self.inner.on_complete()
    }
    fn on_ready(&mut self) -> Result<()> {
        self.inner.on_ready()
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use crate::{
        call::PeerAddress,
        encoder::encode_peer,
        entry::{EventType, LogEntry},
        error::Error,
        logger::LogPolicy,
        sink::{MemorySink, Sink},
    };

    use std::sync::Mutex;

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    fn events(entries: &[LogEntry]) -> Vec<EventType> {
        entries.iter().map(|e| e.event()).collect()
    }

    // Client-side fakes: the channel hands out a call that parks its listener where the test can
    // reach it, standing in for the transport's response path.

    struct FakeClientCall {
        trace: Trace,
        listener: Arc<Mutex<Option<Box<dyn ClientCallListener>>>>,
        attributes: Attributes,
    }

    impl ClientCall for FakeClientCall {
        fn start(
            &mut self,
            listener: Box<dyn ClientCallListener>,
            _headers: Metadata,
        ) -> Result<()> {
            self.trace.lock().unwrap().push("start");
            *self.listener.lock().unwrap() = Some(listener);
            Ok(())
        }
        fn request(&mut self, _num_messages: usize) -> Result<()> {
            self.trace.lock().unwrap().push("request");
            Ok(())
        }
        fn send_message(&mut self, _message: Bytes) -> Result<()> {
            self.trace.lock().unwrap().push("send_message");
            Ok(())
        }
        fn half_close(&mut self) -> Result<()> {
            self.trace.lock().unwrap().push("half_close");
            Ok(())
        }
        fn cancel(&mut self, _message: Option<&str>) -> Result<()> {
            self.trace.lock().unwrap().push("cancel");
            Ok(())
        }
        fn attributes(&self) -> Attributes {
            self.attributes.clone()
        }
    }

    struct FakeChannel {
        trace: Trace,
        listener: Arc<Mutex<Option<Box<dyn ClientCallListener>>>>,
        attributes: Attributes,
    }

    impl Channel for FakeChannel {
        fn new_call(&self, _full_method_name: &str) -> Box<dyn ClientCall> {
            Box::new(FakeClientCall {
                trace: self.trace.clone(),
                listener: self.listener.clone(),
                attributes: self.attributes.clone(),
            })
        }
    }

    struct RecordingClientListener {
        trace: Trace,
    }

    impl ClientCallListener for RecordingClientListener {
        fn on_headers(&mut self, _headers: Metadata) -> Result<()> {
            self.trace.lock().unwrap().push("on_headers");
            Ok(())
        }
        fn on_message(&mut self, _message: Bytes) -> Result<()> {
            self.trace.lock().unwrap().push("on_message");
            Ok(())
        }
        fn on_close(&mut self, _status: Status, _trailers: Metadata) -> Result<()> {
            self.trace.lock().unwrap().push("on_close");
            Ok(())
        }
        fn on_ready(&mut self) -> Result<()> {
            self.trace.lock().unwrap().push("on_ready");
            Ok(())
        }
    }

    fn channel() -> FakeChannel {
        FakeChannel {
            trace: Trace::default(),
            listener: Arc::new(Mutex::new(None)),
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn client_lifecycle() {
        let sink = Arc::new(MemorySink::new());
        let logger = Arc::new(CallLogger::new(LogPolicy::unbounded(), sink.clone()));
        let id = CallId::new(0xfeed, 0xbeef);
        let channel = channel();

        let mut call =
            BinlogClientInterceptor::new(logger, id).intercept_call("pkg.Svc/Method", &channel);
        call.start(
            Box::new(RecordingClientListener {
                trace: channel.trace.clone(),
            }),
            Metadata::new().with("user-agent", "test"),
        )
        .unwrap();
        call.request(1).unwrap();
        call.send_message(Bytes::from_static(b"ping")).unwrap();
        call.send_message(Bytes::from_static(b"ping again")).unwrap();
        call.half_close().unwrap();

        // The transport learns the peer once connected
        let peer: PeerAddress = PeerAddress::Inet("127.0.0.1:8080".parse().unwrap());
        channel.attributes.set_remote_addr(peer.clone());

        let mut listener = channel.listener.lock().unwrap().take().unwrap();
        listener.on_ready().unwrap();
        listener
            .on_headers(Metadata::new().with("server", "fake"))
            .unwrap();
        listener.on_message(Bytes::from_static(b"pong")).unwrap();
        listener
            .on_close(Status::ok(), Metadata::new().with("grpc-status", "0"))
            .unwrap();

        let entries = sink.take();
        assert_eq!(
            events(&entries),
            vec![
                EventType::SendInitialMetadata,
                EventType::SendMessage,
                EventType::SendMessage,
                EventType::RecvInitialMetadata,
                EventType::RecvMessage,
                EventType::RecvTrailingMetadata,
            ]
        );
        assert!(entries.iter().all(|e| e.call_id() == id));
        assert!(entries.iter().all(|e| e.role() == Role::Client));
        assert_eq!(entries[2].message_record().unwrap().data, b"ping again".to_vec());
        assert_eq!(entries[3].peer(), Some(&encode_peer(&peer)));
        assert!(entries
            .iter()
            .filter_map(|e| e.message_record())
            .all(|m| m.flags == 0));

        // Everything was forwarded, too
        assert_eq!(
            *channel.trace.lock().unwrap(),
            vec![
                "start",
                "request",
                "send_message",
                "send_message",
                "half_close",
                "on_ready",
                "on_headers",
                "on_message",
                "on_close"
            ]
        );
    }

    #[test]
    fn client_without_peer() {
        let sink = Arc::new(MemorySink::new());
        let logger = Arc::new(CallLogger::new(LogPolicy::unbounded(), sink.clone()));
        let channel = channel();
        let mut call = BinlogClientInterceptor::new(logger, CallId::EMPTY)
            .wrap(channel.new_call("pkg.Svc/Method"));
        call.start(
            Box::new(RecordingClientListener {
                trace: channel.trace.clone(),
            }),
            Metadata::new(),
        )
        .unwrap();
        let mut listener = channel.listener.lock().unwrap().take().unwrap();
        listener.on_headers(Metadata::new()).unwrap();
        listener.on_headers(Metadata::new()).unwrap();

        let entries = sink.take();
        assert_eq!(
            events(&entries),
            vec![EventType::SendInitialMetadata, EventType::RecvInitialMetadata]
        );
        assert_eq!(entries[1].peer(), Some(&encode_peer(&PeerAddress::Dummy)));
    }

    struct BrokenSink;

    impl Sink for BrokenSink {
        fn write(&self, _entry: LogEntry) -> Result<()> {
            Err(Error::sink("collector unreachable"))
        }
    }

    #[test]
    fn client_sink_failure_is_not_masked() {
        let logger = Arc::new(CallLogger::new(LogPolicy::unbounded(), Arc::new(BrokenSink)));
        let channel = channel();
        let mut call =
            BinlogClientInterceptor::new(logger, CallId::EMPTY).intercept_call("a/b", &channel);
        assert!(call.send_message(Bytes::from_static(b"x")).is_err());
        // ...and the message never made it to the transport
        assert!(channel.trace.lock().unwrap().is_empty());
    }

    // Server-side fakes: the handler parks the (wrapped) call so the test can respond on it.

    struct FakeServerCall {
        trace: Trace,
        attributes: Attributes,
    }

    impl ServerCall for FakeServerCall {
        fn request(&mut self, _num_messages: usize) -> Result<()> {
            self.trace.lock().unwrap().push("request");
            Ok(())
        }
        fn send_headers(&mut self, _headers: Metadata) -> Result<()> {
            self.trace.lock().unwrap().push("send_headers");
            Ok(())
        }
        fn send_message(&mut self, _message: Bytes) -> Result<()> {
            self.trace.lock().unwrap().push("send_message");
            Ok(())
        }
        fn close(&mut self, _status: Status, _trailers: Metadata) -> Result<()> {
            self.trace.lock().unwrap().push("close");
            Ok(())
        }
        fn is_cancelled(&self) -> bool {
            false
        }
        fn attributes(&self) -> Attributes {
            self.attributes.clone()
        }
        fn full_method_name(&self) -> &str {
            "pkg.Svc/Method"
        }
    }

    struct RecordingServerListener {
        trace: Trace,
    }

    impl ServerCallListener for RecordingServerListener {
        fn on_message(&mut self, _message: Bytes) -> Result<()> {
            self.trace.lock().unwrap().push("on_message");
            Ok(())
        }
        fn on_half_close(&mut self) -> Result<()> {
            self.trace.lock().unwrap().push("on_half_close");
            Ok(())
        }
        fn on_cancel(&mut self) -> Result<()> {
            self.trace.lock().unwrap().push("on_cancel");
            Ok(())
        }
        fn on_complete(&mut self) -> Result<()> {
            self.trace.lock().unwrap().push("on_complete");
            Ok(())
        }
        fn on_ready(&mut self) -> Result<()> {
            self.trace.lock().unwrap().push("on_ready");
            Ok(())
        }
    }

    struct FakeHandler {
        trace: Trace,
        call: Mutex<Option<Box<dyn ServerCall>>>,
    }

    impl ServerCallHandler for FakeHandler {
        fn start_call(
            &self,
            call: Box<dyn ServerCall>,
            _headers: Metadata,
        ) -> Result<Box<dyn ServerCallListener>> {
            self.trace.lock().unwrap().push("start_call");
            *self.call.lock().unwrap() = Some(call);
            Ok(Box::new(RecordingServerListener {
                trace: self.trace.clone(),
            }))
        }
    }

    #[test]
    fn server_lifecycle() {
        let sink = Arc::new(MemorySink::new());
        let logger = Arc::new(CallLogger::new(LogPolicy::unbounded(), sink.clone()));
        let id = CallId::new(1, 1);
        let trace = Trace::default();
        let handler = FakeHandler {
            trace: trace.clone(),
            call: Mutex::new(None),
        };
        let peer = PeerAddress::Inet("[::1]:50051".parse().unwrap());
        let call = Box::new(FakeServerCall {
            trace: trace.clone(),
            attributes: Attributes::with_remote_addr(peer.clone()),
        });

        let mut listener = BinlogServerInterceptor::new(logger, id)
            .intercept_call(call, Metadata::new().with("user-agent", "test"), &handler)
            .unwrap();
        // The request is logged before the handler ever sees the call
        assert_eq!(events(&sink.entries()), vec![EventType::RecvInitialMetadata]);

        listener.on_message(Bytes::from_static(b"request")).unwrap();
        listener.on_half_close().unwrap();

        let mut call = handler.call.lock().unwrap().take().unwrap();
        assert_eq!(call.full_method_name(), "pkg.Svc/Method");
        call.send_headers(Metadata::new().with("server", "fake"))
            .unwrap();
        call.send_message(Bytes::from_static(b"response")).unwrap();
        call.close(Status::ok(), Metadata::new().with("grpc-status", "0"))
            .unwrap();
        listener.on_complete().unwrap();

        let entries = sink.take();
        assert_eq!(
            events(&entries),
            vec![
                EventType::RecvInitialMetadata,
                EventType::RecvMessage,
                EventType::SendInitialMetadata,
                EventType::SendMessage,
                EventType::SendTrailingMetadata,
            ]
        );
        assert!(entries.iter().all(|e| e.call_id() == id));
        assert!(entries.iter().all(|e| e.role() == Role::Server));
        assert_eq!(entries[0].peer(), Some(&encode_peer(&peer)));
        assert!(entries[1..].iter().all(|e| e.peer().is_none()));
        assert_eq!(entries[3].message_record().unwrap().length, 8);

        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                "start_call",
                "on_message",
                "on_half_close",
                "send_headers",
                "send_message",
                "close",
                "on_complete"
            ]
        );
    }

    #[test]
    fn server_sink_failure_is_not_masked() {
        let logger = Arc::new(CallLogger::new(LogPolicy::unbounded(), Arc::new(BrokenSink)));
        let trace = Trace::default();
        let handler = FakeHandler {
            trace: trace.clone(),
            call: Mutex::new(None),
        };
        let call = Box::new(FakeServerCall {
            trace: trace.clone(),
            attributes: Attributes::new(),
        });
        let res = BinlogServerInterceptor::new(logger, CallId::EMPTY).intercept_call(
            call,
            Metadata::new(),
            &handler,
        );
        assert!(matches!(res, Err(Error::Sink { .. })));
        assert!(trace.lock().unwrap().is_empty());
    }
}
