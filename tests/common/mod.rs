//! Shared test infrastructure for forwarding pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use app_ident_dns::directory::AppDirectory;
use app_ident_dns::error::DetectError;
use app_ident_dns::forwarder::ForwardingHandler;
use app_ident_dns::handler::QueryHandler;
use app_ident_dns::ipset::{AddressSet, KernelSetSync};
use app_ident_dns::registry::DetectedRegistry;

// --- Constants ---

pub const CLIENT_SRC: &str = "127.0.0.1:40000";
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_millis(500);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to `handle_request()`.
/// The response is serialized via `MessageResponse::destructive_emit()` and stored
/// as raw wire-format bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- RecordingSet ---

/// `AddressSet` that remembers every add and can be told to fail for one address.
#[derive(Clone, Default)]
pub struct RecordingSet {
    added: Arc<Mutex<Vec<Ipv4Addr>>>,
    fail_for: Option<Ipv4Addr>,
}

impl RecordingSet {
    pub fn failing_for(ip: Ipv4Addr) -> Self {
        Self {
            fail_for: Some(ip),
            ..Self::default()
        }
    }

    pub fn added(&self) -> Vec<Ipv4Addr> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl AddressSet for RecordingSet {
    async fn add(&self, ip: Ipv4Addr) -> Result<(), DetectError> {
        if self.fail_for == Some(ip) {
            return Err(DetectError::Ipset {
                command: format!("ipset add detected_ips {} -exist", ip),
                reason: "Operation not permitted".to_string(),
            });
        }
        self.added.lock().unwrap().push(ip);
        Ok(())
    }

    fn set_name(&self) -> &str {
        "detected_ips"
    }
}

// --- FakeUpstream ---

/// UDP resolver on loopback answering A queries from a fixed table.
///
/// Names not in the table get NXDOMAIN. Stops when dropped.
pub struct FakeUpstream {
    pub addr: SocketAddr,
    seen_ids: Arc<Mutex<Vec<u16>>>,
    shutdown: CancellationToken,
}

impl FakeUpstream {
    pub async fn start(answers: &[(&str, &[Ipv4Addr])]) -> Self {
        let table: HashMap<Name, Vec<Ipv4Addr>> = answers
            .iter()
            .map(|(name, ips)| (Name::from_ascii(name).unwrap(), ips.to_vec()))
            .collect();

        Self::start_with(move |request| answer(request, &table)).await
    }

    /// Answer the A query table, then let `edit` tamper with the reply.
    pub async fn start_editing<F>(answers: &[(&str, &[Ipv4Addr])], edit: F) -> Self
    where
        F: Fn(&mut Message) + Send + 'static,
    {
        let table: HashMap<Name, Vec<Ipv4Addr>> = answers
            .iter()
            .map(|(name, ips)| (Name::from_ascii(name).unwrap(), ips.to_vec()))
            .collect();

        Self::start_with(move |request| {
            let mut reply = answer(request, &table);
            edit(&mut reply);
            reply
        })
        .await
    }

    /// Reply to every query with whatever `respond` builds.
    pub async fn start_with<F>(respond: F) -> Self
    where
        F: Fn(&Message) -> Message + Send + 'static,
    {
        let seen_ids = Arc::new(Mutex::new(Vec::new()));
        let seen = seen_ids.clone();

        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake upstream");
        let addr = socket.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let (len, peer) = tokio::select! {
                    received = socket.recv_from(&mut buf) => match received {
                        Ok(received) => received,
                        Err(_) => return,
                    },
                    _ = token.cancelled() => return,
                };
                let Ok(request) = Message::from_vec(&buf[..len]) else {
                    continue;
                };
                seen.lock().unwrap().push(request.id());
                let reply = respond(&request);
                let _ = socket.send_to(&reply.to_vec().unwrap(), peer).await;
            }
        });

        Self {
            addr,
            seen_ids,
            shutdown,
        }
    }

    /// Transaction ids of every query received so far.
    pub fn seen_ids(&self) -> Vec<u16> {
        self.seen_ids.lock().unwrap().clone()
    }

    /// A bound address that never answers.
    pub async fn silent() -> (SocketAddr, UdpSocket) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (socket.local_addr().unwrap(), socket)
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn answer(request: &Message, table: &HashMap<Name, Vec<Ipv4Addr>>) -> Message {
    let mut reply = Message::new();
    reply.set_id(request.id());
    reply.set_message_type(MessageType::Response);
    reply.set_op_code(OpCode::Query);
    reply.set_recursion_desired(request.recursion_desired());
    reply.set_recursion_available(true);
    reply.add_queries(request.queries().to_vec());

    let Some(query) = request.queries().first() else {
        reply.set_response_code(ResponseCode::FormErr);
        return reply;
    };

    let lookup = Name::from_ascii(query.name().to_ascii().to_ascii_lowercase()).unwrap();
    match table.get(&lookup) {
        Some(ips) if query.query_type() == RecordType::A => {
            for ip in ips {
                reply.add_answer(Record::from_rdata(query.name().clone(), 300, RData::A(A(*ip))));
            }
        }
        Some(_) => {}
        None => {
            reply.set_response_code(ResponseCode::NXDomain);
        }
    }
    reply
}

// --- Pipeline builder ---

/// Everything wired together the way the server does it, with a recording set.
pub struct TestPipeline {
    pub forwarder: ForwardingHandler,
    pub handler: QueryHandler,
    pub set: RecordingSet,
    sync_worker: JoinHandle<()>,
}

impl TestPipeline {
    pub fn new(directory_json: &str, upstream: SocketAddr) -> Self {
        Self::with_set(directory_json, upstream, RecordingSet::default(), false)
    }

    pub fn with_set(
        directory_json: &str,
        upstream: SocketAddr,
        set: RecordingSet,
        sync_every_match: bool,
    ) -> Self {
        let directory = AppDirectory::from_json(directory_json).expect("invalid test directory");
        let (sync, sync_worker) = KernelSetSync::spawn(set.clone(), 64, CancellationToken::new());
        let handler = QueryHandler::new(Arc::new(directory), DetectedRegistry::new(), sync)
            .with_sync_every_match(sync_every_match);
        let forwarder = ForwardingHandler::new(upstream, UPSTREAM_TIMEOUT, handler.clone());

        Self {
            forwarder,
            handler,
            set,
            sync_worker,
        }
    }

    /// Send one query through the forwarder and return the parsed response.
    pub async fn query(&self, name: &str, record_type: RecordType, id: u16) -> Message {
        let request = build_request(name, record_type, CLIENT_SRC.parse().unwrap(), id);
        let response = TestResponseHandler::new();
        self.forwarder
            .handle_request(&request, response.clone())
            .await;
        response.into_message()
    }

    /// Drop every queue handle, wait for the sync worker, return what it added.
    pub async fn finish(self) -> (QueryHandler, Vec<Ipv4Addr>) {
        let Self {
            forwarder,
            handler,
            set,
            sync_worker,
        } = self;
        let registry = handler.registry().clone();
        let directory = handler.directory().clone();
        drop(forwarder);
        drop(handler);
        sync_worker.await.expect("sync worker panicked");

        // Rebuild a handler over the same registry for snapshot assertions.
        let (sync, _) = KernelSetSync::spawn(RecordingSet::default(), 1, CancellationToken::new());
        let handler = QueryHandler::new(Arc::new(directory), registry, sync);
        (handler, set.added())
    }
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` with a crafted source address.
pub fn build_request(name: &str, record_type: RecordType, src: SocketAddr, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(a.0),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}
