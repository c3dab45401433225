//! Hickory request handler that relays queries upstream and observes the replies.
//!
//! Every reply from the upstream resolver passes through [`QueryHandler::handle`]
//! before being relayed to the client, so detection sees exactly what clients see.
//! A reply is relayed whether or not it matched an application.

use async_trait::async_trait;
use hickory_proto::op::{Edns, Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::Name;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, error, trace, warn};

use crate::error::DetectError;
use crate::handler::QueryHandler;
use crate::metrics::{self, Timer, UpstreamResult};

/// Largest UDP reply accepted from the upstream resolver.
const MAX_UPSTREAM_PAYLOAD: u16 = 4096;

/// Request handler forwarding to a single upstream resolver.
#[derive(Debug, Clone)]
pub struct ForwardingHandler {
    upstream: SocketAddr,
    timeout: Duration,
    observer: QueryHandler,
}

impl ForwardingHandler {
    /// Create a forwarder to `upstream` feeding replies through `observer`.
    pub fn new(upstream: SocketAddr, timeout: Duration, observer: QueryHandler) -> Self {
        Self {
            upstream,
            timeout,
            observer,
        }
    }

    /// Build the query sent upstream for a client request.
    ///
    /// `id` is chosen by the forwarder; the client's id is only used in the
    /// response sent back to the client.
    fn upstream_query(&self, request: &Request, id: u16) -> Message {
        let mut message = Message::new();
        message.set_id(id);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(request.header().recursion_desired());

        for query in request.queries() {
            let mut upstream = Query::query(Name::from(query.name().clone()), query.query_type());
            upstream.set_query_class(query.query_class());
            message.add_query(upstream);
        }

        let mut edns = Edns::new();
        edns.set_max_payload(MAX_UPSTREAM_PAYLOAD);
        message.set_edns(edns);

        message
    }

    /// Send `query` to the upstream resolver and wait for its reply.
    async fn exchange(&self, query: &Message) -> Result<Message, DetectError> {
        let bind_addr: SocketAddr = if self.upstream.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.upstream).await?;
        socket.send(&query.to_vec()?).await?;

        let mut buf = vec![0u8; MAX_UPSTREAM_PAYLOAD as usize];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| DetectError::UpstreamTimeout(self.upstream))??;

        let reply = Message::from_vec(&buf[..len])?;
        if reply.id() != query.id() {
            return Err(DetectError::UpstreamReply {
                addr: self.upstream,
                reason: format!("id {} does not match query id {}", reply.id(), query.id()),
            });
        }
        if reply.message_type() != MessageType::Response {
            return Err(DetectError::UpstreamReply {
                addr: self.upstream,
                reason: "reply is not a response".to_string(),
            });
        }
        if !same_question(query.queries().first(), reply.queries().first()) {
            return Err(DetectError::UpstreamReply {
                addr: self.upstream,
                reason: "question does not match query".to_string(),
            });
        }

        Ok(reply)
    }

    async fn forward(&self, request: &Request) -> Result<Message, DetectError> {
        let timer = Timer::start();
        let query = self.upstream_query(request, rand::random());

        match self.exchange(&query).await {
            Ok(reply) => {
                metrics::record_upstream(UpstreamResult::Success, timer.elapsed());
                Ok(reply)
            }
            Err(e) => {
                let result = match e {
                    DetectError::UpstreamTimeout(_) => UpstreamResult::Timeout,
                    _ => UpstreamResult::Error,
                };
                metrics::record_upstream(result, timer.elapsed());
                Err(e)
            }
        }
    }
}

#[async_trait]
impl RequestHandler for ForwardingHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        trace!(src = %request.src(), id = request.header().id(), "forwarding request");

        let builder = MessageResponseBuilder::from_message_request(request);

        let request_header = request.header();
        if request_header.message_type() != MessageType::Query
            || request_header.op_code() != OpCode::Query
        {
            debug!(src = %request.src(), op_code = ?request_header.op_code(), "refusing non-query request");
            let response = builder.error_msg(request.header(), ResponseCode::NotImp);
            return send(&mut response_handle, response).await;
        }

        let reply = match self.forward(request).await {
            Ok(reply) => self.observer.handle(reply),
            Err(e) => {
                warn!(src = %request.src(), upstream = %self.upstream, error = %e, "upstream exchange failed");
                let response = builder.error_msg(request.header(), ResponseCode::ServFail);
                return send(&mut response_handle, response).await;
            }
        };

        let mut header = Header::response_from_request(request.header());
        header.set_response_code(reply.response_code());
        header.set_recursion_available(reply.recursion_available());
        header.set_authoritative(reply.authoritative());
        header.set_truncated(reply.truncated());
        header.set_authentic_data(reply.authentic_data());

        let response = builder.build(
            header,
            reply.answers().iter(),
            reply.name_servers().iter(),
            std::iter::empty(),
            reply.additionals().iter(),
        );
        send(&mut response_handle, response).await
    }
}

/// Questions match on type, class and name, ignoring ASCII case.
fn same_question(sent: Option<&Query>, received: Option<&Query>) -> bool {
    match (sent, received) {
        (Some(sent), Some(received)) => {
            sent.query_type() == received.query_type()
                && sent.query_class() == received.query_class()
                && sent
                    .name()
                    .to_ascii()
                    .eq_ignore_ascii_case(&received.name().to_ascii())
        }
        (None, None) => true,
        _ => false,
    }
}

async fn send<'a, R: ResponseHandler>(
    response_handle: &mut R,
    response: hickory_server::authority::MessageResponse<
        '_,
        'a,
        impl Iterator<Item = &'a hickory_proto::rr::Record> + Send + 'a,
        impl Iterator<Item = &'a hickory_proto::rr::Record> + Send + 'a,
        impl Iterator<Item = &'a hickory_proto::rr::Record> + Send + 'a,
        impl Iterator<Item = &'a hickory_proto::rr::Record> + Send + 'a,
    >,
) -> ResponseInfo {
    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            error!(error = %e, "failed to send response");
            let mut header = Header::new();
            header.set_response_code(ResponseCode::ServFail);
            header.into()
        }
    }
}
