//! Message, endpoint and TU factories for transaction tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::Bytes;

use crate::Endpoint;
use crate::headers::{CSeq, CallId, From as FromHdr, Header, Headers, To, Via};
use crate::message::{
    Host, HostPort, Method, Request, RequestLine, Response, StatusCode, StatusLine,
    TransportProtocol, Uri,
};
use crate::transport::mock::CaptureTransport;
use crate::transport::{
    IncomingRequest, IncomingResponse, OutgoingAddr, OutgoingRequest, OutgoingResponse, Packet,
    Payload,
};

use super::{State, Transaction, TransactionLayer, TransactionUser, TsxEventKind, TsxSettings};

pub const DEFAULT_BRANCH: &str = "z9hG4bK3060200";

pub fn remote_addr() -> SocketAddr {
    "127.0.0.1:5070".parse().unwrap()
}

fn packet() -> Packet {
    Packet {
        payload: Payload::new(Bytes::new()),
        addr: remote_addr(),
        time: SystemTime::now(),
    }
}

fn via_with_branch(branch: &str) -> Via {
    let sent_by = HostPort::new(Host::IpAddr("127.0.0.1".parse().unwrap()), Some(5060));
    let mut via = Via::new(TransportProtocol::Udp, sent_by).with_branch(branch);

    via.set_received("127.0.0.1".parse().unwrap());

    via
}

fn base_headers(cseq: CSeq, via: Via) -> Headers {
    let from = FromHdr::new("<sip:alice@127.0.0.1:5060>").with_tag("456248");
    let to = To::new("<sip:bob@127.0.0.1:5060>");
    let call_id = CallId::new("bs9ki9iqbee8k5kal8mpqb");

    let mut headers = Headers::with_capacity(5);

    headers.push(Header::Via(via));
    headers.push(Header::From(from));
    headers.push(Header::To(to));
    headers.push(Header::CallId(call_id));
    headers.push(Header::CSeq(cseq));

    headers
}

fn incoming_request_with(
    method: Method,
    cseq_method: Method,
    branch: &str,
    transport: Arc<CaptureTransport>,
) -> IncomingRequest {
    let headers = base_headers(CSeq::new(1, cseq_method), via_with_branch(branch));
    let request = Request {
        req_line: RequestLine {
            method,
            uri: Uri::new("sip:bob@127.0.0.1:5060"),
        },
        headers,
        body: None,
    };

    IncomingRequest::new(request, transport, packet()).unwrap()
}

pub fn request(method: Method) -> IncomingRequest {
    request_on(method, CaptureTransport::unreliable())
}

pub fn request_on(method: Method, transport: Arc<CaptureTransport>) -> IncomingRequest {
    incoming_request_with(method.clone(), method, DEFAULT_BRANCH, transport)
}

pub fn request_with_branch(method: Method, branch: &str) -> IncomingRequest {
    incoming_request_with(method.clone(), method, branch, CaptureTransport::unreliable())
}

pub fn request_with_cseq(method: Method, cseq_method: Method) -> IncomingRequest {
    incoming_request_with(method, cseq_method, DEFAULT_BRANCH, CaptureTransport::unreliable())
}

/// A request whose branch predates the magic cookie, keyed by the
/// header tuple instead.
pub fn legacy_request(method: Method) -> IncomingRequest {
    incoming_request_with(method.clone(), method, "1234abc", CaptureTransport::unreliable())
}

pub fn outgoing_request(method: Method) -> OutgoingRequest {
    outgoing_request_on(method, CaptureTransport::unreliable())
}

pub fn outgoing_request_on(method: Method, transport: Arc<CaptureTransport>) -> OutgoingRequest {
    let headers = base_headers(CSeq::new(1, method.clone()), via_with_branch(DEFAULT_BRANCH));
    let msg = Request {
        req_line: RequestLine {
            method,
            uri: Uri::new("sip:bob@127.0.0.1:5060"),
        },
        headers,
        body: None,
    };

    OutgoingRequest {
        msg,
        addr: OutgoingAddr::Addr {
            addr: remote_addr(),
            transport,
        },
        buf: None,
    }
}

pub fn incoming_response(code: StatusCode, method: Method) -> IncomingResponse {
    incoming_response_on(code, method, CaptureTransport::unreliable())
}

pub fn incoming_response_on(
    code: StatusCode,
    method: Method,
    transport: Arc<CaptureTransport>,
) -> IncomingResponse {
    let headers = base_headers(CSeq::new(1, method), via_with_branch(DEFAULT_BRANCH));
    let response = Response {
        status_line: StatusLine::new(code, code.reason()),
        headers,
        body: None,
    };

    IncomingResponse::new(response, transport, packet()).unwrap()
}

pub fn response(code: StatusCode, method: Method) -> OutgoingResponse {
    let headers = base_headers(CSeq::new(1, method), via_with_branch(DEFAULT_BRANCH));
    let response = Response {
        status_line: StatusLine::new(code, code.reason()),
        headers,
        body: None,
    };

    OutgoingResponse {
        response,
        addr: OutgoingAddr::Addr {
            addr: remote_addr(),
            transport: CaptureTransport::unreliable(),
        },
        buf: None,
    }
}

pub async fn default_endpoint() -> Endpoint {
    crate::endpoint::Builder::new()
        .with_transaction_layer(TransactionLayer::default())
        .build()
        .await
}

pub async fn endpoint_with_settings(settings: TsxSettings) -> Endpoint {
    crate::endpoint::Builder::new()
        .with_transaction_layer(TransactionLayer::default())
        .with_tsx_settings(settings)
        .build()
        .await
}

/// A TU that records every callback for later assertions.
#[derive(Default)]
pub struct RecordingUser {
    /// `(event, previous state, state at callback time)` per
    /// state-change notification.
    pub events: Mutex<Vec<(TsxEventKind, State, State)>>,
    /// The status codes seen by `on_rx_response`, in order.
    pub responses: Mutex<Vec<StatusCode>>,
}

impl RecordingUser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(TsxEventKind, State, State)> {
        self.events.lock().unwrap().clone()
    }

    pub fn responses(&self) -> Vec<StatusCode> {
        self.responses.lock().unwrap().clone()
    }
}

impl TransactionUser for RecordingUser {
    fn on_tsx_state(&self, tsx: &Transaction, event: TsxEventKind, prev_state: State) {
        self.events
            .lock()
            .unwrap()
            .push((event, prev_state, tsx.state()));
    }

    fn on_rx_response(&self, _tsx: &Transaction, response: &IncomingResponse) {
        self.responses.lock().unwrap().push(response.code());
    }
}
