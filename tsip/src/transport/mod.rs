//! SIP Transport Layer.

use std::{
    borrow::Cow,
    collections::HashMap,
    io::Write,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::SystemTime,
};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::{
    endpoint::Endpoint,
    error::{Error, Result},
    headers::{CSeq, CallId, From as FromHdr, Headers, To, Via},
    message::{HostPort, Method, Request, Response, SipMsg, StatusCode, TransportProtocol},
    transaction::Transaction,
};

pub mod udp;

/// This trait represents a abstraction over a SIP transport implementation.
#[async_trait::async_trait]
pub trait Transport: Sync + Send + 'static {
    /// Sends a buffer to the specified remote socket address.
    ///
    /// Returns the number of bytes sent or an I/O error.
    async fn send(&self, buf: &[u8], addr: &SocketAddr) -> Result<usize>;

    /// Returns the transport kind (e.g., UDP, TCP, TLS).
    fn tp_kind(&self) -> TransportProtocol;

    /// Returns the local socket address bound to this transport.
    fn addr(&self) -> SocketAddr;

    /// Checks if the provided address belongs to the same IP address family
    /// (IPv4 vs IPv6) as the local socket address.
    fn is_same_af(&self, addr: &SocketAddr) -> bool {
        let our_addr = self.addr();

        (addr.is_ipv4() && our_addr.is_ipv4()) || (addr.is_ipv6() && our_addr.is_ipv6())
    }

    /// Returns the local transport name.
    fn local_name(&self) -> Cow<'_, str>;

    /// Returns `true` if the transport is reliable (e.g., TCP or TLS).
    fn reliable(&self) -> bool;

    /// Returns `true` if the transport is secure (e.g., TLS).
    fn secure(&self) -> bool;

    /// Returns the key that uniquely identifies this transport connection.
    fn key(&self) -> TransportKey {
        TransportKey::new(self.addr(), self.tp_kind())
    }
}

/// This type represents a key used to identify a transport connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TransportKey {
    /// The socket address of the transport.
    addr: SocketAddr,
    /// The transport kind (e.g., UDP, TCP, TLS).
    kind: TransportProtocol,
}

impl TransportKey {
    /// Creates a new `TransportKey`.
    pub fn new(addr: SocketAddr, kind: TransportProtocol) -> Self {
        TransportKey { addr, kind }
    }
}

/// Decodes raw packet bytes into a structured SIP message.
///
/// Message parsing is not part of this crate. Applications that want
/// network transports to feed the endpoint must install a decoder on
/// the endpoint builder; without one, inbound packets are dropped.
pub trait MessageDecoder: Sync + Send + 'static {
    /// Decodes one packet into a message.
    fn decode(&self, buf: &[u8]) -> Result<SipMsg>;
}

/// Represents the raw binary content of a message or data block.
///
/// Commonly used for message bodies, network packets, or media content.
#[derive(Clone)]
pub struct Payload(pub(crate) Bytes);

impl Payload {
    /// Creates a new `Payload`.
    #[inline]
    pub fn new(bytes: Bytes) -> Self {
        Payload(bytes)
    }

    /// Returns the raw byte buffer of this payload.
    pub fn buf(&self) -> &[u8] {
        &self.0
    }
}

/// This type represents a SIP packet.
#[derive(Clone)]
pub struct Packet {
    /// The packet payload.
    pub payload: Payload,
    /// The address of the sender.
    pub addr: SocketAddr,
    /// The time the packet was received.
    pub time: SystemTime,
}

#[derive(Clone)]
/// Represents the address of an outbound message.
pub enum OutgoingAddr {
    /// An unresolved host; the send path resolves it and picks a
    /// transport, trying candidates in order.
    HostPort {
        /// The host and port of the address.
        host: HostPort,
        /// The transport protocol to use.
        protocol: TransportProtocol,
    },
    /// A resolved address bound to a transport.
    Addr {
        /// The socket address.
        addr: SocketAddr,
        /// The transport to use.
        transport: Arc<dyn Transport>,
    },
}

/// This trait is used to convert a type into a byte buffer.
pub trait ToBytes: Sized {
    /// Converts the type into a byte buffer.
    fn to_bytes(&self) -> Result<Bytes>;
}

fn encode_msg(first_line: String, headers: &Headers, body: Option<&Bytes>) -> Result<Bytes> {
    let estimated_message_size = if body.is_none() { 800 } else { 1500 };
    let buf = BytesMut::with_capacity(estimated_message_size);

    let mut buf_writer = buf.writer();

    write!(buf_writer, "{}\r\n", first_line)?;

    for header in headers.iter() {
        // Content-Length is derived from the body below.
        if matches!(header, crate::headers::Header::ContentLength(_)) {
            continue;
        }
        write!(buf_writer, "{header}\r\n")?;
    }

    match body {
        Some(body) => {
            write!(buf_writer, "Content-Length: {}\r\n\r\n", body.len())?;
            buf_writer.write_all(body)?;
        }
        None => {
            write!(buf_writer, "Content-Length: 0\r\n\r\n")?;
        }
    }

    Ok(buf_writer.into_inner().freeze())
}

/// This type represents an outgoing SIP response.
pub struct OutgoingResponse {
    /// The SIP response message.
    pub response: Response,
    /// The address to send the response to.
    pub addr: OutgoingAddr,
    /// The message raw buffer.
    pub buf: Option<Bytes>,
}

impl OutgoingResponse {
    /// Returns the message status code.
    pub fn status_code(&self) -> StatusCode {
        self.response.status_line.code
    }

    /// Returns the message reason text.
    pub fn reason(&self) -> &str {
        &self.response.status_line.reason
    }

    /// Returns `true` if this is a provisional response.
    pub fn is_provisional(&self) -> bool {
        self.response.status_line.code.is_provisional()
    }

    /// Set the message body.
    pub fn set_body(&mut self, body: Bytes) {
        self.response.body = Some(body);
    }

    /// Returns the message headers mutably.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.response.headers
    }
}

impl ToBytes for OutgoingResponse {
    fn to_bytes(&self) -> Result<Bytes> {
        encode_msg(
            self.response.status_line.to_string(),
            &self.response.headers,
            self.response.body.as_ref(),
        )
    }
}

/// This type represents an outbound SIP request.
pub struct OutgoingRequest {
    /// The SIP request message.
    pub msg: Request,
    /// The address to send the request to.
    pub addr: OutgoingAddr,
    /// The message raw buffer.
    pub buf: Option<Bytes>,
}

impl OutgoingRequest {
    /// Returns the message method.
    pub fn method(&self) -> &Method {
        self.msg.method()
    }
}

impl ToBytes for OutgoingRequest {
    fn to_bytes(&self) -> Result<Bytes> {
        encode_msg(
            self.msg.req_line.to_string(),
            &self.msg.headers,
            self.msg.body.as_ref(),
        )
    }
}

pub(crate) struct RequestHeaders {
    // The topmost Via header as found in the message.
    pub via: Via,
    // The From header found in the message.
    pub from: FromHdr,
    // The CSeq header as found in the message.
    pub cseq: CSeq,
    // The Call-ID header found in the message.
    pub call_id: CallId,

    pub to: To,
}

impl RequestHeaders {
    fn extract(headers: &Headers) -> Result<Self> {
        let via = headers
            .via()
            .cloned()
            .ok_or(Error::MissingRequiredHeader(Via::NAME))?;
        let from = headers
            .from()
            .cloned()
            .ok_or(Error::MissingRequiredHeader(FromHdr::NAME))?;
        let to = headers
            .to()
            .cloned()
            .ok_or(Error::MissingRequiredHeader(To::NAME))?;
        let call_id = headers
            .call_id()
            .cloned()
            .ok_or(Error::MissingRequiredHeader(CallId::NAME))?;
        let cseq = headers
            .cseq()
            .cloned()
            .ok_or(Error::MissingRequiredHeader(CSeq::NAME))?;

        Ok(RequestHeaders {
            via,
            from,
            cseq,
            call_id,
            to,
        })
    }
}

/// This type represents an received SIP request.
pub struct IncomingRequest {
    /// The SIP request message.
    pub(crate) request: Request,
    /// The transport used to receive the request.
    pub(crate) transport: Arc<dyn Transport>,
    /// The packet that contains the request.
    pub(crate) packet: Packet,
    /// The server transaction associated with this request, if any.
    pub(crate) transaction: Option<Transaction>,
    /// The request headers extracted from the request.
    pub(crate) request_headers: RequestHeaders,
}

impl IncomingRequest {
    /// Builds an incoming request from a structured message.
    ///
    /// Fails when one of the mandatory headers (`Via`, `From`, `To`,
    /// `Call-ID`, `CSeq`) is absent.
    pub fn new(request: Request, transport: Arc<dyn Transport>, packet: Packet) -> Result<Self> {
        let request_headers = RequestHeaders::extract(&request.headers)?;

        Ok(IncomingRequest {
            request,
            transport,
            packet,
            transaction: None,
            request_headers,
        })
    }

    /// Returns the request message.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the topmost `To` header of the request.
    pub fn to(&self) -> &To {
        &self.request_headers.to
    }

    /// Returns the `From` header of the request.
    pub fn from(&self) -> &FromHdr {
        &self.request_headers.from
    }

    /// Returns the `Call-ID` header of the request.
    pub fn call_id(&self) -> &CallId {
        &self.request_headers.call_id
    }

    /// Returns the topmost `Via` header of the request.
    pub fn via(&self) -> &Via {
        &self.request_headers.via
    }

    /// Returns the `CSeq` header of the request.
    pub fn cseq(&self) -> &CSeq {
        &self.request_headers.cseq
    }

    /// Returns the transaction this request was matched to, if any.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// Returns `true` if the message method matches the given `Method`.
    #[inline(always)]
    pub fn is_method(&self, method: &Method) -> bool {
        self.request.method() == method
    }

    /// Returns the message method.
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// Gets the source socket address of the packet.
    pub fn addr(&self) -> &SocketAddr {
        &self.packet.addr
    }

    /// Returns the transport the request arrived on.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    #[inline]
    pub(crate) fn set_transaction(&mut self, tsx: Transaction) {
        self.transaction = Some(tsx);
    }
}

/// Represents an received SIP response.
pub struct IncomingResponse {
    /// The SIP response message.
    pub(crate) response: Response,
    /// The transport used to receive the response.
    pub(crate) transport: Arc<dyn Transport>,
    /// The packet that contains the response.
    pub(crate) packet: Packet,
    /// The transaction associated with this response, if any.
    pub(crate) transaction: Option<Transaction>,
    /// The request headers extracted from the response.
    pub(crate) request_headers: RequestHeaders,
}

impl IncomingResponse {
    /// Builds an incoming response from a structured message.
    ///
    /// Fails when one of the mandatory headers (`Via`, `From`, `To`,
    /// `Call-ID`, `CSeq`) is absent.
    pub fn new(response: Response, transport: Arc<dyn Transport>, packet: Packet) -> Result<Self> {
        let request_headers = RequestHeaders::extract(&response.headers)?;

        Ok(IncomingResponse {
            response,
            transport,
            packet,
            transaction: None,
            request_headers,
        })
    }

    /// Returns the response message.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Returns the response status code.
    pub fn code(&self) -> StatusCode {
        self.response.code()
    }

    /// Returns the reason phrase.
    pub fn reason(&self) -> &str {
        self.response.reason()
    }

    /// Returns the topmost `Via` header of the response.
    pub fn via(&self) -> &Via {
        &self.request_headers.via
    }

    /// Returns the `CSeq` header of the response.
    pub fn cseq(&self) -> &CSeq {
        &self.request_headers.cseq
    }

    /// Returns the `To` header of the response.
    pub fn to(&self) -> &To {
        &self.request_headers.to
    }

    /// Returns the transaction this response was matched to, if any.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// Gets the source socket address of the packet.
    pub fn addr(&self) -> &SocketAddr {
        &self.packet.addr
    }

    /// Returns the transport the response arrived on.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    #[inline]
    pub(crate) fn set_transaction(&mut self, tsx: Transaction) {
        self.transaction = Some(tsx);
    }
}

/// Events flowing from the transports to the endpoint loop.
pub enum TransportEvent {
    /// A packet was received from the transport layer.
    Packet {
        /// The transport the packet arrived on.
        transport: Arc<dyn Transport>,
        /// The received packet.
        packet: Packet,
    },
    /// A new transport was created.
    Created(Arc<dyn Transport>),
    /// A transport was closed.
    Closed(TransportKey),
}

pub(crate) type TransportTx = mpsc::Sender<TransportEvent>;
pub(crate) type TransportRx = mpsc::Receiver<TransportEvent>;

/// Transport Layer for SIP messages.
pub struct TransportLayer {
    /// A map of transports indexed by their unique keys.
    transports: Mutex<HashMap<TransportKey, Arc<dyn Transport>>>,
    /// The transport sender used to send events to the transport layer.
    transport_tx: TransportTx,
    /// A receiver for transport events.
    transport_rx: Mutex<Option<TransportRx>>,
}

impl Default for TransportLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportLayer {
    pub(crate) fn new() -> Self {
        let (transport_tx, transport_rx) = mpsc::channel(1_000);
        let transport_rx = Mutex::new(Some(transport_rx));

        Self {
            transport_tx,
            transport_rx,
            transports: Default::default(),
        }
    }

    pub(crate) fn transport_count(&self) -> usize {
        self.transports.lock().expect("Lock failed").len()
    }

    pub(crate) fn add_transport(&self, transport: Arc<dyn Transport>) {
        self.transports
            .lock()
            .expect("Lock failed")
            .insert(transport.key(), transport);
    }

    pub(crate) fn remove_transport(&self, key: TransportKey) -> Option<Arc<dyn Transport>> {
        self.transports.lock().expect("Lock failed").remove(&key)
    }

    pub(crate) fn sender(&self) -> &TransportTx {
        &self.transport_tx
    }

    /// Finds a suitable transport for the given destination address and transport type.
    pub fn find(&self, dst: SocketAddr, transport: TransportProtocol) -> Option<Arc<dyn Transport>> {
        log::debug!("Finding suitable transport={} for={}", transport, dst);

        let transports = self.transports.lock().expect("Lock failed");

        // find by remote addr
        let key = TransportKey::new(dst, transport);

        if let Some(transport) = transports.get(&key) {
            return Some(transport.clone());
        }

        // Find by transport protocol and address family.
        transports
            .values()
            .filter(|handle| handle.tp_kind() == transport && handle.is_same_af(&dst))
            .min_by(|a, b| Arc::strong_count(a).cmp(&Arc::strong_count(b)))
            .cloned()
    }

    pub(crate) async fn handle_events(&self, endpoint: &Endpoint) -> Result<()> {
        let mut rx = self
            .transport_rx
            .lock()
            .expect("Lock failed")
            .take()
            .ok_or(Error::InvalidOperation("transport loop already running"))?;

        // Loop to receive packets from the transports.
        while let Some(evt) = rx.recv().await {
            match evt {
                TransportEvent::Packet { transport, packet } => {
                    tokio::spawn(Self::on_received_packet(transport, packet, endpoint.clone()));
                }
                TransportEvent::Created(transport) => {
                    self.add_transport(transport);
                }
                TransportEvent::Closed(key) => {
                    self.remove_transport(key);
                }
            }
        }

        Ok(())
    }

    async fn on_received_packet(
        transport: Arc<dyn Transport>,
        packet: Packet,
        endpoint: Endpoint,
    ) -> Result<()> {
        let payload = packet.payload.clone();
        let bytes = payload.buf();

        // Keep-Alive Request packet.
        if bytes == b"\r\n\r\n" {
            transport.send(b"\r\n", &packet.addr).await?;
            return Ok(());
        } else if bytes == b"\r\n" {
            // Keep-Alive Response packet.
            // do nothing
            return Ok(());
        }

        let Some(decoder) = endpoint.decoder() else {
            log::warn!(
                "Dropping {} bytes packet from {} {}: no message decoder installed",
                bytes.len(),
                transport.tp_kind(),
                packet.addr,
            );
            return Ok(());
        };

        // Decode the packet into an sip message.
        let mut msg = match decoder.decode(bytes) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::warn!(
                    "Ignoring {} bytes packet from {} {} : {}\n{}-- end of packet.",
                    bytes.len(),
                    transport.tp_kind(),
                    packet.addr,
                    err,
                    String::from_utf8_lossy(bytes)
                );

                return Err(err);
            }
        };

        // 4. Server Behavior(https://datatracker.ietf.org/doc/html/rfc3581#section-4)
        // The server MUST insert a "received" parameter containing
        // the source IP address that the request came from even if
        // it is identical to the value of the "sent-by" component.
        match msg.headers_mut().via_mut() {
            Some(via) => via.set_received(packet.addr.ip()),
            None => return Err(Error::MissingRequiredHeader(Via::NAME)),
        }

        match msg {
            SipMsg::Request(request) => {
                let incoming = IncomingRequest::new(request, transport, packet)?;
                endpoint.process_request(&mut Some(incoming)).await?;
            }
            SipMsg::Response(response) => {
                let incoming = IncomingResponse::new(response, transport, packet)?;
                endpoint.process_response(&mut Some(incoming)).await?;
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
/// A trait to start a new transport.
pub(crate) trait TransportStartup: Send + Sync {
    async fn start(&self, tx: TransportTx) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// Transport that records every buffer handed to it.
    pub struct CaptureTransport {
        kind: TransportProtocol,
        addr: SocketAddr,
        sent: Mutex<Vec<Bytes>>,
    }

    impl CaptureTransport {
        pub fn unreliable() -> Arc<Self> {
            Self::with_kind(TransportProtocol::Udp)
        }

        pub fn reliable() -> Arc<Self> {
            Self::with_kind(TransportProtocol::Tcp)
        }

        pub fn with_kind(kind: TransportProtocol) -> Arc<Self> {
            Arc::new(CaptureTransport {
                kind,
                addr: "127.0.0.1:5060".parse().unwrap(),
                sent: Mutex::new(Vec::new()),
            })
        }

        pub fn sent(&self) -> Vec<Bytes> {
            self.sent.lock().expect("Lock failed").clone()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().expect("Lock failed").len()
        }

        pub fn last_sent(&self) -> Option<Bytes> {
            self.sent.lock().expect("Lock failed").last().cloned()
        }
    }

    #[async_trait::async_trait]
    impl Transport for CaptureTransport {
        async fn send(&self, buf: &[u8], _addr: &SocketAddr) -> Result<usize> {
            self.sent
                .lock()
                .expect("Lock failed")
                .push(Bytes::copy_from_slice(buf));
            Ok(buf.len())
        }

        fn tp_kind(&self) -> TransportProtocol {
            self.kind
        }

        fn addr(&self) -> SocketAddr {
            self.addr
        }

        fn reliable(&self) -> bool {
            self.kind.reliable()
        }

        fn secure(&self) -> bool {
            self.kind.secure()
        }

        fn local_name(&self) -> Cow<'_, str> {
            Cow::Owned(self.addr.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::CaptureTransport;
    use super::*;

    #[test]
    fn test_add_transport() {
        let transports = TransportLayer::default();
        let addr = "127.0.0.1:8080".parse().unwrap();
        let kind = TransportProtocol::Udp;

        transports.add_transport(CaptureTransport::unreliable());

        assert!(transports.find(addr, kind).is_some());
        assert!(transports.transport_count() == 1);
    }

    #[test]
    fn test_remove_transport() {
        let transports = TransportLayer::default();
        let udp_tp = CaptureTransport::unreliable();
        let addr = "127.0.0.1:8080".parse().unwrap();
        let kind = TransportProtocol::Udp;
        let key = udp_tp.key();

        transports.add_transport(udp_tp);
        assert!(transports.find(addr, kind).is_some());
        assert!(transports.transport_count() == 1);

        transports.remove_transport(key);
        assert!(transports.find(addr, kind).is_none());
        assert!(transports.transport_count() == 0);
    }
}
