//! SIP Message types.
//!
//! The crate does not parse SIP text; messages are built from these
//! structured types, either programmatically by the TU or by a
//! [`MessageDecoder`](crate::transport::MessageDecoder) installed on
//! the endpoint.

mod code;
mod method;

pub use code::StatusCode;
pub use method::Method;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use util::ArcStr;

use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
/// The transport protocol that carries a SIP message.
pub enum TransportProtocol {
    #[default]
    /// UDP transport.
    Udp,
    /// TCP transport.
    Tcp,
    /// TLS over TCP transport.
    Tls,
    /// WebSocket transport.
    Ws,
}

impl TransportProtocol {
    /// Returns `true` if the protocol guarantees delivery.
    pub fn reliable(&self) -> bool {
        !matches!(self, TransportProtocol::Udp)
    }

    /// Returns `true` if the protocol is encrypted.
    pub fn secure(&self) -> bool {
        matches!(self, TransportProtocol::Tls)
    }

    /// The default port for this protocol.
    pub fn default_port(&self) -> u16 {
        if self.secure() { 5061 } else { 5060 }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Udp => f.write_str("UDP"),
            TransportProtocol::Tcp => f.write_str("TCP"),
            TransportProtocol::Tls => f.write_str("TLS"),
            TransportProtocol::Ws => f.write_str("WS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// The host part of an address, either a resolved IP or a domain name.
pub enum Host {
    /// An IP address.
    IpAddr(IpAddr),
    /// A domain name to be resolved.
    DomainName(ArcStr),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::IpAddr(ip) => write!(f, "{}", ip),
            Host::DomainName(domain) => write!(f, "{}", domain),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A host with an optional port.
pub struct HostPort {
    /// The host.
    pub host: Host,
    /// The port, if present.
    pub port: Option<u16>,
}

impl HostPort {
    /// Creates a new `HostPort`.
    pub fn new(host: Host, port: Option<u16>) -> Self {
        HostPort { host, port }
    }
}

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        HostPort {
            host: Host::IpAddr(addr.ip()),
            port: Some(addr.port()),
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A SIP URI in its textual form.
pub struct Uri(ArcStr);

impl Uri {
    /// Creates a new `Uri`.
    pub fn new(uri: impl Into<ArcStr>) -> Self {
        Uri(uri.into())
    }

    /// Returns the URI text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
/// The first line of a SIP request.
pub struct RequestLine {
    /// The request method.
    pub method: Method,
    /// The request target.
    pub uri: Uri,
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0", self.method, self.uri)
    }
}

#[derive(Debug, Clone)]
/// The first line of a SIP response.
pub struct StatusLine {
    /// The response status code.
    pub code: StatusCode,
    /// The reason phrase.
    pub reason: ArcStr,
}

impl StatusLine {
    /// Creates a new `StatusLine`.
    pub fn new(code: StatusCode, reason: impl Into<ArcStr>) -> Self {
        StatusLine {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {} {}", self.code, self.reason)
    }
}

#[derive(Debug, Clone)]
/// A SIP request message.
pub struct Request {
    /// The request line.
    pub req_line: RequestLine,
    /// The message headers.
    pub headers: Headers,
    /// The message body.
    pub body: Option<Bytes>,
}

impl Request {
    /// Creates a new request without headers or body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            req_line: RequestLine { method, uri },
            headers: Headers::default(),
            body: None,
        }
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.req_line.method
    }
}

#[derive(Debug, Clone)]
/// A SIP response message.
pub struct Response {
    /// The status line.
    pub status_line: StatusLine,
    /// The message headers.
    pub headers: Headers,
    /// The message body.
    pub body: Option<Bytes>,
}

impl Response {
    /// Creates a new response without headers or body.
    pub fn new(status_line: StatusLine) -> Self {
        Response {
            status_line,
            headers: Headers::default(),
            body: None,
        }
    }

    /// Returns the response status code.
    pub fn code(&self) -> StatusCode {
        self.status_line.code
    }

    /// Returns the reason phrase.
    pub fn reason(&self) -> &str {
        &self.status_line.reason
    }
}

#[derive(Debug, Clone, EnumAsInner)]
/// A SIP message, either a request or a response.
pub enum SipMsg {
    /// A request message.
    Request(Request),
    /// A response message.
    Response(Response),
}

impl SipMsg {
    /// Returns the message headers.
    pub fn headers(&self) -> &Headers {
        match self {
            SipMsg::Request(request) => &request.headers,
            SipMsg::Response(response) => &response.headers,
        }
    }

    /// Returns the message headers mutably.
    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            SipMsg::Request(request) => &mut request.headers,
            SipMsg::Response(response) => &mut response.headers,
        }
    }
}
