//! SIP Endpoint
//!

pub mod builder;

mod resolver;

pub use builder::Builder;

use crate::SipService;
use crate::endpoint::resolver::Resolver;
use crate::headers::{Header, Via};
use crate::message::{Response, StatusCode, StatusLine};
use crate::transaction::{Transaction, TransactionLayer, TransactionUser, TsxSettings};
use crate::transport::{
    IncomingRequest, IncomingResponse, MessageDecoder, OutgoingAddr, OutgoingRequest,
    OutgoingResponse, ToBytes, Transport, TransportLayer, TransportStartup,
};
use crate::{Result, headers::Headers};

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use std::{io, sync::Arc};

struct Inner {
    /// The transport layer for the endpoint.
    transport: TransportLayer,
    /// The transaction layer for the endpoint.
    transaction: Option<TransactionLayer>,
    /// The name of the endpoint.
    name: String,
    /// The resolver for DNS lookups.
    resolver: Resolver,
    /// The list of services registered.
    services: Box<[Box<dyn SipService>]>,
    /// Protocol timing configuration shared by all transactions.
    settings: TsxSettings,
    /// Decoder for inbound packets, if any.
    decoder: Option<Arc<dyn MessageDecoder>>,
    /// Transports waiting to be started by `run`.
    transport_start: Mutex<Vec<Box<dyn TransportStartup>>>,
}

#[derive(Clone)]
/// The SIP endpoint.
///
/// An endpoint is a logical entity that can send and receive SIP messages,
/// manage transactions, and interact with various SIP services. The endpoint is
/// responsible for handling incoming requests and responses, as well as sending
/// outgoing messages.
pub struct Endpoint(Arc<Inner>);

impl Endpoint {
    /// Returns a builder to create an `Endpoint`.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Run with timeout.
    pub async fn run_with_timeout(self, timeout: Duration) -> Result<()> {
        let _ = tokio::time::timeout(timeout, self.receive_message()).await;

        Ok(())
    }

    /// Runs the endpoint by processing messages from transport layer.
    ///
    /// This method spawns a new Tokio task that will run indefinitely,
    /// processing incoming SIP messages.
    pub async fn run(self) -> Result<()> {
        tokio::spawn(Box::pin(self.receive_message()))
            .await
            .map_err(|e| io::Error::other(format!("Task join error: {}", e)))??;

        Ok(())
    }

    async fn receive_message(self) -> Result<()> {
        self.start_transports().await?;
        self.0.transport.handle_events(&self).await
    }

    async fn start_transports(&self) -> Result<()> {
        let startups: Vec<_> = {
            let mut guard = self.0.transport_start.lock().expect("Lock failed");
            guard.drain(..).collect()
        };

        for startup in startups {
            startup.start(self.0.transport.sender().clone()).await?;
        }

        Ok(())
    }

    /// Get the endpoint name.
    pub fn get_name(&self) -> &String {
        &self.0.name
    }

    /// Returns the protocol timing configuration.
    pub fn tsx_settings(&self) -> &TsxSettings {
        &self.0.settings
    }

    /// Creates a new User Agent Client (UAC) transaction for an
    /// outgoing request.
    ///
    /// A `Via` header is inserted and a branch generated when the TU
    /// did not provide them. The returned transaction is idle until
    /// the request is handed to [`Transaction::send_request`].
    pub fn new_uac_tsx(
        &self,
        tu: Option<Arc<dyn TransactionUser>>,
        request: &mut OutgoingRequest,
    ) -> Result<Transaction> {
        Transaction::create_uac(self, tu, request)
    }

    /// Creates a new User Agent Server (UAS) transaction for an
    /// incoming request.
    ///
    /// The transaction stays idle until the request is dispatched to
    /// it with [`Transaction::recv_request`].
    pub fn new_uas_tsx(
        &self,
        tu: Option<Arc<dyn TransactionUser>>,
        request: &mut IncomingRequest,
    ) -> Result<Transaction> {
        Transaction::create_uas(self, tu, request)
    }

    /// Respond statelessly an request.
    ///
    /// This method create an response from the incoming request and
    /// sent statelessly, meaning that no `UAS` transaction must be
    /// created for this request.
    pub async fn respond(
        &self,
        request: &IncomingRequest,
        status_code: StatusCode,
        reason_phrase: &str,
    ) -> Result<()> {
        // No `UAS` transaction must be created for this request.
        assert!(
            request.transaction().is_none(),
            "Request already has a transaction"
        );

        let msg = self.new_response(request, status_code, reason_phrase);

        self.send_response(&msg).await
    }

    /// Creates a new SIP response based on an incoming request.
    ///
    /// This method generates a response message with the specified status code
    /// and reason phrase. It also sets the necessary headers from request,
    /// including `Call-ID`, `From`, `To`, `CSeq`, `Via` and `Record-Route` headers.
    pub fn new_response(
        &self,
        req: &IncomingRequest,
        code: StatusCode,
        reason: &str,
    ) -> OutgoingResponse {
        // Copy the necessary headers from the request.
        let mut headers = Headers::with_capacity(7);
        let msg_headers = &req.request().headers;

        // `Via` header.
        let topmost_via = req.via().clone();
        let via = msg_headers
            .iter()
            .filter(|h| matches!(h, Header::Via(_)))
            .skip(1);
        headers.push(Header::Via(topmost_via));
        headers.extend(via.cloned());

        // `Record-Route` header.
        let rr = msg_headers
            .iter()
            .filter(|h| matches!(h, Header::RecordRoute(_)));
        headers.extend(rr.cloned());

        // `Call-ID` header.
        headers.push(Header::CallId(req.call_id().clone()));

        // `From` header.
        headers.push(Header::From(req.from().clone()));

        // `To` header.
        let mut to = req.to().clone();
        // 8.2.6.2 Headers and Tags
        // The UAS MUST add a tag to the To header field in
        // the response (with the exception of the 100 (Trying)
        // response, in which a tag MAY be present).
        if to.tag().is_none() && code > StatusCode::TRYING {
            to.set_tag(req.via().branch().cloned());
        }
        headers.push(Header::To(to));

        // `CSeq` header.
        headers.push(Header::CSeq(req.cseq().clone()));

        let addr = self.get_outbound_addr(req.via(), req.transport());
        let status_line = StatusLine::new(code, reason);

        // Done.
        OutgoingResponse {
            response: Response {
                status_line,
                headers,
                body: None,
            },
            addr,
            buf: None,
        }
    }

    /// Sends a SIP response to the specified address.
    ///
    /// This method encodes the response message and sends it to the
    /// specified address using the appropriate transport layer.
    pub async fn send_response(&self, response: &OutgoingResponse) -> Result<()> {
        log::debug!(
            "=> Response {} {}",
            response.status_code(),
            response.reason()
        );
        let encoded_buf = response.to_bytes()?;

        self.stateless_send(&encoded_buf, &response.addr).await?;

        Ok(())
    }

    /// Sends a buffer to the destination, resolving it first when
    /// needed.
    ///
    /// For unresolved destinations every candidate address is tried in
    /// order; a failure on one candidate is logged and the next one is
    /// used. The transport and address that accepted the buffer are
    /// returned so callers can cache them.
    pub(crate) async fn stateless_send(
        &self,
        buf: &[u8],
        target: &OutgoingAddr,
    ) -> Result<(Arc<dyn Transport>, SocketAddr)> {
        match target {
            OutgoingAddr::Addr { addr, transport } => {
                transport.send(buf, addr).await?;
                Ok((transport.clone(), *addr))
            }
            OutgoingAddr::HostPort { host, protocol } => {
                let port = host.port.unwrap_or(protocol.default_port());
                let ips = self.0.resolver.resolve_all(&host.host).await?;

                for ip in ips {
                    let addr = SocketAddr::new(ip, port);

                    let Some(transport) = self.0.transport.find(addr, *protocol) else {
                        log::info!("No {} transport for {}, trying next server", protocol, addr);
                        continue;
                    };

                    match transport.send(buf, &addr).await {
                        Ok(_) => return Ok((transport, addr)),
                        Err(err) => {
                            log::info!(
                                "Temporary failure in sending to {}, will try next server. Err={}",
                                addr,
                                err
                            );
                        }
                    }
                }

                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No working destination for {}", host),
                )
                .into())
            }
        }
    }

    // https://datatracker.ietf.org/doc/html/rfc3261#section-18.2.2
    // https://datatracker.ietf.org/doc/html/rfc3581
    pub(crate) fn get_outbound_addr(
        &self,
        via: &Via,
        transport: &Arc<dyn Transport>,
    ) -> OutgoingAddr {
        if transport.reliable() {
            // Tcp, TLS, etc..
            return OutgoingAddr::Addr {
                addr: transport.addr(),
                transport: transport.clone(),
            };
        }

        if let Some(maddr) = via.maddr() {
            let port = via.sent_by().port.unwrap_or(via.protocol().default_port());

            OutgoingAddr::HostPort {
                host: crate::message::HostPort {
                    host: maddr.clone(),
                    port: Some(port),
                },
                protocol: via.protocol(),
            }
        } else if let (Some(ip), Some(rport)) = (via.received(), via.rport()) {
            OutgoingAddr::Addr {
                addr: SocketAddr::new(ip, rport),
                transport: transport.clone(),
            }
        } else if let Some(ip) = via.received() {
            let port = via.sent_by().port.unwrap_or(via.protocol().default_port());

            OutgoingAddr::Addr {
                addr: SocketAddr::new(ip, port),
                transport: transport.clone(),
            }
        } else {
            OutgoingAddr::HostPort {
                host: via.sent_by().clone(),
                protocol: via.protocol(),
            }
        }
    }

    pub(crate) async fn process_response(&self, msg: &mut Option<IncomingResponse>) -> Result<()> {
        {
            let msg = msg.as_ref().expect("Message already consumed");
            log::debug!("<= Response ({} {})", msg.code(), msg.reason());
        }

        let handled_by_transaction_layer = match self.0.transaction {
            Some(ref tsx_layer) => {
                tsx_layer
                    .handle_response(msg.as_ref().expect("Message already consumed"))
                    .await?
            }
            None => false,
        };

        if handled_by_transaction_layer {
            return Ok(());
        }

        for service in self.0.services.iter() {
            service.on_incoming_response(self, msg).await?;

            if msg.is_none() {
                break;
            }
        }

        if let Some(msg) = msg {
            log::debug!(
                "Response ({} {}) from /{} was unhandled by any service",
                msg.code(),
                msg.reason(),
                msg.addr()
            );
        }

        Ok(())
    }

    pub(crate) async fn process_request(&self, msg: &mut Option<IncomingRequest>) -> Result<()> {
        {
            let msg = msg.as_ref().expect("Message already consumed");
            log::debug!("<= Request {} from /{}", msg.method(), msg.addr());
        }

        let handled_by_transaction_layer = match self.0.transaction {
            Some(ref tsx_layer) => {
                tsx_layer
                    .handle_request(msg.as_ref().expect("Message already consumed"))
                    .await?
            }
            None => false,
        };

        if handled_by_transaction_layer {
            return Ok(());
        }

        // If the request was not handled by the transaction layer, we
        // pass it to the services.
        for service in self.0.services.iter() {
            service.on_incoming_request(self, msg).await?;
            if msg.is_none() {
                break;
            }
        }

        if let Some(msg) = msg {
            log::debug!(
                "Request {} from /{} was unhandled by any service",
                msg.method(),
                msg.addr()
            );
        }

        Ok(())
    }

    /// Returns the transaction layer, if one is installed.
    pub fn transaction_layer(&self) -> Option<&TransactionLayer> {
        self.0.transaction.as_ref()
    }

    pub(crate) fn get_tsx_layer(&self) -> &TransactionLayer {
        self.0
            .transaction
            .as_ref()
            .expect("Transaction layer not set")
    }

    pub(crate) fn decoder(&self) -> Option<Arc<dyn MessageDecoder>> {
        self.0.decoder.clone()
    }
}
