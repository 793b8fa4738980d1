//! Client transaction creation and state handling.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::headers::{CSeq, CallId, From as FromHdr, Header, Headers, Via};
use crate::message::{Host, HostPort, Method, Request, RequestLine, StatusCode, Uri};
use crate::transport::{IncomingResponse, OutgoingAddr, OutgoingRequest, ToBytes};

use super::key::{self, TsxKey};
use super::timer::TimerKind;
use super::tsx::{Builder, PENDING_RESCHED, PENDING_TRANSPORT, TsxEvent};
use super::{Role, State, Transaction, TransactionUser, TsxEventKind};

/// The parts of the original INVITE an INVITE client transaction keeps
/// to construct the ACK for a 3xx-6xx answer.
pub(super) struct AckContext {
    pub uri: Uri,
    pub via: Via,
    pub from: FromHdr,
    pub call_id: CallId,
    pub cseq: u32,
}

impl Transaction {
    /// Create, validate and register a client transaction for an
    /// outgoing request.
    ///
    /// A `Via` header is inserted and a branch generated when absent,
    /// so client transactions always match by branch.
    pub(crate) fn create_uac(
        endpoint: &Endpoint,
        tu: Option<Arc<dyn TransactionUser>>,
        request: &mut OutgoingRequest,
    ) -> Result<Transaction> {
        let method = request.msg.req_line.method.clone();

        // The ACK for a non-2xx answer belongs to the INVITE
        // transaction, the ACK for a 2xx to the dialog. Neither opens
        // a transaction of its own.
        if method == Method::Ack {
            return Err(Error::InvalidOperation(
                "ACK cannot open a client transaction",
            ));
        }

        let cseq = request
            .msg
            .headers
            .cseq()
            .cloned()
            .ok_or(Error::MissingRequiredHeader(CSeq::NAME))?;

        if cseq.method != method {
            log::warn!("CSeq header contains a different method than the request line");
            return Err(Error::InvalidHeader(CSeq::NAME));
        }

        // Generate a Via header if the TU did not provide one.
        if request.msg.headers.via().is_none() {
            let (protocol, sent_by) = match &request.addr {
                OutgoingAddr::Addr { transport, .. } => {
                    (transport.tp_kind(), HostPort::from(transport.addr()))
                }
                OutgoingAddr::HostPort { protocol, .. } => (
                    *protocol,
                    HostPort::new(Host::IpAddr(Ipv4Addr::UNSPECIFIED.into()), None),
                ),
            };

            request
                .msg
                .headers
                .insert_first(Header::Via(Via::new(protocol, sent_by)));
        }

        // Generate a branch parameter if it doesn't exist.
        let via = request.msg.headers.via_mut().expect("Via inserted above");
        if via.branch().is_none() {
            via.set_branch(key::generate_branch());
        }

        let via = via.clone();
        let branch = via.branch().cloned().expect("Branch generated above");

        let key = TsxKey::client(&method, &branch);

        let (transport, addr, reliable) = match &request.addr {
            OutgoingAddr::Addr { addr, transport } => {
                (Some(transport.clone()), Some(*addr), transport.reliable())
            }
            OutgoingAddr::HostPort { protocol, .. } => (None, None, protocol.reliable()),
        };

        // An INVITE client generates the ACK for 3xx-6xx answers
        // itself; keep what that takes.
        let ack = if method == Method::Invite {
            let from = request
                .msg
                .headers
                .from()
                .cloned()
                .ok_or(Error::MissingRequiredHeader(FromHdr::NAME))?;
            let call_id = request
                .msg
                .headers
                .call_id()
                .cloned()
                .ok_or(Error::MissingRequiredHeader(CallId::NAME))?;

            Some(AckContext {
                uri: request.msg.req_line.uri.clone(),
                via,
                from,
                call_id,
                cseq: cseq.seq,
            })
        } else {
            None
        };

        let mut builder = Builder::new();

        builder.role(Role::UAC);
        builder.method(method);
        builder.cseq(cseq.seq);
        builder.branch(branch);
        builder.key(key);
        builder.endpoint(endpoint.clone());
        builder.tu(tu);
        builder.ack(ack);
        builder.transport(transport);
        builder.addr(addr);
        builder.dest(request.addr.clone());
        builder.reliable(reliable);

        let tsx = builder.build();

        if let Err(err) = endpoint.get_tsx_layer().register(&tsx) {
            debug_assert!(false, "branch generator produced a duplicate key");
            return Err(err);
        }

        Ok(tsx)
    }

    pub(super) async fn on_state_null_uac(&self, event: TsxEvent<'_>) -> Result<()> {
        match event {
            TsxEvent::TxRequest(mut request) => {
                let buf = match request.buf.take() {
                    Some(buf) => buf,
                    None => request.to_bytes()?,
                };

                self.set_last_tx(buf.clone());
                self.tsx_send(buf).await?;

                let settings = self.settings();

                // Timer B (or F for non-INVITE) reaps the whole
                // transaction.
                self.schedule_timer(TimerKind::Timeout, settings.timeout);

                // Timer A (or E) only runs over unreliable transports.
                if !self.is_reliable() {
                    self.0.retransmit_count.store(0, Ordering::SeqCst);
                    if self.test_flag(PENDING_TRANSPORT) {
                        self.set_flag(PENDING_RESCHED);
                    } else {
                        self.schedule_timer(TimerKind::Retransmit, settings.t1);
                    }
                }

                self.set_state(State::Calling, TsxEventKind::TxMsg, None);

                Ok(())
            }
            _ => Err(Error::InvalidOperation(
                "client transaction expects the request send first",
            )),
        }
    }

    pub(super) async fn on_state_calling(&self, event: TsxEvent<'_>) -> Result<()> {
        match event {
            TsxEvent::Timer(TimerKind::Retransmit, _) => {
                self.retransmit(true).await?;
                Ok(())
            }
            TsxEvent::Timer(TimerKind::Timeout, _) => {
                self.0.retransmit_timer.cancel();
                self.clear_flag(PENDING_RESCHED);
                self.set_status_code(StatusCode::REQUEST_TIMEOUT);
                self.set_state(State::Terminated, TsxEventKind::Timer, None);
                Ok(())
            }
            TsxEvent::RxResponse(response) => {
                self.0.retransmit_timer.cancel();
                self.clear_flag(PENDING_RESCHED);
                self.0.timeout_timer.cancel();

                // Processing is the same as in state Proceeding, and
                // runs exactly once.
                self.on_state_proceeding_uac(TsxEvent::RxResponse(response))
                    .await
            }
            TsxEvent::RetransmitLast => {
                self.retransmit(false).await?;
                Ok(())
            }
            _ => Err(Error::InvalidOperation("unexpected event in calling state")),
        }
    }

    pub(super) async fn on_state_proceeding_uac(&self, event: TsxEvent<'_>) -> Result<()> {
        let response = match event {
            TsxEvent::RxResponse(response) => response,
            TsxEvent::Timer(TimerKind::Timeout, _) => {
                self.set_status_code(StatusCode::REQUEST_TIMEOUT);
                self.set_state(State::Terminated, TsxEventKind::Timer, None);
                return Ok(());
            }
            _ => {
                return Err(Error::InvalidOperation(
                    "unexpected event in proceeding state",
                ));
            }
        };

        let code = response.code();
        let settings = self.settings();
        let invite = self.0.method == Method::Invite;

        self.set_status_code(code);

        if code.is_provisional() {
            self.set_state(State::Proceeding, TsxEventKind::RxMsg, Some(response));
        } else if code.is_success() {
            self.0.timeout_timer.cancel();

            if invite {
                // The ACK for a 2xx belongs to the dialog; the
                // transaction is done.
                self.set_state(State::Terminated, TsxEventKind::RxMsg, Some(response));
            } else {
                // Timer K absorbs response retransmissions.
                let timeout = if !self.is_reliable() {
                    settings.t4
                } else {
                    Duration::ZERO
                };

                self.schedule_timer(TimerKind::Timeout, timeout);
                self.set_state(State::Completed, TsxEventKind::RxMsg, Some(response));
            }
        } else {
            self.0.timeout_timer.cancel();

            // Generate the ACK now, but transmit it only after the TU
            // saw the answer: the TU may still read the transmitted
            // request for dialog context.
            let ack = if invite {
                Some(self.build_ack(response)?)
            } else {
                None
            };

            self.set_state(State::Completed, TsxEventKind::RxMsg, Some(response));

            if let Some(ack) = ack {
                let buf = ack.to_bytes()?;
                self.set_last_tx(buf.clone());
                self.tsx_send(buf).await?;
            }

            // Timer D for INVITE, timer K otherwise.
            let timeout = if !self.is_reliable() {
                if invite { settings.td } else { settings.t4 }
            } else {
                Duration::ZERO
            };

            self.schedule_timer(TimerKind::Timeout, timeout);
        }

        Ok(())
    }

    pub(super) async fn on_state_completed_uac(&self, event: TsxEvent<'_>) -> Result<()> {
        match event {
            TsxEvent::Timer(TimerKind::Timeout, _) => {
                self.set_state(State::Terminated, TsxEventKind::Timer, None);
                Ok(())
            }
            TsxEvent::RxResponse(response) => {
                // A retransmitted final answer means the ACK was lost;
                // send it again without informing the TU.
                if self.0.method == Method::Invite && response.code().is_final() {
                    self.retransmit(false).await?;
                }
                Ok(())
            }
            TsxEvent::RetransmitLast => {
                self.retransmit(false).await?;
                Ok(())
            }
            _ => Err(Error::InvalidOperation(
                "unexpected event in completed state",
            )),
        }
    }

    /// Build the ACK for a 3xx-6xx answer from the retained request
    /// parts, copying the `To` header of the answer.
    fn build_ack(&self, response: &IncomingResponse) -> Result<OutgoingRequest> {
        let guard = self.0.ack.lock().expect("Lock failed");
        let ctx = guard
            .as_ref()
            .ok_or(Error::InvalidOperation("not an INVITE client transaction"))?;

        let mut headers = Headers::with_capacity(5);

        headers.push(Header::Via(ctx.via.clone()));
        headers.push(Header::From(ctx.from.clone()));
        headers.push(Header::To(response.to().clone()));
        headers.push(Header::CallId(ctx.call_id.clone()));
        headers.push(Header::CSeq(CSeq::new(ctx.cseq, Method::Ack)));

        let msg = Request {
            req_line: RequestLine {
                method: Method::Ack,
                uri: ctx.uri.clone(),
            },
            headers,
            body: None,
        };

        let addr = self
            .dest()
            .ok_or(Error::InvalidOperation("transaction has no destination"))?;

        Ok(OutgoingRequest {
            msg,
            addr,
            buf: None,
        })
    }
}
