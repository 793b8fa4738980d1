//! Server transaction creation and state handling.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::headers::CSeq;
use crate::message::{Method, StatusCode};
use crate::transport::{IncomingRequest, OutgoingAddr, ToBytes};

use super::key::TsxKey;
use super::timer::TimerKind;
use super::tsx::{Builder, PENDING_RESCHED, PENDING_SEND, PENDING_TRANSPORT, TsxEvent};
use super::{Role, State, Transaction, TransactionUser, TsxEventKind};

impl Transaction {
    /// Create, validate and register a server transaction for an
    /// incoming request.
    ///
    /// The transaction enters `Trying` when the request is dispatched
    /// to it with [`Transaction::recv_request`].
    pub(crate) fn create_uas(
        endpoint: &Endpoint,
        tu: Option<Arc<dyn TransactionUser>>,
        request: &mut IncomingRequest,
    ) -> Result<Transaction> {
        let method = request.method().clone();

        if method == Method::Ack {
            return Err(Error::InvalidOperation(
                "ACK cannot open a server transaction",
            ));
        }

        // A mismatch between the request line and CSeq would let one
        // transaction answer under another method's name; reject it
        // outright.
        if *request.cseq().method() != method {
            log::warn!("CSeq header contains a different method than the request line");
            return Err(Error::InvalidHeader(CSeq::NAME));
        }

        let key = TsxKey::server(request);
        let branch = request.via().branch().cloned().unwrap_or_default();

        // Decide where responses will go, per the received/rport
        // rules.
        let dest = endpoint.get_outbound_addr(request.via(), request.transport());

        let (transport, addr, reliable) = match &dest {
            OutgoingAddr::Addr { addr, transport } => {
                (Some(transport.clone()), Some(*addr), transport.reliable())
            }
            OutgoingAddr::HostPort { protocol, .. } => (None, None, protocol.reliable()),
        };

        let mut builder = Builder::new();

        builder.role(Role::UAS);
        builder.method(method);
        builder.cseq(request.cseq().seq);
        builder.branch(branch);
        builder.key(key);
        builder.endpoint(endpoint.clone());
        builder.tu(tu);
        builder.transport(transport);
        builder.addr(addr);
        builder.dest(dest);
        builder.reliable(reliable);

        let tsx = builder.build();

        // A failure here means a retransmission raced the TU and the
        // existing transaction will absorb it.
        endpoint.get_tsx_layer().register(&tsx)?;

        request.set_transaction(tsx.clone());

        Ok(tsx)
    }

    pub(super) async fn on_state_null_uas(&self, event: TsxEvent<'_>) -> Result<()> {
        match event {
            TsxEvent::RxRequest(_) => {
                self.set_state(State::Trying, TsxEventKind::RxMsg, None);
                Ok(())
            }
            _ => Err(Error::InvalidOperation(
                "server transaction expects the initial request first",
            )),
        }
    }

    pub(super) async fn on_state_trying(&self, event: TsxEvent<'_>) -> Result<()> {
        match event {
            TsxEvent::TxResponse(response) => {
                self.on_state_proceeding_uas(TsxEvent::TxResponse(response))
                    .await?;

                if self.state() == State::Trying {
                    self.set_state(State::Proceeding, TsxEventKind::TxMsg, None);
                }

                Ok(())
            }
            // A request retransmission before the TU produced any
            // response: there is nothing to retransmit yet, absorb it.
            _ => Ok(()),
        }
    }

    pub(super) async fn on_state_proceeding_uas(&self, event: TsxEvent<'_>) -> Result<()> {
        match event {
            TsxEvent::RxRequest(_) | TsxEvent::RetransmitLast => {
                // A request retransmission asks for the last response
                // again.
                if self.test_flag(PENDING_TRANSPORT) {
                    self.set_flag(PENDING_SEND);
                } else {
                    self.retransmit(false).await?;
                }

                Ok(())
            }
            TsxEvent::TxResponse(mut response) => {
                let code = response.status_code();
                self.set_status_code(code);

                log::debug!("=> Response {} {} ({:p})", code, response.reason(), self.0);

                let buf = match response.buf.take() {
                    Some(buf) => buf,
                    None => response.to_bytes()?,
                };

                self.set_last_tx(buf.clone());
                self.tsx_send(buf).await?;

                let settings = self.settings();
                let invite = self.0.method == Method::Invite;

                if code.is_provisional() {
                    self.set_state(State::Proceeding, TsxEventKind::TxMsg, None);
                } else if code.is_success()
                    && invite
                    && !self.0.retransmit_2xx.load(Ordering::SeqCst)
                {
                    // The TU owns 2xx retransmissions; they carry
                    // dialog state.
                    self.set_state(State::Terminated, TsxEventKind::TxMsg, None);
                } else {
                    // Timer G repeats the final answer of an INVITE
                    // until the ACK shows up.
                    if invite && !self.is_reliable() {
                        self.0.retransmit_count.store(0, Ordering::SeqCst);
                        if self.test_flag(PENDING_TRANSPORT) {
                            self.set_flag(PENDING_RESCHED);
                        } else {
                            self.schedule_timer(TimerKind::Retransmit, settings.t1);
                        }
                    }

                    // Timer H for INVITE regardless of transport;
                    // timer J for non-INVITE only over unreliable
                    // transports.
                    let timeout = if invite || !self.is_reliable() {
                        settings.timeout
                    } else {
                        Duration::ZERO
                    };

                    self.schedule_timer(TimerKind::Timeout, timeout);
                    self.set_state(State::Completed, TsxEventKind::TxMsg, None);
                }

                Ok(())
            }
            TsxEvent::Timer(TimerKind::Retransmit, _) => {
                self.retransmit(true).await?;
                Ok(())
            }
            TsxEvent::Timer(TimerKind::Timeout, _) => {
                self.set_status_code(StatusCode::REQUEST_TIMEOUT);
                self.set_state(State::Terminated, TsxEventKind::Timer, None);
                Ok(())
            }
            _ => Err(Error::InvalidOperation(
                "unexpected event in proceeding state",
            )),
        }
    }

    pub(super) async fn on_state_completed_uas(&self, event: TsxEvent<'_>) -> Result<()> {
        match event {
            TsxEvent::RxRequest(request) => {
                if request.is_method(&Method::Ack) {
                    // The ACK ends the retransmission duty; timer I
                    // absorbs further ACKs before the transaction is
                    // reclaimed.
                    self.0.retransmit_timer.cancel();
                    self.clear_flag(PENDING_RESCHED);
                    self.0.timeout_timer.cancel();

                    let settings = self.settings();
                    let timeout = if !self.is_reliable() {
                        settings.t4
                    } else {
                        Duration::ZERO
                    };

                    self.schedule_timer(TimerKind::Timeout, timeout);
                    self.set_state(State::Confirmed, TsxEventKind::RxMsg, None);
                } else {
                    self.retransmit(false).await?;
                }

                Ok(())
            }
            TsxEvent::RetransmitLast => {
                self.retransmit(false).await?;
                Ok(())
            }
            TsxEvent::Timer(TimerKind::Retransmit, _) => {
                self.retransmit(true).await?;
                Ok(())
            }
            TsxEvent::Timer(TimerKind::Timeout, _) => {
                // For INVITE this means the ACK never arrived.
                if self.0.method == Method::Invite {
                    self.set_status_code(StatusCode::REQUEST_TIMEOUT);
                }
                self.set_state(State::Terminated, TsxEventKind::Timer, None);
                Ok(())
            }
            TsxEvent::TxResponse(_) => Err(Error::InvalidOperation("response already sent")),
            _ => Err(Error::InvalidOperation(
                "unexpected event in completed state",
            )),
        }
    }

    pub(super) async fn on_state_confirmed(&self, event: TsxEvent<'_>) -> Result<()> {
        match event {
            // Late ACK or INVITE retransmissions are absorbed.
            TsxEvent::RxRequest(_) => Ok(()),
            TsxEvent::Timer(TimerKind::Timeout, _) => {
                self.set_state(State::Terminated, TsxEventKind::Timer, None);
                Ok(())
            }
            _ => Err(Error::InvalidOperation(
                "unexpected event in confirmed state",
            )),
        }
    }
}
