//! The outgoing send pipeline.
//!
//! Fast path: a cached transport sends directly. Slow path: the
//! endpoint resolves the destination and tries candidates in order; a
//! spawned task re-enters the transaction when the outcome is known.
//! While resolution is in flight the `PENDING_TRANSPORT` flag defers
//! competing sends, reschedules and destruction.

use std::cmp;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::message::StatusCode;
use crate::transport::Transport;

use super::timer::TimerKind;
use super::tsx::{
    PENDING_DESTROY, PENDING_RESCHED, PENDING_SEND, PENDING_TRANSPORT, RESOLVED_SERVER,
};
use super::{State, Transaction, TsxEventKind};

impl Transaction {
    /// Hand a buffer to the transport, resolving the destination when
    /// no transport is bound yet.
    ///
    /// No second outbound attempt may begin while resolution is in
    /// flight; such sends are deferred and replayed from the resolution
    /// callback.
    pub(super) fn tsx_send(&self, buf: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.test_flag(PENDING_TRANSPORT) {
                self.set_flag(PENDING_SEND);
                return Ok(());
            }

            if let Some(transport) = self.transport() {
                let addr = self
                    .remote_addr()
                    .ok_or(Error::InvalidOperation("transport bound without an address"))?;

                match transport.send(&buf, &addr).await {
                    Ok(_) => return Ok(()),
                    Err(err) => {
                        // Force the full resolution procedure on the next
                        // attempt.
                        log::warn!("Error sending to {}: {} ({:p})", addr, err, self.0);
                        self.set_transport_err(err.to_string());
                        self.clear_transport();
                    }
                }
            }

            if self.test_flag(RESOLVED_SERVER) {
                // The server was already resolved once; this failure is
                // permanent.
                self.set_status_code(StatusCode::SERVICE_UNAVAILABLE);
                if self.state() < State::Terminated {
                    self.set_state(State::Terminated, TsxEventKind::TransportError, None);
                }

                return Err(io::Error::other("transport failed after resolution").into());
            }

            self.set_flag(PENDING_TRANSPORT);

            let tsx = self.clone();
            tokio::spawn(Box::pin(async move {
                tsx.resolve_and_send(buf).await;
            }));

            Ok(())
        })
    }

    async fn resolve_and_send(self, buf: Bytes) {
        let result = match self.dest() {
            Some(target) => self.0.endpoint.stateless_send(&buf, &target).await,
            None => Err(io::Error::other("transaction has no destination").into()),
        };

        self.on_send_resolved(result).await;
    }

    /// Completion of an asynchronous resolving send.
    async fn on_send_resolved(&self, result: Result<(Arc<dyn Transport>, SocketAddr)>) {
        let _guard = self.0.event_lock.lock().await;

        match result {
            Ok((transport, addr)) => {
                let reliable = transport.reliable();
                self.bind_transport(transport, addr, reliable);
                self.clear_flag(PENDING_TRANSPORT);
                self.set_flag(RESOLVED_SERVER);

                if self.take_flag(PENDING_DESTROY) {
                    self.set_state(State::Destroyed, TsxEventKind::Unknown, None);
                } else if self.take_flag(PENDING_SEND) {
                    let pending = self.last_tx();
                    if let Some(buf) = pending {
                        if let Err(err) = self.tsx_send(buf).await {
                            log::warn!("Deferred send failed: {} ({:p})", err, self.0);
                        }
                    }
                } else if self.take_flag(PENDING_RESCHED) {
                    // Only rearm when the transport turned out to be
                    // unreliable.
                    if !self.is_reliable() {
                        self.resched_retransmission();
                    }
                }
            }
            Err(err) => {
                log::warn!(
                    "Failed to send, no more destinations: {} ({:p})",
                    err,
                    self.0
                );
                self.clear_flag(PENDING_TRANSPORT);
                self.set_flag(RESOLVED_SERVER);
                self.set_transport_err(err.to_string());
                self.set_status_code(StatusCode::SERVICE_UNAVAILABLE);

                if self.state() < State::Terminated {
                    self.set_state(State::Terminated, TsxEventKind::TransportError, None);
                } else if self.take_flag(PENDING_DESTROY) {
                    self.set_state(State::Destroyed, TsxEventKind::Unknown, None);
                }
            }
        }
    }

    /// Retransmit the last transmitted message.
    ///
    /// When `resched` is set the retransmit timer is restarted before
    /// the message goes out, so a looped-back delivery cannot race the
    /// timer state.
    pub(super) async fn retransmit(&self, resched: bool) -> Result<u32> {
        let buf = self
            .last_tx()
            .ok_or(Error::InvalidOperation("no message to retransmit"))?;

        let count = self.0.retransmit_count.fetch_add(1, Ordering::SeqCst) + 1;

        log::trace!("Retransmitting, count={}, resched={} ({:p})", count, resched, self.0);

        if resched {
            if self.test_flag(PENDING_TRANSPORT) {
                self.set_flag(PENDING_RESCHED);
            } else {
                self.resched_retransmission();
            }
        }

        self.tsx_send(buf).await?;

        Ok(count)
    }

    /// Arm the retransmit timer with the doubled interval, capped at
    /// T2.
    pub(super) fn resched_retransmission(&self) {
        debug_assert!(!self.test_flag(PENDING_TRANSPORT));

        let settings = self.settings();
        // The timeout timer reaps the transaction long before the
        // exponent could overflow; the clamp keeps the shift defined.
        let exponent = self.retrans_count().min(16);
        let interval = cmp::min(settings.t2, settings.t1 * (1 << exponent));

        self.schedule_timer(TimerKind::Retransmit, interval);
    }
}
