//! The transaction handle and its state dispatch.

use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use util::ArcStr;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::message::{Method, StatusCode};
use crate::transport::{
    IncomingRequest, IncomingResponse, OutgoingAddr, OutgoingRequest, OutgoingResponse, Transport,
};

use super::key::TsxKey;
use super::timer::{TimerKind, TimerSlot};
use super::uac::AckContext;
use super::{Role, State, TransactionUser, TsxEventKind, TsxSettings};

// Transport flags.
pub(super) const PENDING_TRANSPORT: u8 = 1;
pub(super) const PENDING_RESCHED: u8 = 2;
pub(super) const PENDING_SEND: u8 = 4;
pub(super) const PENDING_DESTROY: u8 = 8;
pub(super) const RESOLVED_SERVER: u8 = 16;

/// An event dispatched to a transaction's state machine.
pub(crate) enum TsxEvent<'m> {
    /// An inbound request matched to this transaction.
    RxRequest(&'m IncomingRequest),
    /// An inbound response matched to this transaction.
    RxResponse(&'m IncomingResponse),
    /// The TU sends a request.
    TxRequest(OutgoingRequest),
    /// The TU sends a response.
    TxResponse(OutgoingResponse),
    /// The TU asks for the last message to be sent again.
    RetransmitLast,
    /// A timer tick carrying the id it was armed with.
    Timer(TimerKind, i64),
}

pub(super) struct Inner {
    /// The role of the transaction (UAC or UAS).
    pub(super) role: Role,
    /// The transaction method.
    pub(super) method: Method,
    /// The CSeq number of the request.
    pub(super) cseq: u32,
    /// The branch parameter identifying the transaction.
    pub(super) branch: ArcStr,
    /// The key used to identify the transaction in the registry.
    pub(super) key: TsxKey,
    /// The endpoint associated with the transaction.
    pub(super) endpoint: Endpoint,
    /// The bound Transaction User, if any.
    pub(super) tu: Option<Arc<dyn TransactionUser>>,
    /// Serializes event dispatch; a handler runs to completion while
    /// holding it.
    pub(super) event_lock: tokio::sync::Mutex<()>,
    /// Cleared by destruction; checked after every lock acquisition.
    pub(super) alive: AtomicBool,
    /// The current state of the transaction.
    pub(super) state: Mutex<State>,
    /// The last status code sent or received in the transaction.
    pub(super) status_code: RwLock<Option<StatusCode>>,
    /// The retransmission count for the transaction.
    pub(super) retransmit_count: AtomicU32,
    /// The encoded last transmitted message, kept for retransmission.
    pub(super) last_tx: RwLock<Option<Bytes>>,
    /// Original request parts an INVITE client keeps to build the ACK.
    pub(super) ack: Mutex<Option<AckContext>>,
    /// Whether an INVITE server transaction retransmits its own 2xx.
    pub(super) retransmit_2xx: AtomicBool,
    /// The transport bound to the transaction, if resolved.
    pub(super) transport: RwLock<Option<Arc<dyn Transport>>>,
    /// The resolved remote address.
    pub(super) addr: Mutex<Option<SocketAddr>>,
    /// The destination used when (re)resolving the transport.
    pub(super) dest: Mutex<Option<OutgoingAddr>>,
    /// Mirrors the reliability of the current transport.
    pub(super) reliable: AtomicBool,
    /// Pending-transmission flag bits.
    pub(super) flags: AtomicU8,
    /// The last transport error observed.
    pub(super) transport_err: Mutex<Option<String>>,
    /// Retransmission timer slot.
    pub(super) retransmit_timer: TimerSlot,
    /// Timeout timer slot.
    pub(super) timeout_timer: TimerSlot,
}

#[derive(Clone)]
/// Represents a SIP Transaction.
///
/// A SIP Transaction consists of a set of messages exchanged
/// between a client (`UAC`) and a server (`UAS`) to complete
/// a certain action, such as establishing or terminating a call.
///
/// The handle is cheap to clone; all clones share the same state.
pub struct Transaction(pub(super) Arc<Inner>);

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("branch", &self.0.branch)
            .field("key", &self.0.key)
            .field("ptr", &(self.0.as_ref() as *const Inner))
            .finish()
    }
}

#[derive(Default)]
pub(super) struct Builder {
    role: Option<Role>,
    method: Option<Method>,
    cseq: Option<u32>,
    branch: Option<ArcStr>,
    key: Option<TsxKey>,
    endpoint: Option<Endpoint>,
    tu: Option<Arc<dyn TransactionUser>>,
    ack: Option<AckContext>,
    transport: Option<Arc<dyn Transport>>,
    addr: Option<SocketAddr>,
    dest: Option<OutgoingAddr>,
    reliable: bool,
}

impl Builder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn role(&mut self, role: Role) -> &mut Self {
        self.role = Some(role);
        self
    }

    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method = Some(method);
        self
    }

    pub fn cseq(&mut self, cseq: u32) -> &mut Self {
        self.cseq = Some(cseq);
        self
    }

    pub fn branch(&mut self, branch: ArcStr) -> &mut Self {
        self.branch = Some(branch);
        self
    }

    pub fn key(&mut self, key: TsxKey) -> &mut Self {
        self.key = Some(key);
        self
    }

    pub fn endpoint(&mut self, endpoint: Endpoint) -> &mut Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn tu(&mut self, tu: Option<Arc<dyn TransactionUser>>) -> &mut Self {
        self.tu = tu;
        self
    }

    pub fn ack(&mut self, ack: Option<AckContext>) -> &mut Self {
        self.ack = ack;
        self
    }

    pub fn transport(&mut self, transport: Option<Arc<dyn Transport>>) -> &mut Self {
        self.transport = transport;
        self
    }

    pub fn addr(&mut self, addr: Option<SocketAddr>) -> &mut Self {
        self.addr = addr;
        self
    }

    pub fn dest(&mut self, dest: OutgoingAddr) -> &mut Self {
        self.dest = Some(dest);
        self
    }

    pub fn reliable(&mut self, reliable: bool) -> &mut Self {
        self.reliable = reliable;
        self
    }

    pub fn build(self) -> Transaction {
        let inner = Inner {
            role: self.role.expect("Role is required"),
            method: self.method.expect("Method is required"),
            cseq: self.cseq.expect("CSeq is required"),
            branch: self.branch.unwrap_or_default(),
            key: self.key.expect("Key is required"),
            endpoint: self.endpoint.expect("Endpoint is required"),
            tu: self.tu,
            event_lock: tokio::sync::Mutex::new(()),
            alive: AtomicBool::new(true),
            state: Mutex::new(State::Null),
            status_code: RwLock::default(),
            retransmit_count: AtomicU32::new(0),
            last_tx: RwLock::default(),
            ack: Mutex::new(self.ack),
            retransmit_2xx: AtomicBool::new(true),
            transport: RwLock::new(self.transport),
            addr: Mutex::new(self.addr),
            dest: Mutex::new(self.dest),
            reliable: AtomicBool::new(self.reliable),
            flags: AtomicU8::new(0),
            transport_err: Mutex::default(),
            retransmit_timer: TimerSlot::new(),
            timeout_timer: TimerSlot::new(),
        };

        let tsx = Transaction(Arc::new(inner));

        log::trace!("Transaction created [{:?}] ({:p})", tsx.0.role, tsx.0);

        tsx
    }
}

impl Transaction {
    /// The role of the transaction.
    pub fn role(&self) -> Role {
        self.0.role
    }

    /// The transaction method.
    pub fn method(&self) -> &Method {
        &self.0.method
    }

    /// The CSeq number of the transaction request.
    pub fn cseq(&self) -> u32 {
        self.0.cseq
    }

    /// The branch parameter identifying the transaction.
    pub fn branch(&self) -> &ArcStr {
        &self.0.branch
    }

    /// The registry key of the transaction.
    pub fn key(&self) -> &TsxKey {
        &self.0.key
    }

    #[inline]
    /// Retrieves the current state of the Transaction.
    pub fn state(&self) -> State {
        *self.0.state.lock().expect("Lock failed")
    }

    #[inline]
    /// Retrieves the last status code sent or received.
    pub fn last_status_code(&self) -> Option<StatusCode> {
        *self.0.status_code.read().expect("Lock failed")
    }

    #[inline]
    /// Gets the count of retransmissions.
    pub fn retrans_count(&self) -> u32 {
        self.0.retransmit_count.load(Ordering::SeqCst)
    }

    #[inline]
    /// Checks if the bound transport is reliable.
    pub fn is_reliable(&self) -> bool {
        self.0.reliable.load(Ordering::SeqCst)
    }

    /// Returns `false` once the transaction has been destroyed.
    pub fn is_alive(&self) -> bool {
        self.alive()
    }

    /// The encoded last transmitted message, if any.
    ///
    /// The message is retained until the transaction is destroyed; for
    /// an INVITE client that answered a 3xx-6xx it is the generated
    /// ACK.
    pub fn last_tx(&self) -> Option<Bytes> {
        self.0.last_tx.read().expect("Lock failed").clone()
    }

    /// The last transport error observed, if any.
    pub fn last_transport_error(&self) -> Option<String> {
        self.0.transport_err.lock().expect("Lock failed").clone()
    }

    /// Controls whether an INVITE server transaction retransmits its
    /// own 2xx final response.
    ///
    /// When disabled the TU owns 2xx retransmissions (they carry
    /// dialog state) and the transaction terminates as soon as the
    /// 2xx is sent.
    pub fn set_retransmit_2xx(&self, enabled: bool) {
        self.0.retransmit_2xx.store(enabled, Ordering::SeqCst);
    }

    /// Send the initial request on a client transaction.
    pub async fn send_request(&self, request: OutgoingRequest) -> Result<()> {
        self.dispatch(TsxEvent::TxRequest(request)).await
    }

    /// Send a response on a server transaction.
    pub async fn respond(&self, response: OutgoingResponse) -> Result<()> {
        self.dispatch(TsxEvent::TxResponse(response)).await
    }

    /// Retransmit the last transmitted message.
    pub async fn send_last(&self) -> Result<()> {
        self.dispatch(TsxEvent::RetransmitLast).await
    }

    /// Inject an inbound request already matched to this transaction.
    pub async fn recv_request(&self, request: &IncomingRequest) -> Result<()> {
        log::debug!(
            "<= Request {} in state {:?} ({:p})",
            request.method(),
            self.state(),
            self.0
        );
        self.dispatch(TsxEvent::RxRequest(request)).await
    }

    /// Inject an inbound response already matched to this transaction.
    pub async fn recv_response(&self, response: &IncomingResponse) -> Result<()> {
        log::debug!(
            "<= Response {} in state {:?} ({:p})",
            response.code(),
            self.state(),
            self.0
        );
        self.dispatch(TsxEvent::RxResponse(response)).await
    }

    /// Terminate the transaction with the given final status code.
    ///
    /// Calling this on an already terminated transaction is a no-op
    /// success.
    pub async fn terminate(&self, code: StatusCode) -> Result<()> {
        if !code.is_final() {
            return Err(Error::InvalidOperation(
                "termination requires a final status code",
            ));
        }

        let _guard = self.0.event_lock.lock().await;

        if !self.alive() || self.state() >= State::Terminated {
            return Ok(());
        }

        self.set_status_code(code);
        self.set_state(State::Terminated, TsxEventKind::User, None);

        Ok(())
    }

    pub(crate) async fn dispatch(&self, event: TsxEvent<'_>) -> Result<()> {
        let _guard = self.0.event_lock.lock().await;

        if !self.alive() {
            return Err(Error::TransactionDestroyed);
        }

        // The scheduler is best-effort: a cancelled timer may still
        // deliver. Only the id armed in the slot may act.
        if let TsxEvent::Timer(kind, id) = &event {
            if !self.timer_slot(*kind).consume(*id) {
                log::trace!("Stale {:?} timer ignored ({:p})", kind, self.0);
                return Ok(());
            }
        }

        match (self.state(), self.0.role) {
            (State::Null, Role::UAC) => self.on_state_null_uac(event).await,
            (State::Null, Role::UAS) => self.on_state_null_uas(event).await,
            (State::Calling, _) => self.on_state_calling(event).await,
            (State::Trying, _) => self.on_state_trying(event).await,
            (State::Proceeding, Role::UAC) => self.on_state_proceeding_uac(event).await,
            (State::Proceeding, Role::UAS) => self.on_state_proceeding_uas(event).await,
            (State::Completed, Role::UAC) => self.on_state_completed_uac(event).await,
            (State::Completed, Role::UAS) => self.on_state_completed_uas(event).await,
            (State::Confirmed, _) => self.on_state_confirmed(event).await,
            (State::Terminated, _) => self.on_state_terminated(event).await,
            (State::Destroyed, _) => Err(Error::TransactionDestroyed),
        }
    }

    async fn on_state_terminated(&self, event: TsxEvent<'_>) -> Result<()> {
        match event {
            TsxEvent::Timer(TimerKind::Timeout, _) => {
                self.set_state(State::Destroyed, TsxEventKind::Timer, None);
                Ok(())
            }
            // Stragglers may still arrive; nothing is left to do with
            // them.
            TsxEvent::Timer(TimerKind::Retransmit, _) => Ok(()),
            TsxEvent::RxRequest(_) | TsxEvent::RxResponse(_) => Ok(()),
            _ => Err(Error::InvalidOperation("transaction already terminated")),
        }
    }

    /// Change state, notify the TU, and run the state's entry
    /// housekeeping.
    pub(super) fn set_state(&self, state: State, event: TsxEventKind, rx: Option<&IncomingResponse>) {
        let prev = {
            let mut guard = self.0.state.lock().expect("Lock failed");
            mem::replace(&mut *guard, state)
        };

        log::trace!("State changed [{prev:?} -> {state:?}] ({:p})", self.0);

        if let Some(tu) = &self.0.tu {
            if let Some(response) = rx {
                tu.on_rx_response(self, response);
            }
            tu.on_tsx_state(self, event, prev);
        }

        match state {
            State::Terminated => {
                if self.test_flag(PENDING_TRANSPORT) {
                    // A resolving send still references the transaction;
                    // its completion performs the destruction.
                    self.set_flag(PENDING_DESTROY);
                } else {
                    self.0.timeout_timer.cancel();
                    self.schedule_timer(TimerKind::Timeout, Duration::ZERO);
                }
            }
            State::Destroyed => self.destroy(),
            _ => (),
        }
    }

    fn destroy(&self) {
        if let Some(layer) = self.0.endpoint.transaction_layer() {
            layer.unregister(self);
        }

        self.0.alive.store(false, Ordering::SeqCst);
        self.0.retransmit_timer.cancel();
        self.0.timeout_timer.cancel();
        *self.0.transport.write().expect("Lock failed") = None;
        *self.0.last_tx.write().expect("Lock failed") = None;

        log::trace!("Transaction destroyed ({:p})", self.0);
    }

    pub(super) fn settings(&self) -> TsxSettings {
        self.0.endpoint.tsx_settings().clone()
    }

    pub(super) fn alive(&self) -> bool {
        self.0.alive.load(Ordering::SeqCst)
    }

    pub(super) fn timer_slot(&self, kind: TimerKind) -> &TimerSlot {
        match kind {
            TimerKind::Retransmit => &self.0.retransmit_timer,
            TimerKind::Timeout => &self.0.timeout_timer,
        }
    }

    /// Arm a timer slot and deliver its tick back into the state
    /// machine.
    pub(super) fn schedule_timer(&self, kind: TimerKind, delay: Duration) {
        let id = self.timer_slot(kind).arm();
        let tsx = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = tsx.dispatch(TsxEvent::Timer(kind, id)).await {
                log::trace!("{:?} timer dropped: {} ({:p})", kind, err, tsx.0);
            }
        });
    }

    #[inline]
    pub(super) fn set_status_code(&self, code: StatusCode) {
        let mut guard = self.0.status_code.write().expect("Lock failed");
        *guard = Some(code);
    }

    pub(super) fn set_last_tx(&self, buf: Bytes) {
        let mut guard = self.0.last_tx.write().expect("Lock failed");
        *guard = Some(buf);
    }

    pub(super) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.0.transport.read().expect("Lock failed").clone()
    }

    pub(super) fn clear_transport(&self) {
        *self.0.transport.write().expect("Lock failed") = None;
    }

    pub(super) fn remote_addr(&self) -> Option<SocketAddr> {
        *self.0.addr.lock().expect("Lock failed")
    }

    pub(super) fn dest(&self) -> Option<OutgoingAddr> {
        self.0.dest.lock().expect("Lock failed").clone()
    }

    /// Cache a transport binding after a successful send.
    pub(super) fn bind_transport(
        &self,
        transport: Arc<dyn Transport>,
        addr: SocketAddr,
        reliable: bool,
    ) {
        *self.0.transport.write().expect("Lock failed") = Some(transport);
        *self.0.addr.lock().expect("Lock failed") = Some(addr);
        self.0.reliable.store(reliable, Ordering::SeqCst);
    }

    pub(super) fn set_transport_err(&self, err: String) {
        *self.0.transport_err.lock().expect("Lock failed") = Some(err);
    }

    #[inline]
    pub(super) fn test_flag(&self, flag: u8) -> bool {
        self.0.flags.load(Ordering::SeqCst) & flag != 0
    }

    #[inline]
    pub(super) fn set_flag(&self, flag: u8) {
        self.0.flags.fetch_or(flag, Ordering::SeqCst);
    }

    #[inline]
    pub(super) fn clear_flag(&self, flag: u8) {
        self.0.flags.fetch_and(!flag, Ordering::SeqCst);
    }

    /// Clears the flag and reports whether it was set.
    #[inline]
    pub(super) fn take_flag(&self, flag: u8) -> bool {
        self.0.flags.fetch_and(!flag, Ordering::SeqCst) & flag != 0
    }
}
