#![deny(missing_docs)]
//! SIP Transaction Layer.
//!
//! A transaction is a request plus all responses to it, up to and
//! including the final one, tracked by one of four state machines
//! (client or server, INVITE or non-INVITE). The [`TransactionLayer`]
//! matches inbound traffic to active transactions by the branch
//! parameter of the topmost `Via` header, falling back to the legacy
//! header-tuple match for peers that predate the branch cookie.

pub mod key;

mod send;
mod timer;
mod tsx;
mod uac;
mod uas;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(test)]
mod tests;

pub use key::TsxKey;
pub use timer::TimerKind;
pub use tsx::Transaction;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::StatusCode;
use crate::transport::{IncomingRequest, IncomingResponse};

/// The possible roles of a SIP Transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// (User Agent Client): The entity that initiates the
    /// request.
    UAC,
    /// (User Agent Server): The entity that responds to the
    /// request.
    UAS,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
/// Defines the possible states of a SIP Transaction.
pub enum State {
    #[default]
    /// Freshly created, no event dispatched yet.
    Null,
    /// Client request sent, no response received.
    Calling,
    /// Server request received, no response sent.
    Trying,
    /// A provisional response was sent or received.
    Proceeding,
    /// A final response was sent or received.
    Completed,
    /// The ACK was received (INVITE server transactions only).
    Confirmed,
    /// The transaction has finished its work and waits to be
    /// reclaimed.
    Terminated,
    /// Resources are released and the key is gone from the registry.
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What triggered a transaction state change.
pub enum TsxEventKind {
    /// An inbound message.
    RxMsg,
    /// An outbound message.
    TxMsg,
    /// A timer tick.
    Timer,
    /// A user-requested termination.
    User,
    /// A permanent transport failure.
    TransportError,
    /// Internal bookkeeping.
    Unknown,
}

/// Callbacks delivered to the Transaction User (TU).
///
/// Callbacks run synchronously while the transaction's event lock is
/// held; implementations must not re-enter transaction operations
/// from inside a callback.
#[allow(unused_variables)]
pub trait TransactionUser: Sync + Send + 'static {
    /// Called on every transaction state change.
    fn on_tsx_state(&self, tsx: &Transaction, event: TsxEventKind, prev_state: State) {}

    /// Called when a response arrives on a client transaction, before
    /// the matching state-change notification.
    fn on_rx_response(&self, tsx: &Transaction, response: &IncomingResponse) {}
}

#[derive(Debug, Clone)]
/// Protocol timing and sizing configuration.
pub struct TsxSettings {
    /// Estimated round-trip time (RTT) for message exchanges.
    ///
    /// This value is used as the baseline when computing retransmission
    /// intervals.
    pub t1: Duration,
    /// Maximum retransmission interval for non-INVITE requests and
    /// INVITE responses.
    ///
    /// Retransmissions back off exponentially, but will not exceed this
    /// value.
    pub t2: Duration,
    /// Maximum duration that a message may remain in the network before
    /// being discarded.
    pub t4: Duration,
    /// Wait time for response retransmissions after a completed INVITE
    /// client transaction.
    pub td: Duration,
    /// Overall transaction timeout.
    pub timeout: Duration,
    /// Capacity hint for the transaction registry.
    pub max_tsx_count: usize,
}

impl Default for TsxSettings {
    fn default() -> Self {
        let t1 = Duration::from_millis(500);

        TsxSettings {
            t1,
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            td: Duration::from_secs(32),
            timeout: 64 * t1,
            max_tsx_count: 1024,
        }
    }
}

/// Represents the transaction layer of the SIP protocol.
///
/// This type holds all server and client transactions created
/// by the TU (Transaction User) and matches inbound messages to
/// them.
#[derive(Default)]
pub struct TransactionLayer {
    transactions: Mutex<HashMap<TsxKey, Transaction>>,
}

impl TransactionLayer {
    /// Creates a layer sized for the given number of concurrent
    /// transactions.
    pub fn with_capacity(max_tsx_count: usize) -> Self {
        TransactionLayer {
            transactions: Mutex::new(HashMap::with_capacity(max_tsx_count)),
        }
    }

    /// Registers a transaction under its key.
    ///
    /// Fails when another live transaction already owns the key.
    pub(crate) fn register(&self, tsx: &Transaction) -> Result<()> {
        let mut map = self.transactions.lock().expect("Lock failed");

        if map.contains_key(tsx.key()) {
            return Err(Error::KeyExists);
        }

        log::trace!("Transaction registered with key={}", tsx.key());
        map.insert(tsx.key().clone(), tsx.clone());

        Ok(())
    }

    /// Removes a transaction from the registry.
    pub(crate) fn unregister(&self, tsx: &Transaction) -> Option<Transaction> {
        let mut map = self.transactions.lock().expect("Lock failed");

        log::trace!("Transaction unregistered with key={}", tsx.key());
        map.remove(tsx.key())
    }

    /// Finds a transaction by its key.
    ///
    /// The returned handle may already have lost a race against
    /// destruction; operations on it fail with
    /// [`Error::TransactionDestroyed`] in that case.
    pub fn find(&self, key: &TsxKey) -> Option<Transaction> {
        self.transactions.lock().expect("Lock failed").get(key).cloned()
    }

    /// Number of registered transactions.
    pub fn len(&self) -> usize {
        self.transactions.lock().expect("Lock failed").len()
    }

    /// Returns `true` when no transaction is registered.
    pub fn is_empty(&self) -> bool {
        self.transactions.lock().expect("Lock failed").is_empty()
    }

    /// Verifies the layer can be torn down.
    ///
    /// Refuses while transactions are still registered; an in-flight
    /// transmission completing against a torn-down layer would have
    /// nowhere to report to.
    pub fn unload(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(Error::Busy);
        }

        Ok(())
    }

    /// Terminates every registered transaction.
    pub async fn shutdown(&self) {
        let transactions: Vec<Transaction> = {
            let map = self.transactions.lock().expect("Lock failed");
            map.values().cloned().collect()
        };

        for tsx in transactions {
            if let Err(err) = tsx.terminate(StatusCode::REQUEST_TERMINATED).await {
                log::debug!("Failed to terminate {}: {}", tsx.key(), err);
            }
        }
    }

    /// Matches an inbound response to a client transaction.
    ///
    /// Returns `true` when the response was absorbed by a transaction.
    pub(crate) async fn handle_response(&self, response: &IncomingResponse) -> Result<bool> {
        let Some(branch) = response.via().branch() else {
            return Ok(false);
        };

        let key = TsxKey::client(response.cseq().method(), branch);
        let tsx = {
            match self.find(&key) {
                Some(tsx) if tsx.state() < State::Terminated => tsx,
                _ => return Ok(false),
            }
        };

        match tsx.recv_response(response).await {
            Ok(()) => Ok(true),
            // Lost the race against destruction; let services see the
            // message instead.
            Err(Error::TransactionDestroyed) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Matches an inbound request to a server transaction.
    ///
    /// Returns `true` when the request was absorbed by a transaction.
    pub(crate) async fn handle_request(&self, request: &IncomingRequest) -> Result<bool> {
        let key = TsxKey::server(request);
        let tsx = {
            match self.find(&key) {
                Some(tsx) if tsx.state() < State::Terminated => tsx,
                _ => return Ok(false),
            }
        };

        match tsx.recv_request(request).await {
            Ok(()) => Ok(true),
            Err(Error::TransactionDestroyed) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
