//! # tsip
//!
//! A rust library that implements the SIP transaction layer.
//!
//! The crate is organized around an [`Endpoint`] that owns the transport
//! layer, the registered services and the transaction layer. Incoming
//! messages are matched against active transactions first; unmatched
//! traffic is offered to the registered [`SipService`] implementations.

pub mod endpoint;
pub mod headers;
pub mod message;
pub mod service;
pub mod transaction;
pub mod transport;

pub mod error;

pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use service::SipService;
pub use util::ArcStr;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

use std::net::SocketAddr;

pub(crate) fn get_local_name(addr: &SocketAddr) -> String {
    let ip = local_ip_address::local_ip().unwrap_or(addr.ip());
    let local_name = format!("{}:{}", ip, addr.port());

    local_name
}
