use std::fmt;
use std::net::IpAddr;

use util::ArcStr;

use crate::message::{Host, HostPort, TransportProtocol};

#[derive(Debug, Clone, PartialEq, Eq)]
/// The `Via` header records the transport path taken by a request.
///
/// The branch parameter of the topmost `Via` identifies the
/// transaction the message belongs to.
pub struct Via {
    protocol: TransportProtocol,
    sent_by: HostPort,
    branch: Option<ArcStr>,
    received: Option<IpAddr>,
    rport: Option<u16>,
    maddr: Option<Host>,
}

impl Via {
    /// The header name.
    pub const NAME: &'static str = "Via";

    /// Creates a new `Via` header.
    pub fn new(protocol: TransportProtocol, sent_by: HostPort) -> Self {
        Via {
            protocol,
            sent_by,
            branch: None,
            received: None,
            rport: None,
            maddr: None,
        }
    }

    /// Sets the branch parameter, builder style.
    pub fn with_branch(mut self, branch: impl Into<ArcStr>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Returns the transport protocol.
    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Returns the sent-by host and port.
    pub fn sent_by(&self) -> &HostPort {
        &self.sent_by
    }

    /// Returns the branch parameter, if any.
    pub fn branch(&self) -> Option<&ArcStr> {
        self.branch.as_ref()
    }

    /// Sets the branch parameter.
    pub fn set_branch(&mut self, branch: impl Into<ArcStr>) {
        self.branch = Some(branch.into());
    }

    /// Returns the received parameter, if any.
    pub fn received(&self) -> Option<IpAddr> {
        self.received
    }

    /// Sets the received parameter.
    pub fn set_received(&mut self, addr: IpAddr) {
        self.received = Some(addr);
    }

    /// Returns the rport parameter, if any.
    pub fn rport(&self) -> Option<u16> {
        self.rport
    }

    /// Sets the rport parameter.
    pub fn set_rport(&mut self, port: u16) {
        self.rport = Some(port);
    }

    /// Returns the maddr parameter, if any.
    pub fn maddr(&self) -> Option<&Host> {
        self.maddr.as_ref()
    }

    /// Sets the maddr parameter.
    pub fn set_maddr(&mut self, maddr: Host) {
        self.maddr = Some(maddr);
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.protocol, self.sent_by)?;
        if let Some(branch) = &self.branch {
            write!(f, ";branch={}", branch)?;
        }
        if let Some(maddr) = &self.maddr {
            write!(f, ";maddr={}", maddr)?;
        }
        if let Some(received) = self.received {
            write!(f, ";received={}", received)?;
        }
        if let Some(rport) = self.rport {
            write!(f, ";rport={}", rport)?;
        }
        Ok(())
    }
}
