use std::net::IpAddr;
use std::sync::OnceLock;

use util::DnsResolver;

use crate::Result;
use crate::message::Host;

/// Destination host resolver.
///
/// The DNS backend is created on first use so that endpoints that only
/// ever deal with literal addresses never touch the system resolver
/// configuration.
#[derive(Default)]
pub(crate) struct Resolver {
    dns: OnceLock<DnsResolver>,
}

impl Resolver {
    fn dns(&self) -> &DnsResolver {
        self.dns.get_or_init(DnsResolver::default)
    }

    /// Resolve a host to a single address.
    pub async fn resolve(&self, host: &Host) -> Result<IpAddr> {
        match host {
            Host::IpAddr(ip) => Ok(*ip),
            Host::DomainName(domain) => Ok(self.dns().resolve(domain).await?),
        }
    }

    /// Resolve a host to all its addresses.
    pub async fn resolve_all(&self, host: &Host) -> Result<Vec<IpAddr>> {
        match host {
            Host::IpAddr(ip) => Ok(vec![*ip]),
            Host::DomainName(domain) => Ok(self.dns().resolve_all(domain).await?),
        }
    }
}
