//! DNS resolve with the `DnsResolver` type.

use std::io;
use std::net::IpAddr;

use hickory_resolver::lookup_ip::LookupIp;
use hickory_resolver::TokioResolver;

/// A DNS resolver backed by [hickory-dns](https://github.com/hickory-dns/hickory-dns).
pub struct DnsResolver {
    dns_resolver: TokioResolver,
}

impl DnsResolver {
    async fn lookup(&self, host: &str) -> Result<LookupIp, io::Error> {
        self.dns_resolver.lookup_ip(host).await.map_err(io::Error::other)
    }

    /// Resolve a single address.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr, io::Error> {
        self.lookup(host)
            .await?
            .iter()
            .next()
            .ok_or_else(|| io::Error::other(format!("No address found for {}", host)))
    }

    /// Resolve all addresses.
    pub async fn resolve_all(&self, host: &str) -> Result<Vec<IpAddr>, io::Error> {
        let result = self.lookup(host).await?;

        let addresses = result.iter().collect();

        Ok(addresses)
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self {
            dns_resolver: TokioResolver::builder_tokio()
                .expect("Failed to read DNS configuration")
                .build(),
        }
    }
}
