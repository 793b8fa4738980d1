//! SIP Endpoint Builder
//!

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use itertools::Itertools;

use crate::SipService;
use crate::endpoint::resolver::Resolver;
use crate::endpoint::{Endpoint, Inner};
use crate::transaction::{TransactionLayer, TsxSettings};
use crate::transport::udp::UdpStartup;
use crate::transport::{MessageDecoder, TransportLayer, TransportStartup};

/// Builder for creating a new SIP `Endpoint`.
pub struct Builder {
    name: String,
    resolver: Resolver,
    transport: TransportLayer,
    transaction: Option<TransactionLayer>,
    services: Vec<Box<dyn SipService>>,
    transport_start: Vec<Box<dyn TransportStartup>>,
    settings: TsxSettings,
    decoder: Option<Arc<dyn MessageDecoder>>,
}

impl Builder {
    /// Creates a new default instance of `Builder` to construct a `Endpoint`.
    pub fn new() -> Self {
        Builder {
            transport: TransportLayer::new(),
            name: String::new(),
            resolver: Resolver::default(),
            services: vec![],
            transaction: None,
            transport_start: vec![],
            settings: TsxSettings::default(),
            decoder: None,
        }
    }

    /// Sets the endpoint name.
    pub fn with_name<T: AsRef<str>>(mut self, s: T) -> Self {
        self.name = s.as_ref().to_string();

        self
    }

    /// Add a new builder for UDP transport on specified address.
    pub fn with_udp(mut self, addr: SocketAddr) -> Self {
        self.transport_start.push(Box::new(UdpStartup::new(addr)));
        self
    }

    /// Adds a service to the endpoint.
    ///
    /// This function can be called multiple times to add additional services.
    /// If a service with the same name already exists, the new service will not
    /// be added.
    pub fn with_service(mut self, service: impl SipService) -> Self {
        if self.service_exists(service.name()) {
            return self;
        }
        self.services.push(Box::new(service));

        self
    }

    /// Add a collection of services to the endpoint.
    ///
    /// Similar to [`Builder::with_service`], but allows adding multiple
    /// services at once. Unlike `with_service`, this method expects the
    /// services to be passed as trait objects (`Box<dyn SipService>`)
    /// instead of concrete types.
    pub fn with_services<I>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn SipService>>,
    {
        for service in services {
            if self.service_exists(service.name()) {
                continue;
            }
            self.services.push(service);
        }

        self
    }

    fn service_exists(&self, name: &str) -> bool {
        let exists = self.services.iter().any(|s| s.name() == name);
        if exists {
            log::warn!("Service with name '{}' already exists", name);
        }
        exists
    }

    /// Sets the transaction layer.
    pub fn with_transaction_layer(mut self, tsx_layer: TransactionLayer) -> Self {
        self.transaction = Some(tsx_layer);

        self
    }

    /// Sets the protocol timing configuration.
    pub fn with_tsx_settings(mut self, settings: TsxSettings) -> Self {
        self.settings = settings;

        self
    }

    /// Installs the decoder used to turn inbound packets into messages.
    pub fn with_decoder(mut self, decoder: Arc<dyn MessageDecoder>) -> Self {
        self.decoder = Some(decoder);

        self
    }

    /// Finalize the builder into a `Endpoint`.
    pub async fn build(self) -> Endpoint {
        log::trace!("Creating endpoint...");
        log::debug!(
            "Services registered {}",
            format_args!("({})", self.services.iter().map(|s| s.name()).join(", "))
        );

        Endpoint(Arc::new(Inner {
            transaction: self.transaction,
            transport: self.transport,
            name: self.name,
            resolver: self.resolver,
            services: self.services.into_boxed_slice(),
            settings: self.settings,
            decoder: self.decoder,
            transport_start: Mutex::new(self.transport_start),
        }))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
