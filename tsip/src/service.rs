//! Service module.

use crate::{
    Endpoint, Result,
    transport::{IncomingRequest, IncomingResponse},
};

/// A trait which provides a way to extend the SIP endpoint
/// functionalities.
///
/// Services see inbound traffic that was not absorbed by the
/// transaction layer, in registration order. A service consumes a
/// message by taking it out of the `Option`.
#[async_trait::async_trait]
#[allow(unused_variables)]
pub trait SipService: Sync + Send + 'static {
    /// Returns the service name.
    fn name(&self) -> &str;

    /// Called when an inbound SIP request is received.
    async fn on_incoming_request(
        &self,
        endpoint: &Endpoint,
        request: &mut Option<IncomingRequest>,
    ) -> Result<()> {
        Ok(())
    }

    /// Called when an inbound SIP response is received.
    async fn on_incoming_response(
        &self,
        endpoint: &Endpoint,
        response: &mut Option<IncomingResponse>,
    ) -> Result<()> {
        Ok(())
    }
}
