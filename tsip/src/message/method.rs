use std::fmt;
use std::str::FromStr;

use util::ArcStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// SIP request methods.
pub enum Method {
    /// Initiates a session.
    Invite,
    /// Confirms a final response to an INVITE.
    Ack,
    /// Terminates a session.
    Bye,
    /// Cancels a pending request.
    Cancel,
    /// Registers contact information.
    Register,
    /// Queries capabilities.
    Options,
    /// Mid-session information.
    Info,
    /// Transports an instant message.
    Message,
    /// Notifies about a subscribed event.
    Notify,
    /// Subscribes to an event.
    Subscribe,
    /// Modifies session state without impacting the dialog.
    Update,
    /// Asks the recipient to issue a request.
    Refer,
    /// Provisional response acknowledgement.
    Prack,
    /// Publishes an event state.
    Publish,
    /// Any other method.
    Other(ArcStr),
}

impl Method {
    /// Returns the canonical token for the method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Info => "INFO",
            Method::Message => "MESSAGE",
            Method::Notify => "NOTIFY",
            Method::Subscribe => "SUBSCRIBE",
            Method::Update => "UPDATE",
            Method::Refer => "REFER",
            Method::Prack => "PRACK",
            Method::Publish => "PUBLISH",
            Method::Other(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "INFO" => Method::Info,
            "MESSAGE" => Method::Message,
            "NOTIFY" => Method::Notify,
            "SUBSCRIBE" => Method::Subscribe,
            "UPDATE" => Method::Update,
            "REFER" => Method::Refer,
            "PRACK" => Method::Prack,
            "PUBLISH" => Method::Publish,
            other => Method::Other(other.into()),
        })
    }
}
