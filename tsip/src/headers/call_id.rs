use std::fmt;

use util::ArcStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// The `Call-ID` header groups messages of the same call.
pub struct CallId(ArcStr);

impl CallId {
    /// The header name.
    pub const NAME: &'static str = "Call-ID";

    /// Creates a new `Call-ID` header.
    pub fn new(id: impl Into<ArcStr>) -> Self {
        CallId(id.into())
    }

    /// Generates a random `Call-ID`.
    pub fn generate() -> Self {
        CallId(uuid::Uuid::new_v4().simple().to_string().into())
    }

    /// Returns the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
