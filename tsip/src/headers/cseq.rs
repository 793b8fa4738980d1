use std::fmt;

use crate::message::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
/// The `CSeq` header orders requests within a dialog and names the
/// method a response belongs to.
pub struct CSeq {
    /// The sequence number.
    pub seq: u32,
    /// The request method.
    pub method: Method,
}

impl CSeq {
    /// The header name.
    pub const NAME: &'static str = "CSeq";

    /// Creates a new `CSeq` header.
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }

    /// Returns the method.
    pub fn method(&self) -> &Method {
        &self.method
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}
