//! SIP Headers.
//!
//! Only the headers the transaction layer inspects get a dedicated
//! type; everything else travels through [`Header::Other`].

mod address;
mod call_id;
mod cseq;
mod via;

pub use address::{From, To};
pub use call_id::CallId;
pub use cseq::CSeq;
pub use via::Via;

use std::fmt;

use enum_as_inner::EnumAsInner;
use util::ArcStr;

#[derive(Debug, Clone, EnumAsInner)]
/// A single SIP header.
pub enum Header {
    /// The `Via` header.
    Via(Via),
    /// The `From` header.
    From(From),
    /// The `To` header.
    To(To),
    /// The `Call-ID` header.
    CallId(CallId),
    /// The `CSeq` header.
    CSeq(CSeq),
    /// The `Max-Forwards` header.
    MaxForwards(u32),
    /// The `Content-Length` header.
    ContentLength(u32),
    /// The `Record-Route` header, kept as raw text.
    RecordRoute(ArcStr),
    /// Any other header as a name/value pair.
    Other {
        /// The header name.
        name: ArcStr,
        /// The raw header value.
        value: ArcStr,
    },
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Header::Via(via) => write!(f, "{}: {}", Via::NAME, via),
            Header::From(from) => write!(f, "{}: {}", From::NAME, from),
            Header::To(to) => write!(f, "{}: {}", To::NAME, to),
            Header::CallId(call_id) => write!(f, "{}: {}", CallId::NAME, call_id),
            Header::CSeq(cseq) => write!(f, "{}: {}", CSeq::NAME, cseq),
            Header::MaxForwards(hops) => write!(f, "Max-Forwards: {}", hops),
            Header::ContentLength(len) => write!(f, "Content-Length: {}", len),
            Header::RecordRoute(route) => write!(f, "Record-Route: {}", route),
            Header::Other { name, value } => write!(f, "{}: {}", name, value),
        }
    }
}

#[derive(Debug, Clone, Default)]
/// The ordered list of headers of a message.
pub struct Headers(Vec<Header>);

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    /// Creates an empty header list with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Headers(Vec::with_capacity(capacity))
    }

    /// Appends a header.
    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// Inserts a header at the top of the list.
    pub fn insert_first(&mut self, header: Header) {
        self.0.insert(0, header);
    }

    /// Iterates over the headers.
    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.0.iter()
    }

    /// Iterates mutably over the headers.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Header> {
        self.0.iter_mut()
    }

    /// Returns the number of headers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the topmost `Via` header, if any.
    pub fn via(&self) -> Option<&Via> {
        self.0.iter().find_map(|header| header.as_via())
    }

    /// Returns the topmost `Via` header mutably, if any.
    pub fn via_mut(&mut self) -> Option<&mut Via> {
        self.0.iter_mut().find_map(|header| header.as_via_mut())
    }

    /// Returns the `From` header, if any.
    pub fn from(&self) -> Option<&From> {
        self.0.iter().find_map(|header| header.as_from())
    }

    /// Returns the `To` header, if any.
    pub fn to(&self) -> Option<&To> {
        self.0.iter().find_map(|header| header.as_to())
    }

    /// Returns the `Call-ID` header, if any.
    pub fn call_id(&self) -> Option<&CallId> {
        self.0.iter().find_map(|header| header.as_call_id())
    }

    /// Returns the `CSeq` header, if any.
    pub fn cseq(&self) -> Option<&CSeq> {
        self.0.iter().find_map(|header| header.as_c_seq())
    }
}

impl Extend<Header> for Headers {
    fn extend<T: IntoIterator<Item = Header>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<T: IntoIterator<Item = Header>>(iter: T) -> Self {
        Headers(iter.into_iter().collect())
    }
}
