use std::fmt;

use util::ArcStr;

#[derive(Debug, Clone, PartialEq, Eq)]
/// The `From` header names the initiator of a request.
pub struct From {
    uri: ArcStr,
    tag: Option<ArcStr>,
}

impl From {
    /// The header name.
    pub const NAME: &'static str = "From";

    /// Creates a new `From` header.
    pub fn new(uri: impl Into<ArcStr>) -> Self {
        Self {
            uri: uri.into(),
            tag: None,
        }
    }

    /// Sets the tag parameter, builder style.
    pub fn with_tag(mut self, tag: impl Into<ArcStr>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Returns the address text.
    pub fn uri(&self) -> &ArcStr {
        &self.uri
    }

    /// Returns the tag parameter, if any.
    pub fn tag(&self) -> Option<&ArcStr> {
        self.tag.as_ref()
    }
}

impl fmt::Display for From {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The `To` header names the logical recipient of a request.
pub struct To {
    uri: ArcStr,
    tag: Option<ArcStr>,
}

impl To {
    /// The header name.
    pub const NAME: &'static str = "To";

    /// Creates a new `To` header.
    pub fn new(uri: impl Into<ArcStr>) -> Self {
        Self {
            uri: uri.into(),
            tag: None,
        }
    }

    /// Sets the tag parameter, builder style.
    pub fn with_tag(mut self, tag: impl Into<ArcStr>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Returns the address text.
    pub fn uri(&self) -> &ArcStr {
        &self.uri
    }

    /// Returns the tag parameter, if any.
    pub fn tag(&self) -> Option<&ArcStr> {
        self.tag.as_ref()
    }

    /// Sets the tag parameter.
    pub fn set_tag(&mut self, tag: Option<ArcStr>) {
        self.tag = tag;
    }
}

impl fmt::Display for To {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}
