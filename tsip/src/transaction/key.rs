//! Transaction key construction and matching.

use std::fmt;
use std::hash::{Hash, Hasher};

use util::ArcStr;

use crate::message::Method;
use crate::transport::IncomingRequest;

use super::Role;

/// The branch prefix that marks a transaction id generated by an
/// RFC 3261 compliant agent.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Upper bound for generated branch parameters.
pub const MAX_BRANCH_LEN: usize = 71;

const SEPARATOR: char = '$';

/// The registry key of a transaction.
///
/// Messages carrying a magic-cookie branch map to
/// `role '$' [method '$'] branch`; legacy messages map to
/// `role '$' [method '$'] cseq '$' from-tag '$' call-id '$' host ':' port '$'`
/// built from the header tuple that survives retransmission. The
/// method component is omitted for INVITE and ACK so that an ACK lands
/// on the transaction of the INVITE it acknowledges.
///
/// A 32-bit hash of the text is computed once at construction; the
/// `Hash` impl emits the cached value, so registry operations never
/// rehash the key text.
#[derive(Debug, Clone, Eq)]
pub struct TsxKey {
    text: ArcStr,
    hashed: u32,
}

impl TsxKey {
    fn from_text(text: String) -> Self {
        let hashed = fnv1a(text.as_bytes());

        TsxKey {
            text: text.into(),
            hashed,
        }
    }

    fn push_role(text: &mut String, role: Role) {
        text.push(match role {
            Role::UAC => 'c',
            Role::UAS => 's',
        });
        text.push(SEPARATOR);
    }

    fn push_method(text: &mut String, method: &Method) {
        // INVITE, its ACK and its CANCEL must meet in the registry, so
        // the method is left out for INVITE and ACK. CANCEL keeps the
        // prefix and gets a sibling key of its own.
        if !matches!(method, Method::Invite | Method::Ack) {
            text.push_str(method.as_str());
            text.push(SEPARATOR);
        }
    }

    /// Key for a client transaction, from its method and branch.
    ///
    /// Client keys always use the branch shape: a branch is generated
    /// for outgoing requests that lack one.
    pub fn client(method: &Method, branch: &str) -> Self {
        let mut text = String::with_capacity(branch.len() + 16);

        Self::push_role(&mut text, Role::UAC);
        Self::push_method(&mut text, method);
        text.push_str(branch);

        Self::from_text(text)
    }

    /// Key for a server transaction, from the incoming request.
    ///
    /// The `CSeq` method is used rather than the request-line method so
    /// that an ACK builds the same key as the INVITE it acknowledges.
    pub fn server(request: &IncomingRequest) -> Self {
        let via = request.via();
        let method = request.cseq().method();

        match via.branch() {
            Some(branch) if branch.starts_with(BRANCH_MAGIC_COOKIE) => {
                let mut text = String::with_capacity(branch.len() + 16);

                Self::push_role(&mut text, Role::UAS);
                Self::push_method(&mut text, method);
                text.push_str(branch);

                Self::from_text(text)
            }
            _ => {
                let from_tag = request.from().tag().map(|tag| tag.as_ref()).unwrap_or("");
                let call_id = request.call_id().as_str();
                let sent_by = via.sent_by();
                let port = sent_by.port.unwrap_or(via.protocol().default_port());

                let mut text = String::with_capacity(call_id.len() + from_tag.len() + 48);

                Self::push_role(&mut text, Role::UAS);
                Self::push_method(&mut text, method);
                text.push_str(&request.cseq().seq.to_string());
                text.push(SEPARATOR);
                text.push_str(from_tag);
                text.push(SEPARATOR);
                text.push_str(call_id);
                text.push(SEPARATOR);
                text.push_str(&sent_by.host.to_string());
                text.push(':');
                text.push_str(&port.to_string());
                text.push(SEPARATOR);

                Self::from_text(text)
            }
        }
    }

    /// The textual form of the key.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The precomputed 32-bit hash of the key text.
    pub fn hashed(&self) -> u32 {
        self.hashed
    }
}

impl PartialEq for TsxKey {
    fn eq(&self, other: &Self) -> bool {
        self.hashed == other.hashed && self.text == other.text
    }
}

impl Hash for TsxKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hashed);
    }
}

impl fmt::Display for TsxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;

    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }

    hash
}

/// Generates a fresh branch parameter carrying the magic cookie.
pub(crate) fn generate_branch() -> String {
    use rand::Rng;
    use rand::distr::Alphanumeric;

    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();

    let branch = format!("{}{}", BRANCH_MAGIC_COOKIE, suffix);
    debug_assert!(branch.len() <= MAX_BRANCH_LEN);

    branch
}
