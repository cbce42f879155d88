//! Requester identity and credential verification.
//!
//! A credential token is resolved exactly once at the boundary (HTTP
//! header or socket event) into a [`Requester`], which is then threaded
//! through every operation. Handlers never re-derive "is this an admin"
//! from client-supplied input.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Sender sentinel recorded on admin-authored messages. Operators act as
/// an undifferentiated pool on behalf of "admin".
pub const ADMIN_SENDER: &str = "admin";

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    /// A storefront customer, identified by their customer id.
    Customer(String),
    /// Any operator from the admin pool.
    Admin,
}

impl Requester {
    pub fn is_admin(&self) -> bool {
        matches!(self, Requester::Admin)
    }

    /// The customer id for customer requesters, `None` for admins.
    pub fn customer_id(&self) -> Option<&str> {
        match self {
            Requester::Customer(id) => Some(id),
            Requester::Admin => None,
        }
    }

    /// The sender identity recorded on messages this requester authors.
    pub fn sender_identity(&self) -> &str {
        match self {
            Requester::Customer(id) => id,
            Requester::Admin => ADMIN_SENDER,
        }
    }
}

/// Credential verification boundary. Implementations must be synchronous
/// and side-effect-free.
pub trait TokenVerifier: Send + Sync {
    /// Resolve an opaque credential token to a verified identity.
    fn verify(&self, token: &str) -> Option<Requester>;
}

/// Token table sourced from `config.toml`.
///
/// Tokens are matched by SHA-256 digest so config files can hold hashes
/// instead of plaintext. Plaintext entries are accepted and hashed on
/// load for backward compatibility.
pub struct StaticTokenVerifier {
    admin_digests: HashSet<String>,
    customer_digests: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(
        admin_tokens: &[String],
        customer_tokens: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let admin_digests = admin_tokens.iter().map(|t| normalize_token(t)).collect();
        let customer_digests = customer_tokens
            .into_iter()
            .map(|(token, customer_id)| (normalize_token(&token), customer_id))
            .collect();
        Self {
            admin_digests,
            customer_digests,
        }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<Requester> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let digest = hash_token(token);
        if self.admin_digests.contains(&digest) {
            return Some(Requester::Admin);
        }
        self.customer_digests
            .get(&digest)
            .map(|customer_id| Requester::Customer(customer_id.clone()))
    }
}

/// SHA-256 digest of a token, hex-encoded.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

/// True if the value already looks like a SHA-256 hex digest.
fn is_token_digest(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn normalize_token(value: &str) -> String {
    let value = value.trim();
    if is_token_digest(value) {
        value.to_ascii_lowercase()
    } else {
        hash_token(value)
    }
}
