use serde::{Deserialize, Serialize};

/// Which kind of credentialed entity a node represents. The kind picks the
/// concrete node label, and identifiers are unique per kind, not globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    User,
    Compute,
}

impl IdentityKind {
    pub fn label(self) -> &'static str {
        match self {
            IdentityKind::User => "UserIdentity",
            IdentityKind::Compute => "ComputeIdentity",
        }
    }
}

/// A user or compute identity. `hashed_key` is hashed by the caller; this
/// store never sees plaintext credentials and never verifies them — it only
/// hands the material back to an external authenticator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialedEntity {
    pub identifier: String,
    pub hashed_key: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl CredentialedEntity {
    pub fn new(identifier: impl Into<String>, hashed_key: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            hashed_key: hashed_key.into(),
            scopes: Vec::new(),
        }
    }
}
