//! Subject identity attached to sessions and authenticated requests.

use uuid::Uuid;

/// Wire/storage spelling of the admin sentinel subject.
pub const ADMIN_SENTINEL: &str = "admin";

/// A logical login identity: the fixed admin sentinel or a storefront user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectId {
    Admin,
    User(Uuid),
}

impl SubjectId {
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Storage/display form: `"admin"` or the user UUID.
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::Admin => ADMIN_SENTINEL.to_string(),
            Self::User(id) => id.to_string(),
        }
    }

    /// Parse the storage form back into a subject.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if value == ADMIN_SENTINEL {
            return Some(Self::Admin);
        }
        Uuid::parse_str(value).ok().map(Self::User)
    }
}

/// Authenticated caller context, produced once per request by the auth gate.
///
/// Derived, never persisted. Handlers receive it by value and must not feed
/// mutations back into session state; all session writes go through the store.
#[derive(Clone, Debug)]
pub struct AuthenticatedSubject {
    pub id: SubjectId,
    pub is_admin: bool,
    pub session_token: String,
}
