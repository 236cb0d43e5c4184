//! Common type definitions used across the protocol
//!
//! Accounts, groups, lookup references, pagination cursors, capability
//! traits, recovery operations, and the coded error carried by responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable cause of a failed operation
///
/// Callers branch on the code. The accompanying message is diagnostic text
/// only and must not be pattern-matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Bad credentials or parameters for the backend. Not retried.
    ConfigurationError,
    /// The backend rejected the provider's own credentials.
    ServiceAuthenticationFailed,
    /// The provider's credentials lack the rights for the operation.
    PermissionDenied,
    /// The referenced account does not exist.
    AccountNotFound,
    /// A precondition of the requested operation is not met.
    UnsupportedAccountState,
    /// Catch-all for unclassified failures and protocol violations.
    InternalError,
}

impl ErrorCode {
    /// Wire spelling of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigurationError => "configuration_error",
            Self::ServiceAuthenticationFailed => "service_authentication_failed",
            Self::PermissionDenied => "permission_denied",
            Self::AccountNotFound => "account_not_found",
            Self::UnsupportedAccountState => "unsupported_account_state",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error with a fixed cause and free-text detail
///
/// Implements [`std::error::Error`] so providers can return it (possibly
/// wrapped in context) and have the code survive to the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodedError {
    /// The cause
    pub code: ErrorCode,

    /// Diagnostic detail
    pub message: String,
}

impl CodedError {
    /// Create a coded error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for an `InternalError`
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

/// Opaque pagination continuation token
///
/// A cursor returned by one call is only meaningful as input to the next call
/// of the same operation. A response without a cursor is the last page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a provider-defined token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lookup key for an account. At least one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    /// The directory's own stable identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immutable_id: Option<String>,

    /// Any external identifier (email, username, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl AccountRef {
    /// Reference an account by its immutable id
    pub fn by_immutable_id(immutable_id: impl Into<String>) -> Self {
        Self {
            immutable_id: Some(immutable_id.into()),
            id: None,
        }
    }

    /// Reference an account by one of its external ids
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            immutable_id: None,
            id: Some(id.into()),
        }
    }

    /// True when neither key is set
    pub fn is_empty(&self) -> bool {
        self.immutable_id.is_none() && self.id.is_none()
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.immutable_id.as_deref().unwrap_or(""),
            self.id.as_deref().unwrap_or("")
        )
    }
}

/// A directory group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Stable identifier
    pub immutable_id: String,

    /// Display name
    pub name: String,

    /// Backend-specific kind, e.g. `group`
    pub kind: String,
}

impl Group {
    /// Create a group of kind `group`
    pub fn new(immutable_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            immutable_id: immutable_id.into(),
            name: name.into(),
            kind: "group".to_string(),
        }
    }
}

/// A directory account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identifier assigned by the directory
    pub immutable_id: String,

    /// External identifiers in first-seen order, without duplicates
    #[serde(default)]
    pub ids: Vec<String>,

    /// Display name
    pub name: String,

    /// Group memberships; unset in list results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<Group>>,

    /// Last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Birth date as reported by the directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
}

impl Account {
    /// Create an account with no external ids
    pub fn new(immutable_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            immutable_id: immutable_id.into(),
            ids: Vec::new(),
            name: name.into(),
            groups: None,
            updated_at: None,
            birth_date: None,
        }
    }

    /// Append an external id unless already present
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.push_id(id);
        self
    }

    /// Set the last modification time
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Append an external id unless already present
    pub fn push_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    /// Whether `id` is one of this account's external ids
    pub fn has_id(&self, id: &str) -> bool {
        self.ids.iter().any(|candidate| candidate == id)
    }
}

/// Static capabilities a provider advertises during configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traits {
    /// Human-readable directory name
    pub name: String,

    /// Supports [`Operation::GetPasswordLink`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_get_password_link: Option<bool>,

    /// Supports [`Operation::GetTemporaryPassword`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_get_temporary_password: Option<bool>,

    /// Supports [`Operation::GetMfaBypassCode`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_get_mfa_bypass_code: Option<bool>,

    /// Supports [`Operation::RemoveAllMfa`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_remove_all_mfa: Option<bool>,

    /// Supports [`Operation::Unlock`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_unlock: Option<bool>,

    /// Supports incremental account listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_update_accounts_list: Option<bool>,
}

impl Traits {
    /// Whether the traits advertise support for `operation`
    pub fn supports(&self, operation: Operation) -> bool {
        let flag = match operation {
            Operation::GetPasswordLink => self.can_get_password_link,
            Operation::GetTemporaryPassword => self.can_get_temporary_password,
            Operation::GetMfaBypassCode => self.can_get_mfa_bypass_code,
            Operation::RemoveAllMfa => self.can_remove_all_mfa,
            Operation::Unlock => self.can_unlock,
        };
        flag.unwrap_or(false)
    }
}

/// Account recovery actions a provider may perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Produce a self-service password reset link
    GetPasswordLink,
    /// Set and return a temporary password
    GetTemporaryPassword,
    /// Produce a one-time MFA bypass code
    GetMfaBypassCode,
    /// Remove every enrolled MFA factor
    RemoveAllMfa,
    /// Unlock a locked-out account
    Unlock,
}

impl Operation {
    /// Wire spelling of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetPasswordLink => "get_password_link",
            Self::GetTemporaryPassword => "get_temporary_password",
            Self::GetMfaBypassCode => "get_mfa_bypass_code",
            Self::RemoveAllMfa => "remove_all_mfa",
            Self::Unlock => "unlock",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
