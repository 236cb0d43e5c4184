//! Request and response payloads for each directory operation
//!
//! One pair per operation. These are the bodies carried under the tag of a
//! [`Request`](crate::Request) or [`Response`](crate::Response).

use crate::types::{Account, AccountRef, Cursor, Group, Operation, Traits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Liveness probe. Acknowledged with an empty response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {}

/// Ask the provider for its static information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureRequest {}

/// Static information about the integration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureResponse {
    /// Capability flags
    pub traits: Traits,

    /// Stable identifier of the directory instance, if it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immutable_id: Option<String>,
}

/// Look up accounts matching a reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAccountRequest {
    /// The lookup key
    #[serde(rename = "ref")]
    pub account_ref: AccountRef,
}

/// Every account matching the reference, with groups populated
///
/// More than one entry means the reference is ambiguous in the source
/// directory; callers must not silently pick one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAccountResponse {
    /// Matching accounts
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// Fetch one page of accounts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAccountsRequest {
    /// Only accounts modified at or after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<DateTime<Utc>>,

    /// Continuation token from the previous page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// One page of accounts (groups unset)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAccountsResponse {
    /// The page
    #[serde(default)]
    pub accounts: Vec<Account>,

    /// Present unless this is the last page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

/// Fetch one page of groups
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListGroupsRequest {
    /// Case-insensitive name prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,

    /// Continuation token from the previous page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,

    /// Upper bound on the page size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,
}

/// One page of groups
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListGroupsResponse {
    /// The page
    #[serde(default)]
    pub groups: Vec<Group>,

    /// Present unless this is the last page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

/// Run a recovery operation against one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformOperationRequest {
    /// What to do
    pub operation: Operation,

    /// Target account
    pub account_immutable_id: String,

    /// Check preconditions only; mutate nothing
    #[serde(
        default,
        deserialize_with = "null_as_false",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub dry_run: bool,
}

impl PerformOperationRequest {
    /// Build a mutating request
    pub fn new(operation: Operation, account_immutable_id: impl Into<String>) -> Self {
        Self {
            operation,
            account_immutable_id: account_immutable_id.into(),
            dry_run: false,
        }
    }

    /// Mark the request as a dry run
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Result of a recovery operation
///
/// Dry runs and operations without output return every field unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformOperationResponse {
    /// Self-service reset link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_link: Option<String>,

    /// Newly set temporary password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,

    /// One-time MFA bypass code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_bypass_code: Option<String>,
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}
