//! In-memory directory
//!
//! A complete [`Provider`] over accounts and groups loaded from a JSON
//! fixture. It backs the `diragent memory` worker and the test suites.
//!
//! ```json
//! {
//!   "name": "Example Corp",
//!   "immutable_id": "dir-1",
//!   "page_size": 2,
//!   "groups": [{"immutable_id": "g1", "name": "Admins"}],
//!   "accounts": [
//!     {"immutable_id": "u1", "ids": ["alice@example.com"], "name": "Alice",
//!      "groups": ["g1"], "locked": true, "mfa_enrolled": true}
//!   ]
//! }
//! ```

use crate::error::ConfigError;
use crate::provider::Provider;
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use diragent_protocol::{
    Account, AccountRef, CodedError, ConfigureRequest, ConfigureResponse, Cursor, ErrorCode,
    GetAccountRequest, GetAccountResponse, Group, ListAccountsRequest, ListAccountsResponse,
    ListGroupsRequest, ListGroupsResponse, Operation, PerformOperationRequest,
    PerformOperationResponse, Traits,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_PAGE_SIZE: usize = 100;
const ACCOUNTS_CURSOR: &str = "accounts";
const GROUPS_CURSOR: &str = "groups";

/// Directory contents as read from a fixture file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    /// Directory display name
    pub name: String,

    /// Stable identifier of the directory instance
    #[serde(default)]
    pub immutable_id: Option<String>,

    /// Capability flags; every operation is supported when omitted
    #[serde(default)]
    pub traits: Option<Traits>,

    /// Items per page for listing operations
    #[serde(default)]
    pub page_size: Option<usize>,

    /// Accounts
    #[serde(default)]
    pub accounts: Vec<FixtureAccount>,

    /// Groups
    #[serde(default)]
    pub groups: Vec<FixtureGroup>,
}

/// One account of a [`Fixture`]
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureAccount {
    /// Stable identifier
    pub immutable_id: String,

    /// External identifiers
    #[serde(default)]
    pub ids: Vec<String>,

    /// Display name
    pub name: String,

    /// Immutable ids of the groups the account belongs to
    #[serde(default)]
    pub groups: Vec<String>,

    /// Last modification time
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// Birth date
    #[serde(default)]
    pub birth_date: Option<String>,

    /// Locked out
    #[serde(default)]
    pub locked: bool,

    /// Has at least one MFA factor
    #[serde(default)]
    pub mfa_enrolled: bool,
}

/// One group of a [`Fixture`]
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureGroup {
    /// Stable identifier
    pub immutable_id: String,

    /// Display name
    pub name: String,

    /// Backend-specific kind
    #[serde(default = "default_group_kind")]
    pub kind: String,
}

fn default_group_kind() -> String {
    "group".to_string()
}

impl Fixture {
    /// Read a JSON fixture file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content)
            .map_err(|err| ConfigError::invalid("fixture", format!("{}: {err}", path.display())))
    }
}

#[derive(Debug)]
struct State {
    accounts: Vec<FixtureAccount>,
    mutations: HashMap<Operation, usize>,
    issued: usize,
}

/// In-memory [`Provider`]
///
/// Accounts are ordered by immutable id and groups by case-folded name, then
/// id. Cursors are opaque and tied to the operation that issued them.
#[derive(Debug)]
pub struct MemoryDirectory {
    name: String,
    immutable_id: Option<String>,
    traits: Traits,
    page_size: usize,
    groups: Vec<Group>,
    state: Mutex<State>,
}

impl MemoryDirectory {
    /// Build a directory from fixture contents
    pub fn new(fixture: Fixture) -> Self {
        let traits = fixture.traits.unwrap_or_else(|| Traits {
            name: fixture.name.clone(),
            can_get_password_link: Some(true),
            can_get_temporary_password: Some(true),
            can_get_mfa_bypass_code: Some(true),
            can_remove_all_mfa: Some(true),
            can_unlock: Some(true),
            can_update_accounts_list: Some(true),
        });

        let mut accounts = fixture.accounts;
        accounts.sort_by(|a, b| a.immutable_id.cmp(&b.immutable_id));

        let mut groups: Vec<Group> = fixture
            .groups
            .into_iter()
            .map(|g| Group {
                immutable_id: g.immutable_id,
                name: g.name,
                kind: g.kind,
            })
            .collect();
        groups.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.immutable_id.cmp(&b.immutable_id))
        });

        Self {
            name: fixture.name,
            immutable_id: fixture.immutable_id,
            traits,
            page_size: fixture.page_size.filter(|n| *n > 0).unwrap_or(DEFAULT_PAGE_SIZE),
            groups,
            state: Mutex::new(State {
                accounts,
                mutations: HashMap::new(),
                issued: 0,
            }),
        }
    }

    /// Load a directory from a JSON fixture file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let directory = Self::new(Fixture::load(path)?);
        info!(
            directory = %directory.name,
            groups = directory.groups.len(),
            path = %path.display(),
            "loaded fixture"
        );
        Ok(directory)
    }

    /// How many times `operation` actually changed or issued something
    pub async fn mutations(&self, operation: Operation) -> usize {
        let state = self.state.lock().await;
        state.mutations.get(&operation).copied().unwrap_or(0)
    }

    /// Total mutations across every operation
    pub async fn total_mutations(&self) -> usize {
        self.state.lock().await.mutations.values().sum()
    }

    fn group_page_size(&self, max_count: Option<u32>) -> usize {
        match max_count {
            Some(n) if n > 0 => self.page_size.min(n as usize),
            _ => self.page_size,
        }
    }

    fn resolve_groups(&self, ids: &[String]) -> Vec<Group> {
        self.groups
            .iter()
            .filter(|g| ids.contains(&g.immutable_id))
            .cloned()
            .collect()
    }
}

fn to_account(fixture: &FixtureAccount) -> Account {
    let mut account = Account::new(&fixture.immutable_id, &fixture.name);
    for id in &fixture.ids {
        account.push_id(id);
    }
    account.updated_at = fixture.updated_at;
    account.birth_date = fixture.birth_date.clone();
    account
}

fn ref_matches(account_ref: &AccountRef, account: &FixtureAccount) -> bool {
    let by_immutable = account_ref
        .immutable_id
        .as_ref()
        .is_none_or(|id| *id == account.immutable_id);
    let by_id = account_ref
        .id
        .as_ref()
        .is_none_or(|id| account.ids.contains(id));
    by_immutable && by_id
}

fn encode_cursor(kind: &str, position: &str) -> Cursor {
    Cursor::new(URL_SAFE_NO_PAD.encode(format!("{kind}:{position}")))
}

fn decode_cursor(kind: &str, cursor: &Cursor) -> anyhow::Result<String> {
    let raw = URL_SAFE_NO_PAD
        .decode(cursor.as_str())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| anyhow!("malformed cursor {:?}", cursor.as_str()))?;
    match raw.split_once(':') {
        Some((issuer, position)) if issuer == kind => Ok(position.to_string()),
        _ => bail!("cursor {:?} was not issued by list_{kind}", cursor.as_str()),
    }
}

fn unsupported(message: &str) -> anyhow::Error {
    CodedError::new(ErrorCode::UnsupportedAccountState, message).into()
}

#[async_trait]
impl Provider for MemoryDirectory {
    async fn configure(&self, _request: ConfigureRequest) -> anyhow::Result<ConfigureResponse> {
        let state = self.state.lock().await;

        let mut seen = HashSet::new();
        for account in &state.accounts {
            if !seen.insert(account.immutable_id.as_str()) {
                return Err(CodedError::new(
                    ErrorCode::ConfigurationError,
                    format!("duplicate account immutable_id {:?}", account.immutable_id),
                )
                .into());
            }
            if let Some(missing) = account
                .groups
                .iter()
                .find(|id| !self.groups.iter().any(|g| &g.immutable_id == *id))
            {
                return Err(CodedError::new(
                    ErrorCode::ConfigurationError,
                    format!(
                        "account {:?} is a member of unknown group {:?}",
                        account.immutable_id, missing
                    ),
                )
                .into());
            }
        }

        Ok(ConfigureResponse {
            traits: self.traits.clone(),
            immutable_id: self.immutable_id.clone(),
        })
    }

    async fn list_accounts(
        &self,
        request: ListAccountsRequest,
    ) -> anyhow::Result<ListAccountsResponse> {
        let after = request
            .cursor
            .as_ref()
            .map(|c| decode_cursor(ACCOUNTS_CURSOR, c))
            .transpose()?;

        let state = self.state.lock().await;
        let mut remaining = state
            .accounts
            .iter()
            .filter(|a| after.as_ref().is_none_or(|last| a.immutable_id > *last))
            .filter(|a| match request.updated_after {
                Some(since) => a.updated_at.is_some_and(|at| at >= since),
                None => true,
            });

        let accounts: Vec<Account> = remaining.by_ref().take(self.page_size).map(to_account).collect();
        let next_cursor = match (remaining.next(), accounts.last()) {
            (Some(_), Some(last)) => Some(encode_cursor(ACCOUNTS_CURSOR, &last.immutable_id)),
            _ => None,
        };

        debug!(count = accounts.len(), more = next_cursor.is_some(), "listed accounts");
        Ok(ListAccountsResponse {
            accounts,
            next_cursor,
        })
    }

    async fn get_account(&self, request: GetAccountRequest) -> anyhow::Result<GetAccountResponse> {
        let state = self.state.lock().await;
        let accounts = state
            .accounts
            .iter()
            .filter(|a| ref_matches(&request.account_ref, a))
            .map(|a| {
                let mut account = to_account(a);
                account.groups = Some(self.resolve_groups(&a.groups));
                account
            })
            .collect();
        Ok(GetAccountResponse { accounts })
    }

    async fn list_groups(&self, request: ListGroupsRequest) -> anyhow::Result<ListGroupsResponse> {
        let offset = match &request.cursor {
            Some(cursor) => decode_cursor(GROUPS_CURSOR, cursor)?
                .parse::<usize>()
                .context("malformed group cursor")?,
            None => 0,
        };
        let prefix = request.name_prefix.as_deref().map(str::to_lowercase);
        let page_size = self.group_page_size(request.max_count);

        let matching: Vec<&Group> = self
            .groups
            .iter()
            .filter(|g| {
                prefix
                    .as_ref()
                    .is_none_or(|p| g.name.to_lowercase().starts_with(p.as_str()))
            })
            .collect();

        if offset > matching.len() {
            bail!("malformed group cursor: offset {offset} is past the last group");
        }
        let end = offset.saturating_add(page_size).min(matching.len());
        let groups = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|g| (*g).clone())
            .collect();
        let next_cursor = (end < matching.len()).then(|| encode_cursor(GROUPS_CURSOR, &end.to_string()));

        Ok(ListGroupsResponse {
            groups,
            next_cursor,
        })
    }

    async fn perform_operation(
        &self,
        request: PerformOperationRequest,
    ) -> anyhow::Result<PerformOperationResponse> {
        let operation = request.operation;
        if !self.traits.supports(operation) {
            bail!("{} does not support {operation}", self.name);
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.immutable_id == request.account_immutable_id)
            .ok_or_else(|| {
                CodedError::new(
                    ErrorCode::AccountNotFound,
                    format!("no account {:?}", request.account_immutable_id),
                )
            })?;

        match operation {
            Operation::Unlock if !account.locked => return Err(unsupported("account is not locked")),
            Operation::RemoveAllMfa if !account.mfa_enrolled => {
                return Err(unsupported("no MFA factors to remove"));
            }
            Operation::GetMfaBypassCode if !account.mfa_enrolled => {
                return Err(unsupported("no MFA factors enrolled"));
            }
            _ => {}
        }

        if request.dry_run {
            return Ok(PerformOperationResponse::default());
        }

        let mut response = PerformOperationResponse::default();
        let serial = state.issued + 1;
        match operation {
            Operation::Unlock => account.locked = false,
            Operation::RemoveAllMfa => account.mfa_enrolled = false,
            Operation::GetPasswordLink => {
                response.password_link = Some(format!(
                    "memory://{}/reset/{}?n={serial}",
                    self.name, account.immutable_id
                ));
            }
            Operation::GetTemporaryPassword => {
                account.locked = false;
                response.temporary_password = Some(format!("Temp-{serial:06}"));
            }
            Operation::GetMfaBypassCode => {
                response.mfa_bypass_code = Some(format!("{:08}", serial * 7919 % 100_000_000));
            }
        }
        state.issued = serial;
        *state.mutations.entry(operation).or_default() += 1;

        info!(%operation, account = %request.account_immutable_id, "performed operation");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn directory(value: serde_json::Value) -> MemoryDirectory {
        MemoryDirectory::new(serde_json::from_value(value).unwrap())
    }

    fn sample() -> MemoryDirectory {
        directory(json!({
            "name": "Example",
            "immutable_id": "dir-1",
            "groups": [
                {"immutable_id": "g2", "name": "engineering"},
                {"immutable_id": "g1", "name": "Admins"},
                {"immutable_id": "g3", "name": "Engineering Leads"}
            ],
            "accounts": [
                {"immutable_id": "u2", "ids": ["bob@example.com"], "name": "Bob",
                 "groups": ["g2"], "mfa_enrolled": true},
                {"immutable_id": "u1", "ids": ["alice@example.com", "shared"], "name": "Alice",
                 "groups": ["g1", "g2"], "locked": true},
                {"immutable_id": "u3", "ids": ["shared"], "name": "Carol"}
            ]
        }))
    }

    #[tokio::test]
    async fn test_configure_reports_traits() {
        let response = sample().configure(ConfigureRequest {}).await.unwrap();
        assert_eq!(response.traits.name, "Example");
        assert_eq!(response.immutable_id.as_deref(), Some("dir-1"));
        assert!(response.traits.supports(Operation::Unlock));
    }

    #[tokio::test]
    async fn test_configure_rejects_duplicate_ids() {
        let dir = directory(json!({
            "name": "dup",
            "accounts": [
                {"immutable_id": "u1", "name": "A"},
                {"immutable_id": "u1", "name": "B"}
            ]
        }));
        let err = dir.configure(ConfigureRequest {}).await.unwrap_err();
        let coded = err.downcast_ref::<CodedError>().unwrap();
        assert_eq!(coded.code, ErrorCode::ConfigurationError);
    }

    #[tokio::test]
    async fn test_configure_rejects_unknown_group() {
        let dir = directory(json!({
            "name": "x",
            "accounts": [{"immutable_id": "u1", "name": "A", "groups": ["nope"]}]
        }));
        let err = dir.configure(ConfigureRequest {}).await.unwrap_err();
        assert!(err.to_string().contains("unknown group"));
    }

    #[tokio::test]
    async fn test_get_account_multiple_matches() {
        let response = sample()
            .get_account(GetAccountRequest {
                account_ref: AccountRef::by_id("shared"),
            })
            .await
            .unwrap();
        let ids: Vec<_> = response.accounts.iter().map(|a| a.immutable_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u3"]);
    }

    #[tokio::test]
    async fn test_get_account_populates_groups() {
        let response = sample()
            .get_account(GetAccountRequest {
                account_ref: AccountRef::by_immutable_id("u1"),
            })
            .await
            .unwrap();
        let groups = response.accounts[0].groups.as_ref().unwrap();
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Admins", "engineering"]);
    }

    #[tokio::test]
    async fn test_get_account_no_match() {
        let response = sample()
            .get_account(GetAccountRequest {
                account_ref: AccountRef::by_id("nobody"),
            })
            .await
            .unwrap();
        assert!(response.accounts.is_empty());
    }

    #[tokio::test]
    async fn test_list_groups_prefix_case_insensitive() {
        let response = sample()
            .list_groups(ListGroupsRequest {
                name_prefix: Some("ENG".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = response.groups.iter().map(|g| g.immutable_id.as_str()).collect();
        assert_eq!(ids, vec!["g2", "g3"]);
        assert!(response.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_list_groups_max_count_pages() {
        let dir = sample();
        let first = dir
            .list_groups(ListGroupsRequest {
                max_count: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.groups.len(), 2);
        let second = dir
            .list_groups(ListGroupsRequest {
                max_count: Some(2),
                cursor: first.next_cursor,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.groups.len(), 1);
        assert_eq!(second.groups[0].immutable_id, "g3");
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_cursor_bound_to_operation() {
        let dir = directory(json!({
            "name": "x",
            "page_size": 1,
            "groups": [
                {"immutable_id": "g1", "name": "a"},
                {"immutable_id": "g2", "name": "b"}
            ]
        }));
        let page = dir.list_groups(ListGroupsRequest::default()).await.unwrap();
        let err = dir
            .list_accounts(ListAccountsRequest {
                cursor: page.next_cursor,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("list_accounts"));

        let err = dir
            .list_accounts(ListAccountsRequest {
                cursor: Some(Cursor::new("%%%")),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[tokio::test]
    async fn test_forged_group_cursor_rejected() {
        let dir = directory(json!({
            "name": "x",
            "page_size": 1,
            "groups": [
                {"immutable_id": "g1", "name": "a"},
                {"immutable_id": "g2", "name": "b"}
            ]
        }));

        for offset in [u64::MAX.to_string(), "3".to_string()] {
            let cursor = encode_cursor(GROUPS_CURSOR, &offset);
            let err = dir
                .list_groups(ListGroupsRequest {
                    cursor: Some(cursor),
                    ..Default::default()
                })
                .await
                .unwrap_err();
            assert!(format!("{err:#}").contains("malformed"), "{err:#}");
        }

        // An offset at the end is the empty last page
        let cursor = encode_cursor(GROUPS_CURSOR, "2");
        let page = dir
            .list_groups(ListGroupsRequest {
                cursor: Some(cursor),
                max_count: Some(u32::MAX),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(page.groups.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_updated_after_is_inclusive() {
        let dir = directory(json!({
            "name": "x",
            "accounts": [
                {"immutable_id": "u1", "name": "A", "updated_at": "2025-01-01T00:00:00Z"},
                {"immutable_id": "u2", "name": "B", "updated_at": "2025-02-01T00:00:00Z"},
                {"immutable_id": "u3", "name": "C"}
            ]
        }));
        let since = "2025-02-01T00:00:00Z".parse().unwrap();
        let page = dir
            .list_accounts(ListAccountsRequest {
                updated_after: Some(since),
                cursor: None,
            })
            .await
            .unwrap();
        assert_eq!(page.accounts.len(), 1);
        assert_eq!(page.accounts[0].immutable_id, "u2");
        assert!(page.accounts[0].groups.is_none());
    }

    #[tokio::test]
    async fn test_unlock_mutates_once() {
        let dir = sample();
        dir.perform_operation(PerformOperationRequest::new(Operation::Unlock, "u1"))
            .await
            .unwrap();
        assert_eq!(dir.mutations(Operation::Unlock).await, 1);

        let err = dir
            .perform_operation(PerformOperationRequest::new(Operation::Unlock, "u1"))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CodedError>().unwrap().code,
            ErrorCode::UnsupportedAccountState
        );
        assert_eq!(dir.mutations(Operation::Unlock).await, 1);
    }

    #[tokio::test]
    async fn test_remove_mfa_precondition() {
        let dir = sample();
        let err = dir
            .perform_operation(PerformOperationRequest::new(Operation::RemoveAllMfa, "u1").dry_run())
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CodedError>().unwrap().message,
            "no MFA factors to remove"
        );

        let response = dir
            .perform_operation(PerformOperationRequest::new(Operation::RemoveAllMfa, "u2"))
            .await
            .unwrap();
        assert_eq!(response, PerformOperationResponse::default());
        assert_eq!(dir.total_mutations().await, 1);
    }

    #[tokio::test]
    async fn test_issuing_operations_return_values() {
        let dir = sample();
        let link = dir
            .perform_operation(PerformOperationRequest::new(Operation::GetPasswordLink, "u3"))
            .await
            .unwrap();
        assert!(link.password_link.unwrap().contains("u3"));

        let temp = dir
            .perform_operation(PerformOperationRequest::new(Operation::GetTemporaryPassword, "u3"))
            .await
            .unwrap();
        assert_eq!(temp.temporary_password.as_deref(), Some("Temp-000002"));

        let code = dir
            .perform_operation(PerformOperationRequest::new(Operation::GetMfaBypassCode, "u2"))
            .await
            .unwrap();
        assert_eq!(code.mfa_bypass_code.map(|c| c.len()), Some(8));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let err = sample()
            .perform_operation(PerformOperationRequest::new(Operation::Unlock, "ghost").dry_run())
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CodedError>().unwrap().code,
            ErrorCode::AccountNotFound
        );
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let dir = directory(json!({
            "name": "readonly",
            "traits": {"name": "readonly"},
            "accounts": [{"immutable_id": "u1", "name": "A", "locked": true}]
        }));
        let err = dir
            .perform_operation(PerformOperationRequest::new(Operation::Unlock, "u1"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<CodedError>().is_none());
        assert!(err.to_string().contains("does not support unlock"));
    }

    #[test]
    fn test_load_fixture_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"name": "file", "page_size": 5}"#).unwrap();
        let dir = MemoryDirectory::load(file.path()).unwrap();
        assert_eq!(dir.page_size, 5);

        std::fs::write(file.path(), "{").unwrap();
        let err = MemoryDirectory::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "fixture", .. }));
    }
}
