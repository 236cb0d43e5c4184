//! Request/response envelopes exchanged by the control plane, relay, and worker
//!
//! The wire form is a JSON object with at most one populated operation field.
//! In Rust the envelope is a sum type, so "exactly one operation" holds by
//! construction; the permissive wire structs exist only at the serde boundary
//! and reject empty or multiply-tagged documents.

use crate::error::{ProtocolError, Result};
use crate::operations::{
    ConfigureRequest, ConfigureResponse, GetAccountRequest, GetAccountResponse,
    ListAccountsRequest, ListAccountsResponse, ListGroupsRequest, ListGroupsResponse,
    PerformOperationRequest, PerformOperationResponse, PingRequest,
};
use crate::types::{CodedError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The operation a request asks for, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `ping`
    Ping,
    /// `configure`
    Configure,
    /// `get_account`
    GetAccount,
    /// `list_accounts`
    ListAccounts,
    /// `list_groups`
    ListGroups,
    /// `perform_operation`
    PerformOperation,
}

impl RequestKind {
    /// The wire field that carries this operation
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Configure => "configure",
            Self::GetAccount => "get_account",
            Self::ListAccounts => "list_accounts",
            Self::ListGroups => "list_groups",
            Self::PerformOperation => "perform_operation",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A request from the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RequestWire", into = "RequestWire")]
pub enum Request {
    /// Liveness probe
    Ping(PingRequest),
    /// Fetch static provider information
    Configure(ConfigureRequest),
    /// Look up accounts by reference
    GetAccount(GetAccountRequest),
    /// Page through accounts
    ListAccounts(ListAccountsRequest),
    /// Page through groups
    ListGroups(ListGroupsRequest),
    /// Run a recovery operation
    PerformOperation(PerformOperationRequest),
}

impl Request {
    /// The operation this request asks for
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Ping(_) => RequestKind::Ping,
            Self::Configure(_) => RequestKind::Configure,
            Self::GetAccount(_) => RequestKind::GetAccount,
            Self::ListAccounts(_) => RequestKind::ListAccounts,
            Self::ListGroups(_) => RequestKind::ListGroups,
            Self::PerformOperation(_) => RequestKind::PerformOperation,
        }
    }

    /// Serialize to a compact JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize and validate from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to a JSON value
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize and validate from a JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A reply to a [`Request`]
///
/// Either the variant paired with the request's kind, or [`Response::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ResponseWire", into = "ResponseWire")]
pub enum Response {
    /// Acknowledgement of a ping; encodes as `{}`
    Ping,
    /// Provider information
    Configure(ConfigureResponse),
    /// Matching accounts
    GetAccount(GetAccountResponse),
    /// A page of accounts
    ListAccounts(ListAccountsResponse),
    /// A page of groups
    ListGroups(ListGroupsResponse),
    /// Operation result
    PerformOperation(PerformOperationResponse),
    /// The operation failed
    Error(CodedError),
}

impl Response {
    /// Build an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(CodedError::new(code, message))
    }

    /// Build an `InternalError` response
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Error(CodedError::internal(message))
    }

    /// The request kind this response answers, or `None` for errors
    pub fn kind(&self) -> Option<RequestKind> {
        match self {
            Self::Ping => Some(RequestKind::Ping),
            Self::Configure(_) => Some(RequestKind::Configure),
            Self::GetAccount(_) => Some(RequestKind::GetAccount),
            Self::ListAccounts(_) => Some(RequestKind::ListAccounts),
            Self::ListGroups(_) => Some(RequestKind::ListGroups),
            Self::PerformOperation(_) => Some(RequestKind::PerformOperation),
            Self::Error(_) => None,
        }
    }

    /// The carried error, if any
    pub fn as_error(&self) -> Option<&CodedError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Whether this response is a legal answer to a request of `kind`
    pub fn matches(&self, kind: RequestKind) -> bool {
        match self.kind() {
            None => true,
            Some(own) => own == kind,
        }
    }

    /// Return `self` if it answers `kind`, otherwise an `InternalError`
    ///
    /// Guards the upstream contract against workers that reply with the
    /// wrong variant or with nothing at all.
    pub fn conform_to(self, kind: RequestKind) -> Self {
        if self.matches(kind) {
            return self;
        }
        let message = match kind {
            RequestKind::Ping => "worker must not set a data field in response to 'ping'".into(),
            other => format!("worker must set '{}' in response", other.tag()),
        };
        Self::internal_error(message)
    }

    /// Serialize to a compact JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize and validate from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to a JSON value
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize and validate from a JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

impl From<CodedError> for Response {
    fn from(err: CodedError) -> Self {
        Self::Error(err)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RequestWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ping: Option<PingRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    configure: Option<ConfigureRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    get_account: Option<GetAccountRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_accounts: Option<ListAccountsRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_groups: Option<ListGroupsRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    perform_operation: Option<PerformOperationRequest>,
}

impl RequestWire {
    fn populated(&self) -> Vec<&'static str> {
        let fields = [
            ("ping", self.ping.is_some()),
            ("configure", self.configure.is_some()),
            ("get_account", self.get_account.is_some()),
            ("list_accounts", self.list_accounts.is_some()),
            ("list_groups", self.list_groups.is_some()),
            ("perform_operation", self.perform_operation.is_some()),
        ];
        fields
            .into_iter()
            .filter_map(|(tag, set)| set.then_some(tag))
            .collect()
    }
}

impl TryFrom<RequestWire> for Request {
    type Error = ProtocolError;

    fn try_from(wire: RequestWire) -> Result<Self> {
        let populated = wire.populated();
        if populated.len() > 1 {
            return Err(ProtocolError::ConflictingTags(populated));
        }

        let request = if let Some(ping) = wire.ping {
            Self::Ping(ping)
        } else if let Some(configure) = wire.configure {
            Self::Configure(configure)
        } else if let Some(get_account) = wire.get_account {
            if get_account.account_ref.is_empty() {
                return Err(ProtocolError::InvalidField {
                    field: "get_account.ref",
                    reason: "one of immutable_id or id must be set".into(),
                });
            }
            Self::GetAccount(get_account)
        } else if let Some(list_accounts) = wire.list_accounts {
            Self::ListAccounts(list_accounts)
        } else if let Some(list_groups) = wire.list_groups {
            Self::ListGroups(list_groups)
        } else if let Some(perform_operation) = wire.perform_operation {
            Self::PerformOperation(perform_operation)
        } else {
            return Err(ProtocolError::EmptyMessage);
        };
        Ok(request)
    }
}

impl From<Request> for RequestWire {
    fn from(request: Request) -> Self {
        let mut wire = Self::default();
        match request {
            Request::Ping(ping) => wire.ping = Some(ping),
            Request::Configure(configure) => wire.configure = Some(configure),
            Request::GetAccount(get_account) => wire.get_account = Some(get_account),
            Request::ListAccounts(list_accounts) => wire.list_accounts = Some(list_accounts),
            Request::ListGroups(list_groups) => wire.list_groups = Some(list_groups),
            Request::PerformOperation(perform_operation) => {
                wire.perform_operation = Some(perform_operation)
            }
        }
        wire
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ResponseWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    configure: Option<ConfigureResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    get_account: Option<GetAccountResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_accounts: Option<ListAccountsResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_groups: Option<ListGroupsResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    perform_operation: Option<PerformOperationResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<CodedError>,
}

impl ResponseWire {
    fn populated(&self) -> Vec<&'static str> {
        let fields = [
            ("configure", self.configure.is_some()),
            ("get_account", self.get_account.is_some()),
            ("list_accounts", self.list_accounts.is_some()),
            ("list_groups", self.list_groups.is_some()),
            ("perform_operation", self.perform_operation.is_some()),
            ("error", self.error.is_some()),
        ];
        fields
            .into_iter()
            .filter_map(|(tag, set)| set.then_some(tag))
            .collect()
    }
}

impl TryFrom<ResponseWire> for Response {
    type Error = ProtocolError;

    fn try_from(wire: ResponseWire) -> Result<Self> {
        let populated = wire.populated();
        if populated.len() > 1 {
            return Err(ProtocolError::ConflictingTags(populated));
        }

        let response = if let Some(err) = wire.error {
            Self::Error(err)
        } else if let Some(configure) = wire.configure {
            Self::Configure(configure)
        } else if let Some(get_account) = wire.get_account {
            Self::GetAccount(get_account)
        } else if let Some(list_accounts) = wire.list_accounts {
            Self::ListAccounts(list_accounts)
        } else if let Some(list_groups) = wire.list_groups {
            Self::ListGroups(list_groups)
        } else if let Some(perform_operation) = wire.perform_operation {
            Self::PerformOperation(perform_operation)
        } else {
            Self::Ping
        };
        Ok(response)
    }
}

impl From<Response> for ResponseWire {
    fn from(response: Response) -> Self {
        let mut wire = Self::default();
        match response {
            Response::Ping => {}
            Response::Configure(configure) => wire.configure = Some(configure),
            Response::GetAccount(get_account) => wire.get_account = Some(get_account),
            Response::ListAccounts(list_accounts) => wire.list_accounts = Some(list_accounts),
            Response::ListGroups(list_groups) => wire.list_groups = Some(list_groups),
            Response::PerformOperation(perform_operation) => {
                wire.perform_operation = Some(perform_operation)
            }
            Response::Error(err) => wire.error = Some(err),
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountRef, Operation};
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_request_tag_is_the_field_name() {
        let req = Request::PerformOperation(
            PerformOperationRequest::new(Operation::Unlock, "abc").dry_run(),
        );
        assert_eq!(
            req.to_value().unwrap(),
            json!({"perform_operation": {
                "operation": "unlock",
                "account_immutable_id": "abc",
                "dry_run": true
            }})
        );
    }

    #[test]
    fn test_ping_request_and_ack() {
        let req = Request::from_json(r#"{"ping":{}}"#).unwrap();
        assert_eq!(req.kind(), RequestKind::Ping);
        assert_eq!(Response::Ping.to_json().unwrap(), "{}");
        assert_eq!(Response::from_json("{}").unwrap(), Response::Ping);
    }

    #[test]
    fn test_empty_request_rejected() {
        let err = Request::from_json("{}").unwrap_err();
        assert!(err.to_string().contains("no operation field"), "{err}");
    }

    #[test]
    fn test_null_tags_count_as_absent() {
        let req = Request::from_json(r#"{"ping":null,"list_groups":{}}"#).unwrap();
        assert_eq!(req.kind(), RequestKind::ListGroups);
    }

    #[test]
    fn test_multiple_request_tags_rejected() {
        let err = Request::from_json(r#"{"ping":{},"configure":{}}"#).unwrap_err();
        assert!(err.to_string().contains("multiple fields"), "{err}");
    }

    #[test]
    fn test_unknown_request_tag_rejected() {
        assert!(Request::from_json(r#"{"delete_everything":{}}"#).is_err());
    }

    #[test]
    fn test_get_account_requires_a_key() {
        let err = Request::from_json(r#"{"get_account":{"ref":{}}}"#).unwrap_err();
        assert!(err.to_string().contains("get_account.ref"), "{err}");

        let ok = Request::from_json(r#"{"get_account":{"ref":{"id":"bob"}}}"#).unwrap();
        assert_eq!(
            ok,
            Request::GetAccount(GetAccountRequest {
                account_ref: AccountRef::by_id("bob")
            })
        );
    }

    #[test]
    fn test_error_and_data_are_exclusive() {
        let err = Response::from_json(
            r#"{"list_groups":{"groups":[]},"error":{"code":"internal_error","message":"x"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("multiple fields"), "{err}");
    }

    #[test]
    fn test_error_response_wire_shape() {
        let resp = Response::error(ErrorCode::UnsupportedAccountState, "account is not locked");
        assert_eq!(
            resp.to_value().unwrap(),
            json!({"error": {"code": "unsupported_account_state", "message": "account is not locked"}})
        );
    }

    #[rstest]
    #[case(RequestKind::Ping, Response::Ping)]
    #[case(RequestKind::Configure, Response::Configure(ConfigureResponse::default()))]
    #[case(RequestKind::GetAccount, Response::GetAccount(GetAccountResponse::default()))]
    #[case(RequestKind::ListAccounts, Response::ListAccounts(ListAccountsResponse::default()))]
    #[case(RequestKind::ListGroups, Response::ListGroups(ListGroupsResponse::default()))]
    #[case(
        RequestKind::PerformOperation,
        Response::PerformOperation(PerformOperationResponse::default())
    )]
    fn test_matching_variant_passes_through(#[case] kind: RequestKind, #[case] resp: Response) {
        assert!(resp.matches(kind));
        assert_eq!(resp.clone().conform_to(kind), resp);
    }

    #[rstest]
    #[case(RequestKind::ListAccounts, Response::ListGroups(ListGroupsResponse::default()))]
    #[case(RequestKind::ListAccounts, Response::Ping)]
    #[case(RequestKind::Configure, Response::Ping)]
    #[case(RequestKind::Ping, Response::Configure(ConfigureResponse::default()))]
    #[case(RequestKind::GetAccount, Response::PerformOperation(PerformOperationResponse::default()))]
    fn test_mismatched_variant_becomes_internal_error(
        #[case] kind: RequestKind,
        #[case] resp: Response,
    ) {
        assert!(!resp.matches(kind));
        let conformed = resp.conform_to(kind);
        let err = conformed.as_error().expect("expected an error response");
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_override_message_names_expected_tag() {
        let conformed = Response::Ping.conform_to(RequestKind::ListAccounts);
        assert_eq!(
            conformed.as_error().unwrap().message,
            "worker must set 'list_accounts' in response"
        );
    }

    #[test]
    fn test_error_always_matches() {
        let err = Response::internal_error("boom");
        for kind in [
            RequestKind::Ping,
            RequestKind::Configure,
            RequestKind::GetAccount,
            RequestKind::ListAccounts,
            RequestKind::ListGroups,
            RequestKind::PerformOperation,
        ] {
            assert!(err.matches(kind));
        }
    }
}
