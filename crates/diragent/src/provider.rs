//! Provider capability interface
//!
//! Each directory backend implements [`Provider`] once. The dispatcher routes
//! decoded requests to it and turns its results into responses.
//!
//! Return a [`CodedError`](diragent_protocol::CodedError) (possibly wrapped in
//! `anyhow` context) to give the caller a specific cause. Any other error is
//! reported as `internal_error` with its text kept for diagnostics.

use async_trait::async_trait;
use diragent_protocol::{
    ConfigureRequest, ConfigureResponse, GetAccountRequest, GetAccountResponse,
    ListAccountsRequest, ListAccountsResponse, ListGroupsRequest, ListGroupsResponse,
    PerformOperationRequest, PerformOperationResponse,
};
use std::sync::Arc;

/// Operations every directory backend supports
///
/// Each method is called at most once per request; the dispatcher does not
/// retry.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Report static information and capability flags
    ///
    /// Fails with `configuration_error` on bad credentials or parameters.
    async fn configure(&self, request: ConfigureRequest) -> anyhow::Result<ConfigureResponse>;

    /// Fetch one page of accounts with groups unset
    ///
    /// Results are ordered by a stable key so repeating a call with the same
    /// cursor returns the same page.
    async fn list_accounts(
        &self,
        request: ListAccountsRequest,
    ) -> anyhow::Result<ListAccountsResponse>;

    /// Find every account matching a reference, with groups populated
    async fn get_account(&self, request: GetAccountRequest) -> anyhow::Result<GetAccountResponse>;

    /// Fetch one page of groups whose names start with the prefix
    async fn list_groups(&self, request: ListGroupsRequest) -> anyhow::Result<ListGroupsResponse>;

    /// Run a recovery operation, or only check its preconditions on a dry run
    ///
    /// Fails with `unsupported_account_state` when a precondition is not met.
    async fn perform_operation(
        &self,
        request: PerformOperationRequest,
    ) -> anyhow::Result<PerformOperationResponse>;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    async fn configure(&self, request: ConfigureRequest) -> anyhow::Result<ConfigureResponse> {
        (**self).configure(request).await
    }

    async fn list_accounts(
        &self,
        request: ListAccountsRequest,
    ) -> anyhow::Result<ListAccountsResponse> {
        (**self).list_accounts(request).await
    }

    async fn get_account(&self, request: GetAccountRequest) -> anyhow::Result<GetAccountResponse> {
        (**self).get_account(request).await
    }

    async fn list_groups(&self, request: ListGroupsRequest) -> anyhow::Result<ListGroupsResponse> {
        (**self).list_groups(request).await
    }

    async fn perform_operation(
        &self,
        request: PerformOperationRequest,
    ) -> anyhow::Result<PerformOperationResponse> {
        (**self).perform_operation(request).await
    }
}
