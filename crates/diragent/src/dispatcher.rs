//! Worker dispatcher
//!
//! The worker side of the pipe: decode each request document, route it to the
//! [`Provider`], classify failures, and write exactly one response line back.

use crate::provider::Provider;
use diragent_protocol::{CodedError, Request, Response};
use diragent_transport::JsonStreamCodec;
use futures::StreamExt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Answer one request
///
/// `Ping` is acknowledged without calling the provider. Provider errors become
/// [`Response::Error`] via [`classify`].
pub async fn dispatch<P: Provider + ?Sized>(provider: &P, request: Request) -> Response {
    let kind = request.kind();
    let result = match request {
        Request::Ping(_) => return Response::Ping,
        Request::Configure(req) => provider.configure(req).await.map(Response::Configure),
        Request::GetAccount(req) => provider.get_account(req).await.map(Response::GetAccount),
        Request::ListAccounts(req) => provider
            .list_accounts(req)
            .await
            .map(Response::ListAccounts),
        Request::ListGroups(req) => provider.list_groups(req).await.map(Response::ListGroups),
        Request::PerformOperation(req) => provider
            .perform_operation(req)
            .await
            .map(Response::PerformOperation),
    };

    result.unwrap_or_else(|err| {
        let coded = classify(&err);
        debug!(request = %kind, code = %coded.code, "provider failed: {:#}", err);
        Response::Error(coded)
    })
}

/// Map a provider error to the coded error sent on the wire
///
/// The first [`CodedError`] in the source chain wins, unchanged. Anything
/// else is an `internal_error` carrying the whole chain as text.
pub fn classify(err: &anyhow::Error) -> CodedError {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
        .cloned()
        .unwrap_or_else(|| CodedError::internal(format!("{err:#}")))
}

/// Serve requests from `reader` until end of input or cancellation
///
/// Requests are JSON documents separated by whitespace; a document may span
/// lines. Input that does not decode as a request is answered with an
/// `internal_error`, so every malformed document still gets one response.
pub async fn run_worker<P, R, W>(
    provider: &P,
    reader: R,
    mut writer: W,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    P: Provider + ?Sized,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut documents = FramedRead::new(reader, JsonStreamCodec::new());
    loop {
        let document = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("worker cancelled");
                break;
            }
            document = documents.next() => document,
        };
        let Some(document) = document.transpose()? else {
            debug!("worker input closed");
            break;
        };

        let response = match document {
            Ok(value) => match Request::from_value(value) {
                Ok(request) => dispatch(provider, request).await,
                Err(err) => undecodable(err),
            },
            Err(err) => undecodable(err),
        };

        let mut encoded = response.to_json().map_err(io::Error::other)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn undecodable(err: impl std::fmt::Display) -> Response {
    Response::internal_error(format!("cannot decode request: {err}"))
}

/// Serve requests over the process's stdin and stdout
pub async fn run_worker_stdio<P: Provider + ?Sized>(
    provider: &P,
    shutdown: CancellationToken,
) -> io::Result<()> {
    info!("serving worker requests on stdio");
    run_worker(provider, tokio::io::stdin(), tokio::io::stdout(), shutdown).await
}
