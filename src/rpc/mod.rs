//! Calling the services under test.
//!
//! Calls go through tonic's generic [`Grpc`] client with a prost codec, so
//! each method only needs a [`Method`] path and a pair of message types from
//! [`messages`].

pub mod messages;

use futures::Stream;
use http::uri::PathAndQuery;
use std::time::Duration;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;
use tonic::{Code, Request, Status};

/// Metadata key carrying the caller's token.
pub const TOKEN_METADATA: &str = "token";
/// Client package advertised on every call.
pub const CLIENT_PACKAGE: &str = "com.manabie.liz";
/// Client version advertised on every call.
pub const CLIENT_VERSION: &str = "1.0.0";

/// Fully-qualified RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Method {
    /// Logical service name, used to pick a channel and in logs.
    pub service: &'static str,
    /// gRPC path, `/package.Service/Method`.
    pub path: &'static str,
}

impl Method {
    /// Describe a method on `service` reachable at `path`.
    #[must_use]
    pub const fn new(service: &'static str, path: &'static str) -> Self {
        Self { service, path }
    }
}

fn metadata_value(key: &str, value: &str) -> Result<MetadataValue<Ascii>, Status> {
    value
        .parse::<MetadataValue<Ascii>>()
        .map_err(|err| Status::invalid_argument(format!("metadata {key} is not ASCII: {err}")))
}

/// Wrap `message` with client identification, an optional token and a
/// deadline.
///
/// # Errors
///
/// Returns `InvalidArgument` when the token cannot be sent as metadata.
pub fn outgoing<T>(message: T, token: Option<&str>, timeout: Duration) -> Result<Request<T>, Status> {
    let mut request = Request::new(message);
    request.set_timeout(timeout);
    let metadata = request.metadata_mut();
    metadata.insert("pkg", metadata_value("pkg", CLIENT_PACKAGE)?);
    metadata.insert("version", metadata_value("version", CLIENT_VERSION)?);
    if let Some(value) = token {
        metadata.insert(TOKEN_METADATA, metadata_value(TOKEN_METADATA, value)?);
    }
    Ok(request)
}

async fn ready(channel: Channel, method: Method) -> Result<Grpc<Channel>, Status> {
    let mut grpc = Grpc::new(channel);
    grpc.ready().await.map_err(|err| {
        Status::unavailable(format!("{} is not ready: {err}", method.service))
    })?;
    Ok(grpc)
}

/// Perform a unary call.
///
/// # Errors
///
/// Returns the service's status, or `Unavailable` when the channel is down.
pub async fn unary<Req, Resp>(
    channel: Channel,
    method: Method,
    request: Request<Req>,
) -> Result<Resp, Status>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let mut grpc = ready(channel, method).await?;
    tracing::debug!(service = method.service, path = method.path, "unary call");
    let codec = ProstCodec::<Req, Resp>::default();
    let response = grpc
        .unary(request, PathAndQuery::from_static(method.path), codec)
        .await?;
    Ok(response.into_inner())
}

/// Perform a client-streaming call.
///
/// # Errors
///
/// Returns the service's status, or `Unavailable` when the channel is down.
pub async fn client_streaming<S, Req, Resp>(
    channel: Channel,
    method: Method,
    request: Request<S>,
) -> Result<Resp, Status>
where
    S: Stream<Item = Req> + Send + 'static,
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let mut grpc = ready(channel, method).await?;
    tracing::debug!(service = method.service, path = method.path, "client-streaming call");
    let codec = ProstCodec::<Req, Resp>::default();
    let response = grpc
        .client_streaming(request, PathAndQuery::from_static(method.path), codec)
        .await?;
    Ok(response.into_inner())
}

/// Canonical name of a status code, as written in feature files.
#[must_use]
pub const fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "Canceled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn outgoing_sets_identification_and_token() {
        let request = outgoing((), Some("abc.def"), Duration::from_secs(5)).expect("request");
        let metadata = request.metadata();
        assert_eq!(metadata.get("pkg").and_then(|v| v.to_str().ok()), Some(CLIENT_PACKAGE));
        assert_eq!(metadata.get("version").and_then(|v| v.to_str().ok()), Some(CLIENT_VERSION));
        assert_eq!(metadata.get(TOKEN_METADATA).and_then(|v| v.to_str().ok()), Some("abc.def"));
        assert!(metadata.get("grpc-timeout").is_some());
    }

    #[test]
    fn outgoing_without_token_omits_it() {
        let request = outgoing((), None, Duration::from_secs(1)).expect("request");
        assert!(request.metadata().get(TOKEN_METADATA).is_none());
    }

    #[test]
    fn non_ascii_token_is_rejected() {
        let err = outgoing((), Some("bad\ntoken"), Duration::from_secs(1)).expect_err("rejected");
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[rstest]
    #[case(Code::Ok, "OK")]
    #[case(Code::Cancelled, "Canceled")]
    #[case(Code::PermissionDenied, "PermissionDenied")]
    #[case(Code::Unauthenticated, "Unauthenticated")]
    fn code_names(#[case] code: Code, #[case] expected: &str) {
        assert_eq!(code_name(code), expected);
    }
}
