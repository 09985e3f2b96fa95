// Resource-kind injection.
//
// A tower layer shared by the network and in-process stacks: it parses the
// gRPC request path (`/stigmer.v1.AgentCommandController/Create`), derives
// the resource kind from the service name, and injects it into the request
// extensions before any handler runs. Handlers read it back instead of
// hard-coding their kind.

use std::task::{Context, Poll};

use tonic::codegen::http;
use tower::{Layer, Service};

use stigmer_core::ResourceKind;

#[derive(Debug, Clone, Default)]
pub struct KindInjectLayer;

impl<S> Layer<S> for KindInjectLayer {
    type Service = KindInject<S>;

    fn layer(&self, inner: S) -> Self::Service {
        KindInject { inner }
    }
}

#[derive(Debug, Clone)]
pub struct KindInject<S> {
    inner: S,
}

impl<S, B> Service<http::Request<B>> for KindInject<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        if let Some(kind) = ResourceKind::from_grpc_path(req.uri().path()) {
            req.extensions_mut().insert(kind);
        }
        self.inner.call(req)
    }
}

/// Read the kind injected by the layer and check it against the kind the
/// handler is typed for. A mismatch means a service was wired onto the
/// wrong path.
pub fn expect_kind<T>(
    request: &tonic::Request<T>,
    expected: ResourceKind,
) -> Result<ResourceKind, tonic::Status> {
    let kind = request
        .extensions()
        .get::<ResourceKind>()
        .copied()
        .ok_or_else(|| tonic::Status::internal("resource kind was not injected"))?;
    if kind != expected {
        return Err(tonic::Status::internal(format!(
            "resource kind mismatch: request carries {}, handler expects {}",
            kind, expected
        )));
    }
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_kind_requires_injection() {
        let request = tonic::Request::new(());
        let err = expect_kind(&request, ResourceKind::Agent).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
    }

    #[test]
    fn test_expect_kind_checks_match() {
        let mut request = tonic::Request::new(());
        request.extensions_mut().insert(ResourceKind::Agent);
        assert_eq!(
            expect_kind(&request, ResourceKind::Agent).unwrap(),
            ResourceKind::Agent
        );
        assert!(expect_kind(&request, ResourceKind::Session).is_err());
    }
}
