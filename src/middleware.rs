//! Tower middleware that enforces rate limits in front of a service.
//!
//! The layer knows nothing about *how* limiting works; it extracts the
//! rate-limit coordinates from each request and asks the
//! [`RateLimitService`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

use crate::error::LimiterError;
use crate::key::{LimitType, RequestContext};
use crate::limiter::{RateLimitResult, RateLimitService};
use crate::telemetry::{NullSink, TelemetrySink};

/// Extracts `(identifier, limit_type, context)` from a request.
///
/// Implemented for plain closures, which covers most callers.
pub trait KeyExtractor<Req>: Send + Sync {
    fn extract(&self, req: &Req) -> (String, LimitType, RequestContext);
}

impl<Req, F> KeyExtractor<Req> for F
where
    F: Fn(&Req) -> (String, LimitType, RequestContext) + Send + Sync,
{
    fn extract(&self, req: &Req) -> (String, LimitType, RequestContext) {
        self(req)
    }
}

/// A layer that rejects over-limit requests before the inner service runs.
#[derive(Debug)]
pub struct RateLimitLayer<X, T = NullSink> {
    limiter: Arc<RateLimitService<T>>,
    extractor: Arc<X>,
}

impl<X, T> Clone for RateLimitLayer<X, T> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), extractor: self.extractor.clone() }
    }
}

impl<X, T> RateLimitLayer<X, T> {
    pub fn new(limiter: Arc<RateLimitService<T>>, extractor: X) -> Self {
        Self { limiter, extractor: Arc::new(extractor) }
    }
}

impl<S, X, T> Layer<S> for RateLimitLayer<X, T> {
    type Service = EnforcedService<S, X, T>;

    fn layer(&self, service: S) -> Self::Service {
        EnforcedService {
            inner: service,
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
#[derive(Debug)]
pub struct EnforcedService<S, X, T = NullSink> {
    inner: S,
    limiter: Arc<RateLimitService<T>>,
    extractor: Arc<X>,
}

impl<S: Clone, X, T> Clone for EnforcedService<S, X, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl<S, X, T, Req> Service<Req> for EnforcedService<S, X, T>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    X: KeyExtractor<Req> + 'static,
    T: TelemetrySink + Sync,
    T::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = LimiterError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(LimiterError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let (identifier, limit_type, context) = self.extractor.extract(&req);
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match limiter.check_limit(&identifier, &limit_type, &context).await {
                Ok(RateLimitResult::Allowed) => {
                    inner.call(req).await.map_err(LimiterError::Inner)
                }
                Ok(RateLimitResult::Denied { retry_after, violating_window }) => {
                    Err(LimiterError::LimitExceeded { retry_after, violating_window })
                }
                Err(config_err) => Err(LimiterError::Config(config_err)),
            }
        })
    }
}
