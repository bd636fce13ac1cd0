use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tonic::Code;
use tower::{Layer, Service};
use tracing::{error, info, warn, Instrument, Span};

/// Configuration for gRPC request logging
#[derive(Clone, Debug)]
pub struct GrpcLoggingConfig {
    /// Path prefixes that are never logged, e.g. "/grpc.reflection."
    pub ignored_paths: Vec<String>,
    /// Requests taking longer than this are logged at warn level
    pub slow_request_threshold: Duration,
}

impl Default for GrpcLoggingConfig {
    fn default() -> Self {
        Self {
            ignored_paths: vec!["/grpc.reflection.".to_string()],
            slow_request_threshold: Duration::from_millis(500),
        }
    }
}

impl GrpcLoggingConfig {
    fn should_ignore(&self, path: &str) -> bool {
        self.ignored_paths
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }
}

/// Tower layer logging one line per completed gRPC call
#[derive(Clone)]
pub struct GrpcLoggingLayer {
    config: GrpcLoggingConfig,
}

impl GrpcLoggingLayer {
    pub fn new(config: GrpcLoggingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for GrpcLoggingLayer {
    type Service = GrpcLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GrpcLoggingService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GrpcLoggingService<S> {
    inner: S,
    config: GrpcLoggingConfig,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for GrpcLoggingService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Error: std::fmt::Display,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let path = req.uri().path().to_string();
        let logged = !self.config.should_ignore(&path);
        let slow_threshold = self.config.slow_request_threshold;
        let started = Instant::now();
        let future = self.inner.call(req);

        Box::pin(
            async move {
                let result = future.await;
                if logged {
                    let elapsed = started.elapsed();
                    match &result {
                        Ok(response) => {
                            log_completed(&path, elapsed, slow_threshold, grpc_code(response))
                        }
                        Err(e) => error!(
                            path = %path,
                            duration_ms = elapsed.as_millis() as u64,
                            error = %e,
                            "gRPC transport error"
                        ),
                    }
                }
                result
            }
            .instrument(Span::current()),
        )
    }
}

/// Status carried in the response headers. Streaming and successful unary
/// responses put it in trailers instead, which only happens for OK here.
fn grpc_code<B>(response: &http::Response<B>) -> Code {
    response
        .headers()
        .get("grpc-status")
        .map(|value| Code::from_bytes(value.as_bytes()))
        .unwrap_or(Code::Ok)
}

fn is_server_fault(code: Code) -> bool {
    matches!(
        code,
        Code::Internal | Code::Unknown | Code::Unavailable | Code::DataLoss
    )
}

fn log_completed(path: &str, elapsed: Duration, slow_threshold: Duration, code: Code) {
    let duration_ms = elapsed.as_millis() as u64;
    if is_server_fault(code) {
        error!(path, grpc_code = ?code, duration_ms, "gRPC call failed");
    } else if elapsed > slow_threshold {
        warn!(path, grpc_code = ?code, duration_ms, "slow gRPC call");
    } else {
        info!(path, grpc_code = ?code, duration_ms, "gRPC call completed");
    }
}
