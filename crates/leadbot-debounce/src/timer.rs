use std::time::Duration;

use futures_util::future::BoxFuture;

/// Source of debounce delays. Injected so tests and alternative runtimes can
/// control when windows close.
pub trait Timer: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Tokio's clock. Honors `tokio::time::pause` in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
