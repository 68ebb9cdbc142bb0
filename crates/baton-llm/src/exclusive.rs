use async_trait::async_trait;

use baton_core::errors::ProviderError;
use baton_core::provider::{InvokeRequest, ModelProvider, ModelReply};
use baton_core::thread::Thread;

/// Enforces one active round-trip per thread.
///
/// A second invoke against a thread whose round-trip is still in flight
/// fails with [`ProviderError::ThreadBusy`] instead of interleaving two
/// conversations. Agents on distinct threads are unaffected.
pub struct ExclusiveProvider<P> {
    inner: P,
}

impl<P: ModelProvider> ExclusiveProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

struct RoundTripGuard<'a> {
    thread: &'a Thread,
}

impl Drop for RoundTripGuard<'_> {
    fn drop(&mut self) {
        self.thread.finish_round_trip();
    }
}

#[async_trait]
impl<P: ModelProvider> ModelProvider for ExclusiveProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, request: &InvokeRequest) -> Result<ModelReply, ProviderError> {
        if !request.thread.try_begin_round_trip() {
            return Err(ProviderError::ThreadBusy {
                thread: request.thread.id().clone(),
            });
        }
        // released on every exit path, including inner errors
        let _guard = RoundTripGuard {
            thread: &request.thread,
        };
        self.inner.invoke(request).await
    }
}
