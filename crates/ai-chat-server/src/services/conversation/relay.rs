//! Forwards provider tokens to the caller while accumulating the full reply.

use futures::stream::{Stream, StreamExt};
use std::future::Future;
use tracing::{debug, warn};

use crate::utils::metrics::Metrics;

use super::manager::TokenStream;

/// What the caller-facing transport receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// One fragment of generated text, in provider order
    Token(String),
    /// Stream finished and the assistant turn was handed to `on_complete`
    Done,
    /// Provider failed mid-stream; nothing was committed
    Failed(String),
}

/// Logs and counts a relay dropped before it reached a terminal event
struct CancelGuard {
    metrics: Metrics,
    finished: bool,
    forwarded: usize,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                forwarded = self.forwarded,
                "Caller went away mid-stream, provider stream dropped and reply discarded"
            );
            self.metrics.increment_exchanges_cancelled();
        }
    }
}

pub struct StreamRelay {
    metrics: Metrics,
}

impl StreamRelay {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }

    /// Drives `tokens`, yielding each non-empty fragment as soon as it arrives.
    ///
    /// When the provider stream ends, `on_complete` receives the accumulated
    /// text and is awaited before [`RelayEvent::Done`] is yielded. On a provider
    /// error the accumulator is discarded and [`RelayEvent::Failed`] ends the
    /// stream. Dropping the returned stream drops `tokens` with it.
    pub fn relay<F, Fut>(&self, tokens: TokenStream, on_complete: F) -> impl Stream<Item = RelayEvent> + Send + 'static
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let metrics = self.metrics.clone();

        async_stream::stream! {
            let mut tokens = tokens;
            let mut guard = CancelGuard { metrics: metrics.clone(), finished: false, forwarded: 0 };
            let mut accumulated = String::new();

            while let Some(item) = tokens.next().await {
                match item {
                    Ok(fragment) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        accumulated.push_str(&fragment);
                        guard.forwarded += 1;
                        yield RelayEvent::Token(fragment);
                    }
                    Err(e) => {
                        warn!(forwarded = guard.forwarded, error = %e, "Provider stream failed, reply not committed");
                        guard.finished = true;
                        metrics.increment_exchanges_failed();
                        yield RelayEvent::Failed(e.to_string());
                        return;
                    }
                }
            }

            debug!(forwarded = guard.forwarded, chars = accumulated.len(), "Provider stream finished");
            on_complete(accumulated).await;
            guard.finished = true;
            metrics.increment_exchanges_completed();
            yield RelayEvent::Done;
        }
    }
}
