//! Live progress stream over server-sent events.
//!
//! # Design
//! - Each connection owns one hub subscription; frames are forwarded verbatim
//!   as `data:` events in hub delivery order.
//! - Dropping the stream (client disconnect) drops the subscription, which
//!   unregisters it from the hub.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::State,
    response::sse::{self, Sse},
};
use nebula_events::Subscription;
use tracing::{debug, error};

use crate::http::constants::SSE_KEEP_ALIVE_SECS;
use crate::http::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn stream_progress(
    State(state): State<Arc<ApiState>>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send>, ApiError>
{
    let subscription = state.hub.subscribe().map_err(|err| {
        error!(error = %err, "progress hub is not accepting subscribers");
        ApiError::service_unavailable("progress stream is unavailable")
    })?;
    debug!(subscriber = %subscription.id(), "progress subscriber connected");

    Ok(Sse::new(progress_stream(subscription)).keep_alive(
        sse::KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

pub(crate) fn progress_stream(
    mut subscription: Subscription,
) -> impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send {
    stream! {
        while let Some(frame) = subscription.recv().await {
            yield Ok(sse::Event::default().data(&*frame));
        }
        debug!(subscriber = %subscription.id(), "progress subscription closed");
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use futures_util::StreamExt;
    use nebula_events::{ProgressHub, ProgressPayload};

    use super::*;

    #[tokio::test]
    async fn frames_are_forwarded_and_disconnect_unregisters() -> Result<(), Box<dyn Error>> {
        let hub = ProgressHub::new();
        let subscription = hub.subscribe()?;
        let mut stream = Box::pin(progress_stream(subscription));

        for _ in 0..50 {
            if hub.subscriber_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        hub.publish_event(
            "job-1",
            ProgressPayload::Log {
                message: "hello".to_string(),
            },
        )?;
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next()).await?;
        assert!(matches!(next, Some(Ok(_))));

        drop(stream);
        for _ in 0..50 {
            if hub.subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hub.subscriber_count(), 0);
        Ok(())
    }
}
