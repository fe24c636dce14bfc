//! Single-shot event correlation over a transport's event stream
//!
//! A [`PendingEvent`] subscribes to the transport when it is created, so the
//! request can be written afterwards without racing the response. Waiting on
//! it resolves with exactly one outcome: the first matching message, the
//! first transport error, or a timeout.

use crate::client::message::WmpEvent;
use crate::client::{TransportEvent, WmpTransport};
use crate::error::{Result, WmpError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// An armed wait for one inbound event
pub struct PendingEvent<F> {
    rx: broadcast::Receiver<TransportEvent>,
    what: String,
    timeout: Duration,
    matcher: F,
}

impl<F> PendingEvent<F> {
    /// Subscribe to `source` and arm a wait for the first event accepted by
    /// `matcher`. Nothing is awaited until [`PendingEvent::wait`] is called.
    pub fn arm<S>(source: &S, what: impl Into<String>, timeout: Duration, matcher: F) -> Self
    where
        S: WmpTransport + ?Sized,
    {
        Self {
            rx: source.subscribe(),
            what: what.into(),
            timeout,
            matcher,
        }
    }

    /// Wait for the outcome.
    ///
    /// The matcher sees every inbound message in order and may fold state
    /// while it returns `None`; the first `Some` resolves the wait.
    pub async fn wait<T>(self) -> Result<T>
    where
        F: FnMut(&WmpEvent) -> Option<T>,
    {
        let PendingEvent {
            rx,
            what,
            timeout,
            matcher,
        } = self;
        await_event(rx, &what, timeout, matcher).await
    }
}

/// Race the first matching message against transport errors and a timer
pub async fn await_event<T, F>(
    mut rx: broadcast::Receiver<TransportEvent>,
    what: &str,
    timeout: Duration,
    mut matcher: F,
) -> Result<T>
where
    F: FnMut(&WmpEvent) -> Option<T>,
{
    let outcome = tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(TransportEvent::Message(event)) => {
                    if let Some(value) = matcher(&event) {
                        return Ok(value);
                    }
                }
                Ok(TransportEvent::Error(reason)) => {
                    return Err(WmpError::connection(format!(
                        "transport error while waiting for {what}: {reason}"
                    )));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber for {} lagged, {} events skipped", what, skipped);
                }
                Err(RecvError::Closed) => {
                    return Err(WmpError::shutdown(format!(
                        "transport closed its event channel while waiting for {what}"
                    )));
                }
            }
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => {
            debug!("No {} within {:?}", what, timeout);
            Err(WmpError::timeout(format!("no {what} within {timeout:?}")))
        }
    }
}

/// Matcher for `ACK`
pub fn ack(event: &WmpEvent) -> Option<()> {
    matches!(event, WmpEvent::Ack).then_some(())
}

/// Matcher for the payload of an `ID:` line
pub fn identify(event: &WmpEvent) -> Option<String> {
    match event {
        WmpEvent::Identify(payload) => Some(payload.clone()),
        _ => None,
    }
}
