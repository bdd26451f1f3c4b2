//! SSE transport for a single run
//!
//! Reads an [`EventSource`] in a background task and forwards typed events,
//! tagged with their stream generation, to the runner.

use futures::StreamExt;
use reqwest_eventsource::{Error as SseError, Event, EventSource};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::is_usage_limit_text;
use crate::stream::events::StreamEvent;

/// What the pump observed on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpMessage {
    Event(StreamEvent),
    /// The connection failed or ended before `end`/`stream-error`
    Disconnected { detail: String, usage_limit: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEnvelope {
    pub generation: u64,
    pub message: PumpMessage,
}

/// Owner of the background read task for one stream.
///
/// Dropping or closing the handle stops the task and the HTTP connection.
#[derive(Debug)]
pub struct StreamHandle {
    generation: u64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Start pumping `source` into `tx`
    pub fn spawn(
        generation: u64,
        source: EventSource,
        tx: mpsc::UnboundedSender<StreamEnvelope>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(generation, source, cancel.clone(), tx));
        Self {
            generation,
            cancel,
            task: Some(task),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop reading; nothing further is forwarded for this generation
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.task.take();
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump(
    generation: u64,
    mut source: EventSource,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<StreamEnvelope>,
) {
    let send = |message: PumpMessage| {
        tx.send(StreamEnvelope {
            generation,
            message,
        })
        .is_ok()
    };

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(generation, "Stream closed by client");
                source.close();
                return;
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(Event::Open)) => {
                tracing::debug!(generation, "Stream opened");
            }
            Some(Ok(Event::Message(message))) => {
                let Some(event) = StreamEvent::from_sse(&message.event, &message.data) else {
                    continue;
                };
                let terminal = event.is_terminal();
                if !send(PumpMessage::Event(event)) || terminal {
                    source.close();
                    return;
                }
            }
            Some(Err(SseError::InvalidStatusCode(status, response))) => {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(generation, %status, "Stream rejected by server");
                let detail = if body.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    body
                };
                send(PumpMessage::Disconnected {
                    usage_limit: is_usage_limit_text(&detail),
                    detail,
                });
                source.close();
                return;
            }
            Some(Err(err)) => {
                let detail = match &err {
                    SseError::StreamEnded => "Connection interrupted".to_string(),
                    other => other.to_string(),
                };
                tracing::warn!(generation, error = %detail, "Stream transport error");
                send(PumpMessage::Disconnected {
                    usage_limit: is_usage_limit_text(&detail),
                    detail,
                });
                source.close();
                return;
            }
            None => {
                send(PumpMessage::Disconnected {
                    detail: "Connection interrupted".to_string(),
                    usage_limit: false,
                });
                return;
            }
        }
    }
}
