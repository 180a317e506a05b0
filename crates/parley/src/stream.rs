//! Decoding of streamed replies.
//!
//! A streamed reply arrives as named server-sent event frames. Each frame is decoded
//! into a [`StreamEvent`] and forwarded in arrival order on a bounded channel, while
//! failures go to a separate unbounded channel. One task owns both senders, so the
//! channels close exactly once when that task ends, whatever the reason.
//!
//! Cancelling the token closes the connection and ends the task without reporting an
//! error. A connection that ends before `message_stop` without cancellation is
//! reported as a [`TransportError`].
pub mod fold;

use std::error::Error as StdError;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{MarshalingError, ParleyError, ParleyResult, TransportError};
use crate::models::content::ContentBlock;
use crate::models::message::{Message, StopReason};
use crate::models::usage::Usage;
use crate::request::GenerationRequest;
use crate::transport::Transport;

/// Events buffered before the producer waits for the caller
pub const EVENT_BUFFER: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStart {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlockStart {
    pub index: usize,
    pub content_block: ContentBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlockDelta {
    pub index: usize,
    pub delta: ContentDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentBlockStop {
    #[serde(default)]
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub delta: MessageDeltaBody,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: ApiErrorBody,
}

/// One decoded frame of a streamed reply
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart(MessageStart),
    ContentBlockStart(ContentBlockStart),
    ContentBlockDelta(ContentBlockDelta),
    ContentBlockStop(ContentBlockStop),
    MessageDelta(MessageDelta),
    MessageStop,
    Error(ErrorFrame),
    Ping,
}

impl StreamEvent {
    /// The SSE event name this event arrives under
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart(_) => "message_start",
            StreamEvent::ContentBlockStart(_) => "content_block_start",
            StreamEvent::ContentBlockDelta(_) => "content_block_delta",
            StreamEvent::ContentBlockStop(_) => "content_block_stop",
            StreamEvent::MessageDelta(_) => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Error(_) => "error",
            StreamEvent::Ping => "ping",
        }
    }
}

// Body of frames that carry nothing we use
#[derive(Deserialize)]
struct Ack {}

fn parse<T: DeserializeOwned>(event: &str, data: &str) -> Result<T, MarshalingError> {
    serde_json::from_str(data).map_err(|source| MarshalingError::Frame {
        event: event.to_string(),
        source,
    })
}

/// Decode one frame by its event name. Names this client does not know give
/// `Ok(None)`.
pub fn decode_frame(event: &str, data: &str) -> Result<Option<StreamEvent>, MarshalingError> {
    let decoded = match event {
        "message_start" => StreamEvent::MessageStart(parse(event, data)?),
        "content_block_start" => StreamEvent::ContentBlockStart(parse(event, data)?),
        "content_block_delta" => StreamEvent::ContentBlockDelta(parse(event, data)?),
        // Acknowledged and dropped like ping, so its body is never required
        "content_block_stop" => {
            StreamEvent::ContentBlockStop(serde_json::from_str(data).unwrap_or_default())
        }
        "message_delta" => StreamEvent::MessageDelta(parse(event, data)?),
        "message_stop" => {
            parse::<Ack>(event, data)?;
            StreamEvent::MessageStop
        }
        "error" => StreamEvent::Error(parse(event, data)?),
        "ping" => StreamEvent::Ping,
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

/// The two receiving ends of a stream
#[derive(Debug)]
pub struct StreamResults {
    pub events: mpsc::Receiver<StreamEvent>,
    pub errors: mpsc::UnboundedReceiver<ParleyError>,
}

impl StreamResults {
    /// A fresh pair of channels and the sink that feeds them
    pub fn channel() -> (ChannelSink, StreamResults) {
        let (event_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (error_tx, errors) = mpsc::unbounded_channel();
        (
            ChannelSink {
                events: event_tx,
                errors: error_tx,
            },
            StreamResults { events, errors },
        )
    }

    /// Drain both channels until both have closed
    pub async fn collect(mut self) -> (Vec<StreamEvent>, Vec<ParleyError>) {
        let mut events = Vec::new();
        let mut errors = Vec::new();
        let mut events_open = true;
        let mut errors_open = true;

        while events_open || errors_open {
            tokio::select! {
                event = self.events.recv(), if events_open => match event {
                    Some(event) => events.push(event),
                    None => events_open = false,
                },
                error = self.errors.recv(), if errors_open => match error {
                    Some(error) => errors.push(error),
                    None => errors_open = false,
                },
            }
        }
        (events, errors)
    }
}

/// Where the decoder delivers what it reads
#[async_trait]
pub trait EventSink: Send {
    /// Deliver one event. Returns false once nobody is listening.
    async fn event(&mut self, event: StreamEvent) -> bool;

    fn error(&mut self, error: ParleyError);
}

#[derive(Debug)]
pub struct ChannelSink {
    events: mpsc::Sender<StreamEvent>,
    errors: mpsc::UnboundedSender<ParleyError>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn event(&mut self, event: StreamEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    fn error(&mut self, error: ParleyError) {
        if let Err(err) = self.errors.send(error) {
            tracing::debug!("error dropped, receiver is gone: {}", err.0);
        }
    }
}

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `message_stop` was delivered
    Completed,
    /// The token was cancelled
    Cancelled,
    /// A terminal error was reported
    Failed,
    /// The event receiver was dropped
    Abandoned,
}

/// Check and encode a request for streaming
pub fn prepare(request: &GenerationRequest) -> ParleyResult<Vec<u8>> {
    request.preflight()?;
    serde_json::to_vec(request).map_err(|err| MarshalingError::Input(err).into())
}

/// Start streaming a reply on a background task.
///
/// A request that fails the pre-flight checks yields a single error and closed
/// channels, without connecting.
pub fn stream(
    transport: Transport,
    mut request: GenerationRequest,
    token: CancellationToken,
) -> StreamResults {
    let (mut sink, results) = StreamResults::channel();
    request.stream = true;

    let body = match prepare(&request) {
        Ok(body) => body,
        Err(err) => {
            tracing::debug!("stream request rejected: {}", err);
            sink.error(err);
            return results;
        }
    };

    tokio::spawn(async move {
        let outcome = run(&transport, body, &token, &mut sink).await;
        tracing::debug!(?outcome, "stream finished");
    });
    results
}

/// Connect and decode until the stream ends
pub async fn run<S: EventSink>(
    transport: &Transport,
    body: Vec<u8>,
    token: &CancellationToken,
    sink: &mut S,
) -> StreamOutcome {
    let response = tokio::select! {
        biased;
        _ = token.cancelled() => {
            tracing::debug!("stream cancelled while connecting");
            return StreamOutcome::Cancelled;
        }
        response = transport.open_stream(body) => response,
    };

    match response {
        Ok(response) => pump(response.bytes_stream(), token, sink).await,
        Err(_) if token.is_cancelled() => StreamOutcome::Cancelled,
        Err(err) => {
            sink.error(err.into());
            StreamOutcome::Failed
        }
    }
}

/// Decode an SSE byte stream into events on `sink`
pub async fn pump<B, T, E, S>(bytes: B, token: &CancellationToken, sink: &mut S) -> StreamOutcome
where
    B: Stream<Item = Result<T, E>>,
    T: AsRef<[u8]>,
    E: StdError + Send + Sync + 'static,
    S: EventSink,
{
    let frames = bytes.eventsource();
    tokio::pin!(frames);
    let mut started = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return StreamOutcome::Cancelled,
            next = frames.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(EventStreamError::Transport(err))) => {
                if token.is_cancelled() {
                    return StreamOutcome::Cancelled;
                }
                tracing::error!("stream read failed: {}", err);
                sink.error(TransportError::Stream(Box::new(err)).into());
                return StreamOutcome::Failed;
            }
            Some(Err(err)) => {
                tracing::warn!("malformed event stream: {}", err);
                sink.error(MarshalingError::EventStream(err.to_string()).into());
                continue;
            }
            None => {
                if token.is_cancelled() {
                    return StreamOutcome::Cancelled;
                }
                tracing::error!("stream closed before message_stop");
                sink.error(TransportError::UnexpectedEof.into());
                return StreamOutcome::Failed;
            }
        };

        let event = match decode_frame(&frame.event, &frame.data) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::warn!(event = %frame.event, "dropping unknown frame");
                continue;
            }
            Err(err) => {
                tracing::warn!("{}", err);
                sink.error(err.into());
                if frame.event == "message_stop" {
                    return StreamOutcome::Failed;
                }
                continue;
            }
        };

        match &event {
            StreamEvent::Ping | StreamEvent::ContentBlockStop(_) => {
                tracing::trace!(event = event.name(), "acknowledged");
                continue;
            }
            StreamEvent::MessageStart(_) => started = true,
            StreamEvent::Error(_) => {}
            _ if !started => {
                sink.error(
                    MarshalingError::OutOfOrder {
                        event: event.name().to_string(),
                    }
                    .into(),
                );
                continue;
            }
            _ => {}
        }

        let terminal = match &event {
            StreamEvent::Error(frame) => Some(ParleyError::Streaming {
                kind: frame.error.kind.clone(),
                message: frame.error.message.clone(),
            }),
            _ => None,
        };
        let stop = matches!(event, StreamEvent::MessageStop);

        let delivered = tokio::select! {
            biased;
            _ = token.cancelled() => return StreamOutcome::Cancelled,
            delivered = sink.event(event) => delivered,
        };
        if !delivered {
            tracing::debug!("event receiver dropped, closing stream");
            return StreamOutcome::Abandoned;
        }

        if let Some(err) = terminal {
            tracing::error!("{}", err);
            sink.error(err);
            return StreamOutcome::Failed;
        }
        if stop {
            return StreamOutcome::Completed;
        }
    }
}
