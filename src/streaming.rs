use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::{self, FusedStream};
use futures::{ready, Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::{ModelError, ModelResult};
use crate::models::GenerateContentResponse;
use crate::translate;
use crate::types::ProviderId;
use crate::wire::StreamEvent;

/// A streaming response from a content generator
pub type ResponseStream = Pin<Box<dyn Stream<Item = ModelResult<GenerateContentResponse>> + Send>>;

/// Raw response body as delivered by the transport
pub type ByteStream = Pin<Box<dyn Stream<Item = ModelResult<Bytes>> + Send>>;

type EventBody = Pin<Box<dyn Stream<Item = Result<Event, EventStreamError<ModelError>>> + Send>>;

const DONE_SENTINEL: &str = "[DONE]";

/// Blank line appended after the body so an unterminated last event is still dispatched
const END_OF_BODY: &[u8] = b"\n\n";

/// Fail the body with [`ModelError::Timeout`] when no read arrives within `idle`
pub fn with_idle_timeout(body: ByteStream, idle: Duration) -> ByteStream {
    Box::pin(
        tokio_stream::StreamExt::timeout(body, idle)
            .map(move |read| read.unwrap_or_else(|_| Err(ModelError::Timeout(idle)))),
    )
}

fn parse_event(data: &str) -> ModelResult<Option<GenerateContentResponse>> {
    let event: StreamEvent =
        serde_json::from_str(data).map_err(|e| ModelError::Parse(e.to_string()))?;
    translate::from_stream_event(event)
}

/// Pull-based stream of generation chunks decoded from an SSE body.
///
/// The body is only polled when every decoded chunk has been handed out, so
/// nothing is read ahead of the consumer. The body is dropped as soon as the
/// stream ends for any reason: `[DONE]`, end of body, a transport error, or
/// the consumer dropping the stream.
///
/// An event whose data fails to parse is logged and skipped.
pub struct ChunkStream {
    provider: ProviderId,
    events: Option<EventBody>,
    ready: VecDeque<GenerateContentResponse>,
    terminated: bool,
    discarded: usize,
}

impl ChunkStream {
    pub fn new(provider: ProviderId, body: ByteStream) -> Self {
        let framed = body
            .chain(stream::once(async { Ok(Bytes::from_static(END_OF_BODY)) }))
            .eventsource();
        Self {
            provider,
            events: Some(Box::pin(framed)),
            ready: VecDeque::new(),
            terminated: false,
            discarded: 0,
        }
    }

    /// Number of events dropped because they could not be parsed
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn release(&mut self) {
        if self.events.take().is_some() {
            debug!(provider = %self.provider, "released stream body");
        }
    }

    fn absorb(&mut self, event: Event) {
        let data = event.data.trim_end_matches(['\r', '\n']);
        if data.is_empty() {
            return;
        }
        if data == DONE_SENTINEL {
            self.terminated = true;
            self.release();
            return;
        }
        match parse_event(data) {
            Ok(Some(chunk)) => self.ready.push_back(chunk),
            Ok(None) => {}
            Err(err) => {
                self.discarded += 1;
                warn!(
                    provider = %self.provider,
                    error = %err,
                    "discarding malformed stream event"
                );
            }
        }
    }
}

impl Stream for ChunkStream {
    type Item = ModelResult<GenerateContentResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(chunk) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(chunk)));
            }
            if this.terminated {
                this.release();
                return Poll::Ready(None);
            }
            let Some(events) = this.events.as_mut() else {
                this.terminated = true;
                return Poll::Ready(None);
            };

            // suspends here until the transport delivers the next event
            match ready!(events.as_mut().poll_next(cx)) {
                Some(Ok(event)) => this.absorb(event),
                Some(Err(err)) => {
                    this.terminated = true;
                    this.release();
                    let err = match err {
                        EventStreamError::Transport(err) => err,
                        framing => ModelError::Parse(format!("invalid event stream: {}", framing)),
                    };
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.terminated = true;
                    this.release();
                }
            }
        }
    }
}

impl FusedStream for ChunkStream {
    fn is_terminated(&self) -> bool {
        self.terminated && self.ready.is_empty()
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.release();
    }
}
