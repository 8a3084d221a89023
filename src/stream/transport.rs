//! Stream transports
//!
//! A transport turns a session id into a lazily-connecting stream of decoded
//! events. Connecting happens on first poll, so opening never blocks and
//! dropping the stream releases the connection.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use super::sse::{SseDecoder, SseFrame};
use crate::error::{Error, Result};
use crate::protocol::StreamEvent;

/// Decoded events of one session channel
///
/// `Err` items carrying a malformed payload are recoverable; any other error
/// means the channel is gone. End of stream without a completion event is a
/// disconnect as well.
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Opens server-push channels for sessions
pub trait EventTransport: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &str;

    /// Open a channel for `session_id`. Must not perform I/O until polled.
    fn open(&self, session_id: &str) -> EventStream;
}

// ─────────────────────────────────────────────────────────────────
// SSE body decoding
// ─────────────────────────────────────────────────────────────────

struct SseBody<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<SseFrame>>,
    session_id: String,
    done: bool,
}

/// Decode an `text/event-stream` byte stream into session events
pub fn decode_sse<S, B, E>(session_id: impl Into<String>, body: S) -> impl Stream<Item = Result<StreamEvent>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseBody {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        session_id: session_id.into(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            match st.pending.pop_front() {
                Some(Ok(frame)) => {
                    trace!(session_id = %st.session_id, event = %frame.event, "SSE frame");
                    let item = StreamEvent::decode(&frame.event, &frame.data);
                    return Some((item, st));
                }
                Some(Err(e)) => return Some((Err(e), st)),
                None => {}
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let frames = st.decoder.feed(chunk.as_ref());
                    st.pending.extend(frames);
                }
                Some(Err(e)) => {
                    st.done = true;
                    let err = Error::stream_disconnect(st.session_id.clone(), e.to_string());
                    return Some((Err(err), st));
                }
                None => {
                    st.done = true;
                    st.pending.extend(st.decoder.finish().map(Ok));
                }
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────
// Scripted transport
// ─────────────────────────────────────────────────────────────────

enum Script {
    Fixed(Vec<Result<StreamEvent>>),
    Live(mpsc::UnboundedReceiver<Result<StreamEvent>>),
}

#[derive(Default)]
struct ScriptState {
    scripts: HashMap<String, VecDeque<Script>>,
    opens: HashMap<String, u32>,
}

/// Transport that replays queued scripts, one per `open`
///
/// A channel takes its script when first polled, so a script may be queued
/// after `open` as long as nothing has polled the channel yet. A fixed
/// script ends after its last item, which the subscriber reports as a
/// disconnect unless a completion came first. A live script stays open
/// until its sender is dropped. With no script queued the channel stays
/// silent.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fixed sequence for the next `open` of `session_id`
    pub fn push_script(&self, session_id: &str, items: Vec<Result<StreamEvent>>) {
        self.state
            .lock()
            .scripts
            .entry(session_id.to_string())
            .or_default()
            .push_back(Script::Fixed(items));
    }

    /// Queue a live channel for the next `open` of `session_id`
    pub fn push_live(&self, session_id: &str) -> mpsc::UnboundedSender<Result<StreamEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .scripts
            .entry(session_id.to_string())
            .or_default()
            .push_back(Script::Live(rx));
        tx
    }

    /// How many times `session_id` has been opened
    pub fn open_count(&self, session_id: &str) -> u32 {
        self.state.lock().opens.get(session_id).copied().unwrap_or(0)
    }
}

impl EventTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&self, session_id: &str) -> EventStream {
        *self
            .state
            .lock()
            .opens
            .entry(session_id.to_string())
            .or_insert(0) += 1;

        // the script is taken on first poll, like a real connect
        let state = self.state.clone();
        let session_id = session_id.to_string();
        stream::once(async move {
            let script = state
                .lock()
                .scripts
                .get_mut(&session_id)
                .and_then(|queue| queue.pop_front());

            match script {
                Some(Script::Fixed(items)) => stream::iter(items).boxed(),
                Some(Script::Live(rx)) => UnboundedReceiverStream::new(rx).boxed(),
                None => stream::pending().boxed(),
            }
        })
        .flatten()
        .boxed()
    }
}
