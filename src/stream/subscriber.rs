//! Per-session channel registry
//!
//! [`StreamSubscriber`] holds at most one live channel per session id and
//! multiplexes all of them into a single queue of [`StreamNotice`]s. It never
//! retries: a dropped channel is reported once and released, and the owner
//! decides what happens next.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio_stream::StreamMap;
use tracing::{debug, info, warn};

use super::transport::{EventStream, EventTransport};
use crate::error::{Error, ErrorCode};
use crate::protocol::StreamEvent;

/// Lifecycle of one session's subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No channel and nothing to report
    Unsubscribed,
    /// Channel open
    Subscribed,
    /// Completion received, channel released
    Terminal,
    /// Channel dropped, released
    Errored,
}

/// One item from the notice queue
#[derive(Debug)]
pub enum StreamNotice {
    /// A decoded event, forwarded verbatim
    Event(StreamEvent),
    /// The session completed and its channel has been closed
    Completed,
    /// The channel dropped before completion and has been released
    Disconnected(Error),
}

impl StreamNotice {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamNotice::Completed | StreamNotice::Disconnected(_))
    }
}

/// Registry of live session channels
pub struct StreamSubscriber {
    transport: Arc<dyn EventTransport>,
    channels: StreamMap<String, BoxStream<'static, StreamNotice>>,
    states: HashMap<String, SubscriptionState>,
    queued: VecDeque<(String, StreamNotice)>,
}

impl StreamSubscriber {
    /// Create an empty registry over `transport`
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self {
            transport,
            channels: StreamMap::new(),
            states: HashMap::new(),
            queued: VecDeque::new(),
        }
    }

    /// Open a channel for `session_id`, closing any existing one first
    pub fn subscribe(&mut self, session_id: &str) {
        if self.channels.remove(session_id).is_some() {
            debug!(session_id, "Replacing existing stream channel");
        }
        self.queued.retain(|(id, _)| id != session_id);

        let events = self.transport.open(session_id);
        self.channels
            .insert(session_id.to_string(), adapt(session_id.to_string(), events));
        self.states
            .insert(session_id.to_string(), SubscriptionState::Subscribed);

        info!(session_id, transport = self.transport.name(), "Subscribed to session stream");
    }

    /// Release the channel for `session_id`. No-op when none is open.
    pub fn unsubscribe(&mut self, session_id: &str) -> bool {
        let had_channel = self.channels.remove(session_id).is_some();
        self.states.remove(session_id);
        self.queued.retain(|(id, _)| id != session_id);
        if had_channel {
            debug!(session_id, "Unsubscribed from session stream");
        }
        had_channel
    }

    /// Release every channel
    pub fn close_all(&mut self) {
        let count = self.channels.len();
        self.channels.clear();
        self.states.clear();
        self.queued.clear();
        if count > 0 {
            info!(count, "Closed all session streams");
        }
    }

    /// Current state of `session_id`
    pub fn state(&self, session_id: &str) -> SubscriptionState {
        if self.channels.contains_key(session_id) {
            return SubscriptionState::Subscribed;
        }
        self.states
            .get(session_id)
            .copied()
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.channels.contains_key(session_id)
    }

    /// Number of live channels
    pub fn live_count(&self) -> usize {
        self.channels.len()
    }

    /// Whether there is anything left to deliver
    pub fn is_idle(&self) -> bool {
        self.channels.is_empty() && self.queued.is_empty()
    }

    /// Next notice from any channel, `None` when idle
    ///
    /// Cancel safe. A completion event is followed by `Completed`; by the time
    /// either terminal notice is returned the channel has been released.
    pub async fn next(&mut self) -> Option<(String, StreamNotice)> {
        if let Some(item) = self.queued.pop_front() {
            return Some(item);
        }

        let (session_id, notice) = self.channels.next().await?;
        match &notice {
            StreamNotice::Event(event) if event.is_completion() => {
                self.release(&session_id, SubscriptionState::Terminal);
                self.queued.push_back((session_id.clone(), StreamNotice::Completed));
            }
            StreamNotice::Disconnected(err) => {
                warn!(session_id = %session_id, error = %err, "Session stream disconnected");
                self.release(&session_id, SubscriptionState::Errored);
            }
            _ => {}
        }
        Some((session_id, notice))
    }

    fn release(&mut self, session_id: &str, state: SubscriptionState) {
        self.channels.remove(session_id);
        self.states.insert(session_id.to_string(), state);
    }
}

impl Drop for StreamSubscriber {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Map transport items onto notices, ending with a disconnect at EOF
fn adapt(session_id: String, events: EventStream) -> BoxStream<'static, StreamNotice> {
    let eof_id = session_id.clone();
    events
        .filter_map(move |item| {
            let notice = match item {
                Ok(StreamEvent::Unknown { name }) => {
                    debug!(session_id = %session_id, event = %name, "Ignoring unknown stream event");
                    None
                }
                Ok(event) => Some(StreamNotice::Event(event)),
                Err(e) if e.code() == ErrorCode::PayloadMalformed => {
                    warn!(session_id = %session_id, error = %e, "Dropping malformed stream event");
                    None
                }
                Err(e) => Some(StreamNotice::Disconnected(e)),
            };
            future::ready(notice)
        })
        .chain(stream::once(future::lazy(move |_| {
            StreamNotice::Disconnected(Error::stream_disconnect(eof_id, "stream closed by server"))
        })))
        .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::protocol::SessionSummary;
    use crate::stream::transport::ScriptedTransport;

    struct LiveGuard(Arc<AtomicUsize>);

    impl LiveGuard {
        fn new(count: &Arc<AtomicUsize>) -> Self {
            count.fetch_add(1, Ordering::SeqCst);
            Self(count.clone())
        }
    }

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Transport whose channels hold a guard counting live connections
    struct CountingTransport {
        live: Arc<AtomicUsize>,
        opens: AtomicUsize,
    }

    impl EventTransport for CountingTransport {
        fn name(&self) -> &str {
            "counting"
        }

        fn open(&self, _session_id: &str) -> EventStream {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let guard = LiveGuard::new(&self.live);
            stream::pending::<crate::error::Result<StreamEvent>>()
                .map(move |item| {
                    let _held = &guard;
                    item
                })
                .boxed()
        }
    }

    fn counting() -> (Arc<CountingTransport>, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(CountingTransport {
            live: live.clone(),
            opens: AtomicUsize::new(0),
        });
        (transport, live)
    }

    fn summary() -> SessionSummary {
        SessionSummary {
            summary_text: "done".to_string(),
            key_insights: vec![],
            sentiment_distribution: Default::default(),
        }
    }

    #[test]
    fn test_double_subscribe_keeps_one_channel() {
        let (transport, live) = counting();
        let mut subscriber = StreamSubscriber::new(transport.clone());

        subscriber.subscribe("s-1");
        subscriber.subscribe("s-1");

        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(subscriber.live_count(), 1);
    }

    #[test]
    fn test_unsubscribe_releases_synchronously() {
        let (transport, live) = counting();
        let mut subscriber = StreamSubscriber::new(transport);

        subscriber.subscribe("s-1");
        subscriber.subscribe("s-2");
        assert_eq!(live.load(Ordering::SeqCst), 2);

        assert!(subscriber.unsubscribe("s-1"));
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert!(!subscriber.unsubscribe("s-1"));
        assert!(!subscriber.unsubscribe("never"));
        assert_eq!(subscriber.state("s-1"), SubscriptionState::Unsubscribed);
        assert_eq!(subscriber.state("s-2"), SubscriptionState::Subscribed);
    }

    #[test]
    fn test_drop_closes_every_channel() {
        let (transport, live) = counting();
        let mut subscriber = StreamSubscriber::new(transport);
        for id in ["a", "b", "c"] {
            subscriber.subscribe(id);
        }
        assert_eq!(live.load(Ordering::SeqCst), 3);

        drop(subscriber);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completion_is_forwarded_then_closes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_script(
            "s-1",
            vec![
                Ok(StreamEvent::Error { message: "partial".to_string() }),
                Ok(StreamEvent::Unknown { name: "heartbeat".to_string() }),
                Err(Error::malformed("bad json")),
                Ok(StreamEvent::SessionCompleted { summary: Some(summary()) }),
            ],
        );
        let mut subscriber = StreamSubscriber::new(transport);
        subscriber.subscribe("s-1");

        let (_, first) = subscriber.next().await.unwrap();
        assert!(matches!(first, StreamNotice::Event(StreamEvent::Error { .. })));
        assert_eq!(subscriber.state("s-1"), SubscriptionState::Subscribed);

        let (_, second) = subscriber.next().await.unwrap();
        assert!(matches!(second, StreamNotice::Event(StreamEvent::SessionCompleted { .. })));
        assert_eq!(subscriber.state("s-1"), SubscriptionState::Terminal);

        let (id, third) = subscriber.next().await.unwrap();
        assert_eq!(id, "s-1");
        assert!(matches!(third, StreamNotice::Completed));
        assert!(subscriber.is_idle());
        assert!(subscriber.next().await.is_none());
    }

    #[tokio::test]
    async fn test_eof_before_completion_is_disconnect() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_script("s-1", vec![]);
        let mut subscriber = StreamSubscriber::new(transport);
        subscriber.subscribe("s-1");

        let (_, notice) = subscriber.next().await.unwrap();
        match notice {
            StreamNotice::Disconnected(err) => assert!(err.is_retryable()),
            other => panic!("unexpected notice {:?}", other),
        }
        assert_eq!(subscriber.state("s-1"), SubscriptionState::Errored);
        assert_eq!(subscriber.live_count(), 0);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_script("broken", vec![]);
        let healthy = transport.push_live("healthy");
        let mut subscriber = StreamSubscriber::new(transport);
        subscriber.subscribe("broken");
        subscriber.subscribe("healthy");

        let (id, notice) = subscriber.next().await.unwrap();
        assert_eq!(id, "broken");
        assert!(notice.is_terminal());

        healthy
            .send(Ok(StreamEvent::SessionCompleted { summary: None }))
            .unwrap();
        let (id, _) = subscriber.next().await.unwrap();
        assert_eq!(id, "healthy");
        assert_eq!(subscriber.state("broken"), SubscriptionState::Errored);
    }

    #[test]
    fn test_next_waits_on_a_quiet_channel() {
        let transport = Arc::new(ScriptedTransport::new());
        let tx = transport.push_live("quiet");
        let mut subscriber = StreamSubscriber::new(transport);
        subscriber.subscribe("quiet");

        let mut next = tokio_test::task::spawn(subscriber.next());
        tokio_test::assert_pending!(next.poll());

        tx.send(Ok(StreamEvent::SessionCompleted { summary: None }))
            .unwrap();
        assert!(next.is_woken());
        let (id, notice) = tokio_test::assert_ready!(next.poll()).unwrap();
        assert_eq!(id, "quiet");
        assert!(matches!(notice, StreamNotice::Event(_)));
    }
}
