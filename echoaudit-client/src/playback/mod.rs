//! Playback controller
//!
//! At most one recording plays at a time. Toggling the playing recording
//! stops it; toggling another one stops the current stream before the new
//! one starts. Starts are serialized; a start that was overtaken by a newer
//! toggle while it was opening is stopped again immediately.

mod sink;

pub use sink::{ActiveStream, AudioSink, CommandSink};

use crate::error::PlaybackError;
use chrono::Utc;
use echoaudit_common::events::{EchoEvent, EventBus};
use echoaudit_common::CallKey;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of `PlaybackController::toggle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    /// The requested recording is now playing
    Started,
    /// The requested recording was playing and has been stopped
    Stopped,
    /// A start for the same recording is already pending
    Ignored,
    /// A newer toggle took over before this one finished starting
    Superseded,
}

struct Playing {
    call: CallKey,
    stop: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct PlaybackState {
    active: Option<Playing>,
    pending: Option<CallKey>,
    generation: u64,
}

struct Shared {
    state: Mutex<PlaybackState>,
    active_tx: watch::Sender<Option<CallKey>>,
    events: EventBus,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop `playing` and announce it; the caller already removed it from state
    fn stopped(&self, playing: Playing, finished: bool) {
        playing.stop.cancel();
        self.active_tx.send_replace(None);
        info!(call = %playing.call, finished, "Playback stopped");
        self.events.emit_lossy(EchoEvent::PlaybackStopped {
            call: playing.call,
            finished,
            timestamp: Utc::now(),
        });
    }
}

pub struct PlaybackController {
    sink: Arc<dyn AudioSink>,
    shared: Arc<Shared>,
    transition: tokio::sync::Mutex<()>,
}

impl PlaybackController {
    pub fn new(sink: Arc<dyn AudioSink>, events: EventBus) -> Self {
        let (active_tx, _) = watch::channel(None);
        Self {
            sink,
            shared: Arc::new(Shared {
                state: Mutex::new(PlaybackState::default()),
                active_tx,
                events,
            }),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Recording currently playing
    pub fn active(&self) -> Option<CallKey> {
        self.shared.lock().active.as_ref().map(|p| p.call.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CallKey>> {
        self.shared.active_tx.subscribe()
    }

    /// Play `call`, or stop it if it is the one playing
    pub async fn toggle(&self, call: CallKey) -> Result<Toggle, PlaybackError> {
        let generation = {
            let mut state = self.shared.lock();
            if state.pending.as_ref() == Some(&call) {
                debug!(call = %call, "Start already pending");
                return Ok(Toggle::Ignored);
            }
            if state.active.as_ref().is_some_and(|p| p.call == call) {
                let playing = state.active.take();
                drop(state);
                if let Some(playing) = playing {
                    self.shared.stopped(playing, false);
                }
                return Ok(Toggle::Stopped);
            }
            state.generation += 1;
            state.pending = Some(call.clone());
            state.generation
        };

        let _transition = self.transition.lock().await;

        // Stop whatever plays now, unless a newer toggle already took over
        let previous = {
            let mut state = self.shared.lock();
            if state.generation != generation {
                return Ok(Toggle::Superseded);
            }
            state.active.take()
        };
        if let Some(playing) = previous {
            self.shared.stopped(playing, false);
        }

        let started = self.sink.start(&call).await;

        let mut state = self.shared.lock();
        let current = state.generation == generation;
        if current {
            state.pending = None;
        }
        let (stop, finished) = started?.into_parts();
        if !current {
            drop(state);
            stop.cancel();
            debug!(call = %call, "Start overtaken by a newer toggle");
            return Ok(Toggle::Superseded);
        }

        state.active = Some(Playing {
            call: call.clone(),
            stop,
            generation,
        });
        drop(state);

        self.shared.active_tx.send_replace(Some(call.clone()));
        info!(call = %call, "Playback started");
        self.shared.events.emit_lossy(EchoEvent::PlaybackStarted {
            call,
            timestamp: Utc::now(),
        });

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let _ = finished.await;
            let ended = {
                let mut state = shared.lock();
                match &state.active {
                    Some(p) if p.generation == generation => state.active.take(),
                    _ => None,
                }
            };
            if let Some(playing) = ended {
                shared.stopped(playing, true);
            }
        });

        Ok(Toggle::Started)
    }

    /// Stop whatever is playing
    pub fn stop(&self) -> Option<CallKey> {
        let playing = self.shared.lock().active.take()?;
        let call = playing.call.clone();
        self.shared.stopped(playing, false);
        Some(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use echoaudit_common::AgentKey;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct FakeStream {
        filename: String,
        stop: CancellationToken,
        end: Option<oneshot::Sender<()>>,
    }

    /// Streams end only when stopped or ended by the test
    #[derive(Default)]
    struct FakeSink {
        streams: Mutex<Vec<FakeStream>>,
        start_delay: Option<Duration>,
    }

    impl FakeSink {
        fn started(&self) -> Vec<String> {
            let streams = self.streams.lock().unwrap();
            streams.iter().map(|s| s.filename.clone()).collect()
        }

        fn is_stopped(&self, filename: &str) -> bool {
            let streams = self.streams.lock().unwrap();
            streams
                .iter()
                .filter(|s| s.filename == filename)
                .all(|s| s.stop.is_cancelled())
        }

        /// End the stream of `filename` as if the audio ran out
        fn end(&self, filename: &str) {
            let mut streams = self.streams.lock().unwrap();
            for stream in streams.iter_mut().filter(|s| s.filename == filename) {
                if let Some(end) = stream.end.take() {
                    let _ = end.send(());
                }
            }
        }
    }

    #[async_trait]
    impl AudioSink for FakeSink {
        async fn start(&self, call: &CallKey) -> Result<ActiveStream, PlaybackError> {
            if let Some(delay) = self.start_delay {
                tokio::time::sleep(delay).await;
            }
            let stop = CancellationToken::new();
            let (end, finished) = oneshot::channel();
            self.streams.lock().unwrap().push(FakeStream {
                filename: call.filename.clone(),
                stop: stop.clone(),
                end: Some(end),
            });
            Ok(ActiveStream::new(stop, finished))
        }
    }

    fn call(filename: &str) -> CallKey {
        AgentKey::new("2024-05-06_2024-05-12", "UN", "Volkov_Ivan").call(filename)
    }

    #[tokio::test]
    async fn starting_another_call_stops_the_active_one() {
        // Given: y.mp3 is playing
        let sink = Arc::new(FakeSink::default());
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let controller = PlaybackController::new(sink.clone(), bus);
        assert_eq!(controller.toggle(call("y.mp3")).await.unwrap(), Toggle::Started);

        // When: x.mp3 is toggled
        assert_eq!(controller.toggle(call("x.mp3")).await.unwrap(), Toggle::Started);

        // Then: y was stopped before x started
        assert!(sink.is_stopped("y.mp3"));
        assert!(!sink.is_stopped("x.mp3"));
        assert_eq!(controller.active(), Some(call("x.mp3")));
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event.to_string());
        }
        assert_eq!(seen, vec!["Playing y.mp3", "Stopped y.mp3", "Playing x.mp3"]);
    }

    #[tokio::test]
    async fn toggling_the_active_call_stops_it() {
        let sink = Arc::new(FakeSink::default());
        let controller = PlaybackController::new(sink.clone(), EventBus::new(16));

        controller.toggle(call("x.mp3")).await.unwrap();
        assert_eq!(controller.toggle(call("x.mp3")).await.unwrap(), Toggle::Stopped);

        assert_eq!(controller.active(), None);
        assert!(sink.is_stopped("x.mp3"));
        assert_eq!(sink.started(), vec!["x.mp3"]);
    }

    #[tokio::test]
    async fn end_of_stream_clears_active() {
        let sink = Arc::new(FakeSink::default());
        let controller = PlaybackController::new(sink.clone(), EventBus::new(16));
        let mut active = controller.subscribe();

        controller.toggle(call("x.mp3")).await.unwrap();
        active.borrow_and_update();
        sink.end("x.mp3");

        tokio::time::timeout(Duration::from_secs(1), active.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*active.borrow(), None);
        assert_eq!(controller.active(), None);
    }

    #[tokio::test]
    async fn late_end_of_a_replaced_stream_is_ignored() {
        let sink = Arc::new(FakeSink::default());
        let controller = PlaybackController::new(sink.clone(), EventBus::new(16));

        controller.toggle(call("y.mp3")).await.unwrap();
        controller.toggle(call("x.mp3")).await.unwrap();
        sink.end("y.mp3");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(controller.active(), Some(call("x.mp3")));
    }

    #[tokio::test]
    async fn repeated_toggle_while_starting_is_ignored() {
        let sink = Arc::new(FakeSink {
            start_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let controller = Arc::new(PlaybackController::new(sink.clone(), EventBus::new(16)));

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.toggle(call("x.mp3")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = controller.toggle(call("x.mp3")).await.unwrap();

        assert_eq!(second, Toggle::Ignored);
        assert_eq!(first.await.unwrap().unwrap(), Toggle::Started);
        assert_eq!(sink.started(), vec!["x.mp3"]);
    }

    #[tokio::test]
    async fn newer_toggle_supersedes_a_pending_start() {
        let sink = Arc::new(FakeSink {
            start_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let controller = Arc::new(PlaybackController::new(sink.clone(), EventBus::new(16)));

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.toggle(call("x.mp3")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = controller.toggle(call("y.mp3")).await.unwrap();

        assert_eq!(first.await.unwrap().unwrap(), Toggle::Superseded);
        assert_eq!(second, Toggle::Started);
        assert!(sink.is_stopped("x.mp3"));
        assert_eq!(controller.active(), Some(call("y.mp3")));
    }

    #[tokio::test]
    async fn stop_clears_active() {
        let sink = Arc::new(FakeSink::default());
        let controller = PlaybackController::new(sink.clone(), EventBus::new(16));

        assert_eq!(controller.stop(), None);
        controller.toggle(call("x.mp3")).await.unwrap();

        assert_eq!(controller.stop(), Some(call("x.mp3")));
        assert_eq!(controller.active(), None);
    }
}
