//! Fakes del lado de voz/resolución para probar sesiones sin Discord.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, Notify};

use super::{
    session::{SessionDeps, SessionHandle, SessionSettings},
    sink::{AudioSink, PlaybackEvent, PlaybackNotifier, StreamHandle, TrackEndSignal, VoiceConnector},
};
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::{Locator, ResolvedTrack, TrackResolver},
};

pub const GUILD: GuildId = GuildId::new(1);
pub const CHANNEL_A: ChannelId = ChannelId::new(10);
pub const CHANNEL_B: ChannelId = ChannelId::new(11);
pub const TEXT_CHANNEL: ChannelId = ChannelId::new(20);

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

pub fn locator(raw: &str) -> Locator {
    Locator::parse(raw).unwrap()
}

/// Resuelve cualquier locator a un track con el mismo título, salvo fallos o
/// compuertas configuradas.
#[derive(Default)]
pub struct FakeResolver {
    failures: Mutex<HashMap<String, String>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    calls: Mutex<Vec<String>>,
    called: Notify,
}

impl FakeResolver {
    pub fn fail(&self, raw: &str, reason: &str) {
        self.failures.lock().insert(raw.to_string(), reason.to_string());
    }

    /// La resolución de `raw` queda bloqueada hasta enviar por el sender devuelto.
    pub fn gate(&self, raw: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(raw.to_string(), rx);
        tx
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub async fn wait_for_call(&self, raw: &str) {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.called.notified();
                if self.calls.lock().iter().any(|c| c == raw) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("resolver was never called");
    }
}

#[async_trait]
impl TrackResolver for FakeResolver {
    async fn resolve(&self, locator: &Locator) -> PlaybackResult<ResolvedTrack> {
        let raw = locator.as_str().to_string();
        self.calls.lock().push(raw.clone());
        self.called.notify_waiters();

        let gate = self.gates.lock().remove(&raw);
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if let Some(reason) = self.failures.lock().get(&raw) {
            return Err(PlaybackError::Resolution(reason.clone()));
        }

        Ok(ResolvedTrack::new(raw.clone(), format!("https://cdn.test/{}", raw)))
    }
}

#[derive(Default)]
pub struct FakeStreamState {
    volume: Mutex<f32>,
    stopped: AtomicBool,
}

impl FakeStreamState {
    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct FakeStream(Arc<FakeStreamState>);

impl StreamHandle for FakeStream {
    fn set_volume(&self, volume: f32) -> PlaybackResult<()> {
        *self.0.volume.lock() = volume;
        Ok(())
    }

    fn stop(&self) {
        self.0.stopped.store(true, Ordering::SeqCst);
    }
}

/// Un stream arrancado por el [`FakeSink`].
pub struct Started {
    pub title: String,
    pub volume: f32,
    pub signal: TrackEndSignal,
    pub stream: Arc<FakeStreamState>,
}

pub struct FakeSink {
    started: mpsc::UnboundedSender<Started>,
    reject_next: AtomicBool,
}

impl FakeSink {
    pub fn reject_next_play(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play(
        &self,
        track: &ResolvedTrack,
        volume: f32,
        on_end: TrackEndSignal,
    ) -> PlaybackResult<Box<dyn StreamHandle>> {
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(PlaybackError::Sink("stream rejected".to_string()));
        }

        let stream = Arc::new(FakeStreamState {
            volume: Mutex::new(volume),
            stopped: AtomicBool::new(false),
        });

        let _ = self.started.send(Started {
            title: track.title.clone(),
            volume,
            signal: on_end,
            stream: stream.clone(),
        });

        Ok(Box::new(FakeStream(stream)))
    }
}

pub struct FakeVoice {
    sink: Arc<FakeSink>,
    joins: Mutex<Vec<ChannelId>>,
    leaves: AtomicUsize,
    fail_join: AtomicBool,
    fail_leave: AtomicBool,
}

impl FakeVoice {
    pub fn sink(&self) -> &FakeSink {
        &self.sink
    }

    pub fn joins(&self) -> Vec<ChannelId> {
        self.joins.lock().clone()
    }

    pub fn leaves(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    pub fn fail_join(&self) {
        self.fail_join.store(true, Ordering::SeqCst);
    }

    pub fn fail_leave(&self) {
        self.fail_leave.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceConnector for FakeVoice {
    async fn join(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlaybackResult<Arc<dyn AudioSink>> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(PlaybackError::VoiceConnect("missing permissions".to_string()));
        }

        self.joins.lock().push(channel_id);
        Ok(self.sink.clone())
    }

    async fn leave(&self, _guild_id: GuildId) -> PlaybackResult<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        if self.fail_leave.load(Ordering::SeqCst) {
            return Err(PlaybackError::VoiceConnect("gateway closed".to_string()));
        }
        Ok(())
    }
}

pub struct FakeNotifier {
    history: Mutex<Vec<PlaybackEvent>>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl PlaybackNotifier for FakeNotifier {
    fn announce(&self, _guild_id: GuildId, _channel_id: ChannelId, event: PlaybackEvent) {
        self.history.lock().push(event.clone());
        let _ = self.events.send(event);
    }
}

/// Fakes conectados entre sí más los extremos de lectura para los tests.
pub struct Fakes {
    pub deps: SessionDeps,
    pub resolver: Arc<FakeResolver>,
    pub voice: Arc<FakeVoice>,
    pub notifier: Arc<FakeNotifier>,
    pub started: mpsc::UnboundedReceiver<Started>,
    pub events: mpsc::UnboundedReceiver<PlaybackEvent>,
}

impl Fakes {
    pub fn new(resolver: Option<Arc<dyn TrackResolver>>) -> Self {
        let (started_tx, started) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let fake_resolver = Arc::new(FakeResolver::default());
        let voice = Arc::new(FakeVoice {
            sink: Arc::new(FakeSink {
                started: started_tx,
                reject_next: AtomicBool::new(false),
            }),
            joins: Mutex::new(Vec::new()),
            leaves: AtomicUsize::new(0),
            fail_join: AtomicBool::new(false),
            fail_leave: AtomicBool::new(false),
        });
        let notifier = Arc::new(FakeNotifier {
            history: Mutex::new(Vec::new()),
            events: events_tx,
        });

        let deps = SessionDeps {
            resolver: resolver.unwrap_or_else(|| fake_resolver.clone()),
            voice: voice.clone(),
            notifier: notifier.clone(),
            settings: SessionSettings {
                default_volume: 1.0,
                max_volume_percent: 200,
                mailbox_size: 16,
            },
        };

        Self {
            deps,
            resolver: fake_resolver,
            voice,
            notifier,
            started,
            events,
        }
    }

    pub async fn next_started(&mut self) -> Started {
        tokio::time::timeout(WAIT, self.started.recv())
            .await
            .expect("no stream was started")
            .expect("sink channel closed")
    }

    pub async fn assert_no_start(&mut self) {
        if let Ok(Some(started)) = tokio::time::timeout(QUIET, self.started.recv()).await {
            panic!("unexpected stream started: {}", started.title);
        }
    }

    pub async fn next_event_matching(
        &mut self,
        predicate: impl Fn(&PlaybackEvent) -> bool,
    ) -> PlaybackEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Some(event) if predicate(&event) => return event,
                    Some(_) => continue,
                    None => panic!("notifier channel closed"),
                }
            }
        })
        .await
        .expect("expected event was never announced")
    }

    /// Todos los eventos anunciados hasta ahora, en orden.
    pub fn events(&self) -> Vec<PlaybackEvent> {
        self.notifier.history.lock().clone()
    }
}

/// Una sesión sobre [`Fakes`].
pub struct Harness {
    pub session: SessionHandle,
    fakes: Fakes,
}

impl std::ops::Deref for Harness {
    type Target = Fakes;

    fn deref(&self) -> &Fakes {
        &self.fakes
    }
}

impl std::ops::DerefMut for Harness {
    fn deref_mut(&mut self) -> &mut Fakes {
        &mut self.fakes
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_resolver(resolver: Arc<dyn TrackResolver>) -> Self {
        Self::build(Some(resolver))
    }

    fn build(resolver: Option<Arc<dyn TrackResolver>>) -> Self {
        let fakes = Fakes::new(resolver);
        let session = SessionHandle::spawn(1, GUILD, fakes.deps.clone());
        Self { session, fakes }
    }

    /// Encola desde un usuario en `CHANNEL_A`, anunciando en `TEXT_CHANNEL`.
    pub async fn enqueue(&self, raw: &str) -> PlaybackResult<usize> {
        self.session
            .enqueue(locator(raw), Some(CHANNEL_A), Some(TEXT_CHANNEL))
            .await
    }
}
