//! Session - application state and the recompute scheduler
//!
//! A [`Session`] owns every piece of mutable pipeline state: the score table, the
//! current weights, viewport and filter criteria, and the active chunk set. Each input
//! re-enters the pipeline at its own stage: weights at scoring, the viewport at chunk
//! selection, criteria at filtering.
//!
//! The [`Scheduler`] drives a session from a stream of [`SessionEvent`]s. Events are
//! debounced, then applied together and turned into one [`Frame`] tagged with a
//! generation number. Frames are published through a [`FramePublisher`], which never
//! lets an older generation replace a newer one. [`Scheduler::flush`] applies whatever
//! is queued without waiting out the quiescence interval, so reads that follow it see
//! every event sent before it.

use crate::{
    ActiveSet, ChunkStore, DemandError, FilterCriteria, LoadConfig, RecordKey, Result, Rgb,
    SIDEWALK_COLOR, ScoreTable, ScoredFeature, SharedView, ViewportState, WeightVector,
    ZoomThreshold, budget_for_zoom, color_for_score, sample_for_render, select_active_chunks,
    split_sidewalk_layers,
};
use geo::Coord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Feature budget per zoom level
    pub zoom_thresholds: Vec<ZoomThreshold>,
    /// Hard cap on the number of rendered features
    pub render_ceiling: usize,
    /// Quiescence interval before a burst of events is applied, in milliseconds
    pub debounce_ms: u64,
    /// Partition probing
    pub load: LoadConfig,
    /// Screen size used to derive view bounds from a center and zoom
    pub viewport_pixels: (u32, u32),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zoom_thresholds: ZoomThreshold::defaults(),
            render_ceiling: 50_000,
            debounce_ms: 300,
            load: LoadConfig::default(),
            viewport_pixels: (1920, 1080),
        }
    }
}

impl Config {
    #[inline]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Summary of a session's state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionInfo {
    pub chunk_count: usize,
    pub record_count: usize,
    pub active_chunk_count: usize,
    pub active_record_count: usize,
    /// Chunks that intersected the view, admitted or not
    pub candidate_chunk_count: usize,
    pub budget: usize,
    pub total_weight: f64,
    pub weights_balanced: bool,
    pub dropped_records: usize,
    pub failed_partitions: usize,
}

/// One record ready for the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFeature {
    pub key: RecordKey,
    pub id: Option<String>,
    pub position: Coord<f64>,
    pub composite: f64,
    pub color: Rgb,
    /// Drawn in the sidewalk layer instead of the road layer
    pub sidewalk_layer: bool,
}

/// The result of one recompute cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub generation: u64,
    pub viewport: ViewportState,
    /// Road layer first, then the sidewalk layer
    pub features: Vec<RenderedFeature>,
    /// Records that passed the filters before sampling
    pub filtered_count: usize,
    pub active_chunk_count: usize,
    pub budget: usize,
}

/// An input to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Viewport(ViewportState),
    Weights(WeightVector),
    Criteria(FilterCriteria),
}

/// All mutable pipeline state
#[derive(Debug)]
pub struct Session {
    store: Arc<ChunkStore>,
    scores: ScoreTable,
    weights: WeightVector,
    viewport: ViewportState,
    criteria: FilterCriteria,
    active: ActiveSet,
    config: Config,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Session {
    /// Start a session over a loaded store
    ///
    /// Scores every record with the default weights and selects the chunks for
    /// `viewport`. Fails with [`DemandError::NoValidRecords`] when the store is empty.
    pub fn new(store: Arc<ChunkStore>, config: Config, viewport: ViewportState) -> Result<Self> {
        if store.total_records() == 0 {
            return Err(DemandError::NoValidRecords);
        }

        let mut session = Self {
            scores: ScoreTable::seeded(&store),
            store,
            weights: WeightVector::default(),
            viewport,
            criteria: FilterCriteria::default(),
            active: ActiveSet::default(),
            config,
        };
        session.scores.recompute(&session.weights, &session.store);
        session.reselect();
        Ok(session)
    }

    /// Viewport centered on everything loaded
    pub fn overview(store: &ChunkStore, config: &Config, zoom: f64) -> Option<ViewportState> {
        let bbox = store.bounding_box()?;
        Some(ViewportState::from_center_zoom(
            bbox.center(),
            zoom,
            config.viewport_pixels,
        ))
    }

    #[inline]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    #[inline]
    pub fn scores(&self) -> &ScoreTable {
        &self.scores
    }

    #[inline]
    pub fn weights(&self) -> &WeightVector {
        &self.weights
    }

    #[inline]
    pub fn viewport(&self) -> &ViewportState {
        &self.viewport
    }

    #[inline]
    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    #[inline]
    pub fn active(&self) -> &ActiveSet {
        &self.active
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the weights and rescore every loaded record
    pub fn set_weights(&mut self, weights: WeightVector) {
        if !weights.is_balanced() {
            tracing::warn!(
                "Weights sum to {:.0}% instead of 100%",
                weights.total() * 100.0
            );
        }
        self.weights = weights;
        self.scores.recompute(&self.weights, &self.store);
    }

    /// Move the view and reselect the active chunks
    pub fn set_viewport(&mut self, viewport: ViewportState) {
        self.viewport = viewport;
        self.reselect();
    }

    pub fn set_criteria(&mut self, criteria: FilterCriteria) {
        self.criteria = criteria;
    }

    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Viewport(viewport) => self.set_viewport(viewport),
            SessionEvent::Weights(weights) => self.set_weights(weights),
            SessionEvent::Criteria(criteria) => self.set_criteria(criteria),
        }
    }

    /// Restore a shared view
    pub fn apply_shared_view(&mut self, view: SharedView) {
        self.set_weights(view.weights);
        self.set_criteria(view.criteria);
        self.set_viewport(view.viewport);
    }

    /// Current state as a shareable view
    pub fn shared_view(&self) -> SharedView {
        SharedView {
            viewport: self.viewport,
            pixels: self.config.viewport_pixels,
            criteria: self.criteria,
            weights: self.weights,
        }
    }

    fn reselect(&mut self) {
        let budget = budget_for_zoom(&self.config.zoom_thresholds, self.viewport.zoom);
        self.active = select_active_chunks(&self.store, &self.viewport, budget);
    }

    /// Records of the active chunks with their current scores, in admission order
    pub fn active_features(&self) -> impl Iterator<Item = ScoredFeature<'_>> + '_ {
        self.active.slots.iter().flat_map(move |&slot| {
            let records = self.store.get(slot).map(|chunk| chunk.records()).unwrap_or(&[]);
            let scores = self.scores.chunk(slot);
            records.iter().enumerate().map(move |(offset, record)| {
                let score = scores.and_then(|s| s.get(offset)).copied().unwrap_or_default();
                ScoredFeature {
                    key: RecordKey { slot, offset },
                    record,
                    composite: score.composite.unwrap_or(f64::NAN),
                    original: score.original,
                }
            })
        })
    }

    /// Active records that pass the current criteria
    pub fn filtered(&self) -> Vec<ScoredFeature<'_>> {
        self.criteria.apply(self.active_features())
    }

    /// Run the filter and render stages for the current state
    pub fn frame<R>(&self, generation: u64, rng: &mut R) -> Frame
    where
        R: Rng + ?Sized,
    {
        let filtered = self.filtered();
        let filtered_count = filtered.len();
        let sampled = sample_for_render(
            filtered,
            &self.viewport.bounds,
            self.config.render_ceiling,
            rng,
        );
        let layers = split_sidewalk_layers(sampled, self.criteria.highlight_sidewalks);

        let rendered = |feature: &ScoredFeature<'_>, sidewalk_layer: bool| RenderedFeature {
            key: feature.key,
            id: feature.record.id.clone(),
            position: feature.record.position,
            composite: feature.composite,
            color: if sidewalk_layer {
                SIDEWALK_COLOR
            } else {
                color_for_score(feature.composite)
            },
            sidewalk_layer,
        };
        let features = layers
            .roads
            .iter()
            .map(|f| rendered(f, false))
            .chain(layers.sidewalks.iter().map(|f| rendered(f, true)))
            .collect();

        Frame {
            generation,
            viewport: self.viewport,
            features,
            filtered_count,
            active_chunk_count: self.active.slots.len(),
            budget: self.active.budget,
        }
    }

    pub fn info(&self) -> SessionInfo {
        let report = self.store.report();
        SessionInfo {
            chunk_count: self.store.len(),
            record_count: self.store.total_records(),
            active_chunk_count: self.active.slots.len(),
            active_record_count: self.active.record_count,
            candidate_chunk_count: self.active.candidate_count,
            budget: self.active.budget,
            total_weight: self.weights.total(),
            weights_balanced: self.weights.is_balanced(),
            dropped_records: report.dropped_records,
            failed_partitions: report.failed.len(),
        }
    }
}

/// Publishes frames, newest generation only
#[derive(Debug)]
pub struct FramePublisher {
    tx: watch::Sender<Arc<Frame>>,
}

impl FramePublisher {
    pub fn new(initial: Frame) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Publish `frame` unless a frame of the same or a newer generation is already out
    ///
    /// Returns whether the frame was published.
    pub fn publish(&self, frame: Frame) -> bool {
        let generation = frame.generation;
        let published = self.tx.send_if_modified(move |current| {
            if frame.generation > current.generation {
                *current = Arc::new(frame);
                true
            } else {
                false
            }
        });
        if !published {
            tracing::debug!("Discarded superseded frame {generation}");
        }
        published
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Frame>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Arc<Frame> {
        self.tx.borrow().clone()
    }
}

/// What travels on the scheduler's queue
#[derive(Debug)]
enum Message {
    Event(SessionEvent),
    /// Apply everything queued before this barrier now and report the generation
    Flush(oneshot::Sender<u64>),
}

/// Coalesced events of one debounce window; the last event of each kind wins
#[derive(Debug, Default)]
struct Pending {
    viewport: Option<ViewportState>,
    weights: Option<WeightVector>,
    criteria: Option<FilterCriteria>,
}

impl Pending {
    fn push(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Viewport(viewport) => self.viewport = Some(viewport),
            SessionEvent::Weights(weights) => self.weights = Some(weights),
            SessionEvent::Criteria(criteria) => self.criteria = Some(criteria),
        }
    }

    fn apply_to(self, session: &mut Session) {
        if let Some(weights) = self.weights {
            session.set_weights(weights);
        }
        if let Some(viewport) = self.viewport {
            session.set_viewport(viewport);
        }
        if let Some(criteria) = self.criteria {
            session.set_criteria(criteria);
        }
    }
}

/// Debounced, generation-counted driver of a [`Session`]
pub struct Scheduler {
    events: mpsc::UnboundedSender<Message>,
    frames: watch::Receiver<Arc<Frame>>,
    session: Arc<RwLock<Session>>,
    generation: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn a scheduler sampling with an OS-seeded generator
    pub fn spawn(session: Session) -> Self {
        Self::spawn_with_rng(session, StdRng::from_os_rng())
    }

    /// Spawn a scheduler sampling with `rng`
    ///
    /// The initial frame (generation 1) is computed before this returns.
    pub fn spawn_with_rng<R>(session: Session, mut rng: R) -> Self
    where
        R: Rng + Send + 'static,
    {
        let generation = Arc::new(AtomicU64::new(1));
        let publisher = FramePublisher::new(session.frame(1, &mut rng));
        let frames = publisher.subscribe();
        let debounce = session.config().debounce();
        let session = Arc::new(RwLock::new(session));
        let (events, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(
            session.clone(),
            rx,
            publisher,
            generation.clone(),
            debounce,
            rng,
        ));

        Self {
            events,
            frames,
            session,
            generation,
            task,
        }
    }

    /// Queue an event; returns `false` once the scheduler has stopped
    pub fn send(&self, event: SessionEvent) -> bool {
        self.events.send(Message::Event(event)).is_ok()
    }

    /// Apply every event sent so far without waiting for quiescence
    ///
    /// Returns the generation of the frame that reflects those events. When nothing
    /// was queued this is the current generation and no frame is produced.
    pub async fn flush(&self) -> u64 {
        let (reply, settled) = oneshot::channel();
        if self.events.send(Message::Flush(reply)).is_err() {
            return self.generation();
        }
        match settled.await {
            Ok(generation) => generation,
            Err(_) => self.generation(),
        }
    }

    /// Receiver of published frames
    pub fn frames(&self) -> watch::Receiver<Arc<Frame>> {
        self.frames.clone()
    }

    pub fn latest(&self) -> Arc<Frame> {
        self.frames.borrow().clone()
    }

    /// Newest generation issued so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run a closure against the session while holding a read lock
    pub async fn with_session<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Session) -> T,
    {
        let guard = self.session.read().await;
        f(&guard)
    }

    /// Apply everything queued so far, then stop
    pub async fn shutdown(self) {
        drop(self.events);
        if let Err(e) = self.task.await {
            tracing::warn!("Scheduler task did not finish cleanly: {e}");
        }
    }
}

async fn run<R>(
    session: Arc<RwLock<Session>>,
    mut messages: mpsc::UnboundedReceiver<Message>,
    publisher: FramePublisher,
    generation: Arc<AtomicU64>,
    debounce: Duration,
    mut rng: R,
) where
    R: Rng + Send + 'static,
{
    while let Some(first) = messages.recv().await {
        let mut pending = Pending::default();
        match first {
            Message::Event(event) => pending.push(event),
            Message::Flush(reply) => {
                // Nothing queued, the current state already reflects every event
                let _ = reply.send(generation.load(Ordering::SeqCst));
                continue;
            }
        }
        let mut coalesced = 1;
        let mut waiters = Vec::new();

        // Every new event restarts the quiescence timer
        loop {
            tokio::select! {
                next = messages.recv() => match next {
                    Some(Message::Event(event)) => {
                        pending.push(event);
                        coalesced += 1;
                    }
                    Some(Message::Flush(reply)) => {
                        waiters.push(reply);
                        break;
                    }
                    None => break,
                },
                _ = tokio::time::sleep(debounce) => break,
            }
        }

        let issued = generation.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = {
            let mut session = session.write().await;
            pending.apply_to(&mut session);
            session.frame(issued, &mut rng)
        };
        tracing::debug!(
            "Frame {issued}: {} features from {coalesced} events",
            frame.features.len()
        );
        publisher.publish(frame);
        for reply in waiters {
            let _ = reply.send(issued);
        }
    }
    tracing::debug!("Scheduler stopped");
}
