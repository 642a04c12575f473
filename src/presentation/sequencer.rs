//! Presentation playback state machine
//!
//! One task owns the scheduler, the playback queue and the cursor. Callers
//! talk to it through a [`PresentationHandle`]; it reports back on a
//! broadcast channel of [`PresentationEvent`]s and a watch of
//! [`PresentationState`].

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::prefetch::{NodeStatus, PrefetchScheduler, SynthesisCompletion};
use super::ContentNode;
use crate::api::{SpeechSynthesizer, VoiceParams};
use crate::audio::queue::sleep_until;
use crate::audio::{OutputDevice, OutputLease, PlaybackQueue};
use crate::config::PresentationConfig;
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 64;

/// Externally visible presentation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationState {
    /// No presentation running
    Idle,
    /// Advancing through nodes
    Playing,
    /// Frozen at the current node until resumed
    Paused,
}

/// Notification emitted while a presentation runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationEvent {
    /// Playback began
    Started {
        /// Number of nodes in the presentation
        nodes: usize,
    },
    /// A node is now shown
    NodeChanged {
        index: usize,
        text: String,
        image: Option<String>,
    },
    /// A node's audio never arrived; it is shown without narration
    NodeAudioTimedOut { index: usize },
    /// The last node finished
    Completed,
    /// Playback was stopped before the end
    Stopped,
    /// A whole-session failure; the presentation is idle
    Error(String),
}

#[derive(Debug)]
enum Command {
    Start { at: usize },
    Pause,
    Resume,
    Stop,
    JumpTo(usize),
}

/// Where the cursor is in the current node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Shown, waiting for audio; re-checked at `next_poll`
    AwaitingAudio { index: usize, next_poll: Instant },
    /// Audio is in the playback queue
    Speaking { index: usize },
    /// Pause between nodes
    Gap { until: Instant },
}

/// Drives one presentation from a dedicated task
pub struct PresentationSequencer {
    nodes: Arc<[ContentNode]>,
    scheduler: PrefetchScheduler,
    device: OutputDevice,
    config: PresentationConfig,
    queue: Option<PlaybackQueue<OutputLease>>,
    phase: Phase,
    /// Index of the node to show next
    next: usize,
    paused_at: Option<Instant>,
    events: broadcast::Sender<PresentationEvent>,
    state: watch::Sender<PresentationState>,
}

impl PresentationSequencer {
    /// Start the presentation task for `nodes`
    ///
    /// The task idles until [`PresentationHandle::start`] is called.
    #[must_use]
    pub fn spawn(
        nodes: Vec<ContentNode>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        device: OutputDevice,
        voice: VoiceParams,
        config: PresentationConfig,
    ) -> PresentationHandle {
        let nodes: Arc<[ContentNode]> = nodes.into();
        let (scheduler, completions) =
            PrefetchScheduler::new(Arc::clone(&nodes), synthesizer, voice, &config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, state_rx) = watch::channel(PresentationState::Idle);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let sequencer = Self {
            nodes,
            scheduler,
            device,
            config,
            queue: None,
            phase: Phase::Idle,
            next: 0,
            paused_at: None,
            events: events.clone(),
            state,
        };

        let task = tokio::spawn(sequencer.run(commands_rx, completions));

        PresentationHandle {
            commands: commands_tx,
            events,
            state: state_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<SynthesisCompletion>,
    ) {
        loop {
            let wakeup = self.next_wakeup();

            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(completion) = completions.recv() => self.on_completion(completion),
                () = sleep_until(wakeup) => self.on_wakeup(),
            }
        }

        self.stop();
        tracing::debug!("presentation task exiting");
    }

    fn handle(&mut self, command: Command) {
        tracing::debug!(?command, state = ?self.current_state(), "presentation command");
        match command {
            Command::Start { at } => self.start(at),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Stop => self.stop(),
            Command::JumpTo(index) => self.jump_to(index),
        }
    }

    fn start(&mut self, at: usize) {
        if self.phase != Phase::Idle {
            tracing::warn!("presentation already running");
            return;
        }
        if self.nodes.is_empty() {
            self.fail("no valid document data");
            return;
        }
        if at >= self.nodes.len() {
            tracing::warn!(at, nodes = self.nodes.len(), "start index out of range");
            return;
        }

        let lease = match self.device.try_lease() {
            Ok(lease) => lease,
            Err(e) => {
                self.fail(&e.to_string());
                return;
            }
        };

        tracing::info!(nodes = self.nodes.len(), at, "presentation started");
        self.queue = Some(PlaybackQueue::new(lease));
        self.paused_at = None;
        self.set_state(PresentationState::Playing);
        self.emit(PresentationEvent::Started {
            nodes: self.nodes.len(),
        });

        self.scheduler.prime_window(at);
        self.next = at;
        self.advance_to_next();
    }

    fn pause(&mut self) {
        if self.current_state() != PresentationState::Playing {
            return;
        }
        if let Some(queue) = &mut self.queue {
            queue.pause();
        }
        self.paused_at = Some(Instant::now());
        self.set_state(PresentationState::Paused);
    }

    fn resume(&mut self) {
        let Some(paused_at) = self.paused_at.take() else {
            return;
        };
        let now = Instant::now();

        if let Some(queue) = &mut self.queue {
            queue.resume();
        }
        match &mut self.phase {
            Phase::Gap { until } => *until += now.saturating_duration_since(paused_at),
            Phase::AwaitingAudio { next_poll, .. } => *next_poll = now,
            Phase::Speaking { .. } | Phase::Idle => {}
        }
        self.set_state(PresentationState::Playing);
    }

    fn stop(&mut self) {
        if self.phase == Phase::Idle {
            return;
        }
        tracing::info!(next = self.next, "presentation stopped");
        self.finish_session();
        self.emit(PresentationEvent::Stopped);
    }

    fn jump_to(&mut self, index: usize) {
        if index >= self.nodes.len() {
            tracing::warn!(index, nodes = self.nodes.len(), "ignoring jump out of range");
            return;
        }
        if self.phase == Phase::Idle {
            self.start(index);
            return;
        }

        tracing::info!(index, "jumping to node");
        if let Some(queue) = &mut self.queue {
            queue.clear();
        }
        if self.paused_at.take().is_some() {
            self.set_state(PresentationState::Playing);
        }
        self.next = index;
        self.advance_to_next();
    }

    fn advance_to_next(&mut self) {
        let index = self.next;
        let Some(node) = self.nodes.get(index) else {
            tracing::info!("presentation complete");
            self.finish_session();
            self.emit(PresentationEvent::Completed);
            return;
        };
        self.next = index + 1;

        tracing::debug!(index, sequence = node.sequence_index, "showing node");
        let has_text = node.has_text();
        self.emit(PresentationEvent::NodeChanged {
            index,
            text: node.text.clone(),
            image: node.image_ref.clone(),
        });

        if has_text {
            self.scheduler.prime_window(index);
            self.check_audio(index);
        } else {
            self.scheduler.advance(index);
            self.enter_gap();
        }
    }

    /// Play the node's audio if it is here, otherwise keep waiting or give up
    fn check_audio(&mut self, index: usize) {
        let now = Instant::now();
        self.scheduler.expire_overdue(now);

        match self.scheduler.status(index) {
            NodeStatus::Cached => {
                let Some(asset) = self.scheduler.get_cached(index) else {
                    self.skip_audio(index);
                    return;
                };
                self.scheduler.advance(index);
                if let Some(queue) = self.queue.as_mut() {
                    queue.enqueue(asset);
                    self.phase = Phase::Speaking { index };
                } else {
                    self.enter_gap();
                }
            }
            NodeStatus::TimedOut => self.skip_audio(index),
            NodeStatus::Pending => {
                self.phase = Phase::AwaitingAudio {
                    index,
                    next_poll: now + self.config.poll_interval,
                };
            }
            NodeStatus::NotRequested => {
                self.scheduler.prime_window(index);
                if self.scheduler.status(index) == NodeStatus::Pending {
                    self.phase = Phase::AwaitingAudio {
                        index,
                        next_poll: now + self.config.poll_interval,
                    };
                } else {
                    self.skip_audio(index);
                }
            }
        }
    }

    fn skip_audio(&mut self, index: usize) {
        tracing::warn!(index, "no audio for node, continuing without narration");
        self.emit(PresentationEvent::NodeAudioTimedOut { index });
        self.scheduler.advance(index);
        self.enter_gap();
    }

    fn enter_gap(&mut self) {
        self.phase = Phase::Gap {
            until: Instant::now() + self.config.inter_node_delay,
        };
    }

    fn on_completion(&mut self, completion: SynthesisCompletion) {
        let Some(node) = self.scheduler.on_completion(completion) else {
            return;
        };
        if self.paused_at.is_some() {
            return;
        }
        if matches!(self.phase, Phase::AwaitingAudio { index, .. } if index == node) {
            self.check_audio(node);
        }
    }

    fn on_wakeup(&mut self) {
        match self.phase {
            Phase::Idle => {}
            Phase::AwaitingAudio { index, .. } => self.check_audio(index),
            Phase::Speaking { index } => {
                if let Some(queue) = &mut self.queue {
                    queue.on_playback_finished();
                }
                tracing::debug!(index, "node narration finished");
                self.enter_gap();
            }
            Phase::Gap { .. } => self.advance_to_next(),
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        if self.paused_at.is_some() {
            return None;
        }
        match self.phase {
            Phase::Idle => None,
            Phase::AwaitingAudio { next_poll, .. } => Some(
                self.scheduler
                    .next_expiry()
                    .map_or(next_poll, |expiry| expiry.min(next_poll)),
            ),
            Phase::Speaking { .. } => self.queue.as_ref().and_then(PlaybackQueue::finish_deadline),
            Phase::Gap { until } => Some(until),
        }
    }

    /// Return to idle, releasing the output device and all cached audio
    fn finish_session(&mut self) {
        if let Some(mut queue) = self.queue.take() {
            queue.clear();
        }
        self.scheduler.clear_all();
        self.phase = Phase::Idle;
        self.next = 0;
        self.paused_at = None;
        self.set_state(PresentationState::Idle);
    }

    fn fail(&mut self, message: &str) {
        tracing::error!(error = message, "presentation failed");
        if self.phase != Phase::Idle {
            self.finish_session();
        }
        self.emit(PresentationEvent::Error(message.to_string()));
    }

    fn current_state(&self) -> PresentationState {
        *self.state.borrow()
    }

    fn set_state(&self, state: PresentationState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: PresentationEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

/// Control surface for a running presentation task
#[derive(Debug)]
pub struct PresentationHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PresentationEvent>,
    state: watch::Receiver<PresentationState>,
    task: JoinHandle<()>,
}

impl PresentationHandle {
    /// Start from the first node
    ///
    /// # Errors
    ///
    /// Returns error if the presentation task has exited
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start { at: 0 })
    }

    /// Start from node `index`
    ///
    /// # Errors
    ///
    /// Returns error if the presentation task has exited
    pub fn start_at(&self, index: usize) -> Result<()> {
        self.send(Command::Start { at: index })
    }

    /// Suspend narration and the inter-node delay
    ///
    /// # Errors
    ///
    /// Returns error if the presentation task has exited
    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    /// Continue after [`Self::pause`]
    ///
    /// # Errors
    ///
    /// Returns error if the presentation task has exited
    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    /// Stop and drop all cached audio; no-op when idle
    ///
    /// # Errors
    ///
    /// Returns error if the presentation task has exited
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Show node `index` next, interrupting the current one
    ///
    /// # Errors
    ///
    /// Returns error if the presentation task has exited
    pub fn jump_to(&self, index: usize) -> Result<()> {
        self.send(Command::JumpTo(index))
    }

    /// Receive events emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PresentationEvent> {
        self.events.subscribe()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PresentationState {
        *self.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<PresentationState> {
        self.state.clone()
    }

    /// Stop playback and wait for the task to exit
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "presentation task ended abnormally");
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Session("presentation task has exited".to_string()))
    }
}
