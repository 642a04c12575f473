//! Speculative synthesis ahead of playback
//!
//! The scheduler keeps a window of `lookahead` nodes ahead of the playback
//! position in flight. Requests are fire-and-forget: each runs on its own
//! task and reports back through a completion channel that the owner drains
//! into [`PrefetchScheduler::on_completion`].
//!
//! Completions are matched to requests by the id the service echoes. When a
//! completion carries no id (or one this scheduler never issued), it resolves
//! the oldest pending request. That fallback is only correct if the service
//! answers requests in the order they were issued.
//!
//! Failures never go through that matching: the task that issued a request
//! knows its node, and a failed request only ever marks that node.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::ContentNode;
use crate::api::{SpeechSynthesizer, VoiceParams};
use crate::audio::{AudioAsset, WavData};
use crate::config::PresentationConfig;
use crate::Error;

/// Synthesis progress for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// No request issued
    NotRequested,
    /// Request in flight
    Pending,
    /// Audio available
    Cached,
    /// Request expired or failed; the node has no audio
    TimedOut,
}

/// Result of one synthesis request, as reported by its task
#[derive(Debug)]
pub struct SynthesisCompletion {
    /// Scheduler generation the request was issued in
    pub generation: u64,
    /// Node the request was issued for; failures are charged to it
    pub node: usize,
    /// Request id echoed by the service, if any
    pub request_id: Option<String>,
    /// Decoded audio, or why there is none
    pub outcome: std::result::Result<WavData, String>,
}

#[derive(Debug)]
struct PendingRequest {
    node: usize,
    request_id: String,
    issued_at: Instant,
}

/// Rolling lookahead window of synthesis requests with a result cache
pub struct PrefetchScheduler {
    nodes: Arc<[ContentNode]>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    voice: VoiceParams,
    lookahead: usize,
    timeout: Duration,
    stagger: Duration,
    status: Vec<NodeStatus>,
    /// In issue order; the front is the oldest unresolved request
    pending: VecDeque<PendingRequest>,
    cache: HashMap<usize, AudioAsset>,
    /// Ids of requests that expired or failed before their completion arrived
    retired: HashSet<String>,
    generation: u64,
    completions: mpsc::UnboundedSender<SynthesisCompletion>,
}

impl std::fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchScheduler")
            .field("nodes", &self.nodes.len())
            .field("lookahead", &self.lookahead)
            .field("pending", &self.pending.len())
            .field("cached", &self.cache.len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl PrefetchScheduler {
    /// Create a scheduler for `nodes`
    ///
    /// Completions of issued requests arrive on the returned receiver and
    /// must be passed to [`Self::on_completion`].
    #[must_use]
    pub fn new(
        nodes: Arc<[ContentNode]>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        voice: VoiceParams,
        config: &PresentationConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SynthesisCompletion>) {
        let (completions, rx) = mpsc::unbounded_channel();
        let status = vec![NodeStatus::NotRequested; nodes.len()];

        let scheduler = Self {
            nodes,
            synthesizer,
            voice,
            lookahead: config.lookahead.max(1),
            timeout: config.synthesis_timeout,
            stagger: config.request_stagger,
            status,
            pending: VecDeque::new(),
            cache: HashMap::new(),
            retired: HashSet::new(),
            generation: 0,
            completions,
        };
        (scheduler, rx)
    }

    /// Request every unrequested node in `[start, start + lookahead)`
    ///
    /// Requests from one call are spaced by the configured stagger.
    /// Returns the nodes requested.
    pub fn prime_window(&mut self, start: usize) -> Vec<usize> {
        let end = start.saturating_add(self.lookahead).min(self.nodes.len());
        let mut issued = Vec::new();

        for node in start..end {
            if self.status[node] != NodeStatus::NotRequested || !self.nodes[node].has_text() {
                continue;
            }
            let delay = self.stagger.saturating_mul(u32::try_from(issued.len()).unwrap_or(u32::MAX));
            self.issue(node, delay);
            issued.push(node);
        }

        if !issued.is_empty() {
            tracing::debug!(start, ?issued, in_flight = self.pending.len(), "primed lookahead window");
        }
        issued
    }

    /// Slide the window past `consumed`, keeping `lookahead` requests ahead
    pub fn advance(&mut self, consumed: usize) -> Vec<usize> {
        self.prime_window(consumed.saturating_add(1))
    }

    /// Audio for `node`, if it has arrived
    ///
    /// The entry stays cached so the node can be replayed after a jump.
    #[must_use]
    pub fn get_cached(&self, node: usize) -> Option<AudioAsset> {
        self.cache.get(&node).cloned()
    }

    /// Current status of `node`; out-of-range nodes are never requested
    #[must_use]
    pub fn status(&self, node: usize) -> NodeStatus {
        self.status.get(node).copied().unwrap_or(NodeStatus::NotRequested)
    }

    /// Resolve a completion to its request
    ///
    /// Returns the node it resolved, or `None` if it was stale or matched
    /// nothing.
    pub fn on_completion(&mut self, completion: SynthesisCompletion) -> Option<usize> {
        if completion.generation != self.generation {
            tracing::debug!(
                generation = completion.generation,
                current = self.generation,
                "ignoring completion from a cleared session"
            );
            return None;
        }

        self.expire_overdue(Instant::now());

        let wav = match completion.outcome {
            Ok(wav) => wav,
            Err(error) => return self.resolve_failure(completion.node, &error),
        };

        let index = match completion.request_id.as_deref() {
            Some(id) => match self.pending.iter().position(|p| p.request_id == id) {
                Some(index) => Some(index),
                None if self.retired.remove(id) => {
                    tracing::debug!(request_id = id, "dropping late completion for retired request");
                    return None;
                }
                None => {
                    tracing::debug!(request_id = id, "unknown request id, resolving oldest");
                    self.oldest()
                }
            },
            None => self.oldest(),
        };

        let Some(request) = index.and_then(|i| self.pending.remove(i)) else {
            tracing::warn!("synthesis completion with no pending request");
            return None;
        };

        let node = request.node;
        let asset = AudioAsset::from_wav(node, wav);
        tracing::debug!(
            node,
            duration_ms = asset.duration().as_millis(),
            waited_ms = request.issued_at.elapsed().as_millis(),
            "synthesis cached"
        );
        self.cache.insert(node, asset);
        self.status[node] = NodeStatus::Cached;
        Some(node)
    }

    /// Give up on the pending request for `node`
    ///
    /// Returns whether a request was pending.
    pub fn on_synthesis_failed(&mut self, node: usize) -> bool {
        let Some(index) = self.pending.iter().position(|p| p.node == node) else {
            return false;
        };
        if let Some(request) = self.pending.remove(index) {
            self.retired.insert(request.request_id);
        }
        self.status[node] = NodeStatus::TimedOut;
        true
    }

    /// Time out every request issued more than the timeout before `now`
    ///
    /// Returns the nodes that expired.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<usize> {
        let timeout = self.timeout;
        let mut expired = Vec::new();

        self.pending.retain(|request| {
            if now.saturating_duration_since(request.issued_at) < timeout {
                return true;
            }
            expired.push((request.node, request.request_id.clone()));
            false
        });

        expired
            .into_iter()
            .map(|(node, request_id)| {
                let error = Error::RequestTimeout { node };
                tracing::warn!(request_id = %request_id, timeout_secs = timeout.as_secs(), "{error}");
                self.status[node] = NodeStatus::TimedOut;
                self.retired.insert(request_id);
                node
            })
            .collect()
    }

    /// When the oldest pending request will expire
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.issued_at + self.timeout).min()
    }

    /// Forget every request and cached clip
    ///
    /// Completions still in flight belong to the old generation and are
    /// ignored when they arrive.
    pub fn clear_all(&mut self) {
        tracing::debug!(
            pending = self.pending.len(),
            cached = self.cache.len(),
            "clearing prefetch state"
        );
        self.generation += 1;
        self.pending.clear();
        self.cache.clear();
        self.retired.clear();
        self.status.fill(NodeStatus::NotRequested);
    }

    /// Requests currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Number of cached clips
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Current session generation
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Nodes this scheduler serves
    #[must_use]
    pub fn nodes(&self) -> &Arc<[ContentNode]> {
        &self.nodes
    }

    /// Mark the request issued for `node` as failed
    fn resolve_failure(&mut self, node: usize, error: &str) -> Option<usize> {
        let Some(index) = self.pending.iter().position(|p| p.node == node) else {
            tracing::debug!(node, error, "dropping failure for a request no longer pending");
            return None;
        };
        self.pending.remove(index);
        tracing::warn!(node, error, "synthesis failed");
        self.status[node] = NodeStatus::TimedOut;
        Some(node)
    }

    fn oldest(&self) -> Option<usize> {
        if self.pending.is_empty() { None } else { Some(0) }
    }

    fn issue(&mut self, node: usize, delay: Duration) {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.status[node] = NodeStatus::Pending;
        self.pending.push_back(PendingRequest {
            node,
            request_id: request_id.clone(),
            issued_at: Instant::now(),
        });

        let synthesizer = Arc::clone(&self.synthesizer);
        let voice = self.voice.clone();
        let text = self.nodes[node].text.clone();
        let completions = self.completions.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let (echoed, outcome) = match synthesizer.synthesize(&text, &voice, &request_id).await {
                Ok(output) => {
                    let echoed = output.request_id.clone();
                    (echoed, output.decode().map_err(|e| e.to_string()))
                }
                Err(e) => (None, Err(e.to_string())),
            };

            let _ = completions.send(SynthesisCompletion {
                generation,
                node,
                request_id: echoed,
                outcome,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::api::{AudioFormat, SynthesisOutput};
    use crate::Result;

    /// Accepts requests and never answers
    struct SilentSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for SilentSynthesizer {
        async fn synthesize(&self, _: &str, _: &VoiceParams, _: &str) -> Result<SynthesisOutput> {
            std::future::pending().await
        }
    }

    /// Answers "slow" after a second and fails anything else at once
    struct OneSlowOneBroken;

    #[async_trait]
    impl SpeechSynthesizer for OneSlowOneBroken {
        async fn synthesize(&self, text: &str, _: &VoiceParams, _: &str) -> Result<SynthesisOutput> {
            if text != "slow" {
                return Err(Error::Tts(format!("cannot say {text:?}")));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(SynthesisOutput {
                audio: crate::audio::wav::encode(&[0.1; 1234], 8000, 1)?,
                format: AudioFormat::Wav,
                request_id: None,
            })
        }
    }

    fn nodes(texts: &[&str]) -> Arc<[ContentNode]> {
        texts
            .iter()
            .zip(0..)
            .map(|(text, i)| ContentNode {
                sequence_index: i,
                text: (*text).to_string(),
                image_ref: None,
            })
            .collect()
    }

    fn scheduler(texts: &[&str], lookahead: usize) -> PrefetchScheduler {
        let config = PresentationConfig {
            lookahead,
            ..PresentationConfig::default()
        };
        let (scheduler, _rx) = PrefetchScheduler::new(
            nodes(texts),
            Arc::new(SilentSynthesizer),
            VoiceParams::default(),
            &config,
        );
        scheduler
    }

    /// Completion for `node` whose clip length identifies it
    fn completion(
        scheduler: &PrefetchScheduler,
        node: usize,
        samples: usize,
        id: Option<&str>,
    ) -> SynthesisCompletion {
        SynthesisCompletion {
            generation: scheduler.generation(),
            node,
            request_id: id.map(ToString::to_string),
            outcome: Ok(WavData {
                samples: vec![0.0; samples],
                sample_rate: 8000,
                channels: 1,
                bits_per_sample: 16,
            }),
        }
    }

    fn request_id(scheduler: &PrefetchScheduler, node: usize) -> String {
        scheduler
            .pending
            .iter()
            .find(|p| p.node == node)
            .map(|p| p.request_id.clone())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn prime_fills_window_once() {
        let mut s = scheduler(&["a", "b", "c", "d", "e"], 3);

        assert_eq!(s.prime_window(0), vec![0, 1, 2]);
        assert!(s.prime_window(0).is_empty());
        assert_eq!(s.in_flight(), 3);
        assert_eq!(s.status(3), NodeStatus::NotRequested);
    }

    #[tokio::test(start_paused = true)]
    async fn advance_keeps_lookahead_in_flight() {
        let mut s = scheduler(&["a", "b", "c", "d", "e"], 3);
        s.prime_window(0);

        assert_eq!(s.advance(0), vec![3]);
        assert_eq!(s.advance(1), vec![4]);
        assert!(s.advance(2).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nodes_without_text_are_skipped() {
        let mut s = scheduler(&["a", "", "c"], 3);
        assert_eq!(s.prime_window(0), vec![0, 2]);
        assert_eq!(s.status(1), NodeStatus::NotRequested);
    }

    #[tokio::test(start_paused = true)]
    async fn completions_without_ids_resolve_in_issue_order() {
        let mut s = scheduler(&["a", "b", "c"], 3);
        s.prime_window(0);

        // Node 2's audio (300 samples) happens to arrive first
        assert_eq!(s.on_completion(completion(&s, 2, 300, None)), Some(0));
        assert_eq!(s.on_completion(completion(&s, 0, 100, None)), Some(1));
        assert_eq!(s.on_completion(completion(&s, 1, 200, None)), Some(2));

        assert_eq!(s.get_cached(0).unwrap().len(), 300);
        assert_eq!(s.get_cached(1).unwrap().len(), 100);
        assert_eq!(s.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn echoed_id_resolves_its_own_request() {
        let mut s = scheduler(&["a", "b", "c"], 3);
        s.prime_window(0);
        let id = request_id(&s, 2);

        assert_eq!(s.on_completion(completion(&s, 2, 200, Some(&id))), Some(2));
        assert_eq!(s.status(2), NodeStatus::Cached);
        assert_eq!(s.status(0), NodeStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_expire_after_timeout() {
        let mut s = scheduler(&["a", "b"], 2);
        s.prime_window(0);
        let start = Instant::now();

        assert!(s.expire_overdue(start + Duration::from_secs(29)).is_empty());
        assert_eq!(s.next_expiry(), Some(start + Duration::from_secs(30)));
        assert_eq!(s.expire_overdue(start + Duration::from_secs(30)), vec![0, 1]);
        assert_eq!(s.status(0), NodeStatus::TimedOut);
        assert_eq!(s.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_completion_for_expired_request_is_dropped() {
        let mut s = scheduler(&["a", "b"], 2);
        s.prime_window(0);
        let id = request_id(&s, 0);
        s.on_synthesis_failed(0);

        assert_eq!(s.on_completion(completion(&s, 0, 100, Some(&id))), None);
        // Node 1 is still waiting for its own audio
        assert_eq!(s.status(1), NodeStatus::Pending);
        assert_eq!(s.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_marks_node_timed_out() {
        let mut s = scheduler(&["a"], 1);
        s.prime_window(0);

        let failed = SynthesisCompletion {
            generation: s.generation(),
            node: 0,
            request_id: None,
            outcome: Err("service unavailable".to_string()),
        };
        assert_eq!(s.on_completion(failed), Some(0));
        assert_eq!(s.status(0), NodeStatus::TimedOut);
        assert!(s.get_cached(0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_charged_to_its_own_node() {
        let mut s = scheduler(&["a", "b", "c"], 3);
        s.prime_window(0);

        let failed = SynthesisCompletion {
            generation: s.generation(),
            node: 1,
            request_id: None,
            outcome: Err("service unavailable".to_string()),
        };
        assert_eq!(s.on_completion(failed), Some(1));
        assert_eq!(s.status(0), NodeStatus::Pending);
        assert_eq!(s.status(1), NodeStatus::TimedOut);

        // The next unlabelled clip still belongs to the oldest request
        assert_eq!(s.on_completion(completion(&s, 0, 100, None)), Some(0));
        assert_eq!(s.on_completion(completion(&s, 2, 200, None)), Some(2));
        assert_eq!(s.get_cached(2).unwrap().len(), 200);
        assert!(s.get_cached(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_failure_does_not_steal_a_slow_success() {
        let config = PresentationConfig {
            lookahead: 2,
            request_stagger: Duration::ZERO,
            ..PresentationConfig::default()
        };
        let (mut s, mut rx) = PrefetchScheduler::new(
            nodes(&["slow", "bad"]),
            Arc::new(OneSlowOneBroken),
            VoiceParams::default(),
            &config,
        );
        s.prime_window(0);

        let first = rx.recv().await.unwrap();
        assert_eq!(s.on_completion(first), Some(1));
        assert_eq!(s.status(0), NodeStatus::Pending);
        assert_eq!(s.status(1), NodeStatus::TimedOut);

        let second = rx.recv().await.unwrap();
        assert_eq!(s.on_completion(second), Some(0));
        assert_eq!(s.status(0), NodeStatus::Cached);
        assert_eq!(s.get_cached(0).unwrap().len(), 1234);
        assert!(s.get_cached(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_expiry_is_dropped() {
        let mut s = scheduler(&["a", "b"], 2);
        s.prime_window(0);
        s.on_synthesis_failed(0);

        let failed = SynthesisCompletion {
            generation: s.generation(),
            node: 0,
            request_id: None,
            outcome: Err("too late".to_string()),
        };
        assert_eq!(s.on_completion(failed), None);
        assert_eq!(s.status(1), NodeStatus::Pending);
        assert_eq!(s.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_ignores_old_generation() {
        let mut s = scheduler(&["a", "b"], 2);
        s.prime_window(0);
        let stale = completion(&s, 0, 100, None);

        s.clear_all();
        assert_eq!(s.on_completion(stale), None);
        assert_eq!(s.status(0), NodeStatus::NotRequested);
        assert_eq!(s.cached_len(), 0);

        assert_eq!(s.prime_window(0), vec![0, 1]);
    }
}
