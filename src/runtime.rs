//! Process-wide components with an explicit lifecycle
//!
//! Everything the pipelines share (service clients, the audio output) is
//! created once here and handed to each pipeline, instead of living in
//! globals.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::api::{HttpSynthesizer, SpeechSynthesizer, VoiceChatClient};
use crate::audio::{NullSink, OutputDevice, SpeakerSink};
use crate::config::Config;
use crate::presentation::{ContentNode, PresentationHandle, PresentationSequencer};
use crate::stream::{ChatSource, ChatUpdate, IngestOptions, ResponseBuffer, VoiceChatSession};
use crate::Result;

/// Where audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutput {
    /// The default output device
    Speaker,
    /// Nowhere (headless runs)
    Silent,
}

/// How a voice chat reply is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatTransport {
    /// Consume chunks as the transport delivers them
    #[default]
    Streamed,
    /// Buffer the body and poll it at the configured interval
    Polled,
}

/// Shared components for one process
pub struct Runtime {
    config: Config,
    synthesizer: Arc<HttpSynthesizer>,
    chat: VoiceChatClient,
    device: OutputDevice,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("base_url", &self.config.service.base_url)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Build the service clients and open the audio output
    ///
    /// # Errors
    ///
    /// Returns error if a client cannot be built or the speaker cannot be opened
    pub fn create(config: Config, output: AudioOutput) -> Result<Self> {
        config.validate()?;

        let synthesizer = HttpSynthesizer::new(
            &config.service.base_url,
            config.service.timeout,
            config.service.retry.clone(),
        )?;
        let chat = VoiceChatClient::new(
            &config.service.base_url,
            config.service.timeout,
            config.service.retry.clone(),
        )?;

        let device = match output {
            AudioOutput::Speaker => OutputDevice::new(SpeakerSink::new()?),
            AudioOutput::Silent => OutputDevice::new(NullSink),
        };

        tracing::info!(
            base_url = %config.service.base_url,
            ?output,
            session_id = %chat.session_id(),
            "runtime created"
        );

        Ok(Self {
            config,
            synthesizer: Arc::new(synthesizer),
            chat,
            device,
        })
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Speech synthesis client
    #[must_use]
    pub fn synthesizer(&self) -> &HttpSynthesizer {
        &self.synthesizer
    }

    /// Voice chat client
    #[must_use]
    pub const fn chat_client(&self) -> &VoiceChatClient {
        &self.chat
    }

    /// Shared audio output
    #[must_use]
    pub const fn device(&self) -> &OutputDevice {
        &self.device
    }

    /// Spawn a presentation over `nodes`; it starts when told to
    #[must_use]
    pub fn present(&self, nodes: Vec<ContentNode>) -> PresentationHandle {
        let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::clone(&self.synthesizer) as _;
        PresentationSequencer::spawn(
            nodes,
            synthesizer,
            self.device.clone(),
            self.config.speech.clone(),
            self.config.presentation.clone(),
        )
    }

    /// Upload a recorded utterance and start playing the reply
    ///
    /// # Errors
    ///
    /// Returns error if the upload fails
    pub async fn chat(
        &self,
        wav: Vec<u8>,
        transport: ChatTransport,
    ) -> Result<(VoiceChatSession, mpsc::UnboundedReceiver<ChatUpdate>)> {
        let stream = self.chat.open_stream(wav, &self.config.chat.options).await?;

        let source = match transport {
            ChatTransport::Streamed => ChatSource::Stream(stream),
            ChatTransport::Polled => ChatSource::Polled {
                source: Arc::new(ResponseBuffer::fill_from(stream)),
                interval: self.config.chat.poll_interval,
            },
        };

        let options = IngestOptions {
            enable_text_output: self.config.chat.enable_text_output,
            auto_play_audio: self.config.chat.auto_play_audio,
        };

        Ok(VoiceChatSession::start(self.device.clone(), source, options))
    }

    /// Wait up to `grace` for pipelines to release the audio output, then
    /// close it
    pub async fn shutdown(self, grace: Duration) {
        match tokio::time::timeout(grace, self.device.lease()).await {
            Ok(lease) => drop(lease),
            Err(_) => tracing::warn!("audio output still in use at shutdown"),
        }
        tracing::info!("runtime shut down");
    }
}
