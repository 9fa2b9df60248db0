pub mod commands;
pub mod prompt;
pub mod providers;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ConfidantConfig;
use crate::extract::{ExtractionPipeline, FastPathExtractor, GenerativeExtractor};
use crate::memory::{ProfileStore, TurnHistory, render};
use crate::transcript::{ConversationLog, ExchangeRecord};
use crate::types::ChatMessage;
use providers::LlmProvider;

/// A streaming chunk from the generation backend.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Text(String),
    Done,
    Error(String),
}

/// Where a turn currently is. Back to `Idle` once the turn ends, whether it
/// succeeded or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Extracting,
    Merging,
    Generating,
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("generation failed: {0}")]
    Generation(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// One user's conversation: memory, extraction and generation per turn.
///
/// Per turn: extract facts (fast path first, then the model), merge profile
/// updates, render what is known into the system prompt and generate a reply
/// over the turn history. Extraction problems never fail a turn; a failed
/// generation leaves history and log untouched.
pub struct Conversation {
    provider: Arc<dyn LlmProvider>,
    pipeline: ExtractionPipeline,
    store: ProfileStore,
    history: TurnHistory,
    log: Option<ConversationLog>,
    persona: String,
    recent_facts: usize,
    summary_facts: usize,
    state: TurnState,
}

impl Conversation {
    pub fn new(
        config: &ConfidantConfig,
        provider: Arc<dyn LlmProvider>,
        store: ProfileStore,
    ) -> anyhow::Result<Self> {
        let persona = prompt::load_persona(config.agent.persona_path.as_deref())?;
        let log = if config.memory.log_conversations {
            Some(ConversationLog::start(&config.memory.conversations_dir())?)
        } else {
            None
        };
        let pipeline = ExtractionPipeline::new(
            Box::new(FastPathExtractor),
            Box::new(GenerativeExtractor::new(provider.clone())),
            config.memory.recent_facts,
        );

        info!(
            model = %config.agent.model,
            facts = store.snapshot().facts.len(),
            "conversation started"
        );

        Ok(Self {
            provider,
            pipeline,
            store,
            history: TurnHistory::new(config.memory.history_turns),
            log,
            persona,
            recent_facts: config.memory.recent_facts,
            summary_facts: config.memory.summary_facts,
            state: TurnState::Idle,
        })
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ProfileStore {
        &mut self.store
    }

    pub fn history(&self) -> &TurnHistory {
        &self.history
    }

    pub fn log(&self) -> Option<&ConversationLog> {
        self.log.as_ref()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn summary_facts(&self) -> usize {
        self.summary_facts
    }

    /// Forget the turn history. Memory is kept.
    pub fn clear_history(&mut self) {
        self.history.clear();
        debug!("turn history cleared");
    }

    /// The system instruction the next generation would use.
    pub fn system_prompt(&self) -> String {
        let context = render(self.store.snapshot(), self.recent_facts);
        prompt::system_prompt(&self.persona, &context)
    }

    /// Run one turn and return the full reply.
    ///
    /// Reply chunks are forwarded to `tx` as they arrive, followed by
    /// [`AgentEvent::Done`] on success.
    pub async fn process_message(
        &mut self,
        utterance: &str,
        tx: Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<String, TurnError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(TurnError::EmptyMessage);
        }
        let result = self.run_turn(utterance, tx).await;
        self.state = TurnState::Idle;
        result
    }

    async fn run_turn(
        &mut self,
        utterance: &str,
        tx: Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<String, TurnError> {
        self.state = TurnState::Extracting;
        let extraction = self.pipeline.extract(utterance, &mut self.store).await?;

        self.state = TurnState::Merging;
        self.pipeline
            .merge(utterance, &extraction.facts, &mut self.store)
            .await?;

        // The utterance joins history only once a reply exists.
        let mut messages = self.history.messages().to_vec();
        messages.push(ChatMessage::user(utterance));
        let system = self.system_prompt();

        self.state = TurnState::Generating;
        let reply = self.generate(&messages, &system, tx.as_ref()).await?;

        self.history.push(ChatMessage::user(utterance));
        self.history.push(ChatMessage::assistant(reply.clone()));

        if let Some(log) = &self.log {
            let record = ExchangeRecord {
                timestamp: Utc::now(),
                user: utterance.to_string(),
                assistant: reply.clone(),
                extracted_facts: extraction.facts,
            };
            if let Err(e) = log.append(&record) {
                warn!("failed to log exchange: {e}");
            }
        }

        if let Some(tx) = tx {
            let _ = tx.send(AgentEvent::Done).await;
        }
        Ok(reply)
    }

    /// Stream one reply, accumulating chunks and forwarding them to `tx`.
    ///
    /// The provider and the drain loop are polled together so a slow consumer
    /// never blocks the provider on a full channel.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        system: &str,
        tx: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<String, TurnError> {
        let (inner_tx, mut inner_rx) = mpsc::channel::<AgentEvent>(32);

        let call = self
            .provider
            .call_streaming(messages, Some(system), inner_tx);

        let drain = async {
            let mut reply = String::new();
            let mut failure = None;
            while let Some(event) = inner_rx.recv().await {
                match event {
                    AgentEvent::Text(chunk) => {
                        reply.push_str(&chunk);
                        if let Some(tx) = tx {
                            let _ = tx.send(AgentEvent::Text(chunk)).await;
                        }
                    }
                    AgentEvent::Error(e) => failure = Some(e),
                    AgentEvent::Done => break,
                }
            }
            (reply, failure)
        };

        let (call_result, (reply, failure)) = tokio::join!(call, drain);

        if let Err(e) = call_result {
            warn!("generation request failed: {e}");
            return Err(TurnError::Generation(e.to_string()));
        }
        if let Some(e) = failure {
            warn!("generation backend reported an error: {e}");
            return Err(TurnError::Generation(e));
        }
        Ok(reply)
    }
}
