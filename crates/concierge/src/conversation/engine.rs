//! Conversation engine
//!
//! `process_message` runs the whole request path: validate, mask, embed,
//! retrieve, classify, generate, suggest, record the turn and decide on
//! escalation. Provider failures never reach the caller. They degrade the
//! result (no context, default classification, template reply) and mark it
//! for escalation. Only invalid input is returned as an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStats, InMemorySharedCache, TieredCache};
use crate::config::Config;
use crate::conversation::classify::parse_sentiment;
use crate::conversation::context::{AssembledContext, assemble_context};
use crate::conversation::escalation::{self, EscalationInput, EscalationReason};
use crate::conversation::intent::Intent;
use crate::conversation::prompts;
use crate::conversation::sanitize::{mask_sensitive_data, normalize_whitespace};
use crate::conversation::session::{Feedback, SessionError, SessionId, SessionStore, Turn};
use crate::dispatch::{BatchDispatcher, DispatchError, DispatcherStats, RetryPolicy, with_backoff};
use crate::error::ValidationError;
use crate::ledger::{CostBreakdown, Operation, UsageLedger};
use crate::monitor::{
    AlertEvent, AlertLevel, AlertQueue, HostMetrics, LatencyKind, MetricsSnapshot,
    PerformanceMonitor,
};
use crate::provider::{
    EmbeddingProvider, GenerationProvider, GenerationRequest, ProviderError, RetrievalProvider,
};

/// Outcome of one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub session_id: String,
    pub response: String,
    pub intent: Intent,
    pub sentiment: f32,
    pub suggestions: Vec<String>,
    /// Whether any knowledge-base passage made it into the prompt
    pub context_used: bool,
    pub context_passages: usize,
    pub should_escalate: bool,
    pub escalation_reasons: Vec<EscalationReason>,
    /// A provider failed and a fallback was used somewhere
    pub degraded: bool,
    pub processing_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Overall service condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Health summary returned by `health_report`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_secs: f64,
    pub active_sessions: usize,
    pub total_turns: usize,
    pub metrics: MetricsSnapshot,
    pub cache: CacheStats,
    pub dispatcher: DispatcherStats,
    pub alerts: Vec<AlertEvent>,
}

/// Record of an explicit handoff to a human agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationTicket {
    pub ticket_id: String,
    pub session_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub transcript: Vec<Turn>,
}

/// Shared services the engine runs on
#[derive(Clone)]
pub struct EngineServices {
    pub cache: Arc<TieredCache>,
    pub dispatcher: Arc<BatchDispatcher>,
    pub ledger: Arc<UsageLedger>,
    pub monitor: Arc<PerformanceMonitor>,
    pub retrieval: Arc<dyn RetrievalProvider>,
    pub generator: Arc<dyn GenerationProvider>,
}

impl EngineServices {
    /// Wire monitor, ledger, cache and dispatcher around the given providers.
    /// Spawns the dispatcher worker, so it must run inside a Tokio runtime.
    pub fn build(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        retrieval: Arc<dyn RetrievalProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor.clone()));
        let ledger = Arc::new(UsageLedger::new(&config.costs));

        let mut cache = TieredCache::new(embedder.model(), &config.cache).with_monitor(monitor.clone());
        if config.cache.shared_enabled {
            cache = cache.with_shared(Arc::new(InMemorySharedCache::new()));
        }
        let cache = Arc::new(cache);

        let dispatcher = BatchDispatcher::builder(embedder, cache.clone())
            .config(config.batch.clone())
            .ledger(ledger.clone())
            .monitor(monitor.clone())
            .spawn();

        Self {
            cache,
            dispatcher: Arc::new(dispatcher),
            ledger,
            monitor,
            retrieval,
            generator,
        }
    }
}

/// Orchestrates one support conversation turn at a time per session
pub struct ConversationEngine {
    config: Config,
    services: EngineServices,
    sessions: SessionStore,
    retry: RetryPolicy,
    alerts: Option<AlertQueue>,
}

impl ConversationEngine {
    pub fn new(config: Config, services: EngineServices) -> Self {
        info!(
            "ConversationEngine initialized: generation model={}, embedding model={}",
            services.generator.model(),
            services.dispatcher.model()
        );
        Self {
            retry: RetryPolicy::from_config(&config.batch),
            sessions: SessionStore::new(config.conversation.max_history),
            config,
            services,
            alerts: None,
        }
    }

    /// Forward alerts found by `health_report` to a delivery queue
    pub fn with_alerts(mut self, queue: AlertQueue) -> Self {
        self.alerts = Some(queue);
        self
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Handle one user message
    pub async fn process_message(
        &self,
        message: &str,
        session_id: &str,
    ) -> Result<ChatResult, ValidationError> {
        let started = Instant::now();
        let session_id = SessionId::try_from(session_id)?;
        let message = self.validate(message)?;
        self.services.monitor.record_request();

        let message = if self.config.conversation.mask_sensitive_data {
            mask_sensitive_data(&message)
        } else {
            message
        };

        let history: Vec<Turn> = self.sessions.with_session(&session_id, |s| {
            s.turns().iter().cloned().collect()
        });
        let mut degraded = false;

        let context = match self.retrieve(&message).await {
            Ok(context) => context,
            Err(e) => {
                warn!(session = %session_id, "Retrieval failed, continuing without context: {}", e);
                degraded = true;
                AssembledContext::default()
            }
        };

        let (intent, sentiment) = tokio::join!(
            self.classify_intent(&message),
            self.classify_sentiment(&message)
        );
        let intent = intent.unwrap_or_else(|e| {
            warn!(session = %session_id, "Intent classification failed: {}", e);
            degraded = true;
            Intent::GeneralInquiry
        });
        let sentiment = sentiment.unwrap_or_else(|e| {
            warn!(session = %session_id, "Sentiment classification failed: {}", e);
            degraded = true;
            0.0
        });
        debug!(session = %session_id, %intent, sentiment, "Classified message");

        let window = history.len().saturating_sub(self.config.conversation.history_window);
        let recent: Vec<&Turn> = history[window..].iter().collect();
        let prompt = prompts::response_prompt(&context.text, &recent, intent, sentiment, &message);

        let response = match self
            .generate(
                prompt,
                self.config.conversation.response_max_tokens,
                self.config.conversation.temperature,
            )
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!(session = %session_id, "Empty reply from generator, using template");
                degraded = true;
                intent.fallback_response().to_string()
            }
            Err(e) => {
                warn!(session = %session_id, "Reply generation failed, using template: {}", e);
                degraded = true;
                intent.fallback_response().to_string()
            }
        };

        let suggestions: Vec<String> = intent.suggestions().iter().map(|s| s.to_string()).collect();

        let all_prior: Vec<&Turn> = history.iter().collect();
        let mut decision = escalation::decide(
            &self.config.escalation,
            EscalationInput {
                message: &message,
                intent,
                sentiment,
            },
            &all_prior,
        );
        if degraded {
            decision.add(EscalationReason::Degraded);
        }

        let turn = Turn {
            user_text: message,
            assistant_text: response.clone(),
            intent,
            sentiment,
            timestamp: Utc::now(),
        };
        let sticky = self.config.escalation.sticky;
        self.sessions.with_session(&session_id, |s| {
            if s.escalated {
                decision.add(EscalationReason::Sticky);
            } else if sticky && decision.should_escalate {
                s.escalated = true;
            }
            s.push(turn);
        });

        if degraded {
            self.services.monitor.record_error();
        }
        let elapsed = started.elapsed();
        self.services
            .monitor
            .record_latency(LatencyKind::Response, elapsed);

        if decision.should_escalate {
            info!(
                session = %session_id,
                reasons = ?decision.reasons,
                "Conversation flagged for human handoff"
            );
        }

        Ok(ChatResult {
            session_id: session_id.to_string(),
            response,
            intent,
            sentiment,
            suggestions,
            context_used: !context.is_empty(),
            context_passages: context.passages_used,
            should_escalate: decision.should_escalate,
            escalation_reasons: decision.reasons,
            degraded,
            processing_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        })
    }

    /// Turns kept for a session, oldest first
    pub fn session_history(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        let id = SessionId::try_from(session_id)?;
        Ok(self.sessions.history(&id))
    }

    /// Forget a session. Returns false if it did not exist.
    pub fn clear_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let id = SessionId::try_from(session_id)?;
        let removed = self.sessions.remove(&id);
        if removed {
            debug!(session = %id, "Session cleared");
        }
        Ok(removed)
    }

    /// Release a session held in escalation
    pub fn reset_escalation(&self, session_id: &str) -> Result<(), SessionError> {
        let id = SessionId::try_from(session_id)?;
        self.sessions.with_existing(&id, |s| s.escalated = false)?;
        info!(session = %id, "Escalation reset");
        Ok(())
    }

    /// Hand a session to a human agent and open a ticket
    pub fn escalate_to_human(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<EscalationTicket, SessionError> {
        let id = SessionId::try_from(session_id)?;
        let transcript = self.sessions.with_existing(&id, |s| {
            s.escalated = true;
            s.turns().iter().cloned().collect::<Vec<_>>()
        })?;

        let ticket = EscalationTicket {
            ticket_id: format!("TICKET-{}", Uuid::new_v4().simple()),
            session_id: id.to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
            transcript,
        };
        info!(
            ticket = %ticket.ticket_id,
            session = %id,
            turns = ticket.transcript.len(),
            "Escalation ticket created: {}",
            reason
        );
        Ok(ticket)
    }

    /// Store a 1-5 rating for one of the session's turns
    pub fn add_feedback(
        &self,
        session_id: &str,
        turn_index: usize,
        rating: u8,
        comment: &str,
    ) -> Result<Feedback, SessionError> {
        let id = SessionId::try_from(session_id)?;
        if !(1..=5).contains(&rating) {
            return Err(SessionError::InvalidRating(rating));
        }

        let feedback = self.sessions.with_existing(&id, |s| {
            if turn_index >= s.len() {
                return Err(SessionError::TurnNotFound {
                    session: id.to_string(),
                    index: turn_index,
                });
            }
            let feedback = Feedback {
                turn_index,
                rating,
                comment: comment.to_string(),
                timestamp: Utc::now(),
            };
            s.feedback.push(feedback.clone());
            Ok(feedback)
        })??;

        info!(session = %id, turn_index, rating, "User feedback received");
        Ok(feedback)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Metrics, cache and dispatcher state plus every current alert.
    /// Alerts are also queued for delivery when a queue is attached.
    pub fn health_report(&self, host: Option<HostMetrics>) -> HealthReport {
        let metrics = self.services.monitor.snapshot(host);
        let mut alerts = metrics.alerts.clone();
        alerts.extend(self.services.ledger.budget_alerts(Utc::now()));

        let status = match alerts.iter().map(|a| a.level).max() {
            Some(AlertLevel::Critical) => HealthStatus::Critical,
            Some(AlertLevel::Warning) => HealthStatus::Degraded,
            Some(AlertLevel::Info) | None => HealthStatus::Healthy,
        };

        if let Some(queue) = &self.alerts {
            queue.enqueue_all(alerts.iter().cloned());
        }

        HealthReport {
            status,
            uptime_secs: metrics.uptime_secs,
            active_sessions: self.sessions.len(),
            total_turns: self.sessions.total_turns(),
            cache: self.services.cache.stats(),
            dispatcher: self.services.dispatcher.stats(),
            metrics,
            alerts,
        }
    }

    /// Usage and cost over the last `window_days` days
    pub fn cost_report(&self, window_days: u32) -> CostBreakdown {
        self.services.ledger.breakdown(window_days)
    }

    fn validate(&self, message: &str) -> Result<String, ValidationError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let len = trimmed.chars().count();
        let max = self.config.conversation.max_message_length;
        if len > max {
            return Err(ValidationError::MessageTooLong { len, max });
        }
        Ok(normalize_whitespace(trimmed))
    }

    async fn retrieve(&self, message: &str) -> Result<AssembledContext, DispatchError> {
        let vector = self.services.dispatcher.submit(message).await?;

        let started = Instant::now();
        let retrieval = &self.services.retrieval;
        let top_k = self.config.retrieval.top_k;
        let vector_ref = &vector;
        let passages = with_backoff(&self.retry, "Knowledge search", move |_| {
            retrieval.search_similar(vector_ref, top_k)
        })
        .await;
        self.services
            .monitor
            .record_latency(LatencyKind::Search, started.elapsed());
        let passages = passages?;
        self.services
            .ledger
            .record(Operation::Search, 0, "knowledge-index");

        let context = assemble_context(
            &passages,
            self.config.retrieval.similarity_threshold,
            top_k,
            self.config.retrieval.max_context_length,
        );
        debug!(
            "Retrieved {} passages, {} used ({} chars)",
            passages.len(),
            context.passages_used,
            context.text.chars().count()
        );
        Ok(context)
    }

    async fn classify_intent(&self, message: &str) -> Result<Intent, ProviderError> {
        let raw = self
            .generate(
                prompts::intent_prompt(message),
                self.config.conversation.classify_max_tokens,
                self.config.conversation.classify_temperature,
            )
            .await?;
        Ok(Intent::from_model_output(&raw))
    }

    async fn classify_sentiment(&self, message: &str) -> Result<f32, ProviderError> {
        let raw = self
            .generate(
                prompts::sentiment_prompt(message),
                self.config.conversation.classify_max_tokens,
                self.config.conversation.classify_temperature,
            )
            .await?;
        Ok(parse_sentiment(&raw))
    }

    async fn generate(
        &self,
        prompt: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let request = GenerationRequest {
            prompt,
            max_tokens,
            temperature,
        };
        let generator = &self.services.generator;
        let request_ref = &request;

        let started = Instant::now();
        let result = with_backoff(&self.retry, "Generation", move |_| {
            generator.generate(request_ref)
        })
        .await;
        self.services
            .monitor
            .record_latency(LatencyKind::Generation, started.elapsed());

        let generation = result?;
        self.services.ledger.record(
            Operation::Generation,
            u64::from(generation.tokens_used),
            generator.model(),
        );
        Ok(generation.text)
    }
}
