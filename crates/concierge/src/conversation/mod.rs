//! Conversation handling: sessions, classification, prompting, escalation
//! and the engine that runs them per message.

pub mod classify;
pub mod context;
pub mod engine;
pub mod escalation;
pub mod intent;
pub mod prompts;
pub mod sanitize;
pub mod session;

pub use context::{AssembledContext, assemble_context};
pub use engine::{
    ChatResult, ConversationEngine, EngineServices, EscalationTicket, HealthReport, HealthStatus,
};
pub use escalation::{EscalationDecision, EscalationInput, EscalationReason, decide};
pub use intent::{Intent, UnknownIntent};
pub use session::{
    ConversationSession, Feedback, SessionError, SessionId, SessionIdError, SessionStore, Turn,
};
