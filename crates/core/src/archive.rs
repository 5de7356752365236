//! Persistence collaborator seam
//!
//! Durable storage of finished exchanges is an external concern. The engine
//! hands over a compact record after streaming closes; archive failures must
//! never affect the response already delivered to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::answer::Answer;
use crate::query::Query;

/// The compact record handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedExchange {
    pub query_id: Uuid,
    pub user_id: Option<String>,
    pub question: String,
    pub answer: Answer,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedExchange {
    pub fn new(query: &Query, answer: Answer) -> Self {
        Self {
            query_id: query.id,
            user_id: query.user_id.clone(),
            question: query.text.clone(),
            answer,
            archived_at: Utc::now(),
        }
    }
}

/// Receives finished exchanges. Implementations must be safe under
/// concurrent use; errors are logged by the caller and otherwise ignored.
#[async_trait]
pub trait ExchangeArchive: Send + Sync {
    async fn store(&self, exchange: ArchivedExchange) -> std::result::Result<(), String>;
}

/// No-op archive for tests and profiles without a persistence collaborator.
#[derive(Debug, Default)]
pub struct NullArchive;

#[async_trait]
impl ExchangeArchive for NullArchive {
    async fn store(&self, _exchange: ArchivedExchange) -> std::result::Result<(), String> {
        Ok(())
    }
}
