//! Query types
//!
//! A query is immutable once admitted; routing and retrieval decorate it
//! through separate structures rather than mutating it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optional company context attached by an identified caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyContext {
    /// KSIC industry code, e.g. "56101"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry_code: Option<String>,
    /// Region, e.g. "서울특별시"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Business stage, e.g. "예비창업" or "3년차"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_stage: Option<String>,
}

/// An admitted user question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    /// None for guest callers.
    pub user_id: Option<String>,
    pub text: String,
    pub company: Option<CompanyContext>,
    pub received_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            text: text.into(),
            company: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_company(mut self, company: CompanyContext) -> Self {
        self.company = Some(company);
        self
    }

    /// True when there is nothing to route.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}
