//! Query router
//!
//! Two-stage domain classification. A keyword pre-filter over the
//! per-domain lexicon runs first; only when its verdict is not confident
//! does a structured LLM classification call go out. Out-of-scope queries
//! are refused; router failures degrade to retrieval over all domains.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use sodam_config::{PromptRegistry, Purpose, RouterConfig, RouterLexicon};
use sodam_core::DomainTag;
use sodam_llm::JudgeClient;

/// Routing result.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Out of the advisory domains; the engine stops with a canned message.
    Refused,
    /// Ordered non-empty domain set; order expresses retrieval priority.
    Routed {
        domains: Vec<DomainTag>,
        /// True when the LLM stage failed and the router fell back to all
        /// domains in priority order with a reduced budget.
        degraded: bool,
    },
}

#[derive(Debug, Deserialize)]
struct Classification {
    #[serde(default)]
    domains: Vec<String>,
}

/// Two-stage domain router.
pub struct Router {
    lexicon: RouterLexicon,
    config: RouterConfig,
    priority: Vec<DomainTag>,
    judge: JudgeClient,
    registry: Arc<PromptRegistry>,
}

impl Router {
    pub fn new(
        lexicon: RouterLexicon,
        config: RouterConfig,
        priority: Vec<DomainTag>,
        judge: JudgeClient,
        registry: Arc<PromptRegistry>,
    ) -> Self {
        Self { lexicon, config, priority, judge, registry }
    }

    /// Classify a (possibly rewritten) query.
    ///
    /// Running this twice on the same text yields the same outcome: the
    /// pre-filter is deterministic and the LLM stage is only consulted when
    /// the pre-filter is not confident.
    pub async fn route(&self, text: &str) -> RouteOutcome {
        if text.trim().is_empty() {
            return RouteOutcome::Refused;
        }

        if let Some(domains) = self.prefilter(text) {
            tracing::debug!(?domains, "router pre-filter confident");
            return RouteOutcome::Routed { domains, degraded: false };
        }

        match self.classify_llm(text).await {
            Ok(Some(domains)) => RouteOutcome::Routed { domains, degraded: false },
            Ok(None) => RouteOutcome::Refused,
            Err(error) => {
                // Defensive degrade, not an error: retrieval runs over all
                // domains in priority order with a reduced budget.
                tracing::warn!(%error, "router LLM stage failed, degrading to all domains");
                RouteOutcome::Routed { domains: self.priority.clone(), degraded: true }
            }
        }
    }

    /// Keyword pre-filter. Returns a routed domain set when the dominant
    /// domain clears the score floor and the margin to the runner-up.
    fn prefilter(&self, text: &str) -> Option<Vec<DomainTag>> {
        let mut hits: HashMap<DomainTag, usize> = HashMap::new();
        for tag in &self.priority {
            let count = self.lexicon.hits(*tag, text);
            if count > 0 {
                hits.insert(*tag, count);
            }
        }

        let total: usize = hits.values().sum();
        if total == 0 {
            return None;
        }

        let mut scored: Vec<(DomainTag, f32)> = hits
            .iter()
            .map(|(tag, count)| (*tag, *count as f32 / total as f32))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.rank(a.0).cmp(&self.rank(b.0)))
        });

        let top_score = scored[0].1;
        let runner_up = scored.get(1).map(|(_, s)| *s).unwrap_or(0.0);

        if top_score >= self.config.min_score
            && top_score - runner_up >= self.config.margin_threshold
        {
            // Secondary domains ride along only when they score close to the
            // dominant one; incidental keyword hits stay out of the fan-out.
            Some(
                scored
                    .into_iter()
                    .filter(|(_, score)| *score >= top_score / 2.0)
                    .map(|(tag, _)| tag)
                    .collect(),
            )
        } else {
            None
        }
    }

    async fn classify_llm(&self, text: &str) -> Result<Option<Vec<DomainTag>>, sodam_llm::LlmError> {
        let mut values = HashMap::new();
        values.insert("question", text.to_string());
        let prompt = self
            .registry
            .render(None, Purpose::RouterClassify, &values)
            .map_err(|e| sodam_llm::LlmError::Configuration(e.to_string()))?;

        let classification: Classification = self.judge.structured(&prompt).await?;

        if classification
            .domains
            .iter()
            .any(|d| d.trim() == "out_of_scope")
        {
            return Ok(None);
        }

        let mut domains: Vec<DomainTag> = Vec::new();
        for name in &classification.domains {
            if let Some(tag) = DomainTag::parse(name) {
                if !domains.contains(&tag) {
                    domains.push(tag);
                }
            }
        }

        if domains.is_empty() {
            // A well-formed reply with no usable domain is out of scope.
            return Ok(None);
        }

        Ok(Some(domains))
    }

    fn rank(&self, tag: DomainTag) -> usize {
        self.priority.iter().position(|t| *t == tag).unwrap_or(self.priority.len())
    }
}
