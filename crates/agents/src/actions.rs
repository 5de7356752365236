//! Action emitter
//!
//! Parses the generator's structured action block and validates each
//! suggestion before it reaches the UI. Invalid suggestions are dropped
//! with a warning, never surfaced as errors.

use sodam_core::{ActionSuggestion, DOCUMENT_TYPES};
use sodam_llm::parse_json_body;

/// Parse the JSON array following the `[추천 작업]` marker.
///
/// Entries that fail to deserialize into a known suggestion type are
/// skipped; an unparseable block yields no actions at all.
pub fn parse_action_block(block: &str) -> Vec<ActionSuggestion> {
    // Parse leniently: first as typed suggestions, then element-wise so one
    // bad entry does not discard the rest.
    if let Ok(actions) = parse_json_body::<Vec<ActionSuggestion>>(block) {
        return actions;
    }

    match parse_json_body::<Vec<serde_json::Value>>(block) {
        Ok(values) => values
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<ActionSuggestion>(value) {
                Ok(action) => Some(action),
                Err(error) => {
                    tracing::warn!(%error, "skipping unparseable action suggestion");
                    None
                }
            })
            .collect(),
        Err(_) => {
            tracing::warn!("action block is not a JSON array, dropping it");
            Vec::new()
        }
    }
}

/// Type-specific validation.
///
/// `document_generation` must name an allow-listed document type;
/// `external_link` must carry an absolute http(s) URL. The remaining types
/// are declarative and pass through unchanged.
pub fn validate_actions(actions: Vec<ActionSuggestion>) -> Vec<ActionSuggestion> {
    actions
        .into_iter()
        .filter(|action| match action {
            ActionSuggestion::DocumentGeneration { document_type } => {
                let allowed = DOCUMENT_TYPES.contains(&document_type.as_str());
                if !allowed {
                    tracing::warn!(document_type, "dropping unknown document type");
                }
                allowed
            }
            ActionSuggestion::ExternalLink { url, .. } => {
                let valid = is_http_url(url);
                if !valid {
                    tracing::warn!(url, "dropping external link with invalid URL");
                }
                valid
            }
            ActionSuggestion::Calculator { .. }
            | ActionSuggestion::ScheduleAlert { .. }
            | ActionSuggestion::FundingSearch { .. } => true,
        })
        .collect()
}

fn is_http_url(url: &str) -> bool {
    let rest = if let Some(rest) = url.strip_prefix("https://") {
        rest
    } else if let Some(rest) = url.strip_prefix("http://") {
        rest
    } else {
        return false;
    };

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    !host.is_empty() && !host.contains(char::is_whitespace)
}
