//! Prompt evolution: learn from how reviewers treated a finished session.
//!
//! After a session is finalized the advisor looks at its rejected and
//! edited cards, condenses them into [`RejectionPatterns`] plus a handful of
//! example cards, and asks the model for a better generation prompt. The
//! result is stored as a pending [`PromptSuggestion`]; nothing changes until
//! a person approves it, at which point it becomes the next active version.

use crate::config::ForgeConfig;
use crate::error::ForgeError;
use crate::llm::{resolve_provider, ModelClient};
use crate::model::{
    CardRejection, CardStatus, PromptSuggestion, PromptType, PromptVersion, RejectionPatterns,
};
use crate::prompts::{evolution_prompt, EvolutionEvidence};
use crate::store::{NewSuggestion, Store};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Example cards of each kind shown to the model.
const EXAMPLES_PER_KIND: usize = 5;

/// Sample reasons kept per rejection type.
const REASONS_PER_TYPE: usize = 3;

#[derive(Debug, Deserialize)]
struct EvolutionResponse {
    reasoning: String,
    suggested_system_prompt: String,
    suggested_user_prompt_template: String,
}

/// Count rejections by type and keep a few reasons for each.
pub fn rejection_patterns(rejections: &[CardRejection]) -> RejectionPatterns {
    let mut patterns = RejectionPatterns {
        total_rejections: rejections.len(),
        ..Default::default()
    };
    for r in rejections {
        let kind = r.rejection_type.to_string();
        *patterns.type_distribution.entry(kind.clone()).or_insert(0) += 1;
        let reason = r.reason.trim();
        if reason.is_empty() {
            continue;
        }
        let samples = patterns.sample_reasons.entry(kind).or_default();
        if samples.len() < REASONS_PER_TYPE {
            samples.push(reason.to_string());
        }
    }
    patterns
}

#[derive(Debug, Clone)]
pub struct PromptEvolutionAdvisor {
    store: Store,
    config: Arc<ForgeConfig>,
}

impl PromptEvolutionAdvisor {
    pub fn new(store: Store, config: Arc<ForgeConfig>) -> Self {
        Self { store, config }
    }

    /// Propose a replacement generation prompt from one session's reviews.
    ///
    /// Returns `Ok(None)` when the session has no rejected or edited cards.
    pub async fn analyze_session(&self, session_id: i64) -> Result<Option<PromptSuggestion>, ForgeError> {
        let session = self.store.require_session(session_id)?;
        let rejected = self.store.list_cards(session_id, Some(CardStatus::Rejected))?;
        let edited = self.store.list_cards(session_id, Some(CardStatus::Edited))?;
        if rejected.is_empty() && edited.is_empty() {
            info!(session_id, "No rejected or edited cards; nothing to learn");
            return Ok(None);
        }

        let version = match session.prompt_version_id {
            Some(id) => self.store.get_prompt_version(id)?,
            None => self.store.active_prompt(PromptType::Generation)?,
        };
        let Some(version) = version else {
            warn!(session_id, "Session has no generation prompt to improve");
            return Ok(None);
        };

        let approved = self.store.list_cards(session_id, Some(CardStatus::Approved))?;
        let patterns = rejection_patterns(&self.store.session_rejections(session_id)?);
        let take = |cards: &[crate::model::Card]| cards[..cards.len().min(EXAMPLES_PER_KIND)].to_vec();
        let (approved, rejected, edited) = (take(&approved), take(&rejected), take(&edited));

        let prompt = evolution_prompt(
            &version,
            &EvolutionEvidence {
                patterns: &patterns,
                approved: &approved,
                rejected: &rejected,
                edited: &edited,
            },
        );
        let provider = resolve_provider(&self.config, Some(&session.provider))?;
        let client = ModelClient::new(provider, &self.config);
        let response: EvolutionResponse = client.complete_structured(&prompt).await?;

        let suggestion = self.store.create_suggestion(&NewSuggestion {
            prompt_version_id: version.id,
            session_id,
            suggested_system_prompt: response.suggested_system_prompt,
            suggested_user_prompt_template: response.suggested_user_prompt_template,
            reasoning: response.reasoning,
            patterns,
        })?;
        info!(
            session_id,
            suggestion_id = suggestion.id,
            rejections = suggestion.patterns.total_rejections,
            "Prompt suggestion created"
        );
        Ok(Some(suggestion))
    }

    /// Activate a suggestion as the next version of its prompt type.
    pub fn approve_suggestion(&self, suggestion_id: i64) -> Result<PromptVersion, ForgeError> {
        let version = self.store.approve_suggestion(suggestion_id)?;
        info!(
            suggestion_id,
            version = version.version,
            prompt_type = %version.prompt_type,
            "Prompt version activated"
        );
        Ok(version)
    }

    pub fn reject_suggestion(&self, suggestion_id: i64) -> Result<PromptSuggestion, ForgeError> {
        self.store.reject_suggestion(suggestion_id)
    }

    pub fn pending_suggestions(&self) -> Result<Vec<PromptSuggestion>, ForgeError> {
        self.store.pending_suggestions()
    }

    pub fn prompt_history(&self, prompt_type: PromptType) -> Result<Vec<PromptVersion>, ForgeError> {
        self.store.prompt_history(prompt_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedProvider;
    use crate::llm::ModelProvider;
    use crate::model::{NewCard, NewSession, RejectionType, SessionMetadata, SourceKind};
    use crate::prompts::default_prompt_seeds;
    use crate::store::test_support;
    use chrono::Utc;
    use std::path::PathBuf;

    fn rejection(kind: RejectionType, reason: &str) -> CardRejection {
        CardRejection {
            id: 0,
            card_id: 1,
            reason: reason.into(),
            rejection_type: kind,
            auto_corrected: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn patterns_count_types_and_cap_samples() {
        let rejections = vec![
            rejection(RejectionType::Unclear, "vague"),
            rejection(RejectionType::Unclear, "ambiguous"),
            rejection(RejectionType::Unclear, "  "),
            rejection(RejectionType::Unclear, "what?"),
            rejection(RejectionType::Unclear, "unclear wording"),
            rejection(RejectionType::Incorrect, "wrong date"),
        ];
        let patterns = rejection_patterns(&rejections);
        assert_eq!(patterns.total_rejections, 6);
        assert_eq!(patterns.type_distribution["unclear"], 5);
        assert_eq!(patterns.type_distribution["incorrect"], 1);
        assert_eq!(patterns.sample_reasons["unclear"], vec!["vague", "ambiguous", "what?"]);
    }

    fn setup(replies: Vec<&str>) -> (Store, PromptEvolutionAdvisor, i64, Vec<i64>) {
        let store = test_support::store();
        store.seed_prompts(&default_prompt_seeds()).unwrap();
        let version = store.active_prompt(PromptType::Generation).unwrap().unwrap();
        let session = store
            .create_session(&NewSession {
                filename: "bio.pdf".into(),
                source_kind: SourceKind::Pdf,
                source_path: PathBuf::from("/docs/bio.pdf"),
                provider: "scripted".into(),
                metadata: SessionMetadata::default(),
                prompt_version_id: Some(version.id),
            })
            .unwrap();
        let cards: Vec<NewCard> = (0..3)
            .map(|i| NewCard {
                front: format!("Q{i}"),
                back: format!("A{i}"),
                tags: vec!["bio".into()],
                images: vec![],
            })
            .collect();
        store.set_total_batches(session.id, 1).unwrap();
        let ids = store.persist_batch(session.id, 0, &cards, 1).unwrap();

        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new(
            replies.into_iter().map(|r| Ok(r.to_string())).collect(),
        ));
        let config = ForgeConfig::builder().provider(provider).build().unwrap();
        let advisor = PromptEvolutionAdvisor::new(store.clone(), Arc::new(config));
        (store, advisor, session.id, ids)
    }

    #[tokio::test]
    async fn nothing_to_learn_without_rejections_or_edits() {
        let (store, advisor, session_id, ids) = setup(vec![]);
        store.set_card_status(ids[0], CardStatus::Approved).unwrap();
        assert!(advisor.analyze_session(session_id).await.unwrap().is_none());
        assert!(advisor.pending_suggestions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn suggestion_is_pending_until_approved() {
        let reply = r#"{"reasoning": "cards were vague", "suggested_system_prompt": "SYS v2", "suggested_user_prompt_template": "USR v2"}"#;
        let (store, advisor, session_id, ids) = setup(vec![reply]);
        store
            .reject_card(ids[0], "too vague", RejectionType::Unclear)
            .unwrap();
        store
            .edit_card(ids[1], "Q1 edited", "A1", None, CardStatus::Edited)
            .unwrap();

        let suggestion = advisor.analyze_session(session_id).await.unwrap().unwrap();
        assert_eq!(suggestion.reasoning, "cards were vague");
        assert_eq!(suggestion.patterns.type_distribution["unclear"], 1);

        let active = store.active_prompt(PromptType::Generation).unwrap().unwrap();
        assert_eq!(active.version, 1);

        let v2 = advisor.approve_suggestion(suggestion.id).unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.system_prompt, "SYS v2");
        let history = advisor.prompt_history(PromptType::Generation).unwrap();
        assert_eq!(history.iter().filter(|v| v.is_active).count(), 1);
        assert!(advisor.pending_suggestions().unwrap().is_empty());
    }
}
