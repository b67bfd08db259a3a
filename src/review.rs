//! Human review of generated cards.
//!
//! ```text
//! pending ──approve──▶ approved
//!    │                    │
//!    └──reject──▶ rejected ◀┘
//!                   │
//!              auto-correct ──▶ pending (content replaced)
//!
//! any state ──edit──▶ edited (first edit snapshots the original)
//! ```
//!
//! Approve, reject and edit are plain store transactions. Auto-correct and
//! the validation pass call the model through the session's provider.

use crate::config::ForgeConfig;
use crate::error::ForgeError;
use crate::llm::{resolve_provider, ModelClient};
use crate::model::{Card, CardRejection, CardStatus, PromptType, RejectionType};
use crate::prompts::{correction_prompt, validation_prompt};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a bulk review action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
    /// `(card id, error)` for every id that failed.
    pub errors: Vec<(i64, String)>,
}

#[derive(Debug, Deserialize)]
struct Correction {
    front: String,
    back: String,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    #[serde(default)]
    improved_cards: Vec<ImprovedCard>,
}

/// A rewrite proposed by the validation pass. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovedCard {
    /// Card id echoed by the model, if it kept it.
    #[serde(default)]
    pub id: Option<i64>,
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone)]
pub struct ReviewWorkflow {
    store: Store,
    config: Arc<ForgeConfig>,
}

impl ReviewWorkflow {
    pub fn new(store: Store, config: Arc<ForgeConfig>) -> Self {
        Self { store, config }
    }

    pub fn approve(&self, card_id: i64) -> Result<Card, ForgeError> {
        let card = self.store.set_card_status(card_id, CardStatus::Approved)?;
        info!(card_id, "Card approved");
        Ok(card)
    }

    pub fn reject(
        &self,
        card_id: i64,
        reason: &str,
        rejection_type: RejectionType,
    ) -> Result<CardRejection, ForgeError> {
        let rejection = self.store.reject_card(card_id, reason, rejection_type)?;
        info!(card_id, kind = %rejection_type, "Card rejected");
        Ok(rejection)
    }

    /// Replace a card's text. The pre-edit content is kept on first edit only.
    pub fn edit(
        &self,
        card_id: i64,
        front: &str,
        back: &str,
        tags: Option<&[String]>,
    ) -> Result<Card, ForgeError> {
        let card = self
            .store
            .edit_card(card_id, front, back, tags, CardStatus::Edited)?;
        info!(card_id, "Card edited");
        Ok(card)
    }

    pub fn batch_approve(&self, card_ids: &[i64]) -> BatchOutcome {
        self.apply_each(card_ids, |id| self.approve(id).map(|_| ()))
    }

    pub fn batch_reject(
        &self,
        card_ids: &[i64],
        reason: &str,
        rejection_type: RejectionType,
    ) -> BatchOutcome {
        self.apply_each(card_ids, |id| self.reject(id, reason, rejection_type).map(|_| ()))
    }

    fn apply_each(&self, card_ids: &[i64], op: impl Fn(i64) -> Result<(), ForgeError>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for &id in card_ids {
            match op(id) {
                Ok(()) => outcome.processed += 1,
                Err(e) => {
                    warn!(card_id = id, "Bulk review skipped card: {}", e);
                    outcome.failed += 1;
                    outcome.errors.push((id, e.to_string()));
                }
            }
        }
        outcome
    }

    fn client_for_session(&self, session_id: i64) -> Result<ModelClient, ForgeError> {
        let session = self.store.require_session(session_id)?;
        let provider = resolve_provider(&self.config, Some(&session.provider))?;
        Ok(ModelClient::new(provider, &self.config))
    }

    /// Rewrite a rejected card from its latest rejection feedback.
    ///
    /// The card goes back to pending for another look; it is never
    /// approved by the model.
    pub async fn auto_correct(&self, card_id: i64) -> Result<Card, ForgeError> {
        let card = self.store.require_card(card_id)?;
        let rejection = self
            .store
            .latest_rejection(card_id)?
            .ok_or(ForgeError::NoRejectionHistory { card_id })?;

        let client = self.client_for_session(card.session_id)?;
        let prompt = correction_prompt(&card, &rejection);
        let correction: Correction = client.complete_structured(&prompt).await?;
        if correction.front.trim().is_empty() || correction.back.trim().is_empty() {
            return Err(ForgeError::InvalidModelOutput {
                attempts: 1,
                detail: "correction has an empty side".to_string(),
            });
        }

        let updated = self.store.apply_correction(
            card_id,
            rejection.id,
            correction.front.trim(),
            correction.back.trim(),
        )?;
        info!(card_id, rejection_id = rejection.id, "Card auto-corrected");
        Ok(updated)
    }

    /// Ask the model to review a session's pending cards.
    ///
    /// Returns the proposed rewrites; cards are left untouched.
    pub async fn validate_cards(&self, session_id: i64) -> Result<Vec<ImprovedCard>, ForgeError> {
        let cards = self.store.list_cards(session_id, Some(CardStatus::Pending))?;
        if cards.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client_for_session(session_id)?;
        let version = self.store.active_prompt(PromptType::Validation)?;
        let prompt = validation_prompt(version.as_ref(), &cards);
        let response: ValidationResponse = client.complete_structured(&prompt).await?;
        info!(
            session_id,
            reviewed = cards.len(),
            improved = response.improved_cards.len(),
            "Validation pass finished"
        );
        Ok(response.improved_cards)
    }
}
