//! Intentions: units of intended work that accumulate attention.
//!
//! An intention collects one blessing per attention switch directed at it,
//! the proofs of service posted against it, and top-level tokens attached
//! to boost its gratitude potential.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::blessing::BlessingStatus;
use crate::engine::GratitudeEngine;
use crate::error::{GratitudeError, Result};
use crate::ids::{BlessingId, IntentionId, ProofId, UserId, short_user};
use crate::ledger::SwitchOutcome;
use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntentionStatus {
    #[default]
    Open,
    /// Closed by convention; the engine keeps accepting attention.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intention {
    pub id: IntentionId,
    pub title: String,
    /// One entry per attention switch directed at this intention.
    pub blessings: Vec<BlessingId>,
    pub proofs_of_service: Vec<ProofId>,
    /// Top-level tokens boosting this intention's potential.
    pub attached_tokens: Vec<BlessingId>,
    pub status: IntentionStatus,
    pub created_by: UserId,
    pub created_at: i64,
}

impl Document for Intention {
    type Id = IntentionId;

    fn id(&self) -> IntentionId {
        self.id
    }
}

impl Intention {
    pub fn new(title: impl Into<String>, created_by: UserId, created_at: i64) -> Self {
        Self {
            id: IntentionId::generate(),
            title: title.into(),
            blessings: Vec::new(),
            proofs_of_service: Vec::new(),
            attached_tokens: Vec::new(),
            status: IntentionStatus::Open,
            created_by,
            created_at,
        }
    }
}

/// Result of [`GratitudeEngine::create_intention`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIntention {
    pub intention_id: IntentionId,
    /// The creator's attention switch onto the new intention.
    pub switch: SwitchOutcome,
}

impl GratitudeEngine {
    /// Create an open intention and move the creator's attention onto it.
    ///
    /// `blessing_content` is the reflection recorded on the creator's
    /// previously active blessing, if any.
    #[instrument(skip(self, title, blessing_content), fields(user = %short_user(&created_by)))]
    pub async fn create_intention(
        &self,
        created_by: UserId,
        title: impl Into<String> + Send,
        blessing_content: Option<String>,
    ) -> Result<CreatedIntention> {
        let intention = Intention::new(title, created_by, self.now());
        let intention_id = intention.id;
        self.stores.intentions.put(intention).await?;
        debug!(intention = %intention_id, "intention created");

        let switch = self
            .switch_attention(created_by, intention_id, blessing_content)
            .await?;
        Ok(CreatedIntention {
            intention_id,
            switch,
        })
    }

    pub async fn intention(&self, id: &IntentionId) -> Result<Intention> {
        self.load_intention(id).await
    }

    /// All intentions, oldest first.
    pub async fn intentions(&self) -> Result<Vec<Intention>> {
        let mut all = self.stores.intentions.all().await?;
        all.sort_by_key(|i| i.created_at);
        Ok(all)
    }

    /// Attach a given token to an intention, boosting its potential by the
    /// token's whole tree. Attaching the same token twice is a no-op.
    #[instrument(skip(self))]
    pub async fn attach_token(&self, intention_id: IntentionId, token_id: BlessingId) -> Result<()> {
        let token = self.load_blessing(&token_id).await?;
        if token.status != BlessingStatus::Given {
            return Err(GratitudeError::invalid_state(format!(
                "blessing {} is {}, only given tokens can be attached",
                token_id,
                token.status.label()
            )));
        }

        self.update_intention(&intention_id, |intention| {
            if !intention.attached_tokens.contains(&token_id) {
                intention.attached_tokens.push(token_id);
            }
            Ok(())
        })
        .await
    }

    /// Mark an intention closed.
    pub async fn close_intention(&self, intention_id: IntentionId) -> Result<()> {
        self.update_intention(&intention_id, |intention| {
            intention.status = IntentionStatus::Closed;
            Ok(())
        })
        .await
    }
}
