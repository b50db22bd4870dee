//! Blessings and their lifecycle.
//!
//! A blessing is a time-bounded claim of one user's attention on an
//! intention. It is created `Active` when the user switches attention to the
//! intention, becomes `Potential` when the user switches away, and becomes a
//! `Given` token of gratitude once assigned to someone who served the
//! intention.
//!
//! ```text
//! Active ──switch away──▶ Potential ──assign──▶ Given
//! ```
//!
//! No transition re-enters `Active`, and `Given` is terminal. A given
//! blessing only changes steward afterwards.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::engine::GratitudeEngine;
use crate::error::{GratitudeError, Result};
use crate::ids::{BlessingId, IntentionId, ProofId, UserId, short_user};
use crate::store::Document;

/// Lifecycle state of a blessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlessingStatus {
    /// The user's attention is currently on the intention.
    Active,
    /// Attention has moved on; the duration is fixed and can be given.
    Potential,
    /// Assigned to a steward as a token of gratitude.
    Given,
}

impl BlessingStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: BlessingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Potential) | (Self::Potential, Self::Given)
        )
    }

    /// Whether a blessing in this state still counts toward the live
    /// potential of the intention it was created on.
    pub fn counts_toward_potential(self) -> bool {
        !matches!(self, Self::Given)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Potential => "potential",
            Self::Given => "given",
        }
    }
}

/// A blessing record. Once given, it is also a token of gratitude and may
/// be composed into token trees through `parent_id` / `children`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blessing {
    pub id: BlessingId,
    /// The user whose attention this blessing measures.
    pub user_id: UserId,
    pub intention_id: IntentionId,
    /// Position of the opening event in the user's attention sequence.
    pub attention_index: usize,
    /// Reflection left when the user switched away.
    pub content: String,
    /// Creation time (Unix millis).
    pub timestamp: i64,
    pub status: BlessingStatus,
    /// Current holder of the blessing.
    pub steward_id: UserId,
    pub parent_id: Option<BlessingId>,
    #[serde(default)]
    pub children: Vec<BlessingId>,
    /// The proof of service this blessing was assigned for.
    pub proof_id: Option<ProofId>,
}

impl Document for Blessing {
    type Id = BlessingId;

    fn id(&self) -> BlessingId {
        self.id
    }
}

impl Blessing {
    pub(crate) fn new_active(
        user_id: UserId,
        intention_id: IntentionId,
        attention_index: usize,
        timestamp: i64,
    ) -> Self {
        Self {
            id: BlessingId::generate(),
            user_id,
            intention_id,
            attention_index,
            content: String::new(),
            timestamp,
            status: BlessingStatus::Active,
            steward_id: user_id,
            parent_id: None,
            children: Vec::new(),
            proof_id: None,
        }
    }

    /// Whether this blessing has become a token of gratitude.
    pub fn is_token(&self) -> bool {
        self.status == BlessingStatus::Given
    }

    fn transition(&mut self, next: BlessingStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(GratitudeError::invalid_state(format!(
                "blessing {} is {}, cannot become {}",
                self.id,
                self.status.label(),
                next.label()
            )));
        }
        self.status = next;
        Ok(())
    }

    /// `Active → Potential`, optionally recording a reflection.
    pub(crate) fn release(&mut self, content: Option<String>) -> Result<()> {
        self.transition(BlessingStatus::Potential)?;
        if let Some(content) = content {
            self.content = content;
        }
        Ok(())
    }

    /// `Potential → Given`. Returns the previous steward.
    pub(crate) fn give(&mut self, to: UserId, proof: ProofId) -> Result<UserId> {
        self.transition(BlessingStatus::Given)?;
        let previous = self.steward_id;
        self.steward_id = to;
        self.proof_id = Some(proof);
        Ok(previous)
    }
}

impl GratitudeEngine {
    /// Fetch a blessing.
    pub async fn blessing(&self, id: &BlessingId) -> Result<Blessing> {
        self.load_blessing(id).await
    }

    /// All blessings created by a user, in attention order.
    pub async fn blessings_for_user(&self, user_id: &UserId) -> Result<Vec<Blessing>> {
        let mut blessings: Vec<_> = self
            .stores
            .blessings
            .all()
            .await?
            .into_iter()
            .filter(|b| &b.user_id == user_id)
            .collect();
        blessings.sort_by_key(|b| b.attention_index);
        Ok(blessings)
    }

    /// Given blessings currently held by a user.
    pub async fn tokens_stewarded_by(&self, user_id: &UserId) -> Result<Vec<Blessing>> {
        let mut tokens: Vec<_> = self
            .stores
            .blessings
            .all()
            .await?
            .into_iter()
            .filter(|b| b.is_token() && &b.steward_id == user_id)
            .collect();
        tokens.sort_by_key(|b| (b.timestamp, b.attention_index));
        Ok(tokens)
    }

    /// Assign a potential blessing to a user who served its intention.
    ///
    /// The proof must have been posted on the blessing's intention. Returns
    /// the previous steward. Fails with `InvalidState` (and writes nothing)
    /// unless the blessing is `Potential`.
    #[instrument(skip(self), fields(blessing = %blessing_id, to = %short_user(&to_user_id)))]
    pub async fn assign_blessing(
        &self,
        blessing_id: BlessingId,
        to_user_id: UserId,
        proof_id: ProofId,
    ) -> Result<UserId> {
        let blessing = self.load_blessing(&blessing_id).await?;
        if blessing.status != BlessingStatus::Potential {
            warn!(status = blessing.status.label(), "refusing to assign blessing");
            return Err(GratitudeError::invalid_state(format!(
                "blessing {} is {}, only potential blessings can be assigned",
                blessing_id,
                blessing.status.label()
            )));
        }

        let intention = self.load_intention(&blessing.intention_id).await?;
        if !intention.proofs_of_service.contains(&proof_id) {
            return Err(GratitudeError::not_found("proof", proof_id));
        }

        // The status is re-checked under the blessing lock.
        let previous = self
            .update_blessing(&blessing_id, |b| b.give(to_user_id, proof_id))
            .await?;

        self.record_transfer(blessing_id, previous, to_user_id, "assignment")
            .await?;
        info!(from = %short_user(&previous), "blessing given");
        Ok(previous)
    }
}
