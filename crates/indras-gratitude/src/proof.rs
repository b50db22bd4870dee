//! Proofs of service.
//!
//! A proof records that an intention received service from one or more
//! users. Posting a proof never touches blessings; it only makes the
//! intention's potential blessings eligible for assignment.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::blessing::{Blessing, BlessingStatus};
use crate::engine::GratitudeEngine;
use crate::error::{GratitudeError, Result};
use crate::ids::{IntentionId, ProofId, UserId, short_user};
use crate::store::read_log;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfService {
    pub id: ProofId,
    pub intention_id: IntentionId,
    /// Users who performed the service.
    pub by: Vec<UserId>,
    pub content: String,
    /// Opaque media references (URIs, content hashes).
    #[serde(default)]
    pub media: Vec<String>,
    pub timestamp: i64,
}

impl GratitudeEngine {
    /// Record service performed for an intention.
    #[instrument(skip(self, by, content, media), fields(servers = by.len()))]
    pub async fn post_proof_of_service(
        &self,
        intention_id: IntentionId,
        by: Vec<UserId>,
        content: String,
        media: Vec<String>,
    ) -> Result<ProofId> {
        if by.is_empty() {
            return Err(GratitudeError::invalid_state(
                "proof of service must name at least one user",
            ));
        }
        self.load_intention(&intention_id).await?;

        let proof = ProofOfService {
            id: ProofId::generate(),
            intention_id,
            by,
            content,
            media,
            timestamp: self.now(),
        };
        let proof_id = proof.id;
        self.stores.proofs.add(proof).await?;

        self.update_intention(&intention_id, |intention| {
            intention.proofs_of_service.push(proof_id);
            Ok(())
        })
        .await?;

        debug!(proof = %proof_id, "proof of service posted");
        Ok(proof_id)
    }

    pub async fn proof(&self, proof_id: &ProofId) -> Result<ProofOfService> {
        read_log(self.stores.proofs.as_ref())
            .await?
            .into_iter()
            .map(|entry| entry.value)
            .find(|p| &p.id == proof_id)
            .ok_or_else(|| GratitudeError::not_found("proof", proof_id))
    }

    /// Proofs posted on an intention, oldest first.
    pub async fn proofs_for(&self, intention_id: &IntentionId) -> Result<Vec<ProofOfService>> {
        Ok(read_log(self.stores.proofs.as_ref())
            .await?
            .into_iter()
            .map(|entry| entry.value)
            .filter(|p| &p.intention_id == intention_id)
            .collect())
    }

    /// Blessings a user could assign against a proof on this intention:
    /// their own potential blessings on it.
    #[instrument(skip(self), fields(user = %short_user(user_id)))]
    pub async fn assignable_blessings(
        &self,
        intention_id: &IntentionId,
        user_id: &UserId,
    ) -> Result<Vec<Blessing>> {
        let intention = self.load_intention(intention_id).await?;
        let mut assignable = Vec::new();
        for id in &intention.blessings {
            let blessing = self.load_blessing(id).await?;
            if blessing.status == BlessingStatus::Potential && &blessing.steward_id == user_id {
                assignable.push(blessing);
            }
        }
        Ok(assignable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_proof_requires_intention() {
        let engine = GratitudeEngine::in_memory();
        let err = engine
            .post_proof_of_service(IntentionId([1u8; 16]), vec![[2u8; 32]], "weeded".into(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, GratitudeError::NotFound { kind: "intention", .. }));
        assert!(engine.proofs_for(&IntentionId([1u8; 16])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_proof_is_linked_to_intention() {
        let engine = GratitudeEngine::in_memory();
        let alice = [1u8; 32];
        let bob = [2u8; 32];
        let created = engine.create_intention(alice, "garden", None).await.unwrap();

        let proof_id = engine
            .post_proof_of_service(
                created.intention_id,
                vec![bob],
                "weeded the beds".into(),
                vec!["blake3:abcd".into()],
            )
            .await
            .unwrap();

        let intention = engine.intention(&created.intention_id).await.unwrap();
        assert_eq!(intention.proofs_of_service, vec![proof_id]);
        let proof = engine.proof(&proof_id).await.unwrap();
        assert_eq!(proof.by, vec![bob]);
        assert_eq!(proof.media.len(), 1);

        // Posting a proof leaves the creator's blessing active.
        let blessing = engine.blessing(&created.switch.blessing_id).await.unwrap();
        assert_eq!(blessing.status, BlessingStatus::Active);
    }

    #[tokio::test]
    async fn test_assignable_blessings_are_potential_and_own() {
        let engine = GratitudeEngine::in_memory();
        let alice = [1u8; 32];
        let garden = engine.create_intention(alice, "garden", None).await.unwrap();
        assert!(
            engine
                .assignable_blessings(&garden.intention_id, &alice)
                .await
                .unwrap()
                .is_empty()
        );

        engine.create_intention(alice, "kitchen", None).await.unwrap();
        let assignable = engine
            .assignable_blessings(&garden.intention_id, &alice)
            .await
            .unwrap();
        assert_eq!(assignable.len(), 1);
        assert_eq!(assignable[0].id, garden.switch.blessing_id);
        assert!(
            engine
                .assignable_blessings(&garden.intention_id, &[9u8; 32])
                .await
                .unwrap()
                .is_empty()
        );
    }
}
