//! Token trees and stewardship transfer.
//!
//! A given blessing is a token of gratitude. Tokens compose into trees via
//! `parent_id` / `children`, and a tree moves between stewards as a unit.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use crate::blessing::{Blessing, BlessingStatus};
use crate::engine::GratitudeEngine;
use crate::error::{GratitudeError, Result};
use crate::ids::{BlessingId, UserId, short_user};
use crate::stewardship::StewardshipTransfer;
use crate::store::read_log;

pub(crate) fn require_token(blessing: &Blessing) -> Result<()> {
    if blessing.status != BlessingStatus::Given {
        return Err(GratitudeError::invalid_state(format!(
            "blessing {} is {}, not a token",
            blessing.id,
            blessing.status.label()
        )));
    }
    Ok(())
}

impl GratitudeEngine {
    /// Link `child_id` under `parent_id`, detaching it from any previous
    /// parent.
    ///
    /// Rejects self-links and links that would make the child its own
    /// ancestor. Both blessings must be given tokens.
    #[instrument(skip(self))]
    pub async fn attach_child_token(
        &self,
        parent_id: BlessingId,
        child_id: BlessingId,
    ) -> Result<()> {
        if parent_id == child_id {
            return Err(GratitudeError::CycleDetected {
                parent: parent_id.to_string(),
                child: child_id.to_string(),
            });
        }
        let _tree = self.tree_lock.lock().await;

        let parent = self.load_blessing(&parent_id).await?;
        let child = self.load_blessing(&child_id).await?;
        require_token(&parent)?;
        require_token(&child)?;

        if child.parent_id == Some(parent_id) {
            return Ok(());
        }

        // Walk the proposed parent's ancestor chain.
        let mut seen = HashSet::new();
        let mut cursor = parent.parent_id;
        while let Some(ancestor) = cursor {
            if ancestor == child_id {
                warn!("re-parenting would create a cycle");
                return Err(GratitudeError::CycleDetected {
                    parent: parent_id.to_string(),
                    child: child_id.to_string(),
                });
            }
            if !seen.insert(ancestor) || seen.len() > self.config.max_tree_depth {
                return Err(GratitudeError::data_integrity(format!(
                    "ancestor chain of {} exceeds {} links or loops",
                    parent_id, self.config.max_tree_depth
                )));
            }
            cursor = self.load_blessing(&ancestor).await?.parent_id;
        }

        if let Some(old_parent) = child.parent_id {
            self.update_blessing(&old_parent, |b| {
                b.children.retain(|c| c != &child_id);
                Ok(())
            })
            .await?;
        }
        self.update_blessing(&parent_id, |b| {
            if !b.children.contains(&child_id) {
                b.children.push(child_id);
            }
            Ok(())
        })
        .await?;
        self.update_blessing(&child_id, |b| {
            b.parent_id = Some(parent_id);
            Ok(())
        })
        .await?;

        debug!("token attached");
        Ok(())
    }

    /// Make a token top-level again. Returns the parent it was detached
    /// from, if any.
    #[instrument(skip(self))]
    pub async fn detach_child_token(&self, child_id: BlessingId) -> Result<Option<BlessingId>> {
        let _tree = self.tree_lock.lock().await;

        let child = self.load_blessing(&child_id).await?;
        let Some(parent_id) = child.parent_id else {
            return Ok(None);
        };

        self.update_blessing(&parent_id, |b| {
            b.children.retain(|c| c != &child_id);
            Ok(())
        })
        .await?;
        self.update_blessing(&child_id, |b| {
            b.parent_id = None;
            Ok(())
        })
        .await?;

        debug!(parent = %parent_id, "token detached");
        Ok(Some(parent_id))
    }

    /// Append a stewardship transfer to the history, if enabled.
    pub(crate) async fn record_transfer(
        &self,
        token_id: BlessingId,
        from: UserId,
        to: UserId,
        reason: &str,
    ) -> Result<()> {
        if !self.config.record_transfers {
            return Ok(());
        }
        self.stores
            .transfers
            .add(StewardshipTransfer {
                token_id,
                from,
                to,
                reason: reason.to_string(),
                timestamp: self.now(),
            })
            .await?;
        Ok(())
    }

    /// Move every node of a token tree to `to_user`.
    ///
    /// The tree is flattened before any write. Only `steward_id` changes;
    /// status, links and proofs are preserved. Returns the ids whose
    /// steward actually changed.
    #[instrument(skip(self, reason), fields(token = %top_token, to = %short_user(&to_user)))]
    pub async fn transfer_token_tree(
        &self,
        top_token: BlessingId,
        to_user: UserId,
        reason: &str,
    ) -> Result<Vec<BlessingId>> {
        let nodes = self.flatten_token_tree(&top_token).await?;

        let mut changed = Vec::new();
        for node in nodes {
            let previous = self
                .update_blessing(&node, |b| Ok(std::mem::replace(&mut b.steward_id, to_user)))
                .await?;
            if previous != to_user {
                self.record_transfer(node, previous, to_user, reason).await?;
                changed.push(node);
            }
        }

        debug!(changed = changed.len(), reason, "token tree transferred");
        Ok(changed)
    }

    /// Gift a token (and its whole tree) to another user.
    #[instrument(skip(self), fields(to = %short_user(&to_user)))]
    pub async fn give_token(
        &self,
        token_id: BlessingId,
        to_user: UserId,
    ) -> Result<Vec<BlessingId>> {
        let token = self.load_blessing(&token_id).await?;
        require_token(&token)?;
        let changed = self.transfer_token_tree(token_id, to_user, "gift").await?;
        info!(from = %short_user(&token.steward_id), nodes = changed.len(), "token gifted");
        Ok(changed)
    }

    /// Stewardship transfers of a token, in write order.
    pub async fn steward_history(&self, token_id: &BlessingId) -> Result<Vec<StewardshipTransfer>> {
        Ok(read_log(self.stores.transfers.as_ref())
            .await?
            .into_iter()
            .map(|entry| entry.value)
            .filter(|t| &t.token_id == token_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::ids::IntentionId;
    use crate::store::GratitudeStores;

    const ALICE: UserId = [1u8; 32];
    const BOB: UserId = [2u8; 32];

    fn engine(config: EngineConfig) -> GratitudeEngine {
        GratitudeEngine::new(
            GratitudeStores::in_memory(),
            Arc::new(ManualClock::new(0)),
            config,
        )
    }

    /// Store a given token stewarded by `steward`.
    async fn given(engine: &GratitudeEngine, steward: UserId) -> BlessingId {
        let mut blessing = Blessing::new_active(ALICE, IntentionId([7u8; 16]), 0, 0);
        blessing.status = BlessingStatus::Given;
        blessing.steward_id = steward;
        let id = blessing.id;
        engine.stores.blessings.put(blessing).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_self_link_is_a_cycle() {
        let engine = engine(EngineConfig::testing());
        let token = given(&engine, BOB).await;
        let err = engine.attach_child_token(token, token).await.unwrap_err();
        assert!(matches!(err, GratitudeError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn test_ancestor_walk_is_bounded() {
        let engine = engine(EngineConfig::testing().with_max_tree_depth(2));
        let mut chain = Vec::new();
        for _ in 0..4 {
            chain.push(given(&engine, BOB).await);
        }
        // chain[0] <- chain[1] <- chain[2] <- chain[3]
        for pair in chain.windows(2) {
            engine.attach_child_token(pair[0], pair[1]).await.unwrap();
        }

        let leaf = given(&engine, BOB).await;
        let err = engine.attach_child_token(chain[3], leaf).await.unwrap_err();
        assert!(matches!(err, GratitudeError::DataIntegrity(_)));
        assert!(engine.load_blessing(&chain[3]).await.unwrap().children.is_empty());
        assert_eq!(engine.load_blessing(&leaf).await.unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn test_reattach_is_a_no_op() {
        let engine = engine(EngineConfig::testing());
        let parent = given(&engine, BOB).await;
        let child = given(&engine, BOB).await;

        engine.attach_child_token(parent, child).await.unwrap();
        engine.attach_child_token(parent, child).await.unwrap();
        assert_eq!(engine.load_blessing(&parent).await.unwrap().children, vec![child]);

        assert_eq!(engine.detach_child_token(child).await.unwrap(), Some(parent));
        assert_eq!(engine.detach_child_token(child).await.unwrap(), None);
        assert!(engine.load_blessing(&parent).await.unwrap().children.is_empty());
    }

    #[tokio::test]
    async fn test_transfer_to_current_steward_changes_nothing() {
        let engine = engine(EngineConfig::testing());
        let parent = given(&engine, BOB).await;
        let child = given(&engine, BOB).await;
        engine.attach_child_token(parent, child).await.unwrap();

        let changed = engine.transfer_token_tree(parent, BOB, "gift").await.unwrap();
        assert!(changed.is_empty());
        assert!(engine.steward_history(&parent).await.unwrap().is_empty());
        assert!(engine.steward_history(&child).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_give_requires_token() {
        let engine = engine(EngineConfig::testing());
        let blessing = Blessing::new_active(ALICE, IntentionId([7u8; 16]), 0, 0);
        let id = blessing.id;
        engine.stores.blessings.put(blessing).await.unwrap();

        let err = engine.give_token(id, BOB).await.unwrap_err();
        assert!(matches!(err, GratitudeError::InvalidState(_)));
        assert_eq!(engine.load_blessing(&id).await.unwrap().steward_id, ALICE);
    }
}
