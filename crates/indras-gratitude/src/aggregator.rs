//! Token-tree aggregation.
//!
//! All functions here are pure over a [`LedgerSnapshot`]: the attention
//! events of every user plus every blessing, captured at a fixed `now`.
//!
//! Tree traversal threads a single visited set through the whole walk. A
//! node reached twice (through a cycle, or through two parents in a DAG)
//! contributes its duration once per top-level traversal.

use std::collections::{HashMap, HashSet};

use crate::blessing::Blessing;
use crate::engine::GratitudeEngine;
use crate::error::{GratitudeError, Result};
use crate::ids::{BlessingId, IntentionId, UserId, short_user};
use crate::intention::Intention;
use crate::ledger::{AttentionEvent, sort_sequence, window_duration};
use crate::store::read_log;

/// Options for [`LedgerSnapshot::token_tree_duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    /// Include descendants reachable through `children`.
    pub include_children: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            include_children: true,
        }
    }
}

impl TreeOptions {
    /// Only the root node.
    pub fn root_only() -> Self {
        Self {
            include_children: false,
        }
    }
}

/// Point-in-time view of the ledger and the blessing store.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    sequences: HashMap<UserId, Vec<AttentionEvent>>,
    blessings: HashMap<BlessingId, Blessing>,
    now: i64,
}

impl LedgerSnapshot {
    /// Build a snapshot from raw events (in write order) and blessings.
    pub fn from_parts(
        events: impl IntoIterator<Item = AttentionEvent>,
        blessings: impl IntoIterator<Item = Blessing>,
        now: i64,
    ) -> Self {
        let mut sequences: HashMap<UserId, Vec<AttentionEvent>> = HashMap::new();
        for event in events {
            sequences.entry(event.user_id).or_default().push(event);
        }
        for sequence in sequences.values_mut() {
            sort_sequence(sequence);
        }

        Self {
            sequences,
            blessings: blessings.into_iter().map(|b| (b.id, b)).collect(),
            now,
        }
    }

    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn blessing(&self, id: &BlessingId) -> Option<&Blessing> {
        self.blessings.get(id)
    }

    fn require(&self, id: &BlessingId) -> Result<&Blessing> {
        self.blessings
            .get(id)
            .ok_or_else(|| GratitudeError::not_found("blessing", id))
    }

    /// Duration of a single blessing's attention window.
    pub fn blessing_duration(&self, id: &BlessingId) -> Result<u64> {
        let blessing = self.require(id)?;
        let sequence = self
            .sequences
            .get(&blessing.user_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        window_duration(sequence, blessing.attention_index, self.now).ok_or_else(|| {
            GratitudeError::data_integrity(format!(
                "blessing {} points at attention index {} but user {} has {} events",
                id,
                blessing.attention_index,
                short_user(&blessing.user_id),
                sequence.len()
            ))
        })
    }

    /// Preorder list of the ids reachable from `root`, each listed once.
    pub fn flatten_token_tree(&self, root: &BlessingId) -> Result<Vec<BlessingId>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![*root];

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let node = self.require(&id)?;
            order.push(id);
            // Reverse so the first child is visited first.
            for child in node.children.iter().rev() {
                if !visited.contains(child) {
                    stack.push(*child);
                }
            }
        }
        Ok(order)
    }

    /// Total duration of a token and, optionally, all of its descendants.
    pub fn token_tree_duration(&self, root: &BlessingId, options: TreeOptions) -> Result<u64> {
        if !options.include_children {
            return self.blessing_duration(root);
        }
        self.flatten_token_tree(root)?
            .iter()
            .try_fold(0u64, |total, id| Ok(total + self.blessing_duration(id)?))
    }

    /// Live gratitude potential of an intention.
    ///
    /// Sum of the durations of its direct blessings that are still active or
    /// potential, plus the full tree duration of every attached token. Given
    /// blessings no longer count toward the intention they were created on,
    /// but do count wherever they are attached as tokens.
    pub fn gratitude_potential(&self, intention: &Intention) -> Result<u64> {
        let mut total = 0u64;
        for id in &intention.blessings {
            let blessing = self.require(id)?;
            if blessing.status.counts_toward_potential() {
                total += self.blessing_duration(id)?;
            }
        }
        for token in &intention.attached_tokens {
            total += self.token_tree_duration(token, TreeOptions::default())?;
        }
        Ok(total)
    }
}

impl GratitudeEngine {
    /// Capture the ledger and blessing store at the current time.
    pub async fn snapshot(&self) -> Result<LedgerSnapshot> {
        self.snapshot_at(self.now()).await
    }

    /// Capture the ledger and blessing store, measuring open windows up to
    /// `now`.
    pub async fn snapshot_at(&self, now: i64) -> Result<LedgerSnapshot> {
        let events = read_log(self.stores.attention.as_ref())
            .await?
            .into_iter()
            .map(|entry| entry.value);
        let blessings = self.stores.blessings.all().await?;
        Ok(LedgerSnapshot::from_parts(events, blessings, now))
    }

    pub async fn token_tree_duration(
        &self,
        token_id: &BlessingId,
        options: TreeOptions,
    ) -> Result<u64> {
        self.snapshot().await?.token_tree_duration(token_id, options)
    }

    pub async fn flatten_token_tree(&self, token_id: &BlessingId) -> Result<Vec<BlessingId>> {
        self.snapshot().await?.flatten_token_tree(token_id)
    }

    pub async fn gratitude_potential(&self, intention_id: &IntentionId) -> Result<u64> {
        let intention = self.load_intention(intention_id).await?;
        self.snapshot().await?.gratitude_potential(&intention)
    }

    /// [`gratitude_potential`](Self::gratitude_potential) with an explicit `now`.
    pub async fn gratitude_potential_at(&self, intention_id: &IntentionId, now: i64) -> Result<u64> {
        let intention = self.load_intention(intention_id).await?;
        self.snapshot_at(now).await?.gratitude_potential(&intention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blessing::BlessingStatus;

    const ALICE: UserId = [1u8; 32];
    const INTENT: IntentionId = IntentionId([5u8; 16]);

    /// One user whose events sit at the given timestamps; blessing `i`
    /// opens at event `i`.
    fn ledger(timestamps: &[i64]) -> (Vec<AttentionEvent>, Vec<Blessing>) {
        let events = timestamps
            .iter()
            .map(|&ts| AttentionEvent {
                user_id: ALICE,
                intention_id: INTENT,
                timestamp: ts,
            })
            .collect();
        let blessings = timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| {
                let mut b = Blessing::new_active(ALICE, INTENT, i, ts);
                b.id = BlessingId([i as u8; 16]);
                b.status = BlessingStatus::Given;
                b
            })
            .collect();
        (events, blessings)
    }

    fn id(n: u8) -> BlessingId {
        BlessingId([n; 16])
    }

    fn link(blessings: &mut [Blessing], parent: u8, child: u8) {
        blessings[parent as usize].children.push(id(child));
        blessings[child as usize].parent_id = Some(id(parent));
    }

    #[test]
    fn test_tree_duration_sums_descendants() {
        // Durations: 0→100, 1→200, 2→300, 3→(1000-600)=400
        let (events, mut blessings) = ledger(&[0, 100, 300, 600]);
        link(&mut blessings, 0, 1);
        link(&mut blessings, 0, 2);
        link(&mut blessings, 2, 3);
        let snap = LedgerSnapshot::from_parts(events, blessings, 1000);

        assert_eq!(snap.token_tree_duration(&id(0), TreeOptions::default()).unwrap(), 1000);
        assert_eq!(snap.token_tree_duration(&id(0), TreeOptions::root_only()).unwrap(), 100);
        assert_eq!(snap.token_tree_duration(&id(2), TreeOptions::default()).unwrap(), 700);
    }

    #[test]
    fn test_shared_descendant_counted_once() {
        let (events, mut blessings) = ledger(&[0, 100, 300, 600]);
        // 0 → {1, 2}, both 1 and 2 → 3
        link(&mut blessings, 0, 1);
        link(&mut blessings, 0, 2);
        link(&mut blessings, 1, 3);
        blessings[2].children.push(id(3));
        let snap = LedgerSnapshot::from_parts(events, blessings, 1000);

        assert_eq!(snap.token_tree_duration(&id(0), TreeOptions::default()).unwrap(), 1000);
        assert_eq!(snap.flatten_token_tree(&id(0)).unwrap(), vec![id(0), id(1), id(3), id(2)]);
    }

    #[test]
    fn test_cycle_terminates() {
        let (events, mut blessings) = ledger(&[0, 100, 300]);
        blessings[0].children.push(id(1));
        blessings[1].children.push(id(2));
        blessings[2].children.push(id(0));
        let snap = LedgerSnapshot::from_parts(events, blessings, 1000);

        assert_eq!(snap.flatten_token_tree(&id(1)).unwrap(), vec![id(1), id(2), id(0)]);
        assert_eq!(snap.token_tree_duration(&id(1), TreeOptions::default()).unwrap(), 1000);
    }

    #[test]
    fn test_missing_event_is_data_integrity() {
        let (events, mut blessings) = ledger(&[0]);
        let mut orphan = blessings[0].clone();
        orphan.id = id(9);
        orphan.attention_index = 4;
        blessings.push(orphan);
        let snap = LedgerSnapshot::from_parts(events, blessings, 1000);

        let err = snap.blessing_duration(&id(9)).unwrap_err();
        assert!(matches!(err, GratitudeError::DataIntegrity(_)));
        let err = snap.blessing_duration(&id(7)).unwrap_err();
        assert!(matches!(err, GratitudeError::NotFound { .. }));
    }

    #[test]
    fn test_potential_excludes_given_direct_blessings() {
        let (events, mut blessings) = ledger(&[0, 100, 300]);
        blessings[0].status = BlessingStatus::Potential;
        blessings[1].status = BlessingStatus::Given;
        blessings[2].status = BlessingStatus::Active;

        let mut intention = Intention::new("garden", ALICE, 0);
        intention.blessings = vec![id(0), id(1), id(2)];
        let snap = LedgerSnapshot::from_parts(events, blessings, 1000);

        // 100 (potential) + 700 (active, open window)
        assert_eq!(snap.gratitude_potential(&intention).unwrap(), 800);

        // The given blessing still counts where it is attached.
        intention.attached_tokens.push(id(1));
        assert_eq!(snap.gratitude_potential(&intention).unwrap(), 1000);
    }
}
