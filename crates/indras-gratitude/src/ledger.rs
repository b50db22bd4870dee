//! The attention ledger.
//!
//! Every user has a conceptually separate, append-only sequence of
//! attention switches. Physically all events live in one global
//! [`AppendLog`](crate::store::AppendLog) and are filtered by user on read.
//! The ledger is the only source of truth for time accounting: a blessing's
//! duration is the gap between its opening event and the user's next one.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::blessing::{Blessing, BlessingStatus};
use crate::engine::GratitudeEngine;
use crate::error::{GratitudeError, Result};
use crate::ids::{BlessingId, IntentionId, UserId, short_user};
use crate::store::read_log;

/// A user moving their attention to an intention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionEvent {
    pub user_id: UserId,
    pub intention_id: IntentionId,
    /// Unix millis.
    pub timestamp: i64,
}

/// Result of [`GratitudeEngine::switch_attention`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchOutcome {
    /// The newly created active blessing.
    pub blessing_id: BlessingId,
    /// The blessing that moved from active to potential, if any.
    pub previous_blessing_id: Option<BlessingId>,
    /// Index of the new event in the user's attention sequence.
    pub attention_index: usize,
}

/// Sort a user's events chronologically. Equal timestamps keep write order.
pub(crate) fn sort_sequence(events: &mut [AttentionEvent]) {
    events.sort_by_key(|e| e.timestamp);
}

/// Duration of the window opened by `sequence[index]`, or `None` if the
/// index is out of range. An open window runs until `now`.
pub(crate) fn window_duration(sequence: &[AttentionEvent], index: usize, now: i64) -> Option<u64> {
    let start = sequence.get(index)?.timestamp;
    let end = sequence.get(index + 1).map_or(now, |next| next.timestamp);
    Some((end - start).max(0) as u64)
}

impl GratitudeEngine {
    /// All attention events for a user, in chronological order.
    pub async fn attention_sequence(&self, user_id: &UserId) -> Result<Vec<AttentionEvent>> {
        let mut events: Vec<_> = read_log(self.stores.attention.as_ref())
            .await?
            .into_iter()
            .map(|entry| entry.value)
            .filter(|e| &e.user_id == user_id)
            .collect();
        sort_sequence(&mut events);
        Ok(events)
    }

    /// The user's currently active blessing, if any.
    pub async fn current_focus(&self, user_id: &UserId) -> Result<Option<BlessingId>> {
        self.active_blessing(user_id).await
    }

    /// Move a user's attention to an intention.
    ///
    /// 1. The user's active blessing (if any) becomes potential, taking
    ///    `blessing_content` as its reflection when given.
    /// 2. An attention event is appended to the ledger.
    /// 3. A new active blessing is created at the next attention index.
    /// 4. The blessing is appended to the intention's blessing list.
    ///
    /// Calls for the same user are serialized. The target intention is
    /// checked before anything is written.
    #[instrument(skip(self, blessing_content), fields(user = %short_user(&user_id), intention = %new_intention_id))]
    pub async fn switch_attention(
        &self,
        user_id: UserId,
        new_intention_id: IntentionId,
        blessing_content: Option<String>,
    ) -> Result<SwitchOutcome> {
        let _index = self.index_lock.read().await;
        let _user_guard = self.user_locks.lock(&user_id).await;

        // Fail before writing anything.
        self.load_intention(&new_intention_id).await?;

        let mut previous = None;
        if let Some(previous_id) = self.active_blessing(&user_id).await? {
            let released = self
                .update_blessing(&previous_id, |b| {
                    if b.status == BlessingStatus::Active {
                        b.release(blessing_content).map(|_| true)
                    } else {
                        Ok(false)
                    }
                })
                .await?;
            if released {
                previous = Some(previous_id);
            } else {
                warn!(blessing = %previous_id, "indexed blessing was no longer active");
            }
        }

        let sequence = self.attention_sequence(&user_id).await?;
        let attention_index = sequence.len();
        // Keep the per-user sequence chronological even if the clock steps back.
        let now = self.now();
        let timestamp = sequence.last().map_or(now, |last| now.max(last.timestamp));

        self.stores
            .attention
            .add(AttentionEvent {
                user_id,
                intention_id: new_intention_id,
                timestamp,
            })
            .await?;

        let blessing = Blessing::new_active(user_id, new_intention_id, attention_index, timestamp);
        let blessing_id = blessing.id;
        self.stores.blessings.put(blessing).await?;
        self.set_active(user_id, Some(blessing_id));

        self.update_intention(&new_intention_id, |intention| {
            intention.blessings.push(blessing_id);
            Ok(())
        })
        .await?;

        debug!(blessing = %blessing_id, attention_index, "attention switched");
        Ok(SwitchOutcome {
            blessing_id,
            previous_blessing_id: previous,
            attention_index,
        })
    }

    /// Duration of a blessing's attention window, measured up to now if the
    /// window is still open.
    pub async fn blessing_duration(&self, blessing_id: &BlessingId) -> Result<u64> {
        self.blessing_duration_at(blessing_id, self.now()).await
    }

    /// Duration of a blessing's attention window with an explicit `now`.
    ///
    /// `NotFound` if the blessing is missing; `DataIntegrity` if its
    /// attention index has no ledger entry.
    pub async fn blessing_duration_at(&self, blessing_id: &BlessingId, now: i64) -> Result<u64> {
        let blessing = self.load_blessing(blessing_id).await?;
        let sequence = self.attention_sequence(&blessing.user_id).await?;
        window_duration(&sequence, blessing.attention_index, now).ok_or_else(|| {
            GratitudeError::data_integrity(format!(
                "blessing {} points at attention index {} but user {} has {} events",
                blessing_id,
                blessing.attention_index,
                short_user(&blessing.user_id),
                sequence.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: i64) -> AttentionEvent {
        AttentionEvent {
            user_id: [1u8; 32],
            intention_id: IntentionId([ts as u8; 16]),
            timestamp: ts,
        }
    }

    #[test]
    fn test_window_duration() {
        let seq = vec![event(0), event(1000), event(2500)];
        assert_eq!(window_duration(&seq, 0, 5000), Some(1000));
        assert_eq!(window_duration(&seq, 1, 5000), Some(1500));
        assert_eq!(window_duration(&seq, 2, 5000), Some(2500));
        assert_eq!(window_duration(&seq, 3, 5000), None);
    }

    #[test]
    fn test_open_window_never_negative() {
        let seq = vec![event(1000)];
        assert_eq!(window_duration(&seq, 0, 500), Some(0));
    }

    #[test]
    fn test_sort_is_stable_for_equal_timestamps() {
        let mut a = event(100);
        a.intention_id = IntentionId([0xaa; 16]);
        let mut b = event(100);
        b.intention_id = IntentionId([0xbb; 16]);
        let mut seq = vec![event(200), a.clone(), b.clone()];
        sort_sequence(&mut seq);
        assert_eq!(seq[0], a);
        assert_eq!(seq[1], b);
        assert_eq!(seq[2].timestamp, 200);
    }
}
