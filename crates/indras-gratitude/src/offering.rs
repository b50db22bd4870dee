//! The offering market.
//!
//! A host publishes an offering with a number of slots. Users bid by
//! pledging a top-level token; on acceptance bids are ranked by the total
//! duration of each pledged tree, winners' trees pass to the host, and the
//! offering is fulfilled.
//!
//! ```text
//! Open ──accept_offering_bids──▶ Fulfilled
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::aggregator::TreeOptions;
use crate::engine::GratitudeEngine;
use crate::error::{GratitudeError, Result};
use crate::ids::{BlessingId, OfferingId, UserId, short_user};
use crate::store::Document;
use crate::token::require_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OfferingStatus {
    #[default]
    Open,
    Fulfilled,
}

/// A bid: the user pledges the tree rooted at `top_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOffer {
    pub user_id: UserId,
    pub top_token: BlessingId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub id: OfferingId,
    pub host_id: UserId,
    pub title: String,
    pub description: String,
    pub time: Option<i64>,
    pub place: Option<String>,
    pub slots_available: u32,
    /// Bids in submission order.
    pub token_offers: Vec<TokenOffer>,
    pub selected_stewards: Vec<UserId>,
    pub status: OfferingStatus,
    pub created_at: i64,
}

impl Document for Offering {
    type Id = OfferingId;

    fn id(&self) -> OfferingId {
        self.id
    }
}

impl Offering {
    pub fn is_open(&self) -> bool {
        self.status == OfferingStatus::Open
    }

    pub fn has_bid_from(&self, user: &UserId) -> bool {
        self.token_offers.iter().any(|o| &o.user_id == user)
    }
}

/// Parameters for [`GratitudeEngine::create_offering`].
#[derive(Debug, Clone, Default)]
pub struct NewOffering {
    pub title: String,
    pub description: String,
    pub time: Option<i64>,
    pub place: Option<String>,
    pub slots_available: u32,
}

impl NewOffering {
    pub fn new(title: impl Into<String>, slots_available: u32) -> Self {
        Self {
            title: title.into(),
            slots_available,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_place(mut self, place: impl Into<String>) -> Self {
        self.place = Some(place.into());
        self
    }
}

/// Outcome of accepting bids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationResult {
    /// Winners, best first.
    pub accepted: Vec<UserId>,
    /// Everyone else, in ranked order.
    pub rejected: Vec<UserId>,
}

/// Rank `(user, duration)` bids and split off the first `slots` winners.
///
/// Ordering is by descending duration; equal durations keep bid order.
pub fn allocate(ranked: &[(UserId, u64)], slots: usize) -> AllocationResult {
    let mut order: Vec<&(UserId, u64)> = ranked.iter().collect();
    // sort_by is stable
    order.sort_by(|a, b| b.1.cmp(&a.1));

    let cut = slots.min(order.len());
    AllocationResult {
        accepted: order[..cut].iter().map(|(user, _)| *user).collect(),
        rejected: order[cut..].iter().map(|(user, _)| *user).collect(),
    }
}

impl GratitudeEngine {
    #[instrument(skip(self, offering), fields(host = %short_user(&host_id), slots = offering.slots_available))]
    pub async fn create_offering(&self, host_id: UserId, offering: NewOffering) -> Result<OfferingId> {
        let record = Offering {
            id: OfferingId::generate(),
            host_id,
            title: offering.title,
            description: offering.description,
            time: offering.time,
            place: offering.place,
            slots_available: offering.slots_available,
            token_offers: Vec::new(),
            selected_stewards: Vec::new(),
            status: OfferingStatus::Open,
            created_at: self.now(),
        };
        let id = record.id;
        self.stores.offerings.put(record).await?;
        debug!(offering = %id, "offering created");
        Ok(id)
    }

    pub async fn offering(&self, id: &OfferingId) -> Result<Offering> {
        self.load_offering(id).await
    }

    /// Place a bid. Returns the 1-based submission position.
    #[instrument(skip(self), fields(offering = %offering_id, user = %short_user(&user_id)))]
    pub async fn bid_on_offering(
        &self,
        offering_id: OfferingId,
        user_id: UserId,
        top_token: BlessingId,
    ) -> Result<usize> {
        let _guard = self.offering_locks.lock(&offering_id).await;

        let mut offering = self.load_offering(&offering_id).await?;
        if !offering.is_open() {
            return Err(GratitudeError::invalid_state(format!(
                "offering {offering_id} is fulfilled"
            )));
        }
        if offering.has_bid_from(&user_id) {
            warn!("duplicate bid rejected");
            return Err(GratitudeError::DuplicateBid {
                offering: offering_id.to_string(),
                user: hex::encode(user_id),
            });
        }
        require_token(&self.load_blessing(&top_token).await?)?;

        offering.token_offers.push(TokenOffer { user_id, top_token });
        let position = offering.token_offers.len();
        self.stores.offerings.put(offering).await?;

        debug!(position, "bid placed");
        Ok(position)
    }

    /// Rank bids, move winners' token trees to the host and fulfil the
    /// offering.
    ///
    /// A second call on the same offering fails with `InvalidState`.
    #[instrument(skip(self), fields(offering = %offering_id, host = %short_user(&host_id)))]
    pub async fn accept_offering_bids(
        &self,
        offering_id: OfferingId,
        host_id: UserId,
    ) -> Result<AllocationResult> {
        let _guard = self.offering_locks.lock(&offering_id).await;

        let mut offering = self.load_offering(&offering_id).await?;
        if !offering.is_open() {
            warn!("offering already fulfilled");
            return Err(GratitudeError::invalid_state(format!(
                "offering {offering_id} is already fulfilled"
            )));
        }

        let snapshot = self.snapshot().await?;
        let mut ranked = Vec::with_capacity(offering.token_offers.len());
        for bid in &offering.token_offers {
            let duration = snapshot.token_tree_duration(&bid.top_token, TreeOptions::default())?;
            ranked.push((bid.user_id, duration));
        }
        let result = allocate(&ranked, offering.slots_available as usize);

        for winner in &result.accepted {
            let bid = offering
                .token_offers
                .iter()
                .find(|o| &o.user_id == winner)
                .ok_or_else(|| GratitudeError::data_integrity("winning bid vanished"))?;
            self.transfer_token_tree(bid.top_token, host_id, "offering")
                .await?;
        }

        offering.selected_stewards = result.accepted.clone();
        offering.slots_available = 0;
        offering.status = OfferingStatus::Fulfilled;
        self.stores.offerings.put(offering).await?;

        info!(
            accepted = result.accepted.len(),
            rejected = result.rejected.len(),
            "offering fulfilled"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(n: u8) -> UserId {
        [n; 32]
    }

    #[test]
    fn test_allocate_ranks_by_duration() {
        let bids = [(user(1), 3000), (user(2), 7000), (user(3), 5000)];
        let result = allocate(&bids, 2);
        assert_eq!(result.accepted, vec![user(2), user(3)]);
        assert_eq!(result.rejected, vec![user(1)]);
    }

    #[test]
    fn test_allocate_ties_keep_bid_order() {
        let bids = [(user(1), 100), (user(2), 500), (user(3), 500), (user(4), 100)];
        let result = allocate(&bids, 2);
        assert_eq!(result.accepted, vec![user(2), user(3)]);
        assert_eq!(result.rejected, vec![user(1), user(4)]);
    }

    #[test]
    fn test_allocate_more_slots_than_bids() {
        let result = allocate(&[(user(1), 10)], 5);
        assert_eq!(result.accepted, vec![user(1)]);
        assert!(result.rejected.is_empty());
        assert_eq!(allocate(&[], 3), AllocationResult::default());
        assert_eq!(allocate(&[(user(1), 10)], 0).rejected, vec![user(1)]);
    }

    #[tokio::test]
    async fn test_bid_on_missing_offering_or_token() {
        let engine = GratitudeEngine::in_memory();
        let err = engine
            .bid_on_offering(OfferingId([1u8; 16]), user(1), BlessingId([2u8; 16]))
            .await
            .unwrap_err();
        assert!(matches!(err, GratitudeError::NotFound { kind: "offering", .. }));

        let offering = engine
            .create_offering(user(9), NewOffering::new("dinner", 1))
            .await
            .unwrap();
        let err = engine
            .bid_on_offering(offering, user(1), BlessingId([2u8; 16]))
            .await
            .unwrap_err();
        assert!(matches!(err, GratitudeError::NotFound { kind: "blessing", .. }));
        assert!(engine.offering(&offering).await.unwrap().token_offers.is_empty());
    }

    #[tokio::test]
    async fn test_offering_fields_round_trip() {
        let engine = GratitudeEngine::in_memory();
        let id = engine
            .create_offering(
                user(9),
                NewOffering::new("dinner", 2)
                    .with_description("soup night")
                    .with_time(1_700_000_000_000)
                    .with_place("commons"),
            )
            .await
            .unwrap();
        let offering = engine.offering(&id).await.unwrap();
        assert_eq!(offering.host_id, user(9));
        assert_eq!(offering.place.as_deref(), Some("commons"));
        assert_eq!(offering.slots_available, 2);
        assert!(offering.is_open());
    }

    #[tokio::test]
    async fn test_accept_with_no_bids_fulfils_once() {
        let engine = GratitudeEngine::in_memory();
        let id = engine
            .create_offering(user(9), NewOffering::new("dinner", 1))
            .await
            .unwrap();
        let result = engine.accept_offering_bids(id, user(9)).await.unwrap();
        assert_eq!(result, AllocationResult::default());

        let offering = engine.offering(&id).await.unwrap();
        assert_eq!(offering.status, OfferingStatus::Fulfilled);
        assert_eq!(offering.slots_available, 0);

        let err = engine.accept_offering_bids(id, user(9)).await.unwrap_err();
        assert!(matches!(err, GratitudeError::InvalidState(_)));
    }
}
