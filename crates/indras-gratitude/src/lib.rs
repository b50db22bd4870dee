//! Gratitude accounting for Indra's Network.
//!
//! Users direct attention at intentions. Each switch of attention opens a
//! blessing whose duration is derived from the attention ledger; released
//! blessings can be given to people who served an intention, becoming
//! tokens of gratitude. Tokens compose into trees, boost intentions, win
//! slots in offerings and back sub-stewardship of shared artifacts.
//!
//! ```no_run
//! use indras_gratitude::GratitudeEngine;
//!
//! # async fn demo() -> indras_gratitude::Result<()> {
//! let engine = GratitudeEngine::in_memory();
//! let alice = [1u8; 32];
//!
//! let garden = engine.create_intention(alice, "community garden", None).await?;
//! let potential = engine.gratitude_potential(&garden.intention_id).await?;
//! # let _ = potential;
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod blessing;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod intention;
pub mod ledger;
pub mod offering;
pub mod proof;
pub mod stewardship;
pub mod store;
pub mod token;

pub use aggregator::{LedgerSnapshot, TreeOptions};
pub use blessing::{Blessing, BlessingStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::GratitudeEngine;
pub use error::{GratitudeError, Result, StorageError};
pub use ids::*;
pub use intention::{CreatedIntention, Intention, IntentionStatus};
pub use ledger::{AttentionEvent, SwitchOutcome};
pub use offering::{AllocationResult, NewOffering, Offering, OfferingStatus, TokenOffer, allocate};
pub use proof::ProofOfService;
pub use stewardship::{
    Artifact, Availability, RequestStatus, StewardshipTransfer, SubStewardAssignment,
    SubStewardRequest,
};
pub use store::{
    AppendLog, Collection, Document, GratitudeStores, InMemoryAppendLog, InMemoryCollection,
    LogEntry,
};
