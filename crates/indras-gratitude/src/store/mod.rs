//! Storage abstractions consumed by the engine.
//!
//! The engine never assumes transactions: it only needs keyed document
//! access and append-only sequences. Any backend implementing
//! [`Collection`] and [`AppendLog`] can be bundled into [`GratitudeStores`].

pub mod memory;

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::blessing::Blessing;
use crate::error::StorageError;
use crate::intention::Intention;
use crate::ledger::AttentionEvent;
use crate::offering::Offering;
use crate::proof::ProofOfService;
use crate::stewardship::{Artifact, StewardshipTransfer, SubStewardAssignment, SubStewardRequest};

pub use memory::{InMemoryAppendLog, InMemoryCollection};

/// A record stored in a keyed [`Collection`].
pub trait Document: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
}

/// Keyed document access: upsert by id, point reads, full scans.
#[async_trait]
pub trait Collection<D: Document>: Send + Sync {
    async fn get(&self, id: &D::Id) -> Result<Option<D>, StorageError>;

    /// Insert or replace the document stored under `doc.id()`.
    async fn put(&self, doc: D) -> Result<(), StorageError>;

    async fn all(&self) -> Result<Vec<D>, StorageError>;
}

/// One entry of an [`AppendLog`], tagged with its write position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry<E> {
    pub sequence: u64,
    pub value: E,
}

/// Append-only sequence. Entries are never modified or removed.
#[async_trait]
pub trait AppendLog<E: Clone + Send + Sync + 'static>: Send + Sync {
    /// Append a value and return its 0-based write position.
    async fn add(&self, value: E) -> Result<u64, StorageError>;

    /// Stream all entries in write order.
    fn entries(&self) -> BoxStream<'_, Result<LogEntry<E>, StorageError>>;
}

/// Drain an append log into memory.
pub async fn read_log<E>(log: &dyn AppendLog<E>) -> Result<Vec<LogEntry<E>>, StorageError>
where
    E: Clone + Send + Sync + 'static,
{
    log.entries().try_collect().await
}

/// The set of named collections the engine operates over.
#[derive(Clone)]
pub struct GratitudeStores {
    pub attention: Arc<dyn AppendLog<AttentionEvent>>,
    pub blessings: Arc<dyn Collection<Blessing>>,
    pub intentions: Arc<dyn Collection<Intention>>,
    pub proofs: Arc<dyn AppendLog<ProofOfService>>,
    pub offerings: Arc<dyn Collection<Offering>>,
    pub artifacts: Arc<dyn Collection<Artifact>>,
    pub requests: Arc<dyn Collection<SubStewardRequest>>,
    pub assignments: Arc<dyn Collection<SubStewardAssignment>>,
    pub transfers: Arc<dyn AppendLog<StewardshipTransfer>>,
}

impl GratitudeStores {
    /// All collections backed by in-memory maps and vectors.
    pub fn in_memory() -> Self {
        Self {
            attention: Arc::new(InMemoryAppendLog::new()),
            blessings: Arc::new(InMemoryCollection::new()),
            intentions: Arc::new(InMemoryCollection::new()),
            proofs: Arc::new(InMemoryAppendLog::new()),
            offerings: Arc::new(InMemoryCollection::new()),
            artifacts: Arc::new(InMemoryCollection::new()),
            requests: Arc::new(InMemoryCollection::new()),
            assignments: Arc::new(InMemoryCollection::new()),
            transfers: Arc::new(InMemoryAppendLog::new()),
        }
    }
}

impl fmt::Debug for GratitudeStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GratitudeStores").finish_non_exhaustive()
    }
}
