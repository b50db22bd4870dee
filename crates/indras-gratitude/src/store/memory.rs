//! In-memory storage implementations
//!
//! Suitable for tests and standalone use. Collections use `DashMap` for
//! concurrent keyed access; append logs keep a single vector behind an
//! async `RwLock` so readers see a consistent prefix.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::RwLock;
use tracing::trace;

use super::{AppendLog, Collection, Document, LogEntry};
use crate::error::StorageError;

/// In-memory keyed collection.
#[derive(Debug)]
pub struct InMemoryCollection<D: Document> {
    docs: DashMap<D::Id, D>,
}

impl<D: Document> Default for InMemoryCollection<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Document> InMemoryCollection<D> {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl<D: Document> Collection<D> for InMemoryCollection<D> {
    async fn get(&self, id: &D::Id) -> Result<Option<D>, StorageError> {
        Ok(self.docs.get(id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, doc: D) -> Result<(), StorageError> {
        let id = doc.id();
        trace!(id = %id, "put document");
        self.docs.insert(id, doc);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<D>, StorageError> {
        Ok(self.docs.iter().map(|entry| entry.value().clone()).collect())
    }
}

/// In-memory append-only log.
#[derive(Debug)]
pub struct InMemoryAppendLog<E> {
    entries: RwLock<Vec<E>>,
}

impl<E> Default for InMemoryAppendLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryAppendLog<E> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl<E: Clone + Send + Sync + 'static> AppendLog<E> for InMemoryAppendLog<E> {
    async fn add(&self, value: E) -> Result<u64, StorageError> {
        let mut entries = self.entries.write().await;
        entries.push(value);
        let sequence = (entries.len() - 1) as u64;
        trace!(sequence, "append log entry");
        Ok(sequence)
    }

    fn entries(&self) -> BoxStream<'_, Result<LogEntry<E>, StorageError>> {
        stream::once(async move { self.entries.read().await.clone() })
            .flat_map(|snapshot| {
                stream::iter(snapshot.into_iter().enumerate().map(|(i, value)| {
                    Ok(LogEntry {
                        sequence: i as u64,
                        value,
                    })
                }))
            })
            .boxed()
    }
}
