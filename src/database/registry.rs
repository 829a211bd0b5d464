//! Process-keyed database registry
//!
//! Databases live in an arena and are chained into `database_buckets`
//! hash buckets by index. Lookups move the hit to the front of its bucket.
//! Destroyed databases are not recycled right away: the last one destroyed
//! waits in a one-deep pending slot and only joins the free list when the
//! next `destroy` arrives, so a process exit never pays for a full reset.

use super::{DatabaseRef, DatabaseShared, RecordStore, ResourceRecord};
use crate::config::RegistryConfig;
use crate::error::{corrupted, poisoned, NotFound, TrackerError, TrackerResult};
use crate::kinds::ResourceKind;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle position of a database slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseState {
    /// Linked into a hash bucket
    Live,
    /// Destroyed, waiting for the next destroy to recycle it
    Pending,
    /// On the free list
    Free,
}

#[derive(Debug)]
struct DatabaseEntry {
    process_id: u32,
    generation: u64,
    slot: usize,
    state: DatabaseState,
    records: RecordStore,
    next: Option<usize>,
    shared: Arc<DatabaseShared>,
}

impl DatabaseEntry {
    fn handle(&self, index: usize) -> DatabaseRef {
        DatabaseRef {
            index,
            generation: self.generation,
            process_id: self.process_id,
            shared: Arc::clone(&self.shared),
        }
    }
}

#[derive(Debug)]
struct RegistryInner {
    entries: Vec<DatabaseEntry>,
    buckets: Vec<Option<usize>>,
    free: Option<usize>,
    free_len: usize,
    most_recent: Option<usize>,
    pending_free: Option<usize>,
    next_generation: u64,
}

impl RegistryInner {
    fn slot_for(&self, process_id: u32) -> usize {
        process_id as usize % self.buckets.len()
    }

    /// Walk a bucket, returning (predecessor, index) of `process_id`
    fn locate(&self, process_id: u32) -> Option<(Option<usize>, usize)> {
        let mut previous = None;
        let mut cursor = self.buckets[self.slot_for(process_id)];
        while let Some(index) = cursor {
            if self.entries[index].process_id == process_id {
                return Some((previous, index));
            }
            previous = Some(index);
            cursor = self.entries[index].next;
        }
        None
    }

    fn entry(&self, db: &DatabaseRef) -> TrackerResult<&DatabaseEntry> {
        match self.entries.get(db.index) {
            Some(entry) if entry.generation == db.generation && entry.state != DatabaseState::Free => {
                Ok(entry)
            }
            _ => Err(TrackerError::NotFound(NotFound::Process(db.process_id))),
        }
    }

    fn live_entry_mut(&mut self, db: &DatabaseRef) -> TrackerResult<&mut DatabaseEntry> {
        match self.entries.get_mut(db.index) {
            Some(entry) if entry.generation == db.generation && entry.state == DatabaseState::Live => {
                Ok(entry)
            }
            _ => Err(TrackerError::NotFound(NotFound::Process(db.process_id))),
        }
    }

    /// Move a hit to the front of its bucket and remember it as most recent
    fn promote(&mut self, previous: Option<usize>, index: usize) {
        if let Some(previous) = previous {
            let slot = self.entries[index].slot;
            self.entries[previous].next = self.entries[index].next;
            self.entries[index].next = self.buckets[slot];
            self.buckets[slot] = Some(index);
        }
        self.most_recent = Some(index);
    }

    fn recycle(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        trace!("DB({}): recycled slot {}", entry.process_id, index);
        entry.state = DatabaseState::Free;
        entry.records.clear();
        entry.next = self.free;
        self.free = Some(index);
        self.free_len += 1;
    }
}

/// Table of every process database
#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig) -> TrackerResult<Self> {
        config.validate()?;
        let inner = RegistryInner {
            entries: Vec::new(),
            buckets: vec![None; config.database_buckets],
            free: None,
            free_len: 0,
            most_recent: None,
            pending_free: None,
            next_generation: 1,
        };
        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    /// Sizing this registry was built with
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock(&self) -> TrackerResult<MutexGuard<'_, RegistryInner>> {
        self.inner.lock().map_err(poisoned("registry"))
    }

    /// Register a database for `process_id`.
    ///
    /// Recycles a free database when one is available; its counters, records
    /// and handles are reset rather than reallocated.
    pub fn create(&self, process_id: u32) -> TrackerResult<DatabaseRef> {
        let mut inner = self.lock()?;

        if inner.locate(process_id).is_some() {
            return Err(TrackerError::AlreadyExists { process_id });
        }
        self.create_locked(&mut inner, process_id)
    }

    /// Look up the database of `process_id`, creating it when absent.
    ///
    /// Lookup and creation happen under one registry lock, so concurrent
    /// first registrations for the same process agree on one database. The
    /// flag is `true` when the database was created by this call.
    pub fn find_or_create(&self, process_id: u32) -> TrackerResult<(DatabaseRef, bool)> {
        let mut inner = self.lock()?;
        match inner.locate(process_id) {
            Some((previous, index)) => {
                inner.promote(previous, index);
                Ok((inner.entries[index].handle(index), false))
            }
            None => Ok((self.create_locked(&mut inner, process_id)?, true)),
        }
    }

    fn create_locked(&self, inner: &mut RegistryInner, process_id: u32) -> TrackerResult<DatabaseRef> {
        let generation = inner.next_generation;
        inner.next_generation += 1;
        let slot = inner.slot_for(process_id);
        let head = inner.buckets[slot];

        let index = match inner.free {
            Some(index) => {
                inner.free = inner.entries[index].next;
                inner.free_len -= 1;

                let entry = &mut inner.entries[index];
                entry.shared.reset(generation)?;
                entry.records.clear();
                entry.process_id = process_id;
                entry.generation = generation;
                entry.slot = slot;
                entry.state = DatabaseState::Live;
                entry.next = head;
                index
            }
            None => {
                let shared = DatabaseShared::default();
                shared.reset(generation)?;
                inner.entries.push(DatabaseEntry {
                    process_id,
                    generation,
                    slot,
                    state: DatabaseState::Live,
                    records: RecordStore::new(self.config.record_buckets),
                    next: head,
                    shared: Arc::new(shared),
                });
                inner.entries.len() - 1
            }
        };

        inner.buckets[slot] = Some(index);
        debug!("DB({}): created in bucket {} (slot {})", process_id, slot, index);

        Ok(inner.entries[index].handle(index))
    }

    /// Look up the database of `process_id`.
    ///
    /// With `use_most_recent` the process id is ignored and the database
    /// last returned by a lookup (or last destroyed) comes back instead.
    /// A regular hit is moved to the front of its bucket.
    pub fn find(&self, process_id: u32, use_most_recent: bool) -> TrackerResult<DatabaseRef> {
        let mut inner = self.lock()?;

        if use_most_recent {
            let index = inner
                .most_recent
                .ok_or(TrackerError::NotFound(NotFound::MostRecent))?;
            return Ok(inner.entries[index].handle(index));
        }

        let (previous, index) = inner
            .locate(process_id)
            .ok_or(TrackerError::NotFound(NotFound::Process(process_id)))?;

        inner.promote(previous, index);
        Ok(inner.entries[index].handle(index))
    }

    /// Look up a live database without touching bucket order or the most
    /// recent database
    pub fn peek(&self, process_id: u32) -> TrackerResult<DatabaseRef> {
        let inner = self.lock()?;
        let (_, index) = inner
            .locate(process_id)
            .ok_or(TrackerError::NotFound(NotFound::Process(process_id)))?;
        Ok(inner.entries[index].handle(index))
    }

    /// Unlink `db` from its bucket.
    ///
    /// The database destroyed by the previous call is recycled now, and `db`
    /// takes its place in the pending slot and as the most recent database.
    /// Handles must already have been released by the caller. Records still
    /// linked at this point are unlinked in the same critical section and
    /// returned, so none is lost to the recycle.
    pub fn destroy(&self, db: &DatabaseRef) -> TrackerResult<Vec<ResourceRecord>> {
        let mut inner = self.lock()?;
        inner.live_entry_mut(db)?;

        let index = db.index;
        let slot = inner.entries[index].slot;
        let next = inner.entries[index].next;

        if inner.buckets[slot] == Some(index) {
            inner.buckets[slot] = next;
        } else {
            let mut cursor = inner.buckets[slot];
            loop {
                match cursor {
                    Some(current) if inner.entries[current].next == Some(index) => {
                        inner.entries[current].next = next;
                        break;
                    }
                    Some(current) => cursor = inner.entries[current].next,
                    None => {
                        return Err(corrupted(format!(
                            "DB({}): not linked in bucket {}",
                            db.process_id, slot
                        )));
                    }
                }
            }
        }

        if let Some(previous) = inner.pending_free.take() {
            inner.recycle(previous);
        }

        let entry = &mut inner.entries[index];
        entry.state = DatabaseState::Pending;
        entry.next = None;
        let leftovers = entry.records.drain();
        inner.pending_free = Some(index);
        inner.most_recent = Some(index);

        debug!("DB({}): destroyed, pending reuse", db.process_id);
        Ok(leftovers)
    }

    /// Unlink every record of `db` in one critical section and return them
    pub fn drain_records(&self, db: &DatabaseRef) -> TrackerResult<Vec<ResourceRecord>> {
        let mut inner = self.lock()?;
        let records = inner.live_entry_mut(db)?.records.drain();
        trace!("DB({}): drained {} records", db.process_id, records.len());
        Ok(records)
    }

    /// Link `record` into the database's record store.
    ///
    /// With `strict_duplicates` a second record with the same (kind, owner
    /// key) is rejected as `AlreadyExists`.
    pub fn insert_record(&self, db: &DatabaseRef, record: ResourceRecord) -> TrackerResult<()> {
        let strict = self.config.strict_duplicates;
        let mut inner = self.lock()?;
        let entry = inner.live_entry_mut(db)?;
        if strict && entry.records.contains(record.kind, record.owner_key) {
            return Err(TrackerError::AlreadyExists {
                process_id: db.process_id,
            });
        }
        entry.records.insert(record);
        trace!(
            "DB({}): +{} 0x{:x} bytes={}",
            db.process_id,
            record.kind,
            record.owner_key,
            record.bytes
        );
        Ok(())
    }

    /// Unlink and return the record matching (kind, owner key)
    pub fn delete_record(
        &self,
        db: &DatabaseRef,
        kind: ResourceKind,
        owner_key: u64,
    ) -> TrackerResult<ResourceRecord> {
        let mut inner = self.lock()?;
        let entry = inner.live_entry_mut(db)?;
        let record = entry.records.delete(kind, owner_key).ok_or(TrackerError::NotFound(
            NotFound::Record {
                process_id: db.process_id,
                owner_key,
            },
        ))?;
        trace!(
            "DB({}): -{} 0x{:x} bytes={}",
            db.process_id,
            record.kind,
            record.owner_key,
            record.bytes
        );
        Ok(record)
    }

    /// Copy of the record matching (kind, owner key)
    pub fn find_record(
        &self,
        db: &DatabaseRef,
        kind: ResourceKind,
        owner_key: u64,
    ) -> TrackerResult<ResourceRecord> {
        let inner = self.lock()?;
        inner
            .entry(db)?
            .records
            .find(kind, owner_key)
            .ok_or(TrackerError::NotFound(NotFound::Record {
                process_id: db.process_id,
                owner_key,
            }))
    }

    /// Copies of every record the database holds
    pub fn records(&self, db: &DatabaseRef) -> TrackerResult<Vec<ResourceRecord>> {
        let inner = self.lock()?;
        Ok(inner.entry(db)?.records.iter().copied().collect())
    }

    /// Lifecycle state of the slot behind `db`, `None` once recycled
    pub fn state(&self, db: &DatabaseRef) -> TrackerResult<Option<DatabaseState>> {
        let inner = self.lock()?;
        Ok(inner.entry(db).ok().map(|entry| entry.state))
    }

    /// Every live database, bucket by bucket
    pub fn live_databases(&self) -> TrackerResult<Vec<DatabaseRef>> {
        let inner = self.lock()?;
        let mut databases = Vec::new();
        for head in inner.buckets.iter() {
            let mut cursor = *head;
            while let Some(index) = cursor {
                databases.push(inner.entries[index].handle(index));
                cursor = inner.entries[index].next;
            }
        }
        Ok(databases)
    }

    /// Process ids chained in one bucket, head first
    pub fn chain(&self, slot: usize) -> TrackerResult<Vec<u32>> {
        let inner = self.lock()?;
        let mut cursor = *inner.buckets.get(slot).ok_or_else(|| {
            TrackerError::InvalidArgument(format!("bucket {} out of range", slot))
        })?;
        let mut chain = Vec::new();
        while let Some(index) = cursor {
            chain.push(inner.entries[index].process_id);
            cursor = inner.entries[index].next;
        }
        Ok(chain)
    }

    /// Bucket `process_id` hashes into
    pub fn slot_for(&self, process_id: u32) -> usize {
        process_id as usize % self.config.database_buckets
    }

    /// Process id waiting in the pending slot
    pub fn pending_process(&self) -> TrackerResult<Option<u32>> {
        let inner = self.lock()?;
        Ok(inner.pending_free.map(|i| inner.entries[i].process_id))
    }

    /// Databases on the free list
    pub fn free_databases(&self) -> TrackerResult<usize> {
        Ok(self.lock()?.free_len)
    }

    /// Databases ever allocated
    pub fn capacity(&self) -> TrackerResult<usize> {
        Ok(self.lock()?.entries.len())
    }
}
