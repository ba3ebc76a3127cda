//! In-memory record index shared by the volatile and journal backends.
//!
//! One `RecordIndex` holds the primary map (code → record), the dedup index
//! (original URL → record) and the owner index (owner → records in creation
//! order). Callers keep it behind a single lock so all three are updated
//! together.

use burrow_core::error::{Result, StorageError};
use burrow_core::{NewUrl, SaveOutcome, ShortCode, UrlRecord};
use burrow_generator::Generator;
use std::collections::HashMap;

/// Generator draws allowed per item before allocation gives up.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 16;

#[derive(Debug, Default)]
pub struct RecordIndex {
    records: Vec<UrlRecord>,
    by_code: HashMap<String, usize>,
    by_url: HashMap<String, usize>,
    by_owner: HashMap<String, Vec<usize>>,
}

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn owner_len(&self) -> usize {
        self.by_owner.len()
    }

    /// All records in creation order.
    pub fn records(&self) -> &[UrlRecord] {
        &self.records
    }

    pub fn get(&self, code: &str) -> Option<&UrlRecord> {
        self.by_code.get(code).map(|&pos| &self.records[pos])
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    pub fn code_for_url(&self, original_url: &str) -> Option<&ShortCode> {
        self.by_url
            .get(original_url)
            .map(|&pos| &self.records[pos].short_code)
    }

    pub fn by_owner(&self, owner_id: &str) -> Vec<UrlRecord> {
        self.by_owner
            .get(owner_id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&pos| self.records[pos].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inserts `record` unless its original URL is already indexed.
    ///
    /// Returns `Err(Conflict)` when the code belongs to a different URL.
    pub fn insert(&mut self, record: UrlRecord) -> Result<SaveOutcome> {
        if let Some(existing) = self.code_for_url(&record.original_url) {
            return Ok(SaveOutcome::Existing(existing.clone()));
        }
        if self.contains_code(record.short_code.as_str()) {
            return Err(StorageError::Conflict(record.short_code.to_string()));
        }

        let pos = self.records.len();
        let code = record.short_code.clone();
        self.by_code.insert(code.as_str().to_owned(), pos);
        self.by_url.insert(record.original_url.clone(), pos);
        self.by_owner
            .entry(record.owner_id.clone())
            .or_default()
            .push(pos);
        self.records.push(record);

        Ok(SaveOutcome::Created(code))
    }

    /// Inserts a batch item under a freshly allocated code.
    pub fn allocate<G: Generator>(&mut self, generator: &G, item: NewUrl) -> Result<SaveOutcome> {
        if let Some(existing) = self.code_for_url(&item.original_url) {
            return Ok(SaveOutcome::Existing(existing.clone()));
        }

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let code: ShortCode = generator.generate().into();
            if self.contains_code(code.as_str()) {
                continue;
            }
            return self.insert(UrlRecord::new(
                item.correlation_id,
                code,
                item.original_url,
                item.owner_id,
            ));
        }

        Err(StorageError::Unavailable(format!(
            "no free short code after {} attempts",
            MAX_ALLOCATION_ATTEMPTS
        )))
    }

    /// Flags the owner's active records among `codes` as deleted.
    ///
    /// Returns the positions that changed so a failed persist can revert them.
    pub fn mark_deleted(&mut self, owner_id: &str, codes: &[ShortCode]) -> Vec<usize> {
        let mut flipped = Vec::new();
        for code in codes {
            let Some(&pos) = self.by_code.get(code.as_str()) else {
                continue;
            };
            let record = &mut self.records[pos];
            if record.owner_id == owner_id && !record.deleted {
                record.deleted = true;
                flipped.push(pos);
            }
        }
        flipped
    }

    /// Flags the record under `code` as deleted whoever owns it.
    ///
    /// Used when replaying a log entry that recorded an earlier delete.
    pub fn replay_deleted(&mut self, code: &str) -> bool {
        match self.by_code.get(code) {
            Some(&pos) => {
                self.records[pos].deleted = true;
                true
            }
            None => false,
        }
    }

    pub fn revert_deleted(&mut self, positions: &[usize]) {
        for &pos in positions {
            self.records[pos].deleted = false;
        }
    }

    /// Drops every record created after the index had `len` records.
    pub fn rollback_to(&mut self, len: usize) {
        while self.records.len() > len {
            let Some(record) = self.records.pop() else {
                break;
            };
            let pos = self.records.len();

            self.by_code.remove(record.short_code.as_str());
            if self.by_url.get(&record.original_url) == Some(&pos) {
                self.by_url.remove(&record.original_url);
            }
            if let Some(positions) = self.by_owner.get_mut(&record.owner_id) {
                positions.retain(|&p| p != pos);
                if positions.is_empty() {
                    self.by_owner.remove(&record.owner_id);
                }
            }
        }
    }
}
