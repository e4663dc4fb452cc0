use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::filter::RecordFilter;
use crate::record::{record_id_of, value_matches, AllowList, Input, Record, RECORD_ID_KEY};

/// What the refresh job does with fetched entries whose `recordid` is
/// already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Drop entries whose id exists in the store or earlier in the batch.
    #[default]
    Skip,
    /// Append every entry as delivered by the source.
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendReport {
    pub appended: usize,
    pub skipped: usize,
}

/// Ordered in-memory collection of records, unique by `recordid`.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    allow_list: AllowList,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an existing sequence. Later records reusing an id
    /// already seen are dropped.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut seen = HashSet::with_capacity(records.len());
        let total = records.len();
        let records: Vec<Record> = records
            .into_iter()
            .filter(|r| seen.insert(r.record_id.clone()))
            .collect();
        if records.len() != total {
            warn!(
                dropped = total - records.len(),
                "records file contains duplicate recordids, keeping first occurrences"
            );
        }
        Self {
            records,
            allow_list: AllowList::default(),
        }
    }

    /// Load the records file. A missing file gives an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = match std::fs::read(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "records file not found, starting empty");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let records: Vec<Record> = serde_json::from_slice(&content)?;
        Ok(Self::from_records(records))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(&self.records)?)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn contains(&self, record_id: &str) -> bool {
        self.records.iter().any(|r| r.record_id == record_id)
    }

    pub fn get(&self, record_id: &str) -> Result<&Record, StoreError> {
        self.records
            .iter()
            .find(|r| r.record_id == record_id)
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))
    }

    /// Records matching every predicate of `filter`, in store order.
    pub fn filter<'a>(&'a self, filter: &'a RecordFilter) -> impl Iterator<Item = &'a Record> {
        self.records.iter().filter(move |r| filter.matches(r))
    }

    pub fn create(&mut self, input: &Input) -> Result<Record, StoreError> {
        self.create_seeded(input, &[])
    }

    /// Create a record under a filter path. The path predicates are written
    /// into the new record; a body value for the same field must agree.
    pub fn create_scoped(
        &mut self,
        input: &Input,
        filter: &RecordFilter,
    ) -> Result<Record, StoreError> {
        self.create_seeded(input, &filter.predicates())
    }

    fn create_seeded(
        &mut self,
        input: &Input,
        seeds: &[(&'static str, &str)],
    ) -> Result<Record, StoreError> {
        let record_id = record_id_of(input).ok_or(StoreError::MissingKey(RECORD_ID_KEY))?;

        for (field, expected) in seeds {
            if let Some(given) = input.get(*field) {
                if !value_matches(given, expected) {
                    return Err(StoreError::Conflict {
                        field: *field,
                        expected: expected.to_string(),
                        given: render(given),
                    });
                }
            }
        }

        if self.contains(record_id) {
            return Err(StoreError::Duplicate(record_id.to_string()));
        }

        let mut record = Record::new(record_id, Utc::now());
        for (field, value) in seeds {
            record
                .fields
                .insert(field.to_string(), Value::String(value.to_string()));
        }
        self.allow_list.merge_into(&mut record.fields, input);

        debug!(record_id, fields = record.fields.len(), "record created");
        self.records.push(record.clone());
        Ok(record)
    }

    /// Overwrite the allow-listed fields present in `input`. The body must
    /// name the record it targets.
    pub fn update(&mut self, record_id: &str, input: &Input) -> Result<Record, StoreError> {
        let given = record_id_of(input).ok_or(StoreError::MissingKey(RECORD_ID_KEY))?;
        if given != record_id {
            return Err(StoreError::Conflict {
                field: RECORD_ID_KEY,
                expected: record_id.to_string(),
                given: given.to_string(),
            });
        }

        let allow_list = self.allow_list;
        let record = self
            .records
            .iter_mut()
            .find(|r| r.record_id == record_id)
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))?;

        let copied = allow_list.merge_into(&mut record.fields, input);
        record.touch(Utc::now());
        debug!(record_id, copied, "record updated");
        Ok(record.clone())
    }

    /// Remove the record with `record_id`. Returns whether one was removed.
    pub fn delete(&mut self, record_id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.record_id != record_id);
        let removed = self.records.len() != before;
        if removed {
            debug!(record_id, "record deleted");
        }
        removed
    }

    /// Distinct values of `field` in order of first occurrence. Records
    /// without the field are skipped.
    pub fn distinct(&self, field: &str) -> Vec<Value> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter_map(|r| r.field(field))
            .filter(|v| seen.insert(v.to_string()))
            .cloned()
            .collect()
    }

    /// Drop every record past the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    /// Append entries delivered by the remote source. Entries only ever go
    /// to the end of the sequence.
    pub fn append_fetched(&mut self, records: Vec<Record>, policy: DuplicatePolicy) -> AppendReport {
        let mut report = AppendReport::default();
        match policy {
            DuplicatePolicy::Append => {
                report.appended = records.len();
                self.records.extend(records);
            }
            DuplicatePolicy::Skip => {
                let mut ids: HashSet<String> =
                    self.records.iter().map(|r| r.record_id.clone()).collect();
                for record in records {
                    if ids.insert(record.record_id.clone()) {
                        self.records.push(record);
                        report.appended += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
            }
        }
        report
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
