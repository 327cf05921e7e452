//! In-memory metadata index over stored chunks.
//!
//! Maps structured attributes to the chunk ids that carry them so that a
//! filtered query scores only relevant chunks. The index is derived from
//! the persisted collection on open ([`MetadataIndex::rebuild`]) and kept
//! in step with every write; it is never persisted on its own.
//!
//! | Attribute | Structure | Predicate |
//! |-----------|-----------|-----------|
//! | `app_id` | `BTreeMap<app_id, ids>` | equality |
//! | `app_name` | `BTreeMap<app_name, ids>` | equality |
//! | `focus_areas` | `BTreeMap<FocusArea, ids>` | set intersection |
//! | `created_at` | `BTreeSet<(created_at, id)>` | inclusive range |

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::models::{AnalysisMetadata, AppSummary, ChunkRecord, FocusArea};

/// Structured predicate over chunk metadata. All fields are optional and
/// combine with AND; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    /// Matches chunks whose focus areas intersect this set.
    pub focus_areas: Option<BTreeSet<FocusArea>>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_focus_areas(mut self, areas: impl IntoIterator<Item = FocusArea>) -> Self {
        self.focus_areas = Some(areas.into_iter().collect());
        self
    }

    pub fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    /// True when no field constrains the result.
    pub fn is_empty(&self) -> bool {
        self.app_id.is_none()
            && self.app_name.is_none()
            && self.focus_areas.as_ref().map_or(true, BTreeSet::is_empty)
            && self.created_after.is_none()
            && self.created_before.is_none()
    }

    /// Evaluate the predicate against one metadata record.
    pub fn matches(&self, meta: &AnalysisMetadata) -> bool {
        if let Some(id) = &self.app_id {
            if &meta.app_id != id {
                return false;
            }
        }
        if let Some(name) = &self.app_name {
            if &meta.app_name != name {
                return false;
            }
        }
        if let Some(areas) = &self.focus_areas {
            if !areas.is_empty() && meta.focus_areas.is_disjoint(areas) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if meta.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if meta.created_at > before {
                return false;
            }
        }
        true
    }
}

/// Inverted index from metadata attributes to chunk ids.
#[derive(Debug, Default, Clone)]
pub struct MetadataIndex {
    entries: BTreeMap<String, AnalysisMetadata>,
    by_app: BTreeMap<String, BTreeSet<String>>,
    by_name: BTreeMap<String, BTreeSet<String>>,
    by_focus: BTreeMap<FocusArea, BTreeSet<String>>,
    by_time: BTreeSet<(DateTime<Utc>, String)>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from persisted records. The result depends only on
    /// the set of records, not their order.
    pub fn rebuild<'a>(records: impl IntoIterator<Item = &'a ChunkRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.index(record.chunk_id(), &record.metadata);
        }
        index
    }

    /// Record `chunk_id` under `metadata`, replacing any previous entry.
    pub fn index(&mut self, chunk_id: &str, metadata: &AnalysisMetadata) {
        self.remove_chunk(chunk_id);

        let id = chunk_id.to_string();
        self.by_app
            .entry(metadata.app_id.clone())
            .or_default()
            .insert(id.clone());
        self.by_name
            .entry(metadata.app_name.clone())
            .or_default()
            .insert(id.clone());
        for area in &metadata.focus_areas {
            self.by_focus.entry(*area).or_default().insert(id.clone());
        }
        self.by_time.insert((metadata.created_at, id.clone()));
        self.entries.insert(id, metadata.clone());
    }

    /// Remove one chunk. Returns false if it was not indexed.
    pub fn remove_chunk(&mut self, chunk_id: &str) -> bool {
        let Some(meta) = self.entries.remove(chunk_id) else {
            return false;
        };
        remove_from(&mut self.by_app, &meta.app_id, chunk_id);
        remove_from(&mut self.by_name, &meta.app_name, chunk_id);
        for area in &meta.focus_areas {
            remove_from(&mut self.by_focus, area, chunk_id);
        }
        self.by_time
            .remove(&(meta.created_at, chunk_id.to_string()));
        true
    }

    /// Remove every chunk of `app_id`, returning how many were removed.
    pub fn remove(&mut self, app_id: &str) -> usize {
        let ids: Vec<String> = self
            .by_app
            .get(app_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter().filter(|id| self.remove_chunk(id)).count()
    }

    /// Resolve a filter to the set of matching chunk ids.
    ///
    /// Each constrained field yields a candidate set; the sets are
    /// intersected smallest-first. An empty filter returns every id.
    pub fn filter(&self, filter: &MetadataFilter) -> BTreeSet<String> {
        if filter.is_empty() {
            return self.entries.keys().cloned().collect();
        }

        let mut sets: Vec<BTreeSet<String>> = Vec::new();

        if let Some(app_id) = &filter.app_id {
            sets.push(self.by_app.get(app_id).cloned().unwrap_or_default());
        }
        if let Some(name) = &filter.app_name {
            sets.push(self.by_name.get(name).cloned().unwrap_or_default());
        }
        if let Some(areas) = filter.focus_areas.as_ref().filter(|a| !a.is_empty()) {
            let union: BTreeSet<String> = areas
                .iter()
                .filter_map(|a| self.by_focus.get(a))
                .flatten()
                .cloned()
                .collect();
            sets.push(union);
        }
        if filter.created_after.is_some() || filter.created_before.is_some() {
            sets.push(self.time_range(filter.created_after, filter.created_before));
        }

        sets.sort_by_key(BTreeSet::len);
        let mut iter = sets.into_iter();
        let mut result = iter.next().unwrap_or_default();
        for set in iter {
            if result.is_empty() {
                break;
            }
            result.retain(|id| set.contains(id));
        }
        result
    }

    fn time_range(
        &self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> BTreeSet<String> {
        let in_upper = |ts: &DateTime<Utc>| before.map_or(true, |b| *ts <= b);
        match after {
            Some(a) => self
                .by_time
                .range((a, String::new())..)
                .take_while(|(ts, _)| in_upper(ts))
                .map(|(_, id)| id.clone())
                .collect(),
            None => self
                .by_time
                .iter()
                .take_while(|(ts, _)| in_upper(ts))
                .map(|(_, id)| id.clone())
                .collect(),
        }
    }

    /// Applications with at least one indexed chunk, sorted by id.
    pub fn apps(&self) -> Vec<AppSummary> {
        self.by_app
            .iter()
            .filter_map(|(app_id, ids)| {
                let first = ids.iter().next()?;
                let meta = self.entries.get(first)?;
                Some(AppSummary {
                    app_id: app_id.clone(),
                    app_name: meta.app_name.clone(),
                })
            })
            .collect()
    }

    pub fn chunk_ids_for(&self, app_id: &str) -> BTreeSet<String> {
        self.by_app.get(app_id).cloned().unwrap_or_default()
    }

    pub fn contains_app(&self, app_id: &str) -> bool {
        self.by_app.contains_key(app_id)
    }

    pub fn metadata(&self, chunk_id: &str) -> Option<&AnalysisMetadata> {
        self.entries.get(chunk_id)
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn remove_from<K: Ord>(map: &mut BTreeMap<K, BTreeSet<String>>, key: &K, id: &str) {
    if let Some(ids) = map.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}
