//! Manifest diffing and date-range filtering.
//!
//! The diff is a set difference by key: an entry is emitted when its key is
//! absent from the baseline. A changed version on an existing key is not a
//! difference.

use super::version::{decode_version_date, VersionCensus};
use super::{Manifest, ManifestEntry};
use crate::utils::{MirrorError, Result};
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::info;

/// Entries of the candidate manifest whose keys are new, in candidate order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    entries: Vec<ManifestEntry>,
}

impl DiffResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestEntry> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a DiffResult {
    type Item = &'a ManifestEntry;
    type IntoIter = std::slice::Iter<'a, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Counts describing one diff run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DiffSummary {
    pub baseline: usize,
    pub candidate: usize,
    pub added: usize,
    pub retained: usize,
}

/// Inclusive date window over decoded version tokens. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// A range that filters nothing.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(MirrorError::Config(format!(
                    "date range start {} is after end {}",
                    s.format("%Y%m%d"),
                    e.format("%Y%m%d")
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Build from optional `YYYYMMDD` strings; blank strings mean "open".
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        Self::new(parse_bound(start)?, parse_bound(end)?)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    /// Whether an entry with this version token survives the filter.
    ///
    /// With no bounds every entry survives, including ones without a token.
    /// With bounds, the token must decode to a date inside the window.
    pub fn admits(&self, version: Option<&str>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        version
            .and_then(decode_version_date)
            .is_some_and(|date| self.contains(date))
    }
}

fn parse_bound(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => {
            if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(MirrorError::Config(format!(
                    "invalid date '{s}', expected YYYYMMDD"
                )));
            }
            NaiveDate::parse_from_str(s, "%Y%m%d")
                .map(Some)
                .map_err(|e| MirrorError::Config(format!("invalid date '{s}': {e}")))
        }
    }
}

/// Entries of `candidate` whose key does not occur in `baseline`.
///
/// Runs in O(n + m). An empty baseline yields the whole candidate.
pub fn diff(baseline: &Manifest, candidate: &Manifest) -> DiffResult {
    let known = baseline.key_set();
    let mut emitted: HashSet<&str> = HashSet::new();
    let mut entries = Vec::new();

    for entry in candidate {
        let key = entry.key.as_str();
        if !known.contains(key) && emitted.insert(key) {
            entries.push(entry.clone());
        }
    }

    DiffResult { entries }
}

/// Keep only the entries whose version falls inside `range`.
pub fn filter_by_date(result: DiffResult, range: &DateRange) -> DiffResult {
    if range.is_unbounded() {
        return result;
    }

    let census: VersionCensus = result
        .iter()
        .map(|e| e.version.as_deref().unwrap_or(""))
        .collect();
    info!(
        long = census.long,
        short = census.short,
        tiny = census.tiny,
        unknown = census.unknown,
        "Version token formats"
    );

    let entries = result
        .into_entries()
        .into_iter()
        .filter(|entry| range.admits(entry.version.as_deref()))
        .collect();

    DiffResult { entries }
}

/// Diff then filter, returning the counts alongside the result.
pub fn diff_filtered(
    baseline: &Manifest,
    candidate: &Manifest,
    range: &DateRange,
) -> (DiffResult, DiffSummary) {
    let added = diff(baseline, candidate);
    let added_count = added.len();
    let retained = filter_by_date(added, range);

    let summary = DiffSummary {
        baseline: baseline.len(),
        candidate: candidate.len(),
        added: added_count,
        retained: retained.len(),
    };
    info!(
        baseline = summary.baseline,
        candidate = summary.candidate,
        added = summary.added,
        retained = summary.retained,
        "Manifest diff complete"
    );

    (retained, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(pairs: &[(&str, &str)]) -> Manifest {
        Manifest::from_entries(pairs.iter().map(|(k, v)| ManifestEntry::new(*k, *v)))
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_diff_only_new_keys() {
        let baseline = manifest(&[("a", "20230101"), ("b", "20230102")]);
        let candidate = manifest(&[("a", "20230101"), ("b", "20230103"), ("c", "20230104")]);

        let result = diff(&baseline, &candidate);
        assert_eq!(result.keys(), vec!["c"]);
    }

    #[test]
    fn test_diff_against_self_is_empty() {
        let m = manifest(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert!(diff(&m, &m).is_empty());
    }

    #[test]
    fn test_diff_against_empty_is_candidate() {
        let m = manifest(&[("z", "1"), ("a", "2"), ("m", "3")]);
        let result = diff(&Manifest::empty(), &m);
        assert_eq!(result.entries(), m.entries());
    }

    #[test]
    fn test_diff_preserves_candidate_order() {
        let baseline = manifest(&[("b", "1"), ("d", "1")]);
        let candidate = manifest(&[("e", "1"), ("b", "1"), ("a", "1"), ("d", "1"), ("c", "1")]);
        assert_eq!(diff(&baseline, &candidate).keys(), vec!["e", "a", "c"]);
    }

    #[test]
    fn test_diff_is_deterministic() {
        let baseline = manifest(&[("a", "1")]);
        let candidate = manifest(&[("x", "1"), ("a", "1"), ("y", "1")]);
        assert_eq!(diff(&baseline, &candidate), diff(&baseline, &candidate));
    }

    #[test]
    fn test_filter_by_date_range() {
        let candidate = manifest(&[
            ("first", "2023010112345678"),
            ("second", "2023022887654321"),
            ("third", "99"),
        ]);
        let range = DateRange::parse(Some("20230101"), Some("20230103")).unwrap();

        let (result, summary) = diff_filtered(&Manifest::empty(), &candidate, &range);
        assert_eq!(result.keys(), vec!["first"]);
        assert_eq!(summary.added, 3);
        assert_eq!(summary.retained, 1);
    }

    #[test]
    fn test_unbounded_filter_keeps_versionless_entries() {
        let candidate = Manifest::from_entries(vec![
            ManifestEntry {
                key: "bare".to_string(),
                version: None,
                url: None,
            },
            ManifestEntry::new("short", "99"),
        ]);

        let (result, _) = diff_filtered(&Manifest::empty(), &candidate, &DateRange::unbounded());
        assert_eq!(result.len(), 2);

        let range = DateRange::parse(Some("20000101"), None).unwrap();
        let (result, _) = diff_filtered(&Manifest::empty(), &candidate, &range);
        assert!(result.is_empty());
    }

    #[test]
    fn test_open_bounds() {
        let start_only = DateRange::new(Some(ymd(2023, 1, 1)), None).unwrap();
        assert!(start_only.admits(Some("20991231")));
        assert!(!start_only.admits(Some("20221231")));

        let end_only = DateRange::new(None, Some(ymd(2023, 1, 1))).unwrap();
        assert!(end_only.admits(Some("140929")));
        assert!(!end_only.admits(Some("230102")));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let range = DateRange::parse(Some("20230101"), Some("20230103")).unwrap();
        assert!(range.admits(Some("20230101")));
        assert!(range.admits(Some("20230103999")));
        assert!(!range.admits(Some("20230104")));
    }

    #[test]
    fn test_date_range_parse_errors() {
        assert!(DateRange::parse(Some("2023-01-01"), None).is_err());
        assert!(DateRange::parse(Some("20231301"), None).is_err());
        assert!(DateRange::parse(Some("20230105"), Some("20230101")).is_err());
        assert!(DateRange::parse(Some(""), Some("  ")).unwrap().is_unbounded());
    }
}
