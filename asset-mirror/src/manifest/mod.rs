//! Versioned asset manifests.
//!
//! A manifest is an XML document whose `f` descendants each describe one
//! remote asset:
//!
//! ```xml
//! <versiondata>
//!   <f n="module/scene/map01" v="2023010112345678"/>
//! </versiondata>
//! ```
//!
//! `n` is the asset key (a path-like string), `v` an opaque version token
//! and the optional `u` a pre-resolved download URL. Element and attribute
//! names are carried by [`ManifestFormat`].

pub mod diff;
pub mod version;

use crate::utils::ManifestError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use diff::{diff, diff_filtered, filter_by_date, DateRange, DiffResult, DiffSummary};

/// Element and attribute names used by a manifest document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFormat {
    pub element: String,
    pub key_attr: String,
    pub version_attr: String,
    pub url_attr: String,
}

impl Default for ManifestFormat {
    fn default() -> Self {
        Self {
            element: "f".to_string(),
            key_attr: "n".to_string(),
            version_attr: "v".to_string(),
            url_attr: "u".to_string(),
        }
    }
}

/// One remote asset listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path-like identifier, unique within a manifest
    pub key: String,

    /// Opaque version token, usually date-derived
    pub version: Option<String>,

    /// Pre-resolved download URL, when the document carries one
    pub url: Option<String>,
}

impl ManifestEntry {
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: Some(version.into()),
            url: None,
        }
    }
}

/// Entries of one manifest document, in document order.
///
/// Keys are unique. When the source repeats a key the last occurrence's
/// attributes win and the entry keeps the position of the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// The empty manifest, used as the baseline for a bootstrap sync.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a manifest, collapsing duplicate keys.
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        let (manifest, _) = Self::collect(entries);
        manifest
    }

    /// Build a manifest and report how many duplicate keys were collapsed.
    fn collect(entries: impl IntoIterator<Item = ManifestEntry>) -> (Self, usize) {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut out: Vec<ManifestEntry> = Vec::new();
        let mut duplicates = 0usize;

        for entry in entries {
            match positions.get(&entry.key) {
                Some(&idx) => {
                    out[idx] = entry;
                    duplicates += 1;
                }
                None => {
                    positions.insert(entry.key.clone(), out.len());
                    out.push(entry);
                }
            }
        }

        (Self { entries: out }, duplicates)
    }

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

    pub fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Set of all keys, for O(1) membership checks.
    pub fn key_set(&self) -> HashSet<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ManifestEntry;
    type IntoIter = std::slice::Iter<'a, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Counters gathered while parsing one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Entries kept after duplicate collapsing
    pub entries: usize,
    /// Elements skipped because they lacked the key attribute
    pub skipped: usize,
    /// Repeated keys collapsed into an earlier entry
    pub duplicates: usize,
}

/// Parses manifest documents of a given [`ManifestFormat`].
#[derive(Debug, Clone, Default)]
pub struct ManifestStore {
    format: ManifestFormat,
}

impl ManifestStore {
    pub fn new(format: ManifestFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &ManifestFormat {
        &self.format
    }

    /// Load and parse the manifest at `path`.
    pub fn load(&self, path: &Path) -> Result<Manifest, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let (manifest, stats) = self.parse_with_stats(&text, path)?;
        info!(
            path = %path.display(),
            entries = stats.entries,
            skipped = stats.skipped,
            duplicates = stats.duplicates,
            "Loaded manifest"
        );
        Ok(manifest)
    }

    /// Parse a manifest held in memory. `origin` only labels errors.
    pub fn parse(&self, text: &str, origin: &Path) -> Result<Manifest, ManifestError> {
        self.parse_with_stats(text, origin).map(|(m, _)| m)
    }

    pub fn parse_with_stats(
        &self,
        text: &str,
        origin: &Path,
    ) -> Result<(Manifest, LoadStats), ManifestError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let xml_err = |msg: String| ManifestError::Xml {
            path: origin.to_path_buf(),
            msg,
        };

        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut depth = 0usize;
        let mut saw_root = false;
        let mut raw = Vec::new();
        let mut skipped = 0usize;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| xml_err(format!("{} at byte {}", e, reader.buffer_position())))?;

            match event {
                Event::Start(e) => {
                    if depth == 0 {
                        if saw_root {
                            return Err(xml_err("multiple root elements".to_string()));
                        }
                        saw_root = true;
                    } else {
                        self.visit(&e, &mut raw, &mut skipped, origin)?;
                    }
                    depth += 1;
                }
                Event::Empty(e) => {
                    if depth == 0 {
                        if saw_root {
                            return Err(xml_err("multiple root elements".to_string()));
                        }
                        saw_root = true;
                    } else {
                        self.visit(&e, &mut raw, &mut skipped, origin)?;
                    }
                }
                Event::End(_) => {
                    if depth == 0 {
                        return Err(xml_err("unmatched closing tag".to_string()));
                    }
                    depth -= 1;
                }
                Event::Text(t) if depth == 0 && !t.is_empty() => {
                    return Err(xml_err("text outside the root element".to_string()));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(ManifestError::NoRoot {
                path: origin.to_path_buf(),
            });
        }
        if depth != 0 {
            return Err(ManifestError::Unclosed {
                path: origin.to_path_buf(),
            });
        }

        let (manifest, duplicates) = Manifest::collect(raw);
        let stats = LoadStats {
            entries: manifest.len(),
            skipped,
            duplicates,
        };
        Ok((manifest, stats))
    }

    /// Turn one element into an entry if it is a manifest entry element.
    fn visit(
        &self,
        element: &BytesStart<'_>,
        out: &mut Vec<ManifestEntry>,
        skipped: &mut usize,
        origin: &Path,
    ) -> Result<(), ManifestError> {
        if element.name().as_ref() != self.format.element.as_bytes() {
            return Ok(());
        }

        let mut key = None;
        let mut version = None;
        let mut url = None;

        for attr in element.attributes() {
            let attr = attr.map_err(|e| ManifestError::Xml {
                path: origin.to_path_buf(),
                msg: e.to_string(),
            })?;
            let value = attr
                .unescape_value()
                .map_err(|e| ManifestError::Xml {
                    path: origin.to_path_buf(),
                    msg: e.to_string(),
                })?
                .into_owned();

            let name = attr.key.as_ref();
            if name == self.format.key_attr.as_bytes() {
                key = Some(value);
            } else if name == self.format.version_attr.as_bytes() {
                version = Some(value);
            } else if name == self.format.url_attr.as_bytes() {
                url = Some(value);
            }
        }

        match key {
            Some(key) if !key.is_empty() => out.push(ManifestEntry { key, version, url }),
            _ => {
                *skipped += 1;
                warn!(
                    element = %String::from_utf8_lossy(element),
                    "Skipping manifest element without a key attribute"
                );
            }
        }

        Ok(())
    }
}

/// Write `entries` as a manifest document carrying only key and version.
///
/// `.xml` is appended to `path` when it does not already end with it.
/// Returns the path actually written.
pub fn write_manifest<'a>(
    entries: impl IntoIterator<Item = &'a ManifestEntry>,
    format: &ManifestFormat,
    path: &Path,
) -> Result<PathBuf, ManifestError> {
    let path = with_xml_suffix(path);
    let write_err = |msg: String| ManifestError::Write {
        path: path.clone(),
        msg,
    };

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| write_err(e.to_string()))?;
    writer
        .write_event(Event::Start(BytesStart::new("root")))
        .map_err(|e| write_err(e.to_string()))?;

    let mut written = 0usize;
    for entry in entries {
        let mut element = BytesStart::new(format.element.as_str());
        element.push_attribute((format.key_attr.as_str(), entry.key.as_str()));
        if let Some(version) = &entry.version {
            element.push_attribute((format.version_attr.as_str(), version.as_str()));
        }
        writer
            .write_event(Event::Empty(element))
            .map_err(|e| write_err(e.to_string()))?;
        written += 1;
    }

    writer
        .write_event(Event::End(BytesEnd::new("root")))
        .map_err(|e| write_err(e.to_string()))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    std::fs::write(&path, bytes).map_err(|e| write_err(e.to_string()))?;

    info!(path = %path.display(), entries = written, "Wrote manifest");
    Ok(path)
}

fn with_xml_suffix(path: &Path) -> PathBuf {
    if path.to_string_lossy().ends_with(".xml") {
        return path.to_path_buf();
    }
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(".xml");
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(text: &str) -> Result<(Manifest, LoadStats), ManifestError> {
        ManifestStore::default().parse_with_stats(text, Path::new("test.xml"))
    }

    #[test]
    fn test_parse_entries_in_document_order() {
        let (manifest, stats) = parse(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <versiondata>
              <f n="ui/main" v="2023010112345678"/>
              <f n="scene/map01" v="230105998877" u="http://cdn.example/map01.swf"/>
            </versiondata>"#,
        )
        .unwrap();

        assert_eq!(stats.entries, 2);
        let keys: Vec<&str> = manifest.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["ui/main", "scene/map01"]);
        assert_eq!(manifest.entries()[0].version.as_deref(), Some("2023010112345678"));
        assert_eq!(
            manifest.entries()[1].url.as_deref(),
            Some("http://cdn.example/map01.swf")
        );
    }

    #[test]
    fn test_nested_entries_are_found() {
        let (manifest, _) = parse(
            r#"<root><group><f n="a" v="1"/><inner><f n="b" v="2"></f></inner></group></root>"#,
        )
        .unwrap();
        assert_eq!(manifest.len(), 2);
        assert!(manifest.get("b").is_some());
    }

    #[test]
    fn test_empty_root_is_empty_manifest() {
        let (manifest, _) = parse(r#"<?xml version="1.0"?><root></root>"#).unwrap();
        assert!(manifest.is_empty());

        let (manifest, _) = parse("<root/>").unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_missing_key_is_skipped() {
        let (manifest, stats) = parse(r#"<root><f v="1"/><f n="" v="2"/><f n="ok" v="3"/></root>"#).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn test_missing_version_is_kept() {
        let (manifest, _) = parse(r#"<root><f n="bare"/></root>"#).unwrap();
        assert_eq!(manifest.entries()[0].version, None);
    }

    #[test]
    fn test_duplicate_keys_last_wins_first_position() {
        let (manifest, stats) = parse(
            r#"<root><f n="a" v="1"/><f n="b" v="2"/><f n="a" v="3"/></root>"#,
        )
        .unwrap();

        assert_eq!(stats.duplicates, 1);
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries()[0].key, "a");
        assert_eq!(manifest.entries()[0].version.as_deref(), Some("3"));
    }

    #[test]
    fn test_attribute_values_are_unescaped() {
        let (manifest, _) = parse(r#"<root><f n="a&amp;b" v="1"/></root>"#).unwrap();
        assert_eq!(manifest.entries()[0].key, "a&b");
    }

    #[test]
    fn test_malformed_documents_fail() {
        assert!(matches!(parse(""), Err(ManifestError::NoRoot { .. })));
        assert!(parse("<root><f n=\"a\"/>").is_err());
        assert!(parse("<root></other>").is_err());
        assert!(parse("<root/><root/>").is_err());
        assert!(parse("<root><f n=a/></root>").is_err());
    }

    #[test]
    fn test_custom_format() {
        let store = ManifestStore::new(ManifestFormat {
            element: "asset".to_string(),
            key_attr: "path".to_string(),
            version_attr: "rev".to_string(),
            url_attr: "href".to_string(),
        });
        let manifest = store
            .parse(r#"<catalog><asset path="x" rev="9"/><f n="ignored"/></catalog>"#, Path::new("c.xml"))
            .unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.entries()[0].version.as_deref(), Some("9"));
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let store = ManifestStore::default();
        let err = store.load(Path::new("/definitely/not/here.xml")).unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));
    }

    #[test]
    fn test_write_then_load_keeps_key_and_version_only() {
        let dir = TempDir::new().unwrap();
        let entries = vec![
            ManifestEntry {
                key: "a/b".to_string(),
                version: Some("20230101".to_string()),
                url: Some("http://ignored".to_string()),
            },
            ManifestEntry::new("c", "20230102"),
        ];

        let written = write_manifest(&entries, &ManifestFormat::default(), &dir.path().join("result")).unwrap();
        assert_eq!(written, dir.path().join("result.xml"));

        let text = std::fs::read_to_string(&written).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(!text.contains("ignored"));

        let reloaded = ManifestStore::default().load(&written).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.entries()[0].url, None);
        assert_eq!(reloaded.entries()[1], ManifestEntry::new("c", "20230102"));
    }

    #[test]
    fn test_xml_suffix_not_doubled() {
        assert_eq!(with_xml_suffix(Path::new("out.xml")), PathBuf::from("out.xml"));
        assert_eq!(with_xml_suffix(Path::new("out.txt")), PathBuf::from("out.txt.xml"));
    }
}
