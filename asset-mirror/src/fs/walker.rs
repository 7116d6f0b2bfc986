//! Traversal of the local asset cache and manifest directories.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// Only files whose name ends with this suffix
    pub suffix: Option<String>,

    /// Skip entries whose file name contains any of these
    pub exclude_patterns: Vec<String>,
}

impl WalkOptions {
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: Some(suffix.into()),
            ..Default::default()
        }
    }
}

/// A file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    pub size: u64,

    pub modified: Option<SystemTime>,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Self {
            path,
            relative_path,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Walk a directory tree with a callback for each regular file
pub fn walk_directory_with_callback<F>(
    root: &Path,
    options: &WalkOptions,
    mut callback: F,
) -> std::io::Result<()>
where
    F: FnMut(FileInfo),
{
    let mut walker = WalkDir::new(root);
    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    for entry in walker {
        let entry = entry?;

        if !entry.file_type().is_file() || should_skip(&entry, options) {
            continue;
        }

        callback(FileInfo::from_entry(&entry, root)?);
    }

    Ok(())
}

/// Walk a directory tree and collect all regular files
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    walk_directory_with_callback(root, options, |file| files.push(file))?;
    Ok(files)
}

/// File count and total size of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TreeStats {
    pub files: usize,
    pub bytes: u64,
}

/// Count files and sum their sizes. A missing root counts as empty.
pub fn tree_stats(root: &Path, options: &WalkOptions) -> std::io::Result<TreeStats> {
    let mut stats = TreeStats::default();
    if !root.exists() {
        return Ok(stats);
    }

    walk_directory_with_callback(root, options, |file| {
        stats.files += 1;
        stats.bytes += file.size;
    })?;

    Ok(stats)
}

/// Delete `*.part` files left behind by interrupted downloads.
///
/// Returns how many were removed.
pub fn remove_stale_parts(root: &Path) -> std::io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let stale = walk_directory(root, &WalkOptions::with_suffix(".part"))?;
    for file in &stale {
        std::fs::remove_file(&file.path)?;
        tracing::debug!(path = %file.path.display(), "Removed partial download");
    }

    Ok(stale.len())
}

/// The most recently modified `*.xml` file directly inside `dir`.
pub fn find_latest_manifest(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let options = WalkOptions {
        max_depth: Some(1),
        ..WalkOptions::with_suffix(".xml")
    };

    let latest = walk_directory(dir, &options)?
        .into_iter()
        .max_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)))
        .map(|file| file.path);

    Ok(latest)
}

/// What [`collect_matching`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub copied: usize,
    /// Matches whose name already existed in the target
    pub skipped: usize,
}

/// Copy every file under `root` whose name contains `needle` into `target`.
///
/// The copies land flat in `target`, which is created if missing. A file
/// whose name already exists there is left alone. When `target` lies inside
/// `root` its contents are not searched.
pub fn collect_matching(root: &Path, target: &Path, needle: &str) -> std::io::Result<CollectStats> {
    std::fs::create_dir_all(target)?;

    let options = WalkOptions::default();
    let mut matches = Vec::new();
    walk_directory_with_callback(root, &options, |file| {
        let name_matches = file
            .path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().contains(needle));
        if name_matches && !file.path.starts_with(target) {
            matches.push(file.path);
        }
    })?;

    let mut stats = CollectStats::default();
    for source in matches {
        let Some(name) = source.file_name() else {
            continue;
        };
        let destination = target.join(name);

        if destination.exists() {
            tracing::info!(path = %destination.display(), "Already collected, skipping");
            stats.skipped += 1;
            continue;
        }

        std::fs::copy(&source, &destination)?;
        tracing::info!(from = %source.display(), to = %destination.display(), "Collected file");
        stats.copied += 1;
    }

    Ok(stats)
}

fn should_skip(entry: &DirEntry, options: &WalkOptions) -> bool {
    let file_name = entry.file_name().to_string_lossy();

    if let Some(suffix) = &options.suffix {
        if !file_name.ends_with(suffix.as_str()) {
            return true;
        }
    }

    options
        .exclude_patterns
        .iter()
        .any(|pattern| file_name.contains(pattern.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("ui"))?;
        fs::write(temp_dir.path().join("a.swf"), b"content1")?;
        fs::write(temp_dir.path().join("ui/b.swf"), b"content2")?;

        let mut files: Vec<_> = walk_directory(temp_dir.path(), &WalkOptions::default())?
            .into_iter()
            .map(|f| f.relative_path)
            .collect();
        files.sort();
        assert_eq!(files, vec![PathBuf::from("a.swf"), PathBuf::from("ui/b.swf")]);

        Ok(())
    }

    #[test]
    fn test_tree_stats() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("a.swf"), b"12345")?;
        fs::write(temp_dir.path().join("b.swf"), b"1234567")?;
        fs::write(temp_dir.path().join("notes.txt"), b"x")?;

        let stats = tree_stats(temp_dir.path(), &WalkOptions::with_suffix(".swf"))?;
        assert_eq!(stats, TreeStats { files: 2, bytes: 12 });

        let missing = tree_stats(&temp_dir.path().join("nope"), &WalkOptions::default())?;
        assert_eq!(missing, TreeStats::default());

        Ok(())
    }

    #[test]
    fn test_remove_stale_parts() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("ui"))?;
        fs::write(temp_dir.path().join("a.swf"), b"done")?;
        fs::write(temp_dir.path().join("ui/b.swf.part"), b"half")?;

        assert_eq!(remove_stale_parts(temp_dir.path())?, 1);
        assert!(temp_dir.path().join("a.swf").exists());
        assert!(!temp_dir.path().join("ui/b.swf.part").exists());

        Ok(())
    }

    #[test]
    fn test_find_latest_manifest() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        assert_eq!(find_latest_manifest(temp_dir.path())?, None);

        fs::write(temp_dir.path().join("old.xml"), b"<root/>")?;
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(temp_dir.path().join("new.xml"), b"<root/>")?;
        fs::write(temp_dir.path().join("readme.txt"), b"x")?;
        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("nested/deeper.xml"), b"<root/>")?;

        assert_eq!(
            find_latest_manifest(temp_dir.path())?,
            Some(temp_dir.path().join("new.xml"))
        );

        Ok(())
    }

    #[test]
    fn test_exclude_patterns() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("a.swf"), b"keep")?;
        fs::write(temp_dir.path().join(".DS_Store"), b"exclude")?;

        let options = WalkOptions {
            exclude_patterns: vec![".DS_Store".to_string()],
            ..Default::default()
        };
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path.to_str().unwrap(), "a.swf");

        Ok(())
    }

    #[test]
    fn test_collect_matching_copies_flat_and_skips_existing() -> std::io::Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        fs::create_dir_all(source.path().join("ui/icons"))?;
        fs::write(source.path().join("ui/hero_idle.swf"), "one")?;
        fs::write(source.path().join("ui/icons/hero_run.swf"), "two")?;
        fs::write(source.path().join("ui/villain.swf"), "three")?;

        let out = target.path().join("picked");
        fs::create_dir_all(&out)?;
        fs::write(out.join("hero_run.swf"), "kept")?;

        let stats = collect_matching(source.path(), &out, "hero")?;
        assert_eq!(stats, CollectStats { copied: 1, skipped: 1 });
        assert_eq!(fs::read_to_string(out.join("hero_idle.swf"))?, "one");
        assert_eq!(fs::read_to_string(out.join("hero_run.swf"))?, "kept");
        assert!(!out.join("villain.swf").exists());

        let again = collect_matching(source.path(), &out, "hero")?;
        assert_eq!(again, CollectStats { copied: 0, skipped: 2 });
        Ok(())
    }

    #[test]
    fn test_collect_matching_into_nested_target() -> std::io::Result<()> {
        let root = TempDir::new()?;
        fs::write(root.path().join("a_hero.swf"), "a")?;
        let target = root.path().join("exported/picked");

        let stats = collect_matching(root.path(), &target, "hero")?;
        assert_eq!(stats.copied, 1);
        assert!(target.join("a_hero.swf").exists());

        // The copy inside the target is not matched a second time
        let again = collect_matching(root.path(), &target, "hero")?;
        assert_eq!(again, CollectStats { copied: 0, skipped: 1 });
        Ok(())
    }
}
