//! Post-download processing of fetched assets.
//!
//! The pipeline hands each asset that is present on disk to an
//! [`Extractor`]. Failures are counted, never fatal.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Processes one downloaded asset.
pub trait Extractor: Send + Sync + 'static {
    fn extract(&self, asset: &Path) -> impl Future<Output = Result<(), String>> + Send;
}

/// Accepts every asset and does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtractor;

impl Extractor for NoopExtractor {
    fn extract(&self, _asset: &Path) -> impl Future<Output = Result<(), String>> + Send {
        async { Ok(()) }
    }
}

/// Runs an external program once per asset.
///
/// In `args`, `{input}` expands to the asset path and `{output}` to a
/// per-asset directory under `output_root` named after the asset's file
/// stem. The directory is created before the program starts.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    output_root: PathBuf,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            output_root: output_root.into(),
        }
    }

    pub fn output_dir_for(&self, asset: &Path) -> PathBuf {
        let stem = asset
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "asset".to_string());
        self.output_root.join(stem)
    }

    fn expand_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

impl Extractor for CommandExtractor {
    fn extract(&self, asset: &Path) -> impl Future<Output = Result<(), String>> + Send {
        let output_dir = self.output_dir_for(asset);
        let args = self.expand_args(asset, &output_dir);
        let program = self.program.clone();
        let asset = asset.to_path_buf();

        async move {
            tokio::fs::create_dir_all(&output_dir)
                .await
                .map_err(|e| format!("cannot create {}: {}", output_dir.display(), e))?;

            let output = Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| format!("cannot run {program}: {e}"))?;

            if output.status.success() {
                debug!(path = %asset.display(), "Extracted asset");
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(format!("{} exited with {}: {}", program, output.status, stderr.trim()))
            }
        }
    }
}

/// The extractor chosen by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredExtractor {
    Noop(NoopExtractor),
    Command(CommandExtractor),
}

impl Extractor for ConfiguredExtractor {
    fn extract(&self, asset: &Path) -> impl Future<Output = Result<(), String>> + Send {
        async move {
            match self {
                ConfiguredExtractor::Noop(e) => e.extract(asset).await,
                ConfiguredExtractor::Command(e) => e.extract(asset).await,
            }
        }
    }
}

/// How many assets were handed to the extractor and how that went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExtractionStats {
    pub succeeded: usize,
    pub failed: usize,
    /// Assets never handed over because the run was cancelled
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_expansion() {
        let extractor = CommandExtractor::new(
            "java",
            vec!["-jar".into(), "ffdec.jar".into(), "-export".into(), "{output}".into(), "{input}".into()],
            "/exported",
        );
        let asset = Path::new("/swf/ui/main.swf");
        let output = extractor.output_dir_for(asset);
        assert_eq!(output, PathBuf::from("/exported/main"));
        assert_eq!(
            extractor.expand_args(asset, &output),
            vec!["-jar", "ffdec.jar", "-export", "/exported/main", "/swf/ui/main.swf"]
        );
    }

    #[tokio::test]
    async fn test_noop_extractor() {
        assert!(NoopExtractor.extract(Path::new("/nowhere.swf")).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_runs_program() {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("map01.swf");
        std::fs::write(&asset, b"FWS").unwrap();

        let extractor = ConfiguredExtractor::Command(CommandExtractor::new(
            "cp",
            vec!["{input}".into(), "{output}/copy.swf".into()],
            dir.path().join("exported"),
        ));
        extractor.extract(&asset).await.unwrap();

        assert!(dir.path().join("exported/map01/copy.swf").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = CommandExtractor::new("false", vec![], dir.path());

        let err = extractor.extract(&dir.path().join("a.swf")).await.unwrap_err();
        assert!(err.starts_with("false exited with"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = CommandExtractor::new("definitely-not-a-real-program-4242", vec![], dir.path());

        let err = extractor.extract(&dir.path().join("a.swf")).await.unwrap_err();
        assert!(err.starts_with("cannot run"));
    }
}
