//! Video probing.
//!
//! The [`Prober`] trait is the pipeline's only view of the media-inspection
//! tool. The production implementation, [`FfprobeProber`], runs
//!
//! ```text
//! ffprobe -v error -select_streams v:0 -show_entries stream=width,height -of csv=s=x:p=0 <file>
//! ```
//!
//! and parses the single `WIDTHxHEIGHT` line it prints. The MIME type never
//! comes from the tool: it is looked up from the file extension
//! ([`keys::mime_type`]).
//!
//! Probing always works on a local file. The pipeline downloads each video
//! into the staging directory first.

use crate::keys;
use crate::types::{InvalidMetadata, VideoMetadata};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("unsupported extension: {0:?}")]
    UnsupportedExtension(String),
    #[error("probe tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("probe exited with status {status:?}: {stderr}")]
    ProcessFailed { status: Option<i32>, stderr: String },
    #[error("probe produced no output")]
    EmptyOutput,
    #[error("malformed probe output: {0:?}")]
    MalformedOutput(String),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid video metadata: {0}")]
    InvalidMetadata(#[from] InvalidMetadata),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// The tool itself is missing; no other file will probe either.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProbeError::ToolUnavailable(_))
    }
}

/// Extracts [`VideoMetadata`] from a local video file.
///
/// Implementations must be `Sync`: the worker pool probes concurrently.
pub trait Prober: Sync {
    /// Check once, before any work starts, that probing can run at all.
    fn check_available(&self) -> Result<(), ProbeError> {
        Ok(())
    }

    fn extract(&self, path: &Path) -> Result<VideoMetadata, ProbeError>;
}

/// Lower-cased extension of a local path.
fn path_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Parse `WIDTHxHEIGHT` from probe output.
///
/// Uses the first non-blank line. Some ffprobe builds print a trailing
/// separator (`1920x1080x`), which is tolerated.
pub fn parse_dimensions(stdout: &str) -> Result<(u32, u32), ProbeError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or(ProbeError::EmptyOutput)?;

    let malformed = || ProbeError::MalformedOutput(line.to_string());
    let (width, height) = line.trim_end_matches('x').split_once('x').ok_or_else(malformed)?;
    let width = width.trim().parse::<u32>().map_err(|_| malformed())?;
    let height = height.trim().parse::<u32>().map_err(|_| malformed())?;
    Ok((width, height))
}

/// [`Prober`] backed by the `ffprobe` executable.
pub struct FfprobeProber {
    program: PathBuf,
    timeout: Duration,
    runtime: Handle,
}

impl FfprobeProber {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, runtime: Handle) -> Self {
        Self {
            program: program.into(),
            timeout,
            runtime,
        }
    }

    fn run(&self, path: &Path) -> Result<String, ProbeError> {
        let mut command = Command::new(&self.program);
        command
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=s=x:p=0",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limit = self.timeout;
        let output = self
            .runtime
            .block_on(async { tokio::time::timeout(limit, command.output()).await })
            .map_err(|_| ProbeError::Timeout(limit))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProbeError::ToolUnavailable(format!("{}: {}", self.program.display(), e))
                }
                _ => ProbeError::Io(e),
            })?;

        if !output.status.success() {
            return Err(ProbeError::ProcessFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Prober for FfprobeProber {
    fn check_available(&self) -> Result<(), ProbeError> {
        which::which(&self.program)
            .map(|resolved| debug!("Using probe tool {}", resolved.display()))
            .map_err(|e| ProbeError::ToolUnavailable(format!("{}: {}", self.program.display(), e)))
    }

    fn extract(&self, path: &Path) -> Result<VideoMetadata, ProbeError> {
        let extension = path_extension(path);
        if !keys::is_supported(&extension) {
            return Err(ProbeError::UnsupportedExtension(extension));
        }

        let stdout = self.run(path)?;
        let (width, height) = parse_dimensions(&stdout)?;
        debug!("Probed {}: {}x{}", path.display(), width, height);
        Ok(VideoMetadata::new(width, height, keys::mime_type(&extension))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_plain_dimensions() {
        assert_eq!(parse_dimensions("1920x1080\n").unwrap(), (1920, 1080));
    }

    #[test]
    fn parse_tolerates_trailing_separator_and_blank_lines() {
        assert_eq!(parse_dimensions("\n  640x480x\n").unwrap(), (640, 480));
    }

    #[test]
    fn parse_empty_output() {
        assert!(matches!(parse_dimensions(""), Err(ProbeError::EmptyOutput)));
        assert!(matches!(parse_dimensions(" \n\n"), Err(ProbeError::EmptyOutput)));
    }

    #[test]
    fn parse_rejects_other_shapes() {
        for bad in ["1920", "1920,1080", "widthxheight", "x1080", "-1x5"] {
            assert!(
                matches!(parse_dimensions(bad), Err(ProbeError::MalformedOutput(_))),
                "{bad} should be malformed"
            );
        }
    }

    #[test]
    fn only_tool_unavailable_is_fatal() {
        assert!(ProbeError::ToolUnavailable("ffprobe".into()).is_fatal());
        assert!(!ProbeError::EmptyOutput.is_fatal());
        assert!(!ProbeError::UnsupportedExtension("txt".into()).is_fatal());
    }

    fn missing_tool(runtime: &tokio::runtime::Runtime) -> FfprobeProber {
        FfprobeProber::new(
            "/nonexistent/vidsite-ffprobe",
            Duration::from_secs(5),
            runtime.handle().clone(),
        )
    }

    #[test]
    fn missing_tool_fails_availability_check() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let prober = missing_tool(&runtime);
        assert!(matches!(
            prober.check_available(),
            Err(ProbeError::ToolUnavailable(_))
        ));
    }

    #[test]
    fn unsupported_extension_never_spawns() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let prober = missing_tool(&runtime);
        // Spawning the missing tool would report ToolUnavailable instead.
        let err = prober.extract(Path::new("/videos/readme.txt")).unwrap_err();
        assert!(matches!(err, ProbeError::UnsupportedExtension(ext) if ext == "txt"));
    }

    #[test]
    fn spawning_missing_tool_is_tool_unavailable() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let prober = missing_tool(&runtime);
        let err = prober.extract(Path::new("/videos/cat.mp4")).unwrap_err();
        assert!(err.is_fatal());
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ffprobe");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn fake_tool_output_becomes_metadata() {
        let tmp = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tool = fake_tool(tmp.path(), "echo 1280x720");
        let prober = FfprobeProber::new(tool, Duration::from_secs(10), runtime.handle().clone());

        let meta = prober.extract(Path::new("clip.MOV")).unwrap();
        assert_eq!(meta.width(), 1280);
        assert_eq!(meta.height(), 720);
        assert_eq!(meta.mime_type(), "video/quicktime");
    }

    #[cfg(unix)]
    #[test]
    fn fake_tool_nonzero_exit_is_process_failure() {
        let tmp = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tool = fake_tool(tmp.path(), "echo 'moov atom not found' >&2; exit 1");
        let prober = FfprobeProber::new(tool, Duration::from_secs(10), runtime.handle().clone());

        let err = prober.extract(Path::new("broken.mp4")).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::ProcessFailed { status: Some(1), ref stderr } if stderr == "moov atom not found"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn fake_tool_zero_dimensions_are_invalid() {
        let tmp = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tool = fake_tool(tmp.path(), "echo 0x1080");
        let prober = FfprobeProber::new(tool, Duration::from_secs(10), runtime.handle().clone());

        let err = prober.extract(Path::new("cat.mp4")).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidMetadata(InvalidMetadata::ZeroWidth)));
    }

    #[cfg(unix)]
    #[test]
    fn hung_tool_times_out() {
        let tmp = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tool = fake_tool(tmp.path(), "sleep 10");
        let prober =
            FfprobeProber::new(tool, Duration::from_millis(200), runtime.handle().clone());

        let err = prober.extract(Path::new("cat.mp4")).unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }

    #[test]
    #[ignore] // Requires ffprobe and VIDSITE_SAMPLE_VIDEO
    fn probes_real_video() {
        let sample = std::env::var("VIDSITE_SAMPLE_VIDEO").unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let prober = FfprobeProber::new("ffprobe", Duration::from_secs(30), runtime.handle().clone());
        prober.check_available().unwrap();
        let meta = prober.extract(Path::new(&sample)).unwrap();
        assert!(meta.width() > 0 && meta.height() > 0);
    }
}
