//! Gateway to the external transcoding tools.
//!
//! Every operation is one process invocation: spawn, wait (bounded by a timeout), and treat a
//! nonzero exit as failure. Callers own cleanup of partial output files.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use crate::error::TranscodeError;

pub const THUMBNAIL_HEIGHT: u32 = 180;
const SNIFF_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Single frame, fixed height, no audio.
    async fn thumbnail(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;

    /// Square crop used for avatars and mood icons. Animated output only when `animated` is set
    /// and the output format supports it.
    async fn fixed_square(&self, input: &Path, output: &Path, side_px: u32, animated: bool) -> Result<(), TranscodeError>;

    /// Fit within the requested box without ever enlarging the source. A missing dimension
    /// follows the aspect ratio.
    async fn scale(&self, input: &Path, output: &Path, width: Option<u32>, height: Option<u32>) -> Result<(), TranscodeError>;

    async fn probe_dimensions(&self, input: &Path) -> Result<Option<Dimensions>, TranscodeError>;

    /// MIME type from the file's magic bytes.
    async fn sniff_mime(&self, input: &Path) -> Option<String> {
        sniff_mime(input).await
    }
}

pub async fn sniff_mime(input: &Path) -> Option<String> {
    let mut file = tokio::fs::File::open(input).await.ok()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head).await.ok()?;
    infer::get(&head).map(|x| x.mime_type().to_string())
}

pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, timeout: Duration) -> Self {
        Self { ffmpeg, ffprobe, timeout }
    }

    async fn ffmpeg(&self, args: Vec<OsString>) -> Result<Output, TranscodeError> {
        run_process(&self.ffmpeg, &args, self.timeout).await
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn thumbnail(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let args = ffmpeg_args(input, output, &[
            "-vf", &format!("scale=-2:{}", THUMBNAIL_HEIGHT),
            "-frames:v", "1",
            "-an",
        ]);
        self.ffmpeg(args).await.map(|_| ())
    }

    async fn fixed_square(&self, input: &Path, output: &Path, side_px: u32, animated: bool) -> Result<(), TranscodeError> {
        let filter = format!("scale={side}:{side}:force_original_aspect_ratio=increase,crop={side}:{side}", side = side_px);
        let mut extra = vec!["-vf", filter.as_str(), "-an"];
        if animated {
            extra.extend(["-loop", "0"]);
        } else {
            extra.extend(["-frames:v", "1"]);
        }
        self.ffmpeg(ffmpeg_args(input, output, &extra)).await.map(|_| ())
    }

    async fn scale(&self, input: &Path, output: &Path, width: Option<u32>, height: Option<u32>) -> Result<(), TranscodeError> {
        let filter = scale_filter(width, height);
        let args = ffmpeg_args(input, output, &["-vf", &filter, "-frames:v", "1", "-an"]);
        self.ffmpeg(args).await.map(|_| ())
    }

    async fn probe_dimensions(&self, input: &Path) -> Result<Option<Dimensions>, TranscodeError> {
        let args: Vec<OsString> = vec![
            "-v".into(), "error".into(),
            "-select_streams".into(), "v:0".into(),
            "-show_entries".into(), "stream=width,height".into(),
            "-of".into(), "json".into(),
            input.as_os_str().to_owned(),
        ];
        let output = run_process(&self.ffprobe, &args, self.timeout).await?;
        parse_probe_output(&output.stdout)
    }
}

fn ffmpeg_args(input: &Path, output: &Path, extra: &[&str]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into(), "-y".into(), "-i".into(), input.as_os_str().to_owned()];
    args.extend(extra.iter().map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

/// `-1` lets ffmpeg derive the axis from the aspect ratio; `min(.., iw)` keeps the source size
/// as the upper bound on each axis.
pub fn scale_filter(width: Option<u32>, height: Option<u32>) -> String {
    match (width, height) {
        (Some(w), Some(h)) => format!("scale=w='min({},iw)':h='min({},ih)':force_original_aspect_ratio=decrease", w, h),
        (Some(w), None) => format!("scale=w='min({},iw)':h=-1", w),
        (None, Some(h)) => format!("scale=w=-1:h='min({},ih)'", h),
        (None, None) => "scale=w=iw:h=ih".to_string(),
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

pub fn parse_probe_output(stdout: &[u8]) -> Result<Option<Dimensions>, TranscodeError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| TranscodeError::ProbeOutput(e.to_string()))?;
    let dimensions = probe.streams.into_iter()
        .find_map(|stream| match (stream.width, stream.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some(Dimensions { width, height }),
            _ => None,
        });
    Ok(dimensions)
}

/// Runs `program` to completion. The child is killed if it outlives `timeout`.
pub async fn run_process(program: &Path, args: &[OsString], timeout: Duration) -> Result<Output, TranscodeError> {
    let program_name = program.display().to_string();
    debug!("Running {} {:?}", program_name, args);
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TranscodeError::Spawn { program: program_name.clone(), source })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(TranscodeError::Wait { program: program_name, source }),
        Err(_) => {
            warn!("{} timed out after {}ms", program_name, timeout.as_millis());
            return Err(TranscodeError::TimedOut { program: program_name, millis: timeout.as_millis() });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("{} failed: {}", program_name, stderr.trim());
        return Err(TranscodeError::ExitStatus { program: program_name, code: output.status.code() });
    }
    Ok(output)
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use super::*;

    /// Records invocations and writes deterministic output instead of running ffmpeg.
    #[derive(Default)]
    pub struct FakeTranscoder {
        pub thumbnails: AtomicUsize,
        pub squares: AtomicUsize,
        pub scales: AtomicUsize,
        pub probes: AtomicUsize,
        pub fail: AtomicBool,
        pub dimensions: Option<Dimensions>,
    }

    impl FakeTranscoder {
        pub fn failing() -> Self {
            Self { fail: AtomicBool::new(true), ..Default::default() }
        }

        pub fn with_dimensions(width: u32, height: u32) -> Self {
            Self { dimensions: Some(Dimensions { width, height }), ..Default::default() }
        }

        fn check(&self, program: &str) -> Result<(), TranscodeError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TranscodeError::ExitStatus { program: program.to_string(), code: Some(1) });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn thumbnail(&self, _input: &Path, output: &Path) -> Result<(), TranscodeError> {
            self.thumbnails.fetch_add(1, Ordering::SeqCst);
            self.check("ffmpeg")?;
            tokio::fs::write(output, b"thumbnail").await.map_err(|source| TranscodeError::Wait { program: "fake".into(), source })
        }

        async fn fixed_square(&self, _input: &Path, output: &Path, side_px: u32, animated: bool) -> Result<(), TranscodeError> {
            self.squares.fetch_add(1, Ordering::SeqCst);
            self.check("ffmpeg")?;
            let body = format!("square {} animated={}", side_px, animated);
            tokio::fs::write(output, body).await.map_err(|source| TranscodeError::Wait { program: "fake".into(), source })
        }

        async fn scale(&self, input: &Path, output: &Path, width: Option<u32>, height: Option<u32>) -> Result<(), TranscodeError> {
            self.scales.fetch_add(1, Ordering::SeqCst);
            self.check("ffmpeg")?;
            let body = format!("{} scaled to {:?}x{:?}", input.display(), width, height);
            tokio::fs::write(output, body).await.map_err(|source| TranscodeError::Wait { program: "fake".into(), source })
        }

        async fn probe_dimensions(&self, _input: &Path) -> Result<Option<Dimensions>, TranscodeError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.check("ffprobe")?;
            Ok(self.dimensions)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_filter_never_enlarges() {
        assert_eq!(scale_filter(Some(50), None), "scale=w='min(50,iw)':h=-1");
        assert_eq!(scale_filter(None, Some(70)), "scale=w=-1:h='min(70,ih)'");
        assert_eq!(
            scale_filter(Some(100), Some(80)),
            "scale=w='min(100,iw)':h='min(80,ih)':force_original_aspect_ratio=decrease"
        );
    }

    #[test]
    fn probe_output_parsing() {
        let out = br#"{"programs": [], "streams": [{"width": 640, "height": 480}]}"#;
        assert_eq!(parse_probe_output(out).unwrap(), Some(Dimensions { width: 640, height: 480 }));
        assert_eq!(parse_probe_output(br#"{"streams": []}"#).unwrap(), None);
        assert_eq!(parse_probe_output(br#"{}"#).unwrap(), None);
        assert_eq!(parse_probe_output(b"  \n").unwrap(), None);
        assert!(parse_probe_output(b"garbage").is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let result = run_process(Path::new("/definitely/not/a/transcoder"), &[], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TranscodeError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported_with_code() {
        let args: Vec<OsString> = vec!["-c".into(), "exit 3".into()];
        let result = run_process(Path::new("sh"), &args, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(TranscodeError::ExitStatus { code: Some(3), .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_process_times_out() {
        let args: Vec<OsString> = vec!["-c".into(), "sleep 10".into()];
        let started = std::time::Instant::now();
        let result = run_process(Path::new("sh"), &args, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TranscodeError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sniffs_png_magic_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]).unwrap();
        assert_eq!(sniff_mime(&path).await, Some("image/png".to_string()));

        std::fs::write(&path, b"just text").unwrap();
        assert_eq!(sniff_mime(&path).await, None);
    }
}
