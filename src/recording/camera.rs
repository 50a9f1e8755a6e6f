/**
 * ============================================================================
 * CAMERA MODULE
 * ============================================================================
 * 
 * PURPOSE: Capture device boundary used by the recording engine
 * 
 * FUNCTIONALITY:
 * - Camera trait: open/configure, overlay text, still capture, streaming of
 *   H.264 into a SegmentSink for one segment at a time
 * - V4l2Camera: drives a V4L2 device through FFmpeg
 *   - transpose filter for rotation
 *   - drawtext overlay reloaded from a text file every frame
 *   - raw H.264 on stdout, pumped into the sink by a reader thread
 *   - 1 fps still image kept up to date next to the segments
 * 
 * Resolution and rotation changes take effect at the next segment.
 * 
 * ============================================================================
 */

use crate::error::{RecorderError, Result};
use crate::recording::sink::SegmentSink;
use crate::recording::types::Resolution;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READ_CHUNK: usize = 64 * 1024;
const STILL_COPY_ATTEMPTS: usize = 3;
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

pub trait Camera: Send {
    fn open(&mut self, resolution: Resolution, fps: u32) -> Result<()>;

    // Takes effect at the next begin_segment()
    fn set_resolution(&mut self, resolution: Resolution) -> Result<()>;

    /// Degrees clockwise, one of 0/90/180/270.
    ///
    /// Like resolution, applied from the next segment on; the segment in
    /// progress keeps its orientation.
    fn set_rotation(&mut self, degrees: u16) -> Result<()>;

    fn set_overlay_text(&mut self, text: &str) -> Result<()>;

    /// Write the latest frame to `path` as a JPEG.
    ///
    /// `path` is only ever replaced by a complete image; a frame the encoder
    /// is still writing is never copied.
    fn capture_still(&mut self, path: &Path) -> Result<()>;

    // Start streaming encoded frames into `sink` until stop_segment()
    fn begin_segment(&mut self, sink: Arc<SegmentSink>) -> Result<()>;

    /// Let the current segment record for up to `timeout`.
    ///
    /// Returns early with an error if the device stopped producing.
    fn wait_recording(&mut self, timeout: Duration) -> Result<()>;

    fn stop_segment(&mut self) -> Result<()>;

    fn close(&mut self);
}

// =============================================================================
// V4L2 Camera (FFmpeg driven)
// =============================================================================

#[derive(Debug, Clone)]
pub struct V4l2Settings {
    pub ffmpeg_path: PathBuf,
    pub device: String,
    pub quality: u8,
    pub text_size: u32,
    // Work files (overlay text, rolling still) live here
    pub work_dir: PathBuf,
}

struct ActiveSegment {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: JoinHandle<u64>,
}

pub struct V4l2Camera {
    settings: V4l2Settings,
    resolution: Resolution,
    fps: u32,
    rotation: u16,
    opened: bool,
    active: Option<ActiveSegment>,
}

impl V4l2Camera {
    pub fn new(settings: V4l2Settings) -> Self {
        Self {
            settings,
            resolution: Resolution::new(1920, 1080),
            fps: 30,
            rotation: 0,
            opened: false,
            active: None,
        }
    }

    fn overlay_path(&self) -> PathBuf {
        self.settings.work_dir.join(".overlay.txt")
    }

    fn rolling_still_path(&self) -> PathBuf {
        self.settings.work_dir.join(".still.jpg")
    }

    fn capture_args(&self) -> Vec<String> {
        let filter = filter_graph(
            self.rotation,
            &self.overlay_path(),
            self.settings.text_size,
        );

        let mut args: Vec<String> = vec![
            "-v".into(), "16".into(),
            "-f".into(), "v4l2".into(),
            "-framerate".into(), self.fps.to_string(),
            "-video_size".into(), self.resolution.to_string(),
            "-i".into(), self.settings.device.clone(),
            "-filter_complex".into(), filter,
            // Recording stream: raw H.264 on stdout
            "-map".into(), "[rec]".into(),
            "-c:v".into(), "libx264".into(),
            "-preset".into(), "ultrafast".into(),
            "-crf".into(), self.settings.quality.to_string(),
            "-f".into(), "h264".into(),
            "pipe:1".into(),
            // Rolling still image, rewritten once per second
            "-map".into(), "[still]".into(),
            "-update".into(), "1".into(),
            "-y".into(),
        ];
        args.push(self.rolling_still_path().to_string_lossy().into_owned());
        args
    }
}

// Transpose chain for a clockwise rotation
fn rotation_filter(degrees: u16) -> Option<&'static str> {
    match degrees % 360 {
        90 => Some("transpose=1"),
        180 => Some("transpose=1,transpose=1"),
        270 => Some("transpose=2"),
        _ => None,
    }
}

// Build the filter graph: rotate, overlay text, split into recording + still
fn filter_graph(rotation: u16, overlay_path: &Path, text_size: u32) -> String {
    let mut chain = String::from("[0:v]");
    if let Some(rotate) = rotation_filter(rotation) {
        chain.push_str(rotate);
        chain.push(',');
    }
    chain.push_str(&format!(
        "drawtext=textfile='{}':reload=1:fontsize={}:fontcolor=white:box=1:boxcolor=black@0.5:x=10:y=10",
        overlay_path.to_string_lossy(),
        text_size
    ));
    chain.push_str(",split=2[rec][snap];[snap]fps=1[still]");
    chain
}

// Pump encoder stdout into the sink until EOF or the sink closes
fn pump_stdout(mut stdout: impl Read, sink: Arc<SegmentSink>) -> u64 {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if sink.append(&buf[..n]).is_err() {
                    log::warn!("Camera reader: sink closed, dropping remaining output");
                    break;
                }
                total += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("Camera reader: failed to read encoder output: {}", e);
                break;
            }
        }
    }
    total
}

fn is_complete_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes.starts_with(&JPEG_SOI) && bytes.ends_with(&JPEG_EOI)
}

// Copy `src` to `dst` only if it holds a whole JPEG; `dst` is replaced by rename
fn copy_complete_jpeg(src: &Path, dst: &Path) -> std::io::Result<bool> {
    let bytes = fs::read(src)?;
    if !is_complete_jpeg(&bytes) {
        return Ok(false);
    }

    let temp_path = dst.with_extension("jpg.tmp");
    fs::write(&temp_path, &bytes)?;
    fs::rename(&temp_path, dst)?;
    Ok(true)
}

impl Camera for V4l2Camera {
    fn open(&mut self, resolution: Resolution, fps: u32) -> Result<()> {
        if !Path::new(&self.settings.device).exists() {
            return Err(RecorderError::Camera(format!(
                "Capture device {} not found",
                self.settings.device
            )));
        }
        fs::create_dir_all(&self.settings.work_dir)?;

        self.resolution = resolution;
        self.fps = fps;
        self.opened = true;
        self.set_overlay_text("")?;

        log::info!(
            "Camera opened: {} at {} @ {} fps",
            self.settings.device,
            resolution,
            fps
        );
        Ok(())
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<()> {
        self.resolution = resolution;
        Ok(())
    }

    fn set_rotation(&mut self, degrees: u16) -> Result<()> {
        self.rotation = degrees % 360;
        Ok(())
    }

    fn set_overlay_text(&mut self, text: &str) -> Result<()> {
        // drawtext re-reads the file each frame; rename keeps reads whole
        let path = self.overlay_path();
        let temp_path = path.with_extension("txt.tmp");
        fs::write(&temp_path, text)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn capture_still(&mut self, path: &Path) -> Result<()> {
        if self.active.is_some() {
            // FFmpeg rewrites the rolling still in place every second
            let rolling = self.rolling_still_path();
            for _ in 0..STILL_COPY_ATTEMPTS {
                if matches!(copy_complete_jpeg(&rolling, path), Ok(true)) {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(50));
            }
            log::warn!("No complete rolling still at {:?}, grabbing a frame", rolling);
        }

        // No live stream (or no frame yet): grab a single frame
        let status = Command::new(&self.settings.ffmpeg_path)
            .args(["-v", "16", "-f", "v4l2", "-video_size"])
            .arg(self.resolution.to_string())
            .arg("-i")
            .arg(&self.settings.device)
            .args(["-frames:v", "1", "-y"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| RecorderError::Camera(format!("Failed to run still capture: {}", e)))?;

        if !status.success() {
            return Err(RecorderError::Camera(format!(
                "Still capture exited with error: {:?}",
                status.code()
            )));
        }
        Ok(())
    }

    fn begin_segment(&mut self, sink: Arc<SegmentSink>) -> Result<()> {
        if !self.opened {
            return Err(RecorderError::Camera("Camera not opened".to_string()));
        }
        if self.active.is_some() {
            return Err(RecorderError::Camera("Segment already active".to_string()));
        }

        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(self.capture_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                RecorderError::Camera(format!(
                    "Failed to spawn FFmpeg at {:?}: {}",
                    self.settings.ffmpeg_path, e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecorderError::Camera("Failed to get FFmpeg stdout".to_string()))?;
        let stdin = child.stdin.take();

        let reader = thread::Builder::new()
            .name("camera-reader".to_string())
            .spawn(move || pump_stdout(stdout, sink))?;

        self.active = Some(ActiveSegment {
            child,
            stdin,
            reader,
        });
        Ok(())
    }

    fn wait_recording(&mut self, timeout: Duration) -> Result<()> {
        thread::sleep(timeout);
        if let Some(active) = self.active.as_mut() {
            if let Some(status) = active.child.try_wait()? {
                return Err(RecorderError::Camera(format!(
                    "Capture process exited unexpectedly: {:?}",
                    status.code()
                )));
            }
        }
        Ok(())
    }

    fn stop_segment(&mut self) -> Result<()> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };

        // "q" asks FFmpeg to finish the stream cleanly
        if let Some(mut stdin) = active.stdin.take() {
            let _ = stdin.write_all(b"q");
        }
        let status = active.child.wait()?;
        let bytes = active
            .reader
            .join()
            .map_err(|_| RecorderError::ThreadPanicked("camera-reader"))?;

        log::debug!(
            "Camera segment stopped: {} bytes, exit {:?}",
            bytes,
            status.code()
        );
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.stop_segment() {
            log::warn!("Camera close: failed to stop segment: {}", e);
        }
        if self.opened {
            log::info!("Camera closed: {}", self.settings.device);
        }
        self.opened = false;
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path) -> V4l2Settings {
        V4l2Settings {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            device: dir.join("video0").to_string_lossy().into_owned(),
            quality: 23,
            text_size: 20,
            work_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_rotation_filters() {
        assert_eq!(rotation_filter(0), None);
        assert_eq!(rotation_filter(90), Some("transpose=1"));
        assert_eq!(rotation_filter(180), Some("transpose=1,transpose=1"));
        assert_eq!(rotation_filter(270), Some("transpose=2"));
    }

    #[test]
    fn test_filter_graph_shape() {
        let graph = filter_graph(90, Path::new("/tmp/rec/.overlay.txt"), 20);
        assert!(graph.starts_with("[0:v]transpose=1,drawtext=textfile='/tmp/rec/.overlay.txt'"));
        assert!(graph.contains("reload=1:fontsize=20"));
        assert!(graph.ends_with("split=2[rec][snap];[snap]fps=1[still]"));

        let unrotated = filter_graph(0, Path::new("o.txt"), 12);
        assert!(unrotated.starts_with("[0:v]drawtext="));
    }

    #[test]
    fn test_capture_args_use_current_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut camera = V4l2Camera::new(settings(dir.path()));
        camera.set_resolution(Resolution::new(1280, 720)).unwrap();
        camera.set_rotation(450).unwrap();

        let args = camera.capture_args();
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-video_size") + 1], "1280x720");
        assert_eq!(args[pos("-crf") + 1], "23");
        assert!(args[pos("-filter_complex") + 1].contains("transpose=1"));
        assert!(args.contains(&"pipe:1".to_string()));
    }

    #[test]
    fn test_open_missing_device_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut camera = V4l2Camera::new(settings(dir.path()));
        let err = camera.open(Resolution::new(1920, 1080), 30).unwrap_err();
        assert!(matches!(err, RecorderError::Camera(_)));
    }

    #[test]
    fn test_overlay_text_written_whole() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("video0"), b"").unwrap();
        let mut camera = V4l2Camera::new(settings(dir.path()));
        camera.open(Resolution::new(1920, 1080), 30).unwrap();

        camera.set_overlay_text("12 - 2025-01-15 08:00:00").unwrap();
        let text = fs::read_to_string(dir.path().join(".overlay.txt")).unwrap();
        assert_eq!(text, "12 - 2025-01-15 08:00:00");
        assert!(!dir.path().join(".overlay.txt.tmp").exists());
    }

    #[test]
    fn test_still_copied_only_when_complete() {
        let dir = tempfile::TempDir::new().unwrap();
        let rolling = dir.path().join(".still.jpg");
        let snap = dir.path().join("live_snap.jpg");

        fs::write(&rolling, [0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]).unwrap();
        assert!(copy_complete_jpeg(&rolling, &snap).unwrap());
        assert_eq!(fs::read(&snap).unwrap(), vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);

        // Encoder caught mid-write: previous snapshot stays in place
        fs::write(&rolling, [0xFF, 0xD8, 0x07, 0x08]).unwrap();
        assert!(!copy_complete_jpeg(&rolling, &snap).unwrap());
        assert_eq!(fs::read(&snap).unwrap(), vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        assert!(!dir.path().join("live_snap.jpg.tmp").exists());

        fs::write(&rolling, b"").unwrap();
        assert!(!copy_complete_jpeg(&rolling, &snap).unwrap());
        assert!(copy_complete_jpeg(&dir.path().join("missing.jpg"), &snap).is_err());
    }
}
