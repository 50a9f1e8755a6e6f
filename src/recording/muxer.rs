/**
 * ============================================================================
 * MUXER MODULE
 * ============================================================================
 * 
 * PURPOSE: Downstream byte sink that turns a raw H.264 elementary stream
 * into an MP4 container
 * 
 * FUNCTIONALITY:
 * - Muxer trait: writable byte stream + close-input + wait-for-exit
 * - MuxerFactory trait: one muxer per segment
 * - FfmpegMuxer: stream copy through ffmpeg, no re-encoding
 * 
 * ============================================================================
 */

use crate::error::{RecorderError, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Byte sink for one segment.
///
/// `close_input` must be called before `wait_for_exit`, otherwise a process
/// reading from the input would never see end of stream.
pub trait Muxer: Write + Send {
    fn close_input(&mut self);

    // Wait for the muxer to finish; Ok(true) on a clean exit
    fn wait_for_exit(&mut self) -> io::Result<bool>;
}

pub trait MuxerFactory: Send {
    fn spawn(&self, output_path: &Path, fps: u32) -> Result<Box<dyn Muxer>>;
}

// =============================================================================
// FFmpeg Muxer
// =============================================================================

pub struct FfmpegMuxer {
    child: Child,
    stdin: Option<ChildStdin>,
    output_path: PathBuf,
}

impl FfmpegMuxer {
    // Spawn ffmpeg reading raw h264 from stdin and stream-copying to MP4
    pub fn spawn(ffmpeg_path: &Path, output_path: &Path, fps: u32) -> Result<Self> {
        log::info!("Spawning muxer: {} fps -> {:?}", fps, output_path);

        let mut child = Command::new(ffmpeg_path)
            .args([
                "-v", "16",                     // Errors only
                "-framerate", &fps.to_string(), // Input framerate
                "-f", "h264",                   // Raw elementary stream
                "-i", "pipe:0",                 // Read from stdin
                "-codec", "copy",               // No re-encoding
                "-movflags", "faststart",       // Index at the front
                "-y",                           // Overwrite output
                "-f", "mp4",
            ])
            .arg(output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                RecorderError::Muxer(format!("Failed to spawn FFmpeg at {:?}: {}", ffmpeg_path, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::Muxer("Failed to get FFmpeg stdin".to_string()))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            output_path: output_path.to_path_buf(),
        })
    }
}

impl Write for FfmpegMuxer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "muxer input closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl Muxer for FfmpegMuxer {
    fn close_input(&mut self) {
        // Dropping stdin signals EOF to FFmpeg
        self.stdin.take();
    }

    fn wait_for_exit(&mut self) -> io::Result<bool> {
        let status = self.child.wait()?;
        if !status.success() {
            log::warn!(
                "Muxer for {:?} exited with error: {:?}",
                self.output_path,
                status.code()
            );
        }
        Ok(status.success())
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        // Reap the child if the owner never waited (no zombie processes)
        self.stdin.take();
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

pub struct FfmpegMuxerFactory {
    ffmpeg_path: PathBuf,
}

impl FfmpegMuxerFactory {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl MuxerFactory for FfmpegMuxerFactory {
    fn spawn(&self, output_path: &Path, fps: u32) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(FfmpegMuxer::spawn(&self.ffmpeg_path, output_path, fps)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_missing_binary_is_muxer_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let factory = FfmpegMuxerFactory::new(dir.path().join("no-such-ffmpeg"));
        let result = factory.spawn(&dir.path().join("0_x.mp4"), 30);
        assert!(matches!(result, Err(RecorderError::Muxer(_))));
    }
}
