use std::{
    io,
    path::Path,
    process::{Command, Stdio},
};

use tracing::debug;

use crate::error::PipelineError;

/// First frame of a video as encoded image bytes. Decoding itself is
/// delegated to an external media tool; implementations only wrap it.
pub trait FrameDecoder {
    fn first_frame(&self, video: &Path) -> Result<Vec<u8>, PipelineError>;
}

/// Extracts the first frame as a high-quality JPEG by piping through the
/// `ffmpeg` executable.
#[derive(Debug, Clone, Copy)]
pub struct FfmpegFrameDecoder {
    /// A flaky read gets this many attempts before the video is declared
    /// undecodable.
    pub attempts: usize,
}

impl Default for FfmpegFrameDecoder {
    #[inline]
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

impl FfmpegFrameDecoder {
    fn extract(video: &Path) -> io::Result<Vec<u8>> {
        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(video)
            .args([
                "-frames:v", "1", "-q:v", "2", "-f", "image2pipe", "-c:v", "mjpeg", "pipe:1",
            ])
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            // Treated as a failed attempt, not an I/O error
            return Ok(Vec::new());
        }

        Ok(output.stdout)
    }
}

impl FrameDecoder for FfmpegFrameDecoder {
    #[inline]
    fn first_frame(&self, video: &Path) -> Result<Vec<u8>, PipelineError> {
        for attempt in 1..=self.attempts.max(1) {
            match Self::extract(video) {
                Ok(bytes) if !bytes.is_empty() => return Ok(bytes),
                Ok(_) => {
                    debug!(
                        "attempt {attempt}/{attempts}: ffmpeg produced no frame for {video}",
                        attempts = self.attempts,
                        video = video.display()
                    );
                },
                Err(e) => {
                    debug!(
                        "attempt {attempt}/{attempts}: ffmpeg failed for {video}: {e}",
                        attempts = self.attempts,
                        video = video.display()
                    );
                },
            }
        }

        Err(PipelineError::FrameDecode {
            path: video.to_path_buf(),
        })
    }
}
