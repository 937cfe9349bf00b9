use std::{
    path::Path,
    process::{Command, Stdio},
};

use tracing::debug;

use crate::{error::PipelineError, settings::GeneratorSettings};

/// Everything a generation call needs for one frame.
#[derive(Debug)]
pub struct GenerationRequest<'a> {
    pub frame_index: usize,
    pub image:       &'a Path,
    pub text_prompt: &'a str,
    pub output:      &'a Path,
    pub device:      usize,
}

/// External generative video model: image + text prompt -> video file.
pub trait VideoGenerator: Sync {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<(), PipelineError>;
}

/// Spawns the configured model-runner executable once per frame.
///
/// Device isolation goes through `CUDA_VISIBLE_DEVICES`, so every runner
/// process sees exactly one accelerator as device 0; the worker that issued
/// the request owns that device for the lifetime of the child.
#[derive(Debug)]
pub struct CommandGenerator {
    settings: GeneratorSettings,
}

impl CommandGenerator {
    #[must_use]
    #[inline]
    pub const fn new(settings: GeneratorSettings) -> Self {
        Self { settings }
    }

    fn command(&self, request: &GenerationRequest<'_>) -> Command {
        let settings = &self.settings;
        let mut command = Command::new(&settings.program);
        command
            .env("CUDA_VISIBLE_DEVICES", request.device.to_string())
            .arg("--image")
            .arg(request.image)
            .arg("--prompt")
            .arg(request.text_prompt)
            .arg("--output")
            .arg(request.output)
            .arg("--num-frames")
            .arg(settings.num_frames.to_string())
            .arg("--fps")
            .arg(settings.fps.to_string())
            .arg("--steps")
            .arg(settings.inference_steps.to_string())
            .arg("--guidance-scale")
            .arg(settings.guidance_scale.to_string());
        if let Some(seed) = settings.seed {
            command.arg("--seed").arg(seed.to_string());
        }
        if let Some(negative_prompt) = &settings.negative_prompt {
            command.arg("--negative-prompt").arg(negative_prompt);
        }
        command.args(&settings.extra_args);

        command
    }
}

impl VideoGenerator for CommandGenerator {
    #[inline]
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<(), PipelineError> {
        let mut command = self.command(request);
        debug!(
            "frame {index}: running {program} on device {device}",
            index = request.frame_index,
            program = self.settings.program.display(),
            device = request.device
        );

        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| PipelineError::Generation {
                index:   request.frame_index,
                message: format!(
                    "failed to spawn {program}: {e}",
                    program = self.settings.program.display()
                ),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(PipelineError::Generation {
                index:   request.frame_index,
                message: format!(
                    "runner exited with {status}: {tail}",
                    status = output.status,
                    tail = tail.join(" | ")
                ),
            });
        }

        if !request.output.is_file() {
            return Err(PipelineError::Generation {
                index:   request.frame_index,
                message: "runner exited successfully but produced no output file".into(),
            });
        }

        Ok(())
    }
}
