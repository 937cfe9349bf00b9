use std::path::Path;

use anyhow::{bail, ensure, Result};
use i2v_core::{
    context::PipelineContext,
    decode::FfmpegFrameDecoder,
    error::PipelineError,
    frame_index::FrameIndex,
    generate::CommandGenerator,
    settings::{
        DatasetSettings, DispatchSettings, GeneratorSettings, IoSettings, PromptSettings,
    },
    sources::{Dl3dvSource, RealEstateSource, VideoSource},
    util::to_absolute_path,
    DatasetScope,
};
use tracing::info;

use crate::cli::{DatasetArg, GenerateOptions};

fn io_settings(root: &Path) -> Result<IoSettings> {
    Ok(IoSettings::from_root(to_absolute_path(root)?))
}

/// Fails with the first missing tool the configured stages require.
fn ensure_dependencies(ctx: &PipelineContext, generator: Option<&Path>) -> Result<()> {
    if let Some(missing) = ctx
        .dependency_checks(generator)
        .into_iter()
        .find(|check| !check.available)
    {
        bail!(PipelineError::MissingDependency {
            tool: missing.tool,
            hint: missing.hint,
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn setup_handler(
    root: &Path,
    datasets: DatasetArg,
    dl3dv_videos: Option<usize>,
    realestate_videos: usize,
    max_videos_per_dataset: Option<usize>,
    download_workers: usize,
    skip_download: bool,
    skip_prompts: bool,
    clear_existing: bool,
    seed: u64,
) -> Result<()> {
    let ctx = PipelineContext::new(
        io_settings(root)?,
        DatasetSettings {
            scope: DatasetScope::from(datasets),
            dl3dv_videos,
            realestate_videos,
            max_videos_per_dataset,
            skip_download,
            skip_prompts,
            clear_existing,
            download_workers,
        },
        PromptSettings {
            seed,
            regenerate: false,
        },
        DispatchSettings::default(),
    )?;
    ensure_dependencies(&ctx, None)?;

    let dl3dv = Dl3dvSource::new(ctx.io.dl3dv_dir.clone(), ctx.datasets.dl3dv_videos);
    let realestate = RealEstateSource::new(
        ctx.io.metadata_dir.clone(),
        ctx.io.realestate_dir.clone(),
        ctx.datasets.realestate_videos,
        ctx.datasets.download_workers,
    );
    let decoder = FfmpegFrameDecoder::default();

    let summary = ctx.setup(&[&dl3dv as &dyn VideoSource, &realestate], &decoder)?;
    info!(
        "setup complete: {registered} frames registered, {skipped} already present, {failed} \
         videos failed",
        registered = summary.registration.registered,
        skipped = summary.registration.skipped,
        failed = summary.registration.failed
    );

    Ok(())
}

pub fn prompts_handler(root: &Path, seed: u64, regenerate: bool) -> Result<()> {
    let ctx = PipelineContext::new(
        io_settings(root)?,
        DatasetSettings::default(),
        PromptSettings { seed, regenerate },
        DispatchSettings::default(),
    )?;

    let frames = FrameIndex::new(&ctx.io.frames_dir)?;
    let summary = ctx.generate_prompts(&frames)?;
    info!(
        "prompt records written to {path} ({generated} new, {skipped} kept)",
        path = ctx.io.prompts_file.display(),
        generated = summary.generated,
        skipped = summary.skipped
    );

    Ok(())
}

pub fn generate_handler(root: &Path, options: &GenerateOptions) -> Result<()> {
    let devices = options
        .devices
        .clone()
        .unwrap_or_else(|| (0..options.workers).collect());
    if devices.is_empty() {
        bail!(PipelineError::InvalidConfiguration(
            "at least one worker/device is required".into()
        ));
    }

    let extra_args = match &options.generator_args {
        Some(args) => shlex::split(args).ok_or_else(|| {
            PipelineError::InvalidConfiguration(format!(
                "could not parse --generator-args: {args}"
            ))
        })?,
        None => Vec::new(),
    };

    let ctx = PipelineContext::new(
        io_settings(root)?,
        DatasetSettings {
            // Generation never downloads; only ffmpeg-independent tools
            // matter here
            skip_download: true,
            ..DatasetSettings::default()
        },
        PromptSettings::default(),
        DispatchSettings {
            devices,
            start: options.start,
            end: options.end,
            max_frames: options.max_frames,
        },
    )?;
    ensure_dependencies(&ctx, Some(&options.generator))?;

    let generator = CommandGenerator::new(GeneratorSettings {
        program:         options.generator.clone(),
        extra_args,
        num_frames:      options.num_frames,
        fps:             options.fps,
        inference_steps: options.steps,
        guidance_scale:  options.guidance_scale,
        seed:            options.seed,
        negative_prompt: options.negative_prompt.clone(),
    });

    let summary = ctx.run_generation(&generator)?;
    info!(
        "generation finished: {success} succeeded, {failure} failed, {skipped} skipped (results \
         in {path})",
        success = summary.success,
        failure = summary.failure,
        skipped = summary.skipped,
        path = ctx.io.results_file.display()
    );

    // Individual frame failures are reported above, not fatal
    Ok(())
}

pub fn check_handler(
    root: &Path,
    generator: Option<&Path>,
    skip_download: bool,
    datasets: DatasetArg,
) -> Result<()> {
    let ctx = PipelineContext::new(
        io_settings(root)?,
        DatasetSettings {
            scope: DatasetScope::from(datasets),
            skip_download,
            ..DatasetSettings::default()
        },
        PromptSettings::default(),
        DispatchSettings::default(),
    )?;

    ctx.check(generator)
}

pub fn clean_handler(root: &Path, yes: bool) -> Result<()> {
    ensure!(
        yes,
        "refusing to clear the dataset; rerun with --yes to confirm"
    );

    let ctx = PipelineContext::new(
        io_settings(root)?,
        DatasetSettings::default(),
        PromptSettings::default(),
        DispatchSettings::default(),
    )?;
    ctx.clear_existing_state()
}
