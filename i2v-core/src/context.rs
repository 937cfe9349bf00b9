use std::{collections::HashSet, fs, path::Path};

use anyhow::{bail, ensure, Result};
use tracing::{debug, info, warn};

use crate::{
    create_dir,
    decode::FrameDecoder,
    dispatch::{BatchDispatcher, DispatchSummary, ResultsFile},
    error::PipelineError,
    frame_index::{FrameIndex, RegistrationLedger},
    generate::VideoGenerator,
    motion::{MotionAssigner, PromptStore},
    partition::{partition, WorkSlice},
    progress_bar::{finish_progress_bar, inc_bar, init_progress_bar},
    settings::{DatasetSettings, DispatchSettings, IoSettings, PromptSettings},
    sources::VideoSource,
    Dataset,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSummary {
    pub registered: usize,
    pub skipped:    usize,
    pub failed:     usize,
}

impl RegisterSummary {
    fn merge(&mut self, other: RegisterSummary) {
        self.registered += other.registered;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptSummary {
    pub generated: usize,
    pub skipped:   usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupSummary {
    pub registration: RegisterSummary,
    pub prompts:      Option<PromptSummary>,
}

#[derive(Debug, Clone)]
pub struct DependencyCheck {
    pub tool:      String,
    pub hint:      String,
    pub available: bool,
}

/// Sequences the pipeline: download -> frame registration -> motion
/// prompts -> partition + dispatch. Every stage skips work whose output
/// already satisfies its invariant, so rerunning after a hard termination
/// converges without in-flight checkpointing.
#[derive(Debug)]
pub struct PipelineContext {
    pub io:       IoSettings,
    pub datasets: DatasetSettings,
    pub prompts:  PromptSettings,
    pub dispatch: DispatchSettings,
}

impl PipelineContext {
    #[inline]
    pub fn new(
        io: IoSettings,
        datasets: DatasetSettings,
        prompts: PromptSettings,
        dispatch: DispatchSettings,
    ) -> Result<Self> {
        let this = Self {
            io,
            datasets,
            prompts,
            dispatch,
        };
        this.validate()?;
        this.initialize()?;
        Ok(this)
    }

    fn validate(&self) -> Result<()> {
        self.validate_dataset_settings()?;
        self.validate_dispatch_settings()?;
        Ok(())
    }

    fn validate_dataset_settings(&self) -> Result<()> {
        if self.datasets.download_workers == 0 {
            bail!(PipelineError::InvalidConfiguration(
                "download worker count must be at least 1".into()
            ));
        }
        Ok(())
    }

    fn validate_dispatch_settings(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for &device in &self.dispatch.devices {
            if !seen.insert(device) {
                bail!(PipelineError::InvalidConfiguration(format!(
                    "device {device} appears more than once"
                )));
            }
        }

        if let (Some(start), Some(end)) = (self.dispatch.start, self.dispatch.end) {
            ensure!(
                start <= end,
                PipelineError::InvalidConfiguration(format!(
                    "start index {start} is past end index {end}"
                ))
            );
        }

        Ok(())
    }

    fn initialize(&self) -> Result<()> {
        create_dir!(&self.io.root)?;
        create_dir!(&self.io.frames_dir)?;
        create_dir!(&self.io.output_dir)?;
        debug!("dataset root: {root}", root = self.io.root.display());
        Ok(())
    }

    /// External tools the configured stages require, with availability.
    #[must_use]
    #[inline]
    pub fn dependency_checks(&self, generator_program: Option<&Path>) -> Vec<DependencyCheck> {
        let mut checks = vec![DependencyCheck {
            tool:      "ffmpeg".into(),
            hint:      "Install FFmpeg and make sure it is in PATH.".into(),
            available: which::which("ffmpeg").is_ok(),
        }];

        if !self.datasets.skip_download {
            if self.datasets.scope.includes(Dataset::Dl3dv) {
                checks.push(DependencyCheck {
                    tool:      "huggingface-cli".into(),
                    hint:      "Install with `pip install -U \"huggingface_hub[cli]\"`.".into(),
                    available: which::which("huggingface-cli").is_ok(),
                });
            }
            if self.datasets.scope.includes(Dataset::RealEstate) {
                checks.push(DependencyCheck {
                    tool:      "yt-dlp".into(),
                    hint:      "Install with `pip install -U yt-dlp`.".into(),
                    available: which::which("yt-dlp").is_ok(),
                });
            }
        }

        if let Some(program) = generator_program {
            checks.push(DependencyCheck {
                tool:      program.display().to_string(),
                hint:      "Point --generator at the model-runner executable.".into(),
                available: program.is_file() || which::which(program).is_ok(),
            });
        }

        checks
    }

    /// Check-only mode: report every required tool (found and missing, with
    /// remediation hints) and the current dataset state, then fail once if
    /// anything is missing. One missing tool never hides the others.
    #[inline]
    pub fn check(&self, generator_program: Option<&Path>) -> Result<()> {
        let checks = self.dependency_checks(generator_program);
        let mut missing = 0;
        for check in &checks {
            if check.available {
                info!("found {tool}", tool = check.tool);
            } else {
                warn!("missing {tool}. {hint}", tool = check.tool, hint = check.hint);
                missing += 1;
            }
        }

        let frames = FrameIndex::new(&self.io.frames_dir)?;
        let prompts = PromptStore::load(&self.io.prompts_file)?;
        let results = ResultsFile::load(&self.io.results_file)?;
        info!(
            "dataset state: {frames} frames, {prompts} prompt records, {results} generation \
             results",
            frames = frames.count()?,
            prompts = prompts.len(),
            results = results.len()
        );

        ensure!(missing == 0, "{missing} required external tools are missing");
        Ok(())
    }

    /// Destructive reset of frames, registration ledger, prompt records and
    /// generation results.
    #[inline]
    pub fn clear_existing_state(&self) -> Result<()> {
        let mut frames = FrameIndex::new(&self.io.frames_dir)?;
        frames.clear_all(true)?;
        let mut ledger = RegistrationLedger::load(&self.io.ledger_file)?;
        ledger.clear()?;
        for file in [&self.io.prompts_file, &self.io.results_file] {
            if file.is_file() {
                fs::remove_file(file)?;
            }
        }
        info!("cleared existing frames, prompts and results");
        Ok(())
    }

    /// Downloads (unless skipped), registers first frames and assigns
    /// motion prompts, honoring the dataset scope. Sources register in the
    /// fixed dataset order no matter how the caller arranged them.
    #[inline]
    pub fn setup(
        &self,
        sources: &[&dyn VideoSource],
        decoder: &dyn FrameDecoder,
    ) -> Result<SetupSummary> {
        if self.datasets.clear_existing {
            self.clear_existing_state()?;
        }

        let mut frames = FrameIndex::new(&self.io.frames_dir)?;
        let mut ledger = RegistrationLedger::load(&self.io.ledger_file)?;

        let mut summary = SetupSummary::default();
        for dataset in Dataset::in_registration_order() {
            if !self.datasets.scope.includes(dataset) {
                continue;
            }
            let Some(source) = sources.iter().find(|source| source.dataset() == dataset)
            else {
                continue;
            };

            if self.datasets.skip_download {
                info!("{dataset}: skipping download");
            } else {
                match source.download() {
                    Ok(downloads) => info!(
                        "{dataset}: {downloaded} downloaded, {skipped} already present, \
                         {failed} unavailable",
                        downloaded = downloads.downloaded,
                        skipped = downloads.skipped,
                        failed = downloads.failed.len()
                    ),
                    Err(e) => {
                        // A missing tool is fatal; a failed fetch still
                        // leaves whatever is on disk to register
                        if e.downcast_ref::<PipelineError>().is_some_and(|e| {
                            matches!(e, PipelineError::MissingDependency { .. })
                        }) {
                            return Err(e);
                        }
                        warn!("{dataset}: download failed, continuing with existing videos: {e:#}");
                    },
                }
            }

            summary
                .registration
                .merge(self.register_dataset(*source, decoder, &mut frames, &mut ledger)?);
        }

        if self.datasets.skip_prompts {
            info!("skipping prompt generation");
        } else {
            summary.prompts = Some(self.generate_prompts(&frames)?);
        }

        Ok(summary)
    }

    /// Registers the first frame of every enumerated video that is not in
    /// the ledger yet. Per-video decode failures are recorded and skipped;
    /// a failed video consumes no index.
    #[inline]
    pub fn register_dataset(
        &self,
        source: &dyn VideoSource,
        decoder: &dyn FrameDecoder,
        frames: &mut FrameIndex,
        ledger: &mut RegistrationLedger,
    ) -> Result<RegisterSummary> {
        let dataset = source.dataset();
        let mut videos = source.videos()?;
        if let Some(max) = self.datasets.max_videos_per_dataset {
            videos.truncate(max);
        }

        info!(
            "{dataset}: registering first frames of {count} videos",
            count = videos.len()
        );
        init_progress_bar(videos.len() as u64);

        let mut summary = RegisterSummary::default();
        for video in &videos {
            if ledger.contains(dataset, &video.video_id) {
                summary.skipped += 1;
                inc_bar(1);
                continue;
            }

            match decoder.first_frame(&video.path) {
                Ok(image) => {
                    frames.register_frame(dataset, &video.video_id, &image)?;
                    ledger.insert(dataset, &video.video_id);
                    // Flush per video so a crash loses at most one entry
                    ledger.save()?;
                    summary.registered += 1;
                },
                Err(e) => {
                    warn!("{video_id}: {e}", video_id = video.video_id);
                    summary.failed += 1;
                },
            }
            inc_bar(1);
        }
        finish_progress_bar();

        info!(
            "{dataset}: {registered} registered, {skipped} already present, {failed} failed",
            registered = summary.registered,
            skipped = summary.skipped,
            failed = summary.failed
        );

        Ok(summary)
    }

    /// Assigns motion records to every frame lacking one (or to all frames
    /// with `regenerate`), then persists the store once.
    #[inline]
    pub fn generate_prompts(&self, frames: &FrameIndex) -> Result<PromptSummary> {
        let indices = frames.indices()?;
        let mut store = PromptStore::load(&self.io.prompts_file)?;
        let pending = if self.prompts.regenerate {
            indices.clone()
        } else {
            store.missing_for(&indices)
        };

        let assigner = MotionAssigner::new(frames, self.prompts.seed);
        for &index in &pending {
            store.insert(index, assigner.assign(index)?);
        }
        store.save()?;

        let summary = PromptSummary {
            generated: pending.len(),
            skipped:   indices.len() - pending.len(),
        };
        info!(
            "prompts: {generated} assigned, {skipped} already present",
            generated = summary.generated,
            skipped = summary.skipped
        );

        Ok(summary)
    }

    /// Partitions the selected index range across the configured devices
    /// and dispatches the batch.
    #[inline]
    pub fn run_generation(&self, generator: &dyn VideoGenerator) -> Result<DispatchSummary> {
        let devices = &self.dispatch.devices;
        if devices.is_empty() {
            bail!(PipelineError::InvalidConfiguration(
                "at least one worker/device is required".into()
            ));
        }

        let frames = FrameIndex::new(&self.io.frames_dir)?;
        let total = frames.next_available_index()?;
        let start = self.dispatch.start.unwrap_or(0);
        let mut end = self.dispatch.end.unwrap_or(total).min(total);
        if let Some(max_frames) = self.dispatch.max_frames {
            end = end.min(start.saturating_add(max_frames));
        }
        ensure!(
            start <= end,
            PipelineError::InvalidConfiguration(format!(
                "start index {start} is past the end of the selected range ({end})"
            ))
        );

        let prompts = PromptStore::load(&self.io.prompts_file)?;
        let results = ResultsFile::load(&self.io.results_file)?;

        let slices: Vec<WorkSlice> = partition(end - start, devices.len())?
            .into_iter()
            .map(|slice| {
                let positional = slice.device;
                let mut slice = slice.offset(start);
                slice.device = devices[positional];
                slice
            })
            .collect();

        let dispatcher =
            BatchDispatcher::new(&frames, &prompts, &results, generator, &self.io.output_dir);
        dispatcher.dispatch(&slices)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        dispatch::GenerationStatus,
        generate::GenerationRequest,
        sources::{DownloadSummary, SourceVideo},
        DatasetScope,
    };

    struct StubSource {
        dataset: Dataset,
        videos:  Vec<SourceVideo>,
    }

    impl StubSource {
        fn new(dir: &Path, dataset: Dataset, ids: &[&str]) -> Self {
            let videos = ids
                .iter()
                .map(|id| {
                    let path = dir.join(format!("{id}.mp4"));
                    fs::write(&path, b"video").unwrap();
                    SourceVideo {
                        video_id: (*id).to_owned(),
                        path,
                    }
                })
                .collect();
            Self { dataset, videos }
        }
    }

    impl VideoSource for StubSource {
        fn dataset(&self) -> Dataset {
            self.dataset
        }

        fn download(&self) -> Result<DownloadSummary> {
            Ok(DownloadSummary::default())
        }

        fn videos(&self) -> Result<Vec<SourceVideo>> {
            Ok(self.videos.clone())
        }
    }

    /// Decoder that fails for videos whose id contains "corrupt".
    struct StubDecoder;

    impl FrameDecoder for StubDecoder {
        fn first_frame(&self, video: &Path) -> Result<Vec<u8>, PipelineError> {
            if video.to_string_lossy().contains("corrupt") {
                return Err(PipelineError::FrameDecode {
                    path: video.to_path_buf(),
                });
            }
            Ok(b"jpeg".to_vec())
        }
    }

    struct StubGenerator {
        served: Mutex<Vec<(usize, usize)>>,
    }

    impl StubGenerator {
        fn new() -> Self {
            Self {
                served: Mutex::new(Vec::new()),
            }
        }
    }

    impl VideoGenerator for StubGenerator {
        fn generate(&self, request: &GenerationRequest<'_>) -> Result<(), PipelineError> {
            self.served
                .lock()
                .unwrap()
                .push((request.frame_index, request.device));
            fs::write(request.output, b"video").unwrap();
            Ok(())
        }
    }

    fn context(root: &Path, datasets: DatasetSettings, dispatch: DispatchSettings) -> PipelineContext {
        PipelineContext::new(
            IoSettings::from_root(root.to_path_buf()),
            DatasetSettings {
                skip_download: true,
                ..datasets
            },
            PromptSettings::default(),
            dispatch,
        )
        .unwrap()
    }

    #[test]
    fn setup_registers_datasets_in_contract_order() {
        let dir = tempfile::tempdir().unwrap();
        let dl3dv = StubSource::new(dir.path(), Dataset::Dl3dv, &["s1", "s2", "s3"]);
        let realestate = StubSource::new(dir.path(), Dataset::RealEstate, &["y1", "y2"]);
        let ctx = context(
            &dir.path().join("dataset"),
            DatasetSettings::default(),
            DispatchSettings::default(),
        );

        // Caller order must not matter: the real-estate source comes first
        let sources: &[&dyn VideoSource] = &[&realestate, &dl3dv];
        let summary = ctx.setup(sources, &StubDecoder).unwrap();

        assert_eq!(summary.registration.registered, 5);
        assert_eq!(summary.prompts.unwrap().generated, 5);

        let frames = FrameIndex::new(&ctx.io.frames_dir).unwrap();
        assert_eq!(frames.indices().unwrap(), vec![0, 1, 2, 3, 4]);
        let ledger = RegistrationLedger::load(&ctx.io.ledger_file).unwrap();
        // 3D-scene videos hold the low indices
        for id in ["s1", "s2", "s3"] {
            assert!(ledger.contains(Dataset::Dl3dv, id));
        }
    }

    #[test]
    fn rerunning_setup_skips_registered_videos() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(dir.path(), Dataset::Dl3dv, &["a", "b"]);
        let ctx = context(
            &dir.path().join("dataset"),
            DatasetSettings::default(),
            DispatchSettings::default(),
        );

        ctx.setup(&[&source as &dyn VideoSource], &StubDecoder).unwrap();
        let rerun = ctx.setup(&[&source as &dyn VideoSource], &StubDecoder).unwrap();

        assert_eq!(rerun.registration, RegisterSummary {
            registered: 0,
            skipped:    2,
            failed:     0,
        });
        assert_eq!(rerun.prompts.unwrap(), PromptSummary {
            generated: 0,
            skipped:   2,
        });
        let frames = FrameIndex::new(&ctx.io.frames_dir).unwrap();
        assert_eq!(frames.count().unwrap(), 2);
    }

    #[test]
    fn a_failed_video_consumes_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(dir.path(), Dataset::Dl3dv, &["ok1", "corrupt", "ok2"]);
        let ctx = context(
            &dir.path().join("dataset"),
            DatasetSettings::default(),
            DispatchSettings::default(),
        );

        let summary = ctx.setup(&[&source as &dyn VideoSource], &StubDecoder).unwrap();

        assert_eq!(summary.registration.registered, 2);
        assert_eq!(summary.registration.failed, 1);
        let frames = FrameIndex::new(&ctx.io.frames_dir).unwrap();
        // Gap-free despite the failure in the middle
        assert_eq!(frames.indices().unwrap(), vec![0, 1]);
    }

    #[test]
    fn scope_limits_registration_to_one_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let dl3dv = StubSource::new(dir.path(), Dataset::Dl3dv, &["s1"]);
        let realestate = StubSource::new(dir.path(), Dataset::RealEstate, &["y1"]);
        let ctx = context(
            &dir.path().join("dataset"),
            DatasetSettings {
                scope: DatasetScope::RealEstate,
                ..DatasetSettings::default()
            },
            DispatchSettings::default(),
        );

        let summary = ctx.setup(&[&dl3dv as &dyn VideoSource, &realestate], &StubDecoder).unwrap();

        assert_eq!(summary.registration.registered, 1);
        let ledger = RegistrationLedger::load(&ctx.io.ledger_file).unwrap();
        assert!(ledger.contains(Dataset::RealEstate, "y1"));
        assert!(!ledger.contains(Dataset::Dl3dv, "s1"));
    }

    #[test]
    fn clear_existing_resets_the_whole_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(dir.path(), Dataset::Dl3dv, &["a", "b"]);
        let ctx = context(
            &dir.path().join("dataset"),
            DatasetSettings::default(),
            DispatchSettings::default(),
        );
        ctx.setup(&[&source as &dyn VideoSource], &StubDecoder).unwrap();

        let clearing = context(
            &dir.path().join("dataset"),
            DatasetSettings {
                clear_existing: true,
                ..DatasetSettings::default()
            },
            DispatchSettings::default(),
        );
        let summary = clearing.setup(&[&source as &dyn VideoSource], &StubDecoder).unwrap();

        // Everything re-registered from index 0, nothing skipped
        assert_eq!(summary.registration, RegisterSummary {
            registered: 2,
            skipped:    0,
            failed:     0,
        });
        let frames = FrameIndex::new(&ctx.io.frames_dir).unwrap();
        assert_eq!(frames.indices().unwrap(), vec![0, 1]);
    }

    #[test]
    fn generation_maps_slices_onto_the_configured_devices() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(
            dir.path(),
            Dataset::Dl3dv,
            &["a", "b", "c", "d", "e", "f"],
        );
        let ctx = context(
            &dir.path().join("dataset"),
            DatasetSettings::default(),
            DispatchSettings {
                devices: vec![5, 7],
                ..DispatchSettings::default()
            },
        );
        ctx.setup(&[&source as &dyn VideoSource], &StubDecoder).unwrap();

        let generator = StubGenerator::new();
        let summary = ctx.run_generation(&generator).unwrap();

        assert_eq!(summary.success, 6);
        let results = ResultsFile::load(&ctx.io.results_file).unwrap();
        assert_eq!(results.indices(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(results.get(0).unwrap().status, GenerationStatus::Success);

        let served = generator.served.lock().unwrap();
        for &(frame, device) in served.iter() {
            let expected = if frame < 3 { 5 } else { 7 };
            assert_eq!(device, expected, "frame {frame} ran on device {device}");
        }
    }

    #[test]
    fn generation_honors_start_end_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(dir.path(), Dataset::Dl3dv, &["a", "b", "c", "d", "e"]);
        let ctx = context(
            &dir.path().join("dataset"),
            DatasetSettings::default(),
            DispatchSettings {
                devices: vec![0],
                start: Some(1),
                end: Some(4),
                ..DispatchSettings::default()
            },
        );
        ctx.setup(&[&source as &dyn VideoSource], &StubDecoder).unwrap();

        let generator = StubGenerator::new();
        let summary = ctx.run_generation(&generator).unwrap();

        assert_eq!(summary.success, 3);
        let results = ResultsFile::load(&ctx.io.results_file).unwrap();
        assert_eq!(results.indices(), vec![1, 2, 3]);
    }

    #[test]
    fn generation_without_devices_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            &dir.path().join("dataset"),
            DatasetSettings::default(),
            DispatchSettings::default(),
        );

        let generator = StubGenerator::new();
        let err = ctx.run_generation(&generator).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn duplicate_devices_are_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineContext::new(
            IoSettings::from_root(dir.path().join("dataset")),
            DatasetSettings::default(),
            PromptSettings::default(),
            DispatchSettings {
                devices: vec![1, 1],
                ..DispatchSettings::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfiguration(_))
        ));
    }
}
