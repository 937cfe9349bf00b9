use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Sender;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, error, info, warn};

use crate::{
    error::PipelineError,
    frame_index::FrameIndex,
    generate::{GenerationRequest, VideoGenerator},
    motion::PromptStore,
    partition::WorkSlice,
    progress_bar::{finish_progress_bar, inc_bar, init_progress_bar},
    util::write_json_atomic,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GenerationStatus {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub status:        GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path:   Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Merged per-frame outcomes, keyed by frame index with last-write-wins
/// semantics. Read and written by every dispatch worker; flushed to disk
/// after each recorded frame so a killed run resumes from its last
/// completed frame. The on-disk form is sorted by key, making the file a
/// deterministic function of the recorded outcomes regardless of worker
/// finish order.
#[derive(Debug)]
pub struct ResultsFile {
    path:      PathBuf,
    results:   DashMap<usize, GenerationResult>,
    save_lock: Mutex<()>,
}

impl ResultsFile {
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let results = DashMap::new();
        if path.is_file() {
            let data = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {path}", path = path.display()))?;
            let persisted: BTreeMap<usize, GenerationResult> = serde_json::from_str(&data)
                .with_context(|| {
                    format!("Failed to parse results in {path}", path = path.display())
                })?;
            for (index, result) in persisted {
                results.insert(index, result);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            results,
            save_lock: Mutex::new(()),
        })
    }

    /// Records one outcome and flushes the whole store.
    #[inline]
    pub fn record(&self, index: usize, result: GenerationResult) -> Result<()> {
        self.results.insert(index, result);
        self.save()
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        // Snapshot under the lock so concurrent writers flush monotonically
        let _guard = self.save_lock.lock().expect("results save lock poisoned");
        let snapshot: BTreeMap<usize, GenerationResult> = self
            .results
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        write_json_atomic(&self.path, &snapshot)
    }

    #[must_use]
    #[inline]
    pub fn get(&self, index: usize) -> Option<GenerationResult> {
        self.results.get(&index).map(|entry| entry.value().clone())
    }

    #[must_use]
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.results.contains_key(&index)
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Sorted frame indices with a recorded outcome.
    #[must_use]
    #[inline]
    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.results.iter().map(|entry| *entry.key()).collect();
        indices.sort_unstable();
        indices
    }

    /// Drops every outcome and removes the persisted file.
    #[inline]
    pub fn clear(&mut self) -> Result<()> {
        self.results.clear();
        if self.path.is_file() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub success: usize,
    pub failure: usize,
    pub skipped: usize,
}

impl DispatchSummary {
    #[must_use]
    #[inline]
    pub const fn total(&self) -> usize {
        self.success + self.failure + self.skipped
    }
}

enum WorkerEvent {
    Frame { status: GenerationStatus },
    Finished { device: usize, processed: usize },
}

/// Runs one worker task per slice, each bound exclusively to its device.
///
/// Workers never touch the frame index or the prompt store mutably; the
/// results store is the only shared write target, which is what makes the
/// dispatch phase lock-free from the caller's point of view.
pub struct BatchDispatcher<'a> {
    frames:     &'a FrameIndex,
    prompts:    &'a PromptStore,
    results:    &'a ResultsFile,
    generator:  &'a dyn VideoGenerator,
    output_dir: &'a Path,
}

impl<'a> BatchDispatcher<'a> {
    #[must_use]
    #[inline]
    pub const fn new(
        frames: &'a FrameIndex,
        prompts: &'a PromptStore,
        results: &'a ResultsFile,
        generator: &'a dyn VideoGenerator,
        output_dir: &'a Path,
    ) -> Self {
        Self {
            frames,
            prompts,
            results,
            generator,
            output_dir,
        }
    }

    /// Dispatches every slice concurrently and waits for all workers to
    /// terminate. Per-frame failures are recorded, not raised; the returned
    /// summary tallies every dispatched frame exactly once.
    #[inline]
    pub fn dispatch(&self, slices: &[WorkSlice]) -> Result<DispatchSummary> {
        self.validate_slices(slices)?;

        let total: usize = slices.iter().map(WorkSlice::len).sum();
        if total == 0 {
            info!("no frames to dispatch");
            return Ok(DispatchSummary::default());
        }

        let active: Vec<&WorkSlice> = slices.iter().filter(|slice| !slice.is_empty()).collect();
        info!(
            "dispatching {total} frames across {workers} workers",
            workers = active.len()
        );
        init_progress_bar(total as u64);

        let summary = crossbeam_utils::thread::scope(|scope| {
            let (event_tx, event_rx) = crossbeam_channel::unbounded();
            for slice in &active {
                let event_tx = event_tx.clone();
                let slice = **slice;
                scope.spawn(move |_| self.run_worker(slice, &event_tx));
            }
            drop(event_tx);

            // Structured completion: the channel drains until every worker
            // has hung up.
            let mut summary = DispatchSummary::default();
            for event in event_rx {
                match event {
                    WorkerEvent::Frame { status } => {
                        inc_bar(1);
                        match status {
                            GenerationStatus::Success => summary.success += 1,
                            GenerationStatus::Failure => summary.failure += 1,
                            GenerationStatus::Skipped => summary.skipped += 1,
                        }
                    },
                    WorkerEvent::Finished { device, processed } => {
                        debug!("worker on device {device} finished ({processed} frames)");
                    },
                }
            }
            summary
        })
        .map_err(|_| anyhow!("a dispatch worker panicked"))?;
        finish_progress_bar();

        info!(
            "dispatch complete: {success} generated, {failure} failed, {skipped} skipped",
            success = summary.success,
            failure = summary.failure,
            skipped = summary.skipped
        );

        Ok(summary)
    }

    /// Overlap and device sharing are caller errors; the first corrupts
    /// nothing (last write wins) and only warns, the second violates the
    /// exclusivity invariant and refuses to run.
    fn validate_slices(&self, slices: &[WorkSlice]) -> Result<()> {
        let mut devices = HashSet::new();
        for slice in slices.iter().filter(|slice| !slice.is_empty()) {
            if !devices.insert(slice.device) {
                return Err(PipelineError::InvalidConfiguration(format!(
                    "device {device} is assigned to more than one active slice",
                    device = slice.device
                ))
                .into());
            }
        }

        let mut sorted: Vec<&WorkSlice> =
            slices.iter().filter(|slice| !slice.is_empty()).collect();
        sorted.sort_by_key(|slice| slice.start);
        for pair in sorted.windows(2) {
            if pair[0].end > pair[1].start {
                warn!(
                    "slices [{}, {}) and [{}, {}) overlap; later results overwrite earlier ones",
                    pair[0].start, pair[0].end, pair[1].start, pair[1].end
                );
            }
        }

        Ok(())
    }

    /// One worker: ascending index order, per-frame failure isolation.
    fn run_worker(&self, slice: WorkSlice, events: &Sender<WorkerEvent>) {
        debug!(
            "worker on device {device} owns [{start}, {end})",
            device = slice.device,
            start = slice.start,
            end = slice.end
        );

        let mut processed = 0;
        for index in slice.indices() {
            let status = match self.process_frame(index, slice.device) {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        "frame {index} failed on device {device}: {e:#}",
                        device = slice.device
                    );
                    let failure = GenerationResult {
                        status:        GenerationStatus::Failure,
                        output_path:   None,
                        error_message: Some(format!("{e:#}")),
                    };
                    if let Err(e) = self.results.record(index, failure) {
                        error!("failed to persist result for frame {index}: {e:#}");
                    }
                    GenerationStatus::Failure
                },
            };
            processed += 1;
            let _ = events.send(WorkerEvent::Frame { status });
        }

        let _ = events.send(WorkerEvent::Finished {
            device: slice.device,
            processed,
        });
    }

    fn process_frame(&self, index: usize, device: usize) -> Result<GenerationStatus> {
        let output_path = self.output_dir.join(format!("{index}.mp4"));
        if output_path.is_file() {
            debug!("frame {index}: output already exists, skipping");
            self.results.record(index, GenerationResult {
                status:        GenerationStatus::Skipped,
                output_path:   Some(output_path),
                error_message: None,
            })?;
            return Ok(GenerationStatus::Skipped);
        }

        if !self.frames.contains(index) {
            return Err(PipelineError::MissingFrame { index }.into());
        }
        let record = self
            .prompts
            .get(index)
            .ok_or_else(|| anyhow!("no motion record for frame {index}"))?;

        let image = self.frames.image_path(index);
        let request = GenerationRequest {
            frame_index: index,
            image: &image,
            text_prompt: &record.text_prompt,
            output: &output_path,
            device,
        };
        self.generator.generate(&request)?;

        self.results.record(index, GenerationResult {
            status:        GenerationStatus::Success,
            output_path:   Some(output_path),
            error_message: None,
        })?;

        Ok(GenerationStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{motion::MotionAssigner, partition::partition, Dataset};

    /// Test double that materializes an empty output file, failing on the
    /// configured frames. Records which device served each frame.
    struct StubGenerator {
        fail_on: Vec<usize>,
        served:  Mutex<Vec<(usize, usize)>>,
    }

    impl StubGenerator {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                fail_on,
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
            if self.fail_on.contains(&request.frame_index) {
                return Err(PipelineError::Generation {
                    index:   request.frame_index,
                    message: "stub failure".into(),
                });
            }
            fs::write(request.output, b"video").unwrap();
            Ok(())
        }
    }

    struct Fixture {
        _dir:    tempfile::TempDir,
        frames:  FrameIndex,
        prompts: PromptStore,
        results: ResultsFile,
        output:  PathBuf,
    }

    fn fixture(total: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut frames = FrameIndex::new(&dir.path().join("first_frames")).unwrap();
        for video in 0..total {
            frames
                .register_frame(Dataset::Dl3dv, &format!("v{video}"), b"jpeg")
                .unwrap();
        }

        let mut prompts = PromptStore::load(&dir.path().join("generated_prompts.json")).unwrap();
        let assigner = MotionAssigner::new(&frames, 42);
        for index in 0..total {
            prompts.insert(index, assigner.assign(index).unwrap());
        }

        let results = ResultsFile::load(&dir.path().join("generation_results.json")).unwrap();
        let output = dir.path().join("outputs");
        fs::create_dir_all(&output).unwrap();

        Fixture {
            frames,
            prompts,
            results,
            output,
            _dir: dir,
        }
    }

    #[test]
    fn merged_keys_equal_the_dispatched_indices() {
        let fixture = fixture(15);
        let generator = StubGenerator::new(Vec::new());
        let dispatcher = BatchDispatcher::new(
            &fixture.frames,
            &fixture.prompts,
            &fixture.results,
            &generator,
            &fixture.output,
        );

        let slices = partition(15, 3).unwrap();
        let summary = dispatcher.dispatch(&slices).unwrap();

        assert_eq!(summary.success, 15);
        assert_eq!(fixture.results.indices(), (0..15).collect::<Vec<_>>());

        // Each slice stayed on its own device
        let served = generator.served.lock().unwrap();
        for &(frame, device) in served.iter() {
            assert_eq!(device, frame / 5, "frame {frame} served by device {device}");
        }
    }

    #[test]
    fn one_failing_frame_does_not_abort_the_rest_of_the_slice() {
        let fixture = fixture(15);
        let generator = StubGenerator::new(vec![12]);
        let dispatcher = BatchDispatcher::new(
            &fixture.frames,
            &fixture.prompts,
            &fixture.results,
            &generator,
            &fixture.output,
        );

        let slices = vec![WorkSlice {
            start:  10,
            end:    15,
            device: 0,
        }];
        let summary = dispatcher.dispatch(&slices).unwrap();

        assert_eq!(summary, DispatchSummary {
            success: 4,
            failure: 1,
            skipped: 0,
        });
        assert_eq!(fixture.results.indices(), vec![10, 11, 12, 13, 14]);

        let failed = fixture.results.get(12).unwrap();
        assert_eq!(failed.status, GenerationStatus::Failure);
        assert!(failed.error_message.unwrap().contains("stub failure"));
        for index in [10, 11, 13, 14] {
            assert_eq!(
                fixture.results.get(index).unwrap().status,
                GenerationStatus::Success
            );
        }
    }

    #[test]
    fn existing_outputs_are_skipped_on_rerun() {
        let fixture = fixture(6);
        let generator = StubGenerator::new(Vec::new());
        let dispatcher = BatchDispatcher::new(
            &fixture.frames,
            &fixture.prompts,
            &fixture.results,
            &generator,
            &fixture.output,
        );
        let slices = partition(6, 2).unwrap();

        dispatcher.dispatch(&slices).unwrap();
        let rerun = dispatcher.dispatch(&slices).unwrap();

        assert_eq!(rerun, DispatchSummary {
            success: 0,
            failure: 0,
            skipped: 6,
        });
        // The generator was only ever invoked by the first run
        assert_eq!(generator.served.lock().unwrap().len(), 6);
    }

    #[test]
    fn empty_slices_are_no_ops() {
        let fixture = fixture(2);
        let generator = StubGenerator::new(Vec::new());
        let dispatcher = BatchDispatcher::new(
            &fixture.frames,
            &fixture.prompts,
            &fixture.results,
            &generator,
            &fixture.output,
        );

        // partition(2, 4) front-loads empty slices
        let summary = dispatcher.dispatch(&partition(2, 4).unwrap()).unwrap();
        assert_eq!(summary.total(), 2);
    }

    #[test]
    fn sharing_a_device_between_active_slices_is_refused() {
        let fixture = fixture(4);
        let generator = StubGenerator::new(Vec::new());
        let dispatcher = BatchDispatcher::new(
            &fixture.frames,
            &fixture.prompts,
            &fixture.results,
            &generator,
            &fixture.output,
        );

        let slices = vec![
            WorkSlice {
                start:  0,
                end:    2,
                device: 0,
            },
            WorkSlice {
                start:  2,
                end:    4,
                device: 0,
            },
        ];
        let err = dispatcher.dispatch(&slices).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfiguration(_))
        ));
        assert!(fixture.results.is_empty());
    }

    #[test]
    fn results_file_round_trips_with_sorted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generation_results.json");

        let results = ResultsFile::load(&path).unwrap();
        results
            .record(10, GenerationResult {
                status:        GenerationStatus::Success,
                output_path:   Some(PathBuf::from("outputs/10.mp4")),
                error_message: None,
            })
            .unwrap();
        results
            .record(2, GenerationResult {
                status:        GenerationStatus::Failure,
                output_path:   None,
                error_message: Some("boom".into()),
            })
            .unwrap();

        let reloaded = ResultsFile::load(&path).unwrap();
        assert_eq!(reloaded.indices(), vec![2, 10]);
        assert_eq!(
            reloaded.get(10).unwrap().status,
            GenerationStatus::Success
        );

        // Keys serialize in ascending numeric order
        let data = fs::read_to_string(&path).unwrap();
        assert!(data.find("\"2\"").unwrap() < data.find("\"10\"").unwrap());
    }
}
