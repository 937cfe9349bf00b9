use std::{
    path::PathBuf,
    process::{Command, Stdio},
};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    create_dir,
    error::PipelineError,
    partition::partition,
    progress_bar::{finish_progress_bar, inc_bar, init_progress_bar},
    Dataset,
};

pub const VIDEO_EXTENSION: &str = "mp4";

/// yt-dlp format selector: capped at 720p, mp4 preferred.
const YTDLP_FORMAT: &str =
    "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[height<=720][ext=mp4]/best";

const DL3DV_REPO: &str = "DL3DV/DL3DV-10K-Sample";

/// One downloaded video, identified the way its collection names it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceVideo {
    pub video_id: String,
    pub path:     PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped:    usize,
    pub failed:     Vec<String>,
}

impl DownloadSummary {
    fn merge(&mut self, other: DownloadSummary) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }
}

/// A video collection the pipeline can fetch and enumerate.
///
/// `videos()` must work over whatever is already on disk even when
/// `download()` was skipped; enumeration order is the registration order
/// contract, so implementations return a stable sorted listing.
pub trait VideoSource {
    fn dataset(&self) -> Dataset;
    fn download(&self) -> Result<DownloadSummary>;
    fn videos(&self) -> Result<Vec<SourceVideo>>;
}

/// DL3DV-10K sample collection, fetched from Hugging Face as a snapshot of
/// `*.mp4` files (thin wrapper over the `huggingface-cli` executable).
#[derive(Debug)]
pub struct Dl3dvSource {
    videos_dir: PathBuf,
    limit:      Option<usize>,
}

impl Dl3dvSource {
    #[must_use]
    #[inline]
    pub const fn new(videos_dir: PathBuf, limit: Option<usize>) -> Self {
        Self { videos_dir, limit }
    }
}

impl VideoSource for Dl3dvSource {
    #[inline]
    fn dataset(&self) -> Dataset {
        Dataset::Dl3dv
    }

    #[inline]
    fn download(&self) -> Result<DownloadSummary> {
        if which::which("huggingface-cli").is_err() {
            return Err(PipelineError::MissingDependency {
                tool: "huggingface-cli".into(),
                hint: "Install with `pip install -U \"huggingface_hub[cli]\"`.".into(),
            }
            .into());
        }
        create_dir!(&self.videos_dir)?;

        info!(
            "downloading {DL3DV_REPO} snapshot to {dir}",
            dir = self.videos_dir.display()
        );
        let output = Command::new("huggingface-cli")
            .args(["download", DL3DV_REPO, "--repo-type", "dataset", "--include", "*.mp4"])
            .arg("--local-dir")
            .arg(&self.videos_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .context("Failed to run huggingface-cli")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "huggingface-cli download failed ({status}): {stderr}\nYou may need to accept \
                 the dataset terms on Hugging Face and run `huggingface-cli login`.",
                status = output.status,
                stderr = stderr.trim()
            );
        }

        let downloaded = self.videos()?.len();
        info!("DL3DV snapshot holds {downloaded} videos");

        Ok(DownloadSummary {
            downloaded,
            ..DownloadSummary::default()
        })
    }

    /// Recursive `*.mp4` listing in sorted path order; the snapshot nests
    /// videos under per-scene directories.
    #[inline]
    fn videos(&self) -> Result<Vec<SourceVideo>> {
        if !self.videos_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut videos = Vec::new();
        for entry in WalkDir::new(&self.videos_dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path
                    .extension()
                    .is_some_and(|extension| extension.eq_ignore_ascii_case(VIDEO_EXTENSION))
            {
                // Scene directory + file stem disambiguates nested snapshots
                let video_id = path
                    .strip_prefix(&self.videos_dir)
                    .unwrap_or(path)
                    .with_extension("")
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                videos.push(SourceVideo {
                    video_id,
                    path: path.to_path_buf(),
                });
            }
        }
        videos.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(limit) = self.limit {
            videos.truncate(limit);
        }

        Ok(videos)
    }
}

/// RealEstate10K collection: YouTube ids taken from a pre-extracted
/// metadata directory of `<id>.txt` camera-pose files, fetched one video at
/// a time with `yt-dlp`.
#[derive(Debug)]
pub struct RealEstateSource {
    metadata_dir: PathBuf,
    videos_dir:   PathBuf,
    limit:        usize,
    workers:      usize,
}

impl RealEstateSource {
    #[must_use]
    #[inline]
    pub const fn new(
        metadata_dir: PathBuf,
        videos_dir: PathBuf,
        limit: usize,
        workers: usize,
    ) -> Self {
        Self {
            metadata_dir,
            videos_dir,
            limit,
            workers,
        }
    }

    /// YouTube ids from the metadata listing, sorted, capped at the
    /// configured count.
    fn metadata_ids(&self) -> Result<Vec<String>> {
        if !self.metadata_dir.is_dir() {
            bail!(
                "RealEstate10K metadata not found at {dir}. Download and extract \
                 RealEstate10K.tar.gz there first.",
                dir = self.metadata_dir.display()
            );
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.metadata_dir).with_context(|| {
            format!("Failed to read {dir}", dir = self.metadata_dir.display())
        })? {
            let path = entry?.path();
            if path.extension().is_some_and(|extension| extension == "txt") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    ids.push(stem.to_owned());
                }
            }
        }
        ids.sort_unstable();
        ids.truncate(self.limit);

        Ok(ids)
    }

    fn video_path(&self, video_id: &str) -> PathBuf {
        self.videos_dir.join(format!("{video_id}.{VIDEO_EXTENSION}"))
    }

    /// One yt-dlp invocation. A video pulled from YouTube since the
    /// metadata was published shows up here as a non-zero exit.
    fn fetch(&self, video_id: &str) -> Result<(), PipelineError> {
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        let status = Command::new("yt-dlp")
            .args(["-f", YTDLP_FORMAT, "--no-warnings", "--quiet", "-o"])
            .arg(self.video_path(video_id))
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(PipelineError::SourceUnavailable {
                video_id: video_id.to_owned(),
            }),
        }
    }
}

impl VideoSource for RealEstateSource {
    #[inline]
    fn dataset(&self) -> Dataset {
        Dataset::RealEstate
    }

    /// Fetches the configured number of videos, splitting the id list
    /// across a small pool of download workers. Unavailable videos are
    /// recorded and skipped; they never abort the batch.
    #[inline]
    fn download(&self) -> Result<DownloadSummary> {
        if which::which("yt-dlp").is_err() {
            return Err(PipelineError::MissingDependency {
                tool: "yt-dlp".into(),
                hint: "Install with `pip install -U yt-dlp`.".into(),
            }
            .into());
        }
        create_dir!(&self.videos_dir)?;

        let ids = self.metadata_ids()?;
        info!(
            "fetching up to {count} RealEstate10K videos with {workers} download workers",
            count = ids.len(),
            workers = self.workers
        );
        init_progress_bar(ids.len() as u64);

        let slices = partition(ids.len(), self.workers.max(1))?;
        let summary = crossbeam_utils::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(slices.len());
            for slice in &slices {
                let ids = &ids[slice.indices()];
                handles.push(scope.spawn(move |_| {
                    let mut summary = DownloadSummary::default();
                    for video_id in ids {
                        if self.video_path(video_id).is_file() {
                            debug!("{video_id}: already downloaded");
                            summary.skipped += 1;
                        } else if let Err(e) = self.fetch(video_id) {
                            warn!("{e}");
                            summary.failed.push(video_id.clone());
                        } else {
                            summary.downloaded += 1;
                        }
                        inc_bar(1);
                    }
                    summary
                }));
            }

            let mut summary = DownloadSummary::default();
            for handle in handles {
                summary.merge(handle.join().expect("download worker panicked"));
            }
            summary
        })
        .expect("download scope panicked");
        finish_progress_bar();

        if !summary.failed.is_empty() {
            warn!(
                "{count} videos were unavailable: {ids}",
                count = summary.failed.len(),
                ids = summary.failed.join(", ")
            );
        }

        Ok(summary)
    }

    /// Flat `*.mp4` listing in sorted order; the YouTube id is the stem.
    #[inline]
    fn videos(&self) -> Result<Vec<SourceVideo>> {
        if !self.videos_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut videos = Vec::new();
        for entry in std::fs::read_dir(&self.videos_dir)
            .with_context(|| format!("Failed to read {dir}", dir = self.videos_dir.display()))?
        {
            let path = entry?.path();
            if path
                .extension()
                .is_some_and(|extension| extension.eq_ignore_ascii_case(VIDEO_EXTENSION))
            {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    videos.push(SourceVideo {
                        video_id: stem.to_owned(),
                        path,
                    });
                }
            }
        }
        videos.sort_by(|a, b| a.video_id.cmp(&b.video_id));

        Ok(videos)
    }
}
