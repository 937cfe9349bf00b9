use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::{create_dir, error::PipelineError, util::write_json_atomic, Dataset};

pub const FRAME_EXTENSION: &str = "jpg";

/// One registered first-frame image. The index is the sole identity key;
/// the source attribution exists only for the lifetime of the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index:      usize,
    pub dataset:    Dataset,
    pub video_id:   String,
    pub image_path: PathBuf,
}

/// Global, gap-free numbering of first-frame images across both datasets.
///
/// The frames directory is the single source of truth: the next index is
/// recomputed from the persisted `<index>.jpg` names on every call rather
/// than held in a counter, so numbering survives restarts, partial failures
/// and manual deletion of the directory tail. Registration takes `&mut
/// self`; a single writer per run is the concurrency discipline.
#[derive(Debug)]
pub struct FrameIndex {
    frames_dir: PathBuf,
}

impl FrameIndex {
    #[inline]
    pub fn new(frames_dir: &Path) -> Result<Self> {
        create_dir!(frames_dir)?;
        Ok(Self {
            frames_dir: frames_dir.to_path_buf(),
        })
    }

    #[must_use]
    #[inline]
    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    #[must_use]
    #[inline]
    pub fn image_path(&self, index: usize) -> PathBuf {
        self.frames_dir.join(format!("{index}.{FRAME_EXTENSION}"))
    }

    #[must_use]
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.image_path(index).is_file()
    }

    /// Sorted indices of every persisted frame. Files whose stem is not a
    /// plain integer are not frames and are ignored.
    #[inline]
    pub fn indices(&self) -> Result<Vec<usize>> {
        let entries = fs::read_dir(&self.frames_dir).with_context(|| {
            format!(
                "Failed to read frames directory {dir}",
                dir = self.frames_dir.display()
            )
        })?;

        let mut indices = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path
                .extension()
                .is_some_and(|extension| extension.eq_ignore_ascii_case(FRAME_EXTENSION))
            {
                continue;
            }
            if let Some(index) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<usize>().ok())
            {
                indices.push(index);
            }
        }
        indices.sort_unstable();

        Ok(indices)
    }

    #[inline]
    pub fn count(&self) -> Result<usize> {
        Ok(self.indices()?.len())
    }

    /// Smallest index above every persisted frame, computed by scanning the
    /// directory. A gap left by deleting a file in the middle of the
    /// sequence is never reused; existing frames are never renumbered.
    #[inline]
    pub fn next_available_index(&self) -> Result<usize> {
        Ok(self.indices()?.last().map_or(0, |last| last + 1))
    }

    /// Claims the next available index and persists `image` under it.
    #[inline]
    pub fn register_frame(
        &mut self,
        dataset: Dataset,
        video_id: &str,
        image: &[u8],
    ) -> Result<Frame> {
        let index = self.next_available_index()?;
        let image_path = self.image_path(index);
        fs::write(&image_path, image).with_context(|| {
            format!(
                "Failed to persist frame {index} at {path}",
                path = image_path.display()
            )
        })?;
        debug!("registered frame {index} ({dataset}/{video_id})");

        Ok(Frame {
            index,
            dataset,
            video_id: video_id.to_owned(),
            image_path,
        })
    }

    /// Deletes every persisted frame and resets numbering to 0. Destructive
    /// and irreversible; refuses to run without the explicit confirmation
    /// flag.
    #[inline]
    pub fn clear_all(&mut self, confirm: bool) -> Result<usize> {
        if !confirm {
            return Err(PipelineError::InvalidConfiguration(
                "refusing to clear the frame index without explicit confirmation".into(),
            )
            .into());
        }

        let indices = self.indices()?;
        for &index in &indices {
            fs::remove_file(self.image_path(index))?;
        }
        info!(
            "cleared {count} frames from {dir}",
            count = indices.len(),
            dir = self.frames_dir.display()
        );

        Ok(indices.len())
    }
}

/// Record of which source videos already consumed a frame index, so a rerun
/// registers only videos it has not seen. A video that failed to
/// materialize never enters the ledger and therefore consumes no index.
#[derive(Debug)]
pub struct RegistrationLedger {
    path:    PathBuf,
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl RegistrationLedger {
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.is_file() {
            let data = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {path}", path = path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("Failed to parse {path}", path = path.display()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    #[must_use]
    #[inline]
    pub fn contains(&self, dataset: Dataset, video_id: &str) -> bool {
        self.entries
            .get(&dataset.to_string())
            .is_some_and(|ids| ids.contains(video_id))
    }

    #[inline]
    pub fn insert(&mut self, dataset: Dataset, video_id: &str) {
        self.entries
            .entry(dataset.to_string())
            .or_default()
            .insert(video_id.to_owned());
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.entries)
    }

    /// Forgets every registration. Paired with `FrameIndex::clear_all`.
    #[inline]
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        if self.path.is_file() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
