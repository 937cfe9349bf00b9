use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{error::PipelineError, frame_index::FrameIndex, util::write_json_atomic};

/// Single-step translations. Every combination carries at least one.
pub const TRANSLATIONS: [&str; 6] = [
    "push forward into the scene",
    "pull back away from the scene",
    "slide left across the room",
    "slide right across the room",
    "rise toward the ceiling",
    "descend toward the floor",
];

/// Single-step rotations, freely combinable.
pub const ROTATIONS: [&str; 3] = [
    "pan across the room",
    "tilt slowly upward",
    "roll gently to one side",
];

/// Full-path compound motions. A combination carries at most one of these;
/// two compound paths cannot follow each other.
pub const COMPOUND_PATHS: [&str; 3] = [
    "orbit around the scene",
    "arc around the center of the room",
    "circle around the main object",
];

/// Static-scene wording every text prompt opens with. The template is a
/// fixed contract; only the camera-motion clause varies per frame.
pub const SCENE_TEMPLATE: &str =
    "A realistic continuation of the reference indoor scene. Everything must remain completely \
     static: no moving people, no shifting objects, and no dynamic elements. All furniture and \
     geometry must stay identical. Only the camera is allowed to move. Render physically \
     accurate multi-step camera motion.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionRecord {
    pub image_prompt:  PathBuf,
    pub camera_motion: String,
    pub text_prompt:   String,
}

/// Deterministic mapping from a frame index to a camera-motion description.
///
/// Each frame gets its own seeded stream, so assignments are independent
/// across frames and reproducible for a fixed seed regardless of the order
/// frames are assigned in.
#[derive(Debug)]
pub struct MotionAssigner<'a> {
    frames: &'a FrameIndex,
    seed:   u64,
}

impl<'a> MotionAssigner<'a> {
    #[must_use]
    #[inline]
    pub const fn new(frames: &'a FrameIndex, seed: u64) -> Self {
        Self { frames, seed }
    }

    /// Builds the motion record for one registered frame. Fails with
    /// [`PipelineError::MissingFrame`] when no frame exists under `index`.
    #[inline]
    pub fn assign(&self, index: usize) -> Result<MotionRecord> {
        if !self.frames.contains(index) {
            return Err(PipelineError::MissingFrame { index }.into());
        }

        let camera_motion = self.camera_motion(index);
        let text_prompt = format!("{SCENE_TEMPLATE} Camera motion: {camera_motion}.");

        Ok(MotionRecord {
            image_prompt: self.frames.image_path(index),
            camera_motion,
            text_prompt,
        })
    }

    /// 2-3 primitives listed in execution order. A translation always
    /// leads; the remaining draws come from the whole vocabulary with the
    /// compound-path cap applied. The emitted order is final, never
    /// re-sorted.
    fn camera_motion(&self, index: usize) -> String {
        let mut rng = self.frame_rng(index);
        let count = rng.random_range(2..=3_usize);

        let mut pieces: Vec<&str> = Vec::with_capacity(count);
        pieces.push(*TRANSLATIONS.choose(&mut rng).expect("vocabulary is non-empty"));
        let mut compound_used = false;
        while pieces.len() < count {
            let family = rng.random_range(0..3_u8);
            let piece = match family {
                0 => TRANSLATIONS.choose(&mut rng),
                1 => ROTATIONS.choose(&mut rng),
                _ if !compound_used => {
                    compound_used = true;
                    COMPOUND_PATHS.choose(&mut rng)
                },
                _ => ROTATIONS.choose(&mut rng),
            };
            pieces.push(*piece.expect("vocabulary is non-empty"));
        }

        match pieces.as_slice() {
            [first, second] => format!("{first}, then {second}"),
            [first, second, third] => format!("{first}, then {second}, followed by {third}"),
            _ => unreachable!("combinations are always 2-3 primitives"),
        }
    }

    fn frame_rng(&self, index: usize) -> StdRng {
        // Golden-ratio mix keeps neighbouring frame indices on unrelated
        // streams.
        StdRng::seed_from_u64(self.seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

/// Keyed store of motion records, persisted as one JSON mapping from
/// string-encoded frame index to record. Regenerating a frame overwrites by
/// key, never duplicates.
#[derive(Debug)]
pub struct PromptStore {
    path:    PathBuf,
    records: BTreeMap<usize, MotionRecord>,
}

impl PromptStore {
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let records = if path.is_file() {
            let data = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {path}", path = path.display()))?;
            serde_json::from_str(&data).with_context(|| {
                format!("Failed to parse prompt records in {path}", path = path.display())
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.records)
    }

    #[must_use]
    #[inline]
    pub fn get(&self, index: usize) -> Option<&MotionRecord> {
        self.records.get(&index)
    }

    #[inline]
    pub fn insert(&mut self, index: usize, record: MotionRecord) {
        self.records.insert(index, record);
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Frame indices from `indices` that have no record yet.
    #[must_use]
    #[inline]
    pub fn missing_for(&self, indices: &[usize]) -> Vec<usize> {
        indices
            .iter()
            .copied()
            .filter(|index| !self.records.contains_key(index))
            .collect()
    }

    /// Drops every record and removes the persisted file.
    #[inline]
    pub fn clear(&mut self) -> Result<()> {
        self.records.clear();
        if self.path.is_file() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
