use std::path::PathBuf;

use crate::DatasetScope;

/// Filesystem layout of one dataset directory. Everything is derived from a
/// single root so runs stay relocatable.
#[derive(Debug, Clone)]
pub struct IoSettings {
    pub root:            PathBuf,
    pub dl3dv_dir:       PathBuf,
    pub realestate_dir:  PathBuf,
    pub metadata_dir:    PathBuf,
    pub frames_dir:      PathBuf,
    pub prompts_file:    PathBuf,
    pub results_file:    PathBuf,
    pub ledger_file:     PathBuf,
    pub output_dir:      PathBuf,
}

impl IoSettings {
    #[must_use]
    #[inline]
    pub fn from_root(root: PathBuf) -> Self {
        Self {
            dl3dv_dir: root.join("videos").join("dl3dv"),
            realestate_dir: root.join("videos").join("realestate"),
            metadata_dir: root.join("metadata").join("realestate"),
            frames_dir: root.join("first_frames"),
            prompts_file: root.join("generated_prompts.json"),
            results_file: root.join("generation_results.json"),
            ledger_file: root.join("registered_videos.json"),
            output_dir: root.join("outputs"),
            root,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetSettings {
    pub scope:                  DatasetScope,
    pub dl3dv_videos:           Option<usize>,
    pub realestate_videos:      usize,
    pub max_videos_per_dataset: Option<usize>,
    pub skip_download:          bool,
    pub skip_prompts:           bool,
    pub clear_existing:         bool,
    /// Parallel yt-dlp fetches for the real-estate collection.
    pub download_workers:       usize,
}

impl Default for DatasetSettings {
    #[inline]
    fn default() -> Self {
        Self {
            scope:                  DatasetScope::Both,
            dl3dv_videos:           None,
            realestate_videos:      100,
            max_videos_per_dataset: None,
            skip_download:          false,
            skip_prompts:           false,
            clear_existing:         false,
            download_workers:       4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub seed:       u64,
    /// Reassign every frame instead of only the ones lacking a record.
    pub regenerate: bool,
}

impl Default for PromptSettings {
    #[inline]
    fn default() -> Self {
        Self {
            seed:       42,
            regenerate: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    /// One worker per device; a device never hosts two concurrent workers.
    pub devices:    Vec<usize>,
    pub start:      Option<usize>,
    pub end:        Option<usize>,
    pub max_frames: Option<usize>,
}

/// Parameters handed through to the external model-runner process.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub program:         PathBuf,
    pub extra_args:      Vec<String>,
    pub num_frames:      usize,
    pub fps:             usize,
    pub inference_steps: usize,
    pub guidance_scale:  f64,
    pub seed:            Option<u64>,
    pub negative_prompt: Option<String>,
}

impl Default for GeneratorSettings {
    #[inline]
    fn default() -> Self {
        Self {
            program:         PathBuf::new(),
            extra_args:      Vec::new(),
            num_frames:      49,
            fps:             8,
            inference_steps: 50,
            guidance_scale:  6.0,
            seed:            Some(42),
            negative_prompt: None,
        }
    }
}
