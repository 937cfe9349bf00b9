use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use i2v_core::DatasetScope;

#[derive(Debug, Parser)]
#[command(name = "i2v", version, about = "Camera-motion I2V dataset preparation and multi-GPU \
                                          batch generation")]
pub struct I2vCli {
    /// Dataset root directory; everything lives under it
    #[arg(long, global = true, default_value = "./dataset")]
    pub root: PathBuf,

    /// Log file location
    #[arg(long, global = true)]
    pub logs: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetArg {
    Dl3dv,
    Realestate,
    All,
}

impl From<DatasetArg> for DatasetScope {
    #[inline]
    fn from(arg: DatasetArg) -> Self {
        match arg {
            DatasetArg::Dl3dv => DatasetScope::Dl3dv,
            DatasetArg::Realestate => DatasetScope::RealEstate,
            DatasetArg::All => DatasetScope::Both,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download the collections, register first frames and assign
    /// camera-motion prompts
    Setup {
        /// Which datasets to process
        #[arg(long, value_enum, default_value = "all")]
        datasets: DatasetArg,

        /// Cap on DL3DV videos (default: whole sample snapshot)
        #[arg(long)]
        dl3dv_videos: Option<usize>,

        /// RealEstate10K videos to fetch
        #[arg(long, default_value_t = 100)]
        realestate_videos: usize,

        /// Cap on videos registered per dataset
        #[arg(long)]
        max_videos_per_dataset: Option<usize>,

        /// Parallel yt-dlp fetches
        #[arg(long, default_value_t = 4)]
        download_workers: usize,

        /// Only register and prompt whatever is already on disk
        #[arg(long)]
        skip_download: bool,

        /// Leave prompt assignment to a later `i2v prompts` run
        #[arg(long)]
        skip_prompts: bool,

        /// Destructively clear frames, prompts and results first
        #[arg(long)]
        clear_existing: bool,

        /// Motion-assignment seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// (Re)assign camera-motion prompts for registered frames
    Prompts {
        /// Motion-assignment seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Reassign every frame, not only the ones lacking a record
        #[arg(long)]
        regenerate: bool,
    },

    /// Partition registered frames across devices and run batched
    /// generation
    Generate(GenerateOptions),

    /// Verify external tools and report the dataset state
    Check {
        /// Also check the model-runner executable
        #[arg(long)]
        generator: Option<PathBuf>,

        /// Tools for skipped downloads are not required
        #[arg(long)]
        skip_download: bool,

        /// Which datasets the check covers
        #[arg(long, value_enum, default_value = "all")]
        datasets: DatasetArg,
    },

    /// Destructively clear frames, prompts and results
    Clean {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Args)]
pub struct GenerateOptions {
    /// Model-runner executable invoked once per frame
    #[arg(long)]
    pub generator: PathBuf,

    /// Extra arguments appended to every runner invocation (shell-style
    /// quoting)
    #[arg(long)]
    pub generator_args: Option<String>,

    /// Worker count; workers bind to devices 0..N
    #[arg(long, default_value_t = 1, conflicts_with = "devices")]
    pub workers: usize,

    /// Explicit device ids, e.g. "1,2"
    #[arg(long, value_delimiter = ',')]
    pub devices: Option<Vec<usize>>,

    /// First frame index to process
    #[arg(long)]
    pub start: Option<usize>,

    /// One past the last frame index to process
    #[arg(long)]
    pub end: Option<usize>,

    /// Cap on how many frames this run processes
    #[arg(long)]
    pub max_frames: Option<usize>,

    /// Frames per generated video
    #[arg(long, default_value_t = 49)]
    pub num_frames: usize,

    #[arg(long, default_value_t = 8)]
    pub fps: usize,

    /// Inference steps per video
    #[arg(long, default_value_t = 50)]
    pub steps: usize,

    #[arg(long, default_value_t = 6.0)]
    pub guidance_scale: f64,

    /// Generation seed handed to the runner (omit for runner default)
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub negative_prompt: Option<String>,
}
