use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub mod context;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod frame_index;
pub mod generate;
pub mod motion;
pub mod partition;
pub mod progress_bar;
pub mod settings;
pub mod sources;
pub mod util;

pub use crate::error::PipelineError;

/// Source collection a frame was extracted from.
///
/// Registration order is a contract, not an accident of sequencing: every
/// `Dl3dv` frame registers before any `RealEstate` frame, so the 3D-scene
/// collection occupies the low indices and the real-estate collection
/// continues after it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// Structured 3D-scene collection (DL3DV-10K sample), hosted on Hugging
    /// Face.
    Dl3dv,
    /// YouTube-sourced real-estate collection (RealEstate10K).
    RealEstate,
}

impl Dataset {
    /// Both datasets, in the order they must register frames.
    #[must_use]
    #[inline]
    pub const fn in_registration_order() -> [Dataset; 2] {
        [Dataset::Dl3dv, Dataset::RealEstate]
    }
}

/// Which datasets a pipeline invocation operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatasetScope {
    #[default]
    Both,
    Dl3dv,
    RealEstate,
}

impl DatasetScope {
    #[must_use]
    #[inline]
    pub const fn includes(self, dataset: Dataset) -> bool {
        match self {
            DatasetScope::Both => true,
            DatasetScope::Dl3dv => matches!(dataset, Dataset::Dl3dv),
            DatasetScope::RealEstate => matches!(dataset, Dataset::RealEstate),
        }
    }
}

#[macro_export]
macro_rules! create_dir {
    ($loc:expr) => {
        std::fs::create_dir_all($loc).map_err(|e| {
            anyhow::anyhow!("Failed to create directory {}: {}", $loc.display(), e)
        })
    };
}
