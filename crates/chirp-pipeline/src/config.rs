use chirp_voice::SegmenterConfig;
use serde::{Deserialize, Serialize};

fn default_segmentation_workers() -> usize {
    4
}

fn default_recognition_workers() -> usize {
    2
}

fn default_generation_workers() -> usize {
    2
}

fn default_synthesis_workers() -> usize {
    2
}

/// Per-stage worker counts and segmenter tuning.
///
/// A worker count caps in-flight handler executions for that stage's
/// subscription; it is admission control, not a queue depth limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_segmentation_workers")]
    pub segmentation_workers: usize,
    #[serde(default = "default_recognition_workers")]
    pub recognition_workers: usize,
    #[serde(default = "default_generation_workers")]
    pub generation_workers: usize,
    #[serde(default = "default_synthesis_workers")]
    pub synthesis_workers: usize,
    /// Speech segmenter tuning for the first stage.
    #[serde(default)]
    pub segmenter: SegmenterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segmentation_workers: default_segmentation_workers(),
            recognition_workers: default_recognition_workers(),
            generation_workers: default_generation_workers(),
            synthesis_workers: default_synthesis_workers(),
            segmenter: SegmenterConfig::default(),
        }
    }
}
