use serde::{Deserialize, Serialize};

use crate::course::CourseOutline;
use crate::error::GenerateError;

/// Where a generation run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Idle,
    Extracting,
    Outline,
    Generating,
    Complete,
    Failed,
}

/// Transient snapshot of a run's progress. Never persisted: it exists while
/// the run is active and is discarded when the run ends or is cancelled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationProgress {
    pub status: GenerationStatus,
    /// 0 to 100.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_stages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GenerationProgress {
    fn at(status: GenerationStatus, progress: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            progress,
            current_stage: None,
            total_stages: None,
            message: Some(message.into()),
        }
    }

    pub fn idle() -> Self {
        Self {
            status: GenerationStatus::Idle,
            progress: 0,
            current_stage: None,
            total_stages: None,
            message: None,
        }
    }

    pub fn extracting() -> Self {
        Self::at(
            GenerationStatus::Extracting,
            10,
            "Extracting course configuration from conversation...",
        )
    }

    pub fn outline() -> Self {
        Self::at(GenerationStatus::Outline, 20, "Generating course outline...")
    }

    pub fn starting_stages(total: usize) -> Self {
        Self {
            current_stage: Some(0),
            total_stages: Some(total),
            ..Self::at(
                GenerationStatus::Generating,
                30,
                "Starting content generation...",
            )
        }
    }

    /// Content generation occupies the 30-90 band, split evenly per stage.
    pub fn stage(current: usize, total: usize, title: &str) -> Self {
        let progress = (30 + current * 60 / total.max(1)).min(90) as u8;
        Self {
            current_stage: Some(current),
            total_stages: Some(total),
            ..Self::at(
                GenerationStatus::Generating,
                progress,
                format!("Generating content for stage {current}: {title}..."),
            )
        }
    }

    pub fn media() -> Self {
        Self::at(
            GenerationStatus::Generating,
            90,
            "Generating video and podcast content...",
        )
    }

    pub fn finalizing() -> Self {
        Self::at(GenerationStatus::Generating, 95, "Finalizing course...")
    }

    pub fn complete() -> Self {
        Self::at(GenerationStatus::Complete, 100, "Course generation complete!")
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::at(GenerationStatus::Failed, 0, message)
    }
}

/// Receives progress events from a run. Fire-and-forget: the pipeline never
/// waits on a sink and does not care whether anyone is listening.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &GenerationProgress);
    fn on_complete(&self, _course: &CourseOutline) {}
    fn on_failed(&self, _error: &GenerateError, _user_message: &str) {}
}

/// Discards every event.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_progress(&self, _progress: &GenerationProgress) {}
}

/// Logs every event.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, progress: &GenerationProgress) {
        tracing::info!(
            status = ?progress.status,
            percent = progress.progress,
            message = progress.message.as_deref().unwrap_or(""),
            "generation progress"
        );
    }

    fn on_complete(&self, course: &CourseOutline) {
        tracing::info!(
            title = %course.title,
            stages = course.stages.len(),
            "course generation complete"
        );
    }

    fn on_failed(&self, error: &GenerateError, user_message: &str) {
        tracing::error!(error = %error, user_message, "course generation failed");
    }
}

/// Publishes the newest snapshot to any number of observers over a watch
/// channel. Sending never blocks; a slow observer only ever sees the latest
/// value.
pub struct WatchProgress {
    tx: tokio::sync::watch::Sender<GenerationProgress>,
}

impl WatchProgress {
    pub fn new() -> Self {
        let (tx, _rx) = tokio::sync::watch::channel(GenerationProgress::idle());
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<GenerationProgress> {
        self.tx.subscribe()
    }
}

impl Default for WatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for WatchProgress {
    fn on_progress(&self, progress: &GenerationProgress) {
        self.tx.send_replace(progress.clone());
    }
}
