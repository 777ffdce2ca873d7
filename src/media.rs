//! Best-effort media augmentation for a completed course.

use crate::course::{CourseConfig, CourseMedia, CourseOutline, DialogueSegment, VideoScene};
use crate::error::ServiceError;
use crate::service::GenerationService;

/// Per-medium results of an augmentation pass. `None` means the medium was
/// not requested; a failure is kept visible here instead of being swallowed,
/// even though it never fails the run.
#[derive(Debug, Default)]
pub struct MediaOutcome {
    pub video: Option<Result<Vec<VideoScene>, ServiceError>>,
    pub podcast: Option<Result<Vec<DialogueSegment>, ServiceError>>,
}

impl MediaOutcome {
    /// Collapse into the collections stored on the course record. Failed and
    /// unrequested media both land as empty collections.
    pub fn into_media(self) -> CourseMedia {
        CourseMedia {
            video_scenes: self.video.and_then(Result::ok).unwrap_or_default(),
            podcast_dialogue: self.podcast.and_then(Result::ok).unwrap_or_default(),
        }
    }
}

pub struct MediaAugmenter<'a> {
    service: &'a dyn GenerationService,
}

impl<'a> MediaAugmenter<'a> {
    pub fn new(service: &'a dyn GenerationService) -> Self {
        Self { service }
    }

    /// Generate whichever media the config asked for. Each medium is
    /// attempted independently; one failing does not stop the other.
    pub async fn augment(&self, config: &CourseConfig, course: &CourseOutline) -> MediaOutcome {
        let mut outcome = MediaOutcome::default();
        if config.include_video {
            let result = self.service.generate_video_script(config, course).await;
            match &result {
                Ok(scenes) => tracing::info!(scenes = scenes.len(), "video script generated"),
                Err(err) => tracing::warn!(error = %err, "video script generation failed"),
            }
            outcome.video = Some(result);
        }
        if config.include_podcast {
            let result = self.service.generate_podcast_script(config, course).await;
            match &result {
                Ok(dialogue) => {
                    tracing::info!(segments = dialogue.len(), "podcast script generated");
                }
                Err(err) => tracing::warn!(error = %err, "podcast script generation failed"),
            }
            outcome.podcast = Some(result);
        }
        outcome
    }
}
