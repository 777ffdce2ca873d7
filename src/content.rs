//! Stage content filling with bounded retry.

use std::time::Duration;

use crate::course::{CourseConfig, CourseStage, StageContent};
use crate::error::{GenerateError, ServiceError};
use crate::service::GenerationService;

/// Retry knobs for one stage fill.
///
/// The delay is fixed, not exponential: stage calls are long and sequential,
/// so a second of extra politeness per retry buys nothing.
#[derive(Debug, Clone, Copy)]
pub struct FillPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
    pub stage_timeout: Duration,
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_millis(2000),
            stage_timeout: Duration::from_secs(120),
        }
    }
}

pub struct StageContentFiller<'a> {
    service: &'a dyn GenerationService,
    policy: FillPolicy,
}

impl<'a> StageContentFiller<'a> {
    pub fn new(service: &'a dyn GenerationService) -> Self {
        Self::with_policy(service, FillPolicy::default())
    }

    pub fn with_policy(service: &'a dyn GenerationService, policy: FillPolicy) -> Self {
        Self { service, policy }
    }

    /// Generate content for one stage skeleton. Failed attempts wait
    /// [`FillPolicy::retry_delay`] before the next try; each attempt is
    /// bounded by [`FillPolicy::stage_timeout`] so a hung call cannot stall
    /// the run forever. Exhausting all attempts fails the whole run; no
    /// partial stage content is ever fabricated.
    pub async fn fill(
        &self,
        config: &CourseConfig,
        stage: &CourseStage,
    ) -> Result<StageContent, GenerateError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
            let call = self.service.generate_stage_content(config, stage);
            match tokio::time::timeout(self.policy.stage_timeout, call).await {
                Ok(Ok(draft)) => return Ok(draft.into_content()),
                Ok(Err(err)) => {
                    tracing::warn!(
                        stage_id = stage.id,
                        attempt,
                        attempts,
                        error = %err,
                        "stage content attempt failed"
                    );
                    last_error = Some(err);
                }
                Err(_) => {
                    tracing::warn!(
                        stage_id = stage.id,
                        attempt,
                        attempts,
                        timeout = ?self.policy.stage_timeout,
                        "stage content attempt timed out"
                    );
                    last_error = Some(ServiceError::Timeout(self.policy.stage_timeout));
                }
            }
        }
        Err(GenerateError::Stage {
            stage_id: stage.id,
            attempts,
            last_error: last_error.unwrap_or(ServiceError::Empty),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::{
        ChatMessage, CourseOutline, DialogueSegment, SourceFile, VideoScene,
    };
    use crate::service::{ExtractedConfig, StageDraft};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Step {
        Reply(Result<StageDraft, ServiceError>),
        Hang,
    }

    struct ScriptedStages {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedStages {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedStages {
        async fn extract_config(
            &self,
            _transcript: &[ChatMessage],
            _sources: &[SourceFile],
        ) -> Result<ExtractedConfig, ServiceError> {
            unimplemented!()
        }

        async fn generate_outline(
            &self,
            _config: &CourseConfig,
            _transcript: &[ChatMessage],
        ) -> Result<CourseOutline, ServiceError> {
            unimplemented!()
        }

        async fn generate_stage_content(
            &self,
            _config: &CourseConfig,
            _stage: &CourseStage,
        ) -> Result<StageDraft, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra call");
            match step {
                Step::Reply(reply) => reply,
                Step::Hang => std::future::pending().await,
            }
        }

        async fn generate_video_script(
            &self,
            _config: &CourseConfig,
            _course: &CourseOutline,
        ) -> Result<Vec<VideoScene>, ServiceError> {
            unimplemented!()
        }

        async fn generate_podcast_script(
            &self,
            _config: &CourseConfig,
            _course: &CourseOutline,
        ) -> Result<Vec<DialogueSegment>, ServiceError> {
            unimplemented!()
        }
    }

    fn stage(id: u32) -> CourseStage {
        CourseStage {
            id,
            title: format!("Stage {id}"),
            objective: "objective".to_string(),
            key_points: Vec::new(),
            estimated_duration: Some("3-5 minutes".to_string()),
            content: None,
        }
    }

    fn draft() -> StageDraft {
        StageDraft {
            introduction: Some("intro".to_string()),
            summary: Some("summary".to_string()),
            ..StageDraft::default()
        }
    }

    #[tokio::test]
    async fn success_normalizes_missing_collections() {
        let service = ScriptedStages::new(vec![Step::Reply(Ok(draft()))]);
        let filler = StageContentFiller::new(&service);
        let content = filler
            .fill(&CourseConfig::default(), &stage(1))
            .await
            .unwrap();
        assert_eq!(content.introduction, "intro");
        assert!(content.sections.is_empty());
        assert!(content.interactive_elements.is_empty());
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_failures_with_fixed_delay() {
        let service = ScriptedStages::new(vec![
            Step::Reply(Err(ServiceError::Empty)),
            Step::Reply(Err(ServiceError::Empty)),
            Step::Reply(Ok(draft())),
        ]);
        let filler = StageContentFiller::new(&service);
        let started = tokio::time::Instant::now();
        let content = filler
            .fill(&CourseConfig::default(), &stage(2))
            .await
            .unwrap();
        assert_eq!(content.introduction, "intro");
        assert_eq!(service.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_fail_with_stage_error() {
        let service = ScriptedStages::new(vec![
            Step::Reply(Err(ServiceError::Empty)),
            Step::Reply(Err(ServiceError::Empty)),
            Step::Reply(Err(ServiceError::malformed("still hollow"))),
        ]);
        let filler = StageContentFiller::new(&service);
        let err = filler
            .fill(&CourseConfig::default(), &stage(4))
            .await
            .unwrap_err();
        match err {
            GenerateError::Stage {
                stage_id,
                attempts,
                last_error,
            } => {
                assert_eq!(stage_id, 4);
                assert_eq!(attempts, 3);
                assert!(last_error.to_string().contains("still hollow"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_calls_are_cut_off_by_the_stage_timeout() {
        let service = ScriptedStages::new(vec![Step::Hang, Step::Hang, Step::Hang]);
        let policy = FillPolicy {
            attempts: 3,
            retry_delay: Duration::from_millis(2000),
            stage_timeout: Duration::from_secs(5),
        };
        let filler = StageContentFiller::with_policy(&service, policy);
        let started = tokio::time::Instant::now();
        let err = filler
            .fill(&CourseConfig::default(), &stage(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerateError::Stage {
                last_error: ServiceError::Timeout(_),
                ..
            }
        ));
        // Three 5s timeouts separated by two 2s delays.
        assert_eq!(started.elapsed(), Duration::from_secs(19));
    }
}
