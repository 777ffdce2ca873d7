use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::app::course_store::CourseStore;
use crate::app::gate::{ApprovalGate, ConfigDecision, OutlineDecision};
use crate::app::locks::RunLocks;
use crate::app::model::{CoursePatch, CourseRecord, PipelineOptions};
use crate::app::progress::{GenerationProgress, ProgressSink};
use crate::content::StageContentFiller;
use crate::course::{ChatMessage, CourseConfig, CourseMedia, CourseOutline};
use crate::error::GenerateError;
use crate::extract::{ConfigResolver, Resolution};
use crate::media::MediaAugmenter;
use crate::outline::{OutlineGenerator, sanitize_outline};
use crate::service::GenerationService;

/// Result of a generation run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The pipeline ran and produced (or finished producing) the course.
    Completed {
        course: CourseOutline,
        media: CourseMedia,
    },
    /// A recently generated course already existed; it is returned unchanged
    /// and no service call was made.
    AlreadyComplete(CourseOutline),
    /// The course was complete but stale, and the reviewer declined to
    /// regenerate it. The record is untouched.
    Declined,
}

/// How a run starts given the record it finds. Variants are ordered by
/// priority; the first matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartPlan {
    /// No source materials on file. Fail before any service call.
    NoSources,
    /// An outline exists with no stage content and the config survived.
    /// Skip extraction and outline generation, go straight to filling.
    ResumeFilling,
    /// The course was fully generated moments ago. Return it as-is.
    ReturnExisting,
    /// Generated content exists but is not recent. Ask before discarding it.
    ConfirmThenRestart,
    /// Start from the top, clearing any generated content first.
    Restart,
}

/// Drives a course record through the full generation pipeline: config
/// resolution, outline, per-stage content fill, optional media, finalize.
/// The record is checkpointed after every step so an interrupted run can be
/// resumed instead of repeated. One run per course id at a time; a second
/// `generate` for the same id fails with [`GenerateError::RunActive`].
pub struct PipelineController {
    store: Arc<dyn CourseStore>,
    service: Arc<dyn GenerationService>,
    gate: Arc<dyn ApprovalGate>,
    progress: Arc<dyn ProgressSink>,
    options: PipelineOptions,
    locks: RunLocks,
}

impl PipelineController {
    pub fn new(
        store: Arc<dyn CourseStore>,
        service: Arc<dyn GenerationService>,
        gate: Arc<dyn ApprovalGate>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self::with_options(store, service, gate, progress, PipelineOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn CourseStore>,
        service: Arc<dyn GenerationService>,
        gate: Arc<dyn ApprovalGate>,
        progress: Arc<dyn ProgressSink>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            service,
            gate,
            progress,
            options,
            locks: RunLocks::new(),
        }
    }

    /// Run the pipeline for one course. On failure the error is reported to
    /// the progress sink and, where it helps the user, explained in the
    /// course conversation; partial results stay checkpointed either way.
    pub async fn generate(
        &self,
        course_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, GenerateError> {
        match self.try_generate(course_id, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.report_failure(course_id, &err).await;
                Err(err)
            }
        }
    }

    async fn try_generate(
        &self,
        course_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, GenerateError> {
        let _guard = self
            .locks
            .try_acquire(course_id)
            .ok_or_else(|| GenerateError::RunActive(course_id.to_owned()))?;

        let mut record = self
            .store
            .load(course_id)
            .await?
            .ok_or_else(|| GenerateError::CourseNotFound(course_id.to_owned()))?;

        let plan = decide_start(&record, Utc::now(), &self.options);
        tracing::debug!(course_id, ?plan, "generation start plan");
        match plan {
            StartPlan::NoSources => return Err(GenerateError::NoSources),
            StartPlan::ReturnExisting => {
                if let Some(course) = record.course.clone() {
                    tracing::info!(course_id, "course generated moments ago, returning it as-is");
                    self.progress.on_progress(&GenerationProgress::complete());
                    self.progress.on_complete(&course);
                    return Ok(RunOutcome::AlreadyComplete(course));
                }
            }
            StartPlan::ConfirmThenRestart => {
                if let Some(existing) = record.course.as_ref() {
                    if !self.gate.confirm_regenerate(existing).await {
                        tracing::info!(course_id, "regeneration declined, keeping existing course");
                        return Ok(RunOutcome::Declined);
                    }
                }
                record = self.clear_generated(course_id).await?;
            }
            StartPlan::Restart => {
                if record.course.is_some() || !record.media.is_empty() {
                    record = self.clear_generated(course_id).await?;
                }
            }
            StartPlan::ResumeFilling => {
                let filled = record
                    .course
                    .as_ref()
                    .map_or(0, |c| c.completed_stage_count());
                tracing::info!(course_id, filled, "resuming fill from persisted outline");
            }
        }

        ensure_live(cancel)?;
        self.progress.on_progress(&GenerationProgress::extracting());
        let resolver = ConfigResolver::new(self.service.as_ref());
        let config = match resolver
            .resolve(&record.transcript, &record.sources, record.config.as_ref())
            .await?
        {
            Resolution::Ready(config) => config,
            Resolution::NeedsApproval(candidate) => {
                match self.gate.review_config(&candidate).await {
                    ConfigDecision::Approve(config) => {
                        record = self
                            .store
                            .save(
                                course_id,
                                CoursePatch {
                                    config: Some(config.clone()),
                                    title: config.title_override().map(str::to_owned),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        config
                    }
                    ConfigDecision::Cancel => return Err(GenerateError::Cancelled),
                }
            }
        };

        ensure_live(cancel)?;
        let resume = matches!(plan, StartPlan::ResumeFilling);
        let mut course = match record.course.clone().filter(|_| resume) {
            Some(course) => course,
            None => {
                self.outline_step(course_id, &config, &record.transcript, cancel)
                    .await?
            }
        };

        let total = course.stages.len();
        self.progress
            .on_progress(&GenerationProgress::starting_stages(total));
        let filler = StageContentFiller::with_policy(self.service.as_ref(), self.options.fill);
        for index in 0..total {
            ensure_live(cancel)?;
            if course.stages[index].is_complete() {
                tracing::debug!(
                    course_id,
                    stage_id = course.stages[index].id,
                    "stage already filled, skipping"
                );
                continue;
            }
            let skeleton = course.stages[index].clone();
            self.progress.on_progress(&GenerationProgress::stage(
                index + 1,
                total,
                &skeleton.title,
            ));
            let content = filler.fill(&config, &skeleton).await?;
            ensure_live(cancel)?;
            course.stages[index].content = Some(content);
            self.store
                .save(
                    course_id,
                    CoursePatch {
                        course: Some(course.clone()),
                        stage_count: Some(index + 1),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let media = if config.include_video || config.include_podcast {
            ensure_live(cancel)?;
            self.progress.on_progress(&GenerationProgress::media());
            MediaAugmenter::new(self.service.as_ref())
                .augment(&config, &course)
                .await
                .into_media()
        } else {
            CourseMedia::default()
        };

        ensure_live(cancel)?;
        if let Some(title) = config.title_override() {
            course.title = title.to_owned();
        }
        course.generated_at = Some(Utc::now());
        self.progress.on_progress(&GenerationProgress::finalizing());
        self.store
            .save(
                course_id,
                CoursePatch {
                    title: Some(course.title.clone()),
                    course: Some(course.clone()),
                    media: Some(media.clone()),
                    stage_count: Some(course.stages.len()),
                    ..Default::default()
                },
            )
            .await?;

        self.progress.on_progress(&GenerationProgress::complete());
        self.progress.on_complete(&course);
        tracing::info!(course_id, stages = total, "course generation complete");
        Ok(RunOutcome::Completed { course, media })
    }

    /// Generate an outline and hold it at the review gate. Regeneration loops
    /// until the reviewer approves or cancels. Every generated outline is
    /// checkpointed before review so a cancelled run can still resume.
    async fn outline_step(
        &self,
        course_id: &str,
        config: &CourseConfig,
        transcript: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<CourseOutline, GenerateError> {
        let generator = OutlineGenerator::new(self.service.as_ref());
        loop {
            ensure_live(cancel)?;
            self.progress.on_progress(&GenerationProgress::outline());
            let outline = generator.generate(config, transcript).await?;
            ensure_live(cancel)?;
            self.checkpoint_outline(course_id, &outline).await?;
            match self.gate.review_outline(&outline).await {
                OutlineDecision::Approve(approved) => {
                    let approved =
                        sanitize_outline(approved, config).map_err(GenerateError::Outline)?;
                    if approved != outline {
                        self.checkpoint_outline(course_id, &approved).await?;
                    }
                    return Ok(approved);
                }
                OutlineDecision::Regenerate => {
                    tracing::info!(course_id, "outline rejected at review, generating a fresh one");
                }
                OutlineDecision::Cancel => return Err(GenerateError::Cancelled),
            }
        }
    }

    async fn checkpoint_outline(
        &self,
        course_id: &str,
        outline: &CourseOutline,
    ) -> Result<(), GenerateError> {
        self.store
            .save(
                course_id,
                CoursePatch {
                    title: Some(outline.title.clone()),
                    course: Some(outline.clone()),
                    stage_count: Some(outline.stages.len()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn clear_generated(&self, course_id: &str) -> Result<CourseRecord, GenerateError> {
        let record = self
            .store
            .save(
                course_id,
                CoursePatch {
                    clear_generated: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(record)
    }

    async fn report_failure(&self, course_id: &str, err: &GenerateError) {
        match err {
            GenerateError::Cancelled => {
                tracing::info!(course_id, "course generation cancelled");
                self.progress.on_progress(&GenerationProgress::idle());
            }
            GenerateError::RunActive(_) => {
                tracing::warn!(course_id, "generation already running, second run rejected");
            }
            _ => {
                tracing::error!(course_id, error = %err, "course generation failed");
                let user_message = err.user_message();
                self.progress
                    .on_progress(&GenerationProgress::failed(user_message.as_str()));
                self.progress.on_failed(err, &user_message);
                if err.appends_explanation() {
                    let note = ChatMessage::assistant(format!(
                        "I encountered an error while generating the course: {user_message}\n\n\
                         **What you can do:**\n\
                         - Try generating again (progress made so far has been saved)\n\
                         - Add more detail or sources to the planning conversation\n\
                         - Adjust the course configuration and retry"
                    ));
                    let _ = self
                        .store
                        .save(
                            course_id,
                            CoursePatch {
                                append_transcript: vec![note],
                                ..Default::default()
                            },
                        )
                        .await;
                }
            }
        }
    }

    /// See [`load_for_display`].
    pub async fn load_for_display(
        &self,
        course_id: &str,
    ) -> anyhow::Result<Option<CourseRecord>> {
        load_for_display(self.store.as_ref(), &self.options, course_id).await
    }
}

/// Load a record for display, clearing generated content that is stale and
/// has no sources backing it. An incomplete first stage counts as stale; the
/// config and conversation always survive the clear. A free function because
/// the read path needs no generation service behind it.
pub async fn load_for_display(
    store: &dyn CourseStore,
    options: &PipelineOptions,
    course_id: &str,
) -> anyhow::Result<Option<CourseRecord>> {
    let Some(record) = store.load(course_id).await? else {
        return Ok(None);
    };
    let Some(course) = record.course.as_ref() else {
        return Ok(Some(record));
    };

    let fresh = course
        .generated_at
        .is_some_and(|at| Utc::now().signed_duration_since(at) <= options.display_staleness);
    if course.first_stage_complete() && (fresh || record.has_sources()) {
        return Ok(Some(record));
    }

    tracing::info!(course_id, "clearing stale course content on load");
    let cleared = store
        .save(
            course_id,
            CoursePatch {
                clear_generated: true,
                ..Default::default()
            },
        )
        .await?;
    Ok(Some(cleared))
}

/// Pick the start plan for a record: missing sources fail fast, a
/// content-free outline resumes, recent complete content is returned, stale
/// complete content needs confirmation, everything else restarts.
fn decide_start(record: &CourseRecord, now: DateTime<Utc>, options: &PipelineOptions) -> StartPlan {
    if !record.has_sources() {
        return StartPlan::NoSources;
    }
    let Some(course) = record.course.as_ref() else {
        return StartPlan::Restart;
    };
    if course.stages.is_empty() {
        return StartPlan::Restart;
    }
    if !course.first_stage_complete() {
        if record.config.is_some() && !course.any_stage_complete() {
            return StartPlan::ResumeFilling;
        }
        return StartPlan::Restart;
    }
    match course.generated_at {
        Some(at) if now.signed_duration_since(at) <= options.recent_window => {
            StartPlan::ReturnExisting
        }
        _ => StartPlan::ConfirmThenRestart,
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), GenerateError> {
    if cancel.is_cancelled() {
        return Err(GenerateError::Cancelled);
    }
    Ok(())
}
