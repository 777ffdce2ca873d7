use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::content::FillPolicy;
use crate::course::{ChatMessage, CourseConfig, CourseMedia, CourseOutline, SourceFile};

/// One persisted course workspace: planning conversation, uploaded sources,
/// approved config, and whatever generated content exists so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseRecord {
    pub course_id: String,
    pub title: String,
    pub config: Option<CourseConfig>,
    pub course: Option<CourseOutline>,
    #[serde(default)]
    pub media: CourseMedia,
    #[serde(default)]
    pub sources: Vec<SourceFile>,
    #[serde(default)]
    pub transcript: Vec<ChatMessage>,
    /// Stages with durable content. Tracks the outline length once a run
    /// completes, and the completed prefix while one is underway.
    #[serde(default)]
    pub stage_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl CourseRecord {
    pub fn new(course_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            course_id: course_id.into(),
            title: title.into(),
            config: None,
            course: None,
            media: CourseMedia::default(),
            sources: Vec::new(),
            transcript: Vec::new(),
            stage_count: 0,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// When the current course content was finalized, if it ever was.
    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        self.course.as_ref().and_then(|course| course.generated_at)
    }

    /// Merge a partial update. `clear_generated` runs first so one patch can
    /// atomically drop stale content and write its replacement.
    pub fn apply(&mut self, patch: CoursePatch, now: DateTime<Utc>) {
        if patch.clear_generated {
            self.course = None;
            self.media = CourseMedia::default();
            self.stage_count = 0;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(config) = patch.config {
            self.config = Some(config);
        }
        if let Some(course) = patch.course {
            self.course = Some(course);
        }
        if let Some(media) = patch.media {
            self.media = media;
        }
        if let Some(stage_count) = patch.stage_count {
            self.stage_count = stage_count;
        }
        self.transcript.extend(patch.append_transcript);
        self.last_modified = now;
    }
}

/// A partial update to a [`CourseRecord`]. Absent fields keep their stored
/// values; the generated-content fields can be cleared wholesale with
/// `clear_generated`, which keeps the config, sources, and conversation.
#[derive(Debug, Clone, Default)]
pub struct CoursePatch {
    pub title: Option<String>,
    pub config: Option<CourseConfig>,
    pub course: Option<CourseOutline>,
    pub media: Option<CourseMedia>,
    pub stage_count: Option<usize>,
    pub append_transcript: Vec<ChatMessage>,
    pub clear_generated: bool,
}

/// Timing knobs for a pipeline run. The two staleness windows are settings
/// rather than constants; their defaults match long-standing behavior but
/// nothing downstream depends on the exact values.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub fill: FillPolicy,
    /// Content younger than this is returned as-is instead of regenerated.
    pub recent_window: TimeDelta,
    /// On the read path, content older than this with no sources on file is
    /// cleared rather than shown.
    pub display_staleness: TimeDelta,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fill: FillPolicy::default(),
            recent_window: TimeDelta::minutes(5),
            display_staleness: TimeDelta::hours(24),
        }
    }
}
