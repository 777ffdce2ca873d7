//! Generation service contract and the chat-completions implementation.
//!
//! Every pipeline step talks to the service through [`GenerationService`], so
//! tests and alternative backends can swap in their own implementation. The
//! shipped implementation drives an OpenAI-compatible chat completions
//! endpoint: each operation renders a prompt, requests a single completion,
//! and parses the JSON object embedded in the reply.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::course::{
    ChatMessage, ChatRole, ContentStyle, CourseConfig, CourseOutline, CourseStage,
    DialogueSegment, SourceFile, Speaker, StageContent, VideoScene,
};
use crate::error::ServiceError;
use crate::openai;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const DEFAULT_DESCRIPTION: &str = "A microlearning course";
const DEFAULT_OBJECTIVE: &str = "Learn key concepts";
const DEFAULT_AUDIENCE: &str = "General audience";
const DEFAULT_DURATION: &str = "15-20 minutes";
const DEFAULT_STAGE_DURATION: &str = "3-5 minutes";
const DEFAULT_ACCENT_PRIMARY: &str = "#4a90e2";
const DEFAULT_ACCENT_SECONDARY: &str = "#50c9c3";

const MIN_STAGE_COUNT: usize = 3;
const MAX_STAGE_COUNT: usize = 20;

/// How sure the extraction step is about each config field, 0.0 to 1.0.
/// Shown next to the candidate config so a reviewer knows which fields were
/// stated outright and which were guessed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldConfidence {
    pub title: f32,
    pub topic: f32,
    pub description: f32,
    pub objectives: f32,
    pub target_audience: f32,
    pub content_style: f32,
    pub stage_count: f32,
}

/// A machine-extracted config candidate awaiting human approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedConfig {
    pub config: CourseConfig,
    pub confidence: FieldConfidence,
}

/// Raw stage content as the service returns it. Fields the model omitted stay
/// `None` here; [`StageDraft::into_content`] replaces them with empty
/// collections so downstream consumers never see a hole.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StageDraft {
    pub introduction: Option<String>,
    pub sections: Option<Vec<crate::course::ContentSection>>,
    pub summary: Option<String>,
    pub interactive_elements: Option<Vec<crate::course::InteractiveElement>>,
    pub side_card: Option<crate::course::SideCard>,
}

impl StageDraft {
    pub fn into_content(self) -> StageContent {
        StageContent {
            introduction: self.introduction.unwrap_or_default(),
            sections: self.sections.unwrap_or_default(),
            summary: self.summary.unwrap_or_default(),
            interactive_elements: self.interactive_elements.unwrap_or_default(),
            side_card: self.side_card,
        }
    }
}

/// The external generative service the pipeline orchestrates.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Pull a candidate course config out of the planning conversation.
    async fn extract_config(
        &self,
        transcript: &[ChatMessage],
        sources: &[SourceFile],
    ) -> Result<ExtractedConfig, ServiceError>;

    /// Produce stage skeletons for an approved config. Content bodies stay
    /// empty; the filler populates them one stage at a time.
    async fn generate_outline(
        &self,
        config: &CourseConfig,
        transcript: &[ChatMessage],
    ) -> Result<CourseOutline, ServiceError>;

    /// Write the content body for one outline stage.
    async fn generate_stage_content(
        &self,
        config: &CourseConfig,
        stage: &CourseStage,
    ) -> Result<StageDraft, ServiceError>;

    /// Script a short narrated video covering the whole course.
    async fn generate_video_script(
        &self,
        config: &CourseConfig,
        course: &CourseOutline,
    ) -> Result<Vec<VideoScene>, ServiceError>;

    /// Script a host/expert podcast conversation covering the whole course.
    async fn generate_podcast_script(
        &self,
        config: &CourseConfig,
        course: &CourseOutline,
    ) -> Result<Vec<DialogueSegment>, ServiceError>;
}

/// Connection settings for [`ChatGenerationService`].
#[derive(Debug, Clone)]
pub struct ChatServiceConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl ChatServiceConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// [`GenerationService`] backed by an OpenAI-compatible chat endpoint.
pub struct ChatGenerationService {
    client: reqwest::Client,
    endpoint: String,
    config: ChatServiceConfig,
}

impl ChatGenerationService {
    pub fn new(config: ChatServiceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            endpoint: openai::chat_endpoint(&config.base_url),
            client,
            config,
        })
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, ServiceError> {
        openai::chat_text(
            &self.client,
            &self.endpoint,
            &self.config.api_key,
            &self.config.model,
            system,
            user,
            self.config.temperature,
            max_tokens,
        )
        .await
    }
}

#[async_trait]
impl GenerationService for ChatGenerationService {
    async fn extract_config(
        &self,
        transcript: &[ChatMessage],
        sources: &[SourceFile],
    ) -> Result<ExtractedConfig, ServiceError> {
        let conversation = render_transcript(transcript);
        let prompt = extraction_prompt(&conversation, sources);
        let reply = self.chat(EXTRACTION_SYSTEM, &prompt, 2000).await?;
        let raw = openai::extract_json_object(&reply)?;
        let plan: ConfigPlan = serde_json::from_str(raw)
            .map_err(|err| ServiceError::malformed(format!("config reply: {err}")))?;
        Ok(candidate_from_plan(plan, &conversation))
    }

    async fn generate_outline(
        &self,
        config: &CourseConfig,
        transcript: &[ChatMessage],
    ) -> Result<CourseOutline, ServiceError> {
        let prompt = outline_prompt(config, transcript);
        let reply = self.chat(OUTLINE_SYSTEM, &prompt, 3000).await?;
        let raw = openai::extract_json_object(&reply)?;
        outline_from_json(raw)
    }

    async fn generate_stage_content(
        &self,
        config: &CourseConfig,
        stage: &CourseStage,
    ) -> Result<StageDraft, ServiceError> {
        let prompt = stage_prompt(config, stage);
        let reply = self.chat(CONTENT_SYSTEM, &prompt, 4000).await?;
        let raw = openai::extract_json_object(&reply)?;
        let draft: StageDraft = serde_json::from_str(raw)
            .map_err(|err| ServiceError::malformed(format!("stage reply: {err}")))?;
        validate_stage_draft(&draft)?;
        Ok(draft)
    }

    async fn generate_video_script(
        &self,
        config: &CourseConfig,
        course: &CourseOutline,
    ) -> Result<Vec<VideoScene>, ServiceError> {
        let prompt = video_prompt(config, course);
        let reply = self.chat(MEDIA_SYSTEM, &prompt, 2000).await?;
        let raw = openai::extract_json_object(&reply)?;
        scenes_from_json(raw)
    }

    async fn generate_podcast_script(
        &self,
        config: &CourseConfig,
        course: &CourseOutline,
    ) -> Result<Vec<DialogueSegment>, ServiceError> {
        let prompt = podcast_prompt(config, course);
        let reply = self.chat(MEDIA_SYSTEM, &prompt, 3000).await?;
        let raw = openai::extract_json_object(&reply)?;
        dialogue_from_json(raw)
    }
}

fn render_transcript(transcript: &[ChatMessage]) -> String {
    transcript
        .iter()
        .map(|message| {
            let label = match message.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            format!("{label}: {}", message.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

const EXTRACTION_SYSTEM: &str = "You are an expert at extracting structured information from \
     conversations. Always respond with ONLY valid JSON, no additional text.";

fn extraction_prompt(conversation: &str, sources: &[SourceFile]) -> String {
    let file_names = if sources.is_empty() {
        "uploaded files".to_string()
    } else {
        sources
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        r#"You are an expert instructional designer. Analyze the following conversation about creating a microlearning course and extract the course configuration.

BEGIN_CONVERSATION
{conversation}
END_CONVERSATION

Uploaded files: {file_names}

Extract the following information and return ONLY valid JSON:
{{
  "title": "Course title (or null if not mentioned)",
  "topic": "Main topic or subject (or null if not mentioned)",
  "description": "Course description (or null if not mentioned)",
  "objectives": ["objective 1", "objective 2"],
  "targetAudience": "Target audience (or null if not mentioned)",
  "contentStyle": "formal" | "conversational" | "technical",
  "stageCount": number of stages (default 5),
  "estimatedDuration": "Estimated duration string (or null if not mentioned)",
  "confidence": {{
    "title": 0.0-1.0,
    "topic": 0.0-1.0,
    "description": 0.0-1.0,
    "objectives": 0.0-1.0,
    "targetAudience": 0.0-1.0,
    "contentStyle": 0.0-1.0,
    "stageCount": 0.0-1.0
  }}
}}

Confidence scoring:
- 1.0: explicitly stated ("title is X", "7 stages", "for developers")
- 0.7-0.9: strongly implied by the conversation or file names
- 0.4-0.6: reasonably inferred but ambiguous
- 0.0-0.3: not found, value is a guess or default

Be intelligent about inference: a missing title can be inferred from the topic
or file names at reduced confidence, and objectives can be inferred from any
discussion of learning goals. Return ONLY the JSON object, no additional text."#
    )
}

const OUTLINE_SYSTEM: &str = "You are an expert instructional designer. Always respond with ONLY \
     valid JSON matching the requested schema, no additional text.";

/// Messages of planning context carried into the outline prompt. Older
/// conversation turns rarely change the outline and inflate the request.
const OUTLINE_CONTEXT_MESSAGES: usize = 10;

fn outline_prompt(config: &CourseConfig, transcript: &[ChatMessage]) -> String {
    let objectives = if config.objectives.is_empty() {
        "Learn the key concepts of the topic".to_string()
    } else {
        config.objectives.join(", ")
    };
    let recent = if transcript.len() > OUTLINE_CONTEXT_MESSAGES {
        &transcript[transcript.len() - OUTLINE_CONTEXT_MESSAGES..]
    } else {
        transcript
    };
    let context = render_transcript(recent);
    let stage_count = config.stage_count;
    format!(
        r#"You are an expert instructional designer creating a microlearning course.

Course details:
- Title: {title}
- Topic: {topic}
- Description: {description}
- Learning objectives: {objectives}
- Target audience: {audience}
- Content style: {style}
- Number of stages: {stage_count}

BEGIN_PLANNING_CONVERSATION
{context}
END_PLANNING_CONVERSATION

Create a detailed course outline with EXACTLY {stage_count} stages.

Hard rules:
- Generate exactly {stage_count} stages, no more, no less.
- Each stage has one clear, specific learning objective.
- Each stage builds logically on the previous stages.
- Each stage is completable in 3-10 minutes.
- Do not include any fields beyond the schema below.
- Do not include null values; every field must be a valid string (stages is an array).

Return ONLY a single valid JSON object following this schema, with no text
before or after it:
{{
  "course": {{
    "title": "{title}",
    "description": "Course description",
    "duration": "{duration}",
    "stages": [
      {{
        "id": 1,
        "title": "Stage title",
        "objective": "Learning objective",
        "keyPoints": ["key point 1", "key point 2"],
        "estimatedDuration": "3-5 minutes"
      }}
    ]
  }}
}}

Before responding, silently count the stages you are about to output and
confirm there are EXACTLY {stage_count} entries in the stages array."#,
        title = config.title,
        topic = config.topic,
        description = config.description,
        audience = config.target_audience,
        style = config.content_style.as_str(),
        duration = config.estimated_duration,
    )
}

const CONTENT_SYSTEM: &str = "You are an expert course author. Always respond with ONLY valid \
     JSON matching the requested schema, no additional text.";

fn stage_prompt(config: &CourseConfig, stage: &CourseStage) -> String {
    format!(
        r#"You are creating content for stage {id} of a microlearning course.

Course context:
- Title: {title}
- Topic: {topic}
- Target audience: {audience}
- Content style: {style}

Stage details:
- Title: {stage_title}
- Learning objective: {objective}
- Key points: {key_points}

Create comprehensive, engaging content for this stage.

Hard rules:
- Introduction: 2-4 sentences, minimum 100 characters, that hook the learner.
- Sections: at least 2 detailed sections covering the key points, each with a
  descriptive heading and 3-5 sentences of substantive content. Use the items
  array for bullet lists.
- Summary: 2-3 sentences of key takeaways.
- Interactive elements: 1-2 quiz questions with complete, meaningful answer
  options (never placeholder letters) and an explanation for the correct one.
- Side card: helpful tips, best practices, or relevant statistics.

Return ONLY a JSON object with this structure:
{{
  "introduction": "Opening paragraph (minimum 100 characters)",
  "sections": [
    {{
      "heading": "Descriptive section heading",
      "content": "Detailed content, 3-5 sentences",
      "type": "text",
      "items": ["Bullet 1", "Bullet 2"]
    }}
  ],
  "summary": "Key takeaways (2-3 sentences)",
  "interactiveElements": [
    {{
      "type": "quiz",
      "data": {{
        "question": "Question text",
        "options": ["Complete answer 1", "Complete answer 2", "Complete answer 3"],
        "correctAnswer": "Complete answer 1",
        "explanation": "Why this answer is correct"
      }}
    }}
  ],
  "sideCard": {{
    "title": "Pro Tips",
    "content": "Helpful information",
    "tips": ["Tip 1", "Tip 2", "Tip 3"]
  }}
}}"#,
        id = stage.id,
        title = config.title,
        topic = config.topic,
        audience = config.target_audience,
        style = config.content_style.as_str(),
        stage_title = stage.title,
        objective = stage.objective,
        key_points = stage.key_points.join(", "),
    )
}

const MEDIA_SYSTEM: &str = "You are a media script writer. Always respond with ONLY valid JSON \
     matching the requested schema, no additional text.";

fn course_brief(course: &CourseOutline) -> String {
    let mut brief = format!("Course: {}\n{}\n", course.title, course.description);
    for stage in &course.stages {
        brief.push_str(&format!(
            "\nStage {}: {}\nObjective: {}\n",
            stage.id, stage.title, stage.objective
        ));
        if let Some(content) = &stage.content {
            if !content.summary.is_empty() {
                brief.push_str(&format!("Summary: {}\n", content.summary));
            }
        }
        if !stage.key_points.is_empty() {
            brief.push_str(&format!("Key points: {}\n", stage.key_points.join(", ")));
        }
    }
    brief
}

fn video_prompt(config: &CourseConfig, course: &CourseOutline) -> String {
    format!(
        r#"Create a video script giving a 3-5 minute overview of the course below.

Topic: {topic}
Target audience: {audience}

BEGIN_COURSE
{brief}
END_COURSE

Create 5-8 scenes. Each scene teaches one concept, names what should be on
screen, and carries the narration to speak over it.

Return ONLY a JSON object with this structure:
{{
  "scenes": [
    {{
      "sceneNumber": 1,
      "title": "Scene title",
      "narration": "What will be spoken",
      "visuals": "Description of what should be shown",
      "duration": 30
    }}
  ]
}}"#,
        topic = config.topic,
        audience = config.target_audience,
        brief = course_brief(course),
    )
}

fn podcast_prompt(config: &CourseConfig, course: &CourseOutline) -> String {
    format!(
        r#"Create a podcast script discussing the course below as a natural conversation
between a HOST and an EXPERT.

Topic: {topic}
Target audience: {audience}

BEGIN_COURSE
{brief}
END_COURSE

Hard rules:
- The host asks questions, introduces topics, and handles transitions.
- The expert explains with real-world examples and analogies.
- Each segment is 2-4 sentences with natural speech patterns and contractions.
- Alternate speakers; it should sound like a conversation, not a lecture.

Return ONLY a JSON object with this structure:
{{
  "episodes": [
    {{
      "episodeNumber": 1,
      "segments": [
        {{ "speaker": "host", "text": "Natural conversational text" }},
        {{ "speaker": "expert", "text": "Natural conversational text" }}
      ]
    }}
  ]
}}"#,
        topic = config.topic,
        audience = config.target_audience,
        brief = course_brief(course),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigPlan {
    title: Option<String>,
    topic: Option<String>,
    description: Option<String>,
    objectives: Option<Vec<String>>,
    target_audience: Option<String>,
    content_style: Option<String>,
    stage_count: Option<f64>,
    estimated_duration: Option<String>,
    confidence: Option<ConfidencePlan>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfidencePlan {
    title: Option<f32>,
    topic: Option<f32>,
    description: Option<f32>,
    objectives: Option<f32>,
    target_audience: Option<f32>,
    content_style: Option<f32>,
    stage_count: Option<f32>,
}

static STAGE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*-\s*(\d+)\s*(?:stages?|modules?|lessons?)").expect("static regex")
});
static STAGE_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:stages?|modules?|lessons?|parts?|sections?)")
        .expect("static regex")
});
static STAGE_COUNT_REVERSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:stages?|modules?|lessons?|parts?)\s*(?:of|:)?\s*(\d+)")
        .expect("static regex")
});
static QUOTED_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:title|named|called|titled)\s*(?:is|:)?\s*["']([^"']+)["']"#)
        .expect("static regex")
});

fn clamp_stage_count(count: usize) -> usize {
    count.clamp(MIN_STAGE_COUNT, MAX_STAGE_COUNT)
}

/// An explicitly stated count or range in the conversation beats whatever the
/// model guessed. Returns the count and the confidence it deserves.
fn stage_count_from_conversation(conversation: &str) -> Option<(usize, f32)> {
    if let Some(caps) = STAGE_RANGE_RE.captures(conversation) {
        let low: usize = caps[1].parse().ok()?;
        let high: usize = caps[2].parse().ok()?;
        if low >= MIN_STAGE_COUNT && high <= MAX_STAGE_COUNT && low < high {
            return Some((low.midpoint(high), 0.9));
        }
    }
    for re in [&*STAGE_COUNT_RE, &*STAGE_COUNT_REVERSED_RE] {
        for caps in re.captures_iter(conversation) {
            if let Ok(count) = caps[1].parse::<usize>() {
                if (MIN_STAGE_COUNT..=MAX_STAGE_COUNT).contains(&count) {
                    return Some((count, 1.0));
                }
            }
        }
    }
    None
}

fn title_from_conversation(conversation: &str) -> Option<String> {
    let caps = QUOTED_TITLE_RE.captures(conversation)?;
    let title = caps[1].trim();
    (title.len() > 3 && title.len() < 100).then(|| title.to_string())
}

fn parse_content_style(raw: Option<&str>) -> ContentStyle {
    match raw.map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("formal") => ContentStyle::Formal,
        Some(s) if s.eq_ignore_ascii_case("technical") => ContentStyle::Technical,
        _ => ContentStyle::Conversational,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Turns the model's raw extraction into a reviewed candidate: conversation
/// patterns override low-confidence guesses, missing confidences are backfilled
/// from whether the field was found, and presentational fields get defaults.
/// Title and topic are deliberately left blank when absent; the resolver
/// rejects such candidates rather than inventing an identity.
fn candidate_from_plan(plan: ConfigPlan, conversation: &str) -> ExtractedConfig {
    let mut title = non_blank(plan.title);
    let topic = non_blank(plan.topic);
    let description = non_blank(plan.description);
    let objectives: Vec<String> = plan
        .objectives
        .unwrap_or_default()
        .into_iter()
        .filter_map(|o| non_blank(Some(o)))
        .collect();
    let target_audience = non_blank(plan.target_audience);
    let estimated_duration = non_blank(plan.estimated_duration);

    let mut stage_count = plan
        .stage_count
        .filter(|n| n.is_finite() && *n >= 1.0)
        .map(|n| clamp_stage_count(n.round() as usize));

    let planned = plan.confidence.unwrap_or_default();
    let mut confidence = FieldConfidence {
        title: planned
            .title
            .unwrap_or(if title.is_some() { 0.6 } else { 0.0 }),
        topic: planned
            .topic
            .unwrap_or(if topic.is_some() { 0.7 } else { 0.3 }),
        description: planned
            .description
            .unwrap_or(if description.is_some() { 0.6 } else { 0.0 }),
        objectives: planned
            .objectives
            .unwrap_or(if objectives.is_empty() { 0.0 } else { 0.7 }),
        target_audience: planned
            .target_audience
            .unwrap_or(if target_audience.is_some() { 0.7 } else { 0.0 }),
        content_style: planned.content_style.unwrap_or(0.5),
        stage_count: planned.stage_count.unwrap_or(0.3),
    };

    if let Some((count, matched_confidence)) = stage_count_from_conversation(conversation) {
        tracing::debug!(count, "stage count stated in conversation");
        stage_count = Some(count);
        confidence.stage_count = matched_confidence;
    }
    if let Some(stated) = title_from_conversation(conversation) {
        tracing::debug!(title = %stated, "course title stated in conversation");
        title = Some(stated);
        confidence.title = 1.0;
    }

    let config = CourseConfig {
        title: title.unwrap_or_default(),
        topic: topic.unwrap_or_default(),
        description: description.unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
        objectives: if objectives.is_empty() {
            vec![DEFAULT_OBJECTIVE.to_string()]
        } else {
            objectives
        },
        target_audience: target_audience.unwrap_or_else(|| DEFAULT_AUDIENCE.to_string()),
        content_style: parse_content_style(plan.content_style.as_deref()),
        stage_count: stage_count.unwrap_or(5),
        estimated_duration: estimated_duration.unwrap_or_else(|| DEFAULT_DURATION.to_string()),
        accent_color1: DEFAULT_ACCENT_PRIMARY.to_string(),
        accent_color2: DEFAULT_ACCENT_SECONDARY.to_string(),
        include_video: false,
        include_podcast: false,
    };
    ExtractedConfig { config, confidence }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutlinePlanCourse {
    title: Option<String>,
    description: Option<String>,
    duration: Option<String>,
    stages: Vec<OutlinePlanStage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OutlinePlanStage {
    id: Option<u32>,
    title: Option<String>,
    objective: Option<String>,
    key_points: Vec<String>,
    estimated_duration: Option<String>,
}

// Models sometimes drop the "course" wrapper the schema asks for.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OutlineEnvelope {
    Wrapped { course: OutlinePlanCourse },
    Bare(OutlinePlanCourse),
}

fn outline_from_json(raw: &str) -> Result<CourseOutline, ServiceError> {
    let envelope: OutlineEnvelope = serde_json::from_str(raw)
        .map_err(|err| ServiceError::malformed(format!("outline reply: {err}")))?;
    let plan = match envelope {
        OutlineEnvelope::Wrapped { course } => course,
        OutlineEnvelope::Bare(course) => course,
    };
    if plan.stages.is_empty() {
        return Err(ServiceError::malformed("outline reply contains no stages"));
    }
    let mut stages = Vec::with_capacity(plan.stages.len());
    for (index, stage) in plan.stages.into_iter().enumerate() {
        let title = non_blank(stage.title)
            .ok_or_else(|| ServiceError::malformed(format!("outline stage {} has no title", index + 1)))?;
        stages.push(CourseStage {
            id: stage.id.unwrap_or(index as u32 + 1),
            title,
            objective: non_blank(stage.objective).unwrap_or_default(),
            key_points: stage.key_points,
            estimated_duration: Some(
                non_blank(stage.estimated_duration)
                    .unwrap_or_else(|| DEFAULT_STAGE_DURATION.to_string()),
            ),
            content: None,
        });
    }
    Ok(CourseOutline {
        title: non_blank(plan.title).unwrap_or_default(),
        description: non_blank(plan.description).unwrap_or_default(),
        duration: non_blank(plan.duration).unwrap_or_default(),
        stages,
        generated_at: None,
    })
}

const MIN_INTRODUCTION_CHARS: usize = 100;
const MIN_SECTIONS: usize = 2;
const MIN_HEADING_CHARS: usize = 5;
const MIN_SECTION_CHARS: usize = 50;

/// Substance checks on generated stage content. A reply that parses but is
/// hollow counts as a failed attempt so the retry loop asks again.
fn validate_stage_draft(draft: &StageDraft) -> Result<(), ServiceError> {
    let introduction = draft.introduction.as_deref().unwrap_or("").trim();
    if introduction.len() < MIN_INTRODUCTION_CHARS {
        return Err(ServiceError::malformed(format!(
            "introduction must be at least {MIN_INTRODUCTION_CHARS} characters (got {})",
            introduction.len()
        )));
    }
    let sections = draft.sections.as_deref().unwrap_or(&[]);
    if sections.len() < MIN_SECTIONS {
        return Err(ServiceError::malformed(format!(
            "stage needs at least {MIN_SECTIONS} sections (got {})",
            sections.len()
        )));
    }
    for (index, section) in sections.iter().enumerate() {
        if section.heading.trim().len() < MIN_HEADING_CHARS {
            return Err(ServiceError::malformed(format!(
                "section {} heading is too short",
                index + 1
            )));
        }
        if section.content.trim().len() < MIN_SECTION_CHARS {
            return Err(ServiceError::malformed(format!(
                "section {} content is too short (minimum {MIN_SECTION_CHARS} characters)",
                index + 1
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoPlan {
    scenes: Vec<VideoPlanScene>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VideoPlanScene {
    scene_number: Option<u32>,
    title: Option<String>,
    narration: Option<String>,
    visuals: Option<String>,
    duration: Option<f64>,
}

fn scenes_from_json(raw: &str) -> Result<Vec<VideoScene>, ServiceError> {
    let plan: VideoPlan = serde_json::from_str(raw)
        .map_err(|err| ServiceError::malformed(format!("video reply: {err}")))?;
    if plan.scenes.is_empty() {
        return Err(ServiceError::malformed("video reply contains no scenes"));
    }
    let scenes = plan
        .scenes
        .into_iter()
        .enumerate()
        .map(|(index, scene)| VideoScene {
            id: index as u32 + 1,
            title: scene.title.unwrap_or_default(),
            narration: scene.narration.unwrap_or_default(),
            visuals: scene.visuals.unwrap_or_default(),
            duration_secs: scene
                .duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| d.round() as u32),
        })
        .collect();
    Ok(scenes)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodcastPlan {
    episodes: Vec<PodcastPlanEpisode>,
    // Some models return a flat dialogue array instead of episodes.
    dialogue: Vec<DialoguePlanSegment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodcastPlanEpisode {
    segments: Vec<DialoguePlanSegment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DialoguePlanSegment {
    speaker: Option<String>,
    text: Option<String>,
    // The episode schema calls the spoken text "content".
    content: Option<String>,
}

fn dialogue_from_json(raw: &str) -> Result<Vec<DialogueSegment>, ServiceError> {
    let plan: PodcastPlan = serde_json::from_str(raw)
        .map_err(|err| ServiceError::malformed(format!("podcast reply: {err}")))?;
    let segments: Vec<DialoguePlanSegment> = if plan.episodes.is_empty() {
        plan.dialogue
    } else {
        plan.episodes
            .into_iter()
            .flat_map(|episode| episode.segments)
            .collect()
    };
    let dialogue: Vec<DialogueSegment> = segments
        .into_iter()
        .filter_map(|segment| {
            let text = non_blank(segment.text.or(segment.content))?;
            let speaker = match segment.speaker.as_deref() {
                Some(s) if s.trim().eq_ignore_ascii_case("expert") => Speaker::Expert,
                _ => Speaker::Host,
            };
            Some(DialogueSegment { speaker, text })
        })
        .collect();
    if dialogue.is_empty() {
        return Err(ServiceError::malformed(
            "podcast reply contains no dialogue segments",
        ));
    }
    Ok(dialogue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::ContentSection;

    fn plan_with(title: Option<&str>, topic: Option<&str>) -> ConfigPlan {
        ConfigPlan {
            title: title.map(String::from),
            topic: topic.map(String::from),
            ..ConfigPlan::default()
        }
    }

    #[test]
    fn candidate_applies_defaults_but_not_identity() {
        let extracted = candidate_from_plan(plan_with(None, Some("Rust")), "");
        assert_eq!(extracted.config.title, "");
        assert_eq!(extracted.config.topic, "Rust");
        assert_eq!(extracted.config.description, DEFAULT_DESCRIPTION);
        assert_eq!(extracted.config.objectives, vec![DEFAULT_OBJECTIVE]);
        assert_eq!(extracted.config.target_audience, DEFAULT_AUDIENCE);
        assert_eq!(extracted.config.stage_count, 5);
        assert_eq!(extracted.config.estimated_duration, DEFAULT_DURATION);
        assert_eq!(extracted.config.accent_color1, DEFAULT_ACCENT_PRIMARY);
        assert!(!extracted.config.include_video);
    }

    #[test]
    fn explicit_stage_count_beats_model_guess() {
        let mut plan = plan_with(Some("T"), Some("T"));
        plan.stage_count = Some(5.0);
        let extracted = candidate_from_plan(plan, "user: I want 7 stages please");
        assert_eq!(extracted.config.stage_count, 7);
        assert_eq!(extracted.confidence.stage_count, 1.0);
    }

    #[test]
    fn stage_count_range_takes_midpoint() {
        let extracted = candidate_from_plan(ConfigPlan::default(), "maybe 6-8 stages?");
        assert_eq!(extracted.config.stage_count, 7);
        assert_eq!(extracted.confidence.stage_count, 0.9);
    }

    #[test]
    fn out_of_range_counts_are_ignored() {
        assert_eq!(stage_count_from_conversation("give me 40 stages"), None);
        assert_eq!(stage_count_from_conversation("2 stages"), None);
    }

    #[test]
    fn quoted_title_is_picked_up_with_case_preserved() {
        let extracted = candidate_from_plan(
            ConfigPlan::default(),
            r#"Assistant: sure. User: call it titled "Rust Without Fear" thanks"#,
        );
        assert_eq!(extracted.config.title, "Rust Without Fear");
        assert_eq!(extracted.confidence.title, 1.0);
    }

    #[test]
    fn model_stage_count_is_clamped() {
        let mut plan = ConfigPlan::default();
        plan.stage_count = Some(50.0);
        let extracted = candidate_from_plan(plan, "");
        assert_eq!(extracted.config.stage_count, MAX_STAGE_COUNT);
    }

    #[test]
    fn confidence_backfill_reflects_presence() {
        let extracted = candidate_from_plan(plan_with(Some("T"), None), "");
        assert_eq!(extracted.confidence.title, 0.6);
        assert_eq!(extracted.confidence.topic, 0.3);
        assert_eq!(extracted.confidence.content_style, 0.5);
    }

    #[test]
    fn outline_parses_wrapped_and_bare_replies() {
        let wrapped = r#"{"course":{"title":"T","description":"D","duration":"10 min",
            "stages":[{"id":1,"title":"One","objective":"O","keyPoints":["a"],"estimatedDuration":"3 minutes"}]}}"#;
        let bare = r#"{"title":"T","stages":[{"title":"One"}]}"#;
        let outline = outline_from_json(wrapped).unwrap();
        assert_eq!(outline.stages.len(), 1);
        assert_eq!(outline.stages[0].key_points, vec!["a"]);
        let outline = outline_from_json(bare).unwrap();
        assert_eq!(outline.stages[0].id, 1);
        assert_eq!(
            outline.stages[0].estimated_duration.as_deref(),
            Some(DEFAULT_STAGE_DURATION)
        );
    }

    #[test]
    fn outline_without_stages_is_malformed() {
        let err = outline_from_json(r#"{"course":{"title":"T","stages":[]}}"#).unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[test]
    fn outline_stage_without_title_is_malformed() {
        let err = outline_from_json(r#"{"stages":[{"objective":"O"}]}"#).unwrap_err();
        assert!(err.to_string().contains("stage 1"));
    }

    fn substantive_draft() -> StageDraft {
        let section = |heading: &str| ContentSection {
            heading: heading.to_string(),
            content: "x".repeat(MIN_SECTION_CHARS),
            kind: None,
            items: Vec::new(),
        };
        StageDraft {
            introduction: Some("y".repeat(MIN_INTRODUCTION_CHARS)),
            sections: Some(vec![section("First heading"), section("Second heading")]),
            summary: Some("Summary.".to_string()),
            interactive_elements: None,
            side_card: None,
        }
    }

    #[test]
    fn substantive_draft_passes_validation() {
        assert!(validate_stage_draft(&substantive_draft()).is_ok());
    }

    #[test]
    fn hollow_drafts_are_rejected() {
        let mut draft = substantive_draft();
        draft.introduction = Some("Too short.".to_string());
        assert!(validate_stage_draft(&draft).is_err());

        let mut draft = substantive_draft();
        draft.sections.as_mut().unwrap().pop();
        assert!(validate_stage_draft(&draft).is_err());

        let mut draft = substantive_draft();
        draft.sections.as_mut().unwrap()[0].content = "thin".to_string();
        assert!(validate_stage_draft(&draft).is_err());
    }

    #[test]
    fn draft_normalization_fills_missing_collections() {
        let content = StageDraft::default().into_content();
        assert!(content.sections.is_empty());
        assert!(content.interactive_elements.is_empty());
        assert!(content.side_card.is_none());
        assert_eq!(content.introduction, "");
    }

    #[test]
    fn scenes_are_renumbered_sequentially() {
        let raw = r#"{"scenes":[
            {"sceneNumber":7,"title":"A","narration":"n","visuals":"v","duration":30},
            {"title":"B","narration":"n2","visuals":"v2"}]}"#;
        let scenes = scenes_from_json(raw).unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].id, 1);
        assert_eq!(scenes[1].id, 2);
        assert_eq!(scenes[0].duration_secs, Some(30));
        assert_eq!(scenes[1].duration_secs, None);
    }

    #[test]
    fn empty_scene_list_is_malformed() {
        assert!(scenes_from_json(r#"{"scenes":[]}"#).is_err());
    }

    #[test]
    fn podcast_episodes_flatten_in_order() {
        let raw = r#"{"episodes":[
            {"episodeNumber":1,"segments":[
                {"speaker":"Host","content":"Welcome"},
                {"speaker":"Expert","content":"Thanks"}]},
            {"episodeNumber":2,"segments":[
                {"speaker":"host","text":"Next up"}]}]}"#;
        let dialogue = dialogue_from_json(raw).unwrap();
        assert_eq!(dialogue.len(), 3);
        assert_eq!(dialogue[0].speaker, Speaker::Host);
        assert_eq!(dialogue[1].speaker, Speaker::Expert);
        assert_eq!(dialogue[2].text, "Next up");
    }

    #[test]
    fn flat_dialogue_reply_is_accepted() {
        let raw = r#"{"dialogue":[{"speaker":"expert","text":"Hello there"}]}"#;
        let dialogue = dialogue_from_json(raw).unwrap();
        assert_eq!(dialogue[0].speaker, Speaker::Expert);
    }

    #[test]
    fn podcast_without_dialogue_is_malformed() {
        assert!(dialogue_from_json(r#"{"episodes":[]}"#).is_err());
        assert!(dialogue_from_json(r#"{"episodes":[{"segments":[{"speaker":"host"}]}]}"#).is_err());
    }

    #[test]
    fn transcript_renders_with_role_labels() {
        let transcript = vec![
            ChatMessage::user("Make a course"),
            ChatMessage::assistant("On what topic?"),
        ];
        let rendered = render_transcript(&transcript);
        assert_eq!(rendered, "User: Make a course\n\nAssistant: On what topic?");
    }

    #[test]
    fn outline_prompt_keeps_only_recent_context() {
        let config = CourseConfig {
            title: "T".into(),
            topic: "Topic".into(),
            stage_count: 4,
            ..CourseConfig::default()
        };
        let transcript: Vec<ChatMessage> = (0..15)
            .map(|i| ChatMessage::user(format!("message {i}")))
            .collect();
        let prompt = outline_prompt(&config, &transcript);
        assert!(prompt.contains("EXACTLY 4 stages"));
        assert!(prompt.contains("message 14"));
        assert!(!prompt.contains("message 4\n"));
    }
}
