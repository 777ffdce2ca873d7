use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder title the extraction step emits when the conversation never
/// named the course. It must never override a generated outline title.
pub const UNTITLED_TITLE: &str = "Untitled Course";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentStyle {
    Formal,
    #[default]
    Conversational,
    Technical,
}

impl ContentStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Formal => "formal",
            Self::Conversational => "conversational",
            Self::Technical => "technical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseConfig {
    pub title: String,
    pub topic: String,
    pub description: String,
    pub objectives: Vec<String>,
    pub target_audience: String,
    pub content_style: ContentStyle,
    pub stage_count: usize,
    pub estimated_duration: String,
    pub accent_color1: String,
    pub accent_color2: String,
    pub include_video: bool,
    pub include_podcast: bool,
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            topic: String::new(),
            description: String::new(),
            objectives: Vec::new(),
            target_audience: String::new(),
            content_style: ContentStyle::default(),
            stage_count: 5,
            estimated_duration: String::new(),
            accent_color1: String::new(),
            accent_color2: String::new(),
            include_video: false,
            include_podcast: false,
        }
    }
}

impl CourseConfig {
    /// Title to stamp onto generated content, if the config carries a real
    /// one. The sentinel placeholder defers to whatever the service produced.
    pub fn title_override(&self) -> Option<&str> {
        let title = self.title.trim();
        (!title.is_empty() && title != UNTITLED_TITLE).then_some(title)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseOutline {
    pub title: String,
    pub description: String,
    pub duration: String,
    #[serde(default)]
    pub stages: Vec<CourseStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl CourseOutline {
    pub fn first_stage_complete(&self) -> bool {
        self.stages.first().is_some_and(CourseStage::is_complete)
    }

    pub fn any_stage_complete(&self) -> bool {
        self.stages.iter().any(CourseStage::is_complete)
    }

    pub fn completed_stage_count(&self) -> usize {
        self.stages.iter().filter(|s| s.is_complete()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", from = "StageDe")]
pub struct CourseStage {
    pub id: u32,
    pub title: String,
    pub objective: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub key_points: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<StageContent>,
}

impl CourseStage {
    /// The single completeness predicate: an outline-only stage has no
    /// content, a generated one has a non-empty body.
    pub fn is_complete(&self) -> bool {
        self.content.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// Deserialization shape accepting both the canonical nested `content` object
/// and older records that stored the content fields flat on the stage. The
/// flat variant is folded into `StageContent` here so the rest of the code
/// only ever sees the nested shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageDe {
    #[serde(default)]
    id: u32,
    #[serde(default)]
    title: String,
    #[serde(default)]
    objective: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    estimated_duration: Option<String>,
    #[serde(default)]
    content: Option<StageContent>,
    #[serde(default)]
    introduction: Option<String>,
    #[serde(default)]
    sections: Vec<ContentSection>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    interactive_elements: Vec<InteractiveElement>,
    #[serde(default)]
    side_card: Option<SideCard>,
}

impl From<StageDe> for CourseStage {
    fn from(de: StageDe) -> Self {
        let content = de.content.or_else(|| {
            let flat = StageContent {
                introduction: de.introduction.unwrap_or_default(),
                sections: de.sections,
                summary: de.summary.unwrap_or_default(),
                interactive_elements: de.interactive_elements,
                side_card: de.side_card,
            };
            (!flat.is_empty()).then_some(flat)
        });

        Self {
            id: de.id,
            title: de.title,
            objective: de.objective,
            key_points: de.key_points,
            estimated_duration: de.estimated_duration,
            content,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageContent {
    #[serde(default)]
    pub introduction: String,
    #[serde(default)]
    pub sections: Vec<ContentSection>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactive_elements: Vec<InteractiveElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_card: Option<SideCard>,
}

impl StageContent {
    pub fn is_empty(&self) -> bool {
        self.introduction.trim().is_empty() && self.sections.is_empty() && self.summary.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Text,
    List,
    Code,
    Diagram,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentSection {
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SectionKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveElement {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SideCard {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoScene {
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub narration: String,
    #[serde(default)]
    pub visuals: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Host,
    Expert,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialogueSegment {
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseMedia {
    pub video_scenes: Vec<VideoScene>,
    pub podcast_dialogue: Vec<DialogueSegment>,
}

impl CourseMedia {
    pub fn is_empty(&self) -> bool {
        self.video_scenes.is_empty() && self.podcast_dialogue.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub id: String,
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
}

impl SourceFile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            uploaded_at: Utc::now(),
        }
    }
}
