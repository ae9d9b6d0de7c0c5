use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    ArticleSection, ChatMessage, Curriculum, LearningPreferences, PresentationSlide, SectionId,
    Slide, SlideId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumRequest {
    pub topic: String,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<LearningPreferences>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleContentRequest {
    pub course_title: String,
    pub module_title: String,
    pub module_description: String,
    pub slide_titles: Vec<String>,
    pub prior_context: String,
    pub skip_image_selection: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleContent {
    pub slides: Vec<Slide>,
}

/// One resolved image: addresses exactly one block of one slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResolution {
    pub slide_index: usize,
    pub block_index: usize,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidesRequest {
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSelectionResponse {
    #[serde(default)]
    pub resolutions: Vec<ImageResolution>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrationResponse {
    /// One entry per requested slide, in slide order.
    #[serde(default)]
    pub audio_refs: Vec<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContext {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goals: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultantReply {
    pub text: String,
    #[serde(default)]
    pub ready_to_generate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_context: Option<ExtractedContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultRequest {
    pub history: Vec<ChatMessage>,
    pub input: String,
    pub is_first: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub history: Vec<ChatMessage>,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumEditRequest {
    pub current: Curriculum,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementResult {
    pub outline: Curriculum,
    pub response_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRequest {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSectionDraft {
    pub id: SectionId,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_keywords: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub title: String,
    pub overview: String,
    pub sections: Vec<ArticleSectionDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationSlideDraft {
    pub id: SlideId,
    pub title: String,
    pub points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_keywords: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationDraft {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_slides: Option<usize>,
    pub slides: Vec<PresentationSlideDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleImagesRequest {
    pub sections: Vec<ArticleSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleImagesResponse {
    #[serde(default)]
    pub images: HashMap<SectionId, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationImagesRequest {
    pub slides: Vec<PresentationSlide>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresentationImagesResponse {
    #[serde(default)]
    pub images: HashMap<SlideId, Vec<String>>,
}
