use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

macro_rules! uuid_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(ModuleId);
id_newtype!(SlideId);
id_newtype!(SectionId);

uuid_newtype!(CourseId);
uuid_newtype!(ArticleId);
uuid_newtype!(PresentationId);

/// Image reference carried by an image block.
///
/// On the wire an absent field is `Absent`, `null` is `Pending` (selection
/// requested but not resolved yet) and a string is a resolved URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ImageRef {
    #[default]
    Absent,
    Pending,
    Resolved(String),
}

impl ImageRef {
    pub fn is_absent(&self) -> bool {
        matches!(self, ImageRef::Absent)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ImageRef::Resolved(_))
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ImageRef::Resolved(url) => Some(url),
            _ => None,
        }
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ImageRef::Resolved(url) => serializer.serialize_some(url),
            ImageRef::Absent | ImageRef::Pending => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)? {
            Some(url) => ImageRef::Resolved(url),
            None => ImageRef::Pending,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePosition {
    Hero,
    Inline,
    Grid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPair {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        content: String,
    },
    Image {
        keywords: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<ImagePosition>,
        #[serde(default, skip_serializing_if = "ImageRef::is_absent")]
        image_url: ImageRef,
    },
    Quiz {
        question: String,
        options: Vec<String>,
        correct_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    FunFact {
        fact: String,
    },
    Table {
        markdown: String,
    },
    NotesSummary {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        points: Vec<String>,
    },
    FillBlank {
        sentence: String,
        answer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    ShortAnswer {
        question: String,
        expected_answer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    Reflection {
        prompt: String,
    },
    #[serde(rename = "match_following")]
    MatchPairs {
        pairs: Vec<MatchPair>,
    },
}

impl ContentBlock {
    pub fn image_ref(&self) -> Option<&ImageRef> {
        match self {
            ContentBlock::Image { image_url, .. } => Some(image_url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub id: SlideId,
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub title: String,
    pub description: String,
    pub slides: Vec<Slide>,
    #[serde(default)]
    pub loaded: bool,
    #[serde(default)]
    pub narration_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub topic: String,
    pub title: String,
    pub description: String,
    pub modules: Vec<Module>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Course {
    /// Builds the unloaded skeleton: one module per outline entry, every
    /// slide title-only.
    pub fn skeleton(topic: impl Into<String>, curriculum: &Curriculum, now: DateTime<Utc>) -> Self {
        Self {
            id: CourseId::new(),
            topic: topic.into(),
            title: curriculum.title.clone(),
            description: curriculum.description.clone(),
            modules: curriculum
                .modules
                .iter()
                .map(|outline| Module {
                    id: outline.id.clone(),
                    title: outline.title.clone(),
                    description: outline.description.clone(),
                    slides: outline
                        .slides
                        .iter()
                        .map(|slide| Slide {
                            id: slide.id.clone(),
                            title: slide.title.clone(),
                            blocks: Vec::new(),
                            narration: None,
                        })
                        .collect(),
                    loaded: false,
                    narration_ready: false,
                })
                .collect(),
            created_at: now,
            last_accessed: now,
        }
    }

    pub fn has_content(&self) -> bool {
        self.modules.iter().any(|module| module.loaded)
    }

    /// Outline view of an existing course, used when resuming from history.
    pub fn outline(&self) -> Curriculum {
        Curriculum {
            title: self.title.clone(),
            overview: String::new(),
            description: self.description.clone(),
            learning_goals: Vec::new(),
            modules: self
                .modules
                .iter()
                .map(|module| ModuleOutline {
                    id: module.id.clone(),
                    title: module.title.clone(),
                    description: module.description.clone(),
                    slides: module
                        .slides
                        .iter()
                        .map(|slide| SlideOutline {
                            id: slide.id.clone(),
                            title: slide.title.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideOutline {
    pub id: SlideId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOutline {
    pub id: ModuleId,
    pub title: String,
    pub description: String,
    pub slides: Vec<SlideOutline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Curriculum {
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub learning_goals: Vec<String>,
    pub modules: Vec<ModuleOutline>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    pub fn label(self) -> &'static str {
        match self {
            ChatRole::User => "USER",
            ChatRole::Model => "MODEL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    Quick,
    #[default]
    Standard,
    Deep,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LearningPreferences {
    #[serde(default)]
    pub knowledge_level: KnowledgeLevel,
    #[serde(default)]
    pub preferred_depth: Depth,
    #[serde(default)]
    pub custom_instructions: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningMode {
    #[default]
    Curriculum,
    Article,
    Presentation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSection {
    pub id: SectionId,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_keywords: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub topic: String,
    pub title: String,
    pub overview: String,
    pub sections: Vec<ArticleSection>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationSlide {
    pub id: SlideId,
    pub title: String,
    pub points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_keywords: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    pub id: PresentationId,
    pub topic: String,
    pub title: String,
    pub total_slides: usize,
    pub slides: Vec<PresentationSlide>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_block(json: &str) -> ContentBlock {
        serde_json::from_str(json).expect("image block")
    }

    #[test]
    fn image_ref_distinguishes_absent_null_and_url() {
        let absent = image_block(r#"{"type":"image","keywords":"atom"}"#);
        let pending = image_block(r#"{"type":"image","keywords":"atom","image_url":null}"#);
        let resolved =
            image_block(r#"{"type":"image","keywords":"atom","image_url":"https://x/a.png"}"#);

        assert_eq!(absent.image_ref(), Some(&ImageRef::Absent));
        assert_eq!(pending.image_ref(), Some(&ImageRef::Pending));
        assert_eq!(
            resolved.image_ref(),
            Some(&ImageRef::Resolved("https://x/a.png".into()))
        );
    }

    #[test]
    fn pending_image_serializes_as_null_and_absent_is_omitted() {
        let pending = serde_json::to_value(ContentBlock::Image {
            keywords: "atom".into(),
            caption: None,
            position: None,
            image_url: ImageRef::Pending,
        })
        .expect("json");
        assert!(pending.get("image_url").expect("field").is_null());

        let absent = serde_json::to_value(ContentBlock::Image {
            keywords: "atom".into(),
            caption: None,
            position: None,
            image_url: ImageRef::Absent,
        })
        .expect("json");
        assert!(absent.get("image_url").is_none());
    }

    #[test]
    fn match_pairs_keep_wire_name() {
        let block: ContentBlock = serde_json::from_str(
            r#"{"type":"match_following","pairs":[{"left":"H","right":"Hydrogen"}]}"#,
        )
        .expect("block");
        assert!(matches!(block, ContentBlock::MatchPairs { ref pairs } if pairs.len() == 1));
    }

    #[test]
    fn skeleton_follows_outline_and_starts_unloaded() {
        let curriculum = Curriculum {
            title: "Optics".into(),
            overview: String::new(),
            description: "Light".into(),
            learning_goals: Vec::new(),
            modules: vec![ModuleOutline {
                id: "m1".into(),
                title: "Reflection".into(),
                description: "Mirrors".into(),
                slides: vec![
                    SlideOutline {
                        id: "s1".into(),
                        title: "Angles".into(),
                    },
                    SlideOutline {
                        id: "s2".into(),
                        title: "Images".into(),
                    },
                ],
            }],
        };

        let course = Course::skeleton("optics", &curriculum, Utc::now());
        assert_eq!(course.modules.len(), 1);
        assert_eq!(course.modules[0].slides.len(), 2);
        assert!(!course.modules[0].loaded);
        assert!(course.modules[0].slides.iter().all(|s| s.blocks.is_empty()));
        assert!(!course.has_content());
        assert_eq!(course.outline(), curriculum);
    }
}
