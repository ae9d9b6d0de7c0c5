use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::{
    domain::{
        Article, ArticleSection, ChatMessage, Course, CourseId, Curriculum, LearningMode,
        LearningPreferences, Presentation, PresentationSlide, SectionId, Slide, SlideId,
    },
    protocol::{
        ArticleDraft, ChatRequest, ConsultRequest, ConsultantReply, CurriculumRequest,
        DraftRequest, ImageResolution, ModuleContent, ModuleContentRequest, PresentationDraft,
        RefinementResult,
    },
};
use storage::PersistentStore;
use tokio::sync::{broadcast, mpsc, Mutex};

pub mod config;
mod enrich;
pub mod error;
mod history;
pub mod http_collaborator;
pub mod merge;
mod navigation;
mod phase;
mod prefetch;

pub use config::{load_settings, EngineSettings};
pub use error::{EngineError, GenerationStep};
pub use history::{push_front_unique, PreferencesUpdate};
pub use http_collaborator::HttpCollaborator;
pub use navigation::{Direction, NavigationOutcome, Position};
pub use phase::Phase;
pub use prefetch::RequestPacer;

pub const REFINEMENT_APOLOGY: &str = "Sorry, I had trouble making those changes. Please try again.";
pub const CHAT_APOLOGY: &str = "Sorry, I had trouble responding. Please try again.";

/// The external content generation service.
#[async_trait]
pub trait GenerationCollaborator: Send + Sync {
    async fn generate_curriculum_outline(&self, request: CurriculumRequest) -> Result<Curriculum>;
    async fn generate_module_content(&self, request: ModuleContentRequest)
        -> Result<ModuleContent>;
    /// Yields zero or more resolutions, each addressing one image block, in
    /// whatever order they complete.
    async fn select_images_for_module(
        &self,
        slides: Vec<Slide>,
    ) -> Result<BoxStream<'static, ImageResolution>>;
    /// One entry per slide, in slide order.
    async fn synthesize_narration(&self, slides: Vec<Slide>) -> Result<Vec<Option<String>>>;
    async fn generate_article(&self, request: DraftRequest) -> Result<ArticleDraft>;
    async fn fetch_article_images(
        &self,
        sections: Vec<ArticleSection>,
    ) -> Result<HashMap<SectionId, String>>;
    async fn generate_presentation(&self, request: DraftRequest) -> Result<PresentationDraft>;
    async fn fetch_presentation_images(
        &self,
        slides: Vec<PresentationSlide>,
    ) -> Result<HashMap<SlideId, Vec<String>>>;
    async fn refine_curriculum_outline(
        &self,
        current: Curriculum,
        instruction: String,
    ) -> Result<RefinementResult>;
    async fn adjust_curriculum_outline(
        &self,
        current: Curriculum,
        instruction: String,
    ) -> Result<Curriculum>;
    async fn consult_on_topic(&self, request: ConsultRequest) -> Result<ConsultantReply>;
    async fn chat_reply(&self, request: ChatRequest) -> Result<String>;
}

pub struct MissingCollaborator;

#[async_trait]
impl GenerationCollaborator for MissingCollaborator {
    async fn generate_curriculum_outline(&self, request: CurriculumRequest) -> Result<Curriculum> {
        Err(anyhow!(
            "generation backend unavailable for curriculum '{}'",
            request.topic
        ))
    }

    async fn generate_module_content(
        &self,
        request: ModuleContentRequest,
    ) -> Result<ModuleContent> {
        Err(anyhow!(
            "generation backend unavailable for module '{}'",
            request.module_title
        ))
    }

    async fn select_images_for_module(
        &self,
        _slides: Vec<Slide>,
    ) -> Result<BoxStream<'static, ImageResolution>> {
        Err(anyhow!("image selection backend unavailable"))
    }

    async fn synthesize_narration(&self, _slides: Vec<Slide>) -> Result<Vec<Option<String>>> {
        Err(anyhow!("narration backend unavailable"))
    }

    async fn generate_article(&self, request: DraftRequest) -> Result<ArticleDraft> {
        Err(anyhow!(
            "generation backend unavailable for article '{}'",
            request.topic
        ))
    }

    async fn fetch_article_images(
        &self,
        _sections: Vec<ArticleSection>,
    ) -> Result<HashMap<SectionId, String>> {
        Err(anyhow!("image backend unavailable"))
    }

    async fn generate_presentation(&self, request: DraftRequest) -> Result<PresentationDraft> {
        Err(anyhow!(
            "generation backend unavailable for presentation '{}'",
            request.topic
        ))
    }

    async fn fetch_presentation_images(
        &self,
        _slides: Vec<PresentationSlide>,
    ) -> Result<HashMap<SlideId, Vec<String>>> {
        Err(anyhow!("image backend unavailable"))
    }

    async fn refine_curriculum_outline(
        &self,
        _current: Curriculum,
        _instruction: String,
    ) -> Result<RefinementResult> {
        Err(anyhow!("generation backend unavailable for refinement"))
    }

    async fn adjust_curriculum_outline(
        &self,
        _current: Curriculum,
        _instruction: String,
    ) -> Result<Curriculum> {
        Err(anyhow!("generation backend unavailable for adjustment"))
    }

    async fn consult_on_topic(&self, _request: ConsultRequest) -> Result<ConsultantReply> {
        Err(anyhow!("consultant backend unavailable"))
    }

    async fn chat_reply(&self, _request: ChatRequest) -> Result<String> {
        Err(anyhow!("chat backend unavailable"))
    }
}

/// Live voice session feeding the clarification log.
#[async_trait]
pub trait VoiceChannel: Send + Sync {
    async fn stop(&self) -> Result<()>;
}

pub struct NoVoiceChannel;

#[async_trait]
impl VoiceChannel for NoVoiceChannel {
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    PhaseChanged(Phase),
    Loading(Option<String>),
    ClarificationUpdated,
    CurriculumUpdated,
    RefinementUpdated,
    CourseStarted {
        course_id: CourseId,
    },
    ModuleLoading {
        module_index: usize,
        loading: bool,
    },
    ModuleLoaded {
        course_id: CourseId,
        module_index: usize,
    },
    ImageResolved {
        course_id: CourseId,
        module_index: usize,
        slide_index: usize,
        block_index: usize,
    },
    NarrationReady {
        course_id: CourseId,
        module_index: usize,
    },
    PositionChanged(Position),
    ArticleUpdated,
    PresentationUpdated,
    ChatUpdated,
    HistoryUpdated,
    PreferencesUpdated,
    Notice(String),
}

pub struct LearningEngine {
    collaborator: Arc<dyn GenerationCollaborator>,
    store: Arc<dyn PersistentStore>,
    voice: Arc<dyn VoiceChannel>,
    settings: EngineSettings,
    inner: Mutex<EngineState>,
    module_locks: Mutex<HashMap<(CourseId, usize), Arc<Mutex<()>>>>,
    prefetch_tx: Mutex<Option<mpsc::UnboundedSender<prefetch::PrefetchJob>>>,
    pacer: RequestPacer,
    events: broadcast::Sender<EngineEvent>,
}

pub(crate) struct EngineState {
    phase: Phase,
    mode: LearningMode,
    guided: bool,
    topic: String,
    clarification: Vec<ChatMessage>,
    curriculum: Option<Curriculum>,
    refinement: Vec<ChatMessage>,
    course: Option<Course>,
    /// Per module of the active course: image selection has been triggered.
    images_triggered: Vec<bool>,
    /// Per module of the active course: narration synthesis has been started.
    narration_attempted: Vec<bool>,
    position: Position,
    completed_slides: HashSet<String>,
    loading: Option<String>,
    history: Vec<Course>,
    preferences: LearningPreferences,
    save_custom_instructions: bool,
    article: Option<Article>,
    presentation: Option<Presentation>,
    presentation_slide: usize,
    chat: Vec<ChatMessage>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            phase: Phase::Home,
            mode: LearningMode::Curriculum,
            guided: false,
            topic: String::new(),
            clarification: Vec::new(),
            curriculum: None,
            refinement: Vec::new(),
            course: None,
            images_triggered: Vec::new(),
            narration_attempted: Vec::new(),
            position: Position::default(),
            completed_slides: HashSet::new(),
            loading: None,
            history: Vec::new(),
            preferences: LearningPreferences::default(),
            save_custom_instructions: false,
            article: None,
            presentation: None,
            presentation_slide: 0,
            chat: Vec::new(),
        }
    }

    fn active_course(&self, course_id: CourseId) -> Option<&Course> {
        self.course.as_ref().filter(|course| course.id == course_id)
    }

    fn active_course_mut(&mut self, course_id: CourseId) -> Option<&mut Course> {
        self.course.as_mut().filter(|course| course.id == course_id)
    }

    /// Makes `course` the active one and resets all per-course tracking.
    fn install_course(&mut self, course: Course) {
        let module_count = course.modules.len();
        self.course = Some(course);
        self.images_triggered = vec![false; module_count];
        self.narration_attempted = vec![false; module_count];
        self.position = Position::default();
        self.completed_slides.clear();
        self.chat.clear();
    }
}

impl LearningEngine {
    pub fn new(
        collaborator: Arc<dyn GenerationCollaborator>,
        store: Arc<dyn PersistentStore>,
    ) -> Arc<Self> {
        Self::new_with_dependencies(
            collaborator,
            store,
            Arc::new(NoVoiceChannel),
            EngineSettings::default(),
        )
    }

    pub fn new_with_dependencies(
        collaborator: Arc<dyn GenerationCollaborator>,
        store: Arc<dyn PersistentStore>,
        voice: Arc<dyn VoiceChannel>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let pacer = RequestPacer::new(settings.prefetch_delay);
        Arc::new(Self {
            collaborator,
            store,
            voice,
            settings,
            inner: Mutex::new(EngineState::new()),
            module_locks: Mutex::new(HashMap::new()),
            prefetch_tx: Mutex::new(None),
            pacer,
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn notify(&self, message: impl Into<String>) {
        self.emit(EngineEvent::Notice(message.into()));
    }

    fn set_phase(&self, state: &mut EngineState, phase: Phase) {
        if state.phase != phase {
            state.phase = phase;
            self.emit(EngineEvent::PhaseChanged(phase));
        }
    }

    fn set_loading(&self, state: &mut EngineState, text: Option<&str>) {
        state.loading = text.map(str::to_string);
        self.emit(EngineEvent::Loading(state.loading.clone()));
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.phase
    }

    pub async fn mode(&self) -> LearningMode {
        self.inner.lock().await.mode
    }

    pub async fn set_mode(&self, mode: LearningMode) {
        self.inner.lock().await.mode = mode;
    }

    pub async fn set_guided(&self, guided: bool) {
        self.inner.lock().await.guided = guided;
    }

    pub async fn topic(&self) -> String {
        self.inner.lock().await.topic.clone()
    }

    pub async fn loading_text(&self) -> Option<String> {
        self.inner.lock().await.loading.clone()
    }

    pub async fn curriculum(&self) -> Option<Curriculum> {
        self.inner.lock().await.curriculum.clone()
    }

    pub async fn course(&self) -> Option<Course> {
        self.inner.lock().await.course.clone()
    }

    pub async fn position(&self) -> Position {
        self.inner.lock().await.position
    }

    pub async fn clarification_log(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.clarification.clone()
    }

    pub async fn refinement_log(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.refinement.clone()
    }

    pub async fn chat_log(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.chat.clone()
    }

    pub async fn history(&self) -> Vec<Course> {
        self.inner.lock().await.history.clone()
    }

    pub async fn preferences(&self) -> LearningPreferences {
        self.inner.lock().await.preferences.clone()
    }

    pub async fn article(&self) -> Option<Article> {
        self.inner.lock().await.article.clone()
    }

    pub async fn presentation(&self) -> Option<Presentation> {
        self.inner.lock().await.presentation.clone()
    }

    pub async fn presentation_slide(&self) -> usize {
        self.inner.lock().await.presentation_slide
    }

    pub async fn image_selection_triggered(&self, module_index: usize) -> bool {
        self.inner
            .lock()
            .await
            .images_triggered
            .get(module_index)
            .copied()
            .unwrap_or(false)
    }

    async fn module_lock(&self, course_id: CourseId, module_index: usize) -> Arc<Mutex<()>> {
        let mut locks = self.module_locks.lock().await;
        Arc::clone(
            locks
                .entry((course_id, module_index))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn forget_module_locks(&self, keep: Option<CourseId>) {
        self.module_locks
            .lock()
            .await
            .retain(|(course_id, _), _| Some(*course_id) == keep);
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
