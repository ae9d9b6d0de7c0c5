use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use shared::{
    domain::{
        Article, ArticleId, ArticleSection, ChatMessage, Course, CourseId, LearningMode,
        Presentation, PresentationId, PresentationSlide, SectionId, SlideId,
    },
    protocol::{ChatRequest, ConsultRequest, CurriculumRequest, DraftRequest, ExtractedContext},
};
use tracing::{debug, info, warn};

use crate::{
    navigation::{LoadOrigin, LoadOutcome},
    EngineError, EngineEvent, GenerationStep, LearningEngine, CHAT_APOLOGY, REFINEMENT_APOLOGY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Home,
    Clarification,
    GeneratingCurriculum,
    CurriculumReview,
    Refining,
    ExperienceGenerating,
    Learning,
    GeneratingArticle,
    Article,
    GeneratingPresentation,
    Presentation,
}

/// Serializes the clarification log for curriculum generation. Returns the
/// topic to generate for and the context string.
pub fn clarification_context(
    log: &[ChatMessage],
    extracted: Option<&ExtractedContext>,
    typed_topic: &str,
) -> (String, String) {
    let conversation = log
        .iter()
        .map(|message| format!("{}: {}", message.role.label(), message.text))
        .collect::<Vec<_>>()
        .join("\n");

    let Some(extracted) = extracted else {
        return (typed_topic.to_string(), conversation);
    };

    let topic = if extracted.topic.trim().is_empty() {
        typed_topic.to_string()
    } else {
        extracted.topic.clone()
    };
    let mut lines = vec![format!("TOPIC: {topic}")];
    if !extracted.interests.is_empty() {
        lines.push(format!("INTERESTS: {}", extracted.interests.join(", ")));
    }
    if let Some(level) = extracted.knowledge_level.as_deref().filter(|v| !v.is_empty()) {
        lines.push(format!("LEVEL: {level}"));
    }
    if let Some(goals) = extracted.goals.as_deref().filter(|v| !v.is_empty()) {
        lines.push(format!("GOALS: {goals}"));
    }

    let context = format!("{}\n\n--- CONVERSATION ---\n{conversation}", lines.join("\n"));
    (topic, context)
}

impl LearningEngine {
    /// Entry point from `Home`. Guided entry opens a clarification exchange;
    /// direct entry generates for the current learning mode.
    pub async fn submit_topic(self: &Arc<Self>, topic: &str) -> Result<Phase, EngineError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(EngineError::EmptyTopic);
        }

        let (guided, mode) = {
            let mut state = self.inner.lock().await;
            if state.phase != Phase::Home {
                return Err(EngineError::InvalidPhase { phase: state.phase });
            }
            state.topic = topic.to_string();
            if state.guided {
                state.clarification = vec![ChatMessage::user(topic)];
                self.set_phase(&mut state, Phase::Clarification);
                self.emit(EngineEvent::ClarificationUpdated);
            }
            (state.guided, state.mode)
        };
        info!(topic, guided, mode = ?mode, "phase: topic submitted");

        if guided {
            return self.consult(Vec::new(), topic.to_string(), true).await;
        }

        match mode {
            LearningMode::Curriculum => {
                self.generate_curriculum(topic.to_string(), String::new(), true)
                    .await
            }
            LearningMode::Article => self.generate_article(topic.to_string(), None).await,
            LearningMode::Presentation => {
                self.generate_presentation(topic.to_string(), None).await
            }
        }
    }

    pub async fn send_clarification(self: &Arc<Self>, text: &str) -> Result<Phase, EngineError> {
        let history = {
            let mut state = self.inner.lock().await;
            if state.phase != Phase::Clarification {
                return Err(EngineError::InvalidPhase { phase: state.phase });
            }
            let history = state.clarification.clone();
            state.clarification.push(ChatMessage::user(text));
            self.emit(EngineEvent::ClarificationUpdated);
            history
        };
        self.consult(history, text.to_string(), false).await
    }

    /// Explicit user confirmation: proceed without extracted context.
    pub async fn confirm_clarification(self: &Arc<Self>) -> Result<Phase, EngineError> {
        self.proceed_from_clarification(None).await
    }

    async fn consult(
        self: &Arc<Self>,
        history: Vec<ChatMessage>,
        input: String,
        is_first: bool,
    ) -> Result<Phase, EngineError> {
        let request = ConsultRequest {
            history,
            input,
            is_first,
        };
        let reply = match self.collaborator.consult_on_topic(request).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "phase: consultant reply failed");
                return Ok(Phase::Clarification);
            }
        };

        {
            let mut state = self.inner.lock().await;
            if state.phase != Phase::Clarification {
                debug!(phase = ?state.phase, "phase: dropping late consultant reply");
                return Ok(state.phase);
            }
            state.clarification.push(ChatMessage::model(reply.text));
            self.emit(EngineEvent::ClarificationUpdated);
        }

        if reply.ready_to_generate {
            info!("phase: consultant signalled readiness");
            return self
                .proceed_from_clarification(reply.extracted_context)
                .await;
        }
        Ok(Phase::Clarification)
    }

    async fn proceed_from_clarification(
        self: &Arc<Self>,
        extracted: Option<ExtractedContext>,
    ) -> Result<Phase, EngineError> {
        if let Err(err) = self.voice.stop().await {
            warn!(error = %err, "phase: failed to stop voice channel");
        }

        let (topic, context, mode) = {
            let mut state = self.inner.lock().await;
            if state.phase != Phase::Clarification {
                return Err(EngineError::InvalidPhase { phase: state.phase });
            }
            let (topic, context) =
                clarification_context(&state.clarification, extracted.as_ref(), &state.topic);
            state.topic = topic.clone();
            (topic, context, state.mode)
        };

        match mode {
            LearningMode::Curriculum => self.generate_curriculum(topic, context, false).await,
            LearningMode::Article => self.generate_article(topic, Some(context)).await,
            LearningMode::Presentation => self.generate_presentation(topic, Some(context)).await,
        }
    }

    /// Preferences are only sent on the direct path.
    async fn generate_curriculum(
        &self,
        topic: String,
        context: String,
        use_preferences: bool,
    ) -> Result<Phase, EngineError> {
        let (prior, preferences) = {
            let mut state = self.inner.lock().await;
            let prior = state.phase;
            self.set_phase(&mut state, Phase::GeneratingCurriculum);
            self.set_loading(&mut state, Some("Designing your learning path..."));
            (prior, use_preferences.then(|| state.preferences.clone()))
        };

        let request = CurriculumRequest {
            topic,
            context,
            preferences,
        };
        let curriculum = match self.collaborator.generate_curriculum_outline(request).await {
            Ok(curriculum) => curriculum,
            Err(cause) => {
                return Err(self
                    .fail_blocking(prior, GenerationStep::Curriculum, cause)
                    .await)
            }
        };

        {
            let mut state = self.inner.lock().await;
            info!(
                title = %curriculum.title,
                modules = curriculum.modules.len(),
                "phase: curriculum ready"
            );
            state.curriculum = Some(curriculum);
            state.refinement.clear();
            self.set_loading(&mut state, None);
            self.set_phase(&mut state, Phase::CurriculumReview);
            self.emit(EngineEvent::CurriculumUpdated);
            self.emit(EngineEvent::RefinementUpdated);
        }
        self.clear_custom_instructions_if_unsaved().await;
        Ok(Phase::CurriculumReview)
    }

    /// Restores `prior`, announces the failure and hands back the error.
    async fn fail_blocking(
        &self,
        prior: Phase,
        step: GenerationStep,
        cause: anyhow::Error,
    ) -> EngineError {
        let err = EngineError::generation(step, cause);
        warn!(step = %step, error = %err, "phase: blocking generation failed");
        {
            let mut state = self.inner.lock().await;
            self.set_loading(&mut state, None);
            self.set_phase(&mut state, prior);
        }
        self.notify(err.notice());
        err
    }

    /// Conversational refinement. The refinement transcript records the
    /// instruction and either the reply or an apology.
    pub async fn refine_curriculum(&self, instruction: &str) -> Result<(), EngineError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Ok(());
        }

        let current = {
            let mut state = self.inner.lock().await;
            if state.phase != Phase::CurriculumReview {
                return Err(EngineError::InvalidPhase { phase: state.phase });
            }
            let current = state
                .curriculum
                .clone()
                .ok_or(EngineError::MissingCurriculum)?;
            state.refinement.push(ChatMessage::user(instruction));
            self.set_phase(&mut state, Phase::Refining);
            self.emit(EngineEvent::RefinementUpdated);
            current
        };

        let result = self
            .collaborator
            .refine_curriculum_outline(current, instruction.to_string())
            .await;

        let mut state = self.inner.lock().await;
        self.set_phase(&mut state, Phase::CurriculumReview);
        match result {
            Ok(result) => {
                state.curriculum = Some(result.outline);
                state.refinement.push(ChatMessage::model(result.response_text));
                self.emit(EngineEvent::CurriculumUpdated);
                self.emit(EngineEvent::RefinementUpdated);
                Ok(())
            }
            Err(cause) => {
                warn!(error = %cause, "phase: refinement failed");
                state.refinement.push(ChatMessage::model(REFINEMENT_APOLOGY));
                self.emit(EngineEvent::RefinementUpdated);
                drop(state);
                let err = EngineError::generation(GenerationStep::Refinement, cause);
                self.notify(err.notice());
                Err(err)
            }
        }
    }

    /// Direct outline adjustment. A blank instruction does nothing and
    /// returns `false`.
    pub async fn adjust_curriculum(&self, instruction: &str) -> Result<bool, EngineError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Ok(false);
        }

        let current = {
            let mut state = self.inner.lock().await;
            if state.phase != Phase::CurriculumReview {
                return Err(EngineError::InvalidPhase { phase: state.phase });
            }
            let current = state
                .curriculum
                .clone()
                .ok_or(EngineError::MissingCurriculum)?;
            self.set_phase(&mut state, Phase::Refining);
            current
        };

        match self
            .collaborator
            .adjust_curriculum_outline(current, instruction.to_string())
            .await
        {
            Ok(adjusted) => {
                let mut state = self.inner.lock().await;
                state.curriculum = Some(adjusted);
                self.set_phase(&mut state, Phase::CurriculumReview);
                self.emit(EngineEvent::CurriculumUpdated);
                Ok(true)
            }
            Err(cause) => Err(self
                .fail_blocking(Phase::CurriculumReview, GenerationStep::Adjustment, cause)
                .await),
        }
    }

    /// Builds the course skeleton, generates the first module and enters
    /// `Learning` as soon as it is merged. Remaining modules are queued for
    /// background generation.
    pub async fn start_experience(self: &Arc<Self>) -> Result<CourseId, EngineError> {
        let course_id = {
            let mut state = self.inner.lock().await;
            if state.phase != Phase::CurriculumReview {
                return Err(EngineError::InvalidPhase { phase: state.phase });
            }
            let curriculum = state
                .curriculum
                .clone()
                .filter(|curriculum| !curriculum.modules.is_empty())
                .ok_or(EngineError::MissingCurriculum)?;
            let course = Course::skeleton(state.topic.clone(), &curriculum, Utc::now());
            let course_id = course.id;
            state.install_course(course);
            self.set_phase(&mut state, Phase::ExperienceGenerating);
            self.set_loading(&mut state, Some("Generating your learning experience..."));
            self.emit(EngineEvent::CourseStarted { course_id });
            course_id
        };
        self.forget_module_locks(Some(course_id)).await;
        info!(course_id = %course_id, "phase: generating first module");

        let outcome = self
            .load_module(course_id, 0, LoadOrigin::FirstModule)
            .await;
        let mut state = self.inner.lock().await;
        match outcome {
            Ok(LoadOutcome::Loaded | LoadOutcome::AlreadyLoaded) => {}
            Ok(LoadOutcome::Stale) => return Err(EngineError::NoActiveCourse),
            Err(err) => {
                warn!(course_id = %course_id, error = %err, "phase: first module failed");
                if state.active_course(course_id).is_some() {
                    state.course = None;
                    state.images_triggered.clear();
                    state.narration_attempted.clear();
                }
                self.set_loading(&mut state, None);
                self.set_phase(&mut state, Phase::CurriculumReview);
                drop(state);
                self.notify(err.notice());
                return Err(err);
            }
        }

        if state.active_course(course_id).is_none() {
            return Err(EngineError::NoActiveCourse);
        }
        self.set_loading(&mut state, None);
        self.set_phase(&mut state, Phase::Learning);
        self.emit(EngineEvent::PositionChanged(state.position));
        drop(state);

        self.spawn_enrichment(course_id, 0);
        self.enqueue_prefetch(course_id).await;
        Ok(course_id)
    }

    async fn generate_article(
        self: &Arc<Self>,
        topic: String,
        context: Option<String>,
    ) -> Result<Phase, EngineError> {
        let prior = {
            let mut state = self.inner.lock().await;
            let prior = state.phase;
            self.set_phase(&mut state, Phase::GeneratingArticle);
            self.set_loading(&mut state, Some("Generating article..."));
            prior
        };

        let request = DraftRequest {
            topic: topic.clone(),
            context,
        };
        let draft = match self.collaborator.generate_article(request).await {
            Ok(draft) => draft,
            Err(cause) => {
                return Err(self
                    .fail_blocking(prior, GenerationStep::Article, cause)
                    .await)
            }
        };

        let article = Article {
            id: ArticleId::new(),
            topic,
            title: draft.title,
            overview: draft.overview,
            sections: draft
                .sections
                .into_iter()
                .map(|section| ArticleSection {
                    id: section.id,
                    title: section.title,
                    content: section.content,
                    image_keywords: section.image_keywords,
                    image_url: None,
                })
                .collect(),
            created_at: Utc::now(),
        };
        let article_id = article.id;
        let sections = article.sections.clone();
        {
            let mut state = self.inner.lock().await;
            state.article = Some(article);
            self.set_loading(&mut state, None);
            self.set_phase(&mut state, Phase::Article);
            self.emit(EngineEvent::ArticleUpdated);
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.collaborator.fetch_article_images(sections).await {
                Ok(images) => engine.apply_article_images(article_id, images).await,
                Err(err) => warn!(error = %err, "phase: article images failed"),
            }
        });
        Ok(Phase::Article)
    }

    async fn apply_article_images(&self, article_id: ArticleId, images: HashMap<SectionId, String>) {
        let mut state = self.inner.lock().await;
        let Some(article) = state.article.as_mut().filter(|a| a.id == article_id) else {
            debug!("phase: article replaced, dropping images");
            return;
        };
        for section in &mut article.sections {
            section.image_url = images.get(&section.id).cloned();
        }
        self.emit(EngineEvent::ArticleUpdated);
    }

    async fn generate_presentation(
        self: &Arc<Self>,
        topic: String,
        context: Option<String>,
    ) -> Result<Phase, EngineError> {
        let prior = {
            let mut state = self.inner.lock().await;
            let prior = state.phase;
            self.set_phase(&mut state, Phase::GeneratingPresentation);
            self.set_loading(&mut state, Some("Creating presentation..."));
            prior
        };

        let request = DraftRequest {
            topic: topic.clone(),
            context,
        };
        let draft = match self.collaborator.generate_presentation(request).await {
            Ok(draft) => draft,
            Err(cause) => {
                return Err(self
                    .fail_blocking(prior, GenerationStep::Presentation, cause)
                    .await)
            }
        };

        let total_slides = draft
            .total_slides
            .filter(|total| *total > 0)
            .unwrap_or(draft.slides.len());
        let presentation = Presentation {
            id: PresentationId::new(),
            topic,
            title: draft.title,
            total_slides,
            slides: draft
                .slides
                .into_iter()
                .map(|slide| PresentationSlide {
                    id: slide.id,
                    title: slide.title,
                    points: slide.points,
                    image_keywords: slide.image_keywords,
                    image_urls: Vec::new(),
                })
                .collect(),
            created_at: Utc::now(),
        };
        let presentation_id = presentation.id;
        let slides = presentation.slides.clone();
        {
            let mut state = self.inner.lock().await;
            state.presentation = Some(presentation);
            state.presentation_slide = 0;
            self.set_loading(&mut state, None);
            self.set_phase(&mut state, Phase::Presentation);
            self.emit(EngineEvent::PresentationUpdated);
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.collaborator.fetch_presentation_images(slides).await {
                Ok(images) => {
                    engine
                        .apply_presentation_images(presentation_id, images)
                        .await
                }
                Err(err) => warn!(error = %err, "phase: presentation images failed"),
            }
        });
        Ok(Phase::Presentation)
    }

    async fn apply_presentation_images(
        &self,
        presentation_id: PresentationId,
        images: HashMap<SlideId, Vec<String>>,
    ) {
        let mut state = self.inner.lock().await;
        let Some(presentation) = state
            .presentation
            .as_mut()
            .filter(|p| p.id == presentation_id)
        else {
            debug!("phase: presentation replaced, dropping images");
            return;
        };
        for slide in &mut presentation.slides {
            slide.image_urls = images.get(&slide.id).cloned().unwrap_or_default();
        }
        self.emit(EngineEvent::PresentationUpdated);
    }

    /// Learning-view chat about the current slide. Failures become an
    /// apology in the transcript.
    pub async fn send_chat_message(&self, text: &str) -> Result<(), EngineError> {
        let request = {
            let mut state = self.inner.lock().await;
            let course = state.course.as_ref().ok_or(EngineError::NoActiveCourse)?;
            let slide_title = course
                .modules
                .get(state.position.module_index)
                .and_then(|module| module.slides.get(state.position.slide_index))
                .map(|slide| slide.title.clone())
                .unwrap_or_default();
            let prompt = format!(
                "Context: Topic is \"{}\", current slide is \"{slide_title}\". {text}",
                course.topic
            );
            let history = state.chat.clone();
            state.chat.push(ChatMessage::user(text));
            self.emit(EngineEvent::ChatUpdated);
            ChatRequest { history, prompt }
        };

        let reply = match self.collaborator.chat_reply(request).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "phase: chat reply failed");
                CHAT_APOLOGY.to_string()
            }
        };
        self.inner.lock().await.chat.push(ChatMessage::model(reply));
        self.emit(EngineEvent::ChatUpdated);
        Ok(())
    }

    /// Back to `Home`; history and the active course are kept.
    pub async fn go_home(&self) {
        let mut state = self.inner.lock().await;
        self.set_loading(&mut state, None);
        self.set_phase(&mut state, Phase::Home);
    }
}

#[cfg(test)]
#[path = "tests/phase_tests.rs"]
mod tests;
