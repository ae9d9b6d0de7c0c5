use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::{stream::BoxStream, StreamExt};
use shared::{
    domain::{
        ArticleSection, ContentBlock, Course, Curriculum, ImageRef, ModuleOutline,
        PresentationSlide, SectionId, Slide, SlideId, SlideOutline,
    },
    protocol::{
        ArticleDraft, ArticleSectionDraft, ChatRequest, ConsultRequest, ConsultantReply,
        CurriculumRequest, DraftRequest, ImageResolution, ModuleContent, ModuleContentRequest,
        PresentationDraft, PresentationSlideDraft, RefinementResult,
    },
};
use storage::MemoryStore;
use tokio::{sync::Semaphore, time::Instant};

use crate::{
    merge, EngineEvent, EngineSettings, GenerationCollaborator, LearningEngine, Phase,
    VoiceChannel,
};

pub(crate) fn outline(modules: usize, slides: usize) -> Curriculum {
    Curriculum {
        title: "Test course".into(),
        overview: "overview".into(),
        description: "description".into(),
        learning_goals: vec!["learn".into()],
        modules: (0..modules)
            .map(|m| ModuleOutline {
                id: format!("m{m}").as_str().into(),
                title: format!("Module {m}"),
                description: format!("About module {m}"),
                slides: (0..slides)
                    .map(|s| SlideOutline {
                        id: format!("s{s}").as_str().into(),
                        title: format!("Slide {m}.{s}"),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Text block followed by an unresolved image block.
pub(crate) fn generated_slide(title: &str) -> Slide {
    Slide {
        id: "generated".into(),
        title: title.to_string(),
        blocks: vec![
            ContentBlock::Text {
                content: format!("{title} body"),
            },
            ContentBlock::Image {
                keywords: title.to_string(),
                caption: None,
                position: None,
                image_url: ImageRef::Pending,
            },
        ],
        narration: None,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ModuleCall {
    pub module_title: String,
    pub prior_context: String,
    pub skip_image_selection: bool,
    pub at: Instant,
}

#[derive(Default)]
pub(crate) struct ScriptedCollaborator {
    pub curriculum: StdMutex<Option<Curriculum>>,
    pub curriculum_requests: StdMutex<Vec<CurriculumRequest>>,
    pub fail_curriculum: AtomicBool,
    pub module_calls: StdMutex<Vec<ModuleCall>>,
    pub fail_modules: StdMutex<HashSet<String>>,
    pub module_gates: StdMutex<HashMap<String, Arc<Semaphore>>>,
    pub image_calls: AtomicUsize,
    pub fail_images: AtomicBool,
    pub image_streams: StdMutex<VecDeque<BoxStream<'static, ImageResolution>>>,
    pub narration_calls: AtomicUsize,
    pub fail_narration: AtomicBool,
    pub consult_replies: StdMutex<VecDeque<ConsultantReply>>,
    pub consult_requests: StdMutex<Vec<ConsultRequest>>,
    pub refine_calls: AtomicUsize,
    pub fail_refine: AtomicBool,
    pub adjust_calls: AtomicUsize,
    pub fail_article: AtomicBool,
    pub chat_requests: StdMutex<Vec<ChatRequest>>,
    pub fail_chat: AtomicBool,
}

impl ScriptedCollaborator {
    pub fn new(curriculum: Curriculum) -> Arc<Self> {
        let collaborator = Self::default();
        *collaborator.curriculum.lock().expect("lock") = Some(curriculum);
        Arc::new(collaborator)
    }

    /// Calls for `module_title` block until `release` adds a permit.
    pub fn gate_module(&self, module_title: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.module_gates
            .lock()
            .expect("lock")
            .insert(module_title.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn fail_module(&self, module_title: &str) {
        self.fail_modules
            .lock()
            .expect("lock")
            .insert(module_title.to_string());
    }

    pub fn heal_module(&self, module_title: &str) {
        self.fail_modules.lock().expect("lock").remove(module_title);
    }

    pub fn module_titles_called(&self) -> Vec<String> {
        self.module_calls
            .lock()
            .expect("lock")
            .iter()
            .map(|call| call.module_title.clone())
            .collect()
    }

    pub fn module_call_count(&self, module_title: &str) -> usize {
        self.module_calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|call| call.module_title == module_title)
            .count()
    }

    pub fn push_image_stream(&self, stream: BoxStream<'static, ImageResolution>) {
        self.image_streams.lock().expect("lock").push_back(stream);
    }

    pub fn push_consult_reply(&self, reply: ConsultantReply) {
        self.consult_replies.lock().expect("lock").push_back(reply);
    }
}

#[async_trait]
impl GenerationCollaborator for ScriptedCollaborator {
    async fn generate_curriculum_outline(&self, request: CurriculumRequest) -> Result<Curriculum> {
        self.curriculum_requests
            .lock()
            .expect("lock")
            .push(request);
        if self.fail_curriculum.load(Ordering::SeqCst) {
            return Err(anyhow!("curriculum generation failed"));
        }
        self.curriculum
            .lock()
            .expect("lock")
            .clone()
            .ok_or_else(|| anyhow!("no curriculum scripted"))
    }

    async fn generate_module_content(
        &self,
        request: ModuleContentRequest,
    ) -> Result<ModuleContent> {
        self.module_calls.lock().expect("lock").push(ModuleCall {
            module_title: request.module_title.clone(),
            prior_context: request.prior_context.clone(),
            skip_image_selection: request.skip_image_selection,
            at: Instant::now(),
        });

        let gate = self
            .module_gates
            .lock()
            .expect("lock")
            .get(&request.module_title)
            .cloned();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate").forget();
        }

        if self
            .fail_modules
            .lock()
            .expect("lock")
            .contains(&request.module_title)
        {
            return Err(anyhow!("module '{}' failed", request.module_title));
        }

        Ok(ModuleContent {
            slides: request
                .slide_titles
                .iter()
                .map(|title| generated_slide(title))
                .collect(),
        })
    }

    async fn select_images_for_module(
        &self,
        slides: Vec<Slide>,
    ) -> Result<BoxStream<'static, ImageResolution>> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_images.load(Ordering::SeqCst) {
            return Err(anyhow!("image search failed"));
        }
        if let Some(stream) = self.image_streams.lock().expect("lock").pop_front() {
            return Ok(stream);
        }

        let resolutions: Vec<ImageResolution> = slides
            .iter()
            .enumerate()
            .flat_map(|(slide_index, slide)| {
                slide
                    .blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, block)| block.image_ref().is_some())
                    .map(move |(block_index, _)| ImageResolution {
                        slide_index,
                        block_index,
                        url: format!("https://img.test/{slide_index}-{block_index}.png"),
                    })
            })
            .collect();
        Ok(futures::stream::iter(resolutions).boxed())
    }

    async fn synthesize_narration(&self, slides: Vec<Slide>) -> Result<Vec<Option<String>>> {
        self.narration_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_narration.load(Ordering::SeqCst) {
            return Err(anyhow!("speech synthesis failed"));
        }
        Ok((0..slides.len())
            .map(|index| Some(format!("audio://{index}")))
            .collect())
    }

    async fn generate_article(&self, request: DraftRequest) -> Result<ArticleDraft> {
        if self.fail_article.load(Ordering::SeqCst) {
            return Err(anyhow!("article generation failed"));
        }
        Ok(ArticleDraft {
            title: format!("On {}", request.topic),
            overview: "overview".into(),
            sections: vec![
                ArticleSectionDraft {
                    id: "intro".into(),
                    title: "Intro".into(),
                    content: "text".into(),
                    image_keywords: Some("intro".into()),
                },
                ArticleSectionDraft {
                    id: "detail".into(),
                    title: "Detail".into(),
                    content: "more text".into(),
                    image_keywords: None,
                },
            ],
        })
    }

    async fn fetch_article_images(
        &self,
        sections: Vec<ArticleSection>,
    ) -> Result<HashMap<SectionId, String>> {
        Ok(sections
            .into_iter()
            .filter(|section| section.image_keywords.is_some())
            .map(|section| {
                let url = format!("https://img.test/{}.png", section.id);
                (section.id, url)
            })
            .collect())
    }

    async fn generate_presentation(&self, request: DraftRequest) -> Result<PresentationDraft> {
        Ok(PresentationDraft {
            title: format!("Deck on {}", request.topic),
            total_slides: None,
            slides: (0..3)
                .map(|index| PresentationSlideDraft {
                    id: format!("p{index}").as_str().into(),
                    title: format!("Point {index}"),
                    points: vec!["a".into(), "b".into()],
                    image_keywords: Some(format!("kw{index}")),
                })
                .collect(),
        })
    }

    async fn fetch_presentation_images(
        &self,
        slides: Vec<PresentationSlide>,
    ) -> Result<HashMap<SlideId, Vec<String>>> {
        Ok(slides
            .into_iter()
            .take(1)
            .map(|slide| (slide.id, vec!["https://img.test/deck.png".to_string()]))
            .collect())
    }

    async fn refine_curriculum_outline(
        &self,
        mut current: Curriculum,
        instruction: String,
    ) -> Result<RefinementResult> {
        self.refine_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refine.load(Ordering::SeqCst) {
            return Err(anyhow!("refinement failed"));
        }
        current.title = format!("{} ({instruction})", current.title);
        Ok(RefinementResult {
            outline: current,
            response_text: "Done, updated the plan.".into(),
        })
    }

    async fn adjust_curriculum_outline(
        &self,
        mut current: Curriculum,
        _instruction: String,
    ) -> Result<Curriculum> {
        self.adjust_calls.fetch_add(1, Ordering::SeqCst);
        current.modules.truncate(1);
        Ok(current)
    }

    async fn consult_on_topic(&self, request: ConsultRequest) -> Result<ConsultantReply> {
        self.consult_requests
            .lock()
            .expect("lock")
            .push(request);
        self.consult_replies
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| anyhow!("consultant has nothing to say"))
    }

    async fn chat_reply(&self, request: ChatRequest) -> Result<String> {
        self.chat_requests.lock().expect("lock").push(request);
        if self.fail_chat.load(Ordering::SeqCst) {
            return Err(anyhow!("chat failed"));
        }
        Ok("Here is an answer.".into())
    }
}

#[derive(Default)]
pub(crate) struct CountingVoice {
    pub stops: AtomicUsize,
}

#[async_trait]
impl VoiceChannel for CountingVoice {
    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct Harness {
    pub engine: Arc<LearningEngine>,
    pub collaborator: Arc<ScriptedCollaborator>,
    pub store: Arc<MemoryStore>,
    pub voice: Arc<CountingVoice>,
}

pub(crate) fn harness(curriculum: Curriculum) -> Harness {
    harness_with_delay(curriculum, Duration::from_secs(5))
}

pub(crate) fn harness_with_delay(curriculum: Curriculum, prefetch_delay: Duration) -> Harness {
    let collaborator = ScriptedCollaborator::new(curriculum);
    let store = Arc::new(MemoryStore::new());
    let voice = Arc::new(CountingVoice::default());
    let settings = EngineSettings {
        prefetch_delay,
        ..EngineSettings::default()
    };
    let engine = LearningEngine::new_with_dependencies(
        collaborator.clone(),
        store.clone(),
        voice.clone(),
        settings,
    );
    Harness {
        engine,
        collaborator,
        store,
        voice,
    }
}

/// Installs a course built from `curriculum` with the first `loaded`
/// modules already generated, and enters `Learning` without starting the
/// background prefetcher.
pub(crate) async fn install_course(
    engine: &LearningEngine,
    curriculum: &Curriculum,
    loaded: usize,
) -> Course {
    let mut course = Course::skeleton("testing", curriculum, Utc::now());
    for module in course.modules.iter_mut().take(loaded) {
        let slides = module
            .slides
            .iter()
            .map(|slide| generated_slide(&slide.title))
            .collect();
        *module = merge::merge_module_content(module, slides);
    }

    let mut state = engine.inner.lock().await;
    state.topic = "testing".into();
    state.curriculum = Some(curriculum.clone());
    state.install_course(course.clone());
    state.phase = Phase::Learning;
    course
}

/// Polls `check` until it holds. Under a paused clock the sleeps advance
/// virtual time.
pub(crate) async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(120), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub(crate) fn drain_notices(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<String> {
    let mut notices = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::Notice(text) = event {
            notices.push(text);
        }
    }
    notices
}
