use std::sync::Arc;

use futures::StreamExt;
use shared::{domain::CourseId, protocol::ImageResolution};
use tracing::{debug, info, warn};

use crate::{merge, EngineError, EngineEvent, GenerationStep, LearningEngine};

impl LearningEngine {
    /// Fire-and-forget image selection and narration for one module.
    pub(crate) fn spawn_enrichment(self: &Arc<Self>, course_id: CourseId, module_index: usize) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let narrate = async {
                if let Err(err) = engine.narrate_module(course_id, module_index).await {
                    warn!(
                        course_id = %course_id,
                        module_index,
                        error = %err,
                        "enrich: narration failed, not retrying"
                    );
                }
            };
            tokio::join!(engine.select_images(course_id, module_index), narrate);
        });
    }

    /// Runs image selection for a module of the active course at most once
    /// per course instance. Returns whether this call performed it.
    pub async fn trigger_image_selection(&self, module_index: usize) -> Result<bool, EngineError> {
        let course_id = self.active_course_id().await?;
        Ok(self.select_images(course_id, module_index).await)
    }

    pub(crate) async fn select_images(&self, course_id: CourseId, module_index: usize) -> bool {
        let slides = {
            let mut state = self.inner.lock().await;
            let Some(module) = state
                .active_course(course_id)
                .and_then(|course| course.modules.get(module_index))
            else {
                return false;
            };
            if !module.loaded {
                debug!(module_index, "enrich: module not loaded, skipping image selection");
                return false;
            }
            let slides = module.slides.clone();
            match state.images_triggered.get_mut(module_index) {
                Some(triggered) if !*triggered => *triggered = true,
                _ => return false,
            }
            slides
        };

        info!(course_id = %course_id, module_index, "enrich: selecting images");
        let mut resolutions = match self.collaborator.select_images_for_module(slides).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    course_id = %course_id,
                    module_index,
                    error = %err,
                    "enrich: image selection failed"
                );
                return true;
            }
        };

        let mut applied = 0usize;
        while let Some(resolution) = resolutions.next().await {
            if !self.apply_image(course_id, module_index, resolution).await {
                debug!(course_id = %course_id, "enrich: course replaced, dropping image stream");
                break;
            }
            applied += 1;
        }
        info!(course_id = %course_id, module_index, applied, "enrich: image selection finished");
        true
    }

    /// Patches one block. Returns false once the course is no longer active.
    async fn apply_image(
        &self,
        course_id: CourseId,
        module_index: usize,
        resolution: ImageResolution,
    ) -> bool {
        let mut state = self.inner.lock().await;
        let Some(course) = state.active_course_mut(course_id) else {
            return false;
        };
        let Some(module) = course.modules.get_mut(module_index) else {
            return false;
        };
        let ImageResolution {
            slide_index,
            block_index,
            url,
        } = resolution;
        if merge::patch_image(module, slide_index, block_index, url) {
            self.emit(EngineEvent::ImageResolved {
                course_id,
                module_index,
                slide_index,
                block_index,
            });
        } else {
            debug!(
                module_index,
                slide_index, block_index, "enrich: resolution does not address an image block"
            );
        }
        true
    }

    /// Synthesizes narration once per module. `Ok(false)` means nothing was
    /// attempted (not loaded, already ready, or already attempted).
    pub(crate) async fn narrate_module(
        &self,
        course_id: CourseId,
        module_index: usize,
    ) -> Result<bool, EngineError> {
        let slides = {
            let mut state = self.inner.lock().await;
            let Some(module) = state
                .active_course(course_id)
                .and_then(|course| course.modules.get(module_index))
            else {
                return Ok(false);
            };
            if !module.loaded || module.narration_ready {
                return Ok(false);
            }
            let slides = module.slides.clone();
            match state.narration_attempted.get_mut(module_index) {
                Some(attempted) if !*attempted => *attempted = true,
                _ => return Ok(false),
            }
            slides
        };

        let audio_refs = self
            .collaborator
            .synthesize_narration(slides)
            .await
            .map_err(|cause| EngineError::generation(GenerationStep::Narration, cause))?;

        let mut state = self.inner.lock().await;
        let Some(module) = state
            .active_course_mut(course_id)
            .and_then(|course| course.modules.get_mut(module_index))
        else {
            return Ok(false);
        };
        merge::attach_narration(module, audio_refs);
        drop(state);

        info!(course_id = %course_id, module_index, "enrich: narration ready");
        self.emit(EngineEvent::NarrationReady {
            course_id,
            module_index,
        });
        Ok(true)
    }

    /// Manual regeneration path for narration that failed earlier.
    pub async fn retry_narration(&self, module_index: usize) -> Result<bool, EngineError> {
        let course_id = {
            let mut state = self.inner.lock().await;
            let course = state.course.as_ref().ok_or(EngineError::NoActiveCourse)?;
            let count = course.modules.len();
            let course_id = course.id;
            let attempted = state
                .narration_attempted
                .get_mut(module_index)
                .ok_or(EngineError::ModuleOutOfRange {
                    index: module_index,
                    count,
                })?;
            *attempted = false;
            course_id
        };
        self.narrate_module(course_id, module_index).await
    }

    pub(crate) async fn active_course_id(&self) -> Result<CourseId, EngineError> {
        self.inner
            .lock()
            .await
            .course
            .as_ref()
            .map(|course| course.id)
            .ok_or(EngineError::NoActiveCourse)
    }
}

#[cfg(test)]
#[path = "tests/enrich_tests.rs"]
mod tests;
