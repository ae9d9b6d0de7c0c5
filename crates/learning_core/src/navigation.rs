use std::sync::Arc;

use shared::{domain::CourseId, protocol::ModuleContentRequest};
use tracing::{debug, info, warn};

use crate::{
    merge, EngineError, EngineEvent, EngineState, GenerationStep, LearningEngine, Phase,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub module_index: usize,
    pub slide_index: usize,
}

impl Position {
    pub fn new(module_index: usize, slide_index: usize) -> Self {
        Self {
            module_index,
            slide_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    Moved {
        position: Position,
        module_changed: bool,
    },
    /// First slide going back or last slide going forward.
    AtBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadOrigin {
    FirstModule,
    Prefetch,
    Navigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadOutcome {
    Loaded,
    AlreadyLoaded,
    /// The course was replaced; nothing was written.
    Stale,
}

pub(crate) fn completed_key(module_index: usize, slide_id: &str) -> String {
    format!("{module_index}-{slide_id}")
}

impl LearningEngine {
    pub async fn advance(
        self: &Arc<Self>,
        direction: Direction,
    ) -> Result<NavigationOutcome, EngineError> {
        let (course_id, target) = {
            let mut state = self.inner.lock().await;
            if state.phase != Phase::Learning {
                return Err(EngineError::InvalidPhase { phase: state.phase });
            }
            let EngineState {
                course,
                position,
                completed_slides,
                ..
            } = &mut *state;
            let course = course.as_ref().ok_or(EngineError::NoActiveCourse)?;
            let current = *position;
            let module = course.modules.get(current.module_index).ok_or(
                EngineError::ModuleOutOfRange {
                    index: current.module_index,
                    count: course.modules.len(),
                },
            )?;

            if direction == Direction::Next {
                if let Some(slide) = module.slides.get(current.slide_index) {
                    completed_slides.insert(completed_key(current.module_index, slide.id.as_str()));
                }
            }

            let target = match direction {
                Direction::Next if current.slide_index + 1 < module.slides.len() => {
                    Position::new(current.module_index, current.slide_index + 1)
                }
                Direction::Next if current.module_index + 1 < course.modules.len() => {
                    Position::new(current.module_index + 1, 0)
                }
                Direction::Previous if current.slide_index > 0 => {
                    Position::new(current.module_index, current.slide_index - 1)
                }
                Direction::Previous if current.module_index > 0 => {
                    let previous = &course.modules[current.module_index - 1];
                    Position::new(
                        current.module_index - 1,
                        previous.slides.len().saturating_sub(1),
                    )
                }
                _ => return Ok(NavigationOutcome::AtBoundary),
            };

            if target.module_index == current.module_index {
                *position = target;
                self.emit(EngineEvent::PositionChanged(target));
                return Ok(NavigationOutcome::Moved {
                    position: target,
                    module_changed: false,
                });
            }
            (course.id, target)
        };

        self.enter_module(course_id, target).await
    }

    pub async fn jump(
        self: &Arc<Self>,
        module_index: usize,
        slide_index: usize,
    ) -> Result<NavigationOutcome, EngineError> {
        let (course_id, module_changed) = {
            let state = self.inner.lock().await;
            if state.phase != Phase::Learning {
                return Err(EngineError::InvalidPhase { phase: state.phase });
            }
            let course = state.course.as_ref().ok_or(EngineError::NoActiveCourse)?;
            let module = course
                .modules
                .get(module_index)
                .ok_or(EngineError::ModuleOutOfRange {
                    index: module_index,
                    count: course.modules.len(),
                })?;
            if slide_index >= module.slides.len() {
                return Err(EngineError::SlideOutOfRange {
                    module_index,
                    index: slide_index,
                    count: module.slides.len(),
                });
            }
            (course.id, state.position.module_index != module_index)
        };

        let outcome = self
            .enter_module(course_id, Position::new(module_index, slide_index))
            .await?;
        Ok(match outcome {
            NavigationOutcome::Moved { position, .. } => NavigationOutcome::Moved {
                position,
                module_changed,
            },
            other => other,
        })
    }

    /// Loads the target module if needed, moves there, then enriches it in the
    /// background. A failed load still moves the position.
    async fn enter_module(
        self: &Arc<Self>,
        course_id: CourseId,
        target: Position,
    ) -> Result<NavigationOutcome, EngineError> {
        if let Err(err) = self
            .load_module(course_id, target.module_index, LoadOrigin::Navigation)
            .await
        {
            warn!(
                course_id = %course_id,
                module_index = target.module_index,
                error = %err,
                "nav: module load failed"
            );
            self.notify(err.notice());
        }

        {
            let mut state = self.inner.lock().await;
            if state.active_course(course_id).is_none() {
                return Err(EngineError::NoActiveCourse);
            }
            state.position = target;
            self.emit(EngineEvent::PositionChanged(target));
        }
        debug!(
            module_index = target.module_index,
            slide_index = target.slide_index,
            "nav: entered module"
        );

        self.spawn_enrichment(course_id, target.module_index);
        Ok(NavigationOutcome::Moved {
            position: target,
            module_changed: true,
        })
    }

    /// Generates the module at `module_index` of the active course unless it
    /// is already loaded. Returns whether a generation call was made.
    pub async fn load_module_if_needed(&self, module_index: usize) -> Result<bool, EngineError> {
        let course_id = {
            let state = self.inner.lock().await;
            state
                .course
                .as_ref()
                .map(|course| course.id)
                .ok_or(EngineError::NoActiveCourse)?
        };
        let outcome = self
            .load_module(course_id, module_index, LoadOrigin::Navigation)
            .await?;
        Ok(outcome == LoadOutcome::Loaded)
    }

    /// Single generation path for a module. The per-module lock is held from
    /// the `loaded` check until the merge, so two paths never generate the
    /// same module.
    pub(crate) async fn load_module(
        &self,
        course_id: CourseId,
        module_index: usize,
        origin: LoadOrigin,
    ) -> Result<LoadOutcome, EngineError> {
        let lock = self.module_lock(course_id, module_index).await;
        let _held = lock.lock().await;

        let request = {
            let state = self.inner.lock().await;
            let Some(course) = state.active_course(course_id) else {
                return Ok(LoadOutcome::Stale);
            };
            let module =
                course
                    .modules
                    .get(module_index)
                    .ok_or(EngineError::ModuleOutOfRange {
                        index: module_index,
                        count: course.modules.len(),
                    })?;
            if module.loaded {
                return Ok(LoadOutcome::AlreadyLoaded);
            }
            ModuleContentRequest {
                course_title: course.title.clone(),
                module_title: module.title.clone(),
                module_description: module.description.clone(),
                slide_titles: module.slides.iter().map(|s| s.title.clone()).collect(),
                prior_context: merge::prior_modules_context(&course.modules[..module_index]),
                skip_image_selection: true,
            }
        };

        info!(
            course_id = %course_id,
            module_index,
            origin = ?origin,
            "nav: generating module content"
        );
        if origin == LoadOrigin::Navigation {
            self.emit(EngineEvent::ModuleLoading {
                module_index,
                loading: true,
            });
        }
        let result = self.collaborator.generate_module_content(request).await;
        if origin != LoadOrigin::FirstModule {
            self.pacer.mark().await;
        }
        if origin == LoadOrigin::Navigation {
            self.emit(EngineEvent::ModuleLoading {
                module_index,
                loading: false,
            });
        }
        let content =
            result.map_err(|cause| EngineError::generation(GenerationStep::ModuleContent, cause))?;

        let mut state = self.inner.lock().await;
        let Some(course) = state.active_course_mut(course_id) else {
            debug!(course_id = %course_id, module_index, "nav: discarding content for replaced course");
            return Ok(LoadOutcome::Stale);
        };
        let merged = merge::merge_module_content(&course.modules[module_index], content.slides);
        course.modules[module_index] = merged;
        self.record_active_course(&mut state).await;
        drop(state);

        self.emit(EngineEvent::ModuleLoaded {
            course_id,
            module_index,
        });
        Ok(LoadOutcome::Loaded)
    }

    pub async fn is_slide_completed(&self, module_index: usize, slide_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .completed_slides
            .contains(&completed_key(module_index, slide_id))
    }

    pub async fn completed_count(&self, module_index: usize) -> usize {
        let state = self.inner.lock().await;
        let Some(module) = state
            .course
            .as_ref()
            .and_then(|course| course.modules.get(module_index))
        else {
            return 0;
        };
        module
            .slides
            .iter()
            .filter(|slide| {
                state
                    .completed_slides
                    .contains(&completed_key(module_index, slide.id.as_str()))
            })
            .count()
    }

    pub async fn presentation_next(&self) -> Result<usize, EngineError> {
        self.step_presentation(1).await
    }

    pub async fn presentation_previous(&self) -> Result<usize, EngineError> {
        self.step_presentation(-1).await
    }

    async fn step_presentation(&self, delta: isize) -> Result<usize, EngineError> {
        let mut state = self.inner.lock().await;
        if state.phase != Phase::Presentation {
            return Err(EngineError::InvalidPhase { phase: state.phase });
        }
        let len = state
            .presentation
            .as_ref()
            .map(|presentation| presentation.slides.len())
            .unwrap_or(0);
        let last = len.saturating_sub(1);
        let next = state
            .presentation_slide
            .saturating_add_signed(delta)
            .min(last);
        if next != state.presentation_slide {
            state.presentation_slide = next;
            self.emit(EngineEvent::PresentationUpdated);
        }
        Ok(next)
    }
}

#[cfg(test)]
#[path = "tests/navigation_tests.rs"]
mod tests;
