use chrono::Utc;
use shared::domain::{Course, CourseId, Depth, KnowledgeLevel};
use tracing::{info, warn};

use crate::{EngineError, EngineEvent, EngineState, LearningEngine, Phase};

/// Prepends `course`, drops any older entry with the same identity and keeps
/// at most `limit` entries.
pub fn push_front_unique(history: &mut Vec<Course>, course: Course, limit: usize) {
    history.retain(|entry| entry.id != course.id);
    history.insert(0, course);
    history.truncate(limit);
}

/// Partial preferences change; `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct PreferencesUpdate {
    pub knowledge_level: Option<KnowledgeLevel>,
    pub preferred_depth: Option<Depth>,
    pub custom_instructions: Option<String>,
}

impl LearningEngine {
    /// Reads history and preferences from the store. Unreadable values are
    /// logged and replaced by defaults.
    pub async fn load_persisted(&self) {
        let history = match self.store.load_history().await {
            Ok(history) => history,
            Err(err) => {
                warn!(error = %err, "history: failed to load stored history");
                Vec::new()
            }
        };
        let preferences = match self.store.load_preferences().await {
            Ok(preferences) => preferences.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "history: failed to load stored preferences");
                Default::default()
            }
        };

        let mut state = self.inner.lock().await;
        info!(entries = history.len(), "history: loaded");
        state.history = history;
        state.preferences = preferences;
        drop(state);
        self.emit(EngineEvent::HistoryUpdated);
        self.emit(EngineEvent::PreferencesUpdated);
    }

    /// Snapshots the active course into history and persists it.
    pub async fn save_to_history(&self) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        if state.course.is_none() {
            return Err(EngineError::NoActiveCourse);
        }
        self.record_active_course(&mut state).await;
        Ok(())
    }

    /// Store failures are logged; the in-memory history is still updated.
    pub(crate) async fn record_active_course(&self, state: &mut EngineState) {
        let Some(course) = state.course.as_mut() else {
            return;
        };
        course.last_accessed = Utc::now();
        let snapshot = course.clone();
        let course_id = snapshot.id;
        push_front_unique(&mut state.history, snapshot, self.settings.history_limit);

        if let Err(err) = self.store.save_history(&state.history).await {
            warn!(course_id = %course_id, error = %err, "history: failed to persist");
        }
        self.emit(EngineEvent::HistoryUpdated);
    }

    pub async fn load_from_history(
        self: &std::sync::Arc<Self>,
        course_id: CourseId,
    ) -> Result<Phase, EngineError> {
        let phase = {
            let mut state = self.inner.lock().await;
            let course = state
                .history
                .iter()
                .find(|entry| entry.id == course_id)
                .cloned()
                .ok_or(EngineError::UnknownCourse(course_id))?;

            let has_content = course.has_content();
            state.topic = course.topic.clone();
            state.curriculum = Some(course.outline());
            state.refinement.clear();
            state.install_course(course);
            let phase = if has_content {
                Phase::Learning
            } else {
                Phase::CurriculumReview
            };
            self.set_phase(&mut state, phase);
            self.emit(EngineEvent::CourseStarted { course_id });
            self.emit(EngineEvent::CurriculumUpdated);
            self.emit(EngineEvent::PositionChanged(state.position));
            phase
        };
        self.forget_module_locks(Some(course_id)).await;
        info!(course_id = %course_id, phase = ?phase, "history: resumed course");

        if phase == Phase::Learning {
            self.spawn_enrichment(course_id, 0);
        }
        Ok(phase)
    }

    pub async fn delete_from_history(&self, course_id: CourseId) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        state.history.retain(|entry| entry.id != course_id);
        self.store
            .save_history(&state.history)
            .await
            .map_err(|cause| EngineError::Persistence { cause })?;
        drop(state);
        self.emit(EngineEvent::HistoryUpdated);
        Ok(())
    }

    pub async fn update_preferences(&self, update: PreferencesUpdate) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        if let Some(level) = update.knowledge_level {
            state.preferences.knowledge_level = level;
        }
        if let Some(depth) = update.preferred_depth {
            state.preferences.preferred_depth = depth;
        }
        if let Some(text) = update.custom_instructions {
            state.preferences.custom_instructions = text;
        }
        self.store
            .save_preferences(&state.preferences)
            .await
            .map_err(|cause| EngineError::Persistence { cause })?;
        drop(state);
        self.emit(EngineEvent::PreferencesUpdated);
        Ok(())
    }

    /// When off, custom instructions are cleared after each curriculum.
    pub async fn set_save_custom_instructions(&self, save: bool) {
        self.inner.lock().await.save_custom_instructions = save;
    }

    pub(crate) async fn clear_custom_instructions_if_unsaved(&self) {
        let mut state = self.inner.lock().await;
        if state.save_custom_instructions || state.preferences.custom_instructions.is_empty() {
            return;
        }
        state.preferences.custom_instructions.clear();
        if let Err(err) = self.store.save_preferences(&state.preferences).await {
            warn!(error = %err, "history: failed to persist cleared instructions");
        }
        drop(state);
        self.emit(EngineEvent::PreferencesUpdated);
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
