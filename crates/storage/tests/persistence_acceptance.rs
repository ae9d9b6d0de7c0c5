use chrono::Utc;
use shared::domain::{Course, Curriculum, LearningPreferences, ModuleOutline, SlideOutline};
use storage::{PersistentStore, Storage};

fn outline() -> Curriculum {
    Curriculum {
        title: "Tides".into(),
        overview: "Moon and sea".into(),
        description: "Why the sea moves".into(),
        learning_goals: vec!["explain spring tides".into()],
        modules: vec![ModuleOutline {
            id: "m1".into(),
            title: "Gravity".into(),
            description: "Pull of the moon".into(),
            slides: vec![SlideOutline {
                id: "s1".into(),
                title: "Two bulges".into(),
            }],
        }],
    }
}

#[tokio::test]
async fn history_and_preferences_persist_across_store_instances() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("learning_persist_{suffix}"));
    let raw = temp_root.join("store.db");
    let database_url =
        storage::prepare_database_url(&raw.to_string_lossy()).expect("database url");

    let course = Course::skeleton("tides", &outline(), Utc::now());
    let preferences = LearningPreferences {
        custom_instructions: "short sentences".into(),
        ..LearningPreferences::default()
    };

    {
        let store = Storage::new(&database_url).await.expect("first open");
        store
            .save_history(std::slice::from_ref(&course))
            .await
            .expect("save history");
        store
            .save_preferences(&preferences)
            .await
            .expect("save prefs");
        store.pool().close().await;
    }

    let reopened = Storage::new(&database_url).await.expect("second open");
    let history = reopened.load_history().await.expect("load history");
    assert_eq!(history, vec![course]);
    assert_eq!(
        reopened.load_preferences().await.expect("load prefs"),
        Some(preferences)
    );
    reopened.pool().close().await;

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}
