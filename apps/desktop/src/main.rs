use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use learning_core::{
    load_settings, Direction, EngineEvent, HttpCollaborator, LearningEngine, NavigationOutcome,
    NoVoiceChannel, Phase,
};
use shared::domain::{ContentBlock, Course, LearningMode};
use storage::Storage;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Topic to learn about.
    #[arg(long)]
    topic: Option<String>,
    /// curriculum, article or presentation.
    #[arg(long, default_value = "curriculum")]
    mode: String,
    #[arg(long)]
    collaborator_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    /// Print the saved course history and exit.
    #[arg(long)]
    list_history: bool,
    /// Resume a saved course by id prefix.
    #[arg(long)]
    resume: Option<String>,
    /// Dump the finished course as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_mode(raw: &str) -> Result<LearningMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "curriculum" | "course" => Ok(LearningMode::Curriculum),
        "article" => Ok(LearningMode::Article),
        "presentation" | "slides" => Ok(LearningMode::Presentation),
        other => Err(anyhow!("unknown learning mode '{other}'")),
    }
}

fn log_events(engine: &LearningEngine) {
    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::Notice(text)) => warn!(%text, "learn: notice"),
                Ok(EngineEvent::PhaseChanged(phase)) => info!(?phase, "learn: phase"),
                Ok(EngineEvent::Loading(Some(text))) => info!(%text, "learn: loading"),
                Ok(EngineEvent::ModuleLoaded { module_index, .. }) => {
                    info!(module_index, "learn: module ready")
                }
                Ok(EngineEvent::NarrationReady { module_index, .. }) => {
                    info!(module_index, "learn: narration ready")
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "learn: event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn print_history(history: &[Course]) {
    if history.is_empty() {
        println!("No saved courses.");
        return;
    }
    for course in history {
        let loaded = course.modules.iter().filter(|m| m.loaded).count();
        println!(
            "{}  {}  ({loaded}/{} modules, last opened {})",
            course.id,
            course.title,
            course.modules.len(),
            course.last_accessed.format("%Y-%m-%d %H:%M")
        );
    }
}

async fn walk_course(engine: &Arc<LearningEngine>) -> Result<()> {
    loop {
        let position = engine.position().await;
        let course = engine
            .course()
            .await
            .ok_or_else(|| anyhow!("course disappeared"))?;
        let module = course
            .modules
            .get(position.module_index)
            .ok_or_else(|| anyhow!("position outside the course"))?;
        if position.slide_index == 0 {
            println!("\n== {} ==", module.title);
        }
        if let Some(slide) = module.slides.get(position.slide_index) {
            println!("-- {}", slide.title);
            for block in &slide.blocks {
                match block {
                    ContentBlock::Text { content } => println!("{content}"),
                    ContentBlock::FunFact { fact } => println!("Fun fact: {fact}"),
                    _ => {}
                }
            }
        }

        match engine.advance(Direction::Next).await? {
            NavigationOutcome::Moved { .. } => {}
            NavigationOutcome::AtBoundary => return Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.collaborator_url {
        settings.collaborator_url = url;
    }
    if let Some(url) = args.database_url {
        settings.database_url = url;
    }

    let database_url = storage::prepare_database_url(&settings.database_url)?;
    let store = Storage::new(&database_url).await?;
    store.health_check().await?;
    let collaborator = HttpCollaborator::from_settings(&settings)?;
    info!(
        collaborator = %settings.collaborator_url,
        database = %database_url,
        "learn: starting"
    );

    let engine = LearningEngine::new_with_dependencies(
        Arc::new(collaborator),
        Arc::new(store),
        Arc::new(NoVoiceChannel),
        settings,
    );
    log_events(&engine);
    engine.load_persisted().await;

    if args.list_history {
        print_history(&engine.history().await);
        return Ok(());
    }

    let phase = if let Some(prefix) = args.resume {
        let course_id = engine
            .history()
            .await
            .iter()
            .find(|course| course.id.to_string().starts_with(&prefix))
            .map(|course| course.id)
            .ok_or_else(|| anyhow!("no saved course matches '{prefix}'"))?;
        engine.load_from_history(course_id).await?
    } else {
        let topic = args
            .topic
            .ok_or_else(|| anyhow!("--topic is required unless resuming or listing"))?;
        engine.set_mode(parse_mode(&args.mode)?).await;
        engine.submit_topic(&topic).await?
    };

    match phase {
        Phase::CurriculumReview => {
            if let Some(curriculum) = engine.curriculum().await {
                println!("{}\n{}", curriculum.title, curriculum.overview);
                for (index, module) in curriculum.modules.iter().enumerate() {
                    println!("  {}. {} ({} slides)", index + 1, module.title, module.slides.len());
                }
            }
            engine.start_experience().await?;
            walk_course(&engine).await?;
        }
        Phase::Learning => walk_course(&engine).await?,
        Phase::Article => {
            if let Some(article) = engine.article().await {
                println!("{}\n\n{}", article.title, article.overview);
                for section in &article.sections {
                    println!("\n## {}\n{}", section.title, section.content);
                }
            }
        }
        Phase::Presentation => {
            if let Some(presentation) = engine.presentation().await {
                println!("{} ({} slides)", presentation.title, presentation.total_slides);
                for slide in &presentation.slides {
                    println!("\n# {}", slide.title);
                    for point in &slide.points {
                        println!("  - {point}");
                    }
                }
            }
        }
        other => warn!(phase = ?other, "learn: nothing to show"),
    }

    if args.json {
        if let Some(course) = engine.course().await {
            println!("{}", serde_json::to_string_pretty(&course)?);
        }
    }
    Ok(())
}
