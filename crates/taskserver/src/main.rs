mod error;
mod routes;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use routes::AppState;
use std::sync::Arc;
use taskcore::{PipelineSpec, StepSpec};
use taskruntime::{RuntimeConfig, TaskRuntime};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Pipeline served when `TASKFLOW_PIPELINE` is not set
fn default_pipeline() -> PipelineSpec {
    PipelineSpec::new("video-analysis")
        .with_description("Resolves a video link and reports its id")
        .with_step(StepSpec::new("video_id", "source.video_id"))
        .with_step(
            StepSpec::new("log", "debug.log")
                .with_config("from", "video_id")
                .with_config("label", "video id"),
        )
}

fn load_pipeline() -> anyhow::Result<PipelineSpec> {
    match std::env::var("TASKFLOW_PIPELINE") {
        Ok(path) => {
            let spec = PipelineSpec::from_file(&path)
                .with_context(|| format!("loading pipeline {}", path))?;
            info!("Loaded pipeline from {}", path);
            Ok(spec)
        }
        Err(_) => Ok(default_pipeline()),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting taskflow server");

    let spec = load_pipeline()?;
    let config = RuntimeConfig::from_env()?;
    let runtime = TaskRuntime::new(Arc::new(tasksteps::standard_registry()), &spec, config)?;
    runtime.start().await;

    info!(
        "✅ Runtime ready: pipeline '{}' ({} steps), max {} concurrent tasks",
        spec.name,
        spec.steps.len(),
        runtime.config().max_concurrent_tasks
    );

    let runtime = Arc::new(runtime);
    let app_state = web::Data::new(AppState {
        runtime: Arc::clone(&runtime),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    runtime.shutdown().await;
    info!("Server stopped");

    Ok(())
}
