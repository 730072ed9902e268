mod config;
mod error;
mod inference;
mod ingest;
mod pipeline;
mod routes;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use config::preprocessing::PreprocessingConfig;
use config::settings::Settings;
use inference::caption::BlipCaptioner;
use inference::classifier::SkinClassifier;
use inference::report::{OllamaChat, ReportComposer};
use inference::{CAPTION_MODEL_NAME, CHAT_MODEL_NAME, SKIN_MODEL_NAME};
use pipeline::Pipeline;
use routes::{UploadLimit, configure_routes};
use std::path::PathBuf;
use std::sync::Arc;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::other(format!("{}: {}", context, err))
}

fn load_pipeline(settings: &Settings) -> std::io::Result<(Pipeline, OllamaChat)> {
    let preprocessing = PreprocessingConfig::load(&settings.preprocessing_path)
        .map_err(|e| startup_error("Failed to load preprocessing config", e))?;

    log::info!("Loading AI models...");
    let classifier = SkinClassifier::load(
        &settings.model_dir(SKIN_MODEL_NAME),
        preprocessing.classifier.clone(),
    )
    .map_err(|e| startup_error("Failed to load skin classifier", e))?;
    let captioner = BlipCaptioner::load(
        &settings.model_dir(CAPTION_MODEL_NAME),
        preprocessing.caption.clone(),
    )
    .map_err(|e| startup_error("Failed to load caption model", e))?;
    let chat = OllamaChat::new(
        settings.ollama_host.clone(),
        CHAT_MODEL_NAME,
        settings.chat_timeout,
    )
    .map_err(|e| startup_error("Failed to build chat client", e))?;
    log::info!("Models loaded successfully.");

    let pipeline = Pipeline::new(
        Arc::new(classifier),
        Arc::new(captioner),
        ReportComposer::new(Arc::new(chat.clone())),
        settings.scratch_dir.clone(),
        settings.request_timeout,
    );
    Ok((pipeline, chat))
}

/// Runs the pipeline once over a local file and prints the results.
async fn diagnose_file(pipeline: &Pipeline, path: PathBuf) -> std::io::Result<()> {
    let bytes = std::fs::read(&path)?;
    let diagnosis = pipeline
        .run(bytes)
        .await
        .map_err(|e| startup_error(&format!("Failed to diagnose {}", path.display()), e))?;

    println!(
        "\n🔬 Diagnóstico: {} ({:.1}% de confiança)",
        diagnosis.display_name(),
        diagnosis.classification.confidence * 100.0
    );
    println!("\n{}\n", diagnosis.description_block());
    println!("\n{}\n", diagnosis.report.trim());
    Ok(())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings =
        Settings::from_env().map_err(|e| startup_error("Invalid configuration", e))?;
    let (pipeline, chat) = load_pipeline(&settings)?;

    if let Some(path) = std::env::args_os().nth(1) {
        return diagnose_file(&pipeline, PathBuf::from(path)).await;
    }

    match chat.is_model_available().await {
        Ok(true) => log::info!("Chat model {} is available", CHAT_MODEL_NAME),
        Ok(false) => log::warn!(
            "Chat model {} is not pulled on {}; reports will fail until it is",
            CHAT_MODEL_NAME,
            settings.ollama_host
        ),
        Err(e) => log::warn!("Cannot reach Ollama at {}: {}", settings.ollama_host, e),
    }

    let bind_address = settings.bind_address();
    let upload_limit = UploadLimit(settings.max_upload_bytes);
    let pipeline = web::Data::new(pipeline);

    log::info!("Starting server on {}", bind_address);

    // Model state lives in the shared Data handle; workers only clone the Arc.
    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(pipeline.clone())
            .app_data(web::Data::new(upload_limit))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
