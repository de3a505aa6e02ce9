mod catalog;
mod classifier;
mod cli;
mod config;
mod db;
mod error;
mod history;
mod models;
mod normalizer;
mod resolver;
mod schema;
mod service;
mod slot;
mod uploads;
mod users;

use crate::classifier::{Classifier, LabelSpace, OnnxClassifier};
use crate::cli::{Cli, Commands};
use crate::config::{AppConfig, AppPaths};
use crate::error::{Error, Result};
use crate::models::{Diagnosis, NewDisease, UserId};
use crate::normalizer::Upload;
use crate::service::DiagnosisService;
use crate::slot::InferenceSlot;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct ImageReport {
    image: PathBuf,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnosis: Option<Diagnosis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Error>,
}

impl ImageReport {
    fn new(image: PathBuf, result: Result<Diagnosis>) -> Self {
        match result {
            Ok(diagnosis) => Self {
                image,
                status: 200,
                diagnosis: Some(diagnosis),
                error: None,
            },
            Err(err) => Self {
                image,
                status: err.status_code(),
                diagnosis: None,
                error: Some(err),
            },
        }
    }
}

/// Starts the inference slot, or one that refuses every request when the
/// model is disabled. Loading happens on the slot thread.
fn model_slot(config: &AppConfig, paths: &AppPaths, labels: &LabelSpace) -> Result<InferenceSlot> {
    if !config.model.enabled {
        log::warn!("ONNX inference disabled by configuration");
        return InferenceSlot::unavailable("ONNX inference is disabled");
    }
    let model_path = paths.resolve_model(&config.model.model_path);
    let model_config = config.model.clone();
    let labels = labels.clone();
    InferenceSlot::spawn(move || {
        let classifier = OnnxClassifier::load(&model_path, &model_config, &labels)?;
        Ok(Box::new(classifier) as Box<dyn Classifier>)
    })
}

fn build_service(config: &AppConfig, with_model: bool) -> Result<DiagnosisService> {
    let paths = AppPaths::discover(config)?;
    let pool = db::init_database(&paths)?;
    let labels = LabelSpace::load(&paths.resolve_model(&config.model.labels_path))?;
    let slot = if with_model {
        model_slot(config, &paths, &labels)?
    } else {
        InferenceSlot::unavailable("model not loaded for this command")?
    };
    Ok(DiagnosisService::new(config, &paths, pool, slot, labels))
}

async fn blocking<T, F>(service: &Arc<DiagnosisService>, f: F) -> Result<T>
where
    F: FnOnce(&DiagnosisService) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let service = Arc::clone(service);
    tokio::task::spawn_blocking(move || f(&service)).await?
}

/// Runs every image concurrently; a failure on one image does not affect the others.
async fn diagnose_images(
    service: &Arc<DiagnosisService>,
    images: Vec<PathBuf>,
    user: Option<UserId>,
) -> Vec<ImageReport> {
    let handles: Vec<_> = images
        .into_iter()
        .map(|image| {
            let service = Arc::clone(service);
            tokio::spawn(async move {
                let path = image.clone();
                let result = blocking(&service, move |svc| {
                    let upload = Upload::from_path(&path)?;
                    svc.diagnose(&upload, user)
                })
                .await;
                ImageReport::new(image, result)
            })
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(err) => log::error!("Diagnosis task failed: {err}"),
        }
    }
    reports
}

fn read_catalog(path: &Path) -> Result<Vec<NewDisease>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn run(cli: Cli) -> Result<Value> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let with_model = matches!(cli.command, Commands::Diagnose(_));
    let service = Arc::new(
        tokio::task::spawn_blocking(move || build_service(&config, with_model)).await??,
    );

    let value = match cli.command {
        Commands::Diagnose(args) => {
            let reports = diagnose_images(&service, args.images, args.user_id.map(UserId)).await;
            serde_json::to_value(reports)?
        }
        Commands::History(args) => {
            let user = UserId(args.user_id);
            let entries = blocking(&service, move |svc| svc.history(user, args.limit)).await?;
            serde_json::to_value(entries)?
        }
        Commands::Diseases => serde_json::to_value(blocking(&service, |svc| svc.diseases()).await?)?,
        Commands::Disease { id } => {
            serde_json::to_value(blocking(&service, move |svc| svc.disease(id)).await?)?
        }
        Commands::Search { name } => {
            serde_json::to_value(blocking(&service, move |svc| svc.search(&name)).await?)?
        }
        Commands::ImportCatalog { file } => {
            let records = read_catalog(&file)?;
            let written = blocking(&service, move |svc| svc.import_catalog(&records)).await?;
            serde_json::json!({ "imported": written })
        }
        Commands::AddUser(args) => serde_json::to_value(
            blocking(&service, move |svc| svc.add_user(&args.name, &args.email)).await?,
        )?,
    };
    Ok(value)
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(out) => println!("{out}"),
            Err(err) => {
                log::error!("Failed to encode output: {err}");
                std::process::exit(1);
            }
        },
        Err(err) => {
            log::error!("{err}");
            let body = serde_json::json!({ "error": err, "status": err.status_code() });
            eprintln!("{body}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::tests::png_bytes;
    use crate::slot::tests::FixedClassifier;

    fn service(dir: &Path) -> Arc<DiagnosisService> {
        let mut config = AppConfig::default();
        config.data_dir = dir.to_path_buf();
        config.model.image_size = (8, 8);
        let paths = AppPaths::discover(&config).unwrap();
        let pool = db::open_pool(&paths.db_path).unwrap();
        let fake = FixedClassifier::new(vec![0.3, 0.7]);
        let slot = InferenceSlot::spawn(move || Ok(Box::new(fake) as Box<dyn Classifier>)).unwrap();
        Arc::new(DiagnosisService::new(
            &config,
            &paths,
            pool,
            slot,
            LabelSpace::new(vec!["Apple scab".into(), "Apple healthy".into()]),
        ))
    }

    #[tokio::test]
    async fn diagnose_images_reports_each_file_in_order() {
        let dir = std::env::temp_dir().join(format!("pd_main_{}", uuid::Uuid::new_v4()));
        let service = service(&dir);
        let first = dir.join("first.png");
        let second = dir.join("second.png");
        std::fs::write(&first, png_bytes(4, 4, [10, 200, 10])).unwrap();
        std::fs::write(&second, png_bytes(6, 3, [200, 10, 10])).unwrap();
        let missing = dir.join("missing.png");

        let reports = diagnose_images(
            &service,
            vec![first.clone(), missing.clone(), second.clone()],
            None,
        )
        .await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].image, first);
        assert_eq!(reports[0].status, 200);
        let diagnosis = reports[0].diagnosis.as_ref().unwrap();
        assert_eq!(diagnosis.prediction.plant, "Apple");
        assert_eq!(diagnosis.prediction.condition, "healthy");
        assert_eq!(reports[1].image, missing);
        assert!(reports[1].error.is_some());
        assert_eq!(reports[1].status, 500);
        assert_eq!(reports[2].status, 200);
    }

    #[tokio::test]
    async fn blocking_propagates_service_errors() {
        let dir = std::env::temp_dir().join(format!("pd_main_{}", uuid::Uuid::new_v4()));
        let service = service(&dir);
        let err = blocking(&service, |svc| svc.disease(42)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn disabled_model_yields_unavailable_slot() {
        let mut config = AppConfig::default();
        config.data_dir = std::env::temp_dir().join(format!("pd_main_{}", uuid::Uuid::new_v4()));
        config.model.enabled = false;
        let paths = AppPaths::discover(&config).unwrap();
        let slot = model_slot(&config, &paths, &LabelSpace::default()).unwrap();
        let err = slot.classify(ndarray::Array4::zeros((1, 8, 8, 3))).unwrap_err();
        assert!(matches!(err, Error::ModelUnavailable(_)));
    }
}
