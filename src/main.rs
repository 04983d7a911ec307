use anyhow::Result;
use axum::Router;
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, Command};
use services::{
    download::{DownloadOutcome, download_attachments},
    initializer::ensure_objects,
    kinto_client::KintoClient,
    renderer::{PageTemplates, render_text_table},
    workflow::{Encoding, UploadWorkflow, WorkflowError},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting attachment-uploader with config: {:?}", cfg);

    // --- Initialize client ---
    let client = KintoClient::new(&cfg.server_url)?.with_basic_auth(&cfg.credentials);
    tracing::debug!(
        base_url = client.base_url(),
        user = cfg.credentials.user(),
        "record store client ready"
    );
    let mut workflow = UploadWorkflow::new(client.clone(), cfg.bucket.clone());

    match command {
        Command::Serve => serve(&cfg, workflow, client).await,
        Command::Init => {
            let report = ensure_objects(&client, &cfg.bucket).await?;
            println!("bucket {}: {}", cfg.bucket, report.bucket);
            for (collection, outcome) in report.collections {
                println!("collection {collection}: {outcome}");
            }
            Ok(())
        }
        Command::Upload {
            collection,
            kind,
            gzip,
            file,
        } => {
            workflow.set_collection(collection);
            workflow.initialize().await?;
            workflow.select_file(&file)?;
            workflow.wait_until_loaded().await?;
            let encoding = if gzip {
                Encoding::Gzip
            } else {
                Encoding::Identity
            };
            let record = match workflow.submit_encoded(&kind, encoding).await {
                Ok(record) => record,
                Err(WorkflowError::Refresh { record, source }) => {
                    // The upload went through; say so before failing.
                    println!("created record {record}");
                    return Err(anyhow::Error::new(*source).context("refreshing the record list"));
                }
                Err(err) => return Err(err.into()),
            };
            println!("created record {record}");
            print!("{}", render_text_table(workflow.rows()));
            Ok(())
        }
        Command::List { collection } => {
            workflow.set_collection(collection);
            workflow.initialize().await?;
            print!("{}", render_text_table(workflow.rows()));
            Ok(())
        }
        Command::Download { collection, folder } => {
            let outcomes = download_attachments(&client, &cfg.bucket, collection, &folder).await?;
            for outcome in outcomes {
                match outcome {
                    DownloadOutcome::Downloaded(path) => println!("downloaded {}", path.display()),
                    DownloadOutcome::UpToDate(path) => println!("up to date {}", path.display()),
                }
            }
            Ok(())
        }
    }
}

/// Create the demo objects, then serve the upload page.
async fn serve(cfg: &AppConfig, mut workflow: UploadWorkflow, client: KintoClient) -> Result<()> {
    let report = workflow.initialize().await?;
    tracing::debug!(?report, "initialization complete");

    // --- Build router ---
    let templates = PageTemplates::new()?;
    let app: Router =
        routes::routes::routes().with_state(state::AppState::new(workflow, client, templates));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Upload page on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
