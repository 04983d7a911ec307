//! Shared state handed to every HTTP handler.

use crate::services::{
    kinto_client::KintoClient, renderer::PageTemplates, workflow::UploadWorkflow,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The page drives a single workflow, so requests take turns on it.
#[derive(Clone, Debug)]
pub struct AppState {
    pub workflow: Arc<Mutex<UploadWorkflow>>,
    pub client: KintoClient,
    pub templates: Arc<PageTemplates>,
}

impl AppState {
    pub fn new(workflow: UploadWorkflow, client: KintoClient, templates: PageTemplates) -> Self {
        Self {
            workflow: Arc::new(Mutex::new(workflow)),
            client,
            templates: Arc::new(templates),
        }
    }
}
