//! Creates the demo bucket and its collections when they are missing.

use crate::{
    models::bucket::CollectionId,
    services::kinto_client::{CreateOutcome, KintoClient, KintoError, Result},
};
use futures::future::try_join_all;
use tracing::info;

/// What happened to each object during initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub bucket: CreateOutcome,
    pub collections: Vec<(CollectionId, CreateOutcome)>,
}

/// Ensure `bucket` and every collection in [`CollectionId::ALL`] exist.
///
/// The bucket is created first; the collections are then created
/// concurrently. Objects that already exist count as success, so running this
/// repeatedly is harmless. The future resolves only once every object is
/// confirmed.
pub async fn ensure_objects(client: &KintoClient, bucket: &str) -> Result<InitReport> {
    let bucket_outcome = client.create_bucket(bucket).await?;
    info!(bucket, outcome = %bucket_outcome, "bucket ready");

    let collections = try_join_all(CollectionId::ALL.into_iter().map(|collection| async move {
        let outcome = client.create_collection(bucket, collection).await?;
        info!(bucket, %collection, %outcome, "collection ready");
        Ok::<_, KintoError>((collection, outcome))
    }))
    .await?;

    Ok(InitReport {
        bucket: bucket_outcome,
        collections,
    })
}
