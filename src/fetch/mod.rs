// src/fetch/mod.rs

use anyhow::{Context, Result};
use object_store::{path::Path, ObjectStore};
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Key of the raw input for `organization_id`, relative to the store root:
/// `business_cases/{org}/INPUTS/raw/{filename}`.
pub fn object_key(organization_id: &str, filename: &str) -> Path {
    Path::from_iter([
        "business_cases",
        organization_id,
        "INPUTS",
        "raw",
        filename,
    ])
}

/// Build a store from a URL such as `s3://bucket`, `gs://bucket`,
/// `file:///srv/data` or `memory://`.
///
/// Backend options (credentials, region, endpoint) are taken from the process
/// environment, e.g. `AWS_ACCESS_KEY_ID`. The URL's own path is returned as the
/// key prefix.
pub fn open_store(url: &str) -> Result<(Arc<dyn ObjectStore>, Path)> {
    let parsed = Url::parse(url).with_context(|| format!("parsing store url `{}`", url))?;
    let options = std::env::vars().map(|(k, v)| (k.to_ascii_lowercase(), v));
    let (store, prefix) = object_store::parse_url_opts(&parsed, options)
        .with_context(|| format!("opening object store `{}`", url))?;
    Ok((Arc::from(store), prefix))
}

/// Join a store prefix and a relative key.
pub fn resolve(prefix: &Path, key: &Path) -> Path {
    Path::from_iter(prefix.parts().chain(key.parts()))
}

/// Read the whole object at `path` into memory.
pub async fn fetch_object(store: &dyn ObjectStore, path: &Path) -> Result<Vec<u8>> {
    let bytes = store
        .get(path)
        .await
        .with_context(|| format!("fetching `{}`", path))?
        .bytes()
        .await
        .with_context(|| format!("reading body of `{}`", path))?;
    info!(path = %path, size = bytes.len(), "fetched source object");
    Ok(bytes.to_vec())
}
