//! Strategic-merge patch emission against the Prometheus custom resource.
//!
//! Grounded on `shipcat_cli/src/kubeapi.rs::patch`, which already issues a
//! merge patch via `kube::api::PatchParams`; generalised here to patch
//! `spec.shards` and/or `metadata.annotations` on the target object.

use chrono::Utc;
use kube::api::{Api, Meta, PatchParams};
use serde_json::json;

use crate::ErrorKind;
use crate::Result;

pub const SCALE_TIME_ANNOTATION_KEY: &str = "scale-time";

/// Unix timestamp (seconds, floating-point) suitable for the scale-time
/// annotation, per spec.md invariant 5.
pub fn now_timestamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
}

/// Patch only the scale-time annotation, leaving `spec.shards` untouched.
///
/// Used by the cooldown gate when the annotation is absent (spec.md §4.5
/// step 2): the object hasn't been scaled yet, so there's nothing to wait on.
pub async fn write_timestamp_annotation<K>(api: &Api<K>, name: &str, key: &str) -> Result<()>
where
    K: Clone + serde::de::DeserializeOwned + Meta,
{
    let mut annotations = serde_json::Map::new();
    annotations.insert(key.to_string(), json!(now_timestamp().to_string()));
    let body = json!({ "metadata": { "annotations": annotations } });
    info!("patching {} with current timestamp annotation", name);
    patch_merge(api, name, &body).await
}

/// Patch `spec.shards` and the scale-time annotation atomically.
pub async fn patch_shards<K>(api: &Api<K>, name: &str, key: &str, desired_shards: i64) -> Result<()>
where
    K: Clone + serde::de::DeserializeOwned + Meta,
{
    let mut annotations = serde_json::Map::new();
    annotations.insert(key.to_string(), json!(now_timestamp().to_string()));
    let body = json!({
        "metadata": { "annotations": annotations },
        "spec": { "shards": desired_shards },
    });
    info!("patching {} shards to {}", name, desired_shards);
    patch_merge(api, name, &body).await
}

async fn patch_merge<K>(api: &Api<K>, name: &str, body: &serde_json::Value) -> Result<()>
where
    K: Clone + serde::de::DeserializeOwned + Meta,
{
    let pp = PatchParams::default();
    let data = serde_json::to_vec(body)?;
    api.patch(name, &pp, data)
        .await
        .map_err(|e| ErrorKind::ApiError(format!("patching {}: {}", name, e)))?;
    Ok(())
}
