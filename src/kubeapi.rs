//! A small typed interface to the `monitoring.coreos.com/v1` `Prometheus`
//! custom resource, and the client construction helper.
//!
//! Grounded on `shipcat_cli/src/kubeapi.rs`: same `make_client` in-cluster
//! vs. kubeconfig fallback, same "hide the client behind a small struct"
//! shape. The CRD type itself follows
//! `shipcat_definitions/src/manifest.rs`'s use of `kube_derive::CustomResource`
//! to get a `k8s_openapi::Resource`-compatible type for free, trimmed to the
//! two spec fields this controller reads.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::api::{Api, ListParams, Meta};
use kube_derive::CustomResource;

use crate::{ErrorKind, Result};

/// `spec.shards` and `spec.resources` of a `Prometheus` object, the only
/// fields this controller reads from the full CRD spec.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
#[kube(group = "monitoring.coreos.com", kind = "Prometheus", version = "v1", namespaced)]
pub struct PrometheusSpecCrd {
    #[serde(default)]
    pub shards: Option<i64>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

/// Build a client the way `shipcat_cli`'s `make_client` does: in-cluster
/// config first, kubeconfig as a local-development fallback.
pub async fn make_client() -> Result<kube::Client> {
    let config = if let Ok(cfg) = kube::config::incluster_config() {
        cfg
    } else {
        kube::config::load_kube_config()
            .await
            .map_err(|e| ErrorKind::ApiError(format!("loading kubeconfig: {}", e)))?
    };
    Ok(kube::Client::new(config))
}

/// Everything the reconciliation loop needs to know about one Prometheus
/// object's current on-cluster state, re-fetched directly from the cluster
/// at the start of every tick (see DESIGN.md's `src/reconcile.rs` entry).
#[derive(Clone, Debug)]
pub struct PrometheusSnapshot {
    pub name: String,
    pub namespace: String,
    pub shards: i64,
    pub memory_request: String,
    pub annotations: BTreeMap<String, String>,
}

impl PrometheusSnapshot {
    pub fn from_crd(obj: &Prometheus) -> Result<Self> {
        let name = Meta::name(obj);
        let namespace = Meta::namespace(obj).unwrap_or_else(|| "default".to_string());
        let shards = obj.spec.shards.unwrap_or(1);
        let memory_request = obj
            .spec
            .resources
            .as_ref()
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("memory"))
            .map(|q| q.0.clone())
            .ok_or_else(|| ErrorKind::ConfigError(format!("{} has no spec.resources.requests.memory", name)))?;
        let annotations = Meta::meta(obj).annotations.clone().unwrap_or_default();
        Ok(PrometheusSnapshot {
            name,
            namespace,
            shards,
            memory_request,
            annotations,
        })
    }
}

/// List every `Prometheus` object opted into autoscaling, i.e. annotated
/// `<prefix>/enable: "true"`. Used by the minimal dispatch framework; the
/// per-object reconciliation loop itself never calls this.
pub async fn list_opted_in(client: kube::Client, namespace: Option<&str>, key_prefix: &str) -> Result<Vec<Prometheus>> {
    let api: Api<Prometheus> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let lp = ListParams::default();
    let list = api
        .list(&lp)
        .await
        .map_err(|e| ErrorKind::ApiError(format!("listing prometheus objects: {}", e)))?;
    let enable_key = format!("{}/enable", key_prefix);
    Ok(list
        .items
        .into_iter()
        .filter(|obj| {
            Meta::meta(obj)
                .annotations
                .as_ref()
                .and_then(|a| a.get(&enable_key))
                .map(|v| v == "true")
                .unwrap_or(false)
        })
        .collect())
}
