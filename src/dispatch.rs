//! Minimal watch-and-dispatch: periodically discovers Prometheus objects
//! opted into autoscaling and keeps one reconciliation task alive per
//! object, restarting tasks that exhaust their error budget.
//!
//! spec.md §9 scopes object discovery/watching out of the core, leaving it
//! to "the framework". This module is that framework, kept intentionally
//! small: conceptually grounded on `raftcat/src/kube.rs`'s watch-and-cache
//! pattern, modernised onto `kube::Api::list` polling (kube 0.30's reflector
//! watch machinery is heavier than this controller needs) and generalized
//! from one-shot caching to one long-running task per object.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::time::Duration;

use futures::future::Future;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tokio::time::delay_for;

use crate::config::AutoscalingConfig;
use crate::kubeapi::list_opted_in;
use crate::reconcile;
use crate::Result;

const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
const RESPAWN_BACKOFF: Duration = Duration::from_secs(30);

/// Object identity used as the dispatch table key: name scoped by namespace.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct ObjectKey {
    namespace: String,
    name: String,
}

type Completion = (ObjectKey, Result<()>);
type CompletionFuture = Pin<Box<dyn Future<Output = Completion> + Send>>;

/// Run forever, discovering opted-in objects every [`DISCOVERY_INTERVAL`]
/// and keeping exactly one live reconciliation task per object.
///
/// `daemon_delay` is applied to every reconciliation task this dispatcher
/// spawns, both on this initial discovery pass and on every later one
/// (spec.md §6 `PROM_AUTOSCALER_DAEMON_DELAY`: "time to delay daemon start
/// when operator starts up OR an autoscaling Prometheus is created").
pub async fn run(
    client: kube::Client,
    env_defaults: AutoscalingConfig,
    key_prefix: String,
    namespace: Option<String>,
    daemon_delay: Duration,
) -> Result<()> {
    let mut tracked: HashMap<ObjectKey, watch::Sender<bool>> = HashMap::new();
    let mut running: FuturesUnordered<CompletionFuture> = FuturesUnordered::new();

    discover(&client, &env_defaults, &key_prefix, &namespace, daemon_delay, &mut tracked, &mut running).await?;

    loop {
        tokio::select! {
            _ = delay_for(DISCOVERY_INTERVAL) => {
                discover(&client, &env_defaults, &key_prefix, &namespace, daemon_delay, &mut tracked, &mut running).await?;
            }
            maybe_done = running.next(), if !running.is_empty() => {
                if let Some((key, result)) = maybe_done {
                    tracked.remove(&key);
                    match result {
                        Ok(()) => info!("{}/{}: loop exited cleanly", key.namespace, key.name),
                        Err(e) => {
                            error!("{}/{}: loop exhausted its error budget: {}", key.namespace, key.name, e);
                            warn!(
                                "{}/{}: waiting {}s before it becomes eligible for a respawn",
                                key.namespace, key.name, RESPAWN_BACKOFF.as_secs()
                            );
                            delay_for(RESPAWN_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }
}

async fn discover(
    client: &kube::Client,
    env_defaults: &AutoscalingConfig,
    key_prefix: &str,
    namespace: &Option<String>,
    daemon_delay: Duration,
    tracked: &mut HashMap<ObjectKey, watch::Sender<bool>>,
    running: &mut FuturesUnordered<CompletionFuture>,
) -> Result<()> {
    let objects = list_opted_in(client.clone(), namespace.as_deref(), key_prefix).await?;
    let mut seen = HashSet::new();

    for obj in &objects {
        let meta = kube::api::Meta::meta(obj);
        let key = ObjectKey {
            namespace: meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
            name: kube::api::Meta::name(obj),
        };
        seen.insert(key.clone());

        if !tracked.contains_key(&key) {
            info!("{}/{}: opted into autoscaling, starting loop", key.namespace, key.name);
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let fut = reconcile::run(
                client.clone(),
                env_defaults.clone(),
                key_prefix.to_string(),
                key.name.clone(),
                key.namespace.clone(),
                daemon_delay,
                cancel_rx,
            );
            let key_for_completion = key.clone();
            running.push(Box::pin(async move { (key_for_completion, fut.await) }));
            tracked.insert(key, cancel_tx);
        }
    }

    let stale: Vec<ObjectKey> = tracked.keys().filter(|k| !seen.contains(k)).cloned().collect();
    for key in stale {
        if let Some(cancel_tx) = tracked.remove(&key) {
            info!("{}/{}: no longer opted in, cancelling loop", key.namespace, key.name);
            let _ = cancel_tx.broadcast(true);
        }
    }

    Ok(())
}
