//! Per-object reconciliation loop: cooldown wait, sampling, warmup
//! debouncing, patch emission, bounded-error tolerance.
//!
//! Grounded on
//! `examples/original_source/prometheus_shard_autoscaler/app.py`'s
//! `prom_scaler_async`/`scale_sequence`/`cooldown`, ported onto a
//! `tokio::task` per object (spec.md §5, §9: "model each loop as an
//! independent task owning its state... communicate cancellation via a
//! per-loop cancellation signal").

use std::time::Duration;

use kube::api::Api;
use tokio::sync::watch;
use tokio::time::delay_for;

use crate::calculator::{calculate_desired, PrometheusSpec};
use crate::config::AutoscalingConfig;
use crate::kubeapi::{Prometheus, PrometheusSnapshot};
use crate::metrics::pod_usage;
use crate::patch::{self, SCALE_TIME_ANNOTATION_KEY};
use crate::{Error, ErrorKind, Result};

pub const EVALUATION_INTERVAL: Duration = Duration::from_secs(5);
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const COOLDOWN_SUBINTERVAL: Duration = Duration::from_secs(5);

/// Per-object loop state, reinitialized whenever a loop (re)starts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopState {
    pub prev_desired_shards: i64,
    pub count_warmup: u32,
    pub count_error: u32,
    pub cached_config: Option<AutoscalingConfig>,
}

/// Warmup/cooldown debouncing decision for one tick, pure and independent
/// of I/O so it can be exercised directly by tests.
///
/// Mirrors `scale_sequence`'s branch order exactly: an unchanged desired
/// value resets the counter; a desired value that moved again resets and
/// restarts tracking; only once the *same* desired value has survived
/// `warmup_ticks` further evaluations is a patch emitted — note the `==`
/// comparison (spec.md §9): exactly `warmup_ticks + 1` consecutive matching
/// evaluations are required.
pub fn decide(state: &LoopState, current_shards: i64, desired: i64, warmup_scale_up: u32, warmup_scale_down: u32) -> (LoopState, Option<i64>) {
    let mut next = state.clone();

    if desired == current_shards {
        next.count_warmup = 0;
        return (next, None);
    }
    if desired != state.prev_desired_shards {
        next.prev_desired_shards = desired;
        next.count_warmup = 0;
        return (next, None);
    }
    if desired > current_shards {
        if state.count_warmup == warmup_scale_up {
            next.count_warmup = 0;
            return (next, Some(desired));
        }
        next.count_warmup += 1;
        return (next, None);
    }
    // desired < current_shards
    if state.count_warmup == warmup_scale_down {
        next.count_warmup = 0;
        return (next, Some(desired));
    }
    next.count_warmup += 1;
    (next, None)
}

fn warmup_ticks(seconds: i64) -> u32 {
    ((seconds as f64) / (EVALUATION_INTERVAL.as_secs() as f64)).ceil() as u32
}

async fn sleep_and_log(total_seconds: f64, name: &str) {
    let sub = COOLDOWN_SUBINTERVAL.as_secs() as f64;
    let loops = (total_seconds / sub).ceil() as u64;
    let total = loops as f64 * sub;
    info!("{}: waiting total of {}s for cooldown", name, total);
    for i in 1..=loops {
        delay_for(COOLDOWN_SUBINTERVAL).await;
        info!("{}: waited {} out of {}s", name, i as f64 * sub, total);
    }
}

/// Run the reconciliation loop for one Prometheus object until cancelled or
/// until it exhausts its error budget.
///
/// Re-fetches the object (spec + annotations) from the cluster on every
/// tick rather than caching a snapshot passed in once, since spec.md's
/// config resolver and shard calculator both require the *current* spec
/// and annotations every evaluation (§4.3, §4.5 step 3).
///
/// `initial_delay` is waited out once before the first tick, per spec.md §6
/// `PROM_AUTOSCALER_DAEMON_DELAY`.
pub async fn run(
    client: kube::Client,
    env_defaults: AutoscalingConfig,
    key_prefix: String,
    name: String,
    namespace: String,
    initial_delay: Duration,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    if initial_delay > Duration::from_secs(0) {
        info!("{}: delaying loop start by {}s", name, initial_delay.as_secs());
        delay_for(initial_delay).await;
    }

    let api: Api<Prometheus> = Api::namespaced(client.clone(), &namespace);
    let mut state = LoopState::default();
    let ts_key = format!("{}/{}", key_prefix, SCALE_TIME_ANNOTATION_KEY);

    loop {
        if *cancel.borrow() {
            info!("{}: cancellation observed, stopping loop", name);
            return Ok(());
        }

        match tick(&api, client.clone(), &env_defaults, &key_prefix, &ts_key, &name, &mut state).await {
            Ok(()) => state.count_error = 0,
            Err(e) => {
                state.count_error += 1;
                if state.count_error == MAX_CONSECUTIVE_ERRORS {
                    return Err(ErrorKind::LoopExhausted(name.clone()).into());
                }
                error!("{}: exception caught in reconciliation tick: {}", name, e);
                warn!(
                    "{}: {} error(s) occurred back to back out of {} allowed",
                    name, state.count_error, MAX_CONSECUTIVE_ERRORS
                );
            }
        }

        tokio::select! {
            _ = delay_for(EVALUATION_INTERVAL) => {}
            _ = cancel.recv() => {
                info!("{}: cancellation observed during sleep, stopping loop", name);
                return Ok(());
            }
        }
    }
}

async fn tick(
    api: &Api<Prometheus>,
    client: kube::Client,
    env_defaults: &AutoscalingConfig,
    key_prefix: &str,
    ts_key: &str,
    name: &str,
    state: &mut LoopState,
) -> Result<()> {
    let obj = api
        .get(name)
        .await
        .map_err(|e| -> Error { ErrorKind::ApiError(format!("fetching {}: {}", name, e)).into() })?;
    let snapshot = PrometheusSnapshot::from_crd(&obj)?;

    let cfg = AutoscalingConfig::resolve(env_defaults, &snapshot.annotations, key_prefix, state.cached_config.as_ref())?;
    state.cached_config = Some(cfg.clone());

    // cooldown gate
    match snapshot.annotations.get(ts_key) {
        None => {
            patch::write_timestamp_annotation(api, name, ts_key).await?;
            return Ok(());
        }
        Some(raw) => {
            let prev_ts: f64 = raw
                .parse()
                .map_err(|_| -> Error { ErrorKind::ConfigError(format!("{} has a malformed scale-time annotation", name)).into() })?;
            let remaining = cfg.min_cooldown as f64 - (patch::now_timestamp() - prev_ts);
            if remaining > 0.0 {
                sleep_and_log(remaining, name).await;
            }
        }
    }

    let spec = PrometheusSpec {
        name: name.to_string(),
        shards: snapshot.shards,
        memory_request: snapshot.memory_request.clone(),
    };
    let usage = pod_usage(client, name, &snapshot.namespace, cfg.current_usage_calculator).await?;
    let desired = calculate_desired(&spec, &usage, &cfg)?;

    let wup = warmup_ticks(cfg.min_warmup_scale_up);
    let wdn = warmup_ticks(cfg.min_warmup_scale_down);
    let (next_state, action) = decide(state, snapshot.shards, desired, wup, wdn);
    *state = next_state;

    if let Some(new_shards) = action {
        patch::patch_shards(api, name, ts_key, new_shards).await?;
    } else {
        debug!("{}: no scaling action this tick (warmup count {})", name, state.count_warmup);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_desired_resets_warmup() {
        let state = LoopState {
            prev_desired_shards: 4,
            count_warmup: 3,
            ..LoopState::default()
        };
        let (next, action) = decide(&state, 2, 2, 12, 360);
        assert_eq!(next.count_warmup, 0);
        assert_eq!(action, None);
    }

    #[test]
    fn changed_desired_resets_and_tracks_new_value() {
        let state = LoopState {
            prev_desired_shards: 4,
            count_warmup: 5,
            ..LoopState::default()
        };
        let (next, action) = decide(&state, 2, 6, 12, 360);
        assert_eq!(next.prev_desired_shards, 6);
        assert_eq!(next.count_warmup, 0);
        assert_eq!(action, None);
    }

    #[test]
    fn scale_up_patches_only_at_exactly_w_plus_one_ticks() {
        let wup = 12;
        let mut state = LoopState {
            prev_desired_shards: 4,
            count_warmup: 0,
            ..LoopState::default()
        };
        for i in 0..wup {
            let (next, action) = decide(&state, 2, 4, wup, 360);
            assert_eq!(action, None, "unexpected patch at tick {}", i);
            assert_eq!(next.count_warmup, i + 1);
            state = next;
        }
        let (next, action) = decide(&state, 2, 4, wup, 360);
        assert_eq!(action, Some(4));
        assert_eq!(next.count_warmup, 0);
    }

    #[test]
    fn scale_down_patches_only_at_exactly_w_plus_one_ticks() {
        let wdn = 3;
        let mut state = LoopState {
            prev_desired_shards: 1,
            count_warmup: 0,
            ..LoopState::default()
        };
        for _ in 0..wdn {
            let (next, action) = decide(&state, 4, 1, 12, wdn);
            assert_eq!(action, None);
            state = next;
        }
        let (next, action) = decide(&state, 4, 1, 12, wdn);
        assert_eq!(action, Some(1));
        assert_eq!(next.count_warmup, 0);
    }

    #[test]
    fn warmup_ticks_rounds_up() {
        assert_eq!(warmup_ticks(60), 12);
        assert_eq!(warmup_ticks(1800), 360);
        assert_eq!(warmup_ticks(1), 1);
        assert_eq!(warmup_ticks(4), 1);
        assert_eq!(warmup_ticks(6), 2);
    }
}
