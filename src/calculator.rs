//! Desired shard count calculation: the `hpa` and `double-or-decrement`
//! algorithms, followed by step-bound and min/max-shard threshold
//! enforcement, clamp applied last.
//!
//! Grounded on
//! `examples/original_source/prometheus_shard_autoscaler/kube.py`'s
//! `calculate_desired_shards`/`enforce_thresholds`, carrying over its control
//! flow and logging exactly, including the ordering note in spec.md §9:
//! step bounds are enforced before the final `[min_shards, max_shards]`
//! clamp.

use crate::config::{AutoscalingConfig, DesiredShardsAlgorithm};
use crate::metrics::Usage;
use crate::quantity::parse_quantity;
use crate::{Error, ErrorKind, Result};

/// The fields of a Prometheus object's spec the calculator needs.
#[derive(Clone, Debug)]
pub struct PrometheusSpec {
    pub name: String,
    pub shards: i64,
    pub memory_request: String,
}

/// Compute the desired shard count for one tick.
///
/// Returns `spec.shards` unchanged (no action) when `usage.memory == 0`,
/// per spec.md §4.4 and §8 ("usage.memory == 0 ⇒ no patch this tick"). This
/// is the locally-recovered case spec.md §7 carves out for
/// `MetricsUnavailable`: the error is constructed and logged, not returned.
pub fn calculate_desired(spec: &PrometheusSpec, usage: &Usage, cfg: &AutoscalingConfig) -> Result<i64> {
    if usage.memory == 0.0 {
        let unavailable: Error = ErrorKind::MetricsUnavailable(spec.name.clone()).into();
        warn!("{} - is metrics-server available?", unavailable);
        info!("setting desired shards to current ({})", spec.shards);
        return Ok(spec.shards);
    }

    let raw = match cfg.desired_shards_algorithm {
        DesiredShardsAlgorithm::Hpa => desired_shards_hpa(spec, usage, cfg)?,
        DesiredShardsAlgorithm::DoubleOrDecrement => desired_shards_double_or_decrement(spec, usage, cfg)?,
    };

    Ok(enforce_thresholds(raw, spec, cfg))
}

fn desired_shards_hpa(spec: &PrometheusSpec, usage: &Usage, cfg: &AutoscalingConfig) -> Result<i64> {
    let mem_target = parse_quantity(&spec.memory_request)? * cfg.target_memory_util;
    debug!("target memory for {} shards: {} bytes", spec.shards, mem_target);
    let raw = (spec.shards as f64 * usage.memory / mem_target).ceil() as i64;
    Ok(raw)
}

fn desired_shards_double_or_decrement(spec: &PrometheusSpec, usage: &Usage, cfg: &AutoscalingConfig) -> Result<i64> {
    let mem_target = parse_quantity(&spec.memory_request)?;
    let util = usage.memory / mem_target;
    debug!("current memory util: {:.3}", util);

    let raw = if util > cfg.target_memory_util_scale_up {
        debug!(
            "memory util above scale-up target ({:.3}) - doubling shards",
            cfg.target_memory_util_scale_up
        );
        spec.shards * 2
    } else if util < cfg.target_memory_util_scale_down {
        debug!(
            "memory util below scale-down target ({:.3}) - decrementing shards",
            cfg.target_memory_util_scale_down
        );
        spec.shards - 1
    } else {
        debug!("memory util within thresholds - keeping current shards");
        spec.shards
    };
    Ok(raw)
}

fn enforce_thresholds(mut desired: i64, spec: &PrometheusSpec, cfg: &AutoscalingConfig) -> i64 {
    let step = desired - spec.shards;
    if step > 0 {
        if cfg.min_increment > 0 && step < cfg.min_increment {
            debug!("scale-up step below min-increment ({}) - enforcing it", cfg.min_increment);
            desired = spec.shards + cfg.min_increment;
        } else if cfg.max_increment > 0 && step > cfg.max_increment {
            debug!("scale-up step above max-increment ({}) - enforcing it", cfg.max_increment);
            desired = spec.shards + cfg.max_increment;
        }
    } else if step < 0 {
        if cfg.disable_scale_down {
            debug!("scale-down disabled - keeping current shards");
            desired = spec.shards;
        } else if cfg.min_decrement > 0 && step.abs() < cfg.min_decrement {
            debug!("scale-down step below min-decrement ({}) - enforcing it", cfg.min_decrement);
            desired = spec.shards - cfg.min_decrement;
        } else if cfg.max_decrement > 0 && step.abs() > cfg.max_decrement {
            debug!("scale-down step above max-decrement ({}) - enforcing it", cfg.max_decrement);
            desired = spec.shards - cfg.max_decrement;
        }
    }

    if desired > cfg.max_shards {
        debug!("desired shards above max-shards ({}) - clamping", cfg.max_shards);
        desired = cfg.max_shards;
    } else if desired < cfg.min_shards {
        debug!("desired shards below min-shards ({}) - clamping", cfg.min_shards);
        desired = cfg.min_shards;
    }

    info!("desired shards: {}", desired);
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoscalingConfig, DesiredShardsAlgorithm};
    use crate::metrics::Usage;

    fn spec(shards: i64, mem: &str) -> PrometheusSpec {
        PrometheusSpec {
            name: "test-prom".to_string(),
            shards,
            memory_request: mem.to_string(),
        }
    }

    #[test]
    fn zero_usage_returns_current_shards() {
        let s = spec(2, "4Gi");
        let cfg = AutoscalingConfig::default();
        let usage = Usage { cpu: 0.0, memory: 0.0 };
        assert_eq!(calculate_desired(&s, &usage, &cfg).unwrap(), 2);
    }

    #[test]
    fn hpa_scale_up_scenario() {
        // shards=2, requests.memory=4Gi, target=0.75, usage 5Gi/pod (already aggregated)
        let s = spec(2, "4Gi");
        let cfg = AutoscalingConfig {
            desired_shards_algorithm: DesiredShardsAlgorithm::Hpa,
            ..AutoscalingConfig::default()
        };
        let usage = Usage {
            cpu: 0.0,
            memory: 5.0 * 1024f64.powi(3),
        };
        // memTarget = 3Gi, raw = ceil(2 * 5/3) = 4
        assert_eq!(calculate_desired(&s, &usage, &cfg).unwrap(), 4);
    }

    #[test]
    fn double_or_decrement_scale_down_blocked_by_disable() {
        let s = spec(4, "4Gi");
        let cfg = AutoscalingConfig {
            disable_scale_down: true,
            ..AutoscalingConfig::default()
        };
        // util = 0.10 < scale-down threshold 0.25
        let usage = Usage {
            cpu: 0.0,
            memory: 0.10 * 4.0 * 1024f64.powi(3),
        };
        assert_eq!(calculate_desired(&s, &usage, &cfg).unwrap(), 4);
    }

    #[test]
    fn step_bounds_dominate_algorithm_then_clamp_applies() {
        // algorithm=hpa, shards=2, computed raw=10, max-increment=3, maxShards=20
        let s = spec(2, "1Gi");
        let cfg = AutoscalingConfig {
            desired_shards_algorithm: DesiredShardsAlgorithm::Hpa,
            max_increment: 3,
            max_shards: 20,
            target_memory_util: 1.0,
            ..AutoscalingConfig::default()
        };
        // memTarget = 1Gi, need raw=10 => usage.memory = 10/2 * 1Gi = 5Gi
        let usage = Usage {
            cpu: 0.0,
            memory: 5.0 * 1024f64.powi(3),
        };
        assert_eq!(calculate_desired(&s, &usage, &cfg).unwrap(), 5);
    }

    #[test]
    fn annotation_override_clamps_raw_to_four() {
        let s = spec(2, "1Gi");
        let cfg = AutoscalingConfig {
            desired_shards_algorithm: DesiredShardsAlgorithm::Hpa,
            max_shards: 4,
            target_memory_util: 1.0,
            ..AutoscalingConfig::default()
        };
        // raw = ceil(2 * 4) = 8 > maxShards=4
        let usage = Usage {
            cpu: 0.0,
            memory: 4.0 * 1024f64.powi(3),
        };
        assert_eq!(calculate_desired(&s, &usage, &cfg).unwrap(), 4);
    }

    #[test]
    fn min_shards_floor_is_respected() {
        let s = spec(1, "1Gi");
        let cfg = AutoscalingConfig {
            desired_shards_algorithm: DesiredShardsAlgorithm::DoubleOrDecrement,
            min_shards: 1,
            ..AutoscalingConfig::default()
        };
        // util below scale-down threshold => raw = 0, clamp to minShards=1
        let usage = Usage {
            cpu: 0.0,
            memory: 0.01 * 1024f64.powi(3),
        };
        assert_eq!(calculate_desired(&s, &usage, &cfg).unwrap(), 1);
    }

    #[test]
    fn max_shards_ceiling_is_respected() {
        let s = spec(7, "1Gi");
        let cfg = AutoscalingConfig {
            desired_shards_algorithm: DesiredShardsAlgorithm::DoubleOrDecrement,
            max_shards: 7,
            ..AutoscalingConfig::default()
        };
        let usage = Usage {
            cpu: 0.0,
            memory: 0.9 * 1024f64.powi(3),
        };
        assert_eq!(calculate_desired(&s, &usage, &cfg).unwrap(), 7);
    }
}
