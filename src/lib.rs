#![recursion_limit = "1024"]

#[macro_use]
extern crate serde_derive;
extern crate serde_json;

#[macro_use]
extern crate log;

#[macro_use]
extern crate error_chain;
error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {}
    foreign_links {
        Float(::std::num::ParseFloatError);
        Int(::std::num::ParseIntError);
        SerdeJ(serde_json::Error);
        KubeError(kube::Error);
    }
    errors {
        /// metrics-server has no usable data for a Prometheus object this tick
        MetricsUnavailable(name: String) {
            description("metrics unavailable")
            display("no usable pod metrics for {}", name)
        }
        /// an annotation override or environment default could not be parsed
        ConfigError(detail: String) {
            description("invalid autoscaling configuration")
            display("invalid autoscaling configuration: {}", detail)
        }
        /// a Kubernetes API call (list/patch/watch) failed
        ApiError(detail: String) {
            description("kubernetes api call failed")
            display("kubernetes api call failed: {}", detail)
        }
        /// a resource quantity string could not be parsed
        InvalidQuantity(raw: String) {
            description("invalid resource quantity")
            display("invalid resource quantity: '{}'", raw)
        }
        /// a loop accumulated 5 consecutive tick errors and must be restarted
        LoopExhausted(name: String) {
            description("reconciliation loop exhausted its error budget")
            display("reconciliation loop for {} failed 5 consecutive times", name)
        }
    }
}

/// Exact decimal parsing of Kubernetes canonical resource quantities.
pub mod quantity;

/// Per-tick configuration merge: process defaults + annotation overrides.
pub mod config;

/// metrics-server pod usage aggregation.
pub mod metrics;

/// Desired shard count calculation under the configured algorithm.
pub mod calculator;

/// Strategic-merge patch emission against the Prometheus object.
pub mod patch;

/// Thin Kubernetes client wrapper used by the loop and the dispatcher.
pub mod kubeapi;

/// Per-object reconciliation loop: cooldown, sampling, warmup, patching.
pub mod reconcile;

/// Minimal watch-and-dispatch: finds opted-in Prometheus objects and spawns loops.
pub mod dispatch;

pub use crate::calculator::PrometheusSpec;
pub use crate::config::AutoscalingConfig;
pub use crate::metrics::Usage;
pub use crate::reconcile::LoopState;
