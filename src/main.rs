#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate loggerv;

extern crate prom_shard_autoscaler;

use std::process;

use clap::{App, AppSettings, Arg};
use prom_shard_autoscaler::config::{self, AutoscalingConfig, DEFAULT_KEY_PREFIX};
use prom_shard_autoscaler::{dispatch, kubeapi};

#[tokio::main]
async fn main() {
    let app = App::new("prom-shard-autoscaler")
        .version(crate_version!())
        .setting(AppSettings::ColoredHelp)
        .setting(AppSettings::DeriveDisplayOrder)
        .about("Horizontally autoscales Prometheus shard counts from pod memory usage")
        .arg(Arg::with_name("verbose").short("v").multiple(true).help("Increase verbosity"))
        .arg(
            Arg::with_name("debug")
                .short("d")
                .long("debug")
                .help("Adds line numbers to log statements"),
        )
        .arg(
            Arg::with_name("namespace")
                .short("n")
                .long("namespace")
                .takes_value(true)
                .help("Restrict to a single namespace (default: all namespaces)"),
        )
        .arg(
            Arg::with_name("key-prefix")
                .long("key-prefix")
                .takes_value(true)
                .help("Annotation key prefix for autoscaling config (default: prom-shard-autoscaling.zbialikcloud.io)"),
        );

    let args = app.get_matches();

    // by default, always show INFO messages for now (+1)
    loggerv::Logger::new()
        .verbosity(args.occurrences_of("verbose") + 1)
        .module_path(false)
        .line_numbers(args.is_present("debug"))
        .init()
        .unwrap();

    let key_prefix = args
        .value_of("key-prefix")
        .map(|s| s.to_string())
        .unwrap_or_else(|| config::key_prefix_from_env(DEFAULT_KEY_PREFIX));
    let namespace = args.value_of("namespace").map(|s| s.to_string());

    let result = run(key_prefix, namespace).await;
    if let Err(e) = result {
        println!();
        error!("prom-shard-autoscaler error: {}", e);
        debug!("{:?}", e);
        process::exit(1);
    }
}

async fn run(key_prefix: String, namespace: Option<String>) -> prom_shard_autoscaler::Result<()> {
    let client = kubeapi::make_client().await?;
    let env_defaults = AutoscalingConfig::from_env()?;
    let daemon_delay = config::daemon_delay_from_env()?;
    info!("prom-shard-autoscaler starting, key prefix '{}'", key_prefix);
    dispatch::run(client, env_defaults, key_prefix, namespace, daemon_delay).await
}
