use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;

use toasterlib::config::{SparkResources, ToastConfig, ToasterConfig};
use toasterlib::dag::Resolver;
use toasterlib::dfs::Dfs;
use toasterlib::exec::{CommandRunner, ShellRunner, SshRunner};
use toasterlib::fetch::FetchPool;
use toasterlib::toast::{delete_dataset, TaskSpec, ToastGraph};

use crate::cli::Cli;

mod cli;

/// Converter jobs run on the cluster master when one is configured,
/// otherwise through the local shell.
fn master_runner(config: &ToasterConfig) -> Arc<dyn CommandRunner> {
    match &config.workers.master_host {
        Some(host) => Arc::new(SshRunner::new(host)),
        None => Arc::new(ShellRunner),
    }
}

fn load_configs(ctx: &cli::AppContext, toast: &std::path::Path) -> anyhow::Result<(ToasterConfig, ToastConfig)> {
    let config = ToasterConfig::load(&ctx.config)
        .with_context(|| format!("loading {}", ctx.config.display()))?;
    let toast = ToastConfig::load(toast).with_context(|| format!("loading {}", toast.display()))?;
    Ok((config, toast))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    match Cli::parse() {
        Cli::Toast(args) => {
            let (config, toast) = load_configs(&args.ctx, &args.toast)?;
            let runner = master_runner(&config);
            let dfs = Dfs::new(runner.clone(), config.s3.as_ref());
            let pool = FetchPool::new(&config.workers);
            let graph = ToastGraph::new(&toast, &config, &dfs, runner.as_ref(), pool)?;

            info!("toasting {}", toast.name);
            Resolver::new(&graph).resolve(&TaskSpec::ToastAll).await?;
            info!("{} is ready", toast.name);
        }
        Cli::Delete(args) => {
            let (config, toast) = load_configs(&args.ctx, &args.toast)?;
            let runner = master_runner(&config);
            let dfs = Dfs::new(runner, config.s3.as_ref());

            delete_dataset(&toast, &config, &dfs).await?;
            info!("deleted {}", toast.name);
        }
        Cli::Env(args) => {
            let config = ToasterConfig::load(&args.ctx.config)
                .with_context(|| format!("loading {}", args.ctx.config.display()))?;
            let resources = SparkResources::from_cluster(&config.cluster);
            println!("cores_per_executor={}", resources.cores_per_executor);
            println!("executors_per_node={}", resources.executors_per_node);
            println!("total_executors={}", resources.total_executors);
            println!("executor_memory_bytes={}", resources.memory_per_executor);
        }
    }
    Ok(())
}
