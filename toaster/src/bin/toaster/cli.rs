use std::path::PathBuf;

use clap::{Args, Parser};

#[derive(Parser, Debug, Clone)]
pub struct AppContext {
    /// Cluster configuration file (YAML).
    #[clap(long, env = "TOASTER_CONFIG")]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
#[command(version, about = "Download and convert a dataset end to end", long_about = None)]
pub struct ToastArgs {
    /// Toast JSON describing the dataset.
    pub toast: PathBuf,

    #[command(flatten)]
    pub ctx: AppContext,
}

#[derive(Args, Debug)]
#[command(version, about = "Remove a dataset's raw and converted data", long_about = None)]
pub struct DeleteArgs {
    /// Toast JSON describing the dataset.
    pub toast: PathBuf,

    #[command(flatten)]
    pub ctx: AppContext,
}

#[derive(Args, Debug)]
#[command(version, about = "Show the Spark executor sizing derived from the cluster", long_about = None)]
pub struct EnvArgs {
    #[command(flatten)]
    pub ctx: AppContext,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub enum Cli {
    Toast(ToastArgs),
    Delete(DeleteArgs),
    Env(EnvArgs),
}
