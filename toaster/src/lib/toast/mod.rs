use std::fmt;

use async_trait::async_trait;
use log::info;
use tokio::sync::Mutex;

use crate::config::{Edition, SourceFormat, SparkResources, ToastConfig, ToasterConfig};
use crate::dag::TaskGraph;
use crate::dfs::{DfsClient, DfsPath};
use crate::errors::{ConfigError, TaskError, ToastError};
use crate::exec::CommandRunner;
use crate::fetch::{FetchPool, WorkItem};

/// Which external conversion a dataset goes through, with the source
/// formats that conversion accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    Variants,
    Alignments,
}

impl ConversionKind {
    pub fn for_format(format: SourceFormat) -> ConversionKind {
        match format {
            SourceFormat::Vcf => ConversionKind::Variants,
            SourceFormat::Bam | SourceFormat::Sam => ConversionKind::Alignments,
        }
    }

    pub fn from_name(name: &str) -> Result<ConversionKind, ConfigError> {
        match name {
            "vcf2adam" => Ok(ConversionKind::Variants),
            "transform" => Ok(ConversionKind::Alignments),
            _ => Err(ConfigError::UnknownConverter {
                name: name.to_string(),
            }),
        }
    }

    pub fn adam_command(&self) -> &'static str {
        match self {
            ConversionKind::Variants => "vcf2adam",
            ConversionKind::Alignments => "transform",
        }
    }

    pub fn allowed_formats(&self) -> &'static [SourceFormat] {
        match self {
            ConversionKind::Variants => &[SourceFormat::Vcf],
            ConversionKind::Alignments => &[SourceFormat::Sam, SourceFormat::Bam],
        }
    }
}

/// Identity of one pipeline task. The dataset itself is fixed per graph, so
/// the kind plus its parameters is the whole identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskSpec {
    /// Fan the toast config's sources out to the download pool.
    Download,
    /// Convert raw sources into the basic edition of the target format.
    Convert,
    /// Flatten the basic edition.
    Flatten,
    /// Repartition by locus into the given edition.
    Partition { edition: Edition },
    /// Aggregation of everything the toast config asked for.
    ToastAll,
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSpec::Download => write!(f, "download"),
            TaskSpec::Convert => write!(f, "convert"),
            TaskSpec::Flatten => write!(f, "flatten"),
            TaskSpec::Partition { edition } => write!(f, "partition:{edition}"),
            TaskSpec::ToastAll => write!(f, "toast"),
        }
    }
}

/// The fixed ETL catalog for one dataset, wired per its toast config.
pub struct ToastGraph<'a> {
    toast: &'a ToastConfig,
    config: &'a ToasterConfig,
    dfs: &'a dyn DfsClient,
    runner: &'a dyn CommandRunner,
    pool: Mutex<FetchPool>,
    kind: ConversionKind,
}

impl<'a> ToastGraph<'a> {
    pub fn new(
        toast: &'a ToastConfig,
        config: &'a ToasterConfig,
        dfs: &'a dyn DfsClient,
        runner: &'a dyn CommandRunner,
        pool: FetchPool,
    ) -> Result<Self, ToastError> {
        let kind = match &toast.converter {
            Some(name) => ConversionKind::from_name(name)?,
            None => ConversionKind::for_format(toast.source_format()),
        };
        Ok(ToastGraph {
            toast,
            config,
            dfs,
            runner,
            pool: Mutex::new(pool),
            kind,
        })
    }

    fn raw_path(&self) -> Result<DfsPath, ConfigError> {
        DfsPath::parse(&self.toast.raw_data_url(&self.config.dfs))
    }

    fn edition_path(&self, edition: Edition) -> Result<DfsPath, ConfigError> {
        DfsPath::parse(&self.toast.edition_url(&self.config.dfs, edition))
    }

    /// The artifact a task's completion is judged by. `ToastAll` aggregates
    /// and has no artifact of its own.
    fn output_of(&self, node: &TaskSpec) -> Result<Option<DfsPath>, ConfigError> {
        let output = match node {
            TaskSpec::Download => Some(self.raw_path()?),
            TaskSpec::Convert => Some(self.edition_path(Edition::Basic)?),
            TaskSpec::Flatten => Some(self.edition_path(Edition::Flat)?),
            TaskSpec::Partition { edition } => Some(self.edition_path(*edition)?),
            TaskSpec::ToastAll => None,
        };
        Ok(output)
    }

    async fn submit(&self, node: &TaskSpec, args: &str) -> Result<(), ToastError> {
        let resources = SparkResources::from_cluster(&self.config.cluster);
        let script = format!(
            "{} --master {} --driver-memory {} --num-executors {} \
             --executor-cores {} --executor-memory {} -- {}",
            self.config.spark.adam_submit,
            self.config.spark.master_uri,
            self.config.spark.driver_memory,
            resources.total_executors,
            resources.cores_per_executor,
            resources.memory_per_executor,
            args
        );
        info!("submitting {node}: {script}");
        let status = self.runner.run(&script).await?;
        if status != 0 {
            return Err(TaskError::CommandFailed {
                task: node.to_string(),
                status,
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl TaskGraph for ToastGraph<'_> {
    type Node = TaskSpec;

    fn prerequisites(&self, node: &TaskSpec) -> Vec<TaskSpec> {
        match node {
            TaskSpec::Download => vec![],
            TaskSpec::Convert => vec![TaskSpec::Download],
            TaskSpec::Flatten => vec![TaskSpec::Convert],
            TaskSpec::Partition {
                edition: Edition::FlatLocuspart,
            } => vec![TaskSpec::Flatten],
            TaskSpec::Partition { .. } => vec![TaskSpec::Convert],
            TaskSpec::ToastAll => {
                // The basic edition is always produced, whether requested
                // or not.
                let mut deps = vec![TaskSpec::Convert];
                for edition in &self.toast.editions {
                    match edition {
                        Edition::Basic => {}
                        Edition::Flat => deps.push(TaskSpec::Flatten),
                        Edition::Locuspart => deps.push(TaskSpec::Partition {
                            edition: Edition::Locuspart,
                        }),
                        Edition::FlatLocuspart => deps.push(TaskSpec::Partition {
                            edition: Edition::FlatLocuspart,
                        }),
                    }
                }
                deps
            }
        }
    }

    async fn is_complete(&self, node: &TaskSpec) -> Result<bool, ToastError> {
        match node {
            TaskSpec::ToastAll => {
                for dep in self.prerequisites(node) {
                    if let Some(output) = self.output_of(&dep)? {
                        if !self.dfs.is_complete(&output).await? {
                            return Ok(false);
                        }
                    }
                }
                Ok(true)
            }
            other => match self.output_of(other)? {
                Some(output) => Ok(self.dfs.is_complete(&output).await?),
                None => Ok(false),
            },
        }
    }

    async fn run(&self, node: &TaskSpec) -> Result<(), ToastError> {
        match node {
            TaskSpec::Download => {
                let raw = self.raw_path()?;
                let items = self
                    .toast
                    .sources
                    .iter()
                    .map(|source| WorkItem::from_source(source, &raw))
                    .collect();
                self.pool.lock().await.download_all(self.dfs, items, &raw).await
            }
            TaskSpec::Convert => {
                let format = self.toast.source_format();
                if !self.kind.allowed_formats().contains(&format) {
                    return Err(TaskError::UnsupportedFormat {
                        format: format.to_string(),
                        allowed: self
                            .kind
                            .allowed_formats()
                            .iter()
                            .map(|f| f.to_string())
                            .collect(),
                    }
                    .into());
                }
                let raw = self.raw_path()?;
                let target = self.edition_path(Edition::Basic)?;
                self.submit(node, &format!("{} {raw} {target}", self.kind.adam_command()))
                    .await
            }
            TaskSpec::Flatten => {
                let source = self.edition_path(Edition::Basic)?;
                let target = self.edition_path(Edition::Flat)?;
                self.submit(node, &format!("flatten {source} {target}")).await
            }
            TaskSpec::Partition { edition } => {
                let source = match edition {
                    Edition::FlatLocuspart => self.edition_path(Edition::Flat)?,
                    _ => self.edition_path(Edition::Basic)?,
                };
                let target = self.edition_path(*edition)?;
                let parallelism = self.toast.num_partitions_hint.unwrap_or(1);
                self.submit(
                    node,
                    &format!(
                        "repartition --strategy locus --parallelism {parallelism} {source} {target}"
                    ),
                )
                .await
            }
            TaskSpec::ToastAll => Ok(()),
        }
    }
}

/// Removes a dataset's raw and converted data. The next toast starts from
/// scratch.
pub async fn delete_dataset(
    toast: &ToastConfig,
    config: &ToasterConfig,
    dfs: &dyn DfsClient,
) -> Result<(), ToastError> {
    for url in [
        toast.raw_data_url(&config.dfs),
        toast.dataset_url(&config.dfs),
    ] {
        let path = DfsPath::parse(&url)?;
        if dfs.exists(&path).await? {
            info!("removing {path}");
            dfs.rm(&path, true).await?;
        }
    }
    Ok(())
}
