use std::fmt;
use std::path::Path;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ToastError};
use crate::util::join_url;

/// Target format directory name for converted datasets.
pub const TARGET_FORMAT: &str = "bdg";

#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    pub endpoint: String,
    access_key_id: String,
    secret_access_key: String,
    pub region: String,
}

impl S3Config {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            None,
            None,
            "static",
        )
    }

    pub fn build_config(&self) -> aws_sdk_s3::Config {
        log::info!("building s3 client");

        aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::v2024_03_28())
            .force_path_style(true)
            .endpoint_url(&self.endpoint)
            .credentials_provider(self.credentials())
            .region(Region::new(self.region.clone()))
            .build()
    }

    pub fn create_client(&self) -> aws_sdk_s3::Client {
        aws_sdk_s3::Client::from_conf(self.build_config())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DfsSettings {
    /// Root under which converted datasets live.
    pub root_url: String,
    /// Root for downloaded raw sources.
    pub raw_data_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    /// Hosts available to the parallel download pool.
    pub hosts: Vec<String>,
    /// Local scratch dir on each worker.
    pub work_path: String,
    /// Where the fetch agent binary lives on the workers.
    #[serde(default = "default_crumpet_path")]
    pub crumpet_path: String,
    /// Host that external converter jobs are launched from. Local shell
    /// when unset.
    #[serde(default)]
    pub master_host: Option<String>,
}

fn default_crumpet_path() -> String {
    "crumpet".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ClusterSpecs {
    pub num_worker_nodes: u64,
    pub node_cores: u64,
    pub node_memory_bytes: u64,
}

impl ClusterSpecs {
    /// The executor formula divides by every one of these, so a zero in the
    /// YAML must fail at load time rather than panic later.
    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("cluster.num_worker_nodes", self.num_worker_nodes),
            ("cluster.node_cores", self.node_cores),
            ("cluster.node_memory_bytes", self.node_memory_bytes),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::ZeroValue { name });
            }
        }
        Ok(())
    }
}

/// Spark executor sizing derived from the cluster hardware. All worker
/// memory minus a 20% headroom is split evenly across executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparkResources {
    pub cores_per_executor: u64,
    pub executors_per_node: u64,
    pub total_executors: u64,
    pub memory_per_executor: u64,
}

impl SparkResources {
    pub fn from_cluster(specs: &ClusterSpecs) -> Self {
        let cores_per_executor = specs.node_cores.min(4);
        let executors_per_node = specs.node_cores / cores_per_executor;
        SparkResources {
            cores_per_executor,
            executors_per_node,
            total_executors: executors_per_node * specs.num_worker_nodes,
            memory_per_executor: (0.8 * specs.node_memory_bytes as f64
                / executors_per_node as f64) as u64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SparkSettings {
    /// Path to the converter's submit script (adam-submit).
    pub adam_submit: String,
    pub master_uri: String,
    #[serde(default = "default_driver_memory")]
    pub driver_memory: String,
}

fn default_driver_memory() -> String {
    "8g".to_string()
}

/// Process-wide configuration, constructed once at startup and passed by
/// reference into every component.
#[derive(Debug, Deserialize, Clone)]
pub struct ToasterConfig {
    pub dfs: DfsSettings,
    pub workers: WorkerSettings,
    pub cluster: ClusterSpecs,
    pub spark: SparkSettings,
    #[serde(default)]
    pub s3: Option<S3Config>,
}

impl ToasterConfig {
    pub fn load(path: &Path) -> Result<Self, ToastError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ToasterConfig = serde_yaml::from_str(&raw)?;
        config.cluster.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Vcf,
    Bam,
    Sam,
}

impl SourceFormat {
    fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_lowercase().as_str() {
            "vcf" => Ok(SourceFormat::Vcf),
            "bam" => Ok(SourceFormat::Bam),
            "sam" => Ok(SourceFormat::Sam),
            _ => Err(ConfigError::UnknownFormat {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str = match self {
            SourceFormat::Vcf => "vcf",
            SourceFormat::Bam => "bam",
            SourceFormat::Sam => "sam",
        };
        write!(f, "{str}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edition {
    Basic,
    Flat,
    Locuspart,
    FlatLocuspart,
}

impl Edition {
    fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "basic" => Ok(Edition::Basic),
            "flat" => Ok(Edition::Flat),
            "locuspart" => Ok(Edition::Locuspart),
            "flat_locuspart" => Ok(Edition::FlatLocuspart),
            _ => Err(ConfigError::UnknownEdition {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str = match self {
            Edition::Basic => "basic",
            Edition::Flat => "flat",
            Edition::Locuspart => "locuspart",
            Edition::FlatLocuspart => "flat_locuspart",
        };
        write!(f, "{str}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub format: SourceFormat,
    pub compression: bool,
}

// Raw shape of the toast JSON document. Formats and editions arrive as
// strings and are validated into their enums so that a typo is a
// ConfigError, not a silently dropped pipeline stage.
#[derive(Deserialize)]
struct RawToastConfig {
    name: String,
    sources: Vec<RawSource>,
    #[serde(default)]
    editions: Vec<String>,
    #[serde(default, rename = "numPartitionsHint")]
    num_partitions_hint: Option<u32>,
    #[serde(default)]
    converter: Option<String>,
}

#[derive(Deserialize)]
struct RawSource {
    url: String,
    format: String,
    compression: bool,
}

/// One dataset's ETL description, loaded from a JSON document and immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastConfig {
    pub name: String,
    pub sources: Vec<Source>,
    pub editions: Vec<Edition>,
    pub num_partitions_hint: Option<u32>,
    pub converter: Option<String>,
}

impl ToastConfig {
    pub fn load(path: &Path) -> Result<Self, ToastError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ToastError> {
        let raw: RawToastConfig = serde_json::from_str(raw)?;
        if raw.sources.is_empty() {
            return Err(ConfigError::NoSources.into());
        }
        let sources = raw
            .sources
            .into_iter()
            .map(|s| {
                Ok(Source {
                    format: SourceFormat::parse(&s.format)?,
                    url: s.url,
                    compression: s.compression,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let editions = raw
            .editions
            .iter()
            .map(|e| Edition::parse(e))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(ToastConfig {
            name: raw.name,
            sources,
            editions,
            num_partitions_hint: raw.num_partitions_hint,
            converter: raw.converter,
        })
    }

    /// Format declared by the dataset's sources.
    pub fn source_format(&self) -> SourceFormat {
        self.sources[0].format
    }

    /// `<raw root>/<name>` — where downloaded sources land.
    pub fn raw_data_url(&self, dfs: &DfsSettings) -> String {
        join_url(&dfs.raw_data_url, &self.name)
    }

    /// `<root>/<name>` — the converted dataset's home.
    pub fn dataset_url(&self, dfs: &DfsSettings) -> String {
        join_url(&dfs.root_url, &self.name)
    }

    /// `<root>/<name>/bdg/<edition>`.
    pub fn edition_url(&self, dfs: &DfsSettings, edition: Edition) -> String {
        join_url(
            &join_url(&self.dataset_url(dfs), TARGET_FORMAT),
            &edition.to_string(),
        )
    }
}
