use aws_sdk_s3::operation::{
    copy_object::CopyObjectError, delete_object::DeleteObjectError, get_object::GetObjectError,
    head_object::HeadObjectError, list_objects_v2::ListObjectsV2Error,
    put_object::PutObjectError,
};
use aws_sdk_s3::primitives::ByteStreamError;
use itertools::Itertools;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToastError {
    #[error("Config Error {source:?}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Storage Error {source:?}")]
    Storage {
        #[from]
        source: StorageError,
    },

    #[error("Task Error {source:?}")]
    Task {
        #[from]
        source: TaskError,
    },

    #[error("Fetch Error {source:?}")]
    Fetch {
        #[from]
        source: FetchError,
    },

    #[error("serde_json Error {source:?}")]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },

    #[error("serde_yaml Error {source:?}")]
    SerdeYaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("IO Error {source:?}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} is not set")]
    MissingValue { name: String },

    #[error("Unrecognized URI scheme: {url}")]
    UnrecognizedScheme { url: String },

    #[error("Unknown source format: {name}")]
    UnknownFormat { name: String },

    #[error("Unknown edition: {name}")]
    UnknownEdition { name: String },

    #[error("Unknown converter: {name}")]
    UnknownConverter { name: String },

    #[error("{name} must be nonzero")]
    ZeroValue { name: &'static str },

    #[error("Toast config has no sources")]
    NoSources,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("'{op}' exited with status {status}")]
    CommandFailed { op: String, status: i32 },

    #[error("no {scheme} backend configured")]
    BackendUnavailable { scheme: &'static str },

    #[error("IO Error {source:?}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error(transparent)]
    SdkHeadObjectError {
        #[from]
        source: aws_sdk_s3::error::SdkError<HeadObjectError>,
    },

    #[error(transparent)]
    SdkGetObjectError {
        #[from]
        source: aws_sdk_s3::error::SdkError<GetObjectError>,
    },

    #[error(transparent)]
    SdkPutObjectError {
        #[from]
        source: aws_sdk_s3::error::SdkError<PutObjectError>,
    },

    #[error(transparent)]
    SdkCopyObjectError {
        #[from]
        source: aws_sdk_s3::error::SdkError<CopyObjectError>,
    },

    #[error(transparent)]
    SdkDeleteObjectError {
        #[from]
        source: aws_sdk_s3::error::SdkError<DeleteObjectError>,
    },

    #[error(transparent)]
    SdkListObjectsError {
        #[from]
        source: aws_sdk_s3::error::SdkError<ListObjectsV2Error>,
    },

    #[error(transparent)]
    ByteStreamError {
        #[from]
        source: ByteStreamError,
    },
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task {task} ran but its output {output} is still missing")]
    OutputMissing { task: String, output: String },

    #[error("dependency cycle detected at task {task}")]
    CyclicDependency { task: String },

    #[error("format '{format}' not in allowed formats [{}]", allowed.iter().join(", "))]
    UnsupportedFormat {
        format: String,
        allowed: Vec<String>,
    },

    #[error("task {task} command exited with status {status}")]
    CommandFailed { task: String, status: i32 },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{} download(s) failed: {}", failed.len(), failed.iter().join(", "))]
    PartialFailure { failed: Vec<String> },

    #[error("downloads pending but no worker hosts configured")]
    NoWorkers,
}
