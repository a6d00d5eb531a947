use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::debug;
use validator::{Validate, ValidationError};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

/// One pipeline to compile, either listed under `pipelines` in the main
/// config file or stored as its own file in `config_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PipelineRecord {
    #[validate(custom = "validate_pipeline_name")]
    pub pipeline_name: String,

    #[validate(length(min = 1))]
    pub task_name_reference: String,

    #[validate(length(min = 1))]
    pub repo_name_reference: String,

    #[validate(length(min = 1))]
    pub branch_to_watch: String,

    #[validate(length(min = 1))]
    pub cluster_name_reference: String,

    #[validate(length(min = 1))]
    pub service_name_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DeploymentTarget {
    #[validate(length(min = 1))]
    pub repository_uri: String,
}

/// Where pipeline artifacts are stored. The bucket is either named directly
/// or read from the Outputs of an already deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactStoreConfig {
    Bucket {
        bucket_name: String,
        bucket_arn: Option<String>,
    },
    StackOutput {
        stack_name: String,
        output_key: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(custom = "validate_account")]
    pub account: String,

    pub region: Option<String>,

    #[serde(default = "default_stack_id")]
    #[validate(length(min = 1))]
    pub stack_id: String,

    #[serde(default = "default_resource_prefix")]
    #[validate(length(min = 1))]
    pub resource_prefix: String,

    pub config_dir: Option<PathBuf>,

    #[validate(custom = "validate_artifact_store")]
    pub artifact_store: ArtifactStoreConfig,

    #[serde(default)]
    pub deployment_targets: HashMap<String, DeploymentTarget>,

    #[serde(default)]
    #[validate]
    pub pipelines: Vec<PipelineRecord>,
}

fn default_stack_id() -> String {
    String::from("baws-pipelines")
}

fn default_resource_prefix() -> String {
    String::from("baws")
}

pub fn parse(path: &Path) -> Result<Config, Error> {
    let contents = read(path)?;

    let mut config: Config = match serde_yaml::from_str(&contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    match config.validate() {
        Ok(_) => (),
        Err(error) => return Err(Error::ValidationError(error.to_string())),
    }

    let mut task_names: Vec<&String> = config.deployment_targets.keys().collect();
    task_names.sort();
    for task_name in task_names {
        if let Err(error) = config.deployment_targets[task_name].validate() {
            return Err(Error::ValidationError(format!(
                "deployment target {}: {}",
                task_name, error
            )));
        }
    }

    // `config_dir` is relative to the config file, not the working directory.
    if let Some(dir) = config.config_dir.take() {
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.config_dir = Some(base.join(dir));
    }

    return Ok(config);
}

/// Loads one `PipelineRecord` per `*.yml` / `*.yaml` file in `dir`, in file
/// name order.
pub fn load_dir(dir: &Path) -> Result<Vec<PipelineRecord>, Error> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => Ok(entries),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(dir.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(error) => return Err(Error::Unknown(error.to_string())),
        };
        let is_yaml = matches!(
            path.extension().and_then(|extension| extension.to_str()),
            Some("yml") | Some("yaml")
        );
        if path.is_file() && is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = read(&path)?;
        let record: PipelineRecord = match serde_yaml::from_str(&contents) {
            Ok(record) => record,
            Err(error) => {
                return Err(Error::ParsingError(format!(
                    "{}: {}",
                    path.display(),
                    error
                )))
            }
        };
        if let Err(error) = record.validate() {
            return Err(Error::ValidationError(format!(
                "{}: {}",
                path.display(),
                error
            )));
        }
        debug!(path = %path.display(), pipeline = %record.pipeline_name, "loaded pipeline record");
        records.push(record);
    }

    return Ok(records);
}

/// All records of a config: the ones from `config_dir` first, then the ones
/// listed inline.
pub fn collect_records(config: &Config) -> Result<Vec<PipelineRecord>, Error> {
    let mut records = match &config.config_dir {
        Some(dir) => load_dir(dir)?,
        None => Vec::new(),
    };
    records.extend(config.pipelines.iter().cloned());

    return Ok(records);
}

fn read(path: &Path) -> Result<String, Error> {
    match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }
}

fn validate_pipeline_name(pipeline_name: &str) -> Result<(), ValidationError> {
    if pipeline_name.is_empty() || pipeline_name.len() > 100 {
        return Err(ValidationError::new(
            "The pipeline name has to be between 1 and 100 characters long",
        ));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '@' | '_' | '-');
    if !pipeline_name.chars().all(allowed) {
        return Err(ValidationError::new(
            "The pipeline name may only contain letters, digits, `.`, `@`, `_` and `-`",
        ));
    }

    return Ok(());
}

fn validate_account(account: &str) -> Result<(), ValidationError> {
    if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new(
            "The account has to be a 12 digit AWS account id",
        ));
    }

    return Ok(());
}

fn validate_artifact_store(artifact_store: &ArtifactStoreConfig) -> Result<(), ValidationError> {
    let complete = match artifact_store {
        ArtifactStoreConfig::Bucket {
            bucket_name,
            bucket_arn,
        } => !bucket_name.is_empty() && bucket_arn.as_ref().map_or(true, |arn| !arn.is_empty()),
        ArtifactStoreConfig::StackOutput {
            stack_name,
            output_key,
        } => !stack_name.is_empty() && !output_key.is_empty(),
    };
    if !complete {
        return Err(ValidationError::new(
            "The artifact store needs a bucket name or a stack name and output key",
        ));
    }

    return Ok(());
}
