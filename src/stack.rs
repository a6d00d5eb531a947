use aws_config::meta::region::RegionProviderChain;
use aws_sdk_cloudformation::model::Output;
use aws_sdk_cloudformation::output::DescribeStacksOutput;
use aws_types::region::Region;
use tracing::{debug, info};

use crate::config::ArtifactStoreConfig;
use crate::context::ArtifactStore;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),

    #[error("Stack {0} not found")]
    NotFoundError(String),

    #[error("Stack {0} has no output {1}")]
    OutputNotFound(String, String),

    #[error("No region configured and none found in the environment")]
    RegionNotResolved,
}

/// Uses the configured region, falling back to the default provider chain
/// (environment, profile, instance metadata).
pub async fn resolve_region(configured: Option<&str>) -> Result<Region, Error> {
    match configured {
        Some(region) => Ok(Region::new(region.to_string())),
        None => RegionProviderChain::default_provider()
            .region()
            .await
            .ok_or(Error::RegionNotResolved),
    }
}

pub async fn resolve_artifact_store(
    config: &ArtifactStoreConfig,
    region: &Region,
) -> Result<ArtifactStore, Error> {
    match config {
        ArtifactStoreConfig::Bucket {
            bucket_name,
            bucket_arn,
        } => Ok(match bucket_arn {
            Some(arn) => ArtifactStore::new(bucket_name.clone(), arn.clone()),
            None => ArtifactStore::from_bucket_name(bucket_name.clone()),
        }),
        ArtifactStoreConfig::StackOutput {
            stack_name,
            output_key,
        } => {
            let stack = Stack::new(stack_name.clone(), region.clone()).await;
            let bucket_name = stack.get_output(output_key).await?;
            info!(
                stack = %stack_name,
                bucket = %bucket_name,
                "resolved artifact bucket from stack output"
            );

            Ok(ArtifactStore::from_bucket_name(bucket_name))
        }
    }
}

pub struct Stack {
    pub stack_name: String,

    client: aws_sdk_cloudformation::Client,
}

impl Stack {
    pub async fn new(stack_name: String, region: Region) -> Self {
        let sdk_config = aws_config::from_env().region(region).load().await;
        let client = aws_sdk_cloudformation::Client::new(&sdk_config);

        return Self { stack_name, client };
    }

    pub async fn get_outputs(&self) -> Result<Vec<Output>, Error> {
        debug!(stack = %self.stack_name, "describing stack");
        let result = self
            .client
            .describe_stacks()
            .stack_name(&self.stack_name)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(aws_sdk_cloudformation::types::SdkError::ServiceError { err, .. }) => {
                return Err(Error::ServiceError(err.to_string()));
            }
            Err(err) => return Err(Error::UnknownError(err.to_string())),
        };

        return stack_outputs(&self.stack_name, &result);
    }

    pub async fn get_output(&self, key: &str) -> Result<String, Error> {
        let outputs = self.get_outputs().await?;

        return require_output(&self.stack_name, &outputs, key);
    }
}

/// Outputs of the first stack in a `DescribeStacks` response.
pub fn stack_outputs(
    stack_name: &str,
    response: &DescribeStacksOutput,
) -> Result<Vec<Output>, Error> {
    let stacks = response.stacks().unwrap_or_else(|| &[]);
    let stack = match stacks.first() {
        Some(stack) => stack,
        None => return Err(Error::NotFoundError(stack_name.to_string())),
    };

    let outputs = stack.outputs().unwrap_or_else(|| &[]).to_vec();

    return Ok(outputs);
}

pub fn require_output(stack_name: &str, outputs: &[Output], key: &str) -> Result<String, Error> {
    find_output(outputs, key)
        .ok_or_else(|| Error::OutputNotFound(stack_name.to_string(), key.to_string()))
}

pub fn find_output(outputs: &[Output], key: &str) -> Option<String> {
    outputs
        .iter()
        .find(|output| output.output_key() == Some(key))
        .and_then(|output| output.output_value())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use aws_sdk_cloudformation::model::{Output, Stack as StackDescription};
    use aws_sdk_cloudformation::output::DescribeStacksOutput;
    use aws_types::region::Region;

    use super::{
        find_output, require_output, resolve_artifact_store, resolve_region, stack_outputs, Error,
    };
    use crate::config::ArtifactStoreConfig;
    use crate::context::ArtifactStore;

    fn output(key: &str, value: &str) -> Output {
        Output::builder().output_key(key).output_value(value).build()
    }

    #[test]
    fn finds_output_by_key() {
        let outputs = vec![output("Other", "x"), output("ArtifactBucket", "artifacts")];

        assert_eq!(Some(String::from("artifacts")), find_output(&outputs, "ArtifactBucket"));
        assert_eq!(None, find_output(&outputs, "Missing"));
    }

    #[test]
    fn missing_stack_is_not_found() {
        let response = DescribeStacksOutput::builder().build();

        match stack_outputs("baws-shared", &response).err().unwrap() {
            Error::NotFoundError(stack_name) => assert_eq!("baws-shared", stack_name),
            _ => panic!("Expected `NotFoundError` error"),
        }
    }

    #[test]
    fn reads_outputs_of_described_stack() {
        let stack = StackDescription::builder()
            .stack_name("baws-shared")
            .outputs(output("ArtifactBucket", "artifacts"))
            .build();
        let response = DescribeStacksOutput::builder().stacks(stack).build();

        let outputs = stack_outputs("baws-shared", &response).unwrap();
        assert_eq!(
            Ok(String::from("artifacts")),
            require_output("baws-shared", &outputs, "ArtifactBucket")
        );
    }

    #[test]
    fn stack_without_outputs_has_no_outputs() {
        let stack = StackDescription::builder().stack_name("baws-shared").build();
        let response = DescribeStacksOutput::builder().stacks(stack).build();

        assert_eq!(true, stack_outputs("baws-shared", &response).unwrap().is_empty());
    }

    #[test]
    fn missing_output_key_is_an_error() {
        let outputs = vec![output("Other", "x")];

        assert_eq!(
            Err(Error::OutputNotFound(
                String::from("baws-shared"),
                String::from("ArtifactBucket")
            )),
            require_output("baws-shared", &outputs, "ArtifactBucket")
        );
    }

    #[tokio::test]
    async fn configured_region_wins() {
        let region = resolve_region(Some("eu-central-1")).await.unwrap();
        assert_eq!(Region::new("eu-central-1"), region);
    }

    #[tokio::test]
    async fn bucket_config_needs_no_lookup() {
        let region = Region::new("eu-west-1");
        let config = ArtifactStoreConfig::Bucket {
            bucket_name: String::from("artifacts"),
            bucket_arn: None,
        };
        let store = resolve_artifact_store(&config, &region).await.unwrap();
        assert_eq!(ArtifactStore::from_bucket_name(String::from("artifacts")), store);

        let config = ArtifactStoreConfig::Bucket {
            bucket_name: String::from("artifacts"),
            bucket_arn: Some(String::from("arn:aws-cn:s3:::artifacts")),
        };
        let store = resolve_artifact_store(&config, &region).await.unwrap();
        assert_eq!("arn:aws-cn:s3:::artifacts", store.arn);
    }
}
