//! Turns pipeline records into resource bundles.
//!
//! Each record compiles on its own into a build role, a log group, a CodeBuild
//! project, a pipeline role, a three-stage pipeline and an EventBridge rule
//! (with its role) that starts the pipeline when the watched branch moves.
//! Names are derived from the pipeline name only, so the output is fully
//! deterministic.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::PipelineRecord;
use crate::context::CompileContext;
use crate::resources::{
    Action, ActionCategory, ActionTypeId, Artifact, ArtifactStoreLocation, BuildEnvironment,
    CloudWatchLogs, Declared, EnvironmentVariable, InlinePolicy, LogGroup, LogsConfig, Pipeline,
    PolicyDocument, Project, ResourceBundle, Role, Rule, RuleTarget, Stage, Statement, Typed,
};

pub const SOURCE_ARTIFACT: &str = "app-source";
pub const BUILD_ARTIFACT: &str = "app-build";
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

const ECR_FULL_ACCESS_POLICY: &str =
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryFullAccess";
const BUILD_COMPUTE_TYPE: &str = "BUILD_GENERAL1_SMALL";
const BUILD_IMAGE: &str = "aws/codebuild/standard:2.0";
const BUILD_ENVIRONMENT_TYPE: &str = "LINUX_CONTAINER";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Pipeline name `{0}` is used by more than one pipeline")]
    DuplicatePipelineName(String),

    #[error("Logical id `{0}` is claimed by pipelines `{1}` and `{2}`")]
    LogicalIdCollision(String, String, String),
}

/// A template key produced by two pipelines with different names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalIdCollision {
    pub logical_id: String,
    pub first: String,
    pub second: String,
}

/// What to do when two records share a pipeline name and would therefore
/// produce identically named resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicateNames {
    #[default]
    Warn,
    Reject,
}

pub struct Compiler<'a> {
    context: &'a CompileContext,
    duplicate_names: DuplicateNames,
}

impl<'a> Compiler<'a> {
    pub fn new(context: &'a CompileContext) -> Self {
        return Self {
            context,
            duplicate_names: DuplicateNames::default(),
        };
    }

    pub fn on_duplicate_names(mut self, policy: DuplicateNames) -> Self {
        self.duplicate_names = policy;
        self
    }

    /// Compiles every record, in order, into one bundle each.
    pub fn compile(&self, records: &[PipelineRecord]) -> Result<Vec<ResourceBundle>, Error> {
        let names = records.iter().map(|record| record.pipeline_name.as_str());
        for name in duplicates(names) {
            match self.duplicate_names {
                DuplicateNames::Reject => return Err(Error::DuplicatePipelineName(name)),
                DuplicateNames::Warn => warn!(
                    pipeline = %name,
                    "pipeline name used more than once, resources will collide"
                ),
            }
        }

        let bundles: Vec<ResourceBundle> = records
            .iter()
            .map(|record| self.compile_record(record))
            .collect();

        for collision in find_logical_id_collisions(&bundles) {
            match self.duplicate_names {
                DuplicateNames::Reject => {
                    return Err(Error::LogicalIdCollision(
                        collision.logical_id,
                        collision.first,
                        collision.second,
                    ))
                }
                DuplicateNames::Warn => warn!(
                    logical_id = %collision.logical_id,
                    first = %collision.first,
                    second = %collision.second,
                    "two pipelines claim the same logical id"
                ),
            }
        }
        info!(pipelines = bundles.len(), "compiled pipelines");

        return Ok(bundles);
    }

    pub fn compile_record(&self, record: &PipelineRecord) -> ResourceBundle {
        let context = self.context;
        let naming = Naming::new(&context.resource_prefix, &record.pipeline_name);

        let target = context
            .deployment_targets
            .resolve(&record.task_name_reference);
        if target.is_defaulted() {
            warn!(
                pipeline = %record.pipeline_name,
                task = %record.task_name_reference,
                "no deployment target registered for task, using placeholder repository uri"
            );
        }

        let project_name = format!("{}-build", record.pipeline_name);
        let build_role = Declared::new(
            naming.logical_id("role-code-build"),
            self.build_role(&naming),
        );

        let log_group = Declared::new(
            naming.logical_id("pipeline-log-group"),
            LogGroup {
                log_group_name: format!("/codebuild/{}", record.pipeline_name),
            },
        );

        let mut build_project = Declared::new(
            naming.logical_id("build-project"),
            Project {
                name: project_name.clone(),
                artifacts: typed("CODEPIPELINE"),
                source: typed("CODEPIPELINE"),
                logs_config: LogsConfig {
                    cloud_watch_logs: CloudWatchLogs {
                        status: String::from("ENABLED"),
                        group_name: format!("codebuild/{}", record.pipeline_name),
                    },
                },
                environment: BuildEnvironment {
                    compute_type: String::from(BUILD_COMPUTE_TYPE),
                    image: String::from(BUILD_IMAGE),
                    privileged_mode: true,
                    kind: String::from(BUILD_ENVIRONMENT_TYPE),
                    environment_variables: vec![
                        EnvironmentVariable {
                            name: String::from("CONTAINER_NAME"),
                            value: record.task_name_reference.clone(),
                        },
                        EnvironmentVariable {
                            name: String::from("REPOSITORY_URI"),
                            value: target.repository_uri().to_string(),
                        },
                    ],
                },
                service_role: build_role.arn(),
            },
        );
        build_project.add_depends_on(&build_role);
        build_project.add_depends_on(&log_group);

        let pipeline_role = Declared::new(
            naming.logical_id("role-pipeline"),
            pipeline_role(&naming),
        );

        let mut pipeline = Declared::new(
            naming.logical_id("pipeline"),
            Pipeline {
                name: record.pipeline_name.clone(),
                role_arn: pipeline_role.arn(),
                artifact_store: ArtifactStoreLocation {
                    kind: String::from("S3"),
                    location: context.artifact_store.name.clone(),
                },
                stages: vec![
                    source_stage(&record.repo_name_reference, &record.branch_to_watch),
                    build_stage(&project_name),
                    deploy_stage(
                        &record.cluster_name_reference,
                        &record.service_name_reference,
                    ),
                ],
            },
        );
        pipeline.add_depends_on(&pipeline_role);
        pipeline.add_depends_on(&build_project);

        let pipeline_arn = format!(
            "arn:aws:codepipeline:{}:{}:{}",
            context.region, context.account, record.pipeline_name
        );
        let repository_arn = format!(
            "arn:aws:codecommit:{}:{}:{}",
            context.region, context.account, record.repo_name_reference
        );

        let trigger_role = Declared::new(
            naming.logical_id("rule-role"),
            trigger_role(&naming, &pipeline_arn),
        );
        let mut trigger_rule = Declared::new(
            naming.logical_id("repo-rule"),
            Rule {
                // Deployed rule name, spelling included.
                name: naming.name("repo-watchter"),
                event_pattern: branch_event_pattern(&repository_arn, &record.branch_to_watch),
                targets: vec![RuleTarget {
                    arn: pipeline_arn.clone(),
                    id: String::from("CodePipeline"),
                    role_arn: trigger_role.arn(),
                }],
            },
        );
        trigger_rule.add_depends_on(&trigger_role);

        debug!(
            pipeline = %record.pipeline_name,
            project = %project_name,
            pipeline_arn = %pipeline_arn,
            "compiled pipeline record"
        );

        return ResourceBundle {
            pipeline_name: record.pipeline_name.clone(),
            target,
            pipeline_arn,
            repository_arn,
            build_role,
            log_group,
            build_project,
            pipeline_role,
            pipeline,
            trigger_role,
            trigger_rule,
        };
    }

    fn build_role(&self, naming: &Naming) -> Role {
        let context = self.context;
        let log_group_arn = format!(
            "arn:aws:logs:{}:{}:log-group:codebuild/{}",
            context.region, context.account, naming.pipeline_name
        );

        let statements = vec![
            Statement::allow(
                &[
                    "logs:CreateLogGroup",
                    "logs:CreateLogStream",
                    "logs:PutLogEvents",
                ],
                vec![log_group_arn.clone(), format!("{}:*", log_group_arn)],
            ),
            Statement::allow(
                &[
                    "s3:PutObject",
                    "s3:GetObject",
                    "s3:GetObjectVersion",
                    "s3:GetBucketAcl",
                    "s3:GetBucketLocation",
                ],
                vec![format!("{}*", context.artifact_store.arn)],
            ),
        ];

        return Role {
            role_name: naming.name("codebuild"),
            assume_role_policy_document: PolicyDocument::trust("codebuild.amazonaws.com"),
            managed_policy_arns: vec![String::from(ECR_FULL_ACCESS_POLICY)],
            policies: vec![InlinePolicy {
                policy_name: format!("{}-codebuild-{}", context.resource_prefix, context.stack_id),
                policy_document: PolicyDocument::new(statements),
            }],
        };
    }
}

/// Lists every name that occurs more than once among the bundles.
pub fn find_name_collisions(bundles: &[ResourceBundle]) -> Vec<String> {
    duplicates(bundles.iter().map(|bundle| bundle.pipeline_name.as_str()))
}

/// Lists every logical id claimed by bundles of two different pipeline names.
/// Bundles sharing a pipeline name are reported by `find_name_collisions`.
pub fn find_logical_id_collisions(bundles: &[ResourceBundle]) -> Vec<LogicalIdCollision> {
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    let mut collisions = Vec::new();

    for bundle in bundles {
        for logical_id in bundle.logical_ids() {
            match owners.get(logical_id) {
                Some(owner) if *owner != bundle.pipeline_name => {
                    collisions.push(LogicalIdCollision {
                        logical_id: logical_id.to_string(),
                        first: owner.to_string(),
                        second: bundle.pipeline_name.clone(),
                    })
                }
                Some(_) => {}
                None => {
                    owners.insert(logical_id, bundle.pipeline_name.as_str());
                }
            }
        }
    }

    collisions
}

fn duplicates<'n>(names: impl Iterator<Item = &'n str>) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in names {
        *counts.entry(name).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect()
}

struct Naming<'a> {
    prefix: &'a str,
    pipeline_name: &'a str,
}

impl<'a> Naming<'a> {
    fn new(prefix: &'a str, pipeline_name: &'a str) -> Self {
        return Self {
            prefix,
            pipeline_name,
        };
    }

    /// `{prefix}-{kind}-{pipeline}`, the physical name of a resource.
    fn name(&self, kind: &str) -> String {
        format!("{}-{}-{}", self.prefix, kind, self.pipeline_name)
    }

    fn logical_id(&self, kind: &str) -> String {
        logical_id(&[self.prefix, kind, self.pipeline_name])
    }
}

/// Template keys must be alphanumeric: `["baws", "build-project", "svc-a"]`
/// becomes `BawsBuildProjectSvcA` followed by eight hex digits of a SHA-256
/// over the length-prefixed parts. Parts that only differ in punctuation, or
/// that join into the same string (`pipeline` + `log-group-svc` and
/// `pipeline-log-group` + `svc`), get different ids.
pub fn logical_id(parts: &[&str]) -> String {
    let readable: String = parts
        .iter()
        .flat_map(|part| part.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();

    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let suffix: String = digest[..4]
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect();

    format!("{}{}", readable, suffix)
}

fn typed(kind: &str) -> Typed {
    Typed {
        kind: kind.to_string(),
    }
}

fn action_type(category: ActionCategory, provider: &str) -> ActionTypeId {
    ActionTypeId {
        category,
        owner: String::from("AWS"),
        provider: provider.to_string(),
        version: String::from("1"),
    }
}

fn configuration(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn source_stage(repository_name: &str, branch: &str) -> Stage {
    Stage {
        name: String::from("source-pull"),
        actions: vec![Action {
            name: String::from("sourcepull-action"),
            action_type_id: action_type(ActionCategory::Source, "CodeCommit"),
            input_artifacts: Vec::new(),
            output_artifacts: vec![Artifact::named(SOURCE_ARTIFACT)],
            configuration: configuration(&[
                ("RepositoryName", repository_name),
                ("BranchName", branch),
            ]),
        }],
    }
}

fn build_stage(project_name: &str) -> Stage {
    Stage {
        name: String::from("build"),
        actions: vec![Action {
            name: String::from("build-action"),
            action_type_id: action_type(ActionCategory::Build, "CodeBuild"),
            input_artifacts: vec![Artifact::named(SOURCE_ARTIFACT)],
            output_artifacts: vec![Artifact::named(BUILD_ARTIFACT)],
            configuration: configuration(&[("ProjectName", project_name)]),
        }],
    }
}

fn deploy_stage(cluster_name: &str, service_name: &str) -> Stage {
    Stage {
        name: String::from("ecs-deploy"),
        actions: vec![Action {
            name: String::from("ecs-deploy-action"),
            action_type_id: action_type(ActionCategory::Deploy, "ECS"),
            input_artifacts: vec![Artifact::named(BUILD_ARTIFACT)],
            output_artifacts: Vec::new(),
            configuration: configuration(&[
                ("ClusterName", cluster_name),
                ("ServiceName", service_name),
                ("FileName", IMAGE_DEFINITIONS_FILE),
            ]),
        }],
    }
}

fn pipeline_role(naming: &Naming) -> Role {
    let pass_role = Statement::allow_everywhere(&["iam:PassRole"]).with_condition(json!({
        "StringEqualsIfExists": {
            "iam:PassedToService": ["ec2.amazonaws.com", "ecs-tasks.amazonaws.com"]
        }
    }));

    let statements = vec![
        pass_role,
        Statement::allow_everywhere(&[
            "codecommit:CancelUploadArchive",
            "codecommit:GetBranch",
            "codecommit:GetCommit",
            "codecommit:GetUploadArchiveStatus",
            "codecommit:UploadArchive",
        ]),
        Statement::allow_everywhere(&[
            "codedeploy:CreateDeployment",
            "codedeploy:GetApplication",
            "codedeploy:GetApplicationRevision",
            "codedeploy:GetDeployment",
            "codedeploy:GetDeploymentConfig",
            "codedeploy:RegisterApplicationRevision",
        ]),
        Statement::allow_everywhere(&[
            "ec2:*",
            "elasticloadbalancing:*",
            "autoscaling:*",
            "cloudwatch:*",
            "s3:*",
            "sns:*",
            "sqs:*",
            "ecs:*",
        ]),
        Statement::allow_everywhere(&["codebuild:BatchGetBuilds", "codebuild:StartBuild"]),
        Statement::allow_everywhere(&["ecr:DescribeImages"]),
    ];

    Role {
        role_name: naming.name("pipeline"),
        assume_role_policy_document: PolicyDocument::trust("codepipeline.amazonaws.com"),
        managed_policy_arns: Vec::new(),
        policies: vec![InlinePolicy {
            policy_name: naming.name("policy-pipeline"),
            policy_document: PolicyDocument::new(statements),
        }],
    }
}

fn trigger_role(naming: &Naming, pipeline_arn: &str) -> Role {
    Role {
        role_name: naming.name("codecommit-watcher"),
        assume_role_policy_document: PolicyDocument::trust("events.amazonaws.com"),
        managed_policy_arns: Vec::new(),
        policies: vec![InlinePolicy {
            policy_name: naming.name("codecommit-watcher-policy"),
            policy_document: PolicyDocument::new(vec![Statement::allow(
                &["codepipeline:StartPipelineExecution"],
                vec![pipeline_arn.to_string()],
            )]),
        }],
    }
}

fn branch_event_pattern(repository_arn: &str, branch: &str) -> serde_json::Value {
    json!({
        "source": ["aws.codecommit"],
        "detail-type": ["CodeCommit Repository State Change"],
        "resources": [repository_arn],
        "detail": {
            "event": ["referenceCreated", "referenceUpdated"],
            "referenceType": ["branch"],
            "referenceName": [branch]
        }
    })
}
