//! Typed CloudFormation resource properties for everything a pipeline needs.
//!
//! Field names serialize to the property names CloudFormation expects, so a
//! declaration can be dropped into a template as-is.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::context::TargetResolution;

pub const POLICY_VERSION: &str = "2012-10-17";

pub trait CfnResource: Serialize {
    const RESOURCE_TYPE: &'static str;
}

/// A property holding either a literal ARN or the ARN attribute of another
/// resource in the same template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Arn {
    Literal(String),
    Attribute(GetAtt),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetAtt {
    #[serde(rename = "Fn::GetAtt")]
    pub target: [String; 2],
}

impl Arn {
    pub fn of(logical_id: &str) -> Self {
        Arn::Attribute(GetAtt {
            target: [logical_id.to_string(), String::from("Arn")],
        })
    }
}

/// A resource together with its template key and the keys it must wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declared<T> {
    pub logical_id: String,
    pub properties: T,
    pub depends_on: Vec<String>,
}

impl<T> Declared<T> {
    pub fn new(logical_id: String, properties: T) -> Self {
        return Self {
            logical_id,
            properties,
            depends_on: Vec::new(),
        };
    }

    pub fn add_depends_on<U>(&mut self, dependency: &Declared<U>) {
        self.depends_on.push(dependency.logical_id.clone());
    }

    pub fn arn(&self) -> Arn {
        Arn::of(&self.logical_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Role {
    pub role_name: String,
    pub assume_role_policy_document: PolicyDocument,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<String>,
    pub policies: Vec<InlinePolicy>,
}

impl CfnResource for Role {
    const RESOURCE_TYPE: &'static str = "AWS::IAM::Role";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InlinePolicy {
    pub policy_name: String,
    pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<Statement>) -> Self {
        return Self {
            version: String::from(POLICY_VERSION),
            statement,
        };
    }

    /// Trust policy letting `service` assume the role.
    pub fn trust(service: &str) -> Self {
        let statement = Statement {
            effect: String::from("Allow"),
            principal: Some(Principal {
                service: service.to_string(),
            }),
            action: vec![String::from("sts:AssumeRole")],
            resource: Vec::new(),
            condition: None,
        };
        return Self::new(vec![statement]);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl Statement {
    pub fn allow(actions: &[&str], resources: Vec<String>) -> Self {
        return Self {
            effect: String::from("Allow"),
            principal: None,
            action: actions.iter().map(|action| action.to_string()).collect(),
            resource: resources,
            condition: None,
        };
    }

    pub fn allow_everywhere(actions: &[&str]) -> Self {
        Self::allow(actions, vec![String::from("*")])
    }

    pub fn with_condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogGroup {
    pub log_group_name: String,
}

impl CfnResource for LogGroup {
    const RESOURCE_TYPE: &'static str = "AWS::Logs::LogGroup";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Project {
    pub name: String,
    pub artifacts: Typed,
    pub source: Typed,
    pub logs_config: LogsConfig,
    pub environment: BuildEnvironment,
    pub service_role: Arn,
}

impl CfnResource for Project {
    const RESOURCE_TYPE: &'static str = "AWS::CodeBuild::Project";
}

impl Project {
    pub fn environment_variable(&self, name: &str) -> Option<&str> {
        self.environment
            .environment_variables
            .iter()
            .find(|variable| variable.name == name)
            .map(|variable| variable.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Typed {
    #[serde(rename = "Type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogsConfig {
    pub cloud_watch_logs: CloudWatchLogs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CloudWatchLogs {
    pub status: String,
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BuildEnvironment {
    pub compute_type: String,
    pub image: String,
    pub privileged_mode: bool,
    #[serde(rename = "Type")]
    pub kind: String,
    pub environment_variables: Vec<EnvironmentVariable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Pipeline {
    pub name: String,
    pub role_arn: Arn,
    pub artifact_store: ArtifactStoreLocation,
    pub stages: Vec<Stage>,
}

impl CfnResource for Pipeline {
    const RESOURCE_TYPE: &'static str = "AWS::CodePipeline::Pipeline";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArtifactStoreLocation {
    #[serde(rename = "Type")]
    pub kind: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Action {
    pub name: String,
    pub action_type_id: ActionTypeId,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_artifacts: Vec<Artifact>,
    pub configuration: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionTypeId {
    pub category: ActionCategory,
    pub owner: String,
    pub provider: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionCategory {
    Source,
    Build,
    Deploy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Artifact {
    pub name: String,
}

impl Artifact {
    pub fn named(name: &str) -> Self {
        return Self {
            name: name.to_string(),
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rule {
    pub name: String,
    pub event_pattern: Value,
    pub targets: Vec<RuleTarget>,
}

impl CfnResource for Rule {
    const RESOURCE_TYPE: &'static str = "AWS::Events::Rule";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleTarget {
    pub arn: String,
    pub id: String,
    pub role_arn: Arn,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub dependent: String,
    pub dependency: String,
}

/// Every resource compiled from one pipeline record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBundle {
    pub pipeline_name: String,
    pub target: TargetResolution,
    pub pipeline_arn: String,
    pub repository_arn: String,
    pub build_role: Declared<Role>,
    pub log_group: Declared<LogGroup>,
    pub build_project: Declared<Project>,
    pub pipeline_role: Declared<Role>,
    pub pipeline: Declared<Pipeline>,
    pub trigger_role: Declared<Role>,
    pub trigger_rule: Declared<Rule>,
}

impl ResourceBundle {
    pub fn logical_ids(&self) -> Vec<&str> {
        vec![
            self.build_role.logical_id.as_str(),
            self.log_group.logical_id.as_str(),
            self.build_project.logical_id.as_str(),
            self.pipeline_role.logical_id.as_str(),
            self.pipeline.logical_id.as_str(),
            self.trigger_role.logical_id.as_str(),
            self.trigger_rule.logical_id.as_str(),
        ]
    }

    pub fn dependency_edges(&self) -> Vec<DependencyEdge> {
        let declared = [
            (&self.build_role.logical_id, &self.build_role.depends_on),
            (&self.log_group.logical_id, &self.log_group.depends_on),
            (&self.build_project.logical_id, &self.build_project.depends_on),
            (&self.pipeline_role.logical_id, &self.pipeline_role.depends_on),
            (&self.pipeline.logical_id, &self.pipeline.depends_on),
            (&self.trigger_role.logical_id, &self.trigger_role.depends_on),
            (&self.trigger_rule.logical_id, &self.trigger_rule.depends_on),
        ];

        declared
            .iter()
            .flat_map(|(dependent, dependencies)| {
                dependencies.iter().map(move |dependency| DependencyEdge {
                    dependent: dependent.to_string(),
                    dependency: dependency.clone(),
                })
            })
            .collect()
    }
}
