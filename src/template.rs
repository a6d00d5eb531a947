use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::resources::{CfnResource, Declared, ResourceBundle};

pub const FORMAT_VERSION: &str = "2010-09-09";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Could not serialize resource {0}: {1}")]
    SerializationError(String, String),

    #[error("Resource {0} of pipeline {2} would replace the one of pipeline {1}")]
    DuplicateLogicalId(String, String, String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    pub description: String,
    pub resources: BTreeMap<String, TemplateResource>,
    /// Pipeline name each resource was compiled from.
    #[serde(skip)]
    owners: BTreeMap<String, String>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub properties: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Template {
    pub fn new(description: String) -> Self {
        return Self {
            format_version: String::from(FORMAT_VERSION),
            description,
            resources: BTreeMap::new(),
            owners: BTreeMap::new(),
        };
    }

    pub fn from_bundles(description: String, bundles: &[ResourceBundle]) -> Result<Self, Error> {
        let mut template = Self::new(description);
        for bundle in bundles {
            template.add_bundle(bundle)?;
        }

        return Ok(template);
    }

    pub fn add_bundle(&mut self, bundle: &ResourceBundle) -> Result<(), Error> {
        let owner = bundle.pipeline_name.as_str();
        self.insert(owner, &bundle.build_role)?;
        self.insert(owner, &bundle.log_group)?;
        self.insert(owner, &bundle.build_project)?;
        self.insert(owner, &bundle.pipeline_role)?;
        self.insert(owner, &bundle.pipeline)?;
        self.insert(owner, &bundle.trigger_role)?;
        self.insert(owner, &bundle.trigger_rule)?;

        return Ok(());
    }

    /// Adds a resource compiled from pipeline `owner` under its logical id.
    /// An entry of the same pipeline name is replaced; an entry of another
    /// pipeline is an error.
    pub fn insert<T: CfnResource>(
        &mut self,
        owner: &str,
        declared: &Declared<T>,
    ) -> Result<(), Error> {
        if let Some(existing) = self.owners.get(&declared.logical_id) {
            if existing != owner {
                return Err(Error::DuplicateLogicalId(
                    declared.logical_id.clone(),
                    existing.clone(),
                    owner.to_string(),
                ));
            }
        }

        let properties = match serde_json::to_value(&declared.properties) {
            Ok(value) => value,
            Err(error) => {
                return Err(Error::SerializationError(
                    declared.logical_id.clone(),
                    error.to_string(),
                ))
            }
        };

        let resource = TemplateResource {
            resource_type: String::from(T::RESOURCE_TYPE),
            properties,
            depends_on: declared.depends_on.clone(),
        };
        self.owners.insert(declared.logical_id.clone(), owner.to_string());
        if self
            .resources
            .insert(declared.logical_id.clone(), resource)
            .is_some()
        {
            warn!(
                logical_id = %declared.logical_id,
                pipeline = %owner,
                "replaced resource of a pipeline with the same name"
            );
        }

        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, Template};
    use crate::compiler::Compiler;
    use crate::config::PipelineRecord;
    use crate::context::{ArtifactStore, CompileContext};
    use crate::resources::ResourceBundle;
    use serde_json::json;

    fn record(pipeline_name: &str) -> PipelineRecord {
        PipelineRecord {
            pipeline_name: String::from(pipeline_name),
            task_name_reference: String::from("task-x"),
            repo_name_reference: String::from("repo-a"),
            branch_to_watch: String::from("main"),
            cluster_name_reference: String::from("cluster-1"),
            service_name_reference: String::from("svc-1"),
        }
    }

    fn bundles(names: &[&str]) -> Vec<ResourceBundle> {
        let context = CompileContext::new(
            String::from("123456789012"),
            String::from("eu-west-1"),
            ArtifactStore::from_bucket_name(String::from("artifacts")),
        );
        let records: Vec<PipelineRecord> = names.iter().map(|name| record(name)).collect();
        Compiler::new(&context).compile(&records).unwrap()
    }

    fn compile_template(names: &[&str]) -> (Vec<ResourceBundle>, Template) {
        let bundles = bundles(names);
        let template = Template::from_bundles(String::from("pipelines"), &bundles).unwrap();
        (bundles, template)
    }

    #[test]
    fn seven_resources_per_pipeline() {
        let (_, template) = compile_template(&["svc-a", "svc-b"]);
        assert_eq!(14, template.resources.len());

        let roles = template
            .resources
            .values()
            .filter(|resource| resource.resource_type == "AWS::IAM::Role")
            .count();
        assert_eq!(6, roles);
    }

    #[test]
    fn resources_carry_type_and_depends_on() {
        let (bundles, template) = compile_template(&["svc-a"]);
        let bundle = &bundles[0];

        let project = &template.resources[&bundle.build_project.logical_id];
        assert_eq!("AWS::CodeBuild::Project", project.resource_type);
        assert_eq!(
            vec![
                bundle.build_role.logical_id.clone(),
                bundle.log_group.logical_id.clone(),
            ],
            project.depends_on
        );
        assert_eq!(
            json!({ "Fn::GetAtt": [bundle.build_role.logical_id, "Arn"] }),
            project.properties["ServiceRole"]
        );

        let pipeline = &template.resources[&bundle.pipeline.logical_id];
        assert_eq!("AWS::CodePipeline::Pipeline", pipeline.resource_type);
        assert_eq!(
            vec![
                bundle.pipeline_role.logical_id.clone(),
                bundle.build_project.logical_id.clone(),
            ],
            pipeline.depends_on
        );

        let rule = &template.resources[&bundle.trigger_rule.logical_id];
        assert_eq!("AWS::Events::Rule", rule.resource_type);
        assert_eq!(vec![bundle.trigger_role.logical_id.clone()], rule.depends_on);
    }

    #[test]
    fn serializes_cloudformation_document() {
        let (bundles, template) = compile_template(&["svc-a"]);
        let bundle = &bundles[0];
        let value = serde_json::to_value(&template).unwrap();

        assert_eq!(json!("2010-09-09"), value["AWSTemplateFormatVersion"]);
        assert_eq!(json!("pipelines"), value["Description"]);
        assert_eq!(None, value.get("Owners"));

        let log_group = &value["Resources"][&bundle.log_group.logical_id];
        assert_eq!(
            json!({
                "Type": "AWS::Logs::LogGroup",
                "Properties": { "LogGroupName": "/codebuild/svc-a" }
            }),
            *log_group
        );

        let stages = &value["Resources"][&bundle.pipeline.logical_id]["Properties"]["Stages"];
        assert_eq!(json!("source-pull"), stages[0]["Name"]);
        assert_eq!(json!("Source"), stages[0]["Actions"][0]["ActionTypeId"]["Category"]);
        assert_eq!(
            json!([{ "Name": "app-source" }]),
            stages[1]["Actions"][0]["InputArtifacts"]
        );
        assert_eq!(json!("ecs-deploy"), stages[2]["Name"]);
    }

    #[test]
    fn duplicate_pipeline_replaces_resources() {
        let (_, template) = compile_template(&["svc-a", "svc-a"]);
        assert_eq!(7, template.resources.len());
    }

    #[test]
    fn similar_names_keep_all_resources() {
        let (_, template) = compile_template(&["svc-a", "svc_a"]);
        assert_eq!(14, template.resources.len());

        let (bundles, template) = compile_template(&["svc", "log-group-svc"]);
        assert_eq!(14, template.resources.len());

        let log_group = &template.resources[&bundles[0].log_group.logical_id];
        assert_eq!("AWS::Logs::LogGroup", log_group.resource_type);
        let project = &template.resources[&bundles[0].build_project.logical_id];
        assert_eq!(
            vec![
                bundles[0].build_role.logical_id.clone(),
                bundles[0].log_group.logical_id.clone(),
            ],
            project.depends_on
        );
    }

    #[test]
    fn other_pipeline_cannot_take_a_logical_id() {
        let mut bundles = bundles(&["svc-a", "svc-b"]);
        let shared = bundles[0].log_group.logical_id.clone();
        bundles[1].log_group.logical_id = shared.clone();

        let result = Template::from_bundles(String::from("pipelines"), &bundles);
        match result.err().unwrap() {
            Error::DuplicateLogicalId(logical_id, first, second) => {
                assert_eq!(shared, logical_id);
                assert_eq!("svc-a", first);
                assert_eq!("svc-b", second);
            }
            _ => panic!("Expected `DuplicateLogicalId` error"),
        }
    }
}
