use std::collections::HashMap;

use crate::config::DeploymentTarget;

/// Value written wherever a task has no registered deployment target.
pub const UNRESOLVED_TARGET: &str = "undefined";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    pub name: String,
    pub arn: String,
}

impl ArtifactStore {
    pub fn new(name: String, arn: String) -> Self {
        return Self { name, arn };
    }

    pub fn from_bucket_name(name: String) -> Self {
        let arn = format!("arn:aws:s3:::{}", name);
        return Self { name, arn };
    }
}

/// Outcome of looking a task name up in the deployment-target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetResolution {
    Resolved(String),
    Defaulted,
}

impl TargetResolution {
    pub fn repository_uri(&self) -> &str {
        match self {
            TargetResolution::Resolved(uri) => uri,
            TargetResolution::Defaulted => UNRESOLVED_TARGET,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, TargetResolution::Defaulted)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeploymentTargets(HashMap<String, DeploymentTarget>);

impl DeploymentTargets {
    pub fn new() -> Self {
        return Self::default();
    }

    pub fn insert(&mut self, task_name: String, target: DeploymentTarget) {
        self.0.insert(task_name, target);
    }

    pub fn resolve(&self, task_name: &str) -> TargetResolution {
        match self.0.get(task_name) {
            Some(target) => TargetResolution::Resolved(target.repository_uri.clone()),
            None => TargetResolution::Defaulted,
        }
    }
}

impl From<HashMap<String, DeploymentTarget>> for DeploymentTargets {
    fn from(targets: HashMap<String, DeploymentTarget>) -> Self {
        return Self(targets);
    }
}

/// Everything a compilation pass needs besides the records themselves.
#[derive(Debug, Clone)]
pub struct CompileContext {
    pub account: String,
    pub region: String,
    /// Names the build role's inline policy, shared by every pipeline of the stack.
    pub stack_id: String,
    pub resource_prefix: String,
    pub artifact_store: ArtifactStore,
    pub deployment_targets: DeploymentTargets,
}

impl CompileContext {
    pub fn new(account: String, region: String, artifact_store: ArtifactStore) -> Self {
        return Self {
            account,
            region,
            stack_id: String::from("baws-pipelines"),
            resource_prefix: String::from("baws"),
            artifact_store,
            deployment_targets: DeploymentTargets::new(),
        };
    }

    pub fn with_stack_id(mut self, stack_id: String) -> Self {
        self.stack_id = stack_id;
        self
    }

    pub fn with_resource_prefix(mut self, resource_prefix: String) -> Self {
        self.resource_prefix = resource_prefix;
        self
    }

    pub fn with_deployment_targets(mut self, deployment_targets: DeploymentTargets) -> Self {
        self.deployment_targets = deployment_targets;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{ArtifactStore, DeploymentTargets, TargetResolution, UNRESOLVED_TARGET};
    use crate::config::DeploymentTarget;

    #[test]
    fn derives_bucket_arn_from_name() {
        let store = ArtifactStore::from_bucket_name(String::from("artifacts"));
        assert_eq!("arn:aws:s3:::artifacts", store.arn);
    }

    #[test]
    fn resolves_registered_task() {
        let mut targets = DeploymentTargets::new();
        targets.insert(
            String::from("task-x"),
            DeploymentTarget {
                repository_uri: String::from("repo/uri"),
            },
        );

        let resolution = targets.resolve("task-x");
        assert_eq!(TargetResolution::Resolved(String::from("repo/uri")), resolution);
        assert_eq!("repo/uri", resolution.repository_uri());
        assert_eq!(false, resolution.is_defaulted());
    }

    #[test]
    fn unknown_task_is_defaulted() {
        let resolution = DeploymentTargets::new().resolve("task-y");
        assert_eq!(true, resolution.is_defaulted());
        assert_eq!(UNRESOLVED_TARGET, resolution.repository_uri());
    }
}
