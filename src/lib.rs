//! Compiles declarative pipeline configuration into CloudFormation resources
//! for CodeCommit → CodeBuild → ECS delivery pipelines.

pub mod compiler;
pub mod config;
pub mod context;
pub mod resources;
pub mod stack;
pub mod template;
pub mod writer;

pub use compiler::{find_logical_id_collisions, find_name_collisions, Compiler, DuplicateNames};
pub use context::{ArtifactStore, CompileContext, DeploymentTargets, TargetResolution};
pub use resources::{DependencyEdge, ResourceBundle};
pub use template::Template;
