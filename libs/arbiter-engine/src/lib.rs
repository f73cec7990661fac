pub mod evaluator;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod sandbox;
pub mod workspace;


pub use orchestrator::{Evaluation, Orchestrator};
pub use pipeline::{Pipeline, Preparation, PreparedProgram};
pub use registry::{CommandTemplate, LanguageRegistry, RunnerSpec};
pub use sandbox::{Limits, Sandbox, SandboxOutput, SandboxRequest};

use anyhow::Result;
use arbiter_common::config::EngineConfig;
use std::sync::Arc;
use tracing::info;

/// Wire registry, sandbox backend and limits into a ready orchestrator
pub fn build_orchestrator(config: &EngineConfig, registry: LanguageRegistry) -> Result<Orchestrator> {
    let sandbox = sandbox::from_config(config)?;
    info!(
        backend = sandbox.name(),
        languages = ?registry.names(),
        max_concurrent_sandboxes = config.max_concurrent_sandboxes,
        max_parallel_tests = config.max_parallel_tests,
        "Evaluation engine ready"
    );

    let pipeline = Pipeline::new(
        Arc::new(registry),
        sandbox,
        config.workspace_root.clone(),
        config.max_concurrent_sandboxes,
    );
    Ok(Orchestrator::new(pipeline, config))
}
