use anyhow::{Context, Result};
use miniflow_core::workflow::{CallOptions, Workflow};
use miniflow_core::{FlowResult, RunConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Server configuration: run settings plus the workflow definition it serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub run: RunConfig,

    /// Derive extra edges from matching output and input keys.
    #[serde(default)]
    pub assemble: bool,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,

    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub operations: Vec<OperationDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationTarget {
    /// `target` names a function behind the gateway
    Function,
    /// `target` is a full URL
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDefinition {
    pub kind: OperationTarget,
    pub target: String,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub query: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
}

impl ServerConfig {
    /// Load the configuration file; environment variables fill unset `[run]` fields.
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path).with_context(|| {
            format!(
                "Failed to read configuration file {}",
                config_path.display()
            )
        })?;
        let mut config = Self::parse(&content)?;
        config.run = config.run.with_lookup(|key| std::env::var(key).ok());

        config
            .build_workflow()
            .context("Invalid workflow definition")?;

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration file")
    }

    /// Build a fresh workflow from the definition.
    pub fn build_workflow(&self) -> FlowResult<Workflow> {
        let mut workflow = Workflow::new();

        for step in &self.steps {
            let mut builder = workflow
                .node(step.id.as_str())
                .inputs(step.inputs.iter().cloned())
                .outputs(step.outputs.iter().cloned());
            for operation in &step.operations {
                let options = operation.call_options();
                builder = match operation.kind {
                    OperationTarget::Function => builder.apply(operation.target.clone(), options),
                    OperationTarget::Http => builder.request(operation.target.clone(), options),
                };
            }
        }

        for edge in &self.edges {
            workflow.edge(edge.from.as_str(), edge.to.as_str())?;
        }
        if self.assemble {
            workflow.assemble()?;
        }
        workflow.validate()?;

        Ok(workflow)
    }
}

impl OperationDefinition {
    fn call_options(&self) -> CallOptions {
        let mut options = CallOptions::new();
        if let Some(method) = &self.method {
            options = options.method(method.clone());
        }
        for (key, value) in &self.headers {
            options = options.header(key, value.clone());
        }
        for (key, values) in &self.query {
            options = options.query(key, values.iter().cloned());
        }
        options
    }
}
