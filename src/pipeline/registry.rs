//! # Step Registry
//!
//! Maps stable step identifiers (as used in pipeline configuration) to
//! factories. Pipelines are resolved once, when an agent is built; an unknown
//! identifier fails the build instead of a message run.

use super::executor::StepExecutor;
use super::step::Step;
use super::steps;
use crate::config::PipelineConfiguration;
use crate::error::{As4Error, Result};
use crate::ids::IdentifierGenerator;
use crate::matching::PModeMatcher;
use crate::persistence::{MessageRepository, ReceptionAwarenessRepository};
use crate::pmode::PModeStore;
use crate::security::MessageSigner;
use crate::transformers::As4Codec;
use crate::transport::MessageSender;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Collaborators handed to step factories
#[derive(Clone)]
pub struct StepDependencies {
    pub pmode_store: Arc<dyn PModeStore>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub reception_awareness_repository: Arc<dyn ReceptionAwarenessRepository>,
    pub sender: Arc<dyn MessageSender>,
    pub codec: Arc<dyn As4Codec>,
    pub signer: Option<Arc<dyn MessageSigner>>,
    pub id_generator: Arc<dyn IdentifierGenerator>,
    pub matcher: Arc<PModeMatcher>,
}

pub type StepFactory = Arc<dyn Fn(&StepDependencies) -> Result<Arc<dyn Step>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.step_names())
            .finish()
    }
}

impl StepRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every step shipped by the crate
    pub fn with_builtin_steps() -> Self {
        let mut registry = Self::new();
        steps::register_builtin_steps(&mut registry);
        registry
    }

    /// Register (or replace) the factory for `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&StepDependencies) -> Result<Arc<dyn Step>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            debug!(step = %name, "Replacing registered step factory");
        }
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered identifiers, sorted
    pub fn step_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create_step(&self, name: &str, dependencies: &StepDependencies) -> Result<Arc<dyn Step>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| As4Error::UnknownStep(name.to_string()))?;
        factory(dependencies)
    }

    /// Resolve every identifier of `configuration` into an executor
    pub fn build_executor(
        &self,
        name: &str,
        configuration: &PipelineConfiguration,
        dependencies: &StepDependencies,
    ) -> Result<StepExecutor> {
        let resolve = |names: &[String]| -> Result<Vec<Arc<dyn Step>>> {
            names
                .iter()
                .map(|step| self.create_step(step, dependencies))
                .collect()
        };

        let normal = resolve(&configuration.normal_pipeline)?;
        let error = resolve(&configuration.error_pipeline)?;

        info!(
            pipeline = %name,
            normal_steps = normal.len(),
            error_steps = error.len(),
            "Built step pipeline"
        );
        Ok(StepExecutor::new(name, normal, error))
    }
}
