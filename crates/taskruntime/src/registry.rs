use crate::pipeline::Pipeline;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use taskcore::{BackendError, FlowError, PipelineError, PipelineSpec, StepFunction, Value};

/// Builds step instances of one type from their configuration
pub trait StepFactory: Send + Sync {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepFunction>, BackendError>;

    fn step_type(&self) -> &str;

    fn metadata(&self) -> StepMetadata {
        StepMetadata::default()
    }
}

/// Description of a step type, shown by `taskflow steps` and `/api/steps`
#[derive(Debug, Clone)]
pub struct StepMetadata {
    pub description: String,
    pub category: String,
}

impl Default for StepMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available step types
pub struct StepRegistry {
    factories: BTreeMap<String, Arc<dyn StepFactory>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, factory: Arc<dyn StepFactory>) {
        let step_type = factory.step_type().to_string();
        tracing::debug!("Registering step type: {}", step_type);
        self.factories.insert(step_type, factory);
    }

    pub fn create_step(
        &self,
        step_type: &str,
        config: &HashMap<String, Value>,
    ) -> Result<Arc<dyn StepFunction>, FlowError> {
        let factory = self
            .factories
            .get(step_type)
            .ok_or_else(|| PipelineError::UnknownStepType(step_type.to_string()))?;

        factory.create(config).map_err(|e| {
            PipelineError::Invalid(format!("failed to create '{}' step: {}", step_type, e)).into()
        })
    }

    /// Instantiate every step of a definition
    pub fn build_pipeline(&self, spec: &PipelineSpec) -> Result<Pipeline, FlowError> {
        spec.validate()?;
        let mut pipeline = Pipeline::new(&spec.name);
        for step in &spec.steps {
            let function = self.create_step(&step.step_type, &step.config)?;
            pipeline = pipeline.shared_step(&step.name, function);
        }
        Ok(pipeline)
    }

    /// Registered step types in name order
    pub fn list_step_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn get_metadata(&self, step_type: &str) -> Option<StepMetadata> {
        self.factories.get(step_type).map(|f| f.metadata())
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
