use std::collections::HashSet;
use std::sync::Arc;
use taskcore::{PipelineError, StepFunction};

/// A named stage bound to the function that runs it
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub function: Arc<dyn StepFunction>,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("step_type", &self.function.step_type())
            .finish()
    }
}

/// Ordered sequence of steps executed by a workflow run
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(self, name: impl Into<String>, function: impl StepFunction + 'static) -> Self {
        self.shared_step(name, Arc::new(function))
    }

    pub fn shared_step(mut self, name: impl Into<String>, function: Arc<dyn StepFunction>) -> Self {
        self.steps.push(Step {
            name: name.into(),
            function,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.steps.is_empty() {
            return Err(PipelineError::Empty);
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(PipelineError::Invalid("step name is empty".to_string()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(PipelineError::DuplicateStep(step.name.clone()));
            }
        }
        Ok(())
    }
}
