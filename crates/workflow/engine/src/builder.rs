//! Builder for WorkflowEngine
//!
//! Every collaborator is optional. Omitted pieces fall back to the
//! in-memory persistence backend and the reference implementations.

use crate::config::OrchestratorConfig;
use crate::engine::WorkflowEngine;
use crate::reference::{KeywordRiskClassifier, SimulatedAlternativeExecutor, SimulatedExecutionLayer};
use crate::traits::{AlternativeActionExecutor, ExecutionLayer, RiskClassifier};
use std::sync::Arc;
use workflow_persistence::{InMemoryPersistence, PersistenceManager};

/// Builder for constructing a WorkflowEngine with its collaborators
#[derive(Default)]
pub struct WorkflowEngineBuilder {
    config: Option<OrchestratorConfig>,
    persistence: Option<Arc<dyn PersistenceManager>>,
    execution_layer: Option<Arc<dyn ExecutionLayer>>,
    risk_classifier: Option<Arc<dyn RiskClassifier>>,
    alternative_executor: Option<Arc<dyn AlternativeActionExecutor>>,
}

impl WorkflowEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the persistence backend
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceManager>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the execution layer performing stage work
    pub fn with_execution_layer(mut self, layer: Arc<dyn ExecutionLayer>) -> Self {
        self.execution_layer = Some(layer);
        self
    }

    /// Set the risk classifier consulted by the policy stage
    pub fn with_risk_classifier(mut self, classifier: Arc<dyn RiskClassifier>) -> Self {
        self.risk_classifier = Some(classifier);
        self
    }

    /// Set the executor for alternative actions chosen on rejection
    pub fn with_alternative_executor(mut self, executor: Arc<dyn AlternativeActionExecutor>) -> Self {
        self.alternative_executor = Some(executor);
        self
    }

    /// Build the engine
    pub fn build(self) -> WorkflowEngine {
        WorkflowEngine::from_parts(
            self.config.unwrap_or_default(),
            self.persistence
                .unwrap_or_else(|| Arc::new(InMemoryPersistence::new())),
            self.execution_layer
                .unwrap_or_else(|| Arc::new(SimulatedExecutionLayer)),
            self.risk_classifier
                .unwrap_or_else(|| Arc::new(KeywordRiskClassifier::default())),
            self.alternative_executor
                .unwrap_or_else(|| Arc::new(SimulatedAlternativeExecutor)),
        )
    }
}
