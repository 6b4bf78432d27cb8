//! Ordered step registries.
//!
//! Order is declared once by whoever builds the registry. There is no
//! runtime dependency resolution: a step's position is its dependency
//! position.

use crate::core::{InstallMode, StepRecord};
use crate::errors::RegistryError;
use crate::safety::SafetyGuard;
use crate::steps::{with_safety_guard, Step};
use std::collections::HashSet;
use std::sync::Arc;

/// Which steps the safety guard wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPolicy {
    /// Wrap every step.
    EveryStep,
    /// Wrap steps whose mutation touches host networking, firewall or
    /// cluster membership.
    HostNetworkOnly,
}

impl GuardPolicy {
    /// Default policy for a pipeline mode.
    #[must_use]
    pub const fn for_mode(mode: InstallMode) -> Self {
        match mode {
            InstallMode::Install => Self::HostNetworkOnly,
            InstallMode::Uninstall => Self::EveryStep,
        }
    }

    fn applies_to(self, step: &dyn Step) -> bool {
        match self {
            Self::EveryStep => true,
            Self::HostNetworkOnly => step.mutation().touches_host_network(),
        }
    }
}

/// An immutable, validated, ordered list of steps.
#[derive(Debug, Clone)]
pub struct StepRegistry {
    name: String,
    mode: InstallMode,
    steps: Vec<Arc<dyn Step>>,
}

impl StepRegistry {
    /// Returns the registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the pipeline mode.
    #[must_use]
    pub const fn mode(&self) -> InstallMode {
        self.mode
    }

    /// Returns the steps in order.
    #[must_use]
    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns step ids in order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id()).collect()
    }

    /// Looks up a step by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Step>> {
        self.steps.iter().find(|s| s.id() == id)
    }

    /// Returns fresh pending records for every step.
    #[must_use]
    pub fn pending_records(&self) -> Vec<StepRecord> {
        self.steps
            .iter()
            .enumerate()
            .map(|(order, step)| {
                StepRecord::pending(step.id(), order, step.description(), step.mutation())
            })
            .collect()
    }

    /// Wraps the steps selected by `policy` with the safety guard.
    #[must_use]
    pub fn guarded(self, guard: &Arc<SafetyGuard>, policy: GuardPolicy) -> Self {
        let steps = self
            .steps
            .into_iter()
            .map(|step| {
                if policy.applies_to(step.as_ref()) {
                    with_safety_guard(step, guard.clone())
                } else {
                    step
                }
            })
            .collect();

        Self {
            name: self.name,
            mode: self.mode,
            steps,
        }
    }
}

/// Builder for [`StepRegistry`] with validation.
#[derive(Debug)]
pub struct RegistryBuilder {
    name: String,
    mode: InstallMode,
    steps: Vec<Arc<dyn Step>>,
}

impl RegistryBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>, mode: InstallMode) -> Self {
        Self {
            name: name.into(),
            mode,
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Appends a shared step.
    #[must_use]
    pub fn shared(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends a step only when `include` is true.
    #[must_use]
    pub fn step_if(self, include: bool, step: impl Step + 'static) -> Self {
        if include {
            self.step(step)
        } else {
            self
        }
    }

    /// Returns the number of steps added so far.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Validates and builds the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a step id is empty or repeated.
    pub fn build(self) -> Result<StepRegistry, RegistryError> {
        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.id().trim().is_empty() {
                return Err(RegistryError::EmptyId(index));
            }
            if !seen.insert(step.id().to_string()) {
                return Err(RegistryError::DuplicateStep(step.id().to_string()));
            }
        }

        Ok(StepRegistry {
            name: self.name,
            mode: self.mode,
            steps: self.steps,
        })
    }
}
