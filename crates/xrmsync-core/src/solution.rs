//! Solution membership for newly registered components.

use std::sync::Arc;

use tracing::debug;

use crate::client::SolutionStore;
use crate::error::{XrmError, XrmResult};
use crate::id::RecordId;
use crate::model::SolutionComponentType;

/// Unique name of the environment's default solution.
pub const DEFAULT_SOLUTION_NAME: &str = "Default";

/// What `ensure_in_solution` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOutcome {
    /// Blank name or the default solution; nothing to attach to.
    SkippedDefault,
    AlreadyPresent,
    Added,
}

/// Attaches components to a named, non-default solution.
#[derive(Clone)]
pub struct SolutionMembership {
    store: Arc<dyn SolutionStore>,
    default_solution: String,
}

impl std::fmt::Debug for SolutionMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolutionMembership")
            .field("default_solution", &self.default_solution)
            .finish()
    }
}

impl SolutionMembership {
    pub fn new(store: Arc<dyn SolutionStore>) -> Self {
        Self {
            store,
            default_solution: DEFAULT_SOLUTION_NAME.to_string(),
        }
    }

    /// Override the default solution name (matched case-insensitively).
    pub fn with_default_solution(mut self, name: impl Into<String>) -> Self {
        self.default_solution = name.into();
        self
    }

    pub fn default_solution(&self) -> &str {
        &self.default_solution
    }

    /// True when components need no explicit attach for `solution_name`.
    pub fn is_default_solution(&self, solution_name: &str) -> bool {
        let name = solution_name.trim();
        name.is_empty() || name.eq_ignore_ascii_case(self.default_solution.trim())
    }

    /// Make sure the component belongs to `solution_name`.
    ///
    /// Required components are never pulled in with it, and a failure is
    /// returned as-is without retrying.
    pub async fn ensure_in_solution(
        &self,
        component_id: &RecordId,
        component_type: SolutionComponentType,
        solution_name: &str,
    ) -> XrmResult<MembershipOutcome> {
        if self.is_default_solution(solution_name) {
            return Ok(MembershipOutcome::SkippedDefault);
        }
        let solution_name = solution_name.trim();

        let solution_id = self
            .store
            .find_solution_id(solution_name)
            .await?
            .ok_or_else(|| XrmError::not_found("solution", solution_name))?;

        if self
            .store
            .is_component_in_solution(component_id, component_type, &solution_id)
            .await?
        {
            debug!(%component_id, solution_name, "component already in solution");
            return Ok(MembershipOutcome::AlreadyPresent);
        }

        self.store
            .add_solution_component(component_id, component_type, solution_name)
            .await?;
        debug!(%component_id, solution_name, "component added to solution");
        Ok(MembershipOutcome::Added)
    }
}
