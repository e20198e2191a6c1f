use std::str::FromStr;

use serde::Deserialize;

use crate::dag::RunState;

/// Which dependency outcomes allow a dependent task to be admitted.
///
/// - `SuccessOnly` (default): every dependency must be `Done`. A failed
///   dependency leaves its dependents `Pending` for the rest of the run.
/// - `Terminal`: any terminal dependency (`Done` or `Failed`) is enough, so
///   dependents may start even though something upstream failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyGating {
    #[default]
    #[serde(alias = "success-only")]
    Success,
    Terminal,
}

impl DependencyGating {
    /// Whether a dependency in `state` lets its dependents start.
    pub fn satisfied_by(self, state: RunState) -> bool {
        match self {
            DependencyGating::Success => state == RunState::Done,
            DependencyGating::Terminal => state.is_terminal(),
        }
    }
}

impl FromStr for DependencyGating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "success" | "success-only" => Ok(DependencyGating::Success),
            "terminal" => Ok(DependencyGating::Terminal),
            other => Err(format!(
                "invalid dependency_gating: {other} (expected \"success\" or \"terminal\")"
            )),
        }
    }
}
