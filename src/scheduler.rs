//! Stateless action selection: given a feature snapshot and the run's
//! escalation set, pick the next `(action, feature)` pair.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;
use crate::store::features::{deps_are_met, resolve_order, unmet_deps};
use crate::store::models::{Feature, FeatureStatus};

/// What the pipeline does to a feature next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Dev,
    Review,
    Qa,
    Pr,
    Merge,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Review => "review",
            Self::Qa => "qa",
            Self::Pr => "pr",
            Self::Merge => "merge",
        }
    }

    /// The agent role that handles this action; `pr` and `merge` are
    /// version-control operations, not agent sessions.
    pub fn agent_role(&self) -> Option<&'static str> {
        match self {
            Self::Dev => Some("dev"),
            Self::Review => Some("review"),
            Self::Qa => Some("qa"),
            Self::Pr | Self::Merge => None,
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "review" => Ok(Self::Review),
            "qa" => Ok(Self::Qa),
            "pr" => Ok(Self::Pr),
            "merge" => Ok(Self::Merge),
            _ => Err(format!("Invalid action: {}", s)),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn action_for(feature: &Feature) -> Action {
    // QA-passed features always route through PR creation next, no matter
    // what status the QA agent left behind. Once the PR exists, merge takes
    // over; otherwise a passed feature would request `pr` forever.
    if feature.passes && feature.status != FeatureStatus::PrOpen {
        return Action::Pr;
    }
    match feature.status {
        FeatureStatus::Pending | FeatureStatus::NeedsRevision => Action::Dev,
        FeatureStatus::ReadyForReview => Action::Review,
        FeatureStatus::Approved | FeatureStatus::QaTesting => Action::Qa,
        FeatureStatus::PrOpen => Action::Merge,
        // in-dev or anything unexpected: hand it back to dev.
        _ => Action::Dev,
    }
}

/// Pick the first actionable feature in topological order. Skips complete
/// features, escalated features, and features with unmet dependencies.
/// Returns `None` when nothing is actionable; the controller decides
/// between "all complete", "all blocked", and "all escalated".
pub fn next_action(
    features: &[Feature],
    escalated: &HashSet<String>,
) -> Result<Option<(Action, Feature)>, SchedulerError> {
    let ordered = resolve_order(features)?;
    let by_id: HashMap<&str, &Feature> = features.iter().map(|f| (f.id.as_str(), f)).collect();
    for feature in ordered {
        if feature.status == FeatureStatus::Complete {
            continue;
        }
        if escalated.contains(&feature.id) {
            continue;
        }
        if !deps_are_met(&feature, &by_id) {
            continue;
        }
        let action = action_for(&feature);
        return Ok(Some((action, feature)));
    }
    Ok(None)
}

/// Non-complete features whose dependencies are unmet, with the offending
/// dependency ids. Used by `status` output.
pub fn blocked_features(features: &[Feature]) -> Vec<(String, Vec<String>)> {
    let by_id: HashMap<&str, &Feature> = features.iter().map(|f| (f.id.as_str(), f)).collect();
    features
        .iter()
        .filter(|f| f.status != FeatureStatus::Complete)
        .filter_map(|f| {
            let unmet = unmet_deps(f, &by_id);
            if unmet.is_empty() {
                None
            } else {
                Some((f.id.clone(), unmet))
            }
        })
        .collect()
}
