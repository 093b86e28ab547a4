use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Pipeline status of a feature. Stored as TEXT; the kebab-case strings are
/// the wire and CLI representation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureStatus {
    Pending,
    InDev,
    ReadyForReview,
    Approved,
    NeedsRevision,
    QaTesting,
    PrOpen,
    Complete,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InDev => "in-dev",
            Self::ReadyForReview => "ready-for-review",
            Self::Approved => "approved",
            Self::NeedsRevision => "needs-revision",
            Self::QaTesting => "qa-testing",
            Self::PrOpen => "pr-open",
            Self::Complete => "complete",
        }
    }

    /// `complete` is the only terminal state. `passes = true` is not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl FromStr for FeatureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-dev" => Ok(Self::InDev),
            "ready-for-review" => Ok(Self::ReadyForReview),
            "approved" => Ok(Self::Approved),
            "needs-revision" => Ok(Self::NeedsRevision),
            "qa-testing" => Ok(Self::QaTesting),
            "pr-open" => Ok(Self::PrOpen),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid feature status: {}", s)),
        }
    }
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central entity: one unit of work tracked through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub category: String,
    pub description: String,
    pub notes: String,
    pub status: FeatureStatus,
    pub depends_on: Vec<String>,
    pub requirements: Vec<String>,
    pub architecture_compliance: Vec<String>,
    pub verification_steps: Vec<String>,
    pub assigned_to: String,
    pub reviewed_by: String,
    pub tested_by: String,
    pub passes: bool,
    pub openspec_change_id: String,
    pub openspec_task_group: i64,
    pub openspec_reference: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Raw row with JSON-array columns still serialized. Deserialization of the
/// list columns happens here and nowhere else.
pub(crate) struct FeatureRow {
    pub id: String,
    pub category: String,
    pub description: String,
    pub notes: String,
    pub status: String,
    pub depends_on: String,
    pub requirements: String,
    pub architecture_compliance: String,
    pub verification_steps: String,
    pub assigned_to: String,
    pub reviewed_by: String,
    pub tested_by: String,
    pub passes: bool,
    pub openspec_change_id: String,
    pub openspec_task_group: i64,
    pub openspec_reference: String,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_string_list(raw: &str, column: &str, id: &str) -> Result<Vec<String>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .with_context(|| format!("Invalid JSON in {} for feature {}", column, id))
}

impl FeatureRow {
    pub fn into_feature(self) -> Result<Feature> {
        let status = FeatureStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!("{} (feature {})", e, self.id))?;
        Ok(Feature {
            depends_on: parse_string_list(&self.depends_on, "depends_on", &self.id)?,
            requirements: parse_string_list(&self.requirements, "requirements", &self.id)?,
            architecture_compliance: parse_string_list(
                &self.architecture_compliance,
                "architecture_compliance",
                &self.id,
            )?,
            verification_steps: parse_string_list(
                &self.verification_steps,
                "verification_steps",
                &self.id,
            )?,
            id: self.id,
            category: self.category,
            description: self.description,
            notes: self.notes,
            status,
            assigned_to: self.assigned_to,
            reviewed_by: self.reviewed_by,
            tested_by: self.tested_by,
            passes: self.passes,
            openspec_change_id: self.openspec_change_id,
            openspec_task_group: self.openspec_task_group,
            openspec_reference: self.openspec_reference,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Content for a new feature. The id and timestamps are allocated by the
/// store at insert time.
#[derive(Debug, Clone, Default)]
pub struct NewFeature {
    pub category: String,
    pub description: String,
    pub notes: String,
    pub depends_on: Vec<String>,
    pub requirements: Vec<String>,
    pub architecture_compliance: Vec<String>,
    pub verification_steps: Vec<String>,
    pub assigned_to: String,
    pub reviewed_by: String,
    pub tested_by: String,
    pub openspec_change_id: String,
    pub openspec_task_group: i64,
    pub openspec_reference: String,
}

/// Allow-list of mutable feature fields. Anything not represented here
/// (id, the openspec natural key, timestamps) cannot be written through
/// `update_feature`, no matter what a caller or an API payload carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFields {
    pub category: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub status: Option<FeatureStatus>,
    pub depends_on: Option<Vec<String>>,
    pub requirements: Option<Vec<String>>,
    pub architecture_compliance: Option<Vec<String>>,
    pub verification_steps: Option<Vec<String>>,
    pub assigned_to: Option<String>,
    pub reviewed_by: Option<String>,
    pub tested_by: Option<String>,
    pub passes: Option<bool>,
    pub openspec_reference: Option<String>,
}

impl UpdateFields {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.description.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.depends_on.is_none()
            && self.requirements.is_none()
            && self.architecture_compliance.is_none()
            && self.verification_steps.is_none()
            && self.assigned_to.is_none()
            && self.reviewed_by.is_none()
            && self.tested_by.is_none()
            && self.passes.is_none()
            && self.openspec_reference.is_none()
    }
}

/// One append-only history row: a single agent session driven by autoplay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSession {
    pub session_number: i64,
    pub agent_role: String,
    pub feature_id: String,
    pub outcome: String,
    pub notes: String,
    pub timestamp: String,
}

/// Architecture blob key. Payloads are opaque JSON the agents consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchKind {
    Principles,
    Patterns,
    Standards,
}

impl ArchKind {
    pub const ALL: [ArchKind; 3] = [Self::Principles, Self::Patterns, Self::Standards];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Principles => "principles",
            Self::Patterns => "patterns",
            Self::Standards => "standards",
        }
    }
}

impl FromStr for ArchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "principles" => Ok(Self::Principles),
            "patterns" => Ok(Self::Patterns),
            "standards" => Ok(Self::Standards),
            _ => Err(format!("Invalid architecture kind: {}", s)),
        }
    }
}

/// How autoplay drives the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Emit textual instructions for a human-driven multi-agent tool.
    Team,
    /// Run the autoplay loop with subprocess agent spawns.
    Orchestrator,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "team" => Ok(Self::Team),
            "orchestrator" => Ok(Self::Orchestrator),
            _ => Err(format!("Invalid execution mode: {}", s)),
        }
    }
}

/// Typed view over the config key-value table. Unparseable values fall back
/// to the seeded defaults rather than failing the command.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub execution_mode: ExecutionMode,
    pub model: String,
    pub max_retries: u32,
    pub max_agent_turns: u32,
    pub features_per_lead_session: usize,
    pub auto_merge: bool,
    pub safe_mode: bool,
    pub openspec_auto_archive: bool,
    pub openspec_auto_import: bool,
    pub agent_command: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Orchestrator,
            model: "sonnet".to_string(),
            max_retries: 3,
            max_agent_turns: 40,
            features_per_lead_session: 3,
            auto_merge: false,
            safe_mode: true,
            openspec_auto_archive: true,
            openspec_auto_import: false,
            agent_command: "claude".to_string(),
        }
    }
}

impl Settings {
    /// `safe_mode = true` is an alias for `auto_merge = false`; either flag
    /// parks merges.
    pub fn merge_allowed(&self) -> bool {
        self.auto_merge && !self.safe_mode
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
