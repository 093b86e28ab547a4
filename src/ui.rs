//! Shared terminal styling: status icons and feature line formatting.

use console::{style, Emoji};

use crate::store::models::{Feature, FeatureStatus};

pub static PENDING: Emoji<'_, '_> = Emoji("⏳ ", "[ ]");
pub static IN_DEV: Emoji<'_, '_> = Emoji("🔨 ", "[~]");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[?]");
pub static APPROVED: Emoji<'_, '_> = Emoji("👍 ", "[A]");
pub static REVISION: Emoji<'_, '_> = Emoji("🔄 ", "[!]");
pub static QA: Emoji<'_, '_> = Emoji("🧪 ", "[Q]");
pub static PR_OPEN: Emoji<'_, '_> = Emoji("🔀 ", "[P]");
pub static COMPLETE: Emoji<'_, '_> = Emoji("✅ ", "[X]");
pub static BLOCKED: Emoji<'_, '_> = Emoji("🚧 ", "[B]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");

pub fn status_icon(status: FeatureStatus) -> Emoji<'static, 'static> {
    match status {
        FeatureStatus::Pending => PENDING,
        FeatureStatus::InDev => IN_DEV,
        FeatureStatus::ReadyForReview => REVIEW,
        FeatureStatus::Approved => APPROVED,
        FeatureStatus::NeedsRevision => REVISION,
        FeatureStatus::QaTesting => QA,
        FeatureStatus::PrOpen => PR_OPEN,
        FeatureStatus::Complete => COMPLETE,
    }
}

/// One-line listing entry: icon, id, description, status, dependencies.
pub fn feature_line(f: &Feature) -> String {
    let deps = if f.depends_on.is_empty() {
        String::new()
    } else {
        format!("  deps: {}", f.depends_on.join(", "))
    };
    let passes = if f.passes { "  passes" } else { "" };
    format!(
        "{}{}  {}  [{}]{}{}",
        status_icon(f.status),
        style(&f.id).bold(),
        f.description,
        style(f.status.as_str()).dim(),
        style(deps).dim(),
        style(passes).green(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: FeatureStatus) -> Feature {
        Feature {
            id: "FEAT-001".to_string(),
            category: String::new(),
            description: "demo".to_string(),
            notes: String::new(),
            status,
            depends_on: vec!["FEAT-000".to_string()],
            requirements: vec![],
            architecture_compliance: vec![],
            verification_steps: vec![],
            assigned_to: String::new(),
            reviewed_by: String::new(),
            tested_by: String::new(),
            passes: false,
            openspec_change_id: String::new(),
            openspec_task_group: 0,
            openspec_reference: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn feature_line_includes_id_status_and_deps() {
        let line = feature_line(&sample(FeatureStatus::Pending));
        assert!(line.contains("FEAT-001"));
        assert!(line.contains("demo"));
        assert!(line.contains("pending"));
        assert!(line.contains("FEAT-000"));
    }
}
