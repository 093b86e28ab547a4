//! Feature CRUD and dependency-graph helpers over the store.
//!
//! All list columns are (de)serialized here; the rest of the crate only
//! ever sees typed `Feature` values.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use rusqlite::params;

use crate::errors::SchedulerError;

use super::models::{Feature, FeatureRow, FeatureStatus, NewFeature, UpdateFields};
use super::Db;

const FEATURE_COLUMNS: &str = "id, category, description, notes, status, depends_on, requirements, \
     architecture_compliance, verification_steps, assigned_to, reviewed_by, tested_by, passes, \
     openspec_change_id, openspec_task_group, openspec_reference, created_at, updated_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeatureRow> {
    Ok(FeatureRow {
        id: row.get(0)?,
        category: row.get(1)?,
        description: row.get(2)?,
        notes: row.get(3)?,
        status: row.get(4)?,
        depends_on: row.get(5)?,
        requirements: row.get(6)?,
        architecture_compliance: row.get(7)?,
        verification_steps: row.get(8)?,
        assigned_to: row.get(9)?,
        reviewed_by: row.get(10)?,
        tested_by: row.get(11)?,
        passes: row.get(12)?,
        openspec_change_id: row.get(13)?,
        openspec_task_group: row.get(14)?,
        openspec_reference: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

impl Db {
    // ── CRUD ──────────────────────────────────────────────────────────

    /// Allocate the next id and insert a new feature with `status=pending`
    /// and `passes=false`. Returns the stored record.
    pub fn create_feature(&self, new: &NewFeature) -> Result<Feature> {
        let tx = self
            .conn()
            .unchecked_transaction()
            .context("Failed to begin create transaction")?;
        let id = self.next_feature_id()?;
        tx.execute(
            "INSERT INTO features (id, category, description, notes, status, depends_on,
                 requirements, architecture_compliance, verification_steps,
                 assigned_to, reviewed_by, tested_by, passes,
                 openspec_change_id, openspec_task_group, openspec_reference)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?13, ?14)",
            params![
                id,
                new.category,
                new.description,
                new.notes,
                json_list(&new.depends_on),
                json_list(&new.requirements),
                json_list(&new.architecture_compliance),
                json_list(&new.verification_steps),
                new.assigned_to,
                new.reviewed_by,
                new.tested_by,
                new.openspec_change_id,
                new.openspec_task_group,
                new.openspec_reference,
            ],
        )
        .context("Failed to insert feature")?;
        tx.commit().context("Failed to commit feature insert")?;
        self.get_feature(&id)?
            .context("Feature not found after insert")
    }

    /// Insert (or replace) a feature verbatim, preserving id and
    /// timestamps. Used by the JSON import round-trip.
    pub fn insert_feature_full(&self, f: &Feature) -> Result<()> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO features (id, category, description, notes, status,
                     depends_on, requirements, architecture_compliance, verification_steps,
                     assigned_to, reviewed_by, tested_by, passes,
                     openspec_change_id, openspec_task_group, openspec_reference,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    f.id,
                    f.category,
                    f.description,
                    f.notes,
                    f.status.as_str(),
                    json_list(&f.depends_on),
                    json_list(&f.requirements),
                    json_list(&f.architecture_compliance),
                    json_list(&f.verification_steps),
                    f.assigned_to,
                    f.reviewed_by,
                    f.tested_by,
                    f.passes,
                    f.openspec_change_id,
                    f.openspec_task_group,
                    f.openspec_reference,
                    f.created_at,
                    f.updated_at,
                ],
            )
            .with_context(|| format!("Failed to import feature {}", f.id))?;
        Ok(())
    }

    /// List features ordered by id, optionally filtered by status and/or
    /// assignee.
    pub fn list_features(
        &self,
        status: Option<FeatureStatus>,
        assigned: Option<&str>,
    ) -> Result<Vec<Feature>> {
        let sql = format!("SELECT {} FROM features ORDER BY id", FEATURE_COLUMNS);
        let mut stmt = self
            .conn()
            .prepare(&sql)
            .context("Failed to prepare list_features")?;
        let rows = stmt
            .query_map([], map_row)
            .context("Failed to query features")?;
        let mut features = Vec::new();
        for row in rows {
            let f = row.context("Failed to read feature row")?.into_feature()?;
            if let Some(s) = status {
                if f.status != s {
                    continue;
                }
            }
            if let Some(a) = assigned {
                if f.assigned_to != a {
                    continue;
                }
            }
            features.push(f);
        }
        Ok(features)
    }

    pub fn get_feature(&self, id: &str) -> Result<Option<Feature>> {
        let sql = format!("SELECT {} FROM features WHERE id = ?1", FEATURE_COLUMNS);
        let mut stmt = self
            .conn()
            .prepare(&sql)
            .context("Failed to prepare get_feature")?;
        let mut rows = stmt
            .query_map(params![id], map_row)
            .context("Failed to query feature")?;
        match rows.next() {
            Some(row) => Ok(Some(
                row.context("Failed to read feature row")?.into_feature()?,
            )),
            None => Ok(None),
        }
    }

    /// Look up by the OpenSpec natural key `(change_id, task_group)`.
    pub fn get_feature_by_change_group(
        &self,
        change_id: &str,
        task_group: i64,
    ) -> Result<Option<Feature>> {
        let sql = format!(
            "SELECT {} FROM features WHERE openspec_change_id = ?1 AND openspec_task_group = ?2",
            FEATURE_COLUMNS
        );
        let mut stmt = self
            .conn()
            .prepare(&sql)
            .context("Failed to prepare get_feature_by_change_group")?;
        let mut rows = stmt
            .query_map(params![change_id, task_group], map_row)
            .context("Failed to query feature by change group")?;
        match rows.next() {
            Some(row) => Ok(Some(
                row.context("Failed to read feature row")?.into_feature()?,
            )),
            None => Ok(None),
        }
    }

    /// All features belonging to one change, ordered by task group.
    pub fn features_by_change(&self, change_id: &str) -> Result<Vec<Feature>> {
        let sql = format!(
            "SELECT {} FROM features WHERE openspec_change_id = ?1 ORDER BY openspec_task_group",
            FEATURE_COLUMNS
        );
        let mut stmt = self
            .conn()
            .prepare(&sql)
            .context("Failed to prepare features_by_change")?;
        let rows = stmt
            .query_map(params![change_id], map_row)
            .context("Failed to query features by change")?;
        let mut features = Vec::new();
        for row in rows {
            features.push(row.context("Failed to read feature row")?.into_feature()?);
        }
        Ok(features)
    }

    /// Apply the allow-listed partial update. Fields absent from `fields`
    /// are untouched; `updated_at` is bumped by the store trigger.
    pub fn update_feature(&self, id: &str, fields: &UpdateFields) -> Result<Feature> {
        if self.get_feature(id)?.is_none() {
            anyhow::bail!("Feature {} not found", id);
        }
        // unchecked_transaction: the DbHandle mutex already guarantees
        // single-threaded access.
        let tx = self
            .conn()
            .unchecked_transaction()
            .context("Failed to begin update transaction")?;

        if let Some(ref v) = fields.category {
            tx.execute(
                "UPDATE features SET category = ?1 WHERE id = ?2",
                params![v, id],
            )
            .context("Failed to update category")?;
        }
        if let Some(ref v) = fields.description {
            tx.execute(
                "UPDATE features SET description = ?1 WHERE id = ?2",
                params![v, id],
            )
            .context("Failed to update description")?;
        }
        if let Some(ref v) = fields.notes {
            tx.execute(
                "UPDATE features SET notes = ?1 WHERE id = ?2",
                params![v, id],
            )
            .context("Failed to update notes")?;
        }
        if let Some(v) = fields.status {
            tx.execute(
                "UPDATE features SET status = ?1 WHERE id = ?2",
                params![v.as_str(), id],
            )
            .context("Failed to update status")?;
        }
        if let Some(ref v) = fields.depends_on {
            tx.execute(
                "UPDATE features SET depends_on = ?1 WHERE id = ?2",
                params![json_list(v), id],
            )
            .context("Failed to update depends_on")?;
        }
        if let Some(ref v) = fields.requirements {
            tx.execute(
                "UPDATE features SET requirements = ?1 WHERE id = ?2",
                params![json_list(v), id],
            )
            .context("Failed to update requirements")?;
        }
        if let Some(ref v) = fields.architecture_compliance {
            tx.execute(
                "UPDATE features SET architecture_compliance = ?1 WHERE id = ?2",
                params![json_list(v), id],
            )
            .context("Failed to update architecture_compliance")?;
        }
        if let Some(ref v) = fields.verification_steps {
            tx.execute(
                "UPDATE features SET verification_steps = ?1 WHERE id = ?2",
                params![json_list(v), id],
            )
            .context("Failed to update verification_steps")?;
        }
        if let Some(ref v) = fields.assigned_to {
            tx.execute(
                "UPDATE features SET assigned_to = ?1 WHERE id = ?2",
                params![v, id],
            )
            .context("Failed to update assigned_to")?;
        }
        if let Some(ref v) = fields.reviewed_by {
            tx.execute(
                "UPDATE features SET reviewed_by = ?1 WHERE id = ?2",
                params![v, id],
            )
            .context("Failed to update reviewed_by")?;
        }
        if let Some(ref v) = fields.tested_by {
            tx.execute(
                "UPDATE features SET tested_by = ?1 WHERE id = ?2",
                params![v, id],
            )
            .context("Failed to update tested_by")?;
        }
        if let Some(v) = fields.passes {
            tx.execute(
                "UPDATE features SET passes = ?1 WHERE id = ?2",
                params![v, id],
            )
            .context("Failed to update passes")?;
        }
        if let Some(ref v) = fields.openspec_reference {
            tx.execute(
                "UPDATE features SET openspec_reference = ?1 WHERE id = ?2",
                params![v, id],
            )
            .context("Failed to update openspec_reference")?;
        }

        tx.commit().context("Failed to commit feature update")?;
        self.get_feature(id)?
            .context("Feature not found after update")
    }

    pub fn delete_feature(&self, id: &str) -> Result<bool> {
        let count = self
            .conn()
            .execute("DELETE FROM features WHERE id = ?1", params![id])
            .context("Failed to delete feature")?;
        Ok(count > 0)
    }

    /// Next id in the `FEAT-NNN` sequence. `FEAT-001` when the store is
    /// empty; zero-padded to at least three digits.
    pub fn next_feature_id(&self) -> Result<String> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM features WHERE id LIKE 'FEAT-%'")
            .context("Failed to prepare next_feature_id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query feature ids")?;
        let mut max = 0u32;
        for row in rows {
            let id = row.context("Failed to read id row")?;
            if let Some(n) = id
                .strip_prefix("FEAT-")
                .and_then(|s| s.parse::<u32>().ok())
            {
                max = max.max(n);
            }
        }
        Ok(format!("FEAT-{:03}", max + 1))
    }
}

// ── Dependency graph helpers ──────────────────────────────────────────
//
// Pure functions over a feature snapshot, so the scheduler stays stateless
// and the graph logic is testable without a store.

/// Depth-first topological sort over `depends_on`. A back-edge (including a
/// self-loop) raises `CircularDependency` naming the feature where it was
/// found. Edges to unknown ids are ignored here; they surface as unmet
/// dependencies instead.
pub fn resolve_order(features: &[Feature]) -> Result<Vec<Feature>, SchedulerError> {
    let by_id: HashMap<&str, &Feature> = features.iter().map(|f| (f.id.as_str(), f)).collect();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut visiting: HashSet<&str> = HashSet::new();
    let mut order: Vec<Feature> = Vec::with_capacity(features.len());

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Feature>,
        visited: &mut HashSet<&'a str>,
        visiting: &mut HashSet<&'a str>,
        order: &mut Vec<Feature>,
    ) -> Result<(), SchedulerError> {
        if visited.contains(id) {
            return Ok(());
        }
        if !visiting.insert(id) {
            return Err(SchedulerError::CircularDependency { id: id.to_string() });
        }
        let feature = by_id[id];
        for dep in &feature.depends_on {
            if by_id.contains_key(dep.as_str()) {
                visit(by_id[dep.as_str()].id.as_str(), by_id, visited, visiting, order)?;
            }
        }
        visiting.remove(id);
        visited.insert(id);
        order.push(feature.clone());
        Ok(())
    }

    for f in features {
        visit(
            f.id.as_str(),
            &by_id,
            &mut visited,
            &mut visiting,
            &mut order,
        )?;
    }
    Ok(order)
}

/// True iff every dependency exists and is `complete`. `passes = true`
/// alone is not enough; `status = complete` is authoritative.
pub fn deps_are_met(feature: &Feature, by_id: &HashMap<&str, &Feature>) -> bool {
    feature.depends_on.iter().all(|dep| {
        by_id
            .get(dep.as_str())
            .map(|d| d.status == FeatureStatus::Complete)
            .unwrap_or(false)
    })
}

/// Dependency ids that are missing from the store or not yet complete.
/// `status` surfaces these as "blocked" rather than scheduling silently
/// stalling.
pub fn unmet_deps(feature: &Feature, by_id: &HashMap<&str, &Feature>) -> Vec<String> {
    feature
        .depends_on
        .iter()
        .filter(|dep| {
            by_id
                .get(dep.as_str())
                .map(|d| d.status != FeatureStatus::Complete)
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}
