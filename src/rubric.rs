//! Rubric definitions attached to marking instances.

use crate::db;
use crate::error::{AppError, AppResult};
use crate::host::{GradingMethod, Instance};
use crate::strings::get_string;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub id: String,
    pub score: f64,
    pub definition: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub id: String,
    pub definition_id: String,
    pub sort_order: i64,
    pub description: String,
    pub levels: Vec<Level>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub id: String,
    pub instance_id: String,
    pub name: String,
    pub criteria: Vec<Criterion>,
}

impl Definition {
    pub fn criterion(&self, criterion_id: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.id == criterion_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelInput {
    pub score: f64,
    #[serde(default)]
    pub definition: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionInput {
    pub description: String,
    #[serde(default)]
    pub levels: Vec<LevelInput>,
}

/// Looks a criterion up by id without regard to which rubric owns it.
pub fn find_criterion(conn: &Connection, criterion_id: &str) -> AppResult<Option<Criterion>> {
    conn.query_row(
        "SELECT id, definition_id, sort_order, description
         FROM rubric_criteria
         WHERE id = ?",
        [criterion_id],
        |r| {
            Ok(Criterion {
                id: r.get(0)?,
                definition_id: r.get(1)?,
                sort_order: r.get(2)?,
                description: r.get(3)?,
                levels: Vec::new(),
            })
        },
    )
    .optional()
    .map_err(AppError::query)
}

pub fn load_definition(conn: &Connection, instance_id: &str) -> AppResult<Option<Definition>> {
    let head: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM rubric_definitions WHERE instance_id = ?",
            [instance_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((definition_id, name)) = head else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, sort_order, description
         FROM rubric_criteria
         WHERE definition_id = ?
         ORDER BY sort_order, id",
    )?;
    let mut criteria = stmt
        .query_map([&definition_id], |r| {
            Ok(Criterion {
                id: r.get(0)?,
                definition_id: definition_id.clone(),
                sort_order: r.get(1)?,
                description: r.get(2)?,
                levels: Vec::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut level_stmt = conn.prepare(
        "SELECT id, score, definition
         FROM rubric_levels
         WHERE criterion_id = ?
         ORDER BY score, id",
    )?;
    for c in criteria.iter_mut() {
        c.levels = level_stmt
            .query_map([&c.id], |r| {
                Ok(Level {
                    id: r.get(0)?,
                    score: r.get(1)?,
                    definition: r.get(2)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    }

    Ok(Some(Definition {
        id: definition_id,
        instance_id: instance_id.to_string(),
        name,
        criteria,
    }))
}

/// The grading controller for the instance must be a rubric with a definition.
pub fn validate_rubric(conn: &Connection, instance: &Instance) -> AppResult<Definition> {
    if instance.method() != Some(GradingMethod::Rubric) {
        return Err(AppError::new("invalid_rubric", get_string("invalidrubric"))
            .with_details(json!({ "gradingMethod": instance.grading_method })));
    }
    load_definition(conn, &instance.id)?.ok_or_else(|| {
        AppError::new("invalid_rubric", get_string("invalidrubric"))
            .with_details(json!({ "instanceId": instance.id }))
    })
}

/// Creates or replaces the rubric of an instance. Replacing drops every
/// marker and page assignment of the instance since they point at the old
/// criteria.
pub fn define(
    conn: &Connection,
    instance: &Instance,
    name: &str,
    criteria: &[CriterionInput],
) -> AppResult<Definition> {
    if criteria.is_empty() {
        return Err(AppError::bad_params("criteria must not be empty"));
    }
    if let Some(i) = criteria.iter().position(|c| c.description.trim().is_empty()) {
        return Err(AppError::bad_params("criterion description must not be empty")
            .with_details(json!({ "index": i })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| AppError::new("db_tx_failed", e.to_string()))?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM rubric_definitions WHERE instance_id = ?",
            [&instance.id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(old_id) = existing {
        tx.execute("DELETE FROM marker_criteria WHERE instance_id = ?", [&instance.id])
            .map_err(|e| AppError::delete("marker_criteria", e))?;
        tx.execute("DELETE FROM page_criteria WHERE instance_id = ?", [&instance.id])
            .map_err(|e| AppError::delete("page_criteria", e))?;
        tx.execute(
            "DELETE FROM rubric_levels
             WHERE criterion_id IN (SELECT id FROM rubric_criteria WHERE definition_id = ?)",
            [&old_id],
        )
        .map_err(|e| AppError::delete("rubric_levels", e))?;
        tx.execute("DELETE FROM rubric_criteria WHERE definition_id = ?", [&old_id])
            .map_err(|e| AppError::delete("rubric_criteria", e))?;
        tx.execute("DELETE FROM rubric_definitions WHERE id = ?", [&old_id])
            .map_err(|e| AppError::delete("rubric_definitions", e))?;
        tracing::info!(instance_id = %instance.id, "replacing rubric definition");
    }

    let definition_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO rubric_definitions(id, instance_id, name, created_at) VALUES(?, ?, ?, ?)",
        (&definition_id, &instance.id, name.trim(), db::now_unix()),
    )
    .map_err(|e| AppError::insert("rubric_definitions", e))?;

    for (i, c) in criteria.iter().enumerate() {
        let criterion_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO rubric_criteria(id, definition_id, sort_order, description)
             VALUES(?, ?, ?, ?)",
            (&criterion_id, &definition_id, i as i64, c.description.trim()),
        )
        .map_err(|e| AppError::insert("rubric_criteria", e))?;
        for level in &c.levels {
            tx.execute(
                "INSERT INTO rubric_levels(id, criterion_id, score, definition) VALUES(?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &criterion_id,
                    level.score,
                    level.definition.trim(),
                ),
            )
            .map_err(|e| AppError::insert("rubric_levels", e))?;
        }
    }

    tx.commit()
        .map_err(|e| AppError::new("db_commit_failed", e.to_string()))?;

    load_definition(conn, &instance.id)?
        .ok_or_else(|| AppError::new("not_found", "rubric definition not found"))
}
