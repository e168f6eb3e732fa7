//! Marker→criterion and page→criterion associations.
//!
//! Every submission of the assignment forms is stamped with one `block`
//! number, `max(block) + 1` within the instance's table. Pairings that already
//! exist keep their row and only move to the new block.

use crate::access::UserSummary;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::rubric::Definition;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AssociationKind {
    Marker,
    Page,
}

impl AssociationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "marker" | "markers" => Some(Self::Marker),
            "page" | "pages" => Some(Self::Page),
            _ => None,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Marker => "marker_criteria",
            Self::Page => "page_criteria",
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Marker => "marker_id",
            Self::Page => "page",
        }
    }
}

/// The entity side of an association: a marker's user id or a page number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Marker(String),
    Page(i64),
}

impl Entity {
    fn kind(&self) -> AssociationKind {
        match self {
            Self::Marker(_) => AssociationKind::Marker,
            Self::Page(_) => AssociationKind::Page,
        }
    }

    fn to_sql(&self) -> rusqlite::types::Value {
        match self {
            Self::Marker(id) => rusqlite::types::Value::Text(id.clone()),
            Self::Page(n) => rusqlite::types::Value::Integer(*n),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub block: i64,
    pub inserted: usize,
    pub updated: usize,
}

/// Expands a submission into (entity, criterion) pairs, entity-major.
/// Duplicate selections collapse to one pair.
pub fn expand_pairs(entities: &[Entity], criteria: &[String]) -> Vec<(Entity, String)> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(entities.len() * criteria.len());
    for e in entities {
        for c in criteria {
            if seen.insert((e.clone(), c.clone())) {
                out.push((e.clone(), c.clone()));
            }
        }
    }
    out
}

pub fn next_block(conn: &Connection, kind: AssociationKind, instance_id: &str) -> AppResult<i64> {
    let sql = format!(
        "SELECT MAX(block) FROM {} WHERE instance_id = ?",
        kind.table()
    );
    let current: Option<i64> = conn.query_row(&sql, [instance_id], |r| r.get(0))?;
    Ok(match current {
        Some(b) if b > 0 => b + 1,
        _ => 1,
    })
}

pub fn apply_batch(
    conn: &Connection,
    kind: AssociationKind,
    instance_id: &str,
    entities: &[Entity],
    criteria: &[String],
) -> AppResult<BatchOutcome> {
    if let Some(e) = entities.iter().find(|e| e.kind() != kind) {
        return Err(AppError::bad_params(format!(
            "entity {:?} does not belong to {}",
            e,
            kind.table()
        )));
    }
    let pairs = expand_pairs(entities, criteria);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| AppError::new("db_tx_failed", e.to_string()))?;
    let block = next_block(&tx, kind, instance_id)?;
    let now = db::now_unix();

    let select_sql = format!(
        "SELECT id FROM {} WHERE instance_id = ? AND criterion_id = ? AND {} = ?",
        kind.table(),
        kind.column()
    );
    let update_sql = format!(
        "UPDATE {} SET block = ?, updated_at = ? WHERE id = ?",
        kind.table()
    );
    let insert_sql = format!(
        "INSERT INTO {}(id, instance_id, criterion_id, {}, block, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        kind.table(),
        kind.column()
    );

    let mut inserted = 0usize;
    let mut updated = 0usize;
    for (entity, criterion_id) in &pairs {
        let existing: Option<String> = tx
            .query_row(
                &select_sql,
                (instance_id, criterion_id, entity.to_sql()),
                |r| r.get(0),
            )
            .optional()?;
        match existing {
            Some(row_id) => {
                tx.execute(&update_sql, (block, now, &row_id))
                    .map_err(|e| AppError::update(kind.table(), e))?;
                updated += 1;
            }
            None => {
                tx.execute(
                    &insert_sql,
                    (
                        Uuid::new_v4().to_string(),
                        instance_id,
                        criterion_id,
                        entity.to_sql(),
                        block,
                        now,
                        now,
                    ),
                )
                .map_err(|e| AppError::insert(kind.table(), e))?;
                inserted += 1;
            }
        }
    }

    tx.commit()
        .map_err(|e| AppError::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        table = kind.table(),
        instance_id,
        block,
        inserted,
        updated,
        "association batch applied"
    );
    Ok(BatchOutcome {
        block,
        inserted,
        updated,
    })
}

pub fn delete_for_criterion(
    conn: &Connection,
    kind: AssociationKind,
    instance_id: &str,
    criterion_id: &str,
) -> AppResult<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE instance_id = ? AND criterion_id = ?",
        kind.table()
    );
    let deleted = conn
        .execute(&sql, (instance_id, criterion_id))
        .map_err(|e| AppError::delete(kind.table(), e))?;
    tracing::info!(table = kind.table(), instance_id, criterion_id, deleted, "associations deleted");
    Ok(deleted)
}

pub fn count(conn: &Connection, kind: AssociationKind, instance_id: &str) -> AppResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE instance_id = ?", kind.table());
    Ok(conn.query_row(&sql, [instance_id], |r| r.get(0))?)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationRow {
    pub id: String,
    pub criterion_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    pub block: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub fn list_rows(
    conn: &Connection,
    kind: AssociationKind,
    instance_id: &str,
) -> AppResult<Vec<AssociationRow>> {
    let sql = format!(
        "SELECT id, criterion_id, {}, block, created_at, updated_at
         FROM {}
         WHERE instance_id = ?
         ORDER BY block, criterion_id, {}",
        kind.column(),
        kind.table(),
        kind.column()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([instance_id], |r| {
            let (marker_id, page) = match kind {
                AssociationKind::Marker => (Some(r.get::<_, String>(2)?), None),
                AssociationKind::Page => (None, Some(r.get::<_, i64>(2)?)),
            };
            Ok(AssociationRow {
                id: r.get(0)?,
                criterion_id: r.get(1)?,
                marker_id,
                page,
                block: r.get(3)?,
                created_at: r.get(4)?,
                updated_at: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerSummaryRow {
    pub criterion_id: String,
    pub description: String,
    pub markers: Vec<UserSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummaryRow {
    pub criterion_id: String,
    pub description: String,
    pub pages: Vec<i64>,
}

/// One row per rubric criterion, markers ordered by last name.
pub fn marker_summary(
    conn: &Connection,
    instance_id: &str,
    definition: &Definition,
) -> AppResult<Vec<MarkerSummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT mc.criterion_id, u.id, u.first_name, u.last_name
         FROM marker_criteria mc
         JOIN users u ON u.id = mc.marker_id
         WHERE mc.instance_id = ?
         ORDER BY u.last_name, u.first_name, u.id",
    )?;
    let assigned = stmt
        .query_map([instance_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                UserSummary::new(r.get(1)?, r.get(2)?, r.get(3)?),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut by_criterion: HashMap<String, Vec<UserSummary>> = HashMap::new();
    for (criterion_id, user) in assigned {
        by_criterion.entry(criterion_id).or_default().push(user);
    }

    Ok(definition
        .criteria
        .iter()
        .map(|c| MarkerSummaryRow {
            criterion_id: c.id.clone(),
            description: c.description.clone(),
            markers: by_criterion.remove(&c.id).unwrap_or_default(),
        })
        .collect())
}

pub fn page_summary(
    conn: &Connection,
    instance_id: &str,
    definition: &Definition,
) -> AppResult<Vec<PageSummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT criterion_id, page
         FROM page_criteria
         WHERE instance_id = ?
         ORDER BY page",
    )?;
    let assigned = stmt
        .query_map([instance_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut by_criterion: HashMap<String, Vec<i64>> = HashMap::new();
    for (criterion_id, page) in assigned {
        by_criterion.entry(criterion_id).or_default().push(page);
    }

    Ok(definition
        .criteria
        .iter()
        .map(|c| PageSummaryRow {
            criterion_id: c.id.clone(),
            description: c.description.clone(),
            pages: by_criterion.remove(&c.id).unwrap_or_default(),
        })
        .collect())
}

/// What markers are able to see given how many rows each table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    WholeRubricAllPages,
    SelectedCriteriaAllPages,
    Nothing,
    SelectedCriteriaAssignedPages,
}

impl Visibility {
    pub fn from_counts(markers: i64, pages: i64) -> Self {
        match (markers > 0, pages > 0) {
            (false, false) => Self::WholeRubricAllPages,
            (true, false) => Self::SelectedCriteriaAllPages,
            (false, true) => Self::Nothing,
            (true, true) => Self::SelectedCriteriaAssignedPages,
        }
    }

    /// Informational boxes shown above the summary table.
    pub fn boxes(self) -> &'static [&'static str] {
        match self {
            Self::WholeRubricAllPages => &["markerscanseewholerubric", "markerscanseeallpages"],
            Self::SelectedCriteriaAllPages => {
                &["markerscanseeselectedcriteria", "markerscanseeallpages"]
            }
            Self::Nothing => &[],
            Self::SelectedCriteriaAssignedPages => &[
                "markerscanseeselectedcriteria",
                "markerscanseepageswithcriteria",
            ],
        }
    }

    /// Problem notification replacing the boxes, if any.
    pub fn problem(self) -> Option<&'static str> {
        match self {
            Self::Nothing => Some("markerscanseenothing"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerScope {
    pub marker_id: String,
    pub visibility: Visibility,
    pub criteria: Vec<String>,
    pub pages: Vec<i64>,
}

/// Criteria and pages a marker may work on.
pub fn marker_scope(
    conn: &Connection,
    instance_id: &str,
    total_pages: i64,
    definition: &Definition,
    marker_id: &str,
) -> AppResult<MarkerScope> {
    let marker_rows = count(conn, AssociationKind::Marker, instance_id)?;
    let page_rows = count(conn, AssociationKind::Page, instance_id)?;
    let visibility = Visibility::from_counts(marker_rows, page_rows);

    let criteria: Vec<String> = match visibility {
        Visibility::WholeRubricAllPages => {
            definition.criteria.iter().map(|c| c.id.clone()).collect()
        }
        Visibility::Nothing => Vec::new(),
        Visibility::SelectedCriteriaAllPages | Visibility::SelectedCriteriaAssignedPages => {
            let mut stmt = conn.prepare(
                "SELECT criterion_id FROM marker_criteria WHERE instance_id = ? AND marker_id = ?",
            )?;
            let mine: BTreeSet<String> = stmt
                .query_map((instance_id, marker_id), |r| r.get::<_, String>(0))
                .and_then(|it| it.collect::<Result<_, _>>())?;
            definition
                .criteria
                .iter()
                .filter(|c| mine.contains(&c.id))
                .map(|c| c.id.clone())
                .collect()
        }
    };

    let pages: Vec<i64> = match visibility {
        Visibility::WholeRubricAllPages | Visibility::SelectedCriteriaAllPages => {
            (1..=total_pages).collect()
        }
        Visibility::Nothing => Vec::new(),
        Visibility::SelectedCriteriaAssignedPages => {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT pc.page
                 FROM page_criteria pc
                 JOIN marker_criteria mc
                   ON mc.instance_id = pc.instance_id AND mc.criterion_id = pc.criterion_id
                 WHERE pc.instance_id = ? AND mc.marker_id = ?
                 ORDER BY pc.page",
            )?;
            let pages = stmt
                .query_map((instance_id, marker_id), |r| r.get::<_, i64>(0))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
            pages
        }
    };

    Ok(MarkerScope {
        marker_id: marker_id.to_string(),
        visibility,
        criteria,
        pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{self, GradingMethod, NewUser};
    use crate::rubric::{self, CriterionInput};

    struct Fixture {
        conn: Connection,
        instance_id: String,
        definition: Definition,
        markers: Vec<String>,
    }

    fn fixture() -> Fixture {
        let conn = db::open_memory();
        let course = host::create_course(&conn, "C").unwrap();
        let inst =
            host::create_instance(&conn, &course.id, "Exam", GradingMethod::Rubric, 3).unwrap();
        let definition = rubric::define(
            &conn,
            &inst,
            "R",
            &["One", "Two", "Three"]
                .iter()
                .map(|d| CriterionInput {
                    description: d.to_string(),
                    levels: Vec::new(),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap();
        let markers = ["Young", "Adams"]
            .iter()
            .map(|last| {
                let id = host::create_user(
                    &conn,
                    &NewUser {
                        username: last.to_lowercase(),
                        first_name: "M".into(),
                        last_name: last.to_string(),
                        email: None,
                        is_guest: false,
                        is_admin: false,
                    },
                )
                .unwrap();
                host::assign_role(&conn, &course.id, &id, "teacher").unwrap();
                id
            })
            .collect();
        Fixture {
            conn,
            instance_id: inst.id,
            definition,
            markers,
        }
    }

    fn crit(f: &Fixture, i: usize) -> String {
        f.definition.criteria[i].id.clone()
    }

    #[test]
    fn expand_pairs_is_entity_major_and_deduplicated() {
        let pairs = expand_pairs(
            &[Entity::Page(2), Entity::Page(1), Entity::Page(2)],
            &["a".to_string(), "b".to_string()],
        );
        let flat: Vec<_> = pairs
            .iter()
            .map(|(e, c)| match e {
                Entity::Page(p) => format!("{}{}", p, c),
                Entity::Marker(m) => format!("{}{}", m, c),
            })
            .collect();
        assert_eq!(flat, vec!["2a", "2b", "1a", "1b"]);
    }

    #[test]
    fn first_batch_gets_block_one_and_resubmission_moves_rows() {
        let f = fixture();
        assert_eq!(next_block(&f.conn, AssociationKind::Marker, &f.instance_id).unwrap(), 1);

        let first = apply_batch(
            &f.conn,
            AssociationKind::Marker,
            &f.instance_id,
            &[Entity::Marker(f.markers[0].clone())],
            &[crit(&f, 0), crit(&f, 1)],
        )
        .unwrap();
        assert_eq!((first.block, first.inserted, first.updated), (1, 2, 0));

        let second = apply_batch(
            &f.conn,
            AssociationKind::Marker,
            &f.instance_id,
            &[Entity::Marker(f.markers[0].clone())],
            &[crit(&f, 1), crit(&f, 2)],
        )
        .unwrap();
        assert_eq!((second.block, second.inserted, second.updated), (2, 1, 1));

        let rows = list_rows(&f.conn, AssociationKind::Marker, &f.instance_id).unwrap();
        assert_eq!(rows.len(), 3);
        let blocks: Vec<_> = rows
            .iter()
            .map(|r| (r.criterion_id.clone(), r.block))
            .collect();
        assert!(blocks.contains(&(crit(&f, 0), 1)));
        assert!(blocks.contains(&(crit(&f, 1), 2)));
        assert!(blocks.contains(&(crit(&f, 2), 2)));
    }

    #[test]
    fn blocks_are_counted_per_table() {
        let f = fixture();
        apply_batch(
            &f.conn,
            AssociationKind::Marker,
            &f.instance_id,
            &[Entity::Marker(f.markers[1].clone())],
            &[crit(&f, 0)],
        )
        .unwrap();
        let pages = apply_batch(
            &f.conn,
            AssociationKind::Page,
            &f.instance_id,
            &[Entity::Page(1), Entity::Page(3)],
            &[crit(&f, 0)],
        )
        .unwrap();
        assert_eq!((pages.block, pages.inserted), (1, 2));
        assert_eq!(count(&f.conn, AssociationKind::Page, &f.instance_id).unwrap(), 2);
    }

    #[test]
    fn mismatched_entity_kind_is_rejected() {
        let f = fixture();
        let e = apply_batch(
            &f.conn,
            AssociationKind::Marker,
            &f.instance_id,
            &[Entity::Page(1)],
            &[crit(&f, 0)],
        )
        .unwrap_err();
        assert_eq!(e.code, "bad_params");
    }

    #[test]
    fn delete_removes_only_the_given_criterion() {
        let f = fixture();
        apply_batch(
            &f.conn,
            AssociationKind::Marker,
            &f.instance_id,
            &[
                Entity::Marker(f.markers[0].clone()),
                Entity::Marker(f.markers[1].clone()),
            ],
            &[crit(&f, 0), crit(&f, 1)],
        )
        .unwrap();
        let n = delete_for_criterion(&f.conn, AssociationKind::Marker, &f.instance_id, &crit(&f, 0))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(count(&f.conn, AssociationKind::Marker, &f.instance_id).unwrap(), 2);
    }

    #[test]
    fn marker_summary_lists_every_criterion_with_markers_by_last_name() {
        let f = fixture();
        apply_batch(
            &f.conn,
            AssociationKind::Marker,
            &f.instance_id,
            &[
                Entity::Marker(f.markers[0].clone()),
                Entity::Marker(f.markers[1].clone()),
            ],
            &[crit(&f, 1)],
        )
        .unwrap();
        let rows = marker_summary(&f.conn, &f.instance_id, &f.definition).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].markers.is_empty());
        let names: Vec<_> = rows[1].markers.iter().map(|u| u.last_name.as_str()).collect();
        assert_eq!(names, vec!["Adams", "Young"]);
    }

    #[test]
    fn visibility_covers_all_four_states() {
        assert_eq!(Visibility::from_counts(0, 0), Visibility::WholeRubricAllPages);
        assert_eq!(Visibility::from_counts(2, 0), Visibility::SelectedCriteriaAllPages);
        assert_eq!(Visibility::from_counts(0, 5), Visibility::Nothing);
        assert_eq!(Visibility::from_counts(1, 1), Visibility::SelectedCriteriaAssignedPages);
        assert_eq!(Visibility::Nothing.problem(), Some("markerscanseenothing"));
        assert!(Visibility::Nothing.boxes().is_empty());
    }

    #[test]
    fn marker_scope_follows_page_links_of_own_criteria() {
        let f = fixture();
        let def = &f.definition;
        let inst = &f.instance_id;
        apply_batch(
            &f.conn,
            AssociationKind::Marker,
            inst,
            &[Entity::Marker(f.markers[0].clone())],
            &[crit(&f, 0)],
        )
        .unwrap();

        let scope = marker_scope(&f.conn, inst, 3, def, &f.markers[0]).unwrap();
        assert_eq!(scope.criteria, vec![crit(&f, 0)]);
        assert_eq!(scope.pages, vec![1, 2, 3]);

        apply_batch(&f.conn, AssociationKind::Page, inst, &[Entity::Page(2)], &[crit(&f, 0)])
            .unwrap();
        apply_batch(&f.conn, AssociationKind::Page, inst, &[Entity::Page(3)], &[crit(&f, 1)])
            .unwrap();
        let scope = marker_scope(&f.conn, inst, 3, def, &f.markers[0]).unwrap();
        assert_eq!(scope.pages, vec![2]);

        let other = marker_scope(&f.conn, inst, 3, def, &f.markers[1]).unwrap();
        assert!(other.criteria.is_empty());
        assert!(other.pages.is_empty());
    }
}
