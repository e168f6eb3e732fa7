//! The markers management page: access checks, form submissions, deletes
//! and the summary model.

use crate::access::{self, Capability, UserSummary, EVENT_MARKERS_ACCESS_DENIED};
use crate::assign::{self, AssociationKind, Entity, Visibility};
use crate::error::{AppError, AppResult};
use crate::host::{self, Course, Instance};
use crate::page::{self, FieldError, FormModel, Notification, NotifyKind, OptionItem, PageModel};
use crate::rubric::{self, Definition};
use crate::strings::get_string;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

pub const FORM_ADD_MARKERS: &str = "addmarkers";
pub const FORM_ADD_PAGES: &str = "addpages";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkersSettings {
    pub max_batch_associations: usize,
    pub show_empty_criteria: bool,
    pub audit_denied_access: bool,
}

impl Default for MarkersSettings {
    fn default() -> Self {
        Self {
            max_batch_associations: 5000,
            show_empty_criteria: true,
            audit_denied_access: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAction {
    View,
    DeleteMarkers,
    DeletePages,
}

impl PageAction {
    /// Keeps ASCII letters only; anything unrecognised renders the page.
    pub fn parse(raw: Option<&str>) -> Self {
        let cleaned: String = raw
            .unwrap_or("view")
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        match cleaned.as_str() {
            "deletemarkers" => Self::DeleteMarkers,
            "deletepages" => Self::DeletePages,
            _ => Self::View,
        }
    }

    fn delete_kind(self) -> Option<AssociationKind> {
        match self {
            Self::View => None,
            Self::DeleteMarkers => Some(AssociationKind::Marker),
            Self::DeletePages => Some(AssociationKind::Page),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub markers: Vec<String>,
    #[serde(default)]
    pub pages: Vec<i64>,
    #[serde(default)]
    pub criteria: Vec<String>,
}

impl Submission {
    fn kind(&self) -> Option<AssociationKind> {
        match self.action.as_str() {
            FORM_ADD_MARKERS => Some(AssociationKind::Marker),
            FORM_ADD_PAGES => Some(AssociationKind::Page),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub user_id: Option<String>,
    pub instance_id: String,
    pub criterion_id: Option<String>,
    pub action: PageAction,
    pub submit: Option<Submission>,
}

/// Everything the page needs once the request passed its checks.
#[derive(Debug)]
pub struct PageContext {
    pub instance: Instance,
    pub course: Course,
    pub definition: Definition,
    pub can_grade: bool,
    pub criterion_id: Option<String>,
}

/// Runs the access checks in order: instance, course, criterion, login,
/// guest, rubric, criterion in rubric, then `required`. A failed capability
/// check is audited when enabled.
pub fn authorize(
    conn: &Connection,
    user_id: Option<&str>,
    instance_id: &str,
    criterion_id: Option<&str>,
    required: Capability,
    settings: &MarkersSettings,
) -> AppResult<PageContext> {
    let Some(instance) = host::load_instance(conn, instance_id)? else {
        return Err(AppError::new("invalid_instance", get_string("invalidid"))
            .with_details(json!({ "id": instance_id })));
    };
    let Some(course) = host::load_course(conn, &instance.course_id)? else {
        return Err(AppError::new("invalid_course", get_string("invalidcourseid"))
            .with_details(json!({ "courseId": instance.course_id })));
    };
    if let Some(criterion_id) = criterion_id {
        if rubric::find_criterion(conn, criterion_id)?.is_none() {
            return Err(invalid_criterion(criterion_id));
        }
    }

    let user = access::require_login(conn, user_id, &course.id)?;
    access::require_not_guest(&user)?;

    let definition = rubric::validate_rubric(conn, &instance)?;
    if let Some(criterion_id) = criterion_id {
        if definition.criterion(criterion_id).is_none() {
            return Err(invalid_criterion(criterion_id));
        }
    }

    if !access::has_capability(conn, &user, &course.id, required)? {
        if settings.audit_denied_access {
            access::record_event(
                conn,
                EVENT_MARKERS_ACCESS_DENIED,
                &instance.id,
                &instance.id,
                Some(&user.id),
            )?;
        }
        return Err(AppError::new("invalid_access", get_string("invalidaccess"))
            .with_details(json!({ "capability": required.as_str() })));
    }
    let can_grade = access::has_capability(conn, &user, &course.id, Capability::Grade)?;

    Ok(PageContext {
        instance,
        course,
        definition,
        can_grade,
        criterion_id: criterion_id.map(str::to_string),
    })
}

/// Access for `markers.scope`: markers may look up their own scope with the
/// grade capability; anyone else needs `assignmarkers`.
pub fn authorize_scope(
    conn: &Connection,
    user_id: Option<&str>,
    instance_id: &str,
    marker_id: &str,
    settings: &MarkersSettings,
) -> AppResult<PageContext> {
    let required = if user_id == Some(marker_id) {
        Capability::Grade
    } else {
        Capability::AssignMarkers
    };
    authorize(conn, user_id, instance_id, None, required, settings)
}

fn invalid_criterion(criterion_id: &str) -> AppError {
    AppError::new("invalid_criterion", get_string("invalidcriterion"))
        .with_details(json!({ "criterion": criterion_id }))
}

/// Checks a submission against the form options. Field errors leave the
/// tables untouched.
pub fn validate_submission(
    kind: AssociationKind,
    sub: &Submission,
    graders: &[UserSummary],
    total_pages: i64,
    definition: &Definition,
    settings: &MarkersSettings,
) -> Result<(Vec<Entity>, Vec<String>), Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut entities = Vec::new();

    match kind {
        AssociationKind::Marker => {
            if sub.markers.is_empty() {
                errors.push(FieldError::new("markers", "required"));
            }
            for m in &sub.markers {
                if graders.iter().any(|g| &g.id == m) {
                    entities.push(Entity::Marker(m.clone()));
                } else {
                    errors.push(FieldError::new("markers", "invalidmarker").with_value(json!(m)));
                }
            }
        }
        AssociationKind::Page => {
            if sub.pages.is_empty() {
                errors.push(FieldError::new("pages", "required"));
            }
            for p in &sub.pages {
                if (1..=total_pages).contains(p) {
                    entities.push(Entity::Page(*p));
                } else {
                    errors.push(FieldError::new("pages", "invalidpage").with_value(json!(p)));
                }
            }
        }
    }

    if sub.criteria.is_empty() {
        errors.push(FieldError::new("criteria", "required"));
    }
    for c in &sub.criteria {
        if definition.criterion(c).is_none() {
            errors.push(FieldError::new("criteria", "invalidcriterion").with_value(json!(c)));
        }
    }

    if errors.is_empty() {
        let pairs = assign::expand_pairs(&entities, &sub.criteria).len();
        if pairs > settings.max_batch_associations {
            errors.push(
                FieldError::new("criteria", "toomanyassociations").with_value(json!({
                    "pairs": pairs,
                    "max": settings.max_batch_associations,
                })),
            );
        }
    }

    if errors.is_empty() {
        Ok((entities, sub.criteria.clone()))
    } else {
        Err(errors)
    }
}

fn criteria_options(definition: &Definition) -> Vec<OptionItem> {
    definition
        .criteria
        .iter()
        .map(|c| OptionItem {
            value: json!(c.id),
            label: c.description.clone(),
        })
        .collect()
}

fn markers_form(graders: &[UserSummary], definition: &Definition) -> FormModel {
    FormModel {
        action: FORM_ADD_MARKERS,
        title: get_string("addmarkers").to_string(),
        entity_field: "markers",
        entity_options: graders
            .iter()
            .map(|u| OptionItem {
                value: json!(u.id),
                label: u.full_name.clone(),
            })
            .collect(),
        criteria_options: criteria_options(definition),
        errors: Vec::new(),
    }
}

fn pages_form(total_pages: i64, definition: &Definition) -> FormModel {
    FormModel {
        action: FORM_ADD_PAGES,
        title: get_string("addpages").to_string(),
        entity_field: "pages",
        entity_options: (1..=total_pages)
            .map(|p| OptionItem {
                value: json!(p),
                label: p.to_string(),
            })
            .collect(),
        criteria_options: criteria_options(definition),
        errors: Vec::new(),
    }
}

/// Runs one request against the markers page and returns what to show.
pub fn handle_page(
    conn: &Connection,
    req: &PageRequest,
    settings: &MarkersSettings,
) -> AppResult<PageModel> {
    let ctx = authorize(
        conn,
        req.user_id.as_deref(),
        &req.instance_id,
        req.criterion_id.as_deref(),
        Capability::AssignMarkers,
        settings,
    )?;
    let instance_id = ctx.instance.id.as_str();

    // A delete needs its criterion before anything is written.
    let delete = match (req.action.delete_kind(), ctx.criterion_id.as_deref()) {
        (None, _) => None,
        (Some(kind), Some(criterion_id)) => Some((kind, criterion_id)),
        (Some(_), None) => {
            return Err(AppError::bad_params("criterion is required to delete assignments"))
        }
    };

    let graders = access::users_with_capability(conn, &ctx.course.id, Capability::Grade)?;
    let mut markers_form = markers_form(&graders, &ctx.definition);
    let mut pages_form = pages_form(ctx.instance.total_pages, &ctx.definition);
    let mut notifications = Vec::new();
    let mut batch = None;
    let mut deleted = None;

    if let Some(sub) = req.submit.as_ref() {
        match sub.kind() {
            Some(kind) => match validate_submission(
                kind,
                sub,
                &graders,
                ctx.instance.total_pages,
                &ctx.definition,
                settings,
            ) {
                Ok((entities, criteria)) => {
                    let outcome = assign::apply_batch(conn, kind, instance_id, &entities, &criteria)?;
                    notifications.push(Notification::new(NotifyKind::Success, "saved"));
                    batch = Some(outcome);
                }
                Err(errors) => {
                    tracing::debug!(form = %sub.action, errors = errors.len(), "submission rejected");
                    match kind {
                        AssociationKind::Marker => markers_form.errors = errors,
                        AssociationKind::Page => pages_form.errors = errors,
                    }
                }
            },
            None => {
                tracing::debug!(form = %sub.action, "ignoring submission for unknown form");
            }
        }
    }

    if let Some((kind, criterion_id)) = delete {
        let n = assign::delete_for_criterion(conn, kind, instance_id, criterion_id)?;
        notifications.push(Notification::new(NotifyKind::Success, "transactionsuccessful"));
        deleted = Some(n);
    }

    let marker_count = assign::count(conn, AssociationKind::Marker, instance_id)?;
    let page_count = assign::count(conn, AssociationKind::Page, instance_id)?;
    let visibility = Visibility::from_counts(marker_count, page_count);
    let (boxes, problem) = page::visibility_notes(visibility);
    notifications.extend(problem);

    let marker_rows = assign::marker_summary(conn, instance_id, &ctx.definition)?;
    let page_rows = assign::page_summary(conn, instance_id, &ctx.definition)?;

    Ok(PageModel {
        title: format!("{}: {}", get_string("markers"), ctx.instance.name),
        instance_id: instance_id.to_string(),
        course_id: ctx.course.id.clone(),
        tabs: page::tabs("markers", ctx.can_grade),
        notifications,
        boxes,
        visibility,
        marker_table: page::marker_table(instance_id, marker_rows, settings.show_empty_criteria),
        page_table: page::page_table(instance_id, page_rows, settings.show_empty_criteria),
        markers_form,
        pages_form,
        batch,
        deleted,
    })
}
