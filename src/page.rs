//! Output model of the markers page. The desktop shell owns the markup; the
//! sidecar only decides what goes on the page.

use crate::access::UserSummary;
use crate::assign::{BatchOutcome, MarkerSummaryRow, PageSummaryRow, Visibility};
use crate::strings::get_string;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NotifyKind {
    Success,
    Problem,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotifyKind,
    pub key: String,
    pub text: String,
}

impl Notification {
    pub fn new(kind: NotifyKind, key: &str) -> Self {
        Self {
            kind,
            key: key.to_string(),
            text: get_string(key).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoBox {
    pub key: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: &'static str,
    pub label: &'static str,
    pub selected: bool,
}

/// A link back into the page with the given parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLink {
    pub label: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerCell {
    pub criterion_id: String,
    pub description: String,
    pub markers: Vec<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<ActionLink>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCell {
    pub criterion_id: String,
    pub description: String,
    pub pages: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<ActionLink>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Table<R> {
    pub head: Vec<String>,
    pub rows: Vec<R>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionItem {
    pub value: serde_json::Value,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub field: String,
    pub key: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl FieldError {
    pub fn new(field: &str, key: &str) -> Self {
        Self {
            field: field.to_string(),
            key: key.to_string(),
            text: get_string(key).to_string(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormModel {
    pub action: &'static str,
    pub title: String,
    /// Name of the entity field: `markers` or `pages`.
    pub entity_field: &'static str,
    pub entity_options: Vec<OptionItem>,
    pub criteria_options: Vec<OptionItem>,
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageModel {
    pub title: String,
    pub instance_id: String,
    pub course_id: String,
    pub tabs: Vec<Tab>,
    pub notifications: Vec<Notification>,
    pub boxes: Vec<InfoBox>,
    pub visibility: Visibility,
    pub marker_table: Table<MarkerCell>,
    pub page_table: Table<PageCell>,
    pub markers_form: FormModel,
    pub pages_form: FormModel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,
}

pub fn tabs(selected: &str, can_grade: bool) -> Vec<Tab> {
    let mut out = Vec::new();
    if can_grade {
        out.push(Tab {
            id: "marking",
            label: get_string("marking"),
            selected: selected == "marking",
        });
    }
    out.push(Tab {
        id: "markers",
        label: get_string("markers"),
        selected: selected == "markers",
    });
    out
}

/// Boxes and notifications describing what markers can see.
pub fn visibility_notes(visibility: Visibility) -> (Vec<InfoBox>, Option<Notification>) {
    let boxes = visibility
        .boxes()
        .iter()
        .map(|k| InfoBox {
            key: k.to_string(),
            text: get_string(k).to_string(),
        })
        .collect();
    let problem = visibility
        .problem()
        .map(|k| Notification::new(NotifyKind::Problem, k));
    (boxes, problem)
}

fn delete_link(instance_id: &str, criterion_id: &str, action: &str) -> ActionLink {
    ActionLink {
        label: get_string("delete").to_string(),
        params: json!({
            "id": instance_id,
            "criterion": criterion_id,
            "action": action,
        }),
    }
}

pub fn marker_table(
    instance_id: &str,
    rows: Vec<MarkerSummaryRow>,
    show_empty: bool,
) -> Table<MarkerCell> {
    Table {
        head: vec![
            get_string("criterion").to_string(),
            get_string("markers").to_string(),
        ],
        rows: rows
            .into_iter()
            .filter(|r| show_empty || !r.markers.is_empty())
            .map(|r| {
                let delete = (!r.markers.is_empty())
                    .then(|| delete_link(instance_id, &r.criterion_id, "deletemarkers"));
                MarkerCell {
                    criterion_id: r.criterion_id,
                    description: r.description,
                    markers: r.markers,
                    delete,
                }
            })
            .collect(),
    }
}

pub fn page_table(instance_id: &str, rows: Vec<PageSummaryRow>, show_empty: bool) -> Table<PageCell> {
    Table {
        head: vec![
            get_string("criterion").to_string(),
            get_string("pages").to_string(),
        ],
        rows: rows
            .into_iter()
            .filter(|r| show_empty || !r.pages.is_empty())
            .map(|r| {
                let delete = (!r.pages.is_empty())
                    .then(|| delete_link(instance_id, &r.criterion_id, "deletepages"));
                PageCell {
                    criterion_id: r.criterion_id,
                    description: r.description,
                    pages: r.pages,
                    delete,
                }
            })
            .collect(),
    }
}
