//! Aggregation pipeline construction for list, by-id and count queries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::object_id::ObjectId;
use crate::query::SortOrder;
use crate::search::SearchPipeline;

/// Status value of live records.
pub const ACTIVE_STATUS: i64 = 1;

/// Where injected search and sort stages go relative to `$skip`/`$limit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StageOrder {
    /// Search and sort, then page. Pages are drawn from the filtered, sorted set.
    #[default]
    FilterThenPage,
    /// Page, then search and sort within the page.
    PageThenFilter,
}

/// Paging and sorting parameters of a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    /// 1-based page number; 0 means the first page.
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub page_size: u64,
    #[serde(default, rename = "sortTitle")]
    pub sort_field: Option<String>,
    #[serde(default, rename = "sortType")]
    pub sort_direction: Option<String>,
}

impl QueryParams {
    pub fn page(page: u64, page_size: u64) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, field: impl Into<String>, direction: impl Into<String>) -> Self {
        self.sort_field = Some(field.into());
        self.sort_direction = Some(direction.into());
        self
    }

    /// Zero-based number of documents to skip.
    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }

    /// Sort field and order, if both field and direction are non-empty.
    /// `"desc"` sorts descending; any other direction ascending.
    pub fn sort(&self) -> Option<(&str, SortOrder)> {
        let field = self.sort_field.as_deref().filter(|f| !f.is_empty())?;
        let direction = self.sort_direction.as_deref().filter(|d| !d.is_empty())?;
        let order = if direction == "desc" {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        };
        Some((field, order))
    }
}

/// How one output field of a projection is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projected {
    /// Keep the stored field under its own name.
    Include,
    /// Copy the value at a path, e.g. `_id` into `expenseID`.
    Path(&'static str),
    /// Coerce the value at a path to a date.
    Date(&'static str),
}

impl Projected {
    fn to_stage_value(self) -> Value {
        match self {
            Projected::Include => json!(1),
            Projected::Path(p) => json!(format!("${p}")),
            Projected::Date(p) => json!({ "$toDate": format!("${p}") }),
        }
    }
}

/// A reference field resolved by joining another collection.
///
/// The stored value is `{"$ref": from, "$id": <id>}` under `field`. The join
/// writes matches to `as_field`; the projection writes `display` of the
/// matched entity, or `""` when nothing matched, to `output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceJoin {
    pub field: &'static str,
    pub from: &'static str,
    pub as_field: &'static str,
    pub display: &'static str,
    pub output: &'static str,
}

impl ReferenceJoin {
    pub fn lookup_stage(&self) -> Value {
        json!({ "$lookup": {
            "from": self.from,
            "localField": format!("{}.$id", self.field),
            "foreignField": "_id",
            "as": self.as_field,
        }})
    }

    /// Expression yielding `""` for an empty join, else the display field of
    /// the first (by id uniqueness, only) match.
    pub fn projection(&self) -> Value {
        let joined = format!("${}", self.as_field);
        json!({ "$cond": [
            { "$eq": [joined, []] },
            "",
            { "$arrayElemAt": [format!("{joined}.{}", self.display), 0] },
        ]})
    }
}

/// The joins and output shape of one response type.
#[derive(Debug, Clone, Copy)]
pub struct EntityView {
    /// Name of the id in messages, e.g. `expenseID`.
    pub id_label: &'static str,
    pub joins: &'static [ReferenceJoin],
    pub fields: &'static [(&'static str, Projected)],
}

impl EntityView {
    /// Output names of the reference fields.
    pub fn reference_outputs(&self) -> impl Iterator<Item = &'static str> + use<> {
        self.joins.iter().map(|j| j.output)
    }

    fn project_stage(&self) -> Value {
        let mut fields = Map::new();
        for (name, how) in self.fields {
            fields.insert(name.to_string(), how.to_stage_value());
        }
        for join in self.joins {
            fields.insert(join.output.to_string(), join.projection());
        }
        json!({ "$project": fields })
    }

    fn join_stages(&self) -> impl Iterator<Item = Value> + use<> {
        self.joins.iter().map(ReferenceJoin::lookup_stage)
    }
}

// ---------------------------------------------------------------------------
// Stage constructors
// ---------------------------------------------------------------------------

pub fn match_stage(filter: Value) -> Value {
    json!({ "$match": filter })
}

pub fn active_stage() -> Value {
    match_stage(json!({ "status": ACTIVE_STATUS }))
}

pub fn skip_stage(n: u64) -> Value {
    json!({ "$skip": n })
}

pub fn limit_stage(n: u64) -> Value {
    json!({ "$limit": n })
}

pub fn sort_stage(field: &str, order: SortOrder) -> Value {
    json!({ "$sort": { field: order.as_i64() } })
}

pub fn count_stage() -> Value {
    json!({ "$group": { "_id": null, "count": { "$sum": 1 } } })
}

/// Parse a caller-supplied id, failing with `invalid <label>`.
pub fn parse_id(raw: &str, label: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw).map_err(|_| {
        tracing::warn!(label, raw, "rejected malformed id");
        Error::Validation(format!("invalid {label}"))
    })
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds the stage sequences for one entity view.
#[derive(Debug, Clone, Copy)]
pub struct PipelineBuilder<'a> {
    view: &'a EntityView,
    order: StageOrder,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(view: &'a EntityView, order: StageOrder) -> Self {
        Self { view, order }
    }

    /// Active records, joined and projected, with optional search, sort and
    /// paging. A `page_size` of 0 emits no `$limit`.
    pub fn list(&self, params: &QueryParams, search: Option<&SearchPipeline>) -> Vec<Value> {
        let mut stages = vec![active_stage()];
        stages.extend(self.view.join_stages());
        stages.push(self.view.project_stage());

        let mut paging = vec![skip_stage(params.skip())];
        if params.page_size > 0 {
            paging.push(limit_stage(params.page_size));
        }

        let mut filtering: Vec<Value> = search
            .filter(|s| s.is_active())
            .map(|s| s.stages.clone())
            .unwrap_or_default();
        if let Some((field, order)) = params.sort() {
            filtering.push(sort_stage(field, order));
        }

        match self.order {
            StageOrder::FilterThenPage => {
                stages.extend(filtering);
                stages.extend(paging);
            }
            StageOrder::PageThenFilter => {
                stages.extend(paging);
                stages.extend(filtering);
            }
        }
        tracing::debug!(stages = stages.len(), order = ?self.order, "built list pipeline");
        stages
    }

    /// One record by id regardless of status; no paging or sort.
    pub fn by_id(&self, raw_id: &str) -> Result<Vec<Value>> {
        let id = parse_id(raw_id, self.view.id_label)?;
        let mut stages = vec![match_stage(json!({ "_id": id }))];
        stages.extend(self.view.join_stages());
        stages.push(self.view.project_stage());
        Ok(stages)
    }

    /// Single `{_id: null, count}` group over active records. With an active
    /// search the records are joined and projected first so the search sees
    /// the same fields as in list results.
    pub fn count(&self, search: Option<&SearchPipeline>) -> Vec<Value> {
        let mut stages = vec![active_stage()];
        if let Some(search) = search.filter(|s| s.is_active()) {
            stages.extend(self.view.join_stages());
            stages.push(self.view.project_stage());
            stages.extend(search.stages.iter().cloned());
        }
        stages.push(count_stage());
        stages
    }
}
