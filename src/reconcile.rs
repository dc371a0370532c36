//! Sparse partial updates.
//!
//! A payload type lists its scalar fields explicitly, each with an
//! emptiness predicate and an accessor. [`reconcile`] turns a payload into an
//! [`UpdatePlan`]; [`apply`] runs the plan as up to three separate
//! `update_one` calls. The calls are not atomic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::builder::parse_id;
use crate::error::{Error, Result, StoreError, UpdateStep};
use crate::object_id::ObjectId;
use crate::store::{Collection, DocumentStore};

/// The "zero value" test deciding whether a payload field is written.
pub trait IsEmpty {
    fn is_empty_value(&self) -> bool;
}

impl IsEmpty for str {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl IsEmpty for String {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl IsEmpty for bool {
    fn is_empty_value(&self) -> bool {
        !*self
    }
}

impl IsEmpty for f64 {
    fn is_empty_value(&self) -> bool {
        *self == 0.0
    }
}

macro_rules! int_is_empty {
    ($($t:ty),*) => {
        $(impl IsEmpty for $t {
            fn is_empty_value(&self) -> bool {
                *self == 0
            }
        })*
    };
}

int_is_empty!(i32, i64, u32, u64);

impl<T> IsEmpty for Option<T> {
    fn is_empty_value(&self) -> bool {
        self.is_none()
    }
}

impl<T> IsEmpty for Vec<T> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl IsEmpty for ObjectId {
    fn is_empty_value(&self) -> bool {
        self.is_nil()
    }
}

/// One scalar field of a partial-update payload.
pub struct ScalarField<T> {
    /// Stored field name.
    pub name: &'static str,
    pub is_empty: fn(&T) -> bool,
    /// Stored value. Only called when the field is non-empty.
    pub value: fn(&T) -> Result<Value>,
}

/// An embedded list entry that receives its id when it is created.
pub trait ListItem: Serialize {
    fn assign_id(&mut self, id: ObjectId);
}

/// Identifies an embedded list entry to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    #[serde(default)]
    pub id: String,
}

impl ItemRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

pub trait PartialUpdate: Sized + 'static {
    type Item: ListItem;

    /// Name of the embedded list field that items are added to and removed from.
    const LIST_FIELD: &'static str;

    /// Scalar fields in the order they are evaluated. Never includes the
    /// list-mutation fields.
    fn scalar_fields() -> &'static [ScalarField<Self>];

    fn take_added(&mut self) -> Vec<Self::Item>;

    fn removed(&self) -> &[ItemRef];
}

/// The three independent operations derived from one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePlan {
    pub list_field: &'static str,
    pub set: Map<String, Value>,
    pub push: Vec<Value>,
    pub pushed_ids: Vec<ObjectId>,
    pub pull: Vec<ObjectId>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.push.is_empty() && self.pull.is_empty()
    }

    pub fn set_update(&self) -> Option<Value> {
        (!self.set.is_empty()).then(|| json!({ "$set": self.set }))
    }

    pub fn push_update(&self) -> Option<Value> {
        (!self.push.is_empty())
            .then(|| json!({ "$push": { self.list_field: { "$each": self.push } } }))
    }

    pub fn pull_update(&self) -> Option<Value> {
        (!self.pull.is_empty())
            .then(|| json!({ "$pull": { self.list_field: { "_id": { "$in": self.pull } } } }))
    }

    fn steps(&self) -> impl Iterator<Item = (UpdateStep, Value)> {
        [
            (UpdateStep::Set, self.set_update()),
            (UpdateStep::Append, self.push_update()),
            (UpdateStep::Remove, self.pull_update()),
        ]
        .into_iter()
        .filter_map(|(step, update)| Some((step, update?)))
    }
}

/// Build the plan for `payload`.
///
/// Non-empty scalar fields go to `$set`; added items get fresh ids; removed
/// item ids are parsed up front so a malformed id fails before any write.
pub fn reconcile<P: PartialUpdate>(mut payload: P) -> Result<UpdatePlan> {
    let mut plan = UpdatePlan {
        list_field: P::LIST_FIELD,
        ..UpdatePlan::default()
    };

    for r in payload.removed() {
        plan.pull.push(parse_id(&r.id, "list item id")?);
    }

    for field in P::scalar_fields() {
        if !(field.is_empty)(&payload) {
            plan.set.insert(field.name.to_string(), (field.value)(&payload)?);
        }
    }

    for mut item in payload.take_added() {
        let id = ObjectId::new();
        item.assign_id(id);
        plan.push.push(serde_json::to_value(&item)?);
        plan.pushed_ids.push(id);
    }

    Ok(plan)
}

/// What an applied plan changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub fields_set: Vec<String>,
    pub items_added: Vec<ObjectId>,
    /// Ids asked to be removed. Ids that matched no list entry are included.
    pub items_removed: Vec<ObjectId>,
    pub steps: Vec<UpdateStep>,
}

/// Run `plan` against the document `id` in `col`: `$set`, then `$push`, then
/// `$pull`, each only when it has work.
///
/// A failure in the first executed step is returned as the store error
/// itself, and a zero match there as `NotFound`. A later failure, including
/// the document vanishing between steps, is wrapped in [`Error::UpdateStep`]
/// naming the steps that already took effect.
pub fn apply<S: DocumentStore + ?Sized>(
    col: &Collection<'_, S>,
    id: ObjectId,
    plan: &UpdatePlan,
    entity: &str,
) -> Result<UpdateReport> {
    let filter = json!({ "_id": id });
    let mut completed: Vec<UpdateStep> = Vec::new();

    for (step, update) in plan.steps() {
        let res = col.update_one(&filter, &update).map_err(|source| {
            if completed.is_empty() {
                Error::Store(source)
            } else {
                Error::UpdateStep {
                    step,
                    completed: completed.clone(),
                    source,
                }
            }
        })?;
        if res.matched == 0 {
            if completed.is_empty() {
                return Err(Error::NotFound(format!("{entity} not found")));
            }
            return Err(Error::UpdateStep {
                step,
                completed,
                source: StoreError::NoMatch,
            });
        }
        tracing::info!(ns = %col.namespace(), %id, %step, "applied update step");
        completed.push(step);
    }

    Ok(UpdateReport {
        fields_set: plan.set.keys().cloned().collect(),
        items_added: plan.pushed_ids.clone(),
        items_removed: plan.pull.clone(),
        steps: completed,
    })
}
