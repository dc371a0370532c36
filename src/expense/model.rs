use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::object_id::ObjectId;
use crate::reconcile::{IsEmpty, ItemRef, ListItem, PartialUpdate, ScalarField};
use crate::reference::Reference;

pub const WORKS: &str = "works";
pub const CUSTOMERS: &str = "customers";

/// One line of an expense.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpenseItem {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    pub amount: f64,
    pub quantity: f64,
}

impl ExpenseItem {
    pub fn new(title: impl Into<String>, amount: f64, quantity: f64) -> Self {
        Self {
            id: None,
            title: title.into(),
            amount,
            quantity,
        }
    }
}

impl ListItem for ExpenseItem {
    fn assign_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }
}

/// A new expense. `workRef` and `customerRef` are hex ids, or empty for none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddExpenseInput {
    pub title: String,
    pub date: Option<DateTime<Utc>>,
    pub detail: String,
    pub lists: Vec<ExpenseItem>,
    pub current_vat: f64,
    pub work_ref: String,
    pub customer_ref: String,
}

/// Stored form of an expense.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExpenseDocument {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub detail: String,
    pub lists: Vec<ExpenseItem>,
    pub current_vat: f64,
    pub status: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_ref: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<Reference>,
}

/// Sparse update of an expense. Empty fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateExpenseInput {
    pub title: String,
    pub date: Option<DateTime<Utc>>,
    pub detail: String,
    pub current_vat: f64,
    pub work_ref: String,
    pub customer_ref: String,
    pub add_lists: Vec<ExpenseItem>,
    pub remove_lists: Vec<ItemRef>,
}

static UPDATE_FIELDS: &[ScalarField<UpdateExpenseInput>] = &[
    ScalarField {
        name: "title",
        is_empty: |u| u.title.is_empty_value(),
        value: |u| Ok(json!(u.title)),
    },
    ScalarField {
        name: "date",
        is_empty: |u| u.date.is_empty_value(),
        value: |u| Ok(json!(u.date)),
    },
    ScalarField {
        name: "detail",
        is_empty: |u| u.detail.is_empty_value(),
        value: |u| Ok(json!(u.detail)),
    },
    ScalarField {
        name: "currentVat",
        is_empty: |u| u.current_vat.is_empty_value(),
        value: |u| Ok(json!(u.current_vat)),
    },
    ScalarField {
        name: "workRef",
        is_empty: |u| u.work_ref.is_empty_value(),
        value: |u| Ok(json!(Reference::parse(WORKS, &u.work_ref, "workRef")?)),
    },
    ScalarField {
        name: "customerRef",
        is_empty: |u| u.customer_ref.is_empty_value(),
        value: |u| Ok(json!(Reference::parse(CUSTOMERS, &u.customer_ref, "customerRef")?)),
    },
];

impl PartialUpdate for UpdateExpenseInput {
    type Item = ExpenseItem;
    const LIST_FIELD: &'static str = "lists";

    fn scalar_fields() -> &'static [ScalarField<Self>] {
        UPDATE_FIELDS
    }

    fn take_added(&mut self) -> Vec<ExpenseItem> {
        std::mem::take(&mut self.add_lists)
    }

    fn removed(&self) -> &[ItemRef] {
        &self.remove_lists
    }
}

/// Row of an expense list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpenseSummary {
    #[serde(rename = "expenseID")]
    pub expense_id: ObjectId,
    pub title: String,
    pub date: Option<DateTime<Utc>>,
    pub lists: Vec<ExpenseItem>,
    pub current_vat: f64,
    /// Title of the referenced work, or empty.
    pub work_ref: String,
    /// Name of the referenced customer, or empty.
    pub customer_ref: String,
}

/// A single expense with its free-text detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpenseDetail {
    #[serde(rename = "expenseID")]
    pub expense_id: ObjectId,
    pub title: String,
    pub date: Option<DateTime<Utc>>,
    pub detail: String,
    pub lists: Vec<ExpenseItem>,
    pub current_vat: f64,
    pub work_ref: String,
    pub customer_ref: String,
}
