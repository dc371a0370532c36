use std::sync::Arc;

use crate::builder::{EntityView, PipelineBuilder, Projected, QueryParams, ReferenceJoin, parse_id};
use crate::config::Config;
use crate::error::Result;
use crate::mapper::{map_count, map_list, map_one};
use crate::object_id::ObjectId;
use crate::reconcile::{ListItem, UpdateReport, apply, reconcile};
use crate::reference::Reference;
use crate::search::SearchPipeline;
use crate::store::{Collection, Database, DocumentStore};

use super::model::{
    AddExpenseInput, CUSTOMERS, ExpenseDetail, ExpenseDocument, ExpenseSummary, UpdateExpenseInput,
    WORKS,
};

pub const EXPENSES: &str = "expenses";

const EXPENSE_JOINS: &[ReferenceJoin] = &[
    ReferenceJoin {
        field: "workRef",
        from: WORKS,
        as_field: "workRef",
        display: "title",
        output: "workRef",
    },
    ReferenceJoin {
        field: "customerRef",
        from: CUSTOMERS,
        as_field: "customerRef",
        display: "name",
        output: "customerRef",
    },
];

pub const EXPENSE_LIST: EntityView = EntityView {
    id_label: "expenseID",
    joins: EXPENSE_JOINS,
    fields: &[
        ("expenseID", Projected::Path("_id")),
        ("title", Projected::Include),
        ("date", Projected::Date("date")),
        ("lists", Projected::Include),
        ("currentVat", Projected::Include),
    ],
};

pub const EXPENSE_DETAIL: EntityView = EntityView {
    id_label: "expenseID",
    joins: EXPENSE_JOINS,
    fields: &[
        ("expenseID", Projected::Path("_id")),
        ("title", Projected::Include),
        ("date", Projected::Date("date")),
        ("detail", Projected::Include),
        ("lists", Projected::Include),
        ("currentVat", Projected::Include),
    ],
};

/// Output fields a free-text expense search looks at.
pub const EXPENSE_SEARCH_FIELDS: &[&str] = &["title", "workRef", "customerRef"];

/// Expense records: paged listing, lookup, creation, sparse update and count.
pub struct ExpenseService<S: ?Sized> {
    store: Arc<S>,
    config: Config,
}

impl<S: DocumentStore + ?Sized> ExpenseService<S> {
    pub fn new(store: Arc<S>, config: Config) -> Self {
        Self { store, config }
    }

    fn collection(&self) -> Collection<'_, S> {
        Database::new(&*self.store, &self.config.database).collection(EXPENSES)
    }

    /// Search stages for `term` over the list output fields.
    pub fn search(term: &str) -> SearchPipeline {
        SearchPipeline::compile(term, EXPENSE_SEARCH_FIELDS)
    }

    pub fn get_expenses(
        &self,
        params: &QueryParams,
        search: Option<&SearchPipeline>,
    ) -> Result<Vec<ExpenseSummary>> {
        let pipeline = PipelineBuilder::new(&EXPENSE_LIST, self.config.stage_order).list(params, search);
        let rows = self.collection().aggregate(&pipeline)?;
        let refs: Vec<_> = EXPENSE_LIST.reference_outputs().collect();
        map_list(rows, &refs)
    }

    pub fn get_expense_by_id(&self, expense_id: &str) -> Result<ExpenseDetail> {
        let pipeline = PipelineBuilder::new(&EXPENSE_DETAIL, self.config.stage_order).by_id(expense_id)?;
        let rows = self.collection().aggregate(&pipeline)?;
        let refs: Vec<_> = EXPENSE_DETAIL.reference_outputs().collect();
        map_one(rows, &refs, "expense")
    }

    /// Insert an active expense. Every list item gets a fresh id; references
    /// are validated before anything is written.
    pub fn add_expense(&self, input: AddExpenseInput) -> Result<ObjectId> {
        let work_ref = Reference::parse(WORKS, &input.work_ref, "workRef")?;
        let customer_ref = Reference::parse(CUSTOMERS, &input.customer_ref, "customerRef")?;

        let mut lists = input.lists;
        for item in &mut lists {
            item.assign_id(ObjectId::new());
        }

        let doc = ExpenseDocument {
            title: input.title,
            date: input.date,
            detail: input.detail,
            lists,
            current_vat: input.current_vat,
            status: crate::builder::ACTIVE_STATUS,
            work_ref,
            customer_ref,
        };
        let id = self.collection().insert_one(serde_json::to_value(&doc)?)?;
        tracing::info!(%id, items = doc.lists.len(), "added expense");
        Ok(id)
    }

    /// Apply the non-empty fields of `input`, then append and remove list
    /// items. See [`apply`] for the failure semantics of the three steps.
    pub fn update_expense(&self, expense_id: &str, input: UpdateExpenseInput) -> Result<UpdateReport> {
        let id = parse_id(expense_id, "expenseID")?;
        let plan = reconcile(input)?;
        apply(&self.collection(), id, &plan, "expense")
    }

    pub fn count_expenses(&self, search: Option<&SearchPipeline>) -> Result<u64> {
        let pipeline = PipelineBuilder::new(&EXPENSE_LIST, self.config.stage_order).count(search);
        let rows = self.collection().aggregate(&pipeline)?;
        map_count(&rows)
    }
}
