//! Expense records and their line items.

mod model;
mod service;

pub use model::{
    AddExpenseInput, CUSTOMERS, ExpenseDetail, ExpenseItem, ExpenseSummary, UpdateExpenseInput, WORKS,
};
pub use service::{EXPENSE_DETAIL, EXPENSE_LIST, EXPENSE_SEARCH_FIELDS, EXPENSES, ExpenseService};
