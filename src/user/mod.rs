//! User accounts.

mod model;
mod service;

pub use model::{AddUserInput, USER_TYPES, UserDetail, UserSummary};
pub use service::{USER_DETAIL, USER_LIST, USERS, UserService};
