pub mod builder;
pub mod config;
pub mod error;
pub mod expense;
pub mod mapper;
pub mod object_id;
pub mod password;
pub mod pipeline;
pub mod query;
pub mod reconcile;
pub mod reference;
pub mod search;
pub mod store;
pub mod update;
pub mod user;
pub mod value;

pub use builder::{PipelineBuilder, QueryParams, StageOrder};
pub use config::Config;
pub use error::{Error, ErrorKind, Result, StoreError, StoreResult, UpdateStep};
pub use expense::ExpenseService;
pub use object_id::ObjectId;
pub use reconcile::UpdateReport;
pub use reference::Reference;
pub use search::SearchPipeline;
pub use store::{DocumentStore, MemoryStore, Namespace, UpdateResult};
pub use user::UserService;
