use std::sync::Arc;

use chrono::Utc;

use crate::builder::{ACTIVE_STATUS, EntityView, PipelineBuilder, Projected, QueryParams, ReferenceJoin};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::mapper::{map_count, map_list, map_one};
use crate::object_id::ObjectId;
use crate::password::hash_password;
use crate::reference::Reference;
use crate::store::{Collection, Database, DocumentStore};

use super::model::{AddUserInput, USER_TYPES, UserDetail, UserDocument, UserSummary};

pub const USERS: &str = "users";

pub const USER_LIST: EntityView = EntityView {
    id_label: "userID",
    joins: &[ReferenceJoin {
        field: "userTypeID",
        from: USER_TYPES,
        as_field: "userType",
        display: "name",
        output: "userType",
    }],
    fields: &[
        ("userID", Projected::Path("_id")),
        ("username", Projected::Include),
        ("date", Projected::Path("createdAt")),
    ],
};

pub const USER_DETAIL: EntityView = EntityView {
    id_label: "userID",
    joins: &[ReferenceJoin {
        field: "userTypeID",
        from: USER_TYPES,
        as_field: "userType",
        display: "_id",
        output: "userType",
    }],
    fields: &[
        ("userID", Projected::Path("_id")),
        ("username", Projected::Include),
    ],
};

pub struct UserService<S: ?Sized> {
    store: Arc<S>,
    config: Config,
}

impl<S: DocumentStore + ?Sized> UserService<S> {
    pub fn new(store: Arc<S>, config: Config) -> Self {
        Self { store, config }
    }

    fn collection(&self) -> Collection<'_, S> {
        Database::new(&*self.store, &self.config.database).collection(USERS)
    }

    fn is_super_admin(&self, raw_type_id: &str) -> bool {
        match (self.config.super_admin_type_id, ObjectId::parse_str(raw_type_id)) {
            (Some(admin), Ok(id)) => admin == id,
            _ => false,
        }
    }

    pub fn get_users(&self, params: &QueryParams) -> Result<Vec<UserSummary>> {
        let pipeline = PipelineBuilder::new(&USER_LIST, self.config.stage_order).list(params, None);
        let rows = self.collection().aggregate(&pipeline)?;
        let refs: Vec<_> = USER_LIST.reference_outputs().collect();
        map_list(rows, &refs)
    }

    pub fn get_user_by_id(&self, user_id: &str) -> Result<UserDetail> {
        let pipeline = PipelineBuilder::new(&USER_DETAIL, self.config.stage_order).by_id(user_id)?;
        let rows = self.collection().aggregate(&pipeline)?;
        let refs: Vec<_> = USER_DETAIL.reference_outputs().collect();
        map_one(rows, &refs, "user")
    }

    /// Create an active user with a hashed password.
    ///
    /// The configured super-admin type is refused before the store is
    /// touched.
    pub fn add_user(&self, input: AddUserInput) -> Result<ObjectId> {
        if self.is_super_admin(&input.user_type_id) {
            tracing::warn!(username = %input.username, "refused to add super admin");
            return Err(Error::Validation("cannot add super admin".to_string()));
        }
        let user_type = Reference::parse(USER_TYPES, &input.user_type_id, "userTypeID")?
            .ok_or_else(|| Error::Validation("invalid userTypeID".to_string()))?;

        let doc = UserDocument {
            password: hash_password(&input.password)?,
            username: input.username,
            user_type_id: user_type,
            created_at: Utc::now(),
            status: ACTIVE_STATUS,
        };
        let id = self.collection().insert_one(serde_json::to_value(&doc)?)?;
        tracing::info!(%id, username = %doc.username, "added user");
        Ok(id)
    }

    pub fn count_users(&self) -> Result<u64> {
        let pipeline = PipelineBuilder::new(&USER_LIST, self.config.stage_order).count(None);
        let rows = self.collection().aggregate(&pipeline)?;
        map_count(&rows)
    }
}
