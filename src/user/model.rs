use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object_id::ObjectId;
use crate::reference::Reference;

pub const USER_TYPES: &str = "userType";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddUserInput {
    pub username: String,
    /// Plain text; only the hash is stored.
    pub password: String,
    #[serde(rename = "userTypeID")]
    pub user_type_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserDocument {
    pub username: String,
    pub password: String,
    #[serde(rename = "userTypeID")]
    pub user_type_id: Reference,
    pub created_at: DateTime<Utc>,
    pub status: i64,
}

/// Row of the user list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSummary {
    #[serde(rename = "userID")]
    pub user_id: ObjectId,
    pub username: String,
    /// Name of the user's type, or empty when it no longer exists.
    #[serde(rename = "userType")]
    pub user_type: String,
    /// Creation time.
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserDetail {
    #[serde(rename = "userID")]
    pub user_id: ObjectId,
    pub username: String,
    /// Hex id of the user's type, or empty.
    #[serde(rename = "userType")]
    pub user_type: String,
}
