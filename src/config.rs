use std::env;

use crate::builder::StageOrder;
use crate::error::{Error, Result};
use crate::object_id::ObjectId;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database holding the record collections.
    pub database: String,
    /// User type that may never be created through [`crate::UserService::add_user`].
    pub super_admin_type_id: Option<ObjectId>,
    pub stage_order: StageOrder,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "PBD".to_string(),
            super_admin_type_id: None,
            stage_order: StageOrder::default(),
        }
    }
}

impl Config {
    /// Read configuration from the environment:
    ///
    /// - `RECORDPIPE_DATABASE` (default `PBD`)
    /// - `RECORDPIPE_SUPER_ADMIN_TYPE_ID`, a 24-digit hex id
    /// - `RECORDPIPE_STAGE_ORDER`, `legacy` to page before searching
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(db) = get("RECORDPIPE_DATABASE").filter(|s| !s.trim().is_empty()) {
            config.database = db.trim().to_string();
        }

        if let Some(raw) = get("RECORDPIPE_SUPER_ADMIN_TYPE_ID").filter(|s| !s.trim().is_empty()) {
            let id = ObjectId::parse_str(raw.trim()).map_err(|_| {
                Error::Validation(format!("invalid RECORDPIPE_SUPER_ADMIN_TYPE_ID: {raw}"))
            })?;
            config.super_admin_type_id = Some(id);
        }

        if let Some(order) = get("RECORDPIPE_STAGE_ORDER") {
            config.stage_order = match order.trim() {
                "legacy" => StageOrder::PageThenFilter,
                "" | "default" => StageOrder::FilterThenPage,
                other => {
                    return Err(Error::Validation(format!(
                        "invalid RECORDPIPE_STAGE_ORDER: {other}"
                    )));
                }
            };
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database, "PBD");
        assert!(config.super_admin_type_id.is_none());
        assert_eq!(config.stage_order, StageOrder::FilterThenPage);
    }

    #[test]
    fn reads_all_keys() {
        let config = Config::from_lookup(lookup(&[
            ("RECORDPIPE_DATABASE", "books"),
            ("RECORDPIPE_SUPER_ADMIN_TYPE_ID", "64b7f0c2a1b2c3d4e5f60718"),
            ("RECORDPIPE_STAGE_ORDER", "legacy"),
        ]))
        .unwrap();
        assert_eq!(config.database, "books");
        assert_eq!(
            config.super_admin_type_id.unwrap().to_hex(),
            "64b7f0c2a1b2c3d4e5f60718"
        );
        assert_eq!(config.stage_order, StageOrder::PageThenFilter);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("RECORDPIPE_SUPER_ADMIN_TYPE_ID", "admin")])),
            Err(Error::Validation(_))
        ));
        assert!(Config::from_lookup(lookup(&[("RECORDPIPE_STAGE_ORDER", "sideways")])).is_err());
    }
}
