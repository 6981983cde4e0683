use authz::{Collection, Policy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::ResourceConfig;
use crate::error::{ApiError, ApiResult};

/// A record collection reachable over HTTP.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Record type and grant-table resource name.
    pub name: String,
    pub collection: Collection,
    pub policy: Policy,
}

/// Resources keyed by URL segment.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    by_path: HashMap<String, Arc<Resource>>,
}

impl ResourceRegistry {
    pub fn from_config(configs: &[ResourceConfig]) -> ApiResult<Self> {
        let mut by_path = HashMap::new();
        for config in configs {
            let mut collection = Collection::new(config.table());
            if let Some(owner) = &config.owner_column {
                collection = collection.with_owner_column(owner.clone());
            }
            let resource = Resource {
                name: config.name.clone(),
                collection,
                policy: config.policy.clone(),
            };
            if by_path
                .insert(config.path().to_string(), Arc::new(resource))
                .is_some()
            {
                return Err(ApiError::Configuration(format!(
                    "Duplicate resource path: {}",
                    config.path()
                )));
            }
        }
        Ok(Self { by_path })
    }

    pub fn get(&self, path: &str) -> Option<Arc<Resource>> {
        self.by_path.get(path).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Resource>)> {
        self.by_path.iter().map(|(path, resource)| (path.as_str(), resource))
    }

    /// Creates every backing table that does not exist yet.
    pub async fn ensure_tables(&self, db: &database::Database) -> ApiResult<()> {
        for (path, resource) in self.iter() {
            database::records::RecordStore::new(db, &resource.collection)
                .ensure_table()
                .await?;
            info!("Resource /records/{} -> {}", path, resource.collection.table);
        }
        Ok(())
    }
}
