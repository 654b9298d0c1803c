use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::KeyPrefixOrder;
use crate::Properties;
use crate::Result;
use crate::StoreConnector;

/// Source of the properties served for one application / profile / label.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EnvironmentRepository: Send + Sync + 'static {
    async fn fetch(
        &self,
        application: &str,
        profile: &str,
        label: &str,
    ) -> Result<Properties>;
}

/// Reads the keys under the search prefix the configured order builds.
#[derive(Debug)]
pub struct StoreEnvironmentRepository {
    connector: Arc<StoreConnector>,
    order: KeyPrefixOrder,
}

impl StoreEnvironmentRepository {
    pub fn new(
        connector: Arc<StoreConnector>,
        order: KeyPrefixOrder,
    ) -> Self {
        Self { connector, order }
    }
}

#[async_trait]
impl EnvironmentRepository for StoreEnvironmentRepository {
    async fn fetch(
        &self,
        application: &str,
        profile: &str,
        label: &str,
    ) -> Result<Properties> {
        let prefix = self.order.build_search_prefix(application, profile, label);
        debug!(application, profile, label, prefix, "fetching environment");
        self.connector.get_all(&prefix).await
    }
}
