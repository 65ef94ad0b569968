//! Catalog repository port — reference data.

use std::future::Future;

use actionq_domain::catalog::Catalog;
use actionq_domain::error::QueueError;

/// Read access to action types and priorities.
pub trait CatalogRepository {
    /// Load every action type and priority.
    fn load_catalog(&self) -> impl Future<Output = Result<Catalog, QueueError>> + Send;

    /// Enable or disable an action type by name.
    ///
    /// Returns `false` when no such type exists.
    fn set_action_type_enabled(
        &self,
        name: String,
        enabled: bool,
    ) -> impl Future<Output = Result<bool, QueueError>> + Send;
}
