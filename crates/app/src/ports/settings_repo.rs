//! Settings repository port.

use std::future::Future;

use actionq_domain::error::QueueError;
use actionq_domain::settings::QueueSetting;
use actionq_domain::time::Timestamp;

/// Repository for [`QueueSetting`] rows.
pub trait SettingsRepository {
    fn get_settings(&self) -> impl Future<Output = Result<Vec<QueueSetting>, QueueError>> + Send;

    fn get_setting(
        &self,
        key: String,
    ) -> impl Future<Output = Result<Option<QueueSetting>, QueueError>> + Send;

    /// Store `value` unless the key is unknown or read-only (`None`).
    fn set_setting(
        &self,
        key: String,
        value: String,
        at: Timestamp,
    ) -> impl Future<Output = Result<Option<QueueSetting>, QueueError>> + Send;
}
