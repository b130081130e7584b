use serde::Serialize;
use uuid::Uuid;

use crate::authz::ResourceType;

/// Trait for entities whose mutations are recorded in the audit log.
/// Implement this on a model to make it usable with [`super::record`].
pub trait Auditable: Serialize + Send + Sync {
    /// The resource type recorded as `resource_type` on each entry
    fn resource_type() -> ResourceType;

    /// The record's primary key
    fn resource_id(&self) -> Uuid;

    /// Human readable representation stored with each entry
    fn snapshot_repr(&self) -> String;

    /// Fields that never contribute to `field_changes`
    fn excluded_fields() -> &'static [&'static str] {
        &["created_at", "updated_at"]
    }
}
