//! Permission checks against the permission store.

use tracing::debug;

use crate::data::{self, PermissionStore, retry_read};

/// Whether `user_id` holds `code`. Fails closed: no grant means `false`.
///
/// # Errors
/// Returns `StoreUnavailable` after bounded retries, or an internal error.
pub async fn user_has(
    store: &dyn PermissionStore,
    user_id: i64,
    code: &str,
) -> data::Result<bool> {
    let permissions = retry_read(|| store.get_all_for_user(user_id)).await?;
    let granted = permissions.includes(code);
    debug!(user_id, code, granted, "permission check");
    Ok(granted)
}
