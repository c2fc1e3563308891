//! Stable user identity and per-conversation ids.

mod ids;
mod store;

pub use ids::{new_session_id, new_user_id, MessageIdGenerator};
pub use store::{FileStore, KeyValueStore, MemoryStore};

use crate::error::ClientError;

pub const USER_ID_KEY: &str = "user_id";

/// Return the stored user id, generating and persisting one on first use.
///
/// # Errors
///
/// Propagates store failures.
pub fn ensure_user_id<S>(store: &S) -> Result<String, ClientError>
where
    S: KeyValueStore + ?Sized,
{
    if let Some(existing) = store.get(USER_ID_KEY)?.filter(|id| !id.trim().is_empty()) {
        return Ok(existing);
    }
    let user_id = new_user_id();
    store.set(USER_ID_KEY, &user_id)?;
    tracing::info!(user_id = %user_id, "generated new user id");
    Ok(user_id)
}
