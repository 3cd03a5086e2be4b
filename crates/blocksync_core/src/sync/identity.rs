//! Replica identity and remote partition keys.

use crate::repo::meta_repo::{MetaRepository, CLIENT_ID_KEY};
use crate::repo::RepoResult;
use log::info;
use uuid::Uuid;

/// Partition used when no user is signed in.
pub const ANONYMOUS_PARTITION: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated(String),
    Anonymous,
}

impl Identity {
    /// Remote partition this identity reads and writes.
    ///
    /// A blank authenticated id falls back to the anonymous partition.
    pub fn partition_key(&self) -> String {
        match self {
            Self::Authenticated(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => ANONYMOUS_PARTITION.to_string(),
        }
    }
}

/// Returns the persisted replica id, generating and storing one on first use.
pub fn load_or_create_client_id(repo: &impl MetaRepository) -> RepoResult<String> {
    if let Some(existing) = repo.get(CLIENT_ID_KEY)? {
        if !existing.trim().is_empty() {
            return Ok(existing);
        }
    }
    let client_id = Uuid::new_v4().to_string();
    repo.set(CLIENT_ID_KEY, &client_id)?;
    info!("event=client_id_created module=sync status=ok");
    Ok(client_id)
}
