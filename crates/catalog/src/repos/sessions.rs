//! Session repository trait.

use crate::error::CatalogResult;
use alyx_core::Session;
use async_trait::async_trait;
use uuid::Uuid;

/// Sessions own datasets and supply the path components.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn create_session(&self, session: &Session) -> CatalogResult<()>;

    async fn get_session(&self, session_id: Uuid) -> CatalogResult<Option<Session>>;

    /// Fetch several sessions. Unknown ids are skipped.
    async fn get_sessions(&self, session_ids: &[Uuid]) -> CatalogResult<Vec<Session>>;

    /// Find a session by its path components.
    async fn find_session(
        &self,
        lab: &str,
        subject: &str,
        start_date: time::Date,
        number: u16,
    ) -> CatalogResult<Option<Session>>;
}
