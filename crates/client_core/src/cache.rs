use anyhow::Result;
use async_trait::async_trait;
use shared::domain::Session;
use storage::Storage;
use tokio::sync::Mutex;

/// Durable mirror of the current session, used for instant paint on start-up.
///
/// Writers always replace or clear the whole slot. Readers see an unreadable
/// slot as absent.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn load(&self) -> Result<Option<Session>>;
    async fn store(&self, session: &Session) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl SessionCache for Storage {
    async fn load(&self) -> Result<Option<Session>> {
        self.load_session().await
    }

    async fn store(&self, session: &Session) -> Result<()> {
        self.store_session(session).await
    }

    async fn clear(&self) -> Result<()> {
        self.clear_session().await
    }
}

/// Process-local cache for tests and embedders without a writable disk.
#[derive(Default)]
pub struct MemorySessionCache {
    slot: Mutex<Option<Session>>,
}

impl MemorySessionCache {
    pub fn with_session(session: Session) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn load(&self) -> Result<Option<Session>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn store(&self, session: &Session) -> Result<()> {
        *self.slot.lock().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}
