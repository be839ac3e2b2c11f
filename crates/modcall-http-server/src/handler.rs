//! The listener's single extension point

use async_trait::async_trait;
use std::sync::Arc;

use crate::session::Session;

/// Processes one session.
///
/// Returns once the response has been written and closed; the listener sends
/// whatever the session holds at that point.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn handle(&self, session: &mut Session);
}

#[async_trait]
impl<H: SessionHandler + ?Sized> SessionHandler for Arc<H> {
    async fn handle(&self, session: &mut Session) {
        (**self).handle(session).await
    }
}
