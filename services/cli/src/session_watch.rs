//! services/cli/src/session_watch.rs
//!
//! Background task that drains the auth provider's session-change stream and
//! feeds every event through the shared access gate's reducer. The task is
//! released via its cancellation token when the gated surface is torn down,
//! so no handler ever runs against a disposed gate.

use std::sync::Arc;

use futures::StreamExt;
use studyshelf_core::gate::{AccessGate, AccessState};
use studyshelf_core::ports::SessionEvents;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Applies pushed session changes to `gate` until `cancel` fires or the
/// stream ends. When a sign-out settles the gate into `Unauthenticated`,
/// `on_signed_out` is cancelled so in-flight gated work (such as a running
/// upload batch) stops promptly.
pub async fn session_watch(
    gate: Arc<Mutex<AccessGate>>,
    mut events: SessionEvents,
    cancel: CancellationToken,
    on_signed_out: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.next() => {
                let Some(event) = event else { break };
                let mut gate = gate.lock().await;
                if gate.apply(event) == &AccessState::Unauthenticated {
                    if gate.take_redirect() {
                        info!("session ended, leaving the admin surface");
                    }
                    on_signed_out.cancel();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use studyshelf_core::domain::{Session, SessionEvent};
    use studyshelf_core::ports::{PortResult, RoleStore, SessionProvider};
    use studyshelf_core::{RoleRecord, UserRole};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct NoSessions;

    #[async_trait]
    impl SessionProvider for NoSessions {
        async fn current_session(&self) -> PortResult<Option<Session>> {
            Ok(None)
        }
        fn subscribe(&self) -> SessionEvents {
            Box::pin(futures::stream::empty())
        }
        async fn sign_out(&self) -> PortResult<()> {
            Ok(())
        }
    }

    struct NoRoles;

    #[async_trait]
    impl RoleStore for NoRoles {
        async fn find_role(&self, _user_id: Uuid) -> PortResult<Option<RoleRecord>> {
            Ok(None)
        }
        async fn insert_role(&self, _record: &RoleRecord) -> PortResult<()> {
            Ok(())
        }
        async fn update_role(&self, _user_id: Uuid, _role: UserRole) -> PortResult<()> {
            Ok(())
        }
        async fn set_blocked(&self, _user_id: Uuid, _blocked: bool) -> PortResult<()> {
            Ok(())
        }
        async fn list_roles(&self) -> PortResult<Vec<RoleRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn sign_out_event_settles_the_gate_and_signals_gated_work() {
        let gate = Arc::new(Mutex::new(AccessGate::new(
            Arc::new(NoSessions),
            Arc::new(NoRoles),
            "owner@college.edu",
        )));
        let session = Session {
            user_id: Uuid::new_v4(),
            email: "admin@college.edu".to_string(),
            access_token: "t".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        let events: SessionEvents = Box::pin(futures::stream::iter(vec![
            SessionEvent::Refreshed(session),
            SessionEvent::SignedOut,
        ]));

        let on_signed_out = CancellationToken::new();
        session_watch(
            gate.clone(),
            events,
            CancellationToken::new(),
            on_signed_out.clone(),
        )
        .await;

        assert_eq!(gate.lock().await.state(), &AccessState::Unauthenticated);
        assert!(on_signed_out.is_cancelled());
    }

    #[tokio::test]
    async fn teardown_token_releases_the_watcher() {
        let gate = Arc::new(Mutex::new(AccessGate::new(
            Arc::new(NoSessions),
            Arc::new(NoRoles),
            "owner@college.edu",
        )));
        let events: SessionEvents = Box::pin(futures::stream::pending());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session_watch(
            gate,
            events,
            cancel.clone(),
            CancellationToken::new(),
        ));

        cancel.cancel();
        handle.await.unwrap();
    }
}
