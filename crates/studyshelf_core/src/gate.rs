//! crates/studyshelf_core/src/gate.rs
//!
//! The access gate: resolves whether the current visitor may see the admin
//! surface, and if so with which role. The gate is a single tagged-union
//! state driven by one initial resolution plus a reducer for pushed session
//! changes, so illegal flag combinations cannot be represented.

use std::sync::Arc;

use tracing::{error, warn};

use crate::domain::{RoleRecord, SessionEvent, UserRole};
use crate::ports::{RoleStore, SessionProvider};

/// The five mutually exclusive gate states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessState {
    /// Session and role lookup in flight.
    Resolving,
    /// No active session. Terminal for this gate; redirects to login.
    Unauthenticated,
    /// Authenticated, but the role record carries the blocked flag.
    Blocked,
    /// Authenticated and awaiting approval by a super admin.
    Pending,
    /// Authenticated with admin privileges. The role is handed to the
    /// protected surface read-only so it can branch on privilege level
    /// without re-querying.
    Allowed { role: UserRole },
}

impl AccessState {
    fn from_record(record: &RoleRecord) -> Self {
        // Blocked wins over any role value.
        if record.is_blocked {
            return AccessState::Blocked;
        }
        match record.role {
            UserRole::Pending => AccessState::Pending,
            role => AccessState::Allowed { role },
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessState::Allowed { .. })
    }
}

/// Guards the admin surface.
///
/// Lifecycle: construct in `Resolving`, call [`AccessGate::resolve`] once on
/// mount, then feed every pushed [`SessionEvent`] through
/// [`AccessGate::apply`] until the surface is torn down.
pub struct AccessGate {
    sessions: Arc<dyn SessionProvider>,
    roles: Arc<dyn RoleStore>,
    owner_email: String,
    state: AccessState,
    redirected: bool,
}

impl AccessGate {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        roles: Arc<dyn RoleStore>,
        owner_email: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            roles,
            owner_email: owner_email.into(),
            state: AccessState::Resolving,
            redirected: false,
        }
    }

    pub fn state(&self) -> &AccessState {
        &self.state
    }

    /// Initial resolution: session lookup, then role lookup, then one of the
    /// four settled states. A sign-out applied while the lookup was in
    /// flight is never overwritten.
    pub async fn resolve(&mut self) -> &AccessState {
        let next = self.lookup().await;
        if self.state != AccessState::Unauthenticated {
            self.state = next;
        }
        &self.state
    }

    async fn lookup(&self) -> AccessState {
        let session = match self.sessions.current_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return AccessState::Unauthenticated,
            Err(e) => {
                warn!(error = %e, "session lookup failed, treating as signed out");
                return AccessState::Unauthenticated;
            }
        };

        let record = match self.roles.find_role(session.user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let record = RoleRecord::bootstrap(&session, &self.owner_email);
                // A failed first-login insert must not block the flow; the
                // in-memory record is authoritative for this mount.
                if let Err(e) = self.roles.insert_role(&record).await {
                    warn!(error = %e, user = %record.id, "could not persist first-login role record");
                }
                record
            }
            Err(e) => {
                // Fail closed: an unreadable role never grants access.
                error!(error = %e, user = %session.user_id, "role lookup failed, resolving to pending");
                return AccessState::Pending;
            }
        };

        AccessState::from_record(&record)
    }

    /// Reducer for pushed session changes. A sign-out transitions to
    /// `Unauthenticated` from any state, dropping whatever role was
    /// resolved; no other event re-polls anything after the initial
    /// resolution.
    pub fn apply(&mut self, event: SessionEvent) -> &AccessState {
        if let SessionEvent::SignedOut = event {
            self.state = AccessState::Unauthenticated;
        }
        &self.state
    }

    /// The one-shot navigation side effect towards the login surface.
    /// Returns `true` at most once per gate, no matter how many times
    /// `Unauthenticated` is entered.
    pub fn take_redirect(&mut self) -> bool {
        if self.state == AccessState::Unauthenticated && !self.redirected {
            self.redirected = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Session;
    use crate::ports::{PortError, PortResult, SessionEvents};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;
    use uuid::Uuid;

    const OWNER: &str = "owner@college.edu";

    fn session_for(email: &str) -> Session {
        Session {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    struct FakeSessions {
        session: Option<Session>,
        fail: bool,
    }

    #[async_trait]
    impl SessionProvider for FakeSessions {
        async fn current_session(&self) -> PortResult<Option<Session>> {
            if self.fail {
                return Err(PortError::Unexpected("provider offline".into()));
            }
            Ok(self.session.clone())
        }

        fn subscribe(&self) -> SessionEvents {
            Box::pin(futures::stream::empty())
        }

        async fn sign_out(&self) -> PortResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRoles {
        record: Option<RoleRecord>,
        fail_find: bool,
        fail_insert: bool,
        inserted: Mutex<Vec<RoleRecord>>,
    }

    #[async_trait]
    impl RoleStore for FakeRoles {
        async fn find_role(&self, _user_id: Uuid) -> PortResult<Option<RoleRecord>> {
            if self.fail_find {
                return Err(PortError::Unexpected("rows offline".into()));
            }
            Ok(self.record.clone())
        }

        async fn insert_role(&self, record: &RoleRecord) -> PortResult<()> {
            if self.fail_insert {
                return Err(PortError::Unauthorized);
            }
            self.inserted.lock().unwrap().push(record.clone());
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

    fn gate(session: Option<Session>, roles: FakeRoles) -> AccessGate {
        AccessGate::new(
            Arc::new(FakeSessions { session, fail: false }),
            Arc::new(roles),
            OWNER,
        )
    }

    #[tokio::test]
    async fn no_session_resolves_unauthenticated() {
        let mut gate = gate(None, FakeRoles::default());
        assert_eq!(gate.resolve().await, &AccessState::Unauthenticated);
        assert!(!gate.state().is_allowed());
        assert!(gate.take_redirect());
        // The navigation effect never fires twice.
        assert!(!gate.take_redirect());
    }

    #[tokio::test]
    async fn session_lookup_failure_is_treated_as_signed_out() {
        let mut gate = AccessGate::new(
            Arc::new(FakeSessions { session: None, fail: true }),
            Arc::new(FakeRoles::default()),
            OWNER,
        );
        assert_eq!(gate.resolve().await, &AccessState::Unauthenticated);
    }

    #[tokio::test]
    async fn first_login_defaults_to_pending() {
        let roles = FakeRoles::default();
        let mut gate = gate(Some(session_for("student@college.edu")), roles);
        assert_eq!(gate.resolve().await, &AccessState::Pending);
    }

    #[tokio::test]
    async fn first_login_persists_the_bootstrap_record() {
        let roles = Arc::new(FakeRoles::default());
        let session = session_for("student@college.edu");
        let mut gate = AccessGate::new(
            Arc::new(FakeSessions { session: Some(session.clone()), fail: false }),
            roles.clone(),
            OWNER,
        );
        gate.resolve().await;

        let inserted = roles.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].id, session.user_id);
        assert_eq!(inserted[0].role, UserRole::Pending);
        assert!(!inserted[0].is_blocked);
    }

    #[tokio::test]
    async fn owner_email_bootstraps_as_super_admin() {
        let mut gate = gate(Some(session_for(OWNER)), FakeRoles::default());
        assert_eq!(
            gate.resolve().await,
            &AccessState::Allowed { role: UserRole::SuperAdmin }
        );
    }

    #[tokio::test]
    async fn owner_comparison_is_case_sensitive() {
        let mut gate = gate(Some(session_for("Owner@College.edu")), FakeRoles::default());
        assert_eq!(gate.resolve().await, &AccessState::Pending);
    }

    #[tokio::test]
    async fn failed_bootstrap_insert_still_resolves_from_memory() {
        let roles = FakeRoles { fail_insert: true, ..FakeRoles::default() };
        let mut gate = gate(Some(session_for(OWNER)), roles);
        assert_eq!(
            gate.resolve().await,
            &AccessState::Allowed { role: UserRole::SuperAdmin }
        );
    }

    #[tokio::test]
    async fn blocked_flag_wins_over_any_role() {
        let session = session_for("admin@college.edu");
        let roles = FakeRoles {
            record: Some(RoleRecord {
                id: session.user_id,
                email: session.email.clone(),
                role: UserRole::SuperAdmin,
                is_blocked: true,
            }),
            ..FakeRoles::default()
        };
        let mut gate = gate(Some(session), roles);
        assert_eq!(gate.resolve().await, &AccessState::Blocked);
    }

    #[tokio::test]
    async fn existing_admin_record_is_allowed() {
        let session = session_for("admin@college.edu");
        let roles = FakeRoles {
            record: Some(RoleRecord {
                id: session.user_id,
                email: session.email.clone(),
                role: UserRole::Admin,
                is_blocked: false,
            }),
            ..FakeRoles::default()
        };
        let mut gate = gate(Some(session), roles);
        assert_eq!(
            gate.resolve().await,
            &AccessState::Allowed { role: UserRole::Admin }
        );
    }

    #[tokio::test]
    async fn role_read_failure_fails_closed_to_pending() {
        let roles = FakeRoles { fail_find: true, ..FakeRoles::default() };
        let mut gate = gate(Some(session_for(OWNER)), roles);
        assert_eq!(gate.resolve().await, &AccessState::Pending);
    }

    #[tokio::test]
    async fn sign_out_wins_from_every_state() {
        let session = session_for("admin@college.edu");
        let record = RoleRecord {
            id: session.user_id,
            email: session.email.clone(),
            role: UserRole::Admin,
            is_blocked: false,
        };

        // From Resolving, before any lookup finished.
        let mut gate = gate(Some(session.clone()), FakeRoles::default());
        gate.apply(SessionEvent::SignedOut);
        assert_eq!(gate.state(), &AccessState::Unauthenticated);
        // A resolution finishing afterwards must not override the sign-out.
        gate.resolve().await;
        assert_eq!(gate.state(), &AccessState::Unauthenticated);

        // From each settled state.
        for record in [
            None,
            Some(RoleRecord { is_blocked: true, ..record.clone() }),
            Some(RoleRecord { role: UserRole::Pending, ..record.clone() }),
            Some(record.clone()),
        ] {
            let roles = FakeRoles { record, ..FakeRoles::default() };
            let mut gate = gate_with(session.clone(), roles);
            gate.resolve().await;
            gate.apply(SessionEvent::SignedOut);
            assert_eq!(gate.state(), &AccessState::Unauthenticated);
        }
    }

    fn gate_with(session: Session, roles: FakeRoles) -> AccessGate {
        gate(Some(session), roles)
    }

    #[tokio::test]
    async fn refresh_events_do_not_change_a_settled_state() {
        let session = session_for(OWNER);
        let mut gate = gate(Some(session.clone()), FakeRoles::default());
        gate.resolve().await;
        assert!(gate.state().is_allowed());

        gate.apply(SessionEvent::Refreshed(session.clone()));
        assert!(gate.state().is_allowed());
        gate.apply(SessionEvent::SignedIn(session));
        assert!(gate.state().is_allowed());
    }
}
