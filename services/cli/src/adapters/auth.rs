//! services/cli/src/adapters/auth.rs
//!
//! Implementation of the `SessionProvider` port against the hosted auth
//! service (GoTrue). Sessions are cached on disk between invocations and
//! refreshed with the stored refresh token when they near expiry.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use studyshelf_core::domain::{Session, SessionEvent};
use studyshelf_core::ports::{PortError, PortResult, SessionEvents, SessionProvider};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{check, Backend};
use crate::session_cache::SessionCache;

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECONDS: i64 = 30;

/// An adapter that implements `SessionProvider` using the backend's
/// password-grant token endpoint.
pub struct SupabaseAuth {
    backend: Backend,
    cache: SessionCache,
    events: broadcast::Sender<SessionEvent>,
}

//=========================================================================================
// "Impure" Wire Structs
//=========================================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    /// Lifetime of the access token, in seconds.
    expires_in: i64,
    user: TokenUser,
}

#[derive(Deserialize)]
struct TokenUser {
    id: Uuid,
    email: Option<String>,
}

impl TokenResponse {
    fn to_domain(self) -> Session {
        Session {
            user_id: self.user.id,
            email: self.user.email.unwrap_or_default(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
        }
    }
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

//=========================================================================================
// `SessionProvider` Trait Implementation
//=========================================================================================

impl SupabaseAuth {
    pub fn new(backend: Backend, cache: SessionCache) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { backend, cache, events }
    }

    /// Signs in with the password grant, caches the session, and notifies
    /// subscribers.
    pub async fn sign_in(&self, email: &str, password: &str) -> PortResult<Session> {
        let endpoint = self.backend.endpoint("auth/v1/token")?;
        let res = self
            .backend
            .client
            .post(endpoint)
            .query(&[("grant_type", "password")])
            .header("apikey", &self.backend.anon_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let res = check(res).await?;

        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let session = token.to_domain();

        self.cache.store(&session)?;
        let _ = self.events.send(SessionEvent::SignedIn(session.clone()));
        info!(user = %session.user_id, "signed in");
        Ok(session)
    }

    async fn refresh(&self, refresh_token: &str) -> PortResult<Session> {
        let endpoint = self.backend.endpoint("auth/v1/token")?;
        let res = self
            .backend
            .client
            .post(endpoint)
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.backend.anon_key)
            .json(&RefreshGrant { refresh_token })
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let res = check(res).await?;

        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(token.to_domain())
    }
}

#[async_trait]
impl SessionProvider for SupabaseAuth {
    /// The cached session, refreshed when close to expiry. A refresh the
    /// backend rejects means the session is gone: the cache is cleared and
    /// the caller sees signed-out.
    async fn current_session(&self) -> PortResult<Option<Session>> {
        let Some(session) = self.cache.load()? else {
            return Ok(None);
        };

        if session.expires_at > Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECONDS) {
            return Ok(Some(session));
        }

        match self.refresh(&session.refresh_token).await {
            Ok(refreshed) => {
                self.cache.store(&refreshed)?;
                let _ = self.events.send(SessionEvent::Refreshed(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(e) => {
                warn!(error = %e, "session refresh rejected, signing out");
                self.cache.clear()?;
                let _ = self.events.send(SessionEvent::SignedOut);
                Ok(None)
            }
        }
    }

    fn subscribe(&self) -> SessionEvents {
        let mut rx = self.events.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Revokes the session with the backend, then clears the local cache.
    /// A failed revocation still signs out locally.
    async fn sign_out(&self) -> PortResult<()> {
        if let Some(session) = self.cache.load()? {
            let endpoint = self.backend.endpoint("auth/v1/logout")?;
            let result = self
                .backend
                .client
                .post(endpoint)
                .header("apikey", &self.backend.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            match result {
                Ok(res) => {
                    if let Err(e) = check(res).await {
                        warn!(error = %e, "backend sign-out failed, clearing local session anyway");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "backend sign-out unreachable, clearing local session anyway");
                }
            }
        }
        self.cache.clear()?;
        let _ = self.events.send(SessionEvent::SignedOut);
        Ok(())
    }
}
