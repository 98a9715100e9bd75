//! Concrete implementations of the core ports against the hosted backend's
//! REST surface: GoTrue for sessions, PostgREST for rows, Storage for blobs.

pub mod auth;
pub mod rows;
pub mod storage;

pub use auth::SupabaseAuth;
pub use rows::SupabaseRows;
pub use storage::SupabaseStorage;

use reqwest::{Client, Response, StatusCode, Url};
use studyshelf_core::ports::{PortError, PortResult};

/// Shared HTTP plumbing: one client, the backend base URL, and the
/// anonymous API key every request carries.
#[derive(Clone)]
pub struct Backend {
    pub client: Client,
    pub base: Url,
    pub anon_key: String,
}

impl Backend {
    pub fn new(client: Client, base: Url, anon_key: String) -> Self {
        Self { client, base, anon_key }
    }

    /// Joins a path onto the base URL. The base is validated at config load,
    /// so a join failure is a programming error surfaced as `Unexpected`.
    pub fn endpoint(&self, path: &str) -> PortResult<Url> {
        self.base
            .join(path)
            .map_err(|e| PortError::Unexpected(format!("bad endpoint {path}: {e}")))
    }
}

/// Maps a non-success response to the port error taxonomy, consuming the
/// body for the message.
pub(crate) async fn check(res: Response) -> PortResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PortError::Unauthorized),
        StatusCode::NOT_FOUND => Err(PortError::NotFound(body)),
        _ => Err(PortError::Unexpected(format!("HTTP {status}: {body}"))),
    }
}
