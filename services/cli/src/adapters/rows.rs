//! services/cli/src/adapters/rows.rs
//!
//! Implementation of the `RoleStore` and `NoteStore` ports against the
//! hosted row store's REST surface (PostgREST). Row-level security is
//! enforced server-side; requests carry the current session's access token
//! when one exists, falling back to the anonymous key for public reads.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use studyshelf_core::domain::{
    MaterialKind, NewNote, NoteFilter, NotePatch, NoteRecord, RoleRecord, Semester, UserRole,
};
use studyshelf_core::ports::{NoteStore, PortError, PortResult, RoleStore, SessionProvider};
use uuid::Uuid;

use crate::adapters::{check, Backend};

/// An adapter speaking to the `user_roles` and `notes` tables.
pub struct SupabaseRows {
    backend: Backend,
    auth: Arc<dyn SessionProvider>,
}

//=========================================================================================
// "Impure" Wire Row Structs
//=========================================================================================

#[derive(Deserialize)]
struct RoleRow {
    id: Uuid,
    email: String,
    role: String,
    #[serde(default)]
    is_blocked: bool,
}

impl RoleRow {
    fn to_domain(self) -> PortResult<RoleRecord> {
        let role = UserRole::parse(&self.role)
            .ok_or_else(|| PortError::Unexpected(format!("unknown role '{}'", self.role)))?;
        Ok(RoleRecord {
            id: self.id,
            email: self.email,
            role,
            is_blocked: self.is_blocked,
        })
    }
}

#[derive(Serialize)]
struct NewRoleRow<'a> {
    id: Uuid,
    email: &'a str,
    role: &'a str,
    is_blocked: bool,
}

#[derive(Deserialize)]
struct NoteRow {
    id: Uuid,
    written_by: String,
    subject: String,
    semester: u8,
    exam_type: Option<String>,
    file_url: String,
    #[serde(default)]
    is_pinned: bool,
    user_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl NoteRow {
    fn to_domain(self) -> PortResult<NoteRecord> {
        let semester = Semester::new(self.semester)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        // Rows written before the tag existed have no exam_type; they are
        // plain class notes.
        let exam_type = self
            .exam_type
            .as_deref()
            .and_then(MaterialKind::parse)
            .unwrap_or_default();
        Ok(NoteRecord {
            id: self.id,
            written_by: self.written_by,
            subject: self.subject,
            semester,
            exam_type,
            file_url: self.file_url,
            is_pinned: self.is_pinned,
            user_id: self.user_id,
            created_at: self.created_at,
        })
    }
}

#[derive(Serialize)]
struct NewNoteRow<'a> {
    written_by: &'a str,
    subject: &'a str,
    semester: u8,
    exam_type: &'a str,
    file_url: &'a str,
    user_id: Uuid,
}

#[derive(Serialize)]
struct NotePatchRow<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    written_by: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    semester: Option<u8>,
}

//=========================================================================================
// Adapter Plumbing
//=========================================================================================

impl SupabaseRows {
    pub fn new(backend: Backend, auth: Arc<dyn SessionProvider>) -> Self {
        Self { backend, auth }
    }

    async fn bearer(&self) -> String {
        match self.auth.current_session().await {
            Ok(Some(session)) => session.access_token,
            _ => self.backend.anon_key.clone(),
        }
    }

    fn table(&self, name: &str) -> PortResult<reqwest::Url> {
        self.backend.endpoint(&format!("rest/v1/{name}"))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> PortResult<reqwest::Response> {
        let res = req
            .header("apikey", &self.backend.anon_key)
            .bearer_auth(self.bearer().await)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        check(res).await
    }
}

//=========================================================================================
// `RoleStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl RoleStore for SupabaseRows {
    async fn find_role(&self, user_id: Uuid) -> PortResult<Option<RoleRecord>> {
        let req = self
            .backend
            .client
            .get(self.table("user_roles")?)
            .query(&[("id", format!("eq.{user_id}")), ("select", "*".to_string())]);
        let rows: Vec<RoleRow> = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        rows.into_iter().next().map(RoleRow::to_domain).transpose()
    }

    async fn insert_role(&self, record: &RoleRecord) -> PortResult<()> {
        let row = NewRoleRow {
            id: record.id,
            email: &record.email,
            role: record.role.as_str(),
            is_blocked: record.is_blocked,
        };
        let req = self
            .backend
            .client
            .post(self.table("user_roles")?)
            .header("Prefer", "return=minimal")
            .json(&[row]);
        self.send(req).await.map(|_| ())
    }

    async fn update_role(&self, user_id: Uuid, role: UserRole) -> PortResult<()> {
        let req = self
            .backend
            .client
            .patch(self.table("user_roles")?)
            .query(&[("id", format!("eq.{user_id}"))])
            .json(&serde_json::json!({ "role": role.as_str() }));
        self.send(req).await.map(|_| ())
    }

    async fn set_blocked(&self, user_id: Uuid, blocked: bool) -> PortResult<()> {
        let req = self
            .backend
            .client
            .patch(self.table("user_roles")?)
            .query(&[("id", format!("eq.{user_id}"))])
            .json(&serde_json::json!({ "is_blocked": blocked }));
        self.send(req).await.map(|_| ())
    }

    async fn list_roles(&self) -> PortResult<Vec<RoleRecord>> {
        let req = self
            .backend
            .client
            .get(self.table("user_roles")?)
            .query(&[("select", "*"), ("order", "created_at.asc")]);
        let rows: Vec<RoleRow> = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        rows.into_iter().map(RoleRow::to_domain).collect()
    }
}

//=========================================================================================
// `NoteStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl NoteStore for SupabaseRows {
    async fn insert_note(&self, note: NewNote) -> PortResult<NoteRecord> {
        let row = NewNoteRow {
            written_by: &note.written_by,
            subject: &note.subject,
            semester: note.semester.get(),
            exam_type: note.exam_type.as_str(),
            file_url: &note.file_url,
            user_id: note.user_id,
        };
        let req = self
            .backend
            .client
            .post(self.table("notes")?)
            .header("Prefer", "return=representation")
            .json(&[row]);
        let rows: Vec<NoteRow> = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| PortError::Unexpected("insert returned no row".to_string()))?
            .to_domain()
    }

    async fn list_notes(&self, filter: NoteFilter) -> PortResult<Vec<NoteRecord>> {
        let mut query = vec![
            ("select".to_string(), "*".to_string()),
            ("order".to_string(), "created_at.desc".to_string()),
        ];
        if let Some(semester) = filter.semester {
            query.push(("semester".to_string(), format!("eq.{}", semester.get())));
        }
        let req = self.backend.client.get(self.table("notes")?).query(&query);
        let rows: Vec<NoteRow> = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        rows.into_iter().map(NoteRow::to_domain).collect()
    }

    async fn update_note(&self, id: Uuid, patch: NotePatch) -> PortResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let row = NotePatchRow {
            written_by: patch.written_by.as_deref(),
            subject: patch.subject.as_deref(),
            semester: patch.semester.map(|s| s.get()),
        };
        let req = self
            .backend
            .client
            .patch(self.table("notes")?)
            .query(&[("id", format!("eq.{id}"))])
            .json(&row);
        self.send(req).await.map(|_| ())
    }

    async fn set_pinned(&self, id: Uuid, pinned: bool) -> PortResult<()> {
        let req = self
            .backend
            .client
            .patch(self.table("notes")?)
            .query(&[("id", format!("eq.{id}"))])
            .json(&serde_json::json!({ "is_pinned": pinned }));
        self.send(req).await.map(|_| ())
    }

    async fn delete_note(&self, id: Uuid) -> PortResult<()> {
        let req = self
            .backend
            .client
            .delete(self.table("notes")?)
            .query(&[("id", format!("eq.{id}"))]);
        self.send(req).await.map(|_| ())
    }
}
