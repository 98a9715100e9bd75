//! services/cli/src/commands.rs
//!
//! The command surface: argument definitions and the handlers wiring the
//! access gate, the upload pipeline, and the backend adapters together.
//! Admin commands run only behind a gate that resolved to `Allowed`.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use studyshelf_core::domain::{
    BatchMetadata, LocalFile, MaterialKind, NoteFilter, NotePatch, Semester, Session, UserRole,
};
use studyshelf_core::gate::{AccessGate, AccessState};
use studyshelf_core::ports::{BlobStore, NoteStore, RoleStore, SessionProvider};
use studyshelf_core::upload::{BatchEvent, UploadPipeline};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::{Backend, SupabaseAuth, SupabaseRows, SupabaseStorage};
use crate::config::Config;
use crate::error::AppError;
use crate::session_cache::SessionCache;
use crate::session_watch::session_watch;

//=========================================================================================
// Argument Definitions
//=========================================================================================

/// Semester note sharing over a hosted backend.
#[derive(Parser)]
#[command(name = "studyshelf", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sign in to the admin area
    Login {
        #[arg(long)]
        email: String,
        /// Taken from STUDYSHELF_PASSWORD when omitted
        #[arg(long, env = "STUDYSHELF_PASSWORD")]
        password: String,
    },
    /// Sign out and clear the cached session
    Logout,
    /// Show the signed-in user and the resolved role
    Whoami,
    /// List notes, newest first
    List {
        /// Restrict to one semester (1-8)
        #[arg(long)]
        semester: Option<u8>,
    },
    /// Upload one or more files as notes (admin only)
    Upload {
        /// Files to upload, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        author: String,
        /// Semester the material belongs to (1-8)
        #[arg(long)]
        semester: u8,
        /// One of: class-note, MST1, MST2, final-exam
        #[arg(long, default_value = "class-note")]
        kind: String,
    },
    /// Edit a note's metadata (admin only)
    Edit {
        id: Uuid,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        semester: Option<u8>,
    },
    /// Pin a note above its semester's other notes (admin only)
    Pin { id: Uuid },
    /// Remove a note's pin (admin only)
    Unpin { id: Uuid },
    /// Delete a note and its stored file (admin only)
    Delete { id: Uuid },
    /// List user role records (super admin only)
    Users,
    /// Grant a pending user a role (super admin only)
    Approve {
        user_id: Uuid,
        /// admin or super_admin
        #[arg(long, default_value = "admin")]
        role: String,
    },
    /// Block a user from the admin area (super admin only)
    Block { user_id: Uuid },
    /// Lift a block (super admin only)
    Unblock { user_id: Uuid },
}

//=========================================================================================
// The Application
//=========================================================================================

/// Holds the configuration and the adapter set shared by every command.
pub struct App {
    config: Arc<Config>,
    auth: Arc<SupabaseAuth>,
    rows: Arc<SupabaseRows>,
    storage: Arc<SupabaseStorage>,
}

impl App {
    pub fn new(config: Arc<Config>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().build()?;
        let backend = Backend::new(
            client,
            config.backend_url.clone(),
            config.anon_key.clone(),
        );
        let auth = Arc::new(SupabaseAuth::new(
            backend.clone(),
            SessionCache::new(config.session_cache_path.clone()),
        ));
        let rows = Arc::new(SupabaseRows::new(backend.clone(), auth.clone()));
        let storage = Arc::new(SupabaseStorage::new(backend, config.notes_bucket.clone()));
        Ok(Self { config, auth, rows, storage })
    }

    pub async fn run(&self, command: Command) -> Result<(), AppError> {
        match command {
            Command::Login { email, password } => self.login(&email, &password).await,
            Command::Logout => self.logout().await,
            Command::Whoami => self.whoami().await,
            Command::List { semester } => self.list(semester).await,
            Command::Upload { files, subject, author, semester, kind } => {
                self.upload(files, subject, author, semester, &kind).await
            }
            Command::Edit { id, subject, author, semester } => {
                self.edit(id, subject, author, semester).await
            }
            Command::Pin { id } => self.set_pinned(id, true).await,
            Command::Unpin { id } => self.set_pinned(id, false).await,
            Command::Delete { id } => self.delete(id).await,
            Command::Users => self.users().await,
            Command::Approve { user_id, role } => self.approve(user_id, &role).await,
            Command::Block { user_id } => self.set_blocked(user_id, true).await,
            Command::Unblock { user_id } => self.set_blocked(user_id, false).await,
        }
    }

    //-------------------------------------------------------------------------------------
    // Gate plumbing
    //-------------------------------------------------------------------------------------

    async fn resolve_gate(&self) -> AccessGate {
        let mut gate = AccessGate::new(
            self.auth.clone(),
            self.rows.clone(),
            self.config.owner_email.clone(),
        );
        gate.resolve().await;
        gate
    }

    /// Admits only a gate that settled into `Allowed`, mapping every other
    /// state to the message the user should see.
    fn require_admin(gate: &mut AccessGate) -> Result<UserRole, AppError> {
        match gate.state().clone() {
            AccessState::Allowed { role } => Ok(role),
            AccessState::Unauthenticated => {
                if gate.take_redirect() {
                    eprintln!("Not signed in. Run `studyshelf login` first.");
                }
                Err(AppError::AccessDenied("not signed in".to_string()))
            }
            AccessState::Blocked => {
                Err(AppError::AccessDenied("this account is blocked".to_string()))
            }
            AccessState::Pending => Err(AppError::AccessDenied(
                "this account is awaiting approval by a super admin".to_string(),
            )),
            AccessState::Resolving => {
                Err(AppError::Internal("access gate did not settle".to_string()))
            }
        }
    }

    async fn require_admin_session(&self) -> Result<(AccessGate, UserRole, Session), AppError> {
        let mut gate = self.resolve_gate().await;
        let role = Self::require_admin(&mut gate)?;
        let session = self
            .auth
            .current_session()
            .await?
            .ok_or_else(|| AppError::AccessDenied("not signed in".to_string()))?;
        Ok((gate, role, session))
    }

    fn require_super_admin(role: UserRole) -> Result<(), AppError> {
        if role == UserRole::SuperAdmin {
            Ok(())
        } else {
            Err(AppError::AccessDenied(
                "only a super admin can manage user roles".to_string(),
            ))
        }
    }

    //-------------------------------------------------------------------------------------
    // Session commands
    //-------------------------------------------------------------------------------------

    async fn login(&self, email: &str, password: &str) -> Result<(), AppError> {
        let session = self.auth.sign_in(email, password).await?;
        let mut gate = self.resolve_gate().await;
        match gate.state().clone() {
            AccessState::Allowed { role } => {
                println!("Signed in as {} ({})", session.email, role.as_str());
            }
            AccessState::Pending => {
                println!(
                    "Signed in as {}. Your account is awaiting approval by a super admin.",
                    session.email
                );
            }
            AccessState::Blocked => {
                println!("Signed in as {}, but this account is blocked.", session.email);
            }
            _ => {
                if gate.take_redirect() {
                    eprintln!("Sign-in did not produce a usable session.");
                }
            }
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), AppError> {
        self.auth.sign_out().await?;
        println!("Signed out.");
        Ok(())
    }

    async fn whoami(&self) -> Result<(), AppError> {
        let mut gate = self.resolve_gate().await;
        match gate.state().clone() {
            AccessState::Allowed { role } => {
                let session = self.auth.current_session().await?;
                let email = session.map(|s| s.email).unwrap_or_default();
                println!("{email} ({})", role.as_str());
            }
            AccessState::Pending => println!("Signed in, awaiting approval."),
            AccessState::Blocked => println!("Signed in, but blocked."),
            _ => {
                gate.take_redirect();
                println!("Not signed in.");
            }
        }
        Ok(())
    }

    //-------------------------------------------------------------------------------------
    // Browse
    //-------------------------------------------------------------------------------------

    async fn list(&self, semester: Option<u8>) -> Result<(), AppError> {
        let semester = semester
            .map(Semester::new)
            .transpose()
            .map_err(|e| AppError::InvalidArgument(e.to_string()))?;
        let mut notes = self.rows.list_notes(NoteFilter { semester }).await?;
        // Pinned notes first; the store already ordered each group newest
        // first and the sort is stable.
        notes.sort_by_key(|note| !note.is_pinned);

        if notes.is_empty() {
            println!("No notes found.");
            return Ok(());
        }
        for note in notes {
            println!("{}", note_line(&note));
        }
        Ok(())
    }

    //-------------------------------------------------------------------------------------
    // Upload
    //-------------------------------------------------------------------------------------

    async fn upload(
        &self,
        paths: Vec<PathBuf>,
        subject: String,
        author: String,
        semester: u8,
        kind: &str,
    ) -> Result<(), AppError> {
        let semester =
            Semester::new(semester).map_err(|e| AppError::InvalidArgument(e.to_string()))?;
        let kind = MaterialKind::parse(kind)
            .ok_or_else(|| AppError::InvalidArgument(format!("unknown material kind '{kind}'")))?;

        let (gate, _role, session) = self.require_admin_session().await?;

        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    AppError::InvalidArgument(format!("bad file name: {}", path.display()))
                })?
                .to_string();
            let data = tokio::fs::read(path).await?;
            files.push(LocalFile { name, data: Bytes::from(data) });
        }

        // Keep the gate live while the batch runs: a pushed sign-out cancels
        // the remaining files. The watcher is released when we return.
        let gate = Arc::new(Mutex::new(gate));
        let batch_cancel = CancellationToken::new();
        let watch_cancel = CancellationToken::new();
        let watcher = tokio::spawn(session_watch(
            gate.clone(),
            self.auth.subscribe(),
            watch_cancel.clone(),
            batch_cancel.clone(),
        ));

        let metadata = BatchMetadata { subject, written_by: author, semester, kind };
        let pipeline = UploadPipeline::new(self.storage.clone(), self.rows.clone());
        let mut events =
            Box::pin(pipeline.submit(Some(session), metadata, files, batch_cancel.clone()));

        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{msg:32} [{bar:40.green/blue}] {pos:>3}%")
            .map_err(|e| AppError::Internal(e.to_string()))?
            .progress_chars("## ");
        bar.set_style(style);

        let outcome = async {
            while let Some(event) = events.next().await {
                match event? {
                    BatchEvent::FileStarted { index, total, name } => {
                        bar.set_position(0);
                        bar.set_message(format!("file {} of {}: {}", index + 1, total, name));
                    }
                    BatchEvent::FileProgress { fraction, .. } => {
                        bar.set_position((fraction * 100.0).round() as u64);
                    }
                    BatchEvent::FileUploaded { url, .. } => {
                        bar.println(format!("uploaded {url}"));
                    }
                    BatchEvent::Completed { uploaded } => {
                        bar.finish_and_clear();
                        println!("Uploaded {uploaded} file(s).");
                    }
                }
            }
            Ok::<(), AppError>(())
        }
        .await;

        watch_cancel.cancel();
        let _ = watcher.await;
        if outcome.is_err() {
            bar.abandon();
        }
        outcome
    }

    //-------------------------------------------------------------------------------------
    // Manage
    //-------------------------------------------------------------------------------------

    async fn edit(
        &self,
        id: Uuid,
        subject: Option<String>,
        author: Option<String>,
        semester: Option<u8>,
    ) -> Result<(), AppError> {
        let (_gate, _role, _session) = self.require_admin_session().await?;
        let semester = semester
            .map(Semester::new)
            .transpose()
            .map_err(|e| AppError::InvalidArgument(e.to_string()))?;
        let patch = NotePatch { written_by: author, subject, semester };
        if patch.is_empty() {
            return Err(AppError::InvalidArgument("nothing to change".to_string()));
        }
        self.rows.update_note(id, patch).await?;
        println!("Note {id} updated.");
        Ok(())
    }

    async fn set_pinned(&self, id: Uuid, pinned: bool) -> Result<(), AppError> {
        let (_gate, _role, _session) = self.require_admin_session().await?;
        self.rows.set_pinned(id, pinned).await?;
        println!("Note {id} {}.", if pinned { "pinned" } else { "unpinned" });
        Ok(())
    }

    /// Deletes the row first, then makes a best-effort removal of the stored
    /// file derived from the tail of the note's URL. A failed blob removal
    /// is logged, not fatal.
    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let (_gate, _role, session) = self.require_admin_session().await?;

        let notes = self.rows.list_notes(NoteFilter::default()).await?;
        let note = notes
            .into_iter()
            .find(|n| n.id == id)
            .ok_or_else(|| AppError::InvalidArgument(format!("no note with id {id}")))?;

        self.rows.delete_note(id).await?;

        let key = note
            .file_url
            .rsplit('/')
            .next()
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        if let Some(key) = key {
            if let Err(e) = self
                .storage
                .remove(std::slice::from_ref(&key), &session.access_token)
                .await
            {
                warn!(error = %e, key = %key, "note row deleted but its file could not be removed");
            }
        }
        println!("Note {id} deleted.");
        Ok(())
    }

    //-------------------------------------------------------------------------------------
    // Role administration (super admin only)
    //-------------------------------------------------------------------------------------

    async fn users(&self) -> Result<(), AppError> {
        let (_gate, role, _session) = self.require_admin_session().await?;
        Self::require_super_admin(role)?;
        let records = self.rows.list_roles().await?;
        for record in records {
            println!(
                "{}  {}  {}{}",
                record.id,
                record.email,
                record.role.as_str(),
                if record.is_blocked { "  (blocked)" } else { "" },
            );
        }
        Ok(())
    }

    async fn approve(&self, user_id: Uuid, role_str: &str) -> Result<(), AppError> {
        let (_gate, role, session) = self.require_admin_session().await?;
        Self::require_super_admin(role)?;
        Self::forbid_self_change(&session, user_id)?;

        let granted = match UserRole::parse(role_str) {
            Some(granted) if granted.is_admin() => granted,
            _ => {
                return Err(AppError::InvalidArgument(format!(
                    "role must be admin or super_admin, got '{role_str}'"
                )))
            }
        };
        self.rows.update_role(user_id, granted).await?;
        println!("User {user_id} is now {}.", granted.as_str());
        Ok(())
    }

    async fn set_blocked(&self, user_id: Uuid, blocked: bool) -> Result<(), AppError> {
        let (_gate, role, session) = self.require_admin_session().await?;
        Self::require_super_admin(role)?;
        Self::forbid_self_change(&session, user_id)?;

        self.rows.set_blocked(user_id, blocked).await?;
        println!("User {user_id} {}.", if blocked { "blocked" } else { "unblocked" });
        Ok(())
    }

    /// Users never mutate their own role record.
    fn forbid_self_change(session: &Session, target: Uuid) -> Result<(), AppError> {
        if session.user_id == target {
            Err(AppError::AccessDenied(
                "you cannot change your own role record".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// One listing line per note. Terminal output, so plain ASCII only.
fn note_line(note: &studyshelf_core::domain::NoteRecord) -> String {
    format!(
        "{}  sem {}  [{}]  {} by {}{}  {}",
        note.id,
        note.semester.get(),
        note.exam_type.as_str(),
        note.subject,
        note.written_by,
        if note.is_pinned { "  (pinned)" } else { "" },
        note.file_url,
    )
}
