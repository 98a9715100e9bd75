//! crates/studyshelf_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any backend wire format.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An authenticated session issued by the external auth provider.
///
/// The core only ever holds a read-only copy; the provider owns the
/// lifecycle (sign-in, refresh, sign-out, expiry).
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// A change pushed on the auth provider's session stream.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SignedIn(Session),
    /// The provider rotated tokens for the same user.
    Refreshed(Session),
    SignedOut,
}

/// Privilege level stored in the `user_roles` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Pending,
    Admin,
    SuperAdmin,
}

impl UserRole {
    /// The wire value used by the row store.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Pending => "pending",
            UserRole::Admin => "admin",
            UserRole::SuperAdmin => "super_admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(UserRole::Pending),
            "admin" => Some(UserRole::Admin),
            "super_admin" => Some(UserRole::SuperAdmin),
            _ => None,
        }
    }

    /// Whether this role grants access to the admin surface.
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::SuperAdmin)
    }
}

/// Per-user authorization record. Exactly one exists per user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub is_blocked: bool,
}

impl RoleRecord {
    /// The record created lazily on a user's first successful login.
    ///
    /// Only the designated owner email (compared case-sensitively) is
    /// promoted to super_admin; everyone else starts as pending.
    pub fn bootstrap(session: &Session, owner_email: &str) -> Self {
        let role = if session.email == owner_email {
            UserRole::SuperAdmin
        } else {
            UserRole::Pending
        };
        Self {
            id: session.user_id,
            email: session.email.clone(),
            role,
            is_blocked: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("semester must be between 1 and 8, got {0}")]
pub struct InvalidSemester(pub u8);

/// A semester number, constrained to 1 through 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Semester(u8);

impl Semester {
    pub fn new(n: u8) -> Result<Self, InvalidSemester> {
        if (1..=8).contains(&n) {
            Ok(Semester(n))
        } else {
            Err(InvalidSemester(n))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

/// The material-type tag carried on each note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MaterialKind {
    #[default]
    ClassNote,
    Mst1,
    Mst2,
    FinalExam,
}

impl MaterialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialKind::ClassNote => "class-note",
            MaterialKind::Mst1 => "MST1",
            MaterialKind::Mst2 => "MST2",
            MaterialKind::FinalExam => "final-exam",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "class-note" => Some(MaterialKind::ClassNote),
            "MST1" => Some(MaterialKind::Mst1),
            "MST2" => Some(MaterialKind::Mst2),
            "final-exam" => Some(MaterialKind::FinalExam),
            _ => None,
        }
    }
}

/// One row in the `notes` table: a single published study material.
#[derive(Debug, Clone)]
pub struct NoteRecord {
    pub id: Uuid,
    pub written_by: String,
    pub subject: String,
    pub semester: Semester,
    pub exam_type: MaterialKind,
    pub file_url: String,
    pub is_pinned: bool,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// The fields this client supplies when registering a freshly uploaded note.
#[derive(Debug, Clone)]
pub struct NewNote {
    pub written_by: String,
    pub subject: String,
    pub semester: Semester,
    pub exam_type: MaterialKind,
    pub file_url: String,
    pub user_id: Uuid,
}

/// A partial update to an existing note. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub written_by: Option<String>,
    pub subject: Option<String>,
    pub semester: Option<Semester>,
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        self.written_by.is_none() && self.subject.is_none() && self.semester.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoteFilter {
    pub semester: Option<Semester>,
}

/// Metadata shared by every file in one upload batch.
#[derive(Debug, Clone)]
pub struct BatchMetadata {
    pub subject: String,
    pub written_by: String,
    pub semester: Semester,
    pub kind: MaterialKind,
}

/// A local file queued for upload. The bytes are held in memory for the
/// duration of the batch; `Bytes` makes the per-chunk slicing cheap.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub data: Bytes,
}

impl LocalFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The text after the final dot of the file name, if any.
    pub fn extension(&self) -> Option<&str> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }

    /// Derives the collision-resistant storage key for batch position
    /// `index`: epoch milliseconds plus the index, keeping the original
    /// extension when there is one.
    pub fn storage_key(&self, epoch_millis: i64, index: usize) -> String {
        match self.extension() {
            Some(ext) => format!("{epoch_millis}_{index}.{ext}"),
            None => format!("{epoch_millis}_{index}"),
        }
    }
}

/// Byte-level progress for one in-flight blob transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
}

impl TransferProgress {
    /// Completion as a fraction in `[0, 1]`, derived solely from this
    /// transfer's own byte counts.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.transferred as f64 / self.total as f64
        }
    }
}
