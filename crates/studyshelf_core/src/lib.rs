pub mod domain;
pub mod gate;
pub mod ports;
pub mod upload;

pub use domain::{
    BatchMetadata, InvalidSemester, LocalFile, MaterialKind, NewNote, NoteFilter, NotePatch,
    NoteRecord, RoleRecord, Semester, Session, SessionEvent, TransferProgress, UserRole,
};
pub use gate::{AccessGate, AccessState};
pub use ports::{
    BlobStore, NoteStore, PortError, PortResult, RoleStore, SessionEvents, SessionProvider,
    TransferEvents,
};
pub use upload::{BatchEvent, UploadError, UploadPipeline, MAX_FILE_BYTES};
