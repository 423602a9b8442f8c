use sea_orm::DbErr;
use thiserror::Error;

/// Broad classification of an [`Error`], used by callers to decide how to
/// surface a failure (bad input, refused by policy, missing record, or fault).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any read or write.
    Validation,
    /// Expected, recoverable business refusal.
    Policy,
    /// Unknown member or session id.
    NotFound,
    /// Storage, configuration or environment failure.
    Internal,
}

/// Unified error type for the ledger and reservation engine.
#[derive(Debug, Error)]
pub enum Error {
    // Validation
    #[error("Invalid comment: must be at least {min} characters")]
    CommentTooShort { min: usize },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: i64 },

    #[error("Invalid credit cost: {cost} (must be positive)")]
    InvalidCost { cost: i64 },

    #[error("Invalid capacity: {capacity} (must be positive)")]
    InvalidCapacity { capacity: i32 },

    #[error("Session must be open to at least one division")]
    EmptyDivisions,

    #[error("Invalid division: {division}")]
    InvalidDivision { division: i32 },

    #[error("Invalid schedule: {message}")]
    InvalidSchedule { message: String },

    #[error("Invalid weekday: {day} (expected 0=Sunday..6=Saturday)")]
    InvalidWeekday { day: u32 },

    #[error("Invalid member: {message}")]
    InvalidMember { message: String },

    // Policy
    #[error("Insufficient credits for member {member_id}: balance {balance}, required {required}")]
    InsufficientCredits {
        member_id: String,
        balance: i64,
        required: i64,
    },

    #[error("Session {session_id} is full ({capacity} participants)")]
    SessionFull { session_id: String, capacity: i32 },

    #[error("Session {session_id} has already started")]
    SessionAlreadyStarted { session_id: String },

    #[error("Cancellation deadline passed for session {session_id} ({deadline_hours}h before start)")]
    CancellationDeadlinePassed {
        session_id: String,
        deadline_hours: i64,
    },

    #[error("Member {member_id} already holds a booking for session {session_id}")]
    AlreadyBooked {
        session_id: String,
        member_id: String,
    },

    #[error("Member {member_id} has no active booking for session {session_id}")]
    NotBooked {
        session_id: String,
        member_id: String,
    },

    #[error("Member {member_id} is an administrator and cannot be deleted")]
    ProtectedAdmin { member_id: String },

    #[error("No eligible members to delete")]
    NoEligibleMembers,

    #[error("Deduction of {requested} exceeds balance {balance}; confirm capping to {balance}")]
    DeductionExceedsBalance { requested: i64, balance: i64 },

    #[error("No future sessions matched the selected weekdays and date range")]
    NoSessionsGenerated,

    #[error("A member with {field} '{value}' already exists")]
    DuplicateMember { field: &'static str, value: String },

    // Not found
    #[error("Member not found: {id}")]
    MemberNotFound { id: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    // Internal
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the [`ErrorKind`] this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CommentTooShort { .. }
            | Self::InvalidAmount { .. }
            | Self::InvalidCost { .. }
            | Self::InvalidCapacity { .. }
            | Self::EmptyDivisions
            | Self::InvalidDivision { .. }
            | Self::InvalidSchedule { .. }
            | Self::InvalidWeekday { .. }
            | Self::InvalidMember { .. } => ErrorKind::Validation,

            Self::InsufficientCredits { .. }
            | Self::SessionFull { .. }
            | Self::SessionAlreadyStarted { .. }
            | Self::CancellationDeadlinePassed { .. }
            | Self::AlreadyBooked { .. }
            | Self::NotBooked { .. }
            | Self::ProtectedAdmin { .. }
            | Self::NoEligibleMembers
            | Self::DeductionExceedsBalance { .. }
            | Self::NoSessionsGenerated
            | Self::DuplicateMember { .. } => ErrorKind::Policy,

            Self::MemberNotFound { .. } | Self::SessionNotFound { .. } => ErrorKind::NotFound,

            Self::Config { .. } | Self::Database(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
