//! Entity module - Contains all SeaORM entity definitions for the four record collections.
//! Records reference each other only through opaque string ids; there are no
//! relations between entities, so every record is independently serializable.

pub mod booking;
pub mod credit_transaction;
pub mod member;
pub mod session;

// Re-export specific types to avoid conflicts
pub use booking::{
    BookingStatus, Column as BookingColumn, Entity as Booking, Model as BookingModel,
};
pub use credit_transaction::{
    Column as CreditTransactionColumn, Entity as CreditTransaction,
    Model as CreditTransactionModel, TransactionKind,
};
pub use member::{
    Column as MemberColumn, Entity as Member, MemberRole, MemberStatus, Model as MemberModel,
};
pub use session::{
    Column as SessionColumn, Divisions, Entity as Session, Model as SessionModel, Participants,
};
