//! Credit transaction entity - One immutable entry of the append-only ledger.
//!
//! `amount` is the signed delta actually applied and `balance_after` the
//! member's balance right after it. Entries are never updated or deleted.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Credit transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "credit_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Global append order, strictly increasing
    #[sea_orm(unique)]
    pub sequence: i64,
    pub member_id: String,
    pub kind: TransactionKind,
    /// Signed delta applied to the balance
    pub amount: i64,
    pub description: String,
    /// Session this entry relates to, for booking and refund entries
    pub session_id: Option<String>,
    pub timestamp: DateTimeUtc,
    pub balance_after: i64,
}

/// Classification of a ledger entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    #[sea_orm(string_value = "earned")]
    Earned,
    #[sea_orm(string_value = "spent")]
    Spent,
    #[sea_orm(string_value = "refund")]
    Refund,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
