use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Client gender, referenced by template eligibility conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A loyalty tier. Read-mostly reference data; the engine never mutates it.
///
/// `order` is a unique rank, `threshold_amount` the minimum lifetime spend to
/// hold the tier.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Level {
    pub id: i64,
    pub name: String,
    pub threshold_amount: Decimal,
    pub perks: serde_json::Value,
    pub order: i32,
}

/// Structured view over the `perks` JSONB column
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LevelPerks {
    /// Tier discount as a percentage of the purchase amount, applied only
    /// when the template's stacking rules allow summation
    pub percent_discount: Option<Decimal>,
}

impl Level {
    /// Parse the structured perk set out of the JSONB column
    pub fn parsed_perks(&self) -> Result<LevelPerks, serde_json::Error> {
        serde_json::from_value(self.perks.clone())
    }
}

/// Domain model representing a loyalty-program client
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: i64,
    pub chat_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
    pub gender: Gender,
    pub identifier: Option<String>,
    pub level_id: Option<i64>,
    pub total_spent: Decimal,
    pub tags: serde_json::Value,
}

/// Snapshot of a client returned inside a redemption result
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClientSummary {
    pub id: i64,
    pub identifier: Option<String>,
    #[schema(value_type = f64)]
    pub total_spent: Decimal,
    pub level_id: Option<i64>,
}

impl From<&Client> for ClientSummary {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id,
            identifier: client.identifier.clone(),
            total_spent: client.total_spent,
            level_id: client.level_id,
        }
    }
}
