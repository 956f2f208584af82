//! Contract and signature rows

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use super::enum_column;

text_enum! {
    /// Contract lifecycle state
    pub enum ContractStatus ("contract status") {
        Draft => "draft",
        Sent => "sent",
        Signed => "signed",
        Active => "active",
        Completed => "completed",
        Cancelled => "cancelled",
        Expired => "expired",
    }
}

impl ContractStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContractStatus::Completed | ContractStatus::Cancelled | ContractStatus::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub project_id: String,
    pub client_id: String,
    pub contract_number: String,
    pub title: String,
    pub content: String,
    pub amount: f64,
    pub currency: String,
    pub status: ContractStatus,
    pub created_date: String,
    pub sent_date: Option<String>,
    pub signed_date: Option<String>,
    pub expiry_date: Option<String>,
    pub completion_date: Option<String>,
    pub terms_and_conditions: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Contract {
    /// Awaiting signature past its expiry date.
    pub fn is_expired(&self, today: &str) -> bool {
        self.status == ContractStatus::Sent
            && self
                .expiry_date
                .as_deref()
                .map(|expiry| expiry < today)
                .unwrap_or(false)
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            client_id: row.try_get("client_id")?,
            contract_number: row.try_get("contract_number")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            status: enum_column(row, "status")?,
            created_date: row.try_get("created_date")?,
            sent_date: row.try_get("sent_date")?,
            signed_date: row.try_get("signed_date")?,
            expiry_date: row.try_get("expiry_date")?,
            completion_date: row.try_get("completion_date")?,
            terms_and_conditions: row.try_get("terms_and_conditions")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateContractRequest {
    pub project_id: String,
    pub client_id: String,
    pub contract_number: String,
    pub title: String,
    pub content: String,
    pub amount: f64,
    pub currency: String,
    pub expiry_date: String,
    pub terms_and_conditions: Option<String>,
    pub created_by: String,
}

/// Draft edits; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct UpdateContractRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub amount: Option<f64>,
    pub expiry_date: Option<String>,
    pub terms_and_conditions: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub client_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<ContractStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSignature {
    pub id: String,
    pub contract_id: String,
    pub signer_id: String,
    pub signature_path: String,
    pub signed_at: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub verification_status: String,
}

impl ContractSignature {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            contract_id: row.try_get("contract_id")?,
            signer_id: row.try_get("signer_id")?,
            signature_path: row.try_get("signature_path")?,
            signed_at: row.try_get("signed_at")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            verification_status: row.try_get("verification_status")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateSignatureRequest {
    pub contract_id: String,
    pub signer_id: String,
    pub signature_path: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
