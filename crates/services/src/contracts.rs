use chrono::{Duration, Utc};
use portal_database::{
    today, Contract, ContractFilter, ContractRepository, ContractSignature, ContractStatus,
    CreateContractRequest, CreateSignatureRequest, DatabaseError, IdentityRepository, Page,
    Pagination, ProjectStatus, UpdateContractRequest, User, UserRepository, VerificationStatus,
};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::activity::{ActivityEntry, ActivityService};
use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::files::{FileService, Upload};
use crate::notifications::{Notice, NotificationKind, NotificationService};
use crate::numbering::{contract_number, round_money};
use crate::projects::{validate_date, ProjectService};
use crate::workflow::contract_transition_allowed;

#[derive(Debug, Clone, Default)]
pub struct NewContract {
    pub project_id: String,
    pub title: String,
    pub content: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub expiry_date: Option<String>,
    pub terms_and_conditions: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractDetail {
    pub contract: Contract,
    pub project_name: Option<String>,
    pub client: Option<User>,
    pub signatures: Vec<ContractSignature>,
}

/// Portable rendering of a contract for download
#[derive(Debug, Clone, Serialize)]
pub struct ContractDocument {
    pub contract_number: String,
    pub title: String,
    pub content: String,
    pub terms_and_conditions: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub status: ContractStatus,
    pub project: Option<String>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub created_date: String,
    pub sent_date: Option<String>,
    pub signed_date: Option<String>,
    pub expiry_date: Option<String>,
    pub signatures: Vec<ContractSignature>,
    pub generated_at: String,
}

impl ContractDocument {
    pub fn file_name(&self) -> String {
        format!("contract-{}.json", self.contract_number)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedContract {
    pub contract: Contract,
    pub signature: ContractSignature,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractStats {
    pub total_contracts: i64,
    pub by_status: BTreeMap<&'static str, i64>,
    pub awaiting_signature: i64,
    pub active_contracts: i64,
    pub signed_value: f64,
    pub lapsed: i64,
}

#[derive(Clone)]
pub struct ContractService {
    contracts: ContractRepository,
    identity: IdentityRepository,
    users: UserRepository,
    projects: ProjectService,
    files: FileService,
    notifications: NotificationService,
    activity: ActivityService,
    default_currency: String,
    expiry_days: i64,
}

impl ContractService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        projects: ProjectService,
        files: FileService,
        notifications: NotificationService,
        activity: ActivityService,
        default_currency: impl Into<String>,
        expiry_days: i64,
    ) -> Self {
        Self {
            contracts: ContractRepository::new(pool.clone()),
            identity: IdentityRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            projects,
            files,
            notifications,
            activity,
            default_currency: default_currency.into(),
            expiry_days,
        }
    }

    async fn require(&self, id: &str) -> ServiceResult<Contract> {
        self.contracts
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Contract"))
    }

    async fn accessible(&self, actor: &Actor, id: &str) -> ServiceResult<Contract> {
        let contract = self.require(id).await?;
        actor.require_access(&contract.client_id)?;
        Ok(contract)
    }

    /// Explain why a guarded status update matched no row.
    async fn stale(&self, id: &str, to: ContractStatus) -> ServiceError {
        match self.require(id).await {
            Ok(contract) => ServiceError::transition("contract", contract.status, to),
            Err(err) => err,
        }
    }

    fn check_transition(&self, contract: &Contract, to: ContractStatus) -> ServiceResult<()> {
        if contract_transition_allowed(contract.status, to) {
            Ok(())
        } else {
            Err(ServiceError::transition("contract", contract.status, to))
        }
    }

    pub async fn create(&self, actor: &Actor, input: NewContract) -> ServiceResult<Contract> {
        actor.require_admin()?;
        let project = self.projects.require_project(&input.project_id).await?;

        if input.title.trim().is_empty() || input.content.trim().is_empty() {
            return Err(ServiceError::validation("Title and content are required"));
        }
        if !input.amount.is_finite() || input.amount <= 0.0 {
            return Err(ServiceError::validation("Amount must be positive"));
        }
        let expiry_date = match input.expiry_date {
            Some(date) => {
                validate_date("expiry_date", &date)?;
                date
            }
            None => (Utc::now() + Duration::days(self.expiry_days))
                .format("%Y-%m-%d")
                .to_string(),
        };
        let currency = input
            .currency
            .map(|currency| currency.trim().to_uppercase())
            .filter(|currency| !currency.is_empty())
            .unwrap_or_else(|| self.default_currency.clone());

        let contract = self
            .contracts
            .create(&CreateContractRequest {
                project_id: project.id.clone(),
                client_id: project.client_id.clone(),
                contract_number: contract_number(Utc::now()),
                title: input.title.trim().to_string(),
                content: input.content,
                amount: round_money(input.amount),
                currency,
                expiry_date,
                terms_and_conditions: input.terms_and_conditions,
                created_by: actor.user_id.clone(),
            })
            .await?;

        info!(contract_id = %contract.id, number = %contract.contract_number, "contract created");
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("contract_created", "contract", &contract.id).new_values(
                    json!({ "contract_number": contract.contract_number, "amount": contract.amount }),
                ),
            )
            .await;
        Ok(contract)
    }

    /// Edit a draft. Anything past `draft` is immutable.
    pub async fn update(
        &self,
        actor: &Actor,
        id: &str,
        changes: UpdateContractRequest,
    ) -> ServiceResult<Contract> {
        actor.require_admin()?;
        let contract = self.require(id).await?;
        if contract.status != ContractStatus::Draft {
            return Err(ServiceError::conflict("Only draft contracts can be edited"));
        }
        if let Some(amount) = changes.amount {
            if !amount.is_finite() || amount <= 0.0 {
                return Err(ServiceError::validation("Amount must be positive"));
            }
        }
        if let Some(date) = &changes.expiry_date {
            validate_date("expiry_date", date)?;
        }

        let updated = self
            .contracts
            .update_draft(id, &changes)
            .await?
            .ok_or_else(|| ServiceError::conflict("Only draft contracts can be edited"))?;
        self.activity
            .record(Some(actor), ActivityEntry::new("contract_updated", "contract", id))
            .await;
        Ok(updated)
    }

    pub async fn send(&self, actor: &Actor, id: &str) -> ServiceResult<Contract> {
        actor.require_admin()?;
        let contract = self.require(id).await?;
        self.check_transition(&contract, ContractStatus::Sent)?;

        let sent = match self.contracts.mark_sent(id, &today()).await? {
            Some(sent) => sent,
            None => return Err(self.stale(id, ContractStatus::Sent).await),
        };

        self.activity
            .record(Some(actor), ActivityEntry::new("contract_sent", "contract", id))
            .await;
        self.notifications
            .notify(
                &sent.client_id,
                &Notice::new(
                    NotificationKind::ContractSent,
                    "Contract ready for signature",
                    format!("Contract {} \"{}\" is ready for your signature", sent.contract_number, sent.title),
                )
                .about("contract", sent.id.clone())
                .link(format!("/contracts/{}", sent.id)),
            )
            .await;
        Ok(sent)
    }

    /// Client signature. The signature row and the `sent -> signed` move
    /// commit together.
    pub async fn sign(&self, actor: &Actor, id: &str, signature: &Upload) -> ServiceResult<SignedContract> {
        let contract = self.require(id).await?;
        if contract.client_id != actor.user_id {
            return Err(ServiceError::forbidden("Only the contract's client can sign it"));
        }

        let verified = self
            .identity
            .find_by_user(&actor.user_id)
            .await?
            .map(|verification| verification.status == VerificationStatus::Verified)
            .unwrap_or(false);
        if !verified {
            return Err(ServiceError::validation(
                "Identity verification is required before signing",
            ));
        }

        if contract.is_expired(&today()) {
            self.contracts.mark_expired(id).await?;
            info!(contract_id = id, "contract expired before signature");
            return Err(ServiceError::conflict("Contract has expired"));
        }
        if self.contracts.has_signed(id, &actor.user_id).await? {
            return Err(ServiceError::AlreadySigned);
        }
        self.check_transition(&contract, ContractStatus::Signed)?;

        let extension = self.files.policy().check_image(signature)?;
        let stored = self
            .files
            .store_in(&format!("contracts/{id}"), "signature-", signature, &extension)
            .await?;

        let request = CreateSignatureRequest {
            contract_id: id.to_string(),
            signer_id: actor.user_id.clone(),
            signature_path: stored.file_path.clone(),
            ip_address: actor.client.ip_address.clone(),
            user_agent: actor.client.user_agent.clone(),
        };
        let (signed, signature) = match self.contracts.sign(&request, &today()).await {
            Ok(signed) => signed,
            Err(err) => {
                self.files.discard(&stored.file_path).await;
                return Err(match err {
                    DatabaseError::Duplicate(_) => ServiceError::AlreadySigned,
                    DatabaseError::Conflict(_) => self.stale(id, ContractStatus::Signed).await,
                    other => other.into(),
                });
            }
        };

        info!(contract_id = id, signer = %actor.user_id, "contract signed");
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("contract_signed", "contract", id)
                    .new_values(json!({ "signature_id": signature.id })),
            )
            .await;
        self.notifications
            .notify_admins(
                &Notice::new(
                    NotificationKind::ContractSigned,
                    "Contract signed",
                    format!("Contract {} was signed by the client", signed.contract_number),
                )
                .about("contract", signed.id.clone())
                .link(format!("/admin/contracts/{}", signed.id)),
            )
            .await;

        Ok(SignedContract {
            contract: signed,
            signature,
        })
    }

    /// `signed -> active`; an approved project starts work.
    pub async fn activate(&self, actor: &Actor, id: &str) -> ServiceResult<Contract> {
        actor.require_admin()?;
        let contract = self.require(id).await?;
        self.check_transition(&contract, ContractStatus::Active)?;

        let active = match self.contracts.mark_active(id).await? {
            Some(active) => active,
            None => return Err(self.stale(id, ContractStatus::Active).await),
        };

        let started = self
            .projects
            .advance(
                actor,
                &active.project_id,
                Some(ProjectStatus::Approved),
                ProjectStatus::InProgress,
            )
            .await?;
        if started.is_none() {
            info!(project_id = %active.project_id, "project not approved; status left unchanged");
        }

        self.activity
            .record(Some(actor), ActivityEntry::new("contract_activated", "contract", id))
            .await;
        Ok(active)
    }

    /// `active -> completed`, completing the project as well.
    pub async fn complete(&self, actor: &Actor, id: &str) -> ServiceResult<Contract> {
        actor.require_admin()?;
        let contract = self.require(id).await?;
        self.check_transition(&contract, ContractStatus::Completed)?;

        let completed = match self.contracts.mark_completed(id, &today()).await? {
            Some(completed) => completed,
            None => return Err(self.stale(id, ContractStatus::Completed).await),
        };

        let project = self.projects.require_project(&completed.project_id).await?;
        if project.status != ProjectStatus::Completed
            && self
                .projects
                .advance(actor, &project.id, Some(project.status), ProjectStatus::Completed)
                .await?
                .is_none()
        {
            warn!(project_id = %project.id, "project changed while completing its contract");
        }

        self.activity
            .record(Some(actor), ActivityEntry::new("contract_completed", "contract", id))
            .await;
        Ok(completed)
    }

    pub async fn cancel(&self, actor: &Actor, id: &str, reason: Option<&str>) -> ServiceResult<Contract> {
        actor.require_admin()?;
        let contract = self.require(id).await?;
        self.check_transition(&contract, ContractStatus::Cancelled)?;

        let reason = reason.map(str::trim).filter(|reason| !reason.is_empty());
        let cancelled = match self.contracts.mark_cancelled(id, contract.status, reason).await? {
            Some(cancelled) => cancelled,
            None => return Err(self.stale(id, ContractStatus::Cancelled).await),
        };

        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("contract_cancelled", "contract", id)
                    .old(json!({ "status": contract.status }))
                    .new_values(json!({ "reason": reason })),
            )
            .await;
        Ok(cancelled)
    }

    /// Move every sent contract past its expiry date to `expired`.
    pub async fn expire_overdue(&self) -> ServiceResult<u64> {
        let expired = self.contracts.expire_overdue(&today()).await?;
        if expired > 0 {
            info!(expired, "expired overdue contracts");
        }
        Ok(expired)
    }

    pub async fn list(
        &self,
        actor: &Actor,
        project_id: Option<String>,
        status: Option<ContractStatus>,
        pagination: Pagination,
    ) -> ServiceResult<Page<Contract>> {
        let filter = ContractFilter {
            client_id: (!actor.is_admin()).then(|| actor.user_id.clone()),
            project_id,
            status,
        };
        Ok(self.contracts.list(&filter, pagination).await?)
    }

    pub async fn detail(&self, actor: &Actor, id: &str) -> ServiceResult<ContractDetail> {
        let contract = self.accessible(actor, id).await?;
        let project_name = match self.projects.require_project(&contract.project_id).await {
            Ok(project) => Some(project.name),
            Err(ServiceError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        Ok(ContractDetail {
            project_name,
            client: self.users.find_by_id(&contract.client_id).await?,
            signatures: self.contracts.signatures(&contract.id).await?,
            contract,
        })
    }

    pub async fn document(&self, actor: &Actor, id: &str) -> ServiceResult<ContractDocument> {
        let detail = self.detail(actor, id).await?;
        let contract = detail.contract;

        Ok(ContractDocument {
            contract_number: contract.contract_number,
            title: contract.title,
            content: contract.content,
            terms_and_conditions: contract.terms_and_conditions,
            amount: contract.amount,
            currency: contract.currency,
            status: contract.status,
            project: detail.project_name,
            client_name: detail.client.as_ref().map(User::full_name),
            client_email: detail.client.map(|client| client.email),
            created_date: contract.created_date,
            sent_date: contract.sent_date,
            signed_date: contract.signed_date,
            expiry_date: contract.expiry_date,
            signatures: detail.signatures,
            generated_at: portal_database::now_timestamp(),
        })
    }

    pub async fn stats(&self, actor: &Actor) -> ServiceResult<ContractStats> {
        actor.require_admin()?;
        let counts = self.contracts.count_by_status().await?;

        let mut by_status: BTreeMap<&'static str, i64> =
            ContractStatus::ALL.iter().map(|status| (status.as_str(), 0)).collect();
        for (status, count) in &counts {
            by_status.insert(status.as_str(), *count);
        }

        Ok(ContractStats {
            total_contracts: counts.iter().map(|(_, count)| count).sum(),
            awaiting_signature: by_status[ContractStatus::Sent.as_str()],
            active_contracts: by_status[ContractStatus::Active.as_str()],
            signed_value: self
                .contracts
                .sum_amount(&[
                    ContractStatus::Signed,
                    ContractStatus::Active,
                    ContractStatus::Completed,
                ])
                .await?,
            lapsed: self.contracts.count_lapsed(&today()).await?,
            by_status,
        })
    }
}
