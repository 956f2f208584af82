use chrono::{Duration, SecondsFormat, Utc};
use portal_database::{
    today, ContractRepository, ContractStatus, Message, MessageRepository, Payment,
    PaymentRepository, PaymentStatus, Project, ProjectRepository, ProjectStatus, UserRepository,
    UserRole,
};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

use crate::activity::{ActivityEntry, ActivityService};
use crate::actor::Actor;
use crate::contracts::ContractService;
use crate::error::{ServiceError, ServiceResult};
use crate::notifications::{BroadcastSummary, NotificationService, DEFAULT_PURGE_DAYS};
use crate::payments::PaymentService;

const RECENT_LIMIT: i64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct UserTotals {
    pub total: i64,
    pub new_this_week: i64,
    pub verified: i64,
    pub verification_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectTotals {
    pub total: i64,
    pub active: i64,
    pub completed: i64,
    pub new_this_week: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueTotals {
    pub total: f64,
    pub last_30_days: f64,
    pub pending: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractTotals {
    pub active: i64,
    pub awaiting_signature: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alerts {
    pub overdue_payments: i64,
    pub expired_contracts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub users: UserTotals,
    pub projects: ProjectTotals,
    pub revenue: RevenueTotals,
    pub contracts: ContractTotals,
    pub alerts: Alerts,
    pub recent_projects: Vec<Project>,
    pub recent_payments: Vec<Payment>,
    pub recent_messages: Vec<Message>,
}

/// Maintenance job run by `POST /api/admin/system/cleanup`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupKind {
    Notifications,
    Contracts,
    Invoices,
}

impl FromStr for CleanupKind {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "notifications" => Ok(CleanupKind::Notifications),
            "contracts" => Ok(CleanupKind::Contracts),
            "invoices" => Ok(CleanupKind::Invoices),
            other => Err(ServiceError::validation(format!(
                "Unknown cleanup type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications_removed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracts_expired: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoices_overdue: Option<u64>,
}

fn rate(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 * 1000.0 / whole as f64).round() / 10.0
    }
}

fn timestamp_days_ago(days: i64) -> String {
    (Utc::now() - Duration::days(days)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Clone)]
pub struct AdminService {
    users: UserRepository,
    projects: ProjectRepository,
    contracts: ContractRepository,
    payments: PaymentRepository,
    messages: MessageRepository,
    contract_service: ContractService,
    payment_service: PaymentService,
    notifications: NotificationService,
    activity: ActivityService,
}

impl AdminService {
    pub fn new(
        pool: SqlitePool,
        contract_service: ContractService,
        payment_service: PaymentService,
        notifications: NotificationService,
        activity: ActivityService,
    ) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            projects: ProjectRepository::new(pool.clone()),
            contracts: ContractRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            messages: MessageRepository::new(pool),
            contract_service,
            payment_service,
            notifications,
            activity,
        }
    }

    pub async fn dashboard(&self, actor: &Actor) -> ServiceResult<Dashboard> {
        actor.require_admin()?;
        let week_ago = timestamp_days_ago(7);
        let today = today();

        let total_users = self.users.count_clients().await?;
        let verified = self.users.count_verified_clients().await?;

        let project_counts = self.projects.count_by_status().await?;
        let count_of = |wanted: &[ProjectStatus]| -> i64 {
            project_counts
                .iter()
                .filter(|(status, _)| wanted.contains(status))
                .map(|(_, count)| count)
                .sum()
        };
        let total_projects: i64 = project_counts.iter().map(|(_, count)| count).sum();
        let completed = count_of(&[ProjectStatus::Completed]);

        let contract_counts = self.contracts.count_by_status().await?;
        let contracts_in = |wanted: ContractStatus| -> i64 {
            contract_counts
                .iter()
                .find(|(status, _)| *status == wanted)
                .map(|(_, count)| *count)
                .unwrap_or(0)
        };

        Ok(Dashboard {
            users: UserTotals {
                total: total_users,
                new_this_week: self.users.count_clients_since(&week_ago).await?,
                verified,
                verification_rate: rate(verified, total_users),
            },
            projects: ProjectTotals {
                total: total_projects,
                active: count_of(&[ProjectStatus::Approved, ProjectStatus::InProgress]),
                completed,
                new_this_week: self.projects.count_since(&week_ago).await?,
                completion_rate: rate(completed, total_projects),
            },
            revenue: RevenueTotals {
                total: self.payments.sum_amount(PaymentStatus::Succeeded, None).await?,
                last_30_days: self
                    .payments
                    .sum_amount(PaymentStatus::Succeeded, Some(&timestamp_days_ago(30)))
                    .await?,
                pending: self.payments.sum_amount(PaymentStatus::Pending, None).await?,
            },
            contracts: ContractTotals {
                active: contracts_in(ContractStatus::Active),
                awaiting_signature: contracts_in(ContractStatus::Sent),
            },
            alerts: Alerts {
                overdue_payments: self.payments.count_overdue(&today).await?,
                expired_contracts: self.contracts.count_lapsed(&today).await?,
            },
            recent_projects: self.projects.recent(RECENT_LIMIT).await?,
            recent_payments: self.payments.recent(None, RECENT_LIMIT).await?,
            recent_messages: self.messages.recent(None, RECENT_LIMIT).await?,
        })
    }

    /// Run one maintenance job on behalf of an admin.
    pub async fn cleanup(
        &self,
        actor: &Actor,
        kind: CleanupKind,
        days: Option<i64>,
    ) -> ServiceResult<CleanupReport> {
        actor.require_admin()?;
        let report = self.run(&[kind], days).await?;
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("system_cleanup", "system", "cleanup")
                    .new_values(serde_json::to_value(&report).unwrap_or_default()),
            )
            .await;
        Ok(report)
    }

    /// Run every maintenance job; used by the command line.
    pub async fn maintenance(&self, days: Option<i64>) -> ServiceResult<CleanupReport> {
        self.run(
            &[
                CleanupKind::Notifications,
                CleanupKind::Contracts,
                CleanupKind::Invoices,
            ],
            days,
        )
        .await
    }

    async fn run(&self, kinds: &[CleanupKind], days: Option<i64>) -> ServiceResult<CleanupReport> {
        let mut report = CleanupReport::default();
        for kind in kinds {
            match kind {
                CleanupKind::Notifications => {
                    let days = days.unwrap_or(DEFAULT_PURGE_DAYS);
                    if days < 0 {
                        return Err(ServiceError::validation("days cannot be negative"));
                    }
                    report.notifications_removed = Some(self.notifications.purge_read(days).await?);
                }
                CleanupKind::Contracts => {
                    report.contracts_expired = Some(self.contract_service.expire_overdue().await?);
                }
                CleanupKind::Invoices => {
                    report.invoices_overdue =
                        Some(self.payment_service.mark_overdue_invoices().await?);
                }
            }
        }
        info!(?report, "maintenance finished");
        Ok(report)
    }

    pub async fn broadcast(
        &self,
        actor: &Actor,
        role: Option<UserRole>,
        title: &str,
        message: &str,
    ) -> ServiceResult<BroadcastSummary> {
        let summary = self
            .notifications
            .broadcast(actor, role, title, message)
            .await?;
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("broadcast_sent", "notification", "broadcast").new_values(json!({
                    "title": title,
                    "role": role,
                    "recipients": summary.recipients,
                })),
            )
            .await;
        Ok(summary)
    }
}
