//! Allowed status successors for every lifecycle in the portal.

use portal_database::{ContractStatus, InvoiceStatus, PaymentStatus, ProjectStatus};

pub fn project_successors(from: ProjectStatus) -> &'static [ProjectStatus] {
    use ProjectStatus::*;
    match from {
        Submitted => &[Reviewing, Approved, Cancelled, OnHold],
        Reviewing => &[Approved, OnHold, Cancelled],
        Approved => &[InProgress, OnHold, Cancelled],
        InProgress => &[Review, Completed, OnHold, Cancelled],
        Review => &[InProgress, Completed],
        OnHold => &[Reviewing, Approved, InProgress, Cancelled],
        Completed | Cancelled => &[],
    }
}

pub fn project_transition_allowed(from: ProjectStatus, to: ProjectStatus) -> bool {
    project_successors(from).contains(&to)
}

pub fn contract_successors(from: ContractStatus) -> &'static [ContractStatus] {
    use ContractStatus::*;
    match from {
        Draft => &[Sent, Cancelled],
        Sent => &[Signed, Cancelled, Expired],
        Signed => &[Active, Cancelled],
        Active => &[Completed, Cancelled],
        Completed | Cancelled | Expired => &[],
    }
}

pub fn contract_transition_allowed(from: ContractStatus, to: ContractStatus) -> bool {
    contract_successors(from).contains(&to)
}

pub fn payment_successors(from: PaymentStatus) -> &'static [PaymentStatus] {
    use PaymentStatus::*;
    match from {
        Pending => &[Processing, Cancelled],
        Processing => &[Succeeded, Failed, Cancelled],
        Failed => &[Processing],
        Succeeded => &[Refunded],
        Refunded | Cancelled => &[],
    }
}

/// Statuses a payment may be in to move to `to`.
pub fn payment_predecessors(to: PaymentStatus) -> Vec<PaymentStatus> {
    PaymentStatus::ALL
        .iter()
        .copied()
        .filter(|from| payment_successors(*from).contains(&to))
        .collect()
}

pub fn invoice_successors(from: InvoiceStatus) -> &'static [InvoiceStatus] {
    use InvoiceStatus::*;
    match from {
        Draft => &[Sent, Cancelled],
        Sent => &[Paid, Overdue, Cancelled],
        Overdue => &[Paid],
        Paid | Cancelled => &[],
    }
}

pub fn invoice_transition_allowed(from: InvoiceStatus, to: InvoiceStatus) -> bool {
    invoice_successors(from).contains(&to)
}
