// src/model.rs
//
// Core data types for the payroll period / ledger subsystem. Amounts are
// rust_decimal Decimals, dates are chrono NaiveDates. Tenancy is explicit:
// company_id travels on the records, never in ambient state.

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type CompanyId = String;
pub type EmployeeId = String;
pub type AccountId = String;
pub type ScheduleId = String;
pub type PeriodId = String;
pub type PlanId = String;

// --- Schedules ---

/// The recurring rule a tenant configures for its pay windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleKind {
    /// One period per month, ending on `day_of_month` (clamped to short months).
    Monthly { day_of_month: u32 },
    /// Two periods per month, ending on the two cutoff days.
    Semimonthly {
        first_cutoff_day: u32,
        last_cutoff_day: u32,
    },
    /// Trailing 7-day windows ending on `cutoff_weekday`.
    Weekly { cutoff_weekday: Weekday },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoffSchedule {
    pub id: ScheduleId,
    pub company_id: CompanyId,
    #[serde(flatten)]
    pub kind: ScheduleKind,
    /// Days from period end to the payment/release date.
    pub release_offset_days: u32,
    /// Soft-delete flag; deleted schedules refuse generation but keep periods.
    #[serde(default)]
    pub deleted: bool,
}

// --- Periods ---

/// Position of a window within its enclosing calendar month. Downstream
/// statutory splitting keys off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    First,
    Middle,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CutoffStatus {
    Timekeeping,
    Pending,
    Processed,
    Approved,
    Posted,
    Rejected,
}

/// Aggregate financial snapshot, filled in by computation and posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub gross: Decimal,
    pub total_deductions: Decimal,
    pub net: Decimal,
    pub employee_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoffPeriod {
    /// Deterministic: `{schedule_id}-{start:%Y%m%d}-{end:%Y%m%d}`.
    pub id: PeriodId,
    pub schedule_id: ScheduleId,
    pub company_id: CompanyId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub release_date: NaiveDate,
    pub period_type: PeriodType,
    pub status: CutoffStatus,
    pub totals: Option<PeriodTotals>,
    pub timekeeping_job_id: Option<String>,
    pub payroll_job_id: Option<String>,
    pub payslip_job_id: Option<String>,
}

/// One row per employee per period; the unit the posting ledger iterates over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeePeriodLink {
    pub id: String,
    pub employee_id: EmployeeId,
    pub period_id: PeriodId,
    /// Set once the external computation service produced a salary record.
    pub salary_record_id: Option<String>,
}

// --- Computed salary records (external computation output) ---

/// One itemized deduction or allowance line against a balance plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryLine {
    pub plan_id: PlanId,
    pub amount: Decimal,
    /// Set by the posting ledger; cleared again on reversal.
    pub posted: bool,
}

impl SalaryLine {
    pub fn new(plan_id: &str, amount: Decimal) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            amount,
            posted: false,
        }
    }
}

/// Statutory contribution amounts on a computed salary record. SSS carries
/// the employee/employer split; the others are employee-side amounts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatutoryAmounts {
    pub sss_employee_share: Decimal,
    pub sss_employer_share: Decimal,
    pub philhealth: Decimal,
    pub pagibig: Decimal,
    pub withholding_tax: Decimal,
    /// Monthly-basis amount the contributions were derived from.
    pub basis: Decimal,
}

impl StatutoryAmounts {
    pub fn sss_total(&self) -> Decimal {
        self.sss_employee_share + self.sss_employer_share
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryRecord {
    pub id: String,
    pub employee_id: EmployeeId,
    pub period_id: PeriodId,
    pub deduction_lines: Vec<SalaryLine>,
    pub allowance_lines: Vec<SalaryLine>,
    pub statutory: StatutoryAmounts,
    pub gross: Decimal,
    pub net: Decimal,
}

impl SalaryRecord {
    pub fn new(id: &str, employee_id: &str, period_id: &str) -> Self {
        Self {
            id: id.to_string(),
            employee_id: employee_id.to_string(),
            period_id: period_id.to_string(),
            deduction_lines: Vec::new(),
            allowance_lines: Vec::new(),
            statutory: StatutoryAmounts::default(),
            gross: Decimal::ZERO,
            net: Decimal::ZERO,
        }
    }

    pub fn deduction(mut self, plan_id: &str, amount: Decimal) -> Self {
        self.deduction_lines.push(SalaryLine::new(plan_id, amount));
        self
    }

    pub fn allowance(mut self, plan_id: &str, amount: Decimal) -> Self {
        self.allowance_lines.push(SalaryLine::new(plan_id, amount));
        self
    }

    pub fn statutory(mut self, statutory: StatutoryAmounts) -> Self {
        self.statutory = statutory;
        self
    }

    pub fn totals(mut self, gross: Decimal, net: Decimal) -> Self {
        self.gross = gross;
        self.net = net;
        self
    }
}

// --- Balance plans and ledgers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanFamily {
    /// Loan-style plan: balance decreases toward zero, then the plan closes.
    Deduction,
    /// Running credit: balance accumulates what has been granted.
    Allowance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancePlan {
    pub id: PlanId,
    pub employee_id: EmployeeId,
    pub family: PlanFamily,
    pub name: String,
    pub remaining_balance: Decimal,
    pub total_applied: Decimal,
    pub is_open: bool,
}

impl BalancePlan {
    pub fn deduction(id: &str, employee_id: &str, name: &str, balance: Decimal) -> Self {
        Self {
            id: id.to_string(),
            employee_id: employee_id.to_string(),
            family: PlanFamily::Deduction,
            name: name.to_string(),
            remaining_balance: balance,
            total_applied: Decimal::ZERO,
            is_open: true,
        }
    }

    pub fn allowance(id: &str, employee_id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            employee_id: employee_id.to_string(),
            family: PlanFamily::Allowance,
            name: name.to_string(),
            remaining_balance: Decimal::ZERO,
            total_applied: Decimal::ZERO,
            is_open: true,
        }
    }
}

/// Append-only ledger row. `cutoff_period_id` is mandatory: it is the sole
/// key the reversal engine scopes by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanLedgerEntry {
    pub id: String,
    pub plan_id: PlanId,
    pub cutoff_period_id: PeriodId,
    pub family: PlanFamily,
    pub amount: Decimal,
    pub before_balance: Decimal,
    pub after_balance: Decimal,
    pub note: String,
    pub posted_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContributionType {
    Sss,
    Philhealth,
    Pagibig,
    WithholdingTax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernmentPaymentRecord {
    pub id: String,
    pub employee_id: EmployeeId,
    pub cutoff_period_id: PeriodId,
    pub contribution: ContributionType,
    pub amount: Decimal,
    pub employee_share: Decimal,
    pub employer_share: Decimal,
    pub basis: Decimal,
    pub posted_at: NaiveDateTime,
}

// --- Approval workflow records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskDecision {
    Approved,
    Rejected,
    /// Closed without a decision (sibling approved first, resubmission sweep,
    /// or a manual override).
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub id: String,
    pub period_id: PeriodId,
    pub approver_id: AccountId,
    pub level: u32,
    pub open: bool,
    pub decision: Option<TaskDecision>,
}

/// Audit trail row written on every status transition. `approval_level` 0
/// marks manual overrides, distinguishing them from chain-driven entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub period_id: PeriodId,
    pub from: CutoffStatus,
    pub to: CutoffStatus,
    pub actor_id: AccountId,
    pub approval_level: u32,
    pub remarks: Option<String>,
    pub at: NaiveDateTime,
}
