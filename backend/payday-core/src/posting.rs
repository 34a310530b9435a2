// src/posting.rs
//
// Posting Ledger and Reversal Engine. Posting commits one employee at a time
// (failure isolation: a bad computation never blocks the rest of the run);
// reversal is all-or-nothing and scoped strictly to one cutoff period id.

use std::collections::HashMap;

use rand::{distributions::Alphanumeric, thread_rng, Rng};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collaborators::Clock;
use crate::model::{
    BalancePlan, ContributionType, CutoffStatus, EmployeePeriodLink, GovernmentPaymentRecord,
    PeriodTotals, PlanFamily, PlanId, PlanLedgerEntry, SalaryRecord,
};
use crate::store::PayrollStore;

// --- Errors ---

/// Call-level rejections: the batch never starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("cutoff period {0} not found")]
    PeriodNotFound(String),
    #[error("cutoff period {period_id} is {actual:?}; posting requires {required:?}")]
    InvalidStatus {
        period_id: String,
        actual: CutoffStatus,
        required: CutoffStatus,
    },
    #[error("cutoff period {0} already carries government payment records; reverse before posting again")]
    AlreadyPosted(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReversalError {
    #[error("cutoff period {0} not found")]
    PeriodNotFound(String),
    #[error("plan {plan_id} referenced by ledger entries of period {period_id} no longer exists")]
    PlanMissing { plan_id: String, period_id: String },
}

/// Per-employee failure reasons; the batch records them and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmployeePostingError {
    #[error("no computed salary record for employee {0}")]
    MissingSalaryRecord(String),
    #[error("deduction plan {0} not found")]
    DeductionPlanNotFound(String),
    #[error("plan {plan_id} is a {family:?} plan, not the expected {expected:?}")]
    PlanFamilyMismatch {
        plan_id: String,
        family: PlanFamily,
        expected: PlanFamily,
    },
    #[error("deduction plan {0} is closed")]
    PlanClosed(String),
    #[error("deduction plan {plan_id} balance {remaining} cannot absorb {amount}")]
    PlanOverdrawn {
        plan_id: String,
        remaining: Decimal,
        amount: Decimal,
    },
    #[error("allowance plan {0} not found")]
    AllowancePlanNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingCategory {
    Record,
    Deduction,
    Allowance,
    Loan,
    Government,
}

impl EmployeePostingError {
    pub fn category(&self) -> PostingCategory {
        match self {
            Self::MissingSalaryRecord(_) => PostingCategory::Record,
            Self::DeductionPlanNotFound(_) => PostingCategory::Deduction,
            Self::PlanFamilyMismatch { expected, .. } => match expected {
                PlanFamily::Deduction => PostingCategory::Deduction,
                PlanFamily::Allowance => PostingCategory::Allowance,
            },
            Self::PlanClosed(_) | Self::PlanOverdrawn { .. } => PostingCategory::Loan,
            Self::AllowancePlanNotFound(_) => PostingCategory::Allowance,
        }
    }
}

// --- Batch outcome ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostingFailure {
    pub employee_id: String,
    pub category: PostingCategory,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostingOutcome {
    pub success: bool,
    /// Employees whose transaction committed in this call.
    pub processed_count: usize,
    pub errors: Vec<PostingFailure>,
}

// --- Staged employee changeset ---

/// Everything one employee's posting will write, validated up front so the
/// apply step cannot fail halfway.
struct EmployeeChangeset {
    plans: HashMap<PlanId, BalancePlan>,
    deduction_entries: Vec<PlanLedgerEntry>,
    allowance_entries: Vec<PlanLedgerEntry>,
    government_records: Vec<GovernmentPaymentRecord>,
    record_id: String,
}

// --- Service ---

#[derive(Clone)]
pub struct PostingLedger {
    store: PayrollStore,
    clock: Clock,
}

impl PostingLedger {
    pub fn new(store: PayrollStore, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// Commit the period's computed salary records into the balance ledgers,
    /// one isolated transaction per employee. Per-employee failures land in
    /// the outcome; already-committed employees stay committed.
    pub fn post(&self, period_id: &str, is_reposting: bool) -> Result<PostingOutcome, LedgerError> {
        let period = self
            .store
            .period(period_id)
            .ok_or_else(|| LedgerError::PeriodNotFound(period_id.to_string()))?;

        let required = if is_reposting {
            CutoffStatus::Posted
        } else {
            CutoffStatus::Approved
        };
        if period.status != required {
            return Err(LedgerError::InvalidStatus {
                period_id: period_id.to_string(),
                actual: period.status,
                required,
            });
        }

        let links = self.store.links_for_period(period_id);

        // First-posting guard: if every employee under the period already
        // carries government payment records, this is an accidental double
        // post. Employees the guard finds records for are skipped below, so a
        // partially failed run can be re-invoked to pick up just the rest.
        let mut already_posted: Vec<String> = Vec::new();
        if !is_reposting {
            for record in self.store.government_records_for_period(period_id) {
                if !already_posted.contains(&record.employee_id) {
                    already_posted.push(record.employee_id.clone());
                }
            }
            if !links.is_empty()
                && links.iter().all(|l| already_posted.contains(&l.employee_id))
            {
                return Err(LedgerError::AlreadyPosted(period_id.to_string()));
            }
        }

        info!(
            "Posting period {} ({} employees, reposting={})",
            period_id,
            links.len(),
            is_reposting
        );

        let mut processed = 0usize;
        let mut errors: Vec<PostingFailure> = Vec::new();
        for link in &links {
            if already_posted.contains(&link.employee_id) {
                debug!(
                    "Employee {} already posted for period {}, skipping",
                    link.employee_id, period_id
                );
                continue;
            }
            match self.stage_employee(link, period_id) {
                Ok(changeset) => {
                    self.apply_employee(changeset);
                    processed += 1;
                }
                Err(err) => {
                    warn!(
                        "Posting failed for employee {} on period {}: {}",
                        link.employee_id, period_id, err
                    );
                    errors.push(PostingFailure {
                        employee_id: link.employee_id.clone(),
                        category: err.category(),
                        message: err.to_string(),
                    });
                }
            }
        }

        self.refresh_period_totals(period_id, &links);

        let success = errors.is_empty();
        info!(
            "Posting for period {} finished: {} committed, {} failed",
            period_id,
            processed,
            errors.len()
        );
        Ok(PostingOutcome {
            success,
            processed_count: processed,
            errors,
        })
    }

    /// Validate one employee's posting and stage every row it will write.
    fn stage_employee(
        &self,
        link: &EmployeePeriodLink,
        period_id: &str,
    ) -> Result<EmployeeChangeset, EmployeePostingError> {
        let record = link
            .salary_record_id
            .as_deref()
            .and_then(|id| self.store.salary_record(id))
            .ok_or_else(|| EmployeePostingError::MissingSalaryRecord(link.employee_id.clone()))?;

        let now = self.clock.now();
        let mut staged: HashMap<PlanId, BalancePlan> = HashMap::new();
        let mut deduction_entries = Vec::new();
        let mut allowance_entries = Vec::new();

        for line in record.deduction_lines.iter().filter(|l| !l.posted) {
            let plan = staged
                .get(&line.plan_id)
                .cloned()
                .or_else(|| self.store.plan(&line.plan_id))
                .ok_or_else(|| {
                    EmployeePostingError::DeductionPlanNotFound(line.plan_id.clone())
                })?;
            if plan.family != PlanFamily::Deduction {
                return Err(EmployeePostingError::PlanFamilyMismatch {
                    plan_id: plan.id.clone(),
                    family: plan.family,
                    expected: PlanFamily::Deduction,
                });
            }
            if !plan.is_open {
                return Err(EmployeePostingError::PlanClosed(plan.id.clone()));
            }
            if plan.remaining_balance < line.amount {
                return Err(EmployeePostingError::PlanOverdrawn {
                    plan_id: plan.id.clone(),
                    remaining: plan.remaining_balance,
                    amount: line.amount,
                });
            }

            let before = plan.remaining_balance;
            let after = before - line.amount;
            let mut updated = plan;
            updated.remaining_balance = after;
            updated.total_applied += line.amount;
            if after == Decimal::ZERO {
                updated.is_open = false;
            }
            deduction_entries.push(PlanLedgerEntry {
                id: ledger_id("DL"),
                plan_id: updated.id.clone(),
                cutoff_period_id: period_id.to_string(),
                family: PlanFamily::Deduction,
                amount: -line.amount,
                before_balance: before,
                after_balance: after,
                note: format!("{} applied for cutoff {}", updated.name, period_id),
                posted_at: now,
            });
            staged.insert(updated.id.clone(), updated);
        }

        for line in record.allowance_lines.iter().filter(|l| !l.posted) {
            let plan = staged
                .get(&line.plan_id)
                .cloned()
                .or_else(|| self.store.plan(&line.plan_id))
                .ok_or_else(|| {
                    EmployeePostingError::AllowancePlanNotFound(line.plan_id.clone())
                })?;
            if plan.family != PlanFamily::Allowance {
                return Err(EmployeePostingError::PlanFamilyMismatch {
                    plan_id: plan.id.clone(),
                    family: plan.family,
                    expected: PlanFamily::Allowance,
                });
            }

            let before = plan.remaining_balance;
            let after = before + line.amount;
            let mut updated = plan;
            updated.remaining_balance = after;
            updated.total_applied += line.amount;
            allowance_entries.push(PlanLedgerEntry {
                id: ledger_id("AL"),
                plan_id: updated.id.clone(),
                cutoff_period_id: period_id.to_string(),
                family: PlanFamily::Allowance,
                amount: line.amount,
                before_balance: before,
                after_balance: after,
                note: format!("{} granted for cutoff {}", updated.name, period_id),
                posted_at: now,
            });
            staged.insert(updated.id.clone(), updated);
        }

        let government_records =
            stage_government_records(&record, &link.employee_id, period_id, now);

        Ok(EmployeeChangeset {
            plans: staged,
            deduction_entries,
            allowance_entries,
            government_records,
            record_id: record.id,
        })
    }

    /// Write a validated changeset. Nothing here can fail, which is what
    /// makes the per-employee commit effectively transactional.
    fn apply_employee(&self, changeset: EmployeeChangeset) {
        {
            let mut plans = self.store.plans.lock().unwrap();
            for (plan_id, plan) in changeset.plans {
                plans.insert(plan_id, plan);
            }
        }
        self.store
            .deduction_ledger
            .lock()
            .unwrap()
            .extend(changeset.deduction_entries);
        self.store
            .allowance_ledger
            .lock()
            .unwrap()
            .extend(changeset.allowance_entries);
        self.store
            .government_records
            .lock()
            .unwrap()
            .extend(changeset.government_records);

        if let Some(record) = self
            .store
            .salary_records
            .lock()
            .unwrap()
            .get_mut(&changeset.record_id)
        {
            for line in record
                .deduction_lines
                .iter_mut()
                .chain(record.allowance_lines.iter_mut())
            {
                line.posted = true;
            }
        }
    }

    /// Undo every ledger effect of one period's posting, atomically. The
    /// restoration sums only entries tagged with this period id; balances end
    /// up bit-for-bit where they were before the posting, no matter what
    /// other periods have done to the same plans since.
    pub fn reverse(&self, period_id: &str) -> Result<(), ReversalError> {
        if self.store.period(period_id).is_none() {
            return Err(ReversalError::PeriodNotFound(period_id.to_string()));
        }

        let entries = self.store.ledger_entries_for_period(period_id);

        // Stage: per-plan signed and absolute sums, validating every plan
        // still exists before anything is touched.
        let mut per_plan: HashMap<PlanId, (Decimal, Decimal)> = HashMap::new();
        for entry in &entries {
            let slot = per_plan
                .entry(entry.plan_id.clone())
                .or_insert((Decimal::ZERO, Decimal::ZERO));
            slot.0 += entry.amount;
            slot.1 += entry.amount.abs();
        }

        let mut restored: Vec<BalancePlan> = Vec::with_capacity(per_plan.len());
        for (plan_id, (signed_sum, abs_sum)) in &per_plan {
            let mut plan =
                self.store
                    .plan(plan_id)
                    .ok_or_else(|| ReversalError::PlanMissing {
                        plan_id: plan_id.clone(),
                        period_id: period_id.to_string(),
                    })?;
            plan.remaining_balance -= *signed_sum;
            plan.total_applied -= *abs_sum;
            if plan.family == PlanFamily::Deduction
                && !plan.is_open
                && plan.remaining_balance > Decimal::ZERO
            {
                plan.is_open = true;
            }
            restored.push(plan);
        }

        // Apply: delete period-scoped rows, restore plans, clear posted flags.
        let government_removed = {
            let mut records = self.store.government_records.lock().unwrap();
            let before = records.len();
            records.retain(|r| r.cutoff_period_id != period_id);
            before - records.len()
        };
        self.store
            .deduction_ledger
            .lock()
            .unwrap()
            .retain(|e| e.cutoff_period_id != period_id);
        self.store
            .allowance_ledger
            .lock()
            .unwrap()
            .retain(|e| e.cutoff_period_id != period_id);
        {
            let mut plans = self.store.plans.lock().unwrap();
            for plan in restored {
                plans.insert(plan.id.clone(), plan);
            }
        }
        {
            let mut records = self.store.salary_records.lock().unwrap();
            for record in records.values_mut() {
                if record.period_id == period_id {
                    for line in record
                        .deduction_lines
                        .iter_mut()
                        .chain(record.allowance_lines.iter_mut())
                    {
                        line.posted = false;
                    }
                }
            }
        }

        info!(
            "Reversed period {}: {} ledger entries and {} government records removed, {} plans restored",
            period_id,
            entries.len(),
            government_removed,
            per_plan.len()
        );
        Ok(())
    }

    /// Refresh the period's aggregate snapshot from the stored salary records.
    fn refresh_period_totals(&self, period_id: &str, links: &[EmployeePeriodLink]) {
        let mut gross = Decimal::ZERO;
        let mut net = Decimal::ZERO;
        let mut employee_count = 0u32;
        for link in links {
            if let Some(record) = link
                .salary_record_id
                .as_deref()
                .and_then(|id| self.store.salary_record(id))
            {
                gross += record.gross;
                net += record.net;
                employee_count += 1;
            }
        }
        self.store.set_period_totals(
            period_id,
            PeriodTotals {
                gross,
                total_deductions: gross - net,
                net,
                employee_count,
            },
        );
    }
}

fn stage_government_records(
    record: &SalaryRecord,
    employee_id: &str,
    period_id: &str,
    now: chrono::NaiveDateTime,
) -> Vec<GovernmentPaymentRecord> {
    let statutory = &record.statutory;
    let mut records = Vec::new();

    let mut push = |contribution: ContributionType,
                    amount: Decimal,
                    employee_share: Decimal,
                    employer_share: Decimal| {
        if amount != Decimal::ZERO {
            records.push(GovernmentPaymentRecord {
                id: ledger_id("GOV"),
                employee_id: employee_id.to_string(),
                cutoff_period_id: period_id.to_string(),
                contribution,
                amount,
                employee_share,
                employer_share,
                basis: statutory.basis,
                posted_at: now,
            });
        }
    };

    // SSS is the one contribution carrying an employer sub-breakdown.
    push(
        ContributionType::Sss,
        statutory.sss_total(),
        statutory.sss_employee_share,
        statutory.sss_employer_share,
    );
    push(
        ContributionType::Philhealth,
        statutory.philhealth,
        statutory.philhealth,
        Decimal::ZERO,
    );
    push(
        ContributionType::Pagibig,
        statutory.pagibig,
        statutory.pagibig,
        Decimal::ZERO,
    );
    push(
        ContributionType::WithholdingTax,
        statutory.withholding_tax,
        statutory.withholding_tax,
        Decimal::ZERO,
    );

    records
}

fn ledger_id(prefix: &str) -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("{}-{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CutoffPeriod, EmployeePeriodLink, PeriodType, SalaryRecord, StatutoryAmounts,
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    fn period_fixture(id: &str, status: CutoffStatus) -> CutoffPeriod {
        CutoffPeriod {
            id: id.to_string(),
            schedule_id: "S1".to_string(),
            company_id: "C1".to_string(),
            start_date: d("2024-02-16"),
            end_date: d("2024-03-15"),
            release_date: d("2024-03-20"),
            period_type: PeriodType::Last,
            status,
            totals: None,
            timekeeping_job_id: None,
            payroll_job_id: None,
            payslip_job_id: None,
        }
    }

    fn statutory_fixture() -> StatutoryAmounts {
        StatutoryAmounts {
            sss_employee_share: dec!(495.00),
            sss_employer_share: dec!(1005.00),
            philhealth: dec!(450.00),
            pagibig: dec!(100.00),
            withholding_tax: dec!(1875.50),
            basis: dec!(30000.00),
        }
    }

    struct Fixture {
        store: PayrollStore,
        ledger: PostingLedger,
    }

    /// One approved period with two employees: E1 paying down a loan and
    /// receiving an allowance, E2 paying down its own loan.
    fn setup() -> Fixture {
        let store = PayrollStore::new();
        let clock = Clock::fixed("2024-03-16 08:00:00");
        let ledger = PostingLedger::new(store.clone(), clock);

        store
            .periods
            .lock()
            .unwrap()
            .insert("P1".to_string(), period_fixture("P1", CutoffStatus::Approved));

        store.upsert_plan(BalancePlan::deduction(
            "LOAN-E1",
            "E1",
            "Salary loan",
            dec!(5000.00),
        ));
        store.upsert_plan(BalancePlan::allowance("ALW-E1", "E1", "Rice subsidy"));
        store.upsert_plan(BalancePlan::deduction(
            "LOAN-E2",
            "E2",
            "Calamity loan",
            dec!(1000.00),
        ));

        store.add_employee_link(EmployeePeriodLink {
            id: "L-E1".to_string(),
            employee_id: "E1".to_string(),
            period_id: "P1".to_string(),
            salary_record_id: None,
        });
        store.add_employee_link(EmployeePeriodLink {
            id: "L-E2".to_string(),
            employee_id: "E2".to_string(),
            period_id: "P1".to_string(),
            salary_record_id: None,
        });

        store.attach_salary_record(
            "L-E1",
            SalaryRecord::new("SR-E1", "E1", "P1")
                .deduction("LOAN-E1", dec!(1500.00))
                .allowance("ALW-E1", dec!(750.00))
                .statutory(statutory_fixture())
                .totals(dec!(30000.00), dec!(24579.50)),
        );
        store.attach_salary_record(
            "L-E2",
            SalaryRecord::new("SR-E2", "E2", "P1")
                .deduction("LOAN-E2", dec!(1000.00))
                .statutory(StatutoryAmounts {
                    basis: dec!(18000.00),
                    philhealth: dec!(270.00),
                    ..StatutoryAmounts::default()
                })
                .totals(dec!(18000.00), dec!(16730.00)),
        );

        Fixture { store, ledger }
    }

    #[test]
    fn posting_updates_plans_ledgers_and_government_records() {
        let f = setup();
        let outcome = f.ledger.post("P1", false).unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.processed_count, 2);
        assert!(outcome.errors.is_empty());

        let loan = f.store.plan("LOAN-E1").unwrap();
        assert_eq!(loan.remaining_balance, dec!(3500.00));
        assert_eq!(loan.total_applied, dec!(1500.00));
        assert!(loan.is_open);

        let allowance = f.store.plan("ALW-E1").unwrap();
        assert_eq!(allowance.remaining_balance, dec!(750.00));

        // E1 posts 4 government rows (SSS with split + 3 others), E2 only
        // PhilHealth: zero contributions produce no rows.
        let gov = f.store.government_records_for_period("P1");
        assert_eq!(gov.len(), 5);
        let sss = gov
            .iter()
            .find(|r| r.contribution == ContributionType::Sss)
            .unwrap();
        assert_eq!(sss.amount, dec!(1500.00));
        assert_eq!(sss.employee_share, dec!(495.00));
        assert_eq!(sss.employer_share, dec!(1005.00));
        assert_eq!(sss.basis, dec!(30000.00));

        // Every committed line is flagged posted.
        let record = f.store.salary_record("SR-E1").unwrap();
        assert!(record
            .deduction_lines
            .iter()
            .chain(record.allowance_lines.iter())
            .all(|l| l.posted));

        let totals = f.store.period("P1").unwrap().totals.unwrap();
        assert_eq!(totals.gross, dec!(48000.00));
        assert_eq!(totals.net, dec!(41309.50));
        assert_eq!(totals.employee_count, 2);
    }

    #[test]
    fn ledger_entries_chain_before_and_after_balances() {
        let f = setup();
        // Second deduction against the same plan in a later period.
        f.store
            .periods
            .lock()
            .unwrap()
            .insert("P2".to_string(), period_fixture("P2", CutoffStatus::Approved));
        f.store.add_employee_link(EmployeePeriodLink {
            id: "L2-E1".to_string(),
            employee_id: "E1".to_string(),
            period_id: "P2".to_string(),
            salary_record_id: None,
        });
        f.store.attach_salary_record(
            "L2-E1",
            SalaryRecord::new("SR2-E1", "E1", "P2").deduction("LOAN-E1", dec!(1500.00)),
        );

        f.ledger.post("P1", false).unwrap();
        f.ledger.post("P2", false).unwrap();

        let entries: Vec<PlanLedgerEntry> = f
            .store
            .deduction_ledger
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.plan_id == "LOAN-E1")
            .cloned()
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].before_balance, dec!(5000.00));
        assert_eq!(entries[0].after_balance, dec!(3500.00));
        assert_eq!(entries[1].before_balance, entries[0].after_balance);
        assert_eq!(entries[1].after_balance, dec!(2000.00));
    }

    #[test]
    fn posting_requires_approved_status() {
        let f = setup();
        f.store.set_period_status("P1", CutoffStatus::Processed);
        let err = f.ledger.post("P1", false).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStatus { .. }));
    }

    #[test]
    fn posting_unknown_period_is_not_found() {
        let f = setup();
        assert_eq!(
            f.ledger.post("NOPE", false),
            Err(LedgerError::PeriodNotFound("NOPE".to_string()))
        );
    }

    #[test]
    fn double_posting_without_reversal_is_rejected() {
        let f = setup();
        f.ledger.post("P1", false).unwrap();
        // Even with the status forced back, the government-record guard holds.
        f.store.set_period_status("P1", CutoffStatus::Approved);
        assert_eq!(
            f.ledger.post("P1", false),
            Err(LedgerError::AlreadyPosted("P1".to_string()))
        );
    }

    #[test]
    fn failed_employee_is_isolated_from_the_batch() {
        let f = setup();
        // Malform E1's computation: its deduction references a missing plan.
        f.store.attach_salary_record(
            "L-E1",
            SalaryRecord::new("SR-E1", "E1", "P1").deduction("LOAN-GONE", dec!(100.00)),
        );

        let outcome = f.ledger.post("P1", false).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.processed_count, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].employee_id, "E1");
        assert_eq!(outcome.errors[0].category, PostingCategory::Deduction);

        // E2 committed durably despite E1's failure.
        assert_eq!(
            f.store.plan("LOAN-E2").unwrap().remaining_balance,
            dec!(0.00)
        );
        // E1 wrote nothing.
        assert!(f
            .store
            .government_records_for_period("P1")
            .iter()
            .all(|r| r.employee_id == "E2"));
    }

    #[test]
    fn reinvoking_after_partial_failure_picks_up_only_the_failed_subset() {
        let f = setup();
        f.store.attach_salary_record(
            "L-E1",
            SalaryRecord::new("SR-E1", "E1", "P1")
                .deduction("LOAN-GONE", dec!(100.00))
                .statutory(statutory_fixture()),
        );
        let first = f.ledger.post("P1", false).unwrap();
        assert!(!first.success);

        // Operator fixes the computation and re-invokes posting.
        f.store.attach_salary_record(
            "L-E1",
            SalaryRecord::new("SR-E1", "E1", "P1")
                .deduction("LOAN-E1", dec!(1500.00))
                .statutory(statutory_fixture()),
        );
        let second = f.ledger.post("P1", false).unwrap();
        assert!(second.success);
        assert_eq!(second.processed_count, 1);

        // E2 was not double-posted.
        assert_eq!(f.store.plan("LOAN-E2").unwrap().remaining_balance, dec!(0));
        assert_eq!(
            f.store
                .government_records_for_period("P1")
                .iter()
                .filter(|r| r.employee_id == "E2")
                .count(),
            1
        );
    }

    #[test]
    fn plan_reaching_zero_closes() {
        let f = setup();
        f.ledger.post("P1", false).unwrap();
        let plan = f.store.plan("LOAN-E2").unwrap();
        assert_eq!(plan.remaining_balance, dec!(0.00));
        assert!(!plan.is_open);
    }

    #[test]
    fn overdrawing_a_plan_fails_that_employee() {
        let f = setup();
        f.store.attach_salary_record(
            "L-E2",
            SalaryRecord::new("SR-E2", "E2", "P1").deduction("LOAN-E2", dec!(2500.00)),
        );
        let outcome = f.ledger.post("P1", false).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.errors[0].employee_id, "E2");
        assert_eq!(outcome.errors[0].category, PostingCategory::Loan);
        // Balance untouched.
        assert_eq!(
            f.store.plan("LOAN-E2").unwrap().remaining_balance,
            dec!(1000.00)
        );
    }

    #[test]
    fn reversal_restores_plans_exactly_and_clears_scoped_rows() {
        let f = setup();
        f.ledger.post("P1", false).unwrap();
        assert!(!f.store.plan("LOAN-E2").unwrap().is_open);

        f.ledger.reverse("P1").unwrap();

        let loan_e1 = f.store.plan("LOAN-E1").unwrap();
        assert_eq!(loan_e1.remaining_balance, dec!(5000.00));
        assert_eq!(loan_e1.total_applied, dec!(0.00));
        assert!(loan_e1.is_open);

        // The plan the posting closed is reopened.
        let loan_e2 = f.store.plan("LOAN-E2").unwrap();
        assert_eq!(loan_e2.remaining_balance, dec!(1000.00));
        assert!(loan_e2.is_open);

        let allowance = f.store.plan("ALW-E1").unwrap();
        assert_eq!(allowance.remaining_balance, dec!(0.00));
        assert_eq!(allowance.total_applied, dec!(0.00));

        assert!(f.store.ledger_entries_for_period("P1").is_empty());
        assert!(f.store.government_records_for_period("P1").is_empty());

        // Posted flags cleared so a fresh posting treats lines as pending.
        let record = f.store.salary_record("SR-E1").unwrap();
        assert!(record
            .deduction_lines
            .iter()
            .chain(record.allowance_lines.iter())
            .all(|l| !l.posted));
    }

    #[test]
    fn reversal_is_scoped_to_one_period() {
        let f = setup();
        f.store
            .periods
            .lock()
            .unwrap()
            .insert("P2".to_string(), period_fixture("P2", CutoffStatus::Approved));
        f.store.add_employee_link(EmployeePeriodLink {
            id: "L2-E1".to_string(),
            employee_id: "E1".to_string(),
            period_id: "P2".to_string(),
            salary_record_id: None,
        });
        f.store.attach_salary_record(
            "L2-E1",
            SalaryRecord::new("SR2-E1", "E1", "P2").deduction("LOAN-E1", dec!(500.00)),
        );

        f.ledger.post("P1", false).unwrap();
        f.ledger.post("P2", false).unwrap();
        assert_eq!(
            f.store.plan("LOAN-E1").unwrap().remaining_balance,
            dec!(3000.00)
        );

        // Reversing P1 takes back exactly P1's 1500, leaving P2's 500 applied.
        f.ledger.reverse("P1").unwrap();
        let loan = f.store.plan("LOAN-E1").unwrap();
        assert_eq!(loan.remaining_balance, dec!(4500.00));
        assert_eq!(loan.total_applied, dec!(500.00));
        assert_eq!(f.store.ledger_entries_for_period("P2").len(), 1);
    }

    #[test]
    fn repost_produces_the_same_row_count_as_a_fresh_posting() {
        let f = setup();
        f.ledger.post("P1", false).unwrap();
        let fresh_entries = f.store.ledger_entries_for_period("P1").len();
        let fresh_gov = f.store.government_records_for_period("P1").len();
        f.store.set_period_status("P1", CutoffStatus::Posted);

        // Repost = reverse + post with reposting semantics.
        f.ledger.reverse("P1").unwrap();
        let outcome = f.ledger.post("P1", true).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.processed_count, 2);
        assert_eq!(f.store.ledger_entries_for_period("P1").len(), fresh_entries);
        assert_eq!(f.store.government_records_for_period("P1").len(), fresh_gov);
    }

    #[test]
    fn reversal_missing_plan_aborts_without_mutation() {
        let f = setup();
        f.ledger.post("P1", false).unwrap();
        f.store.plans.lock().unwrap().remove("LOAN-E1");

        let err = f.ledger.reverse("P1").unwrap_err();
        assert!(matches!(err, ReversalError::PlanMissing { .. }));

        // Nothing was deleted or restored: the ledger rows are still there.
        assert!(!f.store.ledger_entries_for_period("P1").is_empty());
        assert!(!f.store.government_records_for_period("P1").is_empty());
        assert_eq!(
            f.store.plan("LOAN-E2").unwrap().remaining_balance,
            dec!(0.00)
        );
    }
}
