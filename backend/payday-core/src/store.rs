// src/store.rs
//
// In-memory persistence for the payroll core, one Arc<Mutex<..>> per
// collection. Multi-collection mutations (posting, reversal) are staged by
// their services outside the locks and applied in a single lock scope.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::model::{
    ApprovalTask, BalancePlan, CutoffPeriod, CutoffSchedule, CutoffStatus, EmployeePeriodLink,
    GovernmentPaymentRecord, PeriodId, PeriodTotals, PlanId, PlanLedgerEntry, SalaryRecord,
    ScheduleId, StatusHistoryEntry, TaskDecision,
};

#[derive(Clone, Default)]
pub struct PayrollStore {
    pub schedules: Arc<Mutex<HashMap<ScheduleId, CutoffSchedule>>>,
    pub periods: Arc<Mutex<HashMap<PeriodId, CutoffPeriod>>>,
    pub employee_links: Arc<Mutex<HashMap<String, EmployeePeriodLink>>>,
    pub salary_records: Arc<Mutex<HashMap<String, SalaryRecord>>>,
    pub plans: Arc<Mutex<HashMap<PlanId, BalancePlan>>>,
    pub deduction_ledger: Arc<Mutex<Vec<PlanLedgerEntry>>>,
    pub allowance_ledger: Arc<Mutex<Vec<PlanLedgerEntry>>>,
    pub government_records: Arc<Mutex<Vec<GovernmentPaymentRecord>>>,
    pub approval_tasks: Arc<Mutex<Vec<ApprovalTask>>>,
    pub history: Arc<Mutex<Vec<StatusHistoryEntry>>>,
}

impl PayrollStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Schedules ---

    pub fn upsert_schedule(&self, schedule: CutoffSchedule) {
        info!(
            "Storing schedule {} ({}) for company {}",
            schedule.id,
            schedule_kind_label(&schedule),
            schedule.company_id
        );
        self.schedules
            .lock()
            .unwrap()
            .insert(schedule.id.clone(), schedule);
    }

    pub fn schedule(&self, schedule_id: &str) -> Option<CutoffSchedule> {
        self.schedules.lock().unwrap().get(schedule_id).cloned()
    }

    // --- Period Store Synchronizer ---

    /// Persist generated periods: one batched existence probe over the
    /// candidate id set, then one bulk insert of the missing ids. Duplicate
    /// inserts (a concurrent run won the race) are skipped silently; the
    /// deterministic id is the uniqueness guard. Returns how many rows were
    /// actually inserted.
    pub fn sync_periods(&self, generated: Vec<CutoffPeriod>) -> usize {
        let candidate_ids: Vec<PeriodId> = generated.iter().map(|p| p.id.clone()).collect();
        let existing = self.existing_period_ids(&candidate_ids);
        let missing: Vec<CutoffPeriod> = generated
            .into_iter()
            .filter(|p| !existing.contains(&p.id))
            .collect();
        let inserted = self.insert_periods_skip_duplicates(missing);
        info!(
            "Period sync: {} candidates, {} already present, {} inserted",
            candidate_ids.len(),
            existing.len(),
            inserted
        );
        inserted
    }

    /// Single round-trip existence probe for a batch of period ids.
    pub fn existing_period_ids(&self, ids: &[PeriodId]) -> HashSet<PeriodId> {
        let periods = self.periods.lock().unwrap();
        ids.iter()
            .filter(|id| periods.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn insert_periods_skip_duplicates(&self, periods: Vec<CutoffPeriod>) -> usize {
        let mut guard = self.periods.lock().unwrap();
        let mut inserted = 0;
        for period in periods {
            match guard.entry(period.id.clone()) {
                std::collections::hash_map::Entry::Occupied(_) => {
                    debug!("Period {} already exists, skipping insert", period.id);
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(period);
                    inserted += 1;
                }
            }
        }
        inserted
    }

    // --- Periods ---

    pub fn period(&self, period_id: &str) -> Option<CutoffPeriod> {
        self.periods.lock().unwrap().get(period_id).cloned()
    }

    pub fn set_period_status(&self, period_id: &str, status: CutoffStatus) {
        if let Some(period) = self.periods.lock().unwrap().get_mut(period_id) {
            period.status = status;
        }
    }

    pub fn set_period_totals(&self, period_id: &str, totals: PeriodTotals) {
        if let Some(period) = self.periods.lock().unwrap().get_mut(period_id) {
            period.totals = Some(totals);
        }
    }

    // --- Employee period links and salary records ---

    pub fn add_employee_link(&self, link: EmployeePeriodLink) {
        self.employee_links
            .lock()
            .unwrap()
            .insert(link.id.clone(), link);
    }

    pub fn employee_link(&self, link_id: &str) -> Option<EmployeePeriodLink> {
        self.employee_links.lock().unwrap().get(link_id).cloned()
    }

    /// Links under a period, ordered by link id for reproducible batch runs.
    pub fn links_for_period(&self, period_id: &str) -> Vec<EmployeePeriodLink> {
        let mut links: Vec<EmployeePeriodLink> = self
            .employee_links
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.period_id == period_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| a.id.cmp(&b.id));
        links
    }

    pub fn attach_salary_record(&self, link_id: &str, record: SalaryRecord) {
        let record_id = record.id.clone();
        self.salary_records
            .lock()
            .unwrap()
            .insert(record_id.clone(), record);
        if let Some(link) = self.employee_links.lock().unwrap().get_mut(link_id) {
            link.salary_record_id = Some(record_id);
        }
    }

    pub fn salary_record(&self, record_id: &str) -> Option<SalaryRecord> {
        self.salary_records.lock().unwrap().get(record_id).cloned()
    }

    // --- Balance plans ---

    pub fn upsert_plan(&self, plan: BalancePlan) {
        self.plans.lock().unwrap().insert(plan.id.clone(), plan);
    }

    pub fn plan(&self, plan_id: &str) -> Option<BalancePlan> {
        self.plans.lock().unwrap().get(plan_id).cloned()
    }

    // --- Ledgers and government records ---

    pub fn ledger_entries_for_period(&self, period_id: &str) -> Vec<PlanLedgerEntry> {
        let mut entries: Vec<PlanLedgerEntry> = Vec::new();
        entries.extend(
            self.deduction_ledger
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.cutoff_period_id == period_id)
                .cloned(),
        );
        entries.extend(
            self.allowance_ledger
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.cutoff_period_id == period_id)
                .cloned(),
        );
        entries
    }

    pub fn government_records_for_period(&self, period_id: &str) -> Vec<GovernmentPaymentRecord> {
        self.government_records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.cutoff_period_id == period_id)
            .cloned()
            .collect()
    }

    pub fn has_government_records(&self, period_id: &str) -> bool {
        self.government_records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.cutoff_period_id == period_id)
    }

    // --- Approval tasks ---

    pub fn add_approval_tasks(&self, tasks: Vec<ApprovalTask>) {
        self.approval_tasks.lock().unwrap().extend(tasks);
    }

    pub fn open_tasks_for_period(&self, period_id: &str) -> Vec<ApprovalTask> {
        self.approval_tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.period_id == period_id && t.open)
            .cloned()
            .collect()
    }

    /// Close every open task for the period with the given decision; returns
    /// how many were closed.
    pub fn close_open_tasks(&self, period_id: &str, decision: TaskDecision) -> usize {
        let mut tasks = self.approval_tasks.lock().unwrap();
        let mut closed = 0;
        for task in tasks.iter_mut() {
            if task.period_id == period_id && task.open {
                task.open = false;
                task.decision = Some(decision);
                closed += 1;
            }
        }
        closed
    }

    // --- History ---

    pub fn add_history(&self, entry: StatusHistoryEntry) {
        self.history.lock().unwrap().push(entry);
    }

    pub fn history_for_period(&self, period_id: &str) -> Vec<StatusHistoryEntry> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.period_id == period_id)
            .cloned()
            .collect()
    }
}

fn schedule_kind_label(schedule: &CutoffSchedule) -> &'static str {
    match schedule.kind {
        crate::model::ScheduleKind::Monthly { .. } => "monthly",
        crate::model::ScheduleKind::Semimonthly { .. } => "semimonthly",
        crate::model::ScheduleKind::Weekly { .. } => "weekly",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduleKind;
    use crate::schedule::generate_periods;
    use chrono::NaiveDate;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    fn test_schedule() -> CutoffSchedule {
        CutoffSchedule {
            id: "S1".to_string(),
            company_id: "C1".to_string(),
            kind: ScheduleKind::Monthly { day_of_month: 15 },
            release_offset_days: 5,
            deleted: false,
        }
    }

    #[test]
    fn sync_inserts_generated_periods_once() {
        let store = PayrollStore::new();
        let schedule = test_schedule();
        let generated = generate_periods(&schedule, d("2024-03-10"), 10).unwrap();

        assert_eq!(store.sync_periods(generated.clone()), 10);
        // Second run against the same schedule is a no-op.
        assert_eq!(store.sync_periods(generated), 0);
        assert_eq!(store.periods.lock().unwrap().len(), 10);
    }

    #[test]
    fn sync_inserts_only_the_missing_subset() {
        let store = PayrollStore::new();
        let schedule = test_schedule();
        let generated = generate_periods(&schedule, d("2024-03-10"), 10).unwrap();

        store.sync_periods(generated[..4].to_vec());
        assert_eq!(store.sync_periods(generated), 6);
        assert_eq!(store.periods.lock().unwrap().len(), 10);
    }

    #[test]
    fn existence_probe_reports_only_known_ids() {
        let store = PayrollStore::new();
        let schedule = test_schedule();
        let generated = generate_periods(&schedule, d("2024-03-10"), 2).unwrap();
        let ids: Vec<String> = generated.iter().map(|p| p.id.clone()).collect();

        assert!(store.existing_period_ids(&ids).is_empty());
        store.sync_periods(generated);
        assert_eq!(store.existing_period_ids(&ids).len(), 2);
    }

    #[test]
    fn close_open_tasks_only_touches_the_period() {
        let store = PayrollStore::new();
        store.add_approval_tasks(vec![
            ApprovalTask {
                id: "T1".to_string(),
                period_id: "P1".to_string(),
                approver_id: "A1".to_string(),
                level: 1,
                open: true,
                decision: None,
            },
            ApprovalTask {
                id: "T2".to_string(),
                period_id: "P2".to_string(),
                approver_id: "A1".to_string(),
                level: 1,
                open: true,
                decision: None,
            },
        ]);

        assert_eq!(store.close_open_tasks("P1", TaskDecision::Superseded), 1);
        assert!(store.open_tasks_for_period("P1").is_empty());
        assert_eq!(store.open_tasks_for_period("P2").len(), 1);
    }
}
