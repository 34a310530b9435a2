// src/workflow.rs
//
// Cutoff Status Workflow: the finite state machine gating every operation on
// a cutoff period, plus the approval-chain traversal that drives
// PROCESSED → APPROVED. Status is the serialization point for posting and
// reversal: the ledger is only ever invoked from in here, and the status
// change commits only after the ledger call succeeds.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::collaborators::{
    ApprovalMailer, ApproverDirectory, Clock, Notification, NotificationKind, NotificationService,
};
use crate::model::{
    AccountId, ApprovalTask, CutoffPeriod, CutoffStatus, StatusHistoryEntry, TaskDecision,
};
use crate::posting::{LedgerError, PostingLedger, PostingOutcome, ReversalError};
use crate::store::PayrollStore;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("cutoff period {0} not found")]
    PeriodNotFound(String),
    #[error("action {action} is not allowed while period {period_id} is {status:?}")]
    InvalidTransition {
        period_id: String,
        status: CutoffStatus,
        action: &'static str,
    },
    #[error("approval tasks are still open for period {0}")]
    TasksStillOpen(String),
    #[error("no open approval task for {approver_id} on period {period_id}")]
    NoOpenTask {
        approver_id: String,
        period_id: String,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Reversal(#[from] ReversalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionAction {
    FinalizeTimekeeping,
    Submit,
    Approve,
    Reject,
    Resubmit,
    ReturnToTimekeeping,
    Post,
    Repost,
    OverrideApprove,
    OverrideReject,
}

/// What a transition produced: the updated period, and the ledger outcome
/// when the action ran the posting path.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub period: CutoffPeriod,
    pub posting: Option<PostingOutcome>,
}

#[derive(Clone)]
pub struct CutoffWorkflow {
    store: PayrollStore,
    ledger: PostingLedger,
    directory: Arc<dyn ApproverDirectory>,
    notifications: Arc<dyn NotificationService>,
    mailer: Arc<dyn ApprovalMailer>,
    clock: Clock,
}

impl CutoffWorkflow {
    pub fn new(
        store: PayrollStore,
        ledger: PostingLedger,
        directory: Arc<dyn ApproverDirectory>,
        notifications: Arc<dyn NotificationService>,
        mailer: Arc<dyn ApprovalMailer>,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            ledger,
            directory,
            notifications,
            mailer,
            clock,
        }
    }

    pub fn transition(
        &self,
        period_id: &str,
        action: TransitionAction,
        actor_id: &str,
        remarks: Option<String>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let period = self
            .store
            .period(period_id)
            .ok_or_else(|| WorkflowError::PeriodNotFound(period_id.to_string()))?;
        info!(
            "Transition {:?} requested on period {} ({:?}) by {}",
            action, period_id, period.status, actor_id
        );

        let posting = match action {
            TransitionAction::FinalizeTimekeeping => {
                self.finalize_timekeeping(&period, actor_id, remarks)?;
                None
            }
            TransitionAction::Submit => {
                self.submit(&period, actor_id, remarks)?;
                None
            }
            TransitionAction::Approve => {
                self.approve(&period, actor_id, remarks)?;
                None
            }
            TransitionAction::Reject => {
                self.reject(&period, actor_id, remarks)?;
                None
            }
            TransitionAction::Resubmit => {
                self.resubmit(&period, actor_id, remarks)?;
                None
            }
            TransitionAction::ReturnToTimekeeping => {
                self.return_to_timekeeping(&period, actor_id, remarks)?;
                None
            }
            TransitionAction::Post => Some(self.post(&period, actor_id, remarks)?),
            TransitionAction::Repost => Some(self.repost(&period, actor_id, remarks)?),
            TransitionAction::OverrideApprove => {
                self.manual_override(&period, actor_id, remarks, CutoffStatus::Approved)?;
                None
            }
            TransitionAction::OverrideReject => {
                self.manual_override(&period, actor_id, remarks, CutoffStatus::Rejected)?;
                None
            }
        };

        let updated = self
            .store
            .period(period_id)
            .ok_or_else(|| WorkflowError::PeriodNotFound(period_id.to_string()))?;
        Ok(TransitionOutcome {
            period: updated,
            posting,
        })
    }

    /// Recomputation is only legal while the period has not entered the
    /// approval outcome states.
    pub fn ensure_recompute_allowed(&self, period_id: &str) -> Result<(), WorkflowError> {
        let period = self
            .store
            .period(period_id)
            .ok_or_else(|| WorkflowError::PeriodNotFound(period_id.to_string()))?;
        match period.status {
            CutoffStatus::Timekeeping
            | CutoffStatus::Pending
            | CutoffStatus::Processed
            | CutoffStatus::Rejected => Ok(()),
            status => Err(WorkflowError::InvalidTransition {
                period_id: period_id.to_string(),
                status,
                action: "recompute",
            }),
        }
    }

    // --- Individual transitions ---

    fn finalize_timekeeping(
        &self,
        period: &CutoffPeriod,
        actor_id: &str,
        remarks: Option<String>,
    ) -> Result<(), WorkflowError> {
        if period.status != CutoffStatus::Timekeeping {
            return Err(self.invalid(period, "finalizeTimekeeping"));
        }
        self.commit_status(period, CutoffStatus::Pending, actor_id, 0, remarks);
        Ok(())
    }

    fn submit(
        &self,
        period: &CutoffPeriod,
        actor_id: &str,
        remarks: Option<String>,
    ) -> Result<(), WorkflowError> {
        match period.status {
            CutoffStatus::Pending => {}
            CutoffStatus::Processed => {
                // Re-initiating approval is only legal once the previous round
                // is fully closed out.
                if !self.store.open_tasks_for_period(&period.id).is_empty() {
                    return Err(WorkflowError::TasksStillOpen(period.id.clone()));
                }
            }
            _ => return Err(self.invalid(period, "submit")),
        }

        self.commit_status(period, CutoffStatus::Processed, actor_id, 0, remarks);
        self.open_approval_round(period, actor_id);
        Ok(())
    }

    fn approve(
        &self,
        period: &CutoffPeriod,
        actor_id: &str,
        remarks: Option<String>,
    ) -> Result<(), WorkflowError> {
        if period.status != CutoffStatus::Processed {
            return Err(self.invalid(period, "approve"));
        }
        let task = self.open_task_for(period, actor_id)?;

        // One approval satisfies the level; sibling tasks close as superseded.
        self.close_task(&task.id, TaskDecision::Approved);
        for sibling in self.store.open_tasks_for_period(&period.id) {
            if sibling.level == task.level {
                self.close_task(&sibling.id, TaskDecision::Superseded);
            }
        }

        let chain = self.directory.approval_chain(&period.company_id);
        let next_level = chain
            .range((task.level + 1)..)
            .find(|(_, approvers)| !approvers.is_empty())
            .map(|(level, _)| *level);

        match next_level {
            Some(level) => {
                info!(
                    "Period {} approved at level {} by {}; escalating to level {}",
                    period.id, task.level, actor_id, level
                );
                self.create_level_tasks(period, level);
                self.notify(
                    period,
                    actor_id,
                    NotificationKind::ApprovalRequest,
                    &format!(
                        "Cutoff {} awaits level {} approval",
                        period.id, level
                    ),
                );
            }
            None => {
                self.commit_status(period, CutoffStatus::Approved, actor_id, task.level, remarks);
            }
        }
        Ok(())
    }

    fn reject(
        &self,
        period: &CutoffPeriod,
        actor_id: &str,
        remarks: Option<String>,
    ) -> Result<(), WorkflowError> {
        if period.status != CutoffStatus::Processed {
            return Err(self.invalid(period, "reject"));
        }
        let task = self.open_task_for(period, actor_id)?;
        self.close_task(&task.id, TaskDecision::Rejected);
        self.store
            .close_open_tasks(&period.id, TaskDecision::Superseded);
        self.commit_status(period, CutoffStatus::Rejected, actor_id, task.level, remarks);
        Ok(())
    }

    fn resubmit(
        &self,
        period: &CutoffPeriod,
        actor_id: &str,
        remarks: Option<String>,
    ) -> Result<(), WorkflowError> {
        if period.status != CutoffStatus::Rejected {
            return Err(self.invalid(period, "resubmit"));
        }
        // Defensive sweep: rejection should have closed everything already.
        let stray = self
            .store
            .close_open_tasks(&period.id, TaskDecision::Superseded);
        if stray > 0 {
            warn!(
                "Resubmission of period {} closed {} stray open tasks",
                period.id, stray
            );
        }
        self.commit_status(
            period,
            CutoffStatus::Processed,
            actor_id,
            0,
            Some(remarks.unwrap_or_else(|| "resubmission".to_string())),
        );
        self.open_approval_round(period, actor_id);
        Ok(())
    }

    fn return_to_timekeeping(
        &self,
        period: &CutoffPeriod,
        actor_id: &str,
        remarks: Option<String>,
    ) -> Result<(), WorkflowError> {
        match period.status {
            CutoffStatus::Timekeeping
            | CutoffStatus::Pending
            | CutoffStatus::Processed
            | CutoffStatus::Rejected => {}
            _ => return Err(self.invalid(period, "returnToTimekeeping")),
        }
        self.store
            .close_open_tasks(&period.id, TaskDecision::Superseded);
        self.commit_status(period, CutoffStatus::Timekeeping, actor_id, 0, remarks);
        Ok(())
    }

    fn post(
        &self,
        period: &CutoffPeriod,
        actor_id: &str,
        remarks: Option<String>,
    ) -> Result<PostingOutcome, WorkflowError> {
        if period.status != CutoffStatus::Approved {
            return Err(self.invalid(period, "post"));
        }
        let outcome = self.ledger.post(&period.id, false)?;
        if outcome.success {
            self.commit_status(period, CutoffStatus::Posted, actor_id, 0, remarks);
        } else {
            warn!(
                "Posting of period {} reported {} failures; period stays {:?}",
                period.id,
                outcome.errors.len(),
                period.status
            );
            self.notify(
                period,
                actor_id,
                NotificationKind::PostingResult,
                &format!(
                    "Posting of cutoff {} failed for {} of {} employees",
                    period.id,
                    outcome.errors.len(),
                    outcome.errors.len() + outcome.processed_count
                ),
            );
        }
        Ok(outcome)
    }

    fn repost(
        &self,
        period: &CutoffPeriod,
        actor_id: &str,
        remarks: Option<String>,
    ) -> Result<PostingOutcome, WorkflowError> {
        if period.status != CutoffStatus::Posted {
            return Err(self.invalid(period, "repost"));
        }
        self.ledger.reverse(&period.id)?;
        let outcome = self.ledger.post(&period.id, true)?;
        // Status stays POSTED; the repost replaces the period's ledger effects.
        self.commit_status(
            period,
            CutoffStatus::Posted,
            actor_id,
            0,
            Some(remarks.unwrap_or_else(|| "repost".to_string())),
        );
        if !outcome.success {
            warn!(
                "Repost of period {} reported {} failures",
                period.id,
                outcome.errors.len()
            );
        }
        Ok(outcome)
    }

    fn manual_override(
        &self,
        period: &CutoffPeriod,
        actor_id: &str,
        remarks: Option<String>,
        target: CutoffStatus,
    ) -> Result<(), WorkflowError> {
        match period.status {
            CutoffStatus::Pending | CutoffStatus::Processed | CutoffStatus::Rejected => {}
            _ => {
                return Err(self.invalid(
                    period,
                    if target == CutoffStatus::Approved {
                        "overrideApprove"
                    } else {
                        "overrideReject"
                    },
                ))
            }
        }
        self.store
            .close_open_tasks(&period.id, TaskDecision::Superseded);
        // Level 0 marks the entry as a manual override, not a chain decision.
        self.commit_status(
            period,
            target,
            actor_id,
            0,
            Some(remarks.unwrap_or_else(|| "manual override".to_string())),
        );
        Ok(())
    }

    // --- Approval round plumbing ---

    /// The PENDING → PROCESSED trigger: create level-1 tasks for every
    /// configured level-1 approver and mail each one.
    fn open_approval_round(&self, period: &CutoffPeriod, actor_id: &str) {
        self.create_level_tasks(period, 1);
        self.notify(
            period,
            actor_id,
            NotificationKind::ApprovalRequest,
            &format!("Cutoff {} submitted for approval", period.id),
        );
    }

    fn create_level_tasks(&self, period: &CutoffPeriod, level: u32) {
        let approvers = self.directory.approvers_by_level(&period.company_id, level);
        if approvers.is_empty() {
            warn!(
                "No level {} approvers configured for company {}; period {} waits for manual override",
                level, period.company_id, period.id
            );
            return;
        }
        let tasks: Vec<ApprovalTask> = approvers
            .iter()
            .map(|approver_id| ApprovalTask {
                id: task_id(),
                period_id: period.id.clone(),
                approver_id: approver_id.clone(),
                level,
                open: true,
                decision: None,
            })
            .collect();
        for task in &tasks {
            self.mailer.send_task(task, period);
        }
        info!(
            "Created {} level {} approval tasks for period {}",
            tasks.len(),
            level,
            period.id
        );
        self.store.add_approval_tasks(tasks);
    }

    fn open_task_for(
        &self,
        period: &CutoffPeriod,
        approver_id: &str,
    ) -> Result<ApprovalTask, WorkflowError> {
        self.store
            .open_tasks_for_period(&period.id)
            .into_iter()
            .find(|t| t.approver_id == approver_id)
            .ok_or_else(|| WorkflowError::NoOpenTask {
                approver_id: approver_id.to_string(),
                period_id: period.id.clone(),
            })
    }

    fn close_task(&self, task_id: &str, decision: TaskDecision) {
        let mut tasks = self.store.approval_tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
            task.open = false;
            task.decision = Some(decision);
        }
    }

    // --- Shared side effects ---

    /// Write the status, append the audit row, and fan out the
    /// fire-and-forget notification. Called only after the guarded work for
    /// the transition has succeeded.
    fn commit_status(
        &self,
        period: &CutoffPeriod,
        to: CutoffStatus,
        actor_id: &str,
        approval_level: u32,
        remarks: Option<String>,
    ) {
        self.store.set_period_status(&period.id, to);
        self.store.add_history(StatusHistoryEntry {
            period_id: period.id.clone(),
            from: period.status,
            to,
            actor_id: actor_id.to_string(),
            approval_level,
            remarks,
            at: self.clock.now(),
        });
        self.notify(
            period,
            actor_id,
            NotificationKind::StatusChange,
            &format!("Cutoff {} moved to {:?}", period.id, to),
        );
    }

    fn notify(&self, period: &CutoffPeriod, sender_id: &str, kind: NotificationKind, message: &str) {
        let recipients = self.company_recipients(&period.company_id);
        if recipients.is_empty() {
            return;
        }
        self.notifications.send(Notification {
            sender_id: sender_id.to_string(),
            recipient_ids: recipients,
            message: message.to_string(),
            kind,
            context_id: period.id.clone(),
        });
    }

    /// Interested company users: everyone in the approval chain, deduped.
    fn company_recipients(&self, company_id: &str) -> Vec<AccountId> {
        let chain = self.directory.approval_chain(company_id);
        let unique: BTreeSet<AccountId> = chain.into_values().flatten().collect();
        unique.into_iter().collect()
    }

    fn invalid(&self, period: &CutoffPeriod, action: &'static str) -> WorkflowError {
        WorkflowError::InvalidTransition {
            period_id: period.id.clone(),
            status: period.status,
            action,
        }
    }
}

fn task_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("TASK-{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        NotificationCriteria, RecordingApprovalMailer, RecordingNotificationService,
        StaticApproverDirectory,
    };
    use crate::model::{BalancePlan, EmployeePeriodLink, PeriodType, SalaryRecord};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    struct Fixture {
        store: PayrollStore,
        workflow: CutoffWorkflow,
        notifications: RecordingNotificationService,
        mailer: RecordingApprovalMailer,
    }

    fn period_fixture(status: CutoffStatus) -> CutoffPeriod {
        CutoffPeriod {
            id: "P1".to_string(),
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

    /// Two-level approval chain: A1 at level 1, A2 at level 2.
    fn setup(status: CutoffStatus) -> Fixture {
        let store = PayrollStore::new();
        let clock = Clock::fixed("2024-03-16 08:00:00");
        let directory = StaticApproverDirectory::new();
        directory.configure_level("C1", 1, &["A1"]);
        directory.configure_level("C1", 2, &["A2"]);
        let notifications = RecordingNotificationService::new();
        let mailer = RecordingApprovalMailer::new();

        let ledger = PostingLedger::new(store.clone(), clock.clone());
        let workflow = CutoffWorkflow::new(
            store.clone(),
            ledger,
            Arc::new(directory),
            Arc::new(notifications.clone()),
            Arc::new(mailer.clone()),
            clock,
        );

        store
            .periods
            .lock()
            .unwrap()
            .insert("P1".to_string(), period_fixture(status));

        Fixture {
            store,
            workflow,
            notifications,
            mailer,
        }
    }

    fn seed_postable_employee(store: &PayrollStore) {
        store.upsert_plan(BalancePlan::deduction(
            "LOAN-E1",
            "E1",
            "Salary loan",
            dec!(2000.00),
        ));
        store.add_employee_link(EmployeePeriodLink {
            id: "L-E1".to_string(),
            employee_id: "E1".to_string(),
            period_id: "P1".to_string(),
            salary_record_id: None,
        });
        store.attach_salary_record(
            "L-E1",
            SalaryRecord::new("SR-E1", "E1", "P1")
                .deduction("LOAN-E1", dec!(500.00))
                .totals(dec!(20000.00), dec!(19500.00)),
        );
    }

    #[test]
    fn submit_opens_level_one_tasks_and_notifies() {
        let f = setup(CutoffStatus::Pending);
        let outcome = f
            .workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap();

        assert_eq!(outcome.period.status, CutoffStatus::Processed);
        let tasks = f.store.open_tasks_for_period("P1");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].approver_id, "A1");
        assert_eq!(tasks[0].level, 1);
        assert_eq!(f.mailer.mailed_to("A1"), 1);
        f.notifications.expect_notification(NotificationCriteria {
            kind: Some(NotificationKind::ApprovalRequest),
            context_id: Some("P1".to_string()),
            ..Default::default()
        });
        assert_eq!(
            f.notifications.count(NotificationCriteria {
                kind: Some(NotificationKind::StatusChange),
                context_id: Some("P1".to_string()),
                ..Default::default()
            }),
            1
        );
    }

    #[test]
    fn resubmitting_with_open_tasks_is_blocked() {
        let f = setup(CutoffStatus::Pending);
        f.workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap();
        let err = f
            .workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::TasksStillOpen(_)));
    }

    #[test]
    fn two_level_chain_approves_in_order() {
        let f = setup(CutoffStatus::Pending);
        f.workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap();

        // Level 1 approval escalates, it does not approve the period.
        let outcome = f
            .workflow
            .transition("P1", TransitionAction::Approve, "A1", None)
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Processed);
        let open = f.store.open_tasks_for_period("P1");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].approver_id, "A2");
        assert_eq!(open[0].level, 2);
        assert_eq!(f.mailer.mailed_to("A2"), 1);

        // Final level approves the period.
        let outcome = f
            .workflow
            .transition("P1", TransitionAction::Approve, "A2", None)
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Approved);
        assert!(f.store.open_tasks_for_period("P1").is_empty());

        let history = f.store.history_for_period("P1");
        let final_entry = history.last().unwrap();
        assert_eq!(final_entry.to, CutoffStatus::Approved);
        assert_eq!(final_entry.approval_level, 2);
    }

    #[test]
    fn level_one_rejection_never_creates_level_two_tasks() {
        let f = setup(CutoffStatus::Pending);
        f.workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap();

        let outcome = f
            .workflow
            .transition(
                "P1",
                TransitionAction::Reject,
                "A1",
                Some("numbers look off".to_string()),
            )
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Rejected);
        assert!(f.store.open_tasks_for_period("P1").is_empty());
        assert_eq!(f.mailer.mailed_to("A2"), 0);

        let history = f.store.history_for_period("P1");
        let last = history.last().unwrap();
        assert_eq!(last.to, CutoffStatus::Rejected);
        assert_eq!(last.approval_level, 1);
        assert_eq!(last.remarks.as_deref(), Some("numbers look off"));
    }

    #[test]
    fn approval_requires_an_open_task_for_the_actor() {
        let f = setup(CutoffStatus::Pending);
        f.workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap();
        let err = f
            .workflow
            .transition("P1", TransitionAction::Approve, "A2", None)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NoOpenTask { .. }));
    }

    #[test]
    fn rejected_period_can_be_resubmitted() {
        let f = setup(CutoffStatus::Pending);
        f.workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap();
        f.workflow
            .transition("P1", TransitionAction::Reject, "A1", None)
            .unwrap();

        let outcome = f
            .workflow
            .transition("P1", TransitionAction::Resubmit, "HR1", None)
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Processed);
        // A fresh level-1 round is open.
        let open = f.store.open_tasks_for_period("P1");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].level, 1);
        assert!(f
            .store
            .history_for_period("P1")
            .iter()
            .any(|h| h.remarks.as_deref() == Some("resubmission")));
    }

    #[test]
    fn manual_return_closes_tasks_from_any_pre_approved_state() {
        let f = setup(CutoffStatus::Pending);
        f.workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap();
        let outcome = f
            .workflow
            .transition("P1", TransitionAction::ReturnToTimekeeping, "HR1", None)
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Timekeeping);
        assert!(f.store.open_tasks_for_period("P1").is_empty());
    }

    #[test]
    fn finalize_timekeeping_moves_to_pending() {
        let f = setup(CutoffStatus::Timekeeping);
        let outcome = f
            .workflow
            .transition("P1", TransitionAction::FinalizeTimekeeping, "HR1", None)
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Pending);
    }

    #[test]
    fn manual_override_writes_level_zero_history() {
        let f = setup(CutoffStatus::Pending);
        f.workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap();
        let outcome = f
            .workflow
            .transition("P1", TransitionAction::OverrideApprove, "ADMIN", None)
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Approved);
        assert!(f.store.open_tasks_for_period("P1").is_empty());

        let last = f.store.history_for_period("P1").last().cloned().unwrap();
        assert_eq!(last.approval_level, 0);
        assert_eq!(last.remarks.as_deref(), Some("manual override"));
    }

    #[test]
    fn posting_from_approved_commits_the_status() {
        let f = setup(CutoffStatus::Approved);
        seed_postable_employee(&f.store);

        let outcome = f
            .workflow
            .transition("P1", TransitionAction::Post, "HR1", None)
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Posted);
        let posting = outcome.posting.unwrap();
        assert!(posting.success);
        assert_eq!(posting.processed_count, 1);
    }

    #[test]
    fn failed_posting_leaves_the_period_approved() {
        let f = setup(CutoffStatus::Approved);
        seed_postable_employee(&f.store);
        // Break the plan reference so the single employee fails.
        f.store.plans.lock().unwrap().clear();

        let outcome = f
            .workflow
            .transition("P1", TransitionAction::Post, "HR1", None)
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Approved);
        let posting = outcome.posting.unwrap();
        assert!(!posting.success);
        f.notifications.expect_notification(NotificationCriteria {
            kind: Some(NotificationKind::PostingResult),
            message_contains: Some("failed".to_string()),
            ..Default::default()
        });
    }

    #[test]
    fn repost_replaces_effects_and_keeps_posted_status() {
        let f = setup(CutoffStatus::Approved);
        seed_postable_employee(&f.store);
        f.workflow
            .transition("P1", TransitionAction::Post, "HR1", None)
            .unwrap();
        let rows = f.store.ledger_entries_for_period("P1").len();

        let outcome = f
            .workflow
            .transition("P1", TransitionAction::Repost, "HR1", None)
            .unwrap();
        assert_eq!(outcome.period.status, CutoffStatus::Posted);
        assert!(outcome.posting.unwrap().success);
        assert_eq!(f.store.ledger_entries_for_period("P1").len(), rows);
        assert_eq!(
            f.store.plan("LOAN-E1").unwrap().remaining_balance,
            dec!(1500.00)
        );
    }

    #[test]
    fn posting_is_refused_outside_approved() {
        let f = setup(CutoffStatus::Processed);
        let err = f
            .workflow
            .transition("P1", TransitionAction::Post, "HR1", None)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn every_transition_notifies_company_users() {
        let f = setup(CutoffStatus::Pending);
        f.workflow
            .transition("P1", TransitionAction::Submit, "HR1", None)
            .unwrap();
        f.notifications.expect_notification(NotificationCriteria {
            recipient_id: Some("A1".to_string()),
            kind: Some(NotificationKind::StatusChange),
            context_id: Some("P1".to_string()),
            ..Default::default()
        });
        f.notifications.expect_notification(NotificationCriteria {
            recipient_id: Some("A2".to_string()),
            kind: Some(NotificationKind::StatusChange),
            ..Default::default()
        });
    }

    #[test]
    fn recompute_gate_follows_the_status() {
        let f = setup(CutoffStatus::Processed);
        assert!(f.workflow.ensure_recompute_allowed("P1").is_ok());
        f.store.set_period_status("P1", CutoffStatus::Approved);
        assert!(f.workflow.ensure_recompute_allowed("P1").is_err());
    }
}
