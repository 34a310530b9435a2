// src/collaborators.rs
//
// Interfaces to the services the payroll core consumes but does not own:
// salary computation, the approver directory, notifications, and approval
// task email. All are injected at construction; tests substitute the
// recording doubles below instead of null-checking at runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{AccountId, ApprovalTask, CutoffPeriod, EmployeePeriodLink, SalaryRecord};

// --- Clock ---

/// Time source threaded through the core. Production wiring uses the system
/// clock; tests pin and advance it.
#[derive(Clone)]
pub struct Clock {
    fixed: Arc<Mutex<Option<NaiveDateTime>>>,
}

impl Clock {
    pub fn system() -> Self {
        Self {
            fixed: Arc::new(Mutex::new(None)),
        }
    }

    pub fn fixed(datetime_str: &str) -> Self {
        let dt = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
            .expect("Failed to parse datetime string in Clock::fixed");
        Self {
            fixed: Arc::new(Mutex::new(Some(dt))),
        }
    }

    pub fn set_time(&self, datetime_str: &str) {
        *self.fixed.lock().unwrap() =
            Some(
                NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
                    .expect("Failed to parse datetime string in Clock::set_time"),
            );
    }

    pub fn advance(&self, duration: Duration) {
        let mut guard = self.fixed.lock().unwrap();
        let base = guard.unwrap_or_else(|| Local::now().naive_local());
        *guard = Some(base + duration);
    }

    pub fn now(&self) -> NaiveDateTime {
        self.fixed
            .lock()
            .unwrap()
            .unwrap_or_else(|| Local::now().naive_local())
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

// --- Salary computation ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputationError {
    #[error("no computation available for employee-period link {0}")]
    NoComputation(String),
    #[error("salary computation failed: {0}")]
    Failed(String),
}

/// Black-box payroll math: given an employee-period link, produce the
/// itemized salary record. The core never looks inside the formulas.
#[async_trait]
pub trait SalaryComputation: Send + Sync {
    async fn compute(&self, link: &EmployeePeriodLink) -> Result<SalaryRecord, ComputationError>;
}

/// Test double returning pre-seeded records per link id.
#[derive(Clone, Default)]
pub struct FixedSalaryComputation {
    records: Arc<Mutex<HashMap<String, SalaryRecord>>>,
}

impl FixedSalaryComputation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, link_id: &str, record: SalaryRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(link_id.to_string(), record);
    }
}

#[async_trait]
impl SalaryComputation for FixedSalaryComputation {
    async fn compute(&self, link: &EmployeePeriodLink) -> Result<SalaryRecord, ComputationError> {
        self.records
            .lock()
            .unwrap()
            .get(&link.id)
            .cloned()
            .ok_or_else(|| ComputationError::NoComputation(link.id.clone()))
    }
}

// --- Approver directory ---

pub trait ApproverDirectory: Send + Sync {
    fn approvers_by_level(&self, company_id: &str, level: u32) -> Vec<AccountId>;
    /// Full chain, level → approver accounts, ascending by level.
    fn approval_chain(&self, company_id: &str) -> BTreeMap<u32, Vec<AccountId>>;
}

#[derive(Clone, Default)]
pub struct StaticApproverDirectory {
    chains: Arc<Mutex<HashMap<String, BTreeMap<u32, Vec<AccountId>>>>>,
}

impl StaticApproverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure_level(&self, company_id: &str, level: u32, approvers: &[&str]) {
        self.chains
            .lock()
            .unwrap()
            .entry(company_id.to_string())
            .or_default()
            .insert(level, approvers.iter().map(|a| a.to_string()).collect());
    }
}

impl ApproverDirectory for StaticApproverDirectory {
    fn approvers_by_level(&self, company_id: &str, level: u32) -> Vec<AccountId> {
        self.chains
            .lock()
            .unwrap()
            .get(company_id)
            .and_then(|chain| chain.get(&level).cloned())
            .unwrap_or_default()
    }

    fn approval_chain(&self, company_id: &str) -> BTreeMap<u32, Vec<AccountId>> {
        self.chains
            .lock()
            .unwrap()
            .get(company_id)
            .cloned()
            .unwrap_or_default()
    }
}

// --- Notifications ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    StatusChange,
    ApprovalRequest,
    ApprovalResult,
    PostingResult,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub sender_id: AccountId,
    pub recipient_ids: Vec<AccountId>,
    pub message: String,
    pub kind: NotificationKind,
    /// Id of the record the notification is about (the cutoff period).
    pub context_id: String,
}

/// Fire-and-forget delivery; implementations must never block or fail the
/// calling transition.
pub trait NotificationService: Send + Sync {
    fn send(&self, notification: Notification);
}

/// Production default until a delivery channel is wired up: log and move on.
#[derive(Clone, Default)]
pub struct LogNotificationService;

impl NotificationService for LogNotificationService {
    fn send(&self, notification: Notification) {
        info!(
            "Notification [{:?}] from {} to {:?} about {}: {}",
            notification.kind,
            notification.sender_id,
            notification.recipient_ids,
            notification.context_id,
            notification.message
        );
    }
}

#[derive(Debug, Default, Clone)]
pub struct NotificationCriteria {
    pub recipient_id: Option<String>,
    pub kind: Option<NotificationKind>,
    pub message_contains: Option<String>,
    pub context_id: Option<String>,
}

impl NotificationCriteria {
    fn matches(&self, notification: &Notification) -> bool {
        if let Some(recipient) = &self.recipient_id {
            if !notification.recipient_ids.iter().any(|r| r == recipient) {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if notification.kind != *kind {
                return false;
            }
        }
        if let Some(fragment) = &self.message_contains {
            if !notification.message.contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(context) = &self.context_id {
            if notification.context_id != *context {
                return false;
            }
        }
        true
    }
}

/// Recording double with the assertion helpers the workflow tests lean on.
#[derive(Clone, Default)]
pub struct RecordingNotificationService {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn count(&self, criteria: NotificationCriteria) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| criteria.matches(n))
            .count()
    }

    pub fn expect_notification(&self, criteria: NotificationCriteria) {
        assert!(
            self.sent.lock().unwrap().iter().any(|n| criteria.matches(n)),
            "Expected notification matching {:?} not found in {:?}",
            criteria,
            self.sent.lock().unwrap()
        );
    }

    pub fn expect_no_notification(&self, criteria: NotificationCriteria) {
        assert!(
            !self.sent.lock().unwrap().iter().any(|n| criteria.matches(n)),
            "Unexpected notification matching {:?} found in {:?}",
            criteria,
            self.sent.lock().unwrap()
        );
    }
}

impl NotificationService for RecordingNotificationService {
    fn send(&self, notification: Notification) {
        debug!("Recorded notification: {:?}", notification);
        self.sent.lock().unwrap().push(notification);
    }
}

// --- Approval task mail ---

/// Emails the human-facing approve/reject task to its assignee.
pub trait ApprovalMailer: Send + Sync {
    fn send_task(&self, task: &ApprovalTask, period: &CutoffPeriod);
}

#[derive(Clone, Default)]
pub struct LogApprovalMailer;

impl ApprovalMailer for LogApprovalMailer {
    fn send_task(&self, task: &ApprovalTask, period: &CutoffPeriod) {
        info!(
            "Approval task {} (level {}) mailed to {} for period {} ({} .. {})",
            task.id, task.level, task.approver_id, period.id, period.start_date, period.end_date
        );
    }
}

#[derive(Clone, Default)]
pub struct RecordingApprovalMailer {
    mailed: Arc<Mutex<Vec<ApprovalTask>>>,
}

impl RecordingApprovalMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mailed(&self) -> Vec<ApprovalTask> {
        self.mailed.lock().unwrap().clone()
    }

    pub fn mailed_to(&self, approver_id: &str) -> usize {
        self.mailed
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.approver_id == approver_id)
            .count()
    }
}

impl ApprovalMailer for RecordingApprovalMailer {
    fn send_task(&self, task: &ApprovalTask, _period: &CutoffPeriod) {
        self.mailed.lock().unwrap().push(task.clone());
    }
}
