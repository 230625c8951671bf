//! Submission statuses, reviewer roles and the legal transition graph
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result, WorkflowError};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    #[n(0)]
    Draft,
    #[n(1)]
    Pending,
    #[n(2)]
    DeptHeadPending,
    #[n(3)]
    DeptHeadRecommended,
    #[n(4)]
    DeptHeadNotRecommended,
    #[n(5)]
    NeedsMoreInfo,
    #[n(6)]
    Approved,
    #[n(7)]
    Rejected,
    #[n(8)]
    AdminClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Applicant,
    DeptHead,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Submit,
    Recommend,
    Approve,
    Reject,
    RequestRevision,
    Close,
    Reopen,
    Retire,
    RecordPayment,
    ManageBudgets,
}

/// Caller identity resolved by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
    pub fn applicant(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Applicant)
    }
    pub fn dept_head(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::DeptHead)
    }
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }
}

pub const ALL_STATUSES: [Status; 9] = [
    Status::Draft,
    Status::Pending,
    Status::DeptHeadPending,
    Status::DeptHeadRecommended,
    Status::DeptHeadNotRecommended,
    Status::NeedsMoreInfo,
    Status::Approved,
    Status::Rejected,
    Status::AdminClosed,
];

const ADMIN_REVIEWABLE: &[Status] = &[
    Status::Pending,
    Status::Draft,
    Status::DeptHeadPending,
    Status::DeptHeadRecommended,
];
const HEAD_REVIEWABLE: &[Status] = &[Status::DeptHeadPending];
const SUBMITTABLE: &[Status] = &[Status::Draft, Status::NeedsMoreInfo];
const CLOSABLE: &[Status] = &[Status::Approved];
const REOPENABLE: &[Status] = &[Status::AdminClosed];
const RETIRABLE: &[Status] = &[Status::Draft];

// (code, legacy numeric id, aliases accepted at the boundary)
const STATUS_CODES: [(Status, &str, u32, &[&str]); 9] = [
    (Status::Pending, "pending", 0, &["0", "อยู่ระหว่างการพิจารณา"]),
    (Status::Approved, "approved", 1, &["1", "อนุมัติ"]),
    (Status::Rejected, "rejected", 2, &["2", "ปฏิเสธ", "dept_head_rejected"]),
    (
        Status::NeedsMoreInfo,
        "needs_more_info",
        3,
        &["3", "revision", "ต้องการข้อมูลเพิ่มเติม"],
    ),
    (Status::Draft, "draft", 4, &["4", "ร่าง"]),
    (
        Status::DeptHeadPending,
        "dept_head_pending",
        5,
        &["5", "department_pending", "อยู่ระหว่างการพิจารณาจากหัวหน้าสาขา"],
    ),
    (Status::AdminClosed, "admin_closed", 6, &["6", "closed", "ปิดทุน"]),
    (
        Status::DeptHeadRecommended,
        "dept_head_recommended",
        7,
        &["dept_head_recommend"],
    ),
    (
        Status::DeptHeadNotRecommended,
        "dept_head_not_recommended",
        8,
        &[],
    ),
];

impl Status {
    pub fn code(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Pending => "pending",
            Status::DeptHeadPending => "dept_head_pending",
            Status::DeptHeadRecommended => "dept_head_recommended",
            Status::DeptHeadNotRecommended => "dept_head_not_recommended",
            Status::NeedsMoreInfo => "needs_more_info",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::AdminClosed => "admin_closed",
        }
    }

    /// Resolves a symbolic code, a legacy numeric code or a known alias.
    pub fn from_code(code: &str) -> Option<Status> {
        let key = code.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }
        STATUS_CODES
            .iter()
            .find(|(_, canonical, _, aliases)| *canonical == key || aliases.contains(&key.as_str()))
            .map(|(status, ..)| *status)
    }

    pub fn is_closed(&self) -> bool {
        *self == Status::AdminClosed
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Submit => "submit",
            Action::Recommend => "recommend",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::RequestRevision => "request revision for",
            Action::Close => "close",
            Action::Reopen => "reopen",
            Action::Retire => "retire",
            Action::RecordPayment => "record payments",
            Action::ManageBudgets => "manage budgets",
        }
    }

    /// What a caller is refused when their role may not perform the action.
    pub fn permission(&self) -> String {
        match self {
            Action::RecordPayment | Action::ManageBudgets => self.as_str().to_string(),
            other => format!("{} submissions", other.as_str()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Applicant => "applicant",
            Role::DeptHead => "dept_head",
            Role::Admin => "admin",
        })
    }
}

/// Statuses from which `role` may perform `action`. An empty slice means the
/// role never performs the action.
pub fn allowed_sources(role: Role, action: Action) -> &'static [Status] {
    match (role, action) {
        (Role::Applicant, Action::Submit) => SUBMITTABLE,
        (Role::DeptHead, Action::Recommend | Action::Reject | Action::RequestRevision) => {
            HEAD_REVIEWABLE
        }
        (Role::Admin, Action::Approve | Action::Reject | Action::RequestRevision) => {
            ADMIN_REVIEWABLE
        }
        (Role::Admin, Action::Close) => CLOSABLE,
        (Role::Admin, Action::Reopen) => REOPENABLE,
        (Role::Applicant | Role::Admin, Action::Retire) => RETIRABLE,
        _ => &[],
    }
}

/// Status reached by a legal transition. `Submit` targets are decided by the
/// caller because they depend on whether department review is enabled.
pub fn target_status(role: Role, action: Action) -> Option<Status> {
    match (role, action) {
        (Role::DeptHead, Action::Recommend) => Some(Status::Pending),
        (_, Action::Approve) => Some(Status::Approved),
        (_, Action::Reject) => Some(Status::Rejected),
        (_, Action::RequestRevision) => Some(Status::NeedsMoreInfo),
        (_, Action::Close) => Some(Status::AdminClosed),
        (_, Action::Reopen) => Some(Status::Approved),
        _ => None,
    }
}

/// Checks that `role` may perform `action` from `from`.
pub fn ensure_transition(role: Role, action: Action, from: Status) -> Result<(), WorkflowError> {
    let sources = allowed_sources(role, action);
    if sources.is_empty() {
        return Err(WorkflowError::Forbidden { role, action });
    }
    if !sources.contains(&from) {
        return Err(WorkflowError::InvalidTransition { action, from });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub id: u32,
    pub code: String,
    pub name: String,
}

/// Translates symbolic statuses to the numeric ids used by external systems.
#[derive(Debug, Clone)]
pub struct StatusDirectory {
    by_status: HashMap<Status, StatusRow>,
    by_id: HashMap<u32, Status>,
}

impl StatusDirectory {
    /// The directory shipped with the legacy schema.
    pub fn standard() -> Self {
        let rows = STATUS_CODES.iter().map(|(status, code, id, _)| StatusRow {
            id: *id,
            code: code.to_string(),
            name: status.code().replace('_', " "),
        });
        let mut directory = Self {
            by_status: HashMap::new(),
            by_id: HashMap::new(),
        };
        for row in rows {
            directory.insert(row);
        }
        directory
    }

    /// Builds a directory from externally configured rows. Row codes may use
    /// any alias understood by [`Status::from_code`]; every status must be
    /// covered exactly once.
    pub fn from_rows(rows: impl IntoIterator<Item = StatusRow>) -> Result<Self> {
        let mut directory = Self {
            by_status: HashMap::new(),
            by_id: HashMap::new(),
        };
        for row in rows {
            let status = Status::from_code(&row.code)
                .ok_or_else(|| Error::Config(format!("unknown status code {}", row.code)))?;
            if directory.by_status.contains_key(&status) || directory.by_id.contains_key(&row.id) {
                return Err(Error::Config(format!(
                    "duplicate status row {} ({})",
                    row.id, row.code
                )));
            }
            directory.insert(row);
        }
        if let Some(missing) = ALL_STATUSES
            .iter()
            .find(|s| !directory.by_status.contains_key(s))
        {
            return Err(Error::Config(format!("status {missing} is not configured")));
        }
        Ok(directory)
    }

    fn insert(&mut self, row: StatusRow) {
        if let Some(status) = Status::from_code(&row.code) {
            self.by_id.insert(row.id, status);
            self.by_status.insert(status, row);
        }
    }

    pub fn id_of(&self, status: Status) -> Option<u32> {
        self.by_status.get(&status).map(|row| row.id)
    }

    pub fn row(&self, status: Status) -> Option<&StatusRow> {
        self.by_status.get(&status)
    }

    pub fn status_of(&self, id: u32) -> Option<Status> {
        self.by_id.get(&id).copied()
    }
}

impl Default for StatusDirectory {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_messages_name_the_refused_permission() {
        let message = |role, action| WorkflowError::Forbidden { role, action }.to_string();
        assert_eq!(
            message(Role::DeptHead, Action::ManageBudgets),
            "role dept_head may not manage budgets"
        );
        assert_eq!(
            message(Role::Applicant, Action::RecordPayment),
            "role applicant may not record payments"
        );
        assert_eq!(
            message(Role::Applicant, Action::Approve),
            "role applicant may not approve submissions"
        );
        assert_eq!(
            message(Role::Admin, Action::Submit),
            "role admin may not submit submissions"
        );
    }

    #[test]
    fn legacy_codes_resolve() {
        assert_eq!(Status::from_code("3"), Some(Status::NeedsMoreInfo));
        assert_eq!(Status::from_code(" Revision "), Some(Status::NeedsMoreInfo));
        assert_eq!(Status::from_code("closed"), Some(Status::AdminClosed));
        assert_eq!(Status::from_code("dept_head_recommended"), Some(Status::DeptHeadRecommended));
        assert_eq!(Status::from_code("unknown"), None);
    }

    #[test]
    fn every_status_round_trips_through_its_code() {
        for status in ALL_STATUSES {
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
    }

    #[test]
    fn standard_directory_covers_every_status() {
        let directory = StatusDirectory::standard();
        for status in ALL_STATUSES {
            let id = directory.id_of(status).unwrap();
            assert_eq!(directory.status_of(id), Some(status));
        }
        assert_eq!(directory.id_of(Status::Approved), Some(1));
    }

    #[test]
    fn from_rows_requires_full_coverage() {
        let rows = vec![StatusRow {
            id: 10,
            code: "approved".into(),
            name: "Approved".into(),
        }];
        assert!(StatusDirectory::from_rows(rows).is_err());
    }

    #[test]
    fn applicant_resubmits_after_revision() {
        assert!(ensure_transition(Role::Applicant, Action::Submit, Status::NeedsMoreInfo).is_ok());
        assert_eq!(
            ensure_transition(Role::Applicant, Action::Submit, Status::Rejected),
            Err(WorkflowError::InvalidTransition {
                action: Action::Submit,
                from: Status::Rejected
            })
        );
    }

    #[test]
    fn head_cannot_approve() {
        let err = ensure_transition(Role::DeptHead, Action::Approve, Status::DeptHeadPending);
        assert!(matches!(err, Err(WorkflowError::Forbidden { .. })));
    }
}
