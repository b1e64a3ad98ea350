//! Authorization: one [`POLICY`] row per permitted (role, operation, scope).

use crate::actor::{Actor, Role};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AssignTeaching,
    ReassignTeaching,
    UnassignTeaching,
    AssignHomeroom,
    UnassignHomeroom,
    ListAssignments,
    ListHomerooms,
    ReadRoles,
    CreateSubjectRecord,
    CreateClassRecord,
    ReadRecord,
    UpdateRecord,
    DeleteRecord,
    QueryRecords,
    ExportRecords,
    ViewRoster,
    ManageDirectory,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::AssignTeaching => "assign_teaching",
            Operation::ReassignTeaching => "reassign_teaching",
            Operation::UnassignTeaching => "unassign_teaching",
            Operation::AssignHomeroom => "assign_homeroom",
            Operation::UnassignHomeroom => "unassign_homeroom",
            Operation::ListAssignments => "list_assignments",
            Operation::ListHomerooms => "list_homerooms",
            Operation::ReadRoles => "read_roles",
            Operation::CreateSubjectRecord => "create_subject_record",
            Operation::CreateClassRecord => "create_class_record",
            Operation::ReadRecord => "read_record",
            Operation::UpdateRecord => "update_record",
            Operation::DeleteRecord => "delete_record",
            Operation::QueryRecords => "query_records",
            Operation::ExportRecords => "export_records",
            Operation::ViewRoster => "view_roster",
            Operation::ManageDirectory => "manage_directory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Any,
    /// Actor recorded the target attendance record.
    RecordOwner,
    /// Actor is, right now, the homeroom teacher of the target class.
    HomeroomOfClass,
    /// Actor teaches the target subject in the target class.
    TeachesSubjectInClass,
    /// Target teacher id is the actor's own id.
    OwnTeacher,
    /// Allowed, but the ledger narrows the result set to the actor's reach.
    Narrowed,
}

use Operation as Op;
use Role::{Admin, HomeroomTeacher, Teacher};

pub const POLICY: &[(Role, Operation, Scope)] = &[
    (Admin, Op::AssignTeaching, Scope::Any),
    (Admin, Op::ReassignTeaching, Scope::Any),
    (Admin, Op::UnassignTeaching, Scope::Any),
    (Admin, Op::AssignHomeroom, Scope::Any),
    (Admin, Op::UnassignHomeroom, Scope::Any),
    (Admin, Op::ListAssignments, Scope::Any),
    (Admin, Op::ListHomerooms, Scope::Any),
    (Admin, Op::ReadRoles, Scope::Any),
    (Admin, Op::ReadRecord, Scope::Any),
    (Admin, Op::UpdateRecord, Scope::Any),
    (Admin, Op::DeleteRecord, Scope::Any),
    (Admin, Op::QueryRecords, Scope::Any),
    (Admin, Op::ExportRecords, Scope::Any),
    (Admin, Op::ViewRoster, Scope::Any),
    (Admin, Op::ManageDirectory, Scope::Any),
    (Teacher, Op::ListAssignments, Scope::OwnTeacher),
    (Teacher, Op::ReadRoles, Scope::OwnTeacher),
    (Teacher, Op::CreateSubjectRecord, Scope::TeachesSubjectInClass),
    (Teacher, Op::ReadRecord, Scope::TeachesSubjectInClass),
    (Teacher, Op::UpdateRecord, Scope::RecordOwner),
    (Teacher, Op::DeleteRecord, Scope::RecordOwner),
    (Teacher, Op::QueryRecords, Scope::Narrowed),
    (Teacher, Op::ExportRecords, Scope::Narrowed),
    (Teacher, Op::ViewRoster, Scope::TeachesSubjectInClass),
    (HomeroomTeacher, Op::ListAssignments, Scope::OwnTeacher),
    (HomeroomTeacher, Op::ReadRoles, Scope::OwnTeacher),
    (HomeroomTeacher, Op::CreateClassRecord, Scope::HomeroomOfClass),
    (HomeroomTeacher, Op::ReadRecord, Scope::HomeroomOfClass),
    (HomeroomTeacher, Op::UpdateRecord, Scope::HomeroomOfClass),
    (HomeroomTeacher, Op::DeleteRecord, Scope::HomeroomOfClass),
    (HomeroomTeacher, Op::QueryRecords, Scope::Narrowed),
    (HomeroomTeacher, Op::ExportRecords, Scope::Narrowed),
    (HomeroomTeacher, Op::ViewRoster, Scope::HomeroomOfClass),
];

/// What the caller knows about the target. Fields left at their default are
/// treated as "not established" and fail the scopes that need them.
#[derive(Debug, Default, Clone)]
pub struct Facts {
    pub record_teacher_id: Option<String>,
    pub class_homeroom_teacher_id: Option<String>,
    pub teaches_subject_in_class: bool,
    pub target_teacher_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

pub fn rule_for(role: Role, op: Operation) -> Option<Scope> {
    POLICY
        .iter()
        .find(|(r, o, _)| *r == role && *o == op)
        .map(|(_, _, s)| *s)
}

/// First half of a decision: is there a row for this role at all.
pub fn permits(actor: &Actor, op: Operation) -> Decision {
    match rule_for(actor.role, op) {
        Some(_) => Decision::Allow,
        None => Decision::Deny(format!(
            "role {} may not {}",
            actor.role,
            op.as_str().replace('_', " ")
        )),
    }
}

pub fn check_scope(actor: &Actor, scope: Scope, facts: &Facts) -> Decision {
    let owns = |id: &Option<String>| id.as_deref() == Some(actor.id.as_str());
    let ok = match scope {
        Scope::Any | Scope::Narrowed => true,
        Scope::RecordOwner => owns(&facts.record_teacher_id),
        Scope::HomeroomOfClass => owns(&facts.class_homeroom_teacher_id),
        Scope::TeachesSubjectInClass => facts.teaches_subject_in_class,
        Scope::OwnTeacher => owns(&facts.target_teacher_id),
    };
    if ok {
        return Decision::Allow;
    }
    Decision::Deny(
        match scope {
            Scope::RecordOwner => "only the recording teacher may change this record",
            Scope::HomeroomOfClass => "actor is not the homeroom teacher of this class",
            Scope::TeachesSubjectInClass => "actor does not teach this subject in this class",
            Scope::OwnTeacher => "actor may only act on their own teacher id",
            Scope::Any | Scope::Narrowed => unreachable!("unconditional scopes always allow"),
        }
        .to_string(),
    )
}

pub fn authorize(actor: &Actor, op: Operation, facts: &Facts) -> Decision {
    match rule_for(actor.role, op) {
        Some(scope) => check_scope(actor, scope, facts),
        None => permits(actor, op),
    }
}

/// [`authorize`] folded into the error taxonomy: a denial becomes `Forbidden`.
pub fn enforce(actor: &Actor, op: Operation, facts: &Facts) -> CoreResult<()> {
    into_result(actor, op, authorize(actor, op, facts))
}

pub fn into_result(actor: &Actor, op: Operation, decision: Decision) -> CoreResult<()> {
    match decision {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            tracing::debug!(role = %actor.role, actor = %actor.id, op = op.as_str(), %reason, "denied");
            Err(CoreError::Forbidden(reason))
        }
    }
}
