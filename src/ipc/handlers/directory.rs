use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::actor::Actor;
use crate::directory::{self, ClassPatch, StudentPatch, SubjectPatch, TeacherPatch};
use crate::ipc::helpers::{
    announce, parse_params, require_admin, with_actor, Announcement, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use crate::registry::{self, Removal};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonParams {
    name: String,
    email: String,
    nip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectParams {
    name: String,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassParams {
    name: String,
    grade_level: Option<String>,
    academic_year: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentParams {
    name: String,
    nisn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterParams {
    student_id: String,
    class_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdParams {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeacherUpdateParams {
    id: String,
    name: Option<String>,
    email: Option<String>,
    nip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectUpdateParams {
    id: String,
    name: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassUpdateParams {
    id: String,
    name: Option<String>,
    grade_level: Option<String>,
    academic_year: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentUpdateParams {
    id: String,
    name: Option<String>,
    nisn: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassFilter {
    class_id: Option<String>,
}

fn admins_create(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: PersonParams = parse_params(params)?;
    let admin = directory::create_admin(conn, &p.name, &p.email)?;
    info!(admin = %admin.id, "admin created");
    Ok(json!({ "admin": admin }))
}

fn teachers_create(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: PersonParams = parse_params(params)?;
    let teacher = directory::create_teacher(conn, &p.name, &p.email, p.nip.as_deref())?;
    info!(teacher = %teacher.id, "teacher created");
    Ok(json!({ "teacher": teacher }))
}

fn subjects_create(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: SubjectParams = parse_params(params)?;
    let subject = directory::create_subject(conn, &p.name, &p.code)?;
    info!(subject = %subject.id, code = %subject.code, "subject created");
    Ok(json!({ "subject": subject }))
}

fn classes_create(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: ClassParams = parse_params(params)?;
    let class = directory::create_class(
        conn,
        &p.name,
        p.grade_level.as_deref(),
        p.academic_year.as_deref(),
    )?;
    info!(class = %class.id, name = %class.name, "class created");
    Ok(json!({ "class": class }))
}

fn students_create(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: StudentParams = parse_params(params)?;
    let student = directory::create_student(conn, &p.name, &p.nisn)?;
    info!(student = %student.id, "student created");
    Ok(json!({ "student": student }))
}

fn teachers_update(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: TeacherUpdateParams = parse_params(params)?;
    let patch = TeacherPatch {
        name: p.name,
        email: p.email,
        nip: p.nip,
    };
    let teacher = directory::update_teacher(conn, &p.id, &patch)?;
    info!(teacher = %teacher.id, "teacher updated");
    Ok(json!({ "teacher": teacher }))
}

fn subjects_update(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: SubjectUpdateParams = parse_params(params)?;
    let patch = SubjectPatch {
        name: p.name,
        code: p.code,
    };
    let subject = directory::update_subject(conn, &p.id, &patch)?;
    info!(subject = %subject.id, code = %subject.code, "subject updated");
    Ok(json!({ "subject": subject }))
}

fn classes_update(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: ClassUpdateParams = parse_params(params)?;
    let patch = ClassPatch {
        name: p.name,
        grade_level: p.grade_level,
        academic_year: p.academic_year,
    };
    let class = directory::update_class(conn, &p.id, &patch)?;
    info!(class = %class.id, name = %class.name, "class updated");
    Ok(json!({ "class": class }))
}

fn students_update(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: StudentUpdateParams = parse_params(params)?;
    let patch = StudentPatch {
        name: p.name,
        nisn: p.nisn,
    };
    let student = directory::update_student(conn, &p.id, &patch)?;
    info!(student = %student.id, "student updated");
    Ok(json!({ "student": student }))
}

fn students_delete(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: IdParams = parse_params(params)?;
    let student = directory::delete_student(conn, &p.id)?;
    info!(student = %student.id, class = ?student.class_id, "student deleted");
    Ok(json!({ "deleted": student }))
}

/// Tells `teachers` and every admin what a delete took with it.
fn announce_removal(
    state: &AppState,
    conn: &Connection,
    event_type: &'static str,
    what: &str,
    removal: &Removal,
    teachers: Vec<&str>,
) {
    announce(
        state,
        conn,
        Announcement {
            event_type,
            title: format!("{what} deleted"),
            body: format!(
                "{what} {} was deleted with {} teaching assignments",
                removal.id,
                removal.assignments.len()
            ),
            payload: json!({ "removal": removal }),
            teachers,
            class_id: None,
        },
    );
}

fn teachers_delete(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    let removal = registry::delete_teacher(conn, actor, &p.id)?;
    // The deleted teacher has no inbox left to write to.
    announce_removal(state, conn, notify::TEACHER_DELETED, "Teacher", &removal, Vec::new());
    Ok(json!({ "removal": removal }))
}

fn subjects_delete(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    let removal = registry::delete_subject(conn, actor, &p.id)?;
    announce_removal(
        state,
        conn,
        notify::SUBJECT_DELETED,
        "Subject",
        &removal,
        removal.affected_teachers(),
    );
    Ok(json!({ "removal": removal }))
}

fn classes_delete(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    let removal = registry::delete_class(conn, actor, &p.id)?;
    announce_removal(
        state,
        conn,
        notify::CLASS_DELETED,
        "Class",
        &removal,
        removal.affected_teachers(),
    );
    Ok(json!({ "removal": removal }))
}

fn roster_enroll(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: RosterParams = parse_params(params)?;
    let added = directory::enroll(conn, &p.student_id, &p.class_id)?;
    if added {
        info!(student = %p.student_id, class = %p.class_id, "student enrolled");
    }
    Ok(json!({ "enrolled": true, "changed": added }))
}

fn roster_unenroll(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_admin(actor)?;
    let p: RosterParams = parse_params(params)?;
    directory::unenroll(conn, &p.student_id, &p.class_id)?;
    info!(student = %p.student_id, class = %p.class_id, "student unenrolled");
    Ok(json!({ "ok": true }))
}

fn roster_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ClassFilter = parse_params(params)?;
    let Some(class_id) = p.class_id else {
        return Err(HandlerErr::bad_params("missing classId"));
    };
    directory::require_class(conn, &class_id)?;
    let students = directory::list_students(conn, Some(&class_id))?;
    Ok(json!({ "classId": class_id, "students": students }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ClassFilter = parse_params(params)?;
    let students = directory::list_students(conn, p.class_id.as_deref())?;
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let state = &*state;
    let params = &req.params;
    match req.method.as_str() {
        "admins.create" => Some(with_actor(state, req, |c, a| admins_create(c, a, params))),
        "admins.list" => Some(with_actor(state, req, |c, _| {
            Ok(json!({ "admins": directory::list_admins(c)? }))
        })),
        "teachers.create" => Some(with_actor(state, req, |c, a| teachers_create(c, a, params))),
        "teachers.list" => Some(with_actor(state, req, |c, _| {
            Ok(json!({ "teachers": directory::list_teachers(c)? }))
        })),
        "teachers.get" => Some(with_actor(state, req, |c, _| {
            let p: IdParams = parse_params(params)?;
            Ok(json!({ "teacher": directory::get_teacher(c, &p.id)? }))
        })),
        "teachers.update" => Some(with_actor(state, req, |c, a| teachers_update(c, a, params))),
        "teachers.delete" => Some(with_actor(state, req, |c, a| {
            teachers_delete(state, c, a, params)
        })),
        "subjects.create" => Some(with_actor(state, req, |c, a| subjects_create(c, a, params))),
        "subjects.list" => Some(with_actor(state, req, |c, _| {
            Ok(json!({ "subjects": directory::list_subjects(c)? }))
        })),
        "subjects.get" => Some(with_actor(state, req, |c, _| {
            let p: IdParams = parse_params(params)?;
            Ok(json!({ "subject": directory::get_subject(c, &p.id)? }))
        })),
        "subjects.update" => Some(with_actor(state, req, |c, a| subjects_update(c, a, params))),
        "subjects.delete" => Some(with_actor(state, req, |c, a| {
            subjects_delete(state, c, a, params)
        })),
        "classes.create" => Some(with_actor(state, req, |c, a| classes_create(c, a, params))),
        "classes.list" => Some(with_actor(state, req, |c, _| {
            Ok(json!({ "classes": directory::list_classes(c)? }))
        })),
        "classes.get" => Some(with_actor(state, req, |c, _| {
            let p: IdParams = parse_params(params)?;
            Ok(json!({ "class": directory::get_class(c, &p.id)? }))
        })),
        "classes.update" => Some(with_actor(state, req, |c, a| classes_update(c, a, params))),
        "classes.delete" => Some(with_actor(state, req, |c, a| {
            classes_delete(state, c, a, params)
        })),
        "students.create" => Some(with_actor(state, req, |c, a| students_create(c, a, params))),
        "students.list" => Some(with_actor(state, req, |c, _| students_list(c, params))),
        "students.get" => Some(with_actor(state, req, |c, _| {
            let p: IdParams = parse_params(params)?;
            Ok(json!({ "student": directory::get_student(c, &p.id)? }))
        })),
        "students.update" => Some(with_actor(state, req, |c, a| students_update(c, a, params))),
        "students.delete" => Some(with_actor(state, req, |c, a| students_delete(c, a, params))),
        "roster.enroll" => Some(with_actor(state, req, |c, a| roster_enroll(c, a, params))),
        "roster.unenroll" => Some(with_actor(state, req, |c, a| roster_unenroll(c, a, params))),
        "roster.list" => Some(with_actor(state, req, |c, _| roster_list(c, params))),
        _ => None,
    }
}
