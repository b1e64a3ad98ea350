use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: String,
    pub name: String,
    pub email: String,
    pub nip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub grade_level: Option<String>,
    pub academic_year: Option<String>,
    pub homeroom_teacher_id: Option<String>,
    pub student_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub nisn: String,
    pub class_id: Option<String>,
}

/// Fields left `None` keep their value. An empty optional field clears it.
#[derive(Debug, Clone, Default)]
pub struct TeacherPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub nip: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubjectPatch {
    pub name: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassPatch {
    pub name: Option<String>,
    pub grade_level: Option<String>,
    pub academic_year: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub nisn: Option<String>,
}

/// Directory entities attendance records point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Teacher,
    Subject,
    Class,
    Student,
}

impl Entity {
    pub fn label(self) -> &'static str {
        match self {
            Entity::Teacher => "teacher",
            Entity::Subject => "subject",
            Entity::Class => "class",
            Entity::Student => "student",
        }
    }

    fn record_column(self) -> &'static str {
        match self {
            Entity::Teacher => "teacher_id",
            Entity::Subject => "subject_id",
            Entity::Class => "class_id",
            Entity::Student => "student_id",
        }
    }
}

fn required(value: &str, field: &str) -> CoreResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(CoreError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(v.to_string())
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn nothing_to_update() -> CoreError {
    CoreError::BadRequest("update names no field to change".to_string())
}

pub fn create_admin(conn: &Connection, name: &str, email: &str) -> CoreResult<Admin> {
    let admin = Admin {
        id: Uuid::new_v4().to_string(),
        name: required(name, "name")?,
        email: required(email, "email")?,
    };
    conn.execute(
        "INSERT INTO admins(id, name, email) VALUES(?, ?, ?)",
        (&admin.id, &admin.name, &admin.email),
    )?;
    Ok(admin)
}

pub fn list_admins(conn: &Connection) -> CoreResult<Vec<Admin>> {
    let mut stmt = conn.prepare("SELECT id, name, email FROM admins ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Admin {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn admin_ids(conn: &Connection) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM admins ORDER BY rowid")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn create_teacher(
    conn: &Connection,
    name: &str,
    email: &str,
    nip: Option<&str>,
) -> CoreResult<Teacher> {
    let teacher = Teacher {
        id: Uuid::new_v4().to_string(),
        name: required(name, "name")?,
        email: required(email, "email")?,
        nip: optional(nip),
    };
    conn.execute(
        "INSERT INTO teachers(id, name, email, nip) VALUES(?, ?, ?, ?)",
        (&teacher.id, &teacher.name, &teacher.email, &teacher.nip),
    )?;
    Ok(teacher)
}

pub fn list_teachers(conn: &Connection) -> CoreResult<Vec<Teacher>> {
    let mut stmt = conn.prepare("SELECT id, name, email, nip FROM teachers ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Teacher {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                nip: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_teacher(conn: &Connection, id: &str) -> CoreResult<Teacher> {
    conn.query_row(
        "SELECT id, name, email, nip FROM teachers WHERE id = ?",
        [id],
        |r| {
            Ok(Teacher {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                nip: r.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CoreError::NotFound(format!("teacher {id} not found")))
}

pub fn update_teacher(conn: &Connection, id: &str, patch: &TeacherPatch) -> CoreResult<Teacher> {
    if patch.name.is_none() && patch.email.is_none() && patch.nip.is_none() {
        return Err(nothing_to_update());
    }
    let mut teacher = get_teacher(conn, id)?;
    if let Some(name) = patch.name.as_deref() {
        teacher.name = required(name, "name")?;
    }
    if let Some(email) = patch.email.as_deref() {
        teacher.email = required(email, "email")?;
    }
    if let Some(nip) = patch.nip.as_deref() {
        teacher.nip = optional(Some(nip));
    }
    conn.execute(
        "UPDATE teachers SET name = ?, email = ?, nip = ? WHERE id = ?",
        (&teacher.name, &teacher.email, &teacher.nip, &teacher.id),
    )?;
    Ok(teacher)
}

pub fn create_subject(conn: &Connection, name: &str, code: &str) -> CoreResult<Subject> {
    let subject = Subject {
        id: Uuid::new_v4().to_string(),
        name: required(name, "name")?,
        code: required(code, "code")?,
    };
    conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject.id, &subject.name, &subject.code),
    )?;
    Ok(subject)
}

pub fn list_subjects(conn: &Connection) -> CoreResult<Vec<Subject>> {
    let mut stmt = conn.prepare("SELECT id, name, code FROM subjects ORDER BY code, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_subject(conn: &Connection, id: &str) -> CoreResult<Subject> {
    conn.query_row("SELECT id, name, code FROM subjects WHERE id = ?", [id], |r| {
        Ok(Subject {
            id: r.get(0)?,
            name: r.get(1)?,
            code: r.get(2)?,
        })
    })
    .optional()?
    .ok_or_else(|| CoreError::NotFound(format!("subject {id} not found")))
}

pub fn update_subject(conn: &Connection, id: &str, patch: &SubjectPatch) -> CoreResult<Subject> {
    if patch.name.is_none() && patch.code.is_none() {
        return Err(nothing_to_update());
    }
    let mut subject = get_subject(conn, id)?;
    if let Some(name) = patch.name.as_deref() {
        subject.name = required(name, "name")?;
    }
    if let Some(code) = patch.code.as_deref() {
        subject.code = required(code, "code")?;
    }
    conn.execute(
        "UPDATE subjects SET name = ?, code = ? WHERE id = ?",
        (&subject.name, &subject.code, &subject.id),
    )?;
    Ok(subject)
}

pub fn create_class(
    conn: &Connection,
    name: &str,
    grade_level: Option<&str>,
    academic_year: Option<&str>,
) -> CoreResult<Class> {
    let class = Class {
        id: Uuid::new_v4().to_string(),
        name: required(name, "name")?,
        grade_level: optional(grade_level),
        academic_year: optional(academic_year),
        homeroom_teacher_id: None,
        student_count: 0,
    };
    conn.execute(
        "INSERT INTO classes(id, name, grade_level, academic_year) VALUES(?, ?, ?, ?)",
        (&class.id, &class.name, &class.grade_level, &class.academic_year),
    )?;
    Ok(class)
}

// Correlated subquery keeps the count independent of other joins.
const CLASS_SELECT: &str = "SELECT
       c.id, c.name, c.grade_level, c.academic_year, c.homeroom_teacher_id,
       (SELECT COUNT(*) FROM class_members m WHERE m.class_id = c.id) AS student_count
     FROM classes c";

fn class_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: r.get(0)?,
        name: r.get(1)?,
        grade_level: r.get(2)?,
        academic_year: r.get(3)?,
        homeroom_teacher_id: r.get(4)?,
        student_count: r.get(5)?,
    })
}

pub fn list_classes(conn: &Connection) -> CoreResult<Vec<Class>> {
    let mut stmt = conn.prepare(&format!("{CLASS_SELECT} ORDER BY c.name, c.id"))?;
    let rows = stmt
        .query_map([], class_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_class(conn: &Connection, id: &str) -> CoreResult<Class> {
    conn.query_row(&format!("{CLASS_SELECT} WHERE c.id = ?"), [id], class_from_row)
        .optional()?
        .ok_or_else(|| CoreError::NotFound(format!("class {id} not found")))
}

/// Homeroom is not a field here; it moves through the registry.
pub fn update_class(conn: &Connection, id: &str, patch: &ClassPatch) -> CoreResult<Class> {
    if patch.name.is_none() && patch.grade_level.is_none() && patch.academic_year.is_none() {
        return Err(nothing_to_update());
    }
    let mut class = get_class(conn, id)?;
    if let Some(name) = patch.name.as_deref() {
        class.name = required(name, "name")?;
    }
    if let Some(grade) = patch.grade_level.as_deref() {
        class.grade_level = optional(Some(grade));
    }
    if let Some(year) = patch.academic_year.as_deref() {
        class.academic_year = optional(Some(year));
    }
    conn.execute(
        "UPDATE classes SET name = ?, grade_level = ?, academic_year = ? WHERE id = ?",
        (&class.name, &class.grade_level, &class.academic_year, &class.id),
    )?;
    Ok(class)
}

pub fn create_student(conn: &Connection, name: &str, nisn: &str) -> CoreResult<Student> {
    let student = Student {
        id: Uuid::new_v4().to_string(),
        name: required(name, "name")?,
        nisn: required(nisn, "nisn")?,
        class_id: None,
    };
    conn.execute(
        "INSERT INTO students(id, name, nisn) VALUES(?, ?, ?)",
        (&student.id, &student.name, &student.nisn),
    )?;
    Ok(student)
}

pub fn list_students(conn: &Connection, class_id: Option<&str>) -> CoreResult<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.nisn, m.class_id
         FROM students s
         LEFT JOIN class_members m ON m.student_id = s.id
         WHERE (?1 IS NULL OR m.class_id = ?1)
         ORDER BY s.name, s.id",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok(Student {
                id: r.get(0)?,
                name: r.get(1)?,
                nisn: r.get(2)?,
                class_id: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_student(conn: &Connection, id: &str) -> CoreResult<Student> {
    conn.query_row(
        "SELECT s.id, s.name, s.nisn, m.class_id
         FROM students s
         LEFT JOIN class_members m ON m.student_id = s.id
         WHERE s.id = ?",
        [id],
        |r| {
            Ok(Student {
                id: r.get(0)?,
                name: r.get(1)?,
                nisn: r.get(2)?,
                class_id: r.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CoreError::NotFound(format!("student {id} not found")))
}

pub fn update_student(conn: &Connection, id: &str, patch: &StudentPatch) -> CoreResult<Student> {
    if patch.name.is_none() && patch.nisn.is_none() {
        return Err(nothing_to_update());
    }
    let mut student = get_student(conn, id)?;
    if let Some(name) = patch.name.as_deref() {
        student.name = required(name, "name")?;
    }
    if let Some(nisn) = patch.nisn.as_deref() {
        student.nisn = required(nisn, "nisn")?;
    }
    conn.execute(
        "UPDATE students SET name = ?, nisn = ? WHERE id = ?",
        (&student.name, &student.nisn, &student.id),
    )?;
    Ok(student)
}

/// Removes a student and their class membership. A student with attendance
/// history stays; the records would otherwise lose their subject.
pub fn delete_student(conn: &Connection, id: &str) -> CoreResult<Student> {
    let tx = db::immediate_tx(conn)?;
    let student = get_student(&tx, id)?;
    ensure_no_attendance(&tx, Entity::Student, id)?;
    tx.execute("DELETE FROM class_members WHERE student_id = ?", [id])?;
    tx.execute("DELETE FROM students WHERE id = ?", [id])?;
    tx.commit()?;
    Ok(student)
}

/// `InvalidState` while any attendance record references the entity.
pub fn ensure_no_attendance(conn: &Connection, entity: Entity, id: &str) -> CoreResult<()> {
    let n: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM attendance_records WHERE {} = ?",
            entity.record_column()
        ),
        [id],
        |r| r.get(0),
    )?;
    if n > 0 {
        return Err(CoreError::InvalidState(format!(
            "{} {id} is referenced by {n} attendance records",
            entity.label()
        )));
    }
    Ok(())
}

/// Students on a class roster, in enrollment order.
pub fn roster_of(conn: &Connection, class_id: &str) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM class_members WHERE class_id = ? ORDER BY rowid",
    )?;
    let ids = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn exists(conn: &Connection, sql: &str, id: &str) -> CoreResult<bool> {
    Ok(conn
        .query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn admin_exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    exists(conn, "SELECT 1 FROM admins WHERE id = ?", id)
}

pub fn teacher_exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    exists(conn, "SELECT 1 FROM teachers WHERE id = ?", id)
}

pub fn subject_exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    exists(conn, "SELECT 1 FROM subjects WHERE id = ?", id)
}

pub fn class_exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    exists(conn, "SELECT 1 FROM classes WHERE id = ?", id)
}

pub fn student_exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    exists(conn, "SELECT 1 FROM students WHERE id = ?", id)
}

pub fn require_teacher(conn: &Connection, id: &str) -> CoreResult<()> {
    if teacher_exists(conn, id)? {
        Ok(())
    } else {
        Err(CoreError::NotFound(format!("teacher {id} not found")))
    }
}

pub fn require_subject(conn: &Connection, id: &str) -> CoreResult<()> {
    if subject_exists(conn, id)? {
        Ok(())
    } else {
        Err(CoreError::NotFound(format!("subject {id} not found")))
    }
}

pub fn require_class(conn: &Connection, id: &str) -> CoreResult<()> {
    if class_exists(conn, id)? {
        Ok(())
    } else {
        Err(CoreError::NotFound(format!("class {id} not found")))
    }
}

/// `None` when the class does not exist, `Some(None)` when it has no homeroom teacher.
pub fn homeroom_teacher_of(conn: &Connection, class_id: &str) -> CoreResult<Option<Option<String>>> {
    Ok(conn
        .query_row(
            "SELECT homeroom_teacher_id FROM classes WHERE id = ?",
            [class_id],
            |r| r.get::<_, Option<String>>(0),
        )
        .optional()?)
}

pub fn homeroom_class_of(conn: &Connection, teacher_id: &str) -> CoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM classes WHERE homeroom_teacher_id = ?",
            [teacher_id],
            |r| r.get::<_, String>(0),
        )
        .optional()?)
}

pub fn is_enrolled(conn: &Connection, student_id: &str, class_id: &str) -> CoreResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM class_members WHERE class_id = ? AND student_id = ?",
            (class_id, student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Adds a student to a class roster. Re-enrolling in the same class is a
/// no-op; a student already in another class must be unenrolled first.
pub fn enroll(conn: &Connection, student_id: &str, class_id: &str) -> CoreResult<bool> {
    if !student_exists(conn, student_id)? {
        return Err(CoreError::NotFound(format!("student {student_id} not found")));
    }
    require_class(conn, class_id)?;
    let current: Option<String> = conn
        .query_row(
            "SELECT class_id FROM class_members WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    match current {
        Some(c) if c == class_id => Ok(false),
        Some(c) => Err(CoreError::Conflict(format!(
            "student {student_id} is already enrolled in class {c}; unenroll first"
        ))),
        None => {
            conn.execute(
                "INSERT INTO class_members(class_id, student_id) VALUES(?, ?)",
                (class_id, student_id),
            )?;
            Ok(true)
        }
    }
}

pub fn unenroll(conn: &Connection, student_id: &str, class_id: &str) -> CoreResult<()> {
    let n = conn.execute(
        "DELETE FROM class_members WHERE class_id = ? AND student_id = ?",
        (class_id, student_id),
    )?;
    if n == 0 {
        return Err(CoreError::NotFound(format!(
            "student {student_id} is not enrolled in class {class_id}"
        )));
    }
    Ok(())
}
