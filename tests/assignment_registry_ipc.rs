mod common;

use common::{event_types, str_at, School, Sidecar};
use serde_json::json;

#[test]
fn a_subject_class_slot_has_one_teacher_per_period() {
    let mut sc = Sidecar::start();
    let school = School::seed(&mut sc);

    school.assign(&mut sc, &school.t1, &school.math, &school.c7a);
    let code = sc.err_code(
        Some(&school.admin),
        "assignments.assign",
        json!({ "teacherId": school.t2, "subjectId": school.math, "classId": school.c7a }),
    );
    assert_eq!(code, "conflict");

    // Same slot in another period is free.
    sc.ok(
        Some(&school.admin),
        "assignments.assign",
        json!({ "teacherId": school.t2, "subjectId": school.math, "classId": school.c7a,
                "period": { "year": "2025/2026", "semester": "genap" } }),
    );

    let listed = sc.ok(
        Some(&school.admin),
        "assignments.list",
        json!({ "classId": school.c7a, "period": { "year": "2025/2026", "semester": "odd" } }),
    );
    let rows = listed["assignments"].as_array().expect("assignments");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["teacherId"], school.t1.as_str());
}

#[test]
fn only_admins_manage_assignments() {
    let mut sc = Sidecar::start();
    let school = School::seed(&mut sc);
    let guru = school.guru(&school.t1);

    let code = sc.err_code(
        Some(&guru),
        "assignments.assign",
        json!({ "teacherId": school.t1, "subjectId": school.math, "classId": school.c7a }),
    );
    assert_eq!(code, "forbidden");
    let code = sc.err_code(
        Some(&guru),
        "homeroom.assign",
        json!({ "teacherId": school.t1, "classId": school.c7a }),
    );
    assert_eq!(code, "forbidden");
    let code = sc.err_code(
        Some(&school.admin),
        "assignments.unassign",
        json!({ "assignmentId": "missing" }),
    );
    assert_eq!(code, "not_found");
    let code = sc.err_code(
        Some(&school.admin),
        "assignments.assign",
        json!({ "teacherId": "ghost", "subjectId": school.math, "classId": school.c7a }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn reassign_moves_the_slot_and_refreshes_roles() {
    let mut sc = Sidecar::start();
    let school = School::seed(&mut sc);
    let id = school.assign(&mut sc, &school.t1, &school.math, &school.c7a);

    let roles = sc.ok(Some(&school.admin), "roles.get", json!({ "teacherId": school.t1 }));
    assert_eq!(roles["roles"].as_array().expect("roles").len(), 1);

    let moved = sc.ok(
        Some(&school.admin),
        "assignments.reassign",
        json!({ "assignmentId": id, "teacherId": school.t2,
                "subjectId": school.math, "classId": school.c7a }),
    );
    assert_eq!(moved["assignment"]["id"], id.as_str());
    assert_eq!(moved["assignment"]["teacherId"], school.t2.as_str());
    assert_eq!(moved["previous"]["teacherId"], school.t1.as_str());

    let roles = sc.ok(Some(&school.admin), "roles.get", json!({ "teacherId": school.t1 }));
    assert!(roles["roles"].as_array().expect("roles").is_empty());
    let roles = sc.ok(Some(&school.admin), "roles.get", json!({ "teacherId": school.t2 }));
    assert_eq!(roles["roles"][0]["roleKind"], "subject_teacher");

    // A guru may read only their own roles and assignments.
    let guru = school.guru(&school.t2);
    let own = sc.ok(Some(&guru), "roles.get", json!({}));
    assert_eq!(own["teacherId"], school.t2.as_str());
    assert_eq!(
        sc.err_code(Some(&guru), "roles.get", json!({ "teacherId": school.t1 })),
        "forbidden"
    );
    let listed = sc.ok(Some(&guru), "assignments.list", json!({}));
    assert_eq!(listed["assignments"].as_array().expect("assignments").len(), 1);

    sc.ok(Some(&school.admin), "assignments.unassign", json!({ "assignmentId": id }));
    let roles = sc.ok(Some(&school.admin), "roles.get", json!({ "teacherId": school.t2 }));
    assert!(roles["roles"].as_array().expect("roles").is_empty());
}

#[test]
fn a_teacher_is_homeroom_teacher_of_at_most_one_class() {
    let mut sc = Sidecar::start();
    let school = School::seed(&mut sc);

    let set = sc.ok(
        Some(&school.admin),
        "homeroom.assign",
        json!({ "teacherId": school.h, "classId": school.c7a }),
    );
    assert_eq!(set["homeroom"]["teacherId"], school.h.as_str());

    let code = sc.err_code(
        Some(&school.admin),
        "homeroom.assign",
        json!({ "teacherId": school.h, "classId": school.c7b }),
    );
    assert_eq!(code, "conflict");

    // Displacing the current holder hands the class over.
    let moved = sc.ok(
        Some(&school.admin),
        "homeroom.assign",
        json!({ "teacherId": school.t2, "classId": school.c7a }),
    );
    assert_eq!(moved["homeroom"]["previousTeacherId"], school.h.as_str());
    let roles = sc.ok(Some(&school.admin), "roles.get", json!({ "teacherId": school.h }));
    assert!(roles["roles"].as_array().expect("roles").is_empty());

    let list = sc.ok(Some(&school.admin), "homeroom.list", json!({}));
    let homerooms = list["homerooms"].as_array().expect("homerooms");
    let c7a = homerooms
        .iter()
        .find(|h| h["classId"] == school.c7a.as_str())
        .expect("7A listed");
    assert_eq!(c7a["teacherId"], school.t2.as_str());

    sc.ok(Some(&school.admin), "homeroom.unassign", json!({ "classId": school.c7a }));
    let code = sc.err_code(
        Some(&school.admin),
        "homeroom.unassign",
        json!({ "classId": school.c7a }),
    );
    assert_eq!(code, "invalid_state");
    let code = sc.err_code(
        Some(&school.admin),
        "homeroom.unassign",
        json!({ "classId": "missing" }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn lookup_falls_back_to_any_period() {
    let mut sc = Sidecar::start();
    let school = School::seed(&mut sc);
    sc.ok(
        Some(&school.admin),
        "assignments.assign",
        json!({ "teacherId": school.t1, "subjectId": school.bio, "classId": school.c7a,
                "period": { "year": "2024/2025", "semester": "even" } }),
    );

    let strict = sc.ok(
        Some(&school.admin),
        "assignments.lookupSubjects",
        json!({ "teacherId": school.t1, "classId": school.c7a,
                "period": { "year": "2024/2025", "semester": "even" } }),
    );
    assert_eq!(strict["subjectIds"], json!([school.bio]));
    assert_eq!(strict["fallback"], false);

    let loose = sc.ok(
        Some(&school.admin),
        "assignments.lookupSubjects",
        json!({ "teacherId": school.t1, "classId": school.c7a,
                "period": { "year": "2025/2026", "semester": "odd" } }),
    );
    assert_eq!(loose["subjectIds"], json!([school.bio]));
    assert_eq!(loose["fallback"], true);
}

#[test]
fn assignment_changes_reach_teacher_homeroom_teacher_and_admins() {
    let mut sc = Sidecar::start();
    let school = School::seed(&mut sc);
    sc.ok(
        Some(&school.admin),
        "homeroom.assign",
        json!({ "teacherId": school.h, "classId": school.c7a }),
    );
    let id = school.assign(&mut sc, &school.t1, &school.math, &school.c7a);

    let t1 = school.guru(&school.t1);
    let inbox = sc.wait_for_inbox(&t1, |p| {
        event_types(p).iter().any(|e| e == "teaching_assigned")
    });
    let notice = inbox["items"]
        .as_array()
        .expect("items")
        .iter()
        .find(|n| n["eventType"] == "teaching_assigned")
        .expect("teaching_assigned notice");
    assert_eq!(notice["payload"]["assignment"]["id"], id.as_str());
    assert_eq!(notice["read"], false);

    let homeroom = school.homeroom();
    let inbox = sc.wait_for_inbox(&homeroom, |p| {
        event_types(p).iter().any(|e| e == "teaching_assigned")
    });
    assert!(event_types(&inbox).contains(&"homeroom_assigned".to_string()));

    let admin = school.admin.clone();
    let inbox = sc.wait_for_inbox(&admin, |p| {
        event_types(p).iter().any(|e| e == "teaching_assigned")
    });
    let types = event_types(&inbox);
    assert!(types.contains(&"homeroom_assigned".to_string()));
    assert!(types.contains(&"teaching_assigned".to_string()));

    // t2 was not involved.
    let t2 = school.guru(&school.t2);
    let inbox = sc.ok(Some(&t2), "notifications.list", json!({}));
    assert_eq!(inbox["total"], 0);

    sc.ok(
        Some(&school.admin),
        "assignments.reassign",
        json!({ "assignmentId": id, "teacherId": school.t2,
                "subjectId": school.math, "classId": school.c7a }),
    );
    for who in [&t1, &t2] {
        let inbox = sc.wait_for_inbox(who, |p| {
            event_types(p).iter().any(|e| e == "teaching_reassigned")
        });
        let found = inbox["items"]
            .as_array()
            .expect("items")
            .iter()
            .find(|n| n["eventType"] == "teaching_reassigned")
            .expect("teaching_reassigned notice");
        assert_eq!(str_at(&found["payload"]["current"], "teacherId"), school.t2);
    }
}
