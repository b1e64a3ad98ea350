mod common;

use common::{event_types, School, Sidecar, TODAY};
use serde_json::json;

#[test]
fn inbox_pages_and_read_marks() {
    let mut sc = Sidecar::start();
    let school = School::seed(&mut sc);
    let t1 = school.guru(&school.t1);

    let a = school.assign(&mut sc, &school.t1, &school.math, &school.c7a);
    school.assign(&mut sc, &school.t1, &school.bio, &school.c7a);
    sc.ok(Some(&school.admin), "assignments.unassign", json!({ "assignmentId": a }));

    let inbox = sc.wait_for_inbox(&t1, |p| p["total"] == 3);
    assert_eq!(inbox["total"], 3);
    assert_eq!(inbox["unread"], 3);
    let mut types = event_types(&inbox);
    types.sort();
    assert_eq!(
        types,
        vec!["teaching_assigned", "teaching_assigned", "teaching_unassigned"]
    );

    let first = sc.ok(Some(&t1), "notifications.list", json!({ "page": 1, "perPage": 2 }));
    assert_eq!(first["items"].as_array().expect("items").len(), 2);
    assert_eq!(first["perPage"], 2);
    let second = sc.ok(Some(&t1), "notifications.list", json!({ "page": 2, "perPage": 2 }));
    assert_eq!(second["items"].as_array().expect("items").len(), 1);

    let one = first["items"][0]["id"].as_str().expect("id").to_string();
    let marked = sc.ok(Some(&t1), "notifications.markRead", json!({ "ids": [one] }));
    assert_eq!(marked["updated"], 1);

    let unread = sc.ok(Some(&t1), "notifications.list", json!({ "unreadOnly": true }));
    assert_eq!(unread["items"].as_array().expect("items").len(), 2);
    assert_eq!(unread["unread"], 2);

    // Another user's ids are not theirs to mark.
    let t2 = school.guru(&school.t2);
    let other = unread["items"][0]["id"].as_str().expect("id").to_string();
    let marked = sc.ok(Some(&t2), "notifications.markRead", json!({ "ids": [other] }));
    assert_eq!(marked["updated"], 0);

    let marked = sc.ok(Some(&t1), "notifications.markRead", json!({}));
    assert_eq!(marked["updated"], 2);
    let after = sc.ok(Some(&t1), "notifications.list", json!({}));
    assert_eq!(after["unread"], 0);
    assert_eq!(after["total"], 3);
}

#[test]
fn page_size_is_bounded() {
    let mut sc = Sidecar::start();
    let school = School::seed(&mut sc);
    let t1 = school.guru(&school.t1);

    assert_eq!(
        sc.err_code(Some(&t1), "notifications.list", json!({ "perPage": 0 })),
        "bad_params"
    );
    assert_eq!(
        sc.err_code(Some(&t1), "notifications.list", json!({ "perPage": 201 })),
        "bad_params"
    );
    sc.ok(Some(&t1), "notifications.list", json!({ "perPage": 200 }));
}

#[test]
fn disabled_worker_leaves_mutations_unaffected() {
    let mut sc = Sidecar::spawn_with(TODAY, &["--no-notify"]);
    let path = sc.workspace.path().to_string_lossy().to_string();
    sc.ok(None, "workspace.select", json!({ "path": path }));
    let school = School::seed(&mut sc);

    let health = sc.ok(None, "health", json!({}));
    assert_eq!(health["notifications"], false);

    school.assign(&mut sc, &school.t1, &school.math, &school.c7a);
    let inbox = sc.ok(Some(&school.guru(&school.t1)), "notifications.list", json!({}));
    assert_eq!(inbox["total"], 0);
}
