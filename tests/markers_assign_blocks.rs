use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_markingd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn markingd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

struct Seed {
    course_id: String,
    instance_id: String,
    criteria: Vec<String>,
    manager: String,
    tutor_a: String,
    tutor_b: String,
    student: String,
}

fn create_user(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
    last_name: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "users.create",
        json!({ "username": username, "firstName": "Test", "lastName": last_name }),
    );
    str_field(&created, "userId")
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Seed {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(stdin, reader, "s2", "courses.create", json!({ "name": "Essays 101" }));
    let course_id = str_field(&course, "courseId");

    let manager = create_user(stdin, reader, "s3", "manager", "Boss");
    let tutor_a = create_user(stdin, reader, "s4", "tutor-a", "Young");
    let tutor_b = create_user(stdin, reader, "s5", "tutor-b", "Adams");
    let student = create_user(stdin, reader, "s6", "student", "Pupil");
    for (i, (user, role)) in [
        (&manager, "editingteacher"),
        (&tutor_a, "teacher"),
        (&tutor_b, "teacher"),
        (&student, "student"),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            stdin,
            reader,
            &format!("s7-{}", i),
            "enrolments.assign",
            json!({ "courseId": course_id, "userId": user, "role": role }),
        );
    }

    let instance = request_ok(
        stdin,
        reader,
        "s8",
        "instances.create",
        json!({ "courseId": course_id, "name": "Final essay", "gradingMethod": "rubric", "totalPages": 4 }),
    );
    let instance_id = str_field(&instance, "instanceId");

    let defined = request_ok(
        stdin,
        reader,
        "s9",
        "rubric.define",
        json!({
            "instanceId": instance_id,
            "name": "Essay rubric",
            "criteria": [
                { "description": "Thesis", "levels": [{ "score": 0, "definition": "Absent" }, { "score": 4, "definition": "Clear" }] },
                { "description": "Evidence", "levels": [{ "score": 0, "definition": "None" }, { "score": 4, "definition": "Strong" }] },
                { "description": "Style" }
            ]
        }),
    );
    let criteria = defined
        .get("definition")
        .and_then(|d| d.get("criteria"))
        .and_then(|v| v.as_array())
        .expect("criteria")
        .iter()
        .map(|c| str_field(c, "id"))
        .collect();

    Seed {
        course_id,
        instance_id,
        criteria,
        manager,
        tutor_a,
        tutor_b,
        student,
    }
}

fn rows(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    s: &Seed,
    kind: &str,
) -> Vec<serde_json::Value> {
    let listed = request_ok(
        stdin,
        reader,
        id,
        "assignments.list",
        json!({ "userId": s.manager, "id": s.instance_id, "kind": kind }),
    );
    listed["rows"].as_array().cloned().expect("rows")
}

fn notification_keys(page: &serde_json::Value) -> Vec<String> {
    page["page"]["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .map(|n| n["key"].as_str().unwrap_or("").to_string())
        .collect()
}

fn box_keys(page: &serde_json::Value) -> Vec<String> {
    page["page"]["boxes"]
        .as_array()
        .expect("boxes")
        .iter()
        .map(|n| n["key"].as_str().unwrap_or("").to_string())
        .collect()
}

#[test]
fn resubmitting_a_pairing_moves_it_to_the_new_block() {
    let workspace = temp_dir("markingd-assign-blocks");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let s = seed(&mut stdin, &mut reader, &workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "markers.page",
        json!({
            "userId": s.manager,
            "id": s.instance_id,
            "submit": {
                "action": "addmarkers",
                "markers": [s.tutor_a, s.tutor_b],
                "criteria": [s.criteria[0]]
            }
        }),
    );
    assert_eq!(first["page"]["batch"]["block"], 1);
    assert_eq!(first["page"]["batch"]["inserted"], 2);
    assert_eq!(notification_keys(&first), vec!["saved"]);

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "markers.assign",
        json!({
            "userId": s.manager,
            "id": s.instance_id,
            "markers": [s.tutor_a],
            "criteria": [s.criteria[0], s.criteria[1]]
        }),
    );
    assert_eq!(second["page"]["batch"]["block"], 2);
    assert_eq!(second["page"]["batch"]["inserted"], 1);
    assert_eq!(second["page"]["batch"]["updated"], 1);

    let marker_rows = rows(&mut stdin, &mut reader, "3", &s, "markers");
    assert_eq!(marker_rows.len(), 3, "no duplicate pairing rows");
    let block_of = |marker: &str, criterion: &str| -> i64 {
        marker_rows
            .iter()
            .find(|r| r["markerId"] == json!(marker) && r["criterionId"] == json!(criterion))
            .and_then(|r| r["block"].as_i64())
            .expect("row present")
    };
    assert_eq!(block_of(&s.tutor_a, &s.criteria[0]), 2);
    assert_eq!(block_of(&s.tutor_b, &s.criteria[0]), 1);
    assert_eq!(block_of(&s.tutor_a, &s.criteria[1]), 2);

    // The page table lists every criterion, markers by last name.
    let table = &second["page"]["markerTable"]["rows"];
    assert_eq!(table.as_array().map(|a| a.len()), Some(3));
    assert_eq!(table[0]["description"], "Thesis");
    let names: Vec<_> = table[0]["markers"]
        .as_array()
        .expect("markers")
        .iter()
        .map(|m| m["lastName"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(names, vec!["Adams", "Young"]);
    assert_eq!(table[0]["delete"]["params"]["action"], "deletemarkers");
    assert!(table[2].get("delete").is_none());

    // Page blocks are numbered independently of marker blocks.
    let pages = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "pages.assign",
        json!({
            "userId": s.manager,
            "id": s.instance_id,
            "pages": [1, 2],
            "criteria": [s.criteria[0]]
        }),
    );
    assert_eq!(pages["page"]["batch"]["block"], 1);
    assert_eq!(pages["page"]["batch"]["inserted"], 2);
    let page_rows = rows(&mut stdin, &mut reader, "5", &s, "pages");
    assert_eq!(page_rows.len(), 2);
    assert_eq!(pages["page"]["pageTable"]["rows"][0]["pages"], json!([1, 2]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn visibility_messages_follow_table_contents() {
    let workspace = temp_dir("markingd-assign-visibility");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let s = seed(&mut stdin, &mut reader, &workspace);

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "markers.page",
        json!({ "userId": s.manager, "id": s.instance_id }),
    );
    assert_eq!(
        box_keys(&empty),
        vec!["markerscanseewholerubric", "markerscanseeallpages"]
    );

    let pages_only = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "pages.assign",
        json!({ "userId": s.manager, "id": s.instance_id, "pages": [3], "criteria": [s.criteria[1]] }),
    );
    assert!(box_keys(&pages_only).is_empty());
    assert_eq!(
        notification_keys(&pages_only),
        vec!["saved", "markerscanseenothing"]
    );
    assert_eq!(pages_only["page"]["notifications"][1]["kind"], "problem");

    let both = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "markers.assign",
        json!({ "userId": s.manager, "id": s.instance_id, "markers": [s.tutor_b], "criteria": [s.criteria[1]] }),
    );
    assert_eq!(
        box_keys(&both),
        vec!["markerscanseeselectedcriteria", "markerscanseepageswithcriteria"]
    );

    let scope = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "markers.scope",
        json!({ "userId": s.manager, "id": s.instance_id, "markerId": s.tutor_b }),
    );
    assert_eq!(scope["scope"]["criteria"], json!([s.criteria[1]]));
    assert_eq!(scope["scope"]["pages"], json!([3]));

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "pages.delete",
        json!({ "userId": s.manager, "id": s.instance_id, "criterion": s.criteria[1] }),
    );
    assert_eq!(cleared["page"]["deleted"], 1);
    assert_eq!(notification_keys(&cleared), vec!["transactionsuccessful"]);
    assert_eq!(
        box_keys(&cleared),
        vec!["markerscanseeselectedcriteria", "markerscanseeallpages"]
    );

    let scope = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "markers.scope",
        json!({ "userId": s.manager, "id": s.instance_id, "markerId": s.tutor_b }),
    );
    assert_eq!(scope["scope"]["pages"], json!([1, 2, 3, 4]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deletemarkers_removes_every_marker_of_one_criterion() {
    let workspace = temp_dir("markingd-assign-delete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let s = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "markers.assign",
        json!({
            "userId": s.manager,
            "id": s.instance_id,
            "markers": [s.tutor_a, s.tutor_b],
            "criteria": [s.criteria[0], s.criteria[2]]
        }),
    );

    let missing_criterion = request(
        &mut stdin,
        &mut reader,
        "2",
        "markers.page",
        json!({ "userId": s.manager, "id": s.instance_id, "action": "deletemarkers" }),
    );
    assert_eq!(error_code(&missing_criterion), "bad_params");

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "markers.page",
        json!({
            "userId": s.manager,
            "id": s.instance_id,
            "criterion": s.criteria[0],
            "action": "deletemarkers"
        }),
    );
    assert_eq!(deleted["page"]["deleted"], 2);
    let remaining = rows(&mut stdin, &mut reader, "4", &s, "markers");
    assert_eq!(remaining.len(), 2);
    assert!(remaining
        .iter()
        .all(|r| r["criterionId"] == json!(s.criteria[2])));

    // Blocks keep counting from the highest remaining block.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "markers.assign",
        json!({ "userId": s.manager, "id": s.instance_id, "markers": [s.tutor_a], "criteria": [s.criteria[0]] }),
    );
    assert_eq!(again["page"]["batch"]["block"], 2);

    // A denied user cannot delete.
    let denied = request(
        &mut stdin,
        &mut reader,
        "6",
        "markers.delete",
        json!({ "userId": s.tutor_a, "id": s.instance_id, "criterion": s.criteria[2] }),
    );
    assert_eq!(error_code(&denied), "invalid_access");
    assert_eq!(
        rows(&mut stdin, &mut reader, "7", &s, "markers").len(),
        3
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_submissions_report_field_errors_and_write_nothing() {
    let workspace = temp_dir("markingd-assign-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let s = seed(&mut stdin, &mut reader, &workspace);

    let student_marker = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "markers.assign",
        json!({ "userId": s.manager, "id": s.instance_id, "markers": [s.student], "criteria": [s.criteria[0]] }),
    );
    assert!(student_marker["page"].get("batch").is_none());
    assert_eq!(
        student_marker["page"]["markersForm"]["errors"][0]["key"],
        "invalidmarker"
    );

    let out_of_range = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "pages.assign",
        json!({ "userId": s.manager, "id": s.instance_id, "pages": [0, 5], "criteria": [s.criteria[0]] }),
    );
    let errors = out_of_range["page"]["pagesForm"]["errors"]
        .as_array()
        .expect("errors");
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e["key"] == "invalidpage"));

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "markers.assign",
        json!({ "userId": s.manager, "id": s.instance_id, "markers": [], "criteria": [] }),
    );
    let fields: Vec<_> = empty["page"]["markersForm"]["errors"]
        .as_array()
        .expect("errors")
        .iter()
        .map(|e| e["field"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(fields, vec!["markers", "criteria"]);

    let unknown_form = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "markers.page",
        json!({
            "userId": s.manager,
            "id": s.instance_id,
            "submit": { "action": "addsomething", "markers": [s.tutor_a], "criteria": [s.criteria[0]] }
        }),
    );
    assert!(unknown_form["page"].get("batch").is_none());
    assert!(notification_keys(&unknown_form).is_empty());

    let malformed = request(
        &mut stdin,
        &mut reader,
        "5",
        "pages.assign",
        json!({ "userId": s.manager, "id": s.instance_id, "pages": ["one"], "criteria": [s.criteria[0]] }),
    );
    assert_eq!(error_code(&malformed), "bad_params");

    assert!(rows(&mut stdin, &mut reader, "6", &s, "markers").is_empty());
    assert!(rows(&mut stdin, &mut reader, "7", &s, "pages").is_empty());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
