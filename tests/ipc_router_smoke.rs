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

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("markingd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let before_select = request(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(before_select["error"]["code"], "no_workspace");

    let missing_path = request(&mut stdin, &mut reader, "3", "workspace.select", json!({}));
    assert_eq!(missing_path["error"]["code"], "bad_params");

    let selected = request(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true);
    assert!(workspace.join("marking.sqlite3").exists());

    for (i, (method, params)) in [
        ("setup.get", json!({})),
        ("audit.list", json!({})),
        ("rubric.get", json!({ "instanceId": "missing" })),
        ("assignments.list", json!({ "id": "missing", "kind": "pages" })),
        ("markers.page", json!({ "id": "missing" })),
        ("courses.create", json!({})),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = request(&mut stdin, &mut reader, &format!("f{}", i), method, params);
        if resp["ok"] == false {
            assert_ne!(
                resp["error"]["code"], "not_implemented",
                "unexpected unknown method for {}",
                method
            );
        }
    }

    let unknown = request(&mut stdin, &mut reader, "5", "grid.get", json!({}));
    assert_eq!(unknown["error"]["code"], "not_implemented");

    writeln!(stdin, "{{ not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let reply: serde_json::Value = serde_json::from_str(line.trim()).expect("json reply");
    assert_eq!(reply["error"]["code"], "bad_json");

    // The loop keeps serving after a malformed line.
    let again = request(&mut stdin, &mut reader, "6", "health", json!({}));
    assert_eq!(again["ok"], true);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
