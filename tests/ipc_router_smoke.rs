use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_srmsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn srmsd");
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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn workspace_methods_need_a_selected_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.pointer("/result/workspacePath"), Some(&serde_json::Value::Null));

    for (i, method) in ["students.list", "grades.gpa", "import.bulk", "auth.login"]
        .iter()
        .enumerate()
    {
        let v = request(&mut stdin, &mut reader, &format!("n{}", i), method, json!({}));
        assert_eq!(error_code(&v), "no_workspace", "{}", method);
    }

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(error_code(&v), "bad_json");

    let v = request(&mut stdin, &mut reader, "u", "classes.list", json!({}));
    assert_eq!(error_code(&v), "not_implemented");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    let _ = request(&mut stdin, &mut reader, "2", "setup.get", json!({ "section": "grading" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "grading", "patch": { "scale": 5 } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "4",
        "semesters.create",
        json!({ "semesterName": "Fall2024", "academicYear": "2024-2025" }),
    );
    let _ = request(&mut stdin, &mut reader, "5", "semesters.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "6", "semesters.current", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "courses.upsert",
        json!({ "courseCode": "CS101", "courseTitle": "Intro CS", "creditHours": 3 }),
    );
    let _ = request(&mut stdin, &mut reader, "8", "courses.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "9", "courses.get", json!({ "courseCode": "CS101" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "students.upsert",
        json!({ "indexNumber": "UG001", "fullName": "Ama Boateng", "program": "CS" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "students.update",
        json!({ "indexNumber": "UG001", "patch": { "yearOfStudy": 2 } }),
    );
    let _ = request(&mut stdin, &mut reader, "12", "students.search", json!({ "query": "Ama" }));
    let _ = request(&mut stdin, &mut reader, "13", "students.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "14", "students.get", json!({ "indexNumber": "UG001" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "grades.upsert",
        json!({
            "indexNumber": "UG001",
            "courseCode": "CS101",
            "semester": "Fall2024",
            "academicYear": "2024-2025",
            "score": 74
        }),
    );
    let _ = request(&mut stdin, &mut reader, "16", "grades.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "17", "grades.gpa", json!({ "indexNumber": "UG001" }));
    let _ = request(&mut stdin, &mut reader, "17a", "grades.classify", json!({ "score": "64" }));
    let _ = request(&mut stdin, &mut reader, "18", "reports.transcript", json!({ "indexNumber": "UG001" }));
    let _ = request(&mut stdin, &mut reader, "19", "reports.gradeDistribution", json!({}));
    let _ = request(&mut stdin, &mut reader, "20", "reports.summary", json!({}));
    let _ = request(&mut stdin, &mut reader, "20a", "reports.enrollment", json!({}));
    let _ = request(&mut stdin, &mut reader, "21", "import.history", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "22",
        "import.bulk",
        json!({ "path": workspace.path().join("missing.csv").to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "23",
        "notifications.create",
        json!({ "title": "Results out", "message": "Fall results are published" }),
    );
    let _ = request(&mut stdin, &mut reader, "24", "auth.whoami", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "24a",
        "auth.resetPassword",
        json!({ "username": "UG001", "newPassword": "secret1" }),
    );
    let _ = request(&mut stdin, &mut reader, "25", "notifications.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "26", "me.profile", json!({}));
    let _ = request(&mut stdin, &mut reader, "27", "auth.logout", json!({}));
    let _ = request(&mut stdin, &mut reader, "28", "courses.delete", json!({ "courseCode": "CS101" }));

    drop(stdin);
    let _ = child.wait();
}
