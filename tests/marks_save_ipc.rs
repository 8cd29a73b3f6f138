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
    let exe = env!("CARGO_BIN_EXE_mindstrided");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn mindstrided");
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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let v = request(stdin, reader, id, method, params);
    assert_eq!(v["ok"].as_bool(), Some(true), "{} failed: {}", method, v);
    v["result"].clone()
}

fn approx(v: &serde_json::Value, expected: f64) {
    let got = v.as_f64().unwrap_or_else(|| panic!("not a number: {}", v));
    assert!((got - expected).abs() < 1e-9, "expected {}, got {}", expected, got);
}

#[test]
fn save_updates_semester_sgpa_and_profile_cgpa() {
    let workspace = temp_dir("mindstride-marks-save");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.upsert",
        json!({ "fullName": "Ravi Kumar", "semester": "3" }),
    );
    let sid = student["id"].as_str().expect("id").to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.save",
        json!({
            "studentId": sid,
            "subject": "Operating Systems",
            "internal1": 40, "internal2": "45", "assignment": 20, "see": 80
        }),
    );
    assert_eq!(first["semester"].as_i64(), Some(3));
    approx(&first["internalConverted25"], 21.25);
    approx(&first["internalTotal50"], 41.25);
    approx(&first["seeConverted50"], 40.0);
    approx(&first["total100"], 81.25);
    approx(&first["semesterSgpa"], 8.125);
    approx(&first["previousCgpa"], 0.0);
    approx(&first["newCgpa"], 8.125);
    assert_eq!(first["cgpaSynced"].as_bool(), Some(true));

    let profile = request_ok(&mut stdin, &mut reader, "4", "students.get", json!({ "id": sid }));
    assert_eq!(profile["student"]["cgpa"].as_str(), Some("8.13"));

    // Out-of-range inputs clamp into their caps rather than failing.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "marks.save",
        json!({
            "studentId": sid,
            "subject": "Computer Networks",
            "internal1": 20, "internal2": 30, "assignment": 30, "see": 120
        }),
    );
    approx(&second["assignment25"], 25.0);
    approx(&second["seeConverted50"], 50.0);
    approx(&second["total100"], 87.5);
    assert_eq!(second["subjectsCounted"].as_u64(), Some(2));
    approx(&second["semesterSgpa"], 8.4375);
    approx(&second["previousCgpa"], 8.13);
    approx(&second["newCgpa"], 8.28375);

    // Re-saving a subject replaces its row instead of adding another.
    let resaved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "marks.save",
        json!({
            "studentId": sid,
            "subject": "Computer Networks",
            "internal1": 20, "internal2": 30, "assignment": 30, "see": 120,
            "previousCgpa": ""
        }),
    );
    assert_eq!(resaved["subjectsCounted"].as_u64(), Some(2));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "marks.list",
        json!({ "studentId": sid, "semester": 3 }),
    );
    assert_eq!(listed["marks"].as_array().map(|a| a.len()), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn save_rejects_missing_subject_and_unknown_student() {
    let workspace = temp_dir("mindstride-marks-errors");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sid = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.upsert",
        json!({ "fullName": "Meera Nair" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();

    let blank = request(
        &mut stdin,
        &mut reader,
        "3",
        "marks.save",
        json!({ "studentId": sid, "subject": "   ", "internal1": 10 }),
    );
    assert_eq!(blank["error"]["code"].as_str(), Some("bad_params"));

    let ghost = request(
        &mut stdin,
        &mut reader,
        "4",
        "marks.save",
        json!({ "studentId": "nobody", "subject": "Maths" }),
    );
    assert_eq!(ghost["error"]["code"].as_str(), Some("not_found"));

    let bad_semester = request(
        &mut stdin,
        &mut reader,
        "5",
        "marks.save",
        json!({ "studentId": sid, "subject": "Maths", "semester": "third" }),
    );
    assert_eq!(bad_semester["error"]["code"].as_str(), Some("bad_params"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "marks.list",
        json!({ "studentId": sid }),
    );
    assert_eq!(listed["marks"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn strict_numbers_setting_rejects_non_numeric_marks() {
    let workspace = temp_dir("mindstride-marks-strict");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sid = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.upsert",
        json!({ "fullName": "Imran Ali" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();

    // Lenient by default: "abc" reads as 0.
    let lenient = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.save",
        json!({ "studentId": sid, "subject": "Physics", "internal1": "abc", "see": 100 }),
    );
    approx(&lenient["internalRaw"], 0.0);
    approx(&lenient["total100"], 50.0);

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "marks", "patch": { "strictNumbers": true } }),
    );
    let strict = request(
        &mut stdin,
        &mut reader,
        "5",
        "marks.save",
        json!({ "studentId": sid, "subject": "Physics", "internal1": "abc", "see": 100 }),
    );
    assert_eq!(strict["error"]["code"].as_str(), Some("bad_params"));
    assert_eq!(strict["error"]["details"]["field"].as_str(), Some("internal1"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
