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
fn score_falls_back_to_profile_cgpa() {
    let workspace = temp_dir("mindstride-performance");
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
        json!({ "fullName": "Nikhil Das", "cgpa": "8.00" }),
    )["id"]
        .as_str()
        .expect("id")
        .to_string();

    let hours = json!({
        "studentId": sid,
        "attendance": 90,
        "desktopStudyHours": 3,
        "desktopEntertainmentHours": 1,
        "phoneHours": 2
    });
    let scored = request_ok(&mut stdin, &mut reader, "3", "performance.score", hours.clone());
    approx(&scored["components"]["cgpaScore"], 80.0);
    approx(&scored["components"]["attendanceScore"], 90.0);
    approx(&scored["components"]["studyScore"], 75.0);
    approx(&scored["components"]["entertainmentScore"], 60.0);
    // 80*0.35 + 90*0.25 + 75*0.20 + 60*0.20
    approx(&scored["score"], 77.5);

    // An explicit cgpa wins over the stored profile value.
    let mut explicit = hours;
    explicit["cgpa"] = json!(10);
    let overridden = request_ok(&mut stdin, &mut reader, "4", "performance.score", explicit);
    approx(&overridden["components"]["cgpaScore"], 100.0);
    approx(&overridden["score"], 84.5);

    let ghost = request(
        &mut stdin,
        &mut reader,
        "5",
        "performance.score",
        json!({ "studentId": "nobody", "attendance": 90 }),
    );
    assert_eq!(ghost["error"]["code"].as_str(), Some("not_found"));
    assert_eq!(ghost["error"]["details"]["studentId"].as_str(), Some("nobody"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
