//! Behavior of the `wechat-sync` binary: exit status, ledger writes and diagnostics.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Command, Output};
use std::thread;
use tempfile::TempDir;

const TOKEN_REPLY: &str = r#"{"access_token":"TOKEN","expires_in":7200}"#;

/// Minimal local stand-in for the material API
///
/// Grants a token on `/cgi-bin/token` and answers every other request with
/// `upload_reply`. Returns the base URL.
fn spawn_api(upload_reply: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let _ = answer(stream, upload_reply);
        }
    });
    format!("http://{}", addr)
}

fn answer(mut stream: TcpStream, upload_reply: &str) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let mut content_length = 0usize;
    let mut chunked = false;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        if lower.starts_with("transfer-encoding:") && lower.contains("chunked") {
            chunked = true;
        }
    }

    // Drain the request body before replying.
    if chunked {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line)?;
            let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
            let mut chunk = vec![0; size + 2];
            reader.read_exact(&mut chunk)?;
            if size == 0 {
                break;
            }
        }
    } else {
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body)?;
    }

    let reply = if request_line.contains("/cgi-bin/token") {
        TOKEN_REPLY
    } else {
        upload_reply
    };
    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.len(),
        reply
    )?;
    stream.flush()
}

fn wechat_sync(workspace: &TempDir, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wechat-sync"));
    cmd.arg("--workspace")
        .arg(workspace.path().join("ws"))
        .arg("--source-dir")
        .arg(workspace.path())
        .arg("--delay-ms")
        .arg("0")
        .args(args)
        .env_remove("WECHAT_APP_ID")
        .env_remove("WECHAT_APP_SECRET")
        .env("RUST_LOG", "off");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("failed to run wechat-sync")
}

#[test]
fn test_no_files_exits_zero() {
    let temp = TempDir::new().unwrap();
    let output = run(&mut wechat_sync(&temp, &[]));

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Nothing to sync"));
}

#[test]
fn test_blank_file_list_exits_zero() {
    let temp = TempDir::new().unwrap();
    let output = run(&mut wechat_sync(&temp, &["   "]));

    assert!(output.status.success());
}

#[test]
fn test_missing_credentials_exit_one_without_side_effects() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a_b.jpg"), b"jpeg").unwrap();

    let output = run(&mut wechat_sync(&temp, &["a/b.jpg"]));

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("WECHAT_APP_ID"));
    assert!(!temp.path().join("ws").exists());
}

#[test]
fn test_unreachable_token_endpoint_exits_one() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a_b.jpg"), b"jpeg").unwrap();

    let output = run(wechat_sync(&temp, &["--api-base", "http://127.0.0.1:1", "a/b.jpg"])
        .env("WECHAT_APP_ID", "wx123")
        .env("WECHAT_APP_SECRET", "s3cret"));

    assert_eq!(output.status.code(), Some(1));
    assert!(!temp.path().join("ws").join("access_token.json").exists());
    assert!(!temp.path().join("ws").join("sync_history.json").exists());
}

#[test]
fn test_dry_run_needs_no_credentials() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a_b.jpg"), b"jpeg").unwrap();

    let output = run(&mut wechat_sync(&temp, &["--dry-run", "a/b.jpg missing.jpg"]));

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("would upload"));
    assert!(!temp.path().join("ws").exists());
}

#[test]
fn test_successful_upload_writes_ledger() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a_b.jpg"), b"jpeg").unwrap();
    let api_base = spawn_api(r#"{"media_id":"M1","url":"http://mmbiz.qpic.cn/1"}"#);

    let output = run(wechat_sync(&temp, &["--api-base", &api_base, "a/b.jpg"])
        .env("WECHAT_APP_ID", "wx123")
        .env("WECHAT_APP_SECRET", "s3cret"));

    assert!(output.status.success());
    let ledger: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join("ws").join("sync_history.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(ledger["a/b.jpg"]["media_id"], "M1");
    assert_eq!(ledger["a/b.jpg"]["url"], "http://mmbiz.qpic.cn/1");
}

#[test]
fn test_failed_upload_exit_status_depends_on_strict() {
    let rejection = r#"{"errcode":40001,"errmsg":"invalid credential"}"#;

    let lenient = TempDir::new().unwrap();
    fs::write(lenient.path().join("a_b.jpg"), b"jpeg").unwrap();
    let api_base = spawn_api(rejection);
    let output = run(wechat_sync(&lenient, &["--api-base", &api_base, "a/b.jpg"])
        .env("WECHAT_APP_ID", "wx123")
        .env("WECHAT_APP_SECRET", "s3cret"));
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("40001"));
    assert!(!lenient.path().join("ws").join("sync_history.json").exists());

    let strict = TempDir::new().unwrap();
    fs::write(strict.path().join("a_b.jpg"), b"jpeg").unwrap();
    let api_base = spawn_api(rejection);
    let output = run(wechat_sync(&strict, &["--strict", "--api-base", &api_base, "a/b.jpg"])
        .env("WECHAT_APP_ID", "wx123")
        .env("WECHAT_APP_SECRET", "s3cret"));
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_token_failure_keeps_secret_out_of_output_and_log() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a_b.jpg"), b"jpeg").unwrap();

    let output = run(wechat_sync(&temp, &["--api-base", "http://127.0.0.1:1", "a/b.jpg"])
        .env("WECHAT_APP_ID", "wx123")
        .env("WECHAT_APP_SECRET", "TOPSECRETVALUE"));

    assert_eq!(output.status.code(), Some(1));
    assert!(!String::from_utf8_lossy(&output.stderr).contains("TOPSECRETVALUE"));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("TOPSECRETVALUE"));

    let log = fs::read_to_string(temp.path().join("ws").join("wechat-sync.log")).unwrap();
    assert!(log.contains("Aborted"));
    assert!(!log.contains("TOPSECRETVALUE"));
}
