//! Runs the `oi` binary against temporary config and cache directories.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread::JoinHandle;

fn oi(config: &Path, cache: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_oi"))
        .args(args)
        .env("OI_CONFIG", config)
        .env("OI_CACHE_PATH", cache)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(stdin.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

/// Answers one HTTP request with `body` and returns the raw request.
fn serve_once(body: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handle = std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).unwrap();
        String::from_utf8_lossy(&data).into_owned()
    });
    (url, handle)
}

#[test]
fn settings_prints_the_config_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    let output = oi(&config, dir.path(), &["--settings"], "");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), config.display().to_string());
}

#[test]
fn empty_cache_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = oi(&dir.path().join("config.toml"), dir.path(), &["--list"], "");
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn no_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = oi(&dir.path().join("config.toml"), dir.path(), &[], "");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no input"));
}

#[test]
fn turn_streams_output_and_saves_the_conversation() {
    let body = [
        r#"{"message":{"role":"assistant","content":"Four"},"done":false}"#,
        r#"{"message":{"role":"assistant","content":"."},"done":false}"#,
        r#"{"message":{"role":"assistant","content":""},"done":true}"#,
    ]
    .join("\n");
    let (url, server) = serve_once(body);

    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!("default_api = \"local\"\ndefault_model = \"tiny\"\n\n[apis.local]\nkind = \"ollama\"\nbase_url = \"{url}\"\n"),
    )
    .unwrap();
    let cache = dir.path().join("cache");

    let output = oi(&config, &cache, &["-t", "maths", "what is"], "2 + 2\n");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Four.\n");

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /api/chat"));
    assert!(request.contains(r#""model":"tiny""#));
    assert!(request.contains("what is\\n\\n2 + 2"));

    let listed = oi(&config, &cache, &["--list"], "");
    let listing = String::from_utf8_lossy(&listed.stdout);
    assert!(listing.contains("maths"), "{listing}");
    assert!(listing.contains("local/tiny"));
    assert!(listing.contains("2 messages"));
}
