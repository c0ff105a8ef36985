//! Agent over stdio and TCP, driven by a real client session

use std::process::Stdio;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tether_agent::Listener;
use tether_core::{ProcessChannel, SessionError, TcpChannel};
use tether_protocol::SessionKey;
use tether_session::{Client, ExecRequest, ServerInfo};
use tokio::io::{duplex, AsyncReadExt};

#[test]
fn test_help() {
    std::process::Command::cargo_bin("tether-agent")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("listen"));
}

#[test]
fn test_serve_without_key_fails() {
    std::process::Command::cargo_bin("tether-agent")
        .unwrap()
        .arg("serve")
        .env_remove("TETHER_SESSION_KEY")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No session key"));
}

#[tokio::test]
async fn test_serve_over_stdio() {
    let key = SessionKey::generate();
    let child = tokio::process::Command::new(assert_cmd::cargo::cargo_bin("tether-agent"))
        .arg("serve")
        .env("TETHER_SESSION_KEY", key.expose())
        .env("TETHER_PEER", "10.0.0.9:50000")
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let channel = ProcessChannel::from_child(child, "agent").unwrap();

    let (out_write, mut out_read) = duplex(4096);
    let (err_write, _err_read) = duplex(4096);
    let client = Client::new(Box::new(channel), key).with_output(Box::new(out_write), Box::new(err_write));

    let request = ExecRequest::new(["sh", "-c", "echo ${TETHER_SESSION_KEY:-unset}"]);
    let (outcome, report) = client.exec(request).await.unwrap();

    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(report.remote.unwrap().hostname, tether_agent::hostname());

    let mut out = String::new();
    out_read.read_to_string(&mut out).await.unwrap();
    // Commands never see the key
    assert_eq!(out, "unset\n");
}

#[tokio::test]
async fn test_listener_serves_tcp_clients() {
    let key = SessionKey::generate();
    let listener = Listener::bind("127.0.0.1:0", key.clone(), ServerInfo::new("tcp-host"))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let cancel = listener.cancel_token();
    let accept_loop = tokio::spawn(listener.run());

    for _ in 0..2 {
        let channel = TcpChannel::connect(&addr).await.unwrap();
        let report = Client::new(Box::new(channel), key.clone()).ping().await.unwrap();
        assert_eq!(report.remote.unwrap().hostname, "tcp-host");
    }

    let channel = TcpChannel::connect(&addr).await.unwrap();
    let err = Client::new(Box::new(channel), SessionKey::generate())
        .ping()
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Rejected(_)));

    cancel.cancel();
    accept_loop.await.unwrap();
}

#[tokio::test]
async fn test_bind_failure() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();
    let result = Listener::bind(&addr, SessionKey::generate(), ServerInfo::new("x")).await;
    assert!(matches!(result, Err(tether_agent::AgentError::Bind { .. })));
}
