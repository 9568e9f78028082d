//! End-to-end smoke test for sdn-node.
//!
//! Starts a real node process with a fresh data directory, walks the
//! first-run setup gate over HTTP, then logs in and exercises the admin
//! surface.
//!
//! Run with:
//!   cargo test -p sdn-node --test smoke

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

// ── Node lifecycle ────────────────────────────────────────────────────────────

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

/// Find a free TCP port on loopback.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Poll until the admin surface responds or the timeout elapses.
async fn wait_for_health(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.get(format!("{url}/health")).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

/// Scan the node's stdout for the operator-facing setup token line.
fn read_setup_token(child: &mut Child, timeout: Duration) -> String {
    let stdout = child.stdout.take().expect("stdout piped");
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        // Keep draining to EOF so the child never blocks on a full pipe.
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if let Some(token) = line.strip_prefix("setup token: ") {
                let _ = tx.send(token.trim().to_string());
            }
        }
    });
    rx.recv_timeout(timeout).expect("setup token printed")
}

#[tokio::test]
async fn smoke_setup_login_profile() {
    let data_dir = std::env::temp_dir().join(format!("sdn_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);

    let api_port = free_port();
    let p2p_port = free_port();
    let base = format!("http://127.0.0.1:{api_port}");

    let node_bin = env!("CARGO_BIN_EXE_sdn-node");
    let mut child = Command::new(node_bin)
        .args([
            "--data-dir",
            data_dir.to_str().unwrap(),
            "--api-addr",
            &format!("127.0.0.1:{api_port}"),
            "--p2p-listen",
            &format!("/ip4/127.0.0.1/tcp/{p2p_port}"),
            "--display-name",
            "smoke-node",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn sdn-node");

    let token = read_setup_token(&mut child, Duration::from_secs(20));
    let _guard = NodeGuard { child, data_dir };

    let http = reqwest::Client::new();
    assert!(
        wait_for_health(&http, &base, Duration::from_secs(20)).await,
        "sdn-node did not become ready within 20 seconds"
    );

    // ── 1. Setup gate ─────────────────────────────────────────────────────────
    let health: serde_json::Value = http
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["setup_required"], true);

    // Unrelated token is refused.
    let resp = http
        .post(format!("{base}/api/setup"))
        .json(&serde_json::json!({ "token": "0000-0000-0000-0000-0000-0000-0000-0000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // The real token succeeds (identity creation runs Argon2id; allow time).
    let resp = http
        .post(format!("{base}/api/setup"))
        .timeout(Duration::from_secs(120))
        .json(&serde_json::json!({
            "token": token,
            "username": "operator",
            "password": "orbital-password",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let setup: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(
        setup["mnemonic"].as_str().unwrap().split_whitespace().count(),
        24
    );

    let health: serde_json::Value = http
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["setup_required"], false);

    // ── 2. Operator login ─────────────────────────────────────────────────────
    let resp = http
        .post(format!("{base}/api/login"))
        .timeout(Duration::from_secs(60))
        .json(&serde_json::json!({
            "username": "operator",
            "password": "orbital-password",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.contains("HttpOnly"));
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    // ── 3. Profile reflects the configured display name and real keys ─────────
    let profile: serde_json::Value = http
        .get(format!("{base}/api/profile"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile["display_name"], "smoke-node");
    assert_eq!(profile["signing_key"].as_str().unwrap().len(), 64);
    assert_eq!(profile["encryption_key"].as_str().unwrap().len(), 64);

    // ── 4. Audit trail captured the login ─────────────────────────────────────
    // The writer task drains asynchronously; poll briefly.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen_login = false;
    while Instant::now() < deadline && !seen_login {
        let audit: serde_json::Value = http
            .get(format!("{base}/api/audit?type=operator_login"))
            .header("cookie", &cookie)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        seen_login = !audit["entries"].as_array().unwrap().is_empty();
        if !seen_login {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    assert!(seen_login, "operator login should appear in the audit log");
}
