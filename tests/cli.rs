use assert_cmd::prelude::*;
use sha2::{Digest, Sha256};
use std::{fs, path::PathBuf, process::Command};
use tempfile::TempDir;

fn write_env(dir: &TempDir) -> String {
    let env_path = dir.path().join("env");
    let content = format!(
        "STORE_ROOT={}\nREACTION_DEBOUNCE_MS=10\nPERSIST=1\n",
        dir.path().join("data").display()
    );
    fs::write(&env_path, content).unwrap();
    env_path.to_str().unwrap().to_string()
}

fn hex_id(label: &str) -> String {
    hex::encode(Sha256::digest(label.as_bytes()))
}

fn event_json(
    label: &str,
    author: &str,
    kind: u32,
    created_at: u64,
    tags: Vec<Vec<&str>>,
    content: &str,
) -> serde_json::Value {
    serde_json::json!({
        "id": hex_id(label),
        "pubkey": hex_id(author),
        "kind": kind,
        "created_at": created_at,
        "tags": tags,
        "content": content,
        "sig": "",
    })
}

/// A small thread written newest-first, with a like and a zap on the root.
fn write_feed(dir: &TempDir) -> PathBuf {
    let root = hex_id("root");
    let reply = hex_id("reply");
    let bolt11 = "lnbc2500u1pvjluezpp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypq";
    let events = [
        event_json(
            "reply2",
            "alice",
            1,
            30,
            vec![
                vec!["e", &root, "", "root"],
                vec!["e", &reply, "", "reply"],
            ],
            "deeper",
        ),
        event_json(
            "reply",
            "bob",
            1,
            20,
            vec![vec!["e", &root, "", "root"]],
            "a reply",
        ),
        event_json("like", "carol", 7, 25, vec![vec!["e", &root]], "+"),
        event_json(
            "zap",
            "zapper",
            9735,
            26,
            vec![vec!["e", &root], vec!["bolt11", bolt11]],
            "",
        ),
        event_json("root", "alice", 1, 10, vec![], "Opening post\nmore text"),
    ];
    let body: String = events.iter().map(|e| format!("{e}\n")).collect();
    let path = dir.path().join("feed.ndjson");
    fs::write(&path, body).unwrap();
    path
}

fn run_json(env_path: &str, args: &[&str]) -> serde_json::Value {
    let output = Command::cargo_bin("stonr-graph")
        .unwrap()
        .args(["--env", env_path])
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn ingest_cli_reports_summary_and_persists_reactions() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let feed = write_feed(&dir);

    let out = run_json(&env_path, &["ingest", feed.to_str().unwrap()]);
    assert_eq!(out["stored"], 5);
    assert_eq!(out["duplicates"], 0);
    assert_eq!(out["rejected"], 0);
    assert_eq!(out["pending_references"], 0);
    assert_eq!(out["pending_reactions"], 0);

    let root = hex_id("root");
    let record_path = dir
        .path()
        .join("data/reactions")
        .join(&root[0..2])
        .join(&root[2..4])
        .join(format!("{root}.json"));
    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(record_path).unwrap()).unwrap();
    assert_eq!(record["like_count"], 1);
    assert_eq!(record["zap_count"], 1);
    assert_eq!(record["zap_amount_sum"], 250_000);
    assert!(dir.path().join("data/cache/snapshot.json").exists());
}

#[test]
fn thread_cli_prints_context_and_neighbours() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let feed = write_feed(&dir);
    let reply = hex_id("reply");

    let out = run_json(&env_path, &["thread", &reply, feed.to_str().unwrap()]);
    assert_eq!(out["root"], hex_id("root"));
    assert_eq!(out["reply_to"], serde_json::Value::Null);
    assert_eq!(out["replies"], serde_json::json!([hex_id("reply2")]));
    assert_eq!(out["previous"], hex_id("root"));
    assert_eq!(out["next"], hex_id("like"));
    assert_eq!(out["backlinks"], serde_json::json!([hex_id("reply2")]));
    assert_eq!(out["title"], "a reply");
}

#[test]
fn author_cli_prints_stats() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let feed = write_feed(&dir);

    let out = run_json(&env_path, &["author", &hex_id("alice"), feed.to_str().unwrap()]);
    assert_eq!(out["stats"]["count"], 2);
    assert_eq!(out["stats"]["oldest_timestamp"], 10);
    assert_eq!(out["stats"]["newest_timestamp"], 30);
    assert_eq!(
        out["events"],
        serde_json::json!([hex_id("root"), hex_id("reply2")])
    );
}

#[test]
fn reactions_are_not_double_counted_across_runs() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let feed = write_feed(&dir);
    let root = hex_id("root");

    for _ in 0..2 {
        let out = run_json(&env_path, &["reactions", &root, feed.to_str().unwrap()]);
        assert_eq!(out["record"]["like_count"], 1);
        assert_eq!(out["record"]["zap_count"], 1);
    }
}

#[test]
fn strict_ids_rejects_mismatched_hashes() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let feed = write_feed(&dir);

    // fixture ids are label hashes, not content hashes
    let out = run_json(
        &env_path,
        &["ingest", "--strict-ids", feed.to_str().unwrap()],
    );
    assert_eq!(out["stored"], 0);
    assert_eq!(out["rejected"], 5);
}

#[test]
fn missing_input_fails() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    Command::cargo_bin("stonr-graph")
        .unwrap()
        .args(["--env", &env_path, "ingest", "nope.ndjson"])
        .assert()
        .failure();
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::cargo_bin("stonr-graph")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    for cmd in ["ingest", "thread", "author", "reactions"] {
        assert!(text.contains(cmd));
    }
}
