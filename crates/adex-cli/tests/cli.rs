use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const NOME_RULE: &str = r#"{"kind": "regex", "pattern": "Nome: (.+)", "validator": "[A-Z ]+"}"#;

const OAB_TEXT: &str = "JOANA D'ARC\nNome: JOANA\nInscricao: 101943\nSeccional: PR\n";

/// Command with its config directory pointed at a scratch dir.
fn adex(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("adex").unwrap();
    cmd.env("XDG_CONFIG_HOME", home)
        .env("HOME", home)
        .env_remove("RUST_LOG");
    cmd
}

fn add_nome_rule(home: &Path, store: &Path) {
    adex(home)
        .args(["rules", "add", "--label", "carteira_oab", "--field", "nome"])
        .args(["--rule", NOME_RULE])
        .arg("--rules")
        .arg(store)
        .assert()
        .success()
        .stdout(predicate::str::contains("Added rule for carteira_oab.nome"));
}

#[test]
fn test_help() {
    let home = TempDir::new().unwrap();
    adex(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("rules"));
}

#[test]
fn test_rules_add_then_list() {
    let home = TempDir::new().unwrap();
    let store = home.path().join("rules.json");

    add_nome_rule(home.path(), &store);
    assert!(store.exists());

    adex(home.path())
        .args(["rules", "list", "--rules"])
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("carteira_oab"))
        .stdout(predicate::str::contains("[w=1] regex /Nome: (.+)/"));

    // same rule twice is not duplicated
    adex(home.path())
        .args(["rules", "add", "--label", "carteira_oab", "--field", "nome"])
        .args(["--rule", NOME_RULE])
        .arg("--rules")
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("already present"));
}

#[test]
fn test_rules_add_rejects_malformed_rule() {
    let home = TempDir::new().unwrap();
    let store = home.path().join("rules.json");

    adex(home.path())
        .args(["rules", "add", "--label", "carteira_oab", "--field", "nome"])
        .args(["--rule", r#"{"kind": "regex", "pattern": "Nome: .+", "validator": ".+"}"#])
        .arg("--rules")
        .arg(&store)
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed rule"));

    assert!(!store.exists());
}

#[test]
fn test_rules_check() {
    let home = TempDir::new().unwrap();
    let text = home.path().join("oab.txt");
    fs::write(&text, OAB_TEXT).unwrap();

    adex(home.path())
        .args(["rules", "check", "--rule", NOME_RULE, "--text"])
        .arg(&text)
        .assert()
        .success()
        .stdout(predicate::str::contains("Accepted: \"JOANA\""));

    adex(home.path())
        .args(["rules", "check", "--rule"])
        .arg(r#"{"kind": "regex", "pattern": "Nome: (.+)", "validator": "[0-9]+"}"#)
        .arg("--text")
        .arg(&text)
        .assert()
        .success()
        .stdout(predicate::str::contains("Rejected by validator"));
}

#[test]
fn test_extract_text_file() {
    let home = TempDir::new().unwrap();
    let store = home.path().join("rules.json");
    let text = home.path().join("oab.txt");
    fs::write(&text, OAB_TEXT).unwrap();

    add_nome_rule(home.path(), &store);

    adex(home.path())
        .arg("extract")
        .arg(&text)
        .args(["--label", "carteira_oab", "--field", "nome", "--field", "seccional"])
        .arg("--rules")
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"nome\": \"JOANA\""))
        .stdout(predicate::str::contains("\"cache_misses\": [\n      \"seccional\""))
        .stderr(predicate::str::contains("1 field(s) had no matching rule"));

    // the hit was credited and written back
    let saved = fs::read_to_string(&store).unwrap();
    assert!(saved.contains("\"weight\": 2"));
}

#[test]
fn test_extract_requires_store() {
    let home = TempDir::new().unwrap();
    let text = home.path().join("oab.txt");
    fs::write(&text, OAB_TEXT).unwrap();

    adex(home.path())
        .arg("extract")
        .arg(&text)
        .args(["--label", "carteira_oab", "--field", "nome"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No rule store configured"));
}

#[test]
fn test_run_cache_only() {
    let home = TempDir::new().unwrap();
    let store = home.path().join("rules.json");
    let dataset = home.path().join("oab.json");
    let csv = home.path().join("summary.csv");

    add_nome_rule(home.path(), &store);

    let documents = serde_json::json!([
        {
            "label": "carteira_oab",
            "filename": "oab_1.pdf",
            "pdf_text": OAB_TEXT,
            "extraction_schema": {"nome": "Nome do profissional"},
            "expected_answer": {"nome": "JOANA"}
        },
        {
            "label": "carteira_oab",
            "filename": "oab_2.pdf",
            "pdf_text": "Nome: 123\n",
            "extraction_schema": {"nome": "Nome do profissional"}
        }
    ]);
    fs::write(&dataset, documents.to_string()).unwrap();

    adex(home.path())
        .arg("run")
        .arg(&dataset)
        .arg("--no-oracle")
        .arg("--rules")
        .arg(&store)
        .arg("--summary")
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed 2 documents"));

    let results_path = home.path().join("oab_with_cache_result.json");
    let results: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&results_path).unwrap()).unwrap();

    assert_eq!(results["summary"]["documents"], 2);
    assert_eq!(results["summary"]["fast_path_documents"], 1);
    assert_eq!(results["summary"]["mean_accuracy"], 100.0);
    assert_eq!(results["summary"]["usage"]["prompt_tokens"], 0);
    assert_eq!(results["summary"]["cost_usd"], 0.0);
    assert_eq!(results["documents"][0]["answers"]["nome"], "JOANA");
    assert_eq!(results["documents"][1]["cache_misses"][0], "nome");

    let summary = fs::read_to_string(&csv).unwrap();
    let mut lines = summary.lines();
    assert_eq!(
        lines.next(),
        Some(
            "index,name,label,cache_hits,cache_misses,rules_added,oracle_calls,\
             prompt_tokens,completion_tokens,cost_usd,accuracy,elapsed_ms"
        )
    );
    assert!(lines.next().unwrap().starts_with("0,oab_1.pdf,carteira_oab,1,0,0,0,0,0,0.000000,100.00,"));
    assert!(lines.next().unwrap().starts_with("1,oab_2.pdf,carteira_oab,0,1,0,0,0,0,0.000000,,"));
}

#[test]
fn test_run_needs_api_key_for_oracle() {
    let home = TempDir::new().unwrap();
    let dataset = home.path().join("oab.json");
    fs::write(
        &dataset,
        r#"[{"label": "carteira_oab", "pdf_text": "Nome: JOANA", "extraction_schema": {"nome": ""}}]"#,
    )
    .unwrap();

    adex(home.path())
        .arg("run")
        .arg(&dataset)
        .arg("--no-cache")
        .env_remove("OPENAI_API_KEY")
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENAI_API_KEY not set"));
}

#[test]
fn test_config_init_and_get() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("adex.json");

    adex(home.path())
        .args(["config", "init", "--output"])
        .arg(&config)
        .assert()
        .success();
    assert!(config.exists());

    adex(home.path())
        .arg("--config")
        .arg(&config)
        .args(["config", "get", "extraction.max_attempts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5"));

    adex(home.path())
        .arg("--config")
        .arg(&config)
        .args(["config", "set", "extraction.max_attempts", "0"])
        .assert()
        .failure();
}
