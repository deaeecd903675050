use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const SECRET: &str = "letmein";

fn docqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docqa");
    path
}

fn setup_test_env(store_section: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.txt"),
        "Alpha handbook. New hires receive 20 vacation days.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta\n\nThe office closes at 6pm on Fridays.",
    )
    .unwrap();

    let config_content = format!(
        r#"{store}

[completion]
endpoint = "http://127.0.0.1:9/v1/chat/completions"
api_key_env = "DOCQA_IT_API_KEY"
timeout_secs = 5

[admin]
mode = "password"
secret = "{secret}"
"#,
        store = store_section.replace("{root}", &root.display().to_string()),
        secret = SECRET,
    );

    let config_path = root.join("config").join("docqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn default_store() -> &'static str {
    "[store]\npath = \"{root}/data/knowledge.json\"\n"
}

fn run_docqa_with(config_path: &Path, args: &[&str], api_key: Option<&str>) -> (String, String, i32) {
    let binary = docqa_binary();
    let mut cmd = Command::new(&binary);
    cmd.current_dir(config_path.parent().unwrap())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("DOCQA_IT_API_KEY");
    if let Some(key) = api_key {
        cmd.env("DOCQA_IT_API_KEY", key);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code().unwrap_or(-1))
}

fn run_docqa(config_path: &Path, args: &[&str]) -> (String, String, i32) {
    run_docqa_with(config_path, args, Some("test-key"))
}

fn files(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_missing_api_key_refuses_to_start() {
    let (_tmp, config_path) = setup_test_env(default_store());
    let (_, stderr, code) = run_docqa_with(&config_path, &["status"], None);
    assert_ne!(code, 0);
    assert!(stderr.contains("DOCQA_IT_API_KEY"), "stderr={}", stderr);
}

#[test]
fn test_status_on_fresh_install() {
    let (_tmp, config_path) = setup_test_env(default_store());
    let (stdout, stderr, code) = run_docqa(&config_path, &["status"]);
    assert_eq!(code, 0, "stderr={}", stderr);
    assert!(stdout.contains("characters:  0"));
    assert!(stdout.contains("updated:     never"));
}

#[test]
fn test_ingest_persists_across_processes() {
    let (_tmp, config_path) = setup_test_env(default_store());
    let alpha = files(&config_path, "alpha.txt");
    let beta = files(&config_path, "beta.md");

    let (stdout, stderr, code) =
        run_docqa(&config_path, &["ingest", &alpha, &beta, "--secret", SECRET]);
    assert_eq!(code, 0, "stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Ingested 2 document(s)"));

    let expected = "Alpha handbook. New hires receive 20 vacation days.\n\n# Beta\n\nThe office closes at 6pm on Fridays.";
    let (stdout, _, code) = run_docqa(&config_path, &["status"]);
    assert_eq!(code, 0);
    assert!(stdout.contains(&format!("characters:  {}", expected.chars().count())));
    assert!(stdout.contains("alpha.txt"));
    assert!(stdout.contains("beta.md"));

    let artifact = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("data")
        .join("knowledge.json");
    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(artifact).unwrap()).unwrap();
    assert_eq!(stored["content"], expected);
}

#[test]
fn test_ingest_with_wrong_secret_changes_nothing() {
    let (_tmp, config_path) = setup_test_env(default_store());
    let alpha = files(&config_path, "alpha.txt");

    let (_, stderr, code) = run_docqa(&config_path, &["ingest", &alpha, "--secret", "LETMEIN"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("admin secret does not match"));

    let (stdout, _, _) = run_docqa(&config_path, &["status"]);
    assert!(stdout.contains("characters:  0"));
}

#[test]
fn test_ingest_truncates_to_character_limit() {
    let (_tmp, config_path) = setup_test_env(
        "[store]\npath = \"{root}/data/knowledge.json\"\ncharacter_limit = 16\n",
    );
    let alpha = files(&config_path, "alpha.txt");

    let (stdout, stderr, code) = run_docqa(&config_path, &["ingest", &alpha, "--secret", SECRET]);
    assert_eq!(code, 0, "stderr={}", stderr);
    assert!(stdout.contains("16 characters stored (limit 16)"));
}

#[test]
fn test_sqlite_backend_roundtrip() {
    let (_tmp, config_path) = setup_test_env(
        "[store]\nbackend = \"sqlite\"\npath = \"{root}/data/knowledge.sqlite\"\n",
    );
    let beta = files(&config_path, "beta.md");

    let (_, stderr, code) = run_docqa(&config_path, &["ingest", &beta, "--secret", SECRET]);
    assert_eq!(code, 0, "stderr={}", stderr);

    let (stdout, _, code) = run_docqa(&config_path, &["status"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("documents:   1"));
    assert!(stdout.contains("beta.md"));
}

#[test]
fn test_ask_before_ingest_is_reported() {
    let (_tmp, config_path) = setup_test_env(default_store());
    let (_, stderr, code) = run_docqa(&config_path, &["ask", "How many vacation days?"]);
    assert_eq!(code, 2);
    assert!(stderr.contains("No documents have been uploaded yet"));
}

#[test]
fn test_ask_with_unreachable_service_is_reported() {
    let (_tmp, config_path) = setup_test_env(default_store());
    let alpha = files(&config_path, "alpha.txt");
    run_docqa(&config_path, &["ingest", &alpha, "--secret", SECRET]);

    let (_, stderr, code) = run_docqa(&config_path, &["ask", "How many vacation days?"]);
    assert_eq!(code, 2);
    assert!(stderr.contains("could not be reached"), "stderr={}", stderr);
}
