use serde_json::{Value, json};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn write_rows(dir: &TempDir) -> std::path::PathBuf {
    let rows = json!([
        {
            "id": 1,
            "name": "Hello world",
            "tags": ["a", "b"],
            "lines": [{ "id": 1, "description": "first" }]
        },
        {
            "id": 2,
            "name": "Bye",
            "tags": ["c"],
            "lines": [{ "id": 2, "description": "world tour" }]
        },
        {
            "id": 3,
            "name": null,
            "tags": [],
            "lines": []
        }
    ]);

    let path = dir.path().join("rows.json");
    std::fs::write(&path, rows.to_string()).unwrap();
    path
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_querykit"))
        .current_dir(dir)
        .env_remove("QUERYKIT_PAGE_SIZE")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .unwrap()
}

fn ids(page: &Value) -> Vec<i64> {
    page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_i64().unwrap())
        .collect()
}

fn page_of(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_search_across_fields() {
    let dir = TempDir::new().unwrap();
    let input = write_rows(&dir);

    let output = run(
        dir.path(),
        &[
            "search",
            "--input",
            input.to_str().unwrap(),
            "--field",
            "name",
            "--field",
            "lines.description",
            "--value",
            "world",
        ],
    );
    let page = page_of(&output);

    assert_eq!(vec![1, 2], ids(&page));
    assert_eq!(json!(1), page["current_page"]);
    assert_eq!(json!(1), page["total_pages"]);
    assert_eq!(json!(2), page["total_count"]);
}

#[test]
fn test_search_without_value_pages_everything() {
    let dir = TempDir::new().unwrap();
    let input = write_rows(&dir);

    let output = run(
        dir.path(),
        &[
            "search",
            "--input",
            input.to_str().unwrap(),
            "--field",
            "name",
            "--page",
            "2",
            "--page-size",
            "2",
        ],
    );
    let page = page_of(&output);

    assert_eq!(vec![3], ids(&page));
    assert_eq!(json!(2), page["current_page"]);
    assert_eq!(json!(2), page["total_pages"]);
    assert_eq!(json!(3), page["total_count"]);
}

#[test]
fn test_page_size_from_env() {
    let dir = TempDir::new().unwrap();
    let input = write_rows(&dir);

    let output = Command::new(env!("CARGO_BIN_EXE_querykit"))
        .current_dir(dir.path())
        .env("QUERYKIT_PAGE_SIZE", "1")
        .args(["search", "--input", input.to_str().unwrap(), "--field", "name"])
        .output()
        .unwrap();
    let page = page_of(&output);

    assert_eq!(vec![1], ids(&page));
    assert_eq!(json!(3), page["total_pages"]);
}

#[test]
fn test_filter_combines_conditions() {
    let dir = TempDir::new().unwrap();
    let input = write_rows(&dir);
    let input = input.to_str().unwrap();

    let and = page_of(&run(
        dir.path(),
        &["filter", "--input", input, "--in", "id=1,3", "--contains", "name=o"],
    ));
    assert_eq!(vec![1], ids(&and));

    let or = page_of(&run(
        dir.path(),
        &[
            "filter", "--input", input, "--in", "id=1,3", "--contains", "name=o", "--op", "or",
        ],
    ));
    assert_eq!(vec![1, 3], ids(&or));
}

#[test]
fn test_filter_without_conditions_matches_everything() {
    let dir = TempDir::new().unwrap();
    let input = write_rows(&dir);

    let page = page_of(&run(
        dir.path(),
        &["filter", "--input", input.to_str().unwrap()],
    ));

    assert_eq!(vec![1, 2, 3], ids(&page));
}

#[test]
fn test_rejects_malformed_arguments() {
    let dir = TempDir::new().unwrap();
    let input = write_rows(&dir);
    let input = input.to_str().unwrap();

    let output = run(dir.path(), &["filter", "--input", input, "--contains", "name"]);
    assert!(!output.status.success());

    let output = run(
        dir.path(),
        &["filter", "--input", input, "--contains", "name=o", "--op", "xor"],
    );
    assert!(!output.status.success());

    let output = run(
        dir.path(),
        &["search", "--input", input, "--field", "missing", "--value", "o"],
    );
    assert!(!output.status.success());
}
