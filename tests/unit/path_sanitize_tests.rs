//! Unit tests for relative path sanitization and project id validation.

use agent_bridge::sanitize::{is_excluded, sanitize_path, validate_project_id};

#[test]
fn traversal_segments_are_removed() {
    assert_eq!(sanitize_path("../../etc/passwd"), "etc/passwd");
    assert_eq!(sanitize_path("src/../../secret"), "src/secret");
    assert_eq!(sanitize_path("a/./b/.."), "a/b");
}

#[test]
fn leading_and_repeated_separators_collapse() {
    assert_eq!(sanitize_path("/abs/path.txt"), "abs/path.txt");
    assert_eq!(sanitize_path("//a///b//c"), "a/b/c");
    assert_eq!(sanitize_path("dir\\sub\\file.rs"), "dir/sub/file.rs");
}

#[test]
fn illegal_and_control_characters_are_stripped() {
    assert_eq!(sanitize_path("we<ir>d:na\"me|?.txt"), "weirdname.txt");
    assert_eq!(sanitize_path("tab\there\u{7}.md"), "tabhere.md");
    assert_eq!(sanitize_path("*/x"), "x");
}

#[test]
fn unusable_input_sanitizes_to_empty() {
    assert_eq!(sanitize_path(""), "");
    assert_eq!(sanitize_path("../.."), "");
    assert_eq!(sanitize_path("///"), "");
}

#[test]
fn sanitize_is_idempotent() {
    for input in [
        "../../etc/passwd",
        "/a//b/../c",
        "..\\..\\windows\\system32",
        "a/. ./b",
        "x/..../y",
        "nested/<dir>/..:/file?",
        "ok/file.txt",
    ] {
        let once = sanitize_path(input);
        assert_eq!(sanitize_path(&once), once, "input {input:?}");
        assert!(!once.starts_with('/'), "input {input:?}");
        assert!(!once.split('/').any(|s| s == ".."), "input {input:?}");
    }
}

#[test]
fn excluded_directories_match_any_segment() {
    let excluded = vec![".git".to_owned(), "node_modules".to_owned()];
    assert!(is_excluded(".git/config", &excluded));
    assert!(is_excluded("web/node_modules/react/index.js", &excluded));
    assert!(!is_excluded("src/git/mod.rs", &excluded));
    assert!(!is_excluded(".gitignore", &excluded));
}

#[test]
fn project_ids_are_validated() {
    assert!(validate_project_id("proj-1").is_ok());
    assert!(validate_project_id("A.b_c-9").is_ok());

    let long = "x".repeat(129);
    for bad in ["", ".hidden", "..", "a/b", "a b", "p\u{e9}", long.as_str()] {
        let err = validate_project_id(bad).expect_err(bad);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
