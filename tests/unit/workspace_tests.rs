//! Unit tests for `WorkspaceManager` hydration and teardown.

use std::sync::Arc;

use agent_bridge::store::{MemoryProjectStore, ProjectStore};
use agent_bridge::workspace::WorkspaceManager;

fn manager(base: &std::path::Path, store: Arc<MemoryProjectStore>) -> WorkspaceManager {
    let store: Arc<dyn ProjectStore> = store;
    WorkspaceManager::new(
        base.to_path_buf(),
        store,
        vec![".git".to_owned(), "node_modules".to_owned()],
    )
}

#[tokio::test]
async fn hydrate_writes_files_and_reports_hashes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryProjectStore::new());
    store.insert("proj", "README.md", "hello").expect("seed");
    store.insert("proj", "src/lib.rs", "pub fn x() {}").expect("seed");

    let workspace = manager(temp.path(), store);
    let hydration = workspace.hydrate("proj").await.expect("hydrate");

    assert_eq!(hydration.root, temp.path().join("proj"));
    assert_eq!(
        std::fs::read_to_string(hydration.root.join("src/lib.rs")).expect("file"),
        "pub fn x() {}"
    );
    let paths: Vec<_> = hydration.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["README.md", "src/lib.rs"]);
    assert!(hydration.files.iter().all(|f| f.hash.len() == 64));
}

#[tokio::test]
async fn hydrate_skips_excluded_directories() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryProjectStore::new());
    store.insert("proj", ".git/HEAD", "ref").expect("seed");
    store.insert("proj", "app.js", "1").expect("seed");

    let workspace = manager(temp.path(), store);
    let hydration = workspace.hydrate("proj").await.expect("hydrate");

    assert_eq!(hydration.files.len(), 1);
    assert!(!hydration.root.join(".git").exists());
}

#[tokio::test]
async fn hydrate_replaces_stale_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let stale = temp.path().join("proj");
    std::fs::create_dir_all(&stale).expect("stale dir");
    std::fs::write(stale.join("leftover.txt"), "old").expect("stale file");

    let workspace = manager(temp.path(), Arc::new(MemoryProjectStore::new()));
    let hydration = workspace.hydrate("proj").await.expect("hydrate");

    assert!(hydration.files.is_empty());
    assert!(!stale.join("leftover.txt").exists());
    assert!(stale.is_dir());
}

#[tokio::test]
async fn teardown_removes_directory_and_tolerates_absence() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryProjectStore::new());
    store.insert("proj", "a.txt", "a").expect("seed");
    let workspace = manager(temp.path(), store);

    workspace.hydrate("proj").await.expect("hydrate");
    assert!(workspace.exists("proj").await);

    workspace.teardown("proj").await;
    assert!(!workspace.exists("proj").await);

    workspace.teardown("proj").await;
}

#[tokio::test]
async fn invalid_project_id_is_rejected_before_io() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = manager(temp.path(), Arc::new(MemoryProjectStore::new()));

    let err = workspace.hydrate("../outside").await.expect_err("bad id");
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(std::fs::read_dir(temp.path()).expect("read").count(), 0);
}
