//! Unit tests for `SyncEngine` download and reconciliation.

use std::sync::Arc;

use agent_bridge::models::file::FileRecord;
use agent_bridge::store::{MemoryProjectStore, ProjectStore, StoreFuture};
use agent_bridge::sync::{SyncEngine, SyncOptions};
use agent_bridge::workspace::WorkspaceManager;
use agent_bridge::AppError;

fn engine(base: &std::path::Path, store: Arc<dyn ProjectStore>, options: SyncOptions) -> SyncEngine {
    let workspace = WorkspaceManager::new(base.to_path_buf(), Arc::clone(&store), vec![".git".into()]);
    SyncEngine::new(store, workspace, options)
}

fn seeded() -> Arc<MemoryProjectStore> {
    let store = Arc::new(MemoryProjectStore::new());
    store.insert("proj", "README.md", "# readme").expect("seed");
    store.insert("proj", "src/a.rs", "a").expect("seed");
    store
}

#[tokio::test]
async fn untouched_tree_reports_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = seeded();
    let engine = engine(temp.path(), store, SyncOptions::default());

    let hydration = engine.download("proj").await.expect("download");
    let report = engine.reconcile("proj", &hydration.root).await.expect("reconcile");

    assert!(report.changed.is_empty());
    assert!(report.deleted.is_empty());
    assert!(report.is_clean());
}

#[tokio::test]
async fn only_modified_and_new_files_are_uploaded() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = seeded();
    let engine = engine(temp.path(), Arc::clone(&store) as Arc<dyn ProjectStore>, SyncOptions::default());

    let hydration = engine.download("proj").await.expect("download");
    std::fs::write(hydration.root.join("src/a.rs"), "changed").expect("modify");
    std::fs::write(hydration.root.join("b.txt"), "new").expect("create");
    std::fs::create_dir_all(hydration.root.join(".git")).expect("git dir");
    std::fs::write(hydration.root.join(".git/index"), "ignored").expect("git file");

    let report = engine.reconcile("proj", &hydration.root).await.expect("reconcile");
    assert_eq!(report.changed, vec!["b.txt", "src/a.rs"]);

    let remote = store.snapshot("proj").expect("snapshot");
    assert_eq!(remote["src/a.rs"], b"changed");
    assert_eq!(remote["b.txt"], b"new");
    assert!(!remote.contains_key(".git/index"));

    let again = engine.reconcile("proj", &hydration.root).await.expect("second pass");
    assert!(again.changed.is_empty(), "index updated after upload");
}

#[tokio::test]
async fn rewriting_identical_content_is_not_a_change() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = engine(temp.path(), seeded(), SyncOptions::default());

    let hydration = engine.download("proj").await.expect("download");
    std::fs::write(hydration.root.join("README.md"), "# readme").expect("rewrite");

    let report = engine.reconcile("proj", &hydration.root).await.expect("reconcile");
    assert!(report.changed.is_empty());
}

#[tokio::test]
async fn ignore_patterns_skip_uploads() {
    let temp = tempfile::tempdir().expect("tempdir");
    let options = SyncOptions {
        ignore_patterns: vec![glob::Pattern::new("*.log").expect("glob")],
        propagate_deletions: false,
    };
    let engine = engine(temp.path(), seeded(), options);

    let hydration = engine.download("proj").await.expect("download");
    std::fs::write(hydration.root.join("debug.log"), "noise").expect("log");

    let report = engine.reconcile("proj", &hydration.root).await.expect("reconcile");
    assert!(report.changed.is_empty());
}

#[tokio::test]
async fn deletions_are_reported_but_not_propagated_by_default() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = seeded();
    let engine = engine(temp.path(), Arc::clone(&store) as Arc<dyn ProjectStore>, SyncOptions::default());

    let hydration = engine.download("proj").await.expect("download");
    std::fs::remove_file(hydration.root.join("README.md")).expect("delete");

    let report = engine.reconcile("proj", &hydration.root).await.expect("reconcile");
    assert_eq!(report.deleted, vec!["README.md"]);
    assert!(store.snapshot("proj").expect("snapshot").contains_key("README.md"));
}

#[tokio::test]
async fn deletions_propagate_when_enabled() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = seeded();
    let options = SyncOptions {
        ignore_patterns: Vec::new(),
        propagate_deletions: true,
    };
    let engine = engine(temp.path(), Arc::clone(&store) as Arc<dyn ProjectStore>, options);

    let hydration = engine.download("proj").await.expect("download");
    std::fs::remove_file(hydration.root.join("README.md")).expect("delete");

    let report = engine.reconcile("proj", &hydration.root).await.expect("reconcile");
    assert_eq!(report.deleted, vec!["README.md"]);
    assert!(!store.snapshot("proj").expect("snapshot").contains_key("README.md"));
    assert!(engine.index().get("proj", "README.md").is_none());
}

/// Store that refuses writes to one path.
struct RejectingStore {
    inner: MemoryProjectStore,
    reject: &'static str,
}

impl ProjectStore for RejectingStore {
    fn list_files(&self, project_id: &str) -> StoreFuture<'_, Vec<FileRecord>> {
        self.inner.list_files(project_id)
    }

    fn write_file(&self, project_id: &str, path: &str, content: Vec<u8>) -> StoreFuture<'_, ()> {
        if path == self.reject {
            let path = path.to_owned();
            return Box::pin(async move {
                Err::<(), _>(AppError::Store(format!("quota exceeded for {path}")))
            });
        }
        self.inner.write_file(project_id, path, content)
    }

    fn delete_file(&self, project_id: &str, path: &str) -> StoreFuture<'_, ()> {
        self.inner.delete_file(project_id, path)
    }
}

#[tokio::test]
async fn one_failed_upload_does_not_abort_the_rest() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(RejectingStore {
        inner: MemoryProjectStore::new(),
        reject: "bad.bin",
    });
    let engine = engine(temp.path(), Arc::clone(&store) as Arc<dyn ProjectStore>, SyncOptions::default());

    let hydration = engine.download("proj").await.expect("download");
    std::fs::write(hydration.root.join("bad.bin"), "x").expect("write");
    std::fs::write(hydration.root.join("good.txt"), "y").expect("write");

    let report = engine.reconcile("proj", &hydration.root).await.expect("reconcile");
    assert_eq!(report.changed, vec!["good.txt"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "bad.bin");
    assert!(report.failures[0].message.contains("quota exceeded"));
    assert!(!report.is_clean());

    let retry = engine.reconcile("proj", &hydration.root).await.expect("retry");
    assert_eq!(retry.failures.len(), 1, "failed file is retried next pass");
}

#[cfg(unix)]
#[tokio::test]
async fn names_colliding_after_sanitization_are_reported() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = seeded();
    let engine = engine(temp.path(), Arc::clone(&store) as Arc<dyn ProjectStore>, SyncOptions::default());

    let hydration = engine.download("proj").await.expect("download");
    std::fs::write(hydration.root.join("notes?.txt"), "odd").expect("create odd");
    std::fs::write(hydration.root.join("notes.txt"), "clean").expect("create clean");

    let report = engine.reconcile("proj", &hydration.root).await.expect("reconcile");
    assert_eq!(report.changed, vec!["notes.txt"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "notes?.txt");
    assert!(report.failures[0].message.contains("notes.txt"));
    assert!(!report.is_clean());

    let remote = store.snapshot("proj").expect("snapshot");
    assert_eq!(remote["notes.txt"], b"clean");
}
