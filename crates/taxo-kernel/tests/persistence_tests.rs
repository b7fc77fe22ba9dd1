//! Durable storage: restart recovery, corrupt files and the on-disk audit chain.

use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use taxo_kernel::config::StorageConfig;
use taxo_kernel::engine::TaxonomyEngine;
use taxo_kernel::error::{BackendError, TaxonomyError};
use taxo_kernel::logging::FileAuditLog;
use taxo_kernel::persistence::{MemoryBackend, SnapshotBackend};
use taxo_kernel::version::{VersionDocument, VersionMeta};
use taxo_kernel::{Actor, TaxonomyEdge, VersionId};
use taxo_test_utils::{add_child, curator, open_engine, root_and_child, test_config, v, A, B, R};

async fn json_engine(dir: &std::path::Path) -> TaxonomyEngine {
    let config = test_config().with_storage(StorageConfig::JsonFile {
        path: dir.to_path_buf(),
    });
    TaxonomyEngine::from_config(config).await.unwrap()
}

#[tokio::test]
async fn restart_recovers_versions_and_active_pointer() {
    let dir = tempfile::tempdir().unwrap();

    let (v1, v11, before) = {
        let engine = json_engine(dir.path()).await;
        let v1 = engine.apply(VersionId::BOOTSTRAP, &root_and_child()).await.unwrap();
        let v11 = engine.apply(v1, &add_child(A, B, "B")).await.unwrap();
        engine.activate(v11, curator()).await.unwrap();
        let before = serde_json::to_vec(&engine.get_tree(Some(v11)).unwrap().to_document()).unwrap();
        (v1, v11, before)
    };

    let engine = json_engine(dir.path()).await;
    assert_eq!(engine.active_version(), v11);
    let ids: Vec<_> = engine.list_versions().iter().map(|m| m.version_id).collect();
    assert_eq!(ids, vec![VersionId::BOOTSTRAP, v1, v11]);

    let after = serde_json::to_vec(&engine.get_tree(Some(v11)).unwrap().to_document()).unwrap();
    assert_eq!(after, before);

    // Numbering continues from the recovered catalog.
    let next = engine.apply(v11, &add_child(A, taxo_test_utils::id(0x400), "C")).await.unwrap();
    assert_eq!(next, v(1, 2));

    let events = FileAuditLog::verify_file(dir.path().join("audit.jsonl")).unwrap();
    assert!(events >= 5, "only {events} events");
}

#[tokio::test]
async fn prune_deletes_the_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let engine = json_engine(dir.path()).await;
    let v1 = engine.apply(VersionId::BOOTSTRAP, &root_and_child()).await.unwrap();
    engine.activate(v1, curator()).await.unwrap();
    let snapshot = dir.path().join("versions").join("0.0.json");
    assert!(snapshot.exists());

    let engine = {
        drop(engine);
        let config = test_config()
            .with_rollback_targets(1)
            .with_storage(StorageConfig::JsonFile {
                path: dir.path().to_path_buf(),
            });
        TaxonomyEngine::from_config(config).await.unwrap()
    };
    engine.prune(VersionId::BOOTSTRAP, curator()).await.unwrap();
    assert!(!snapshot.exists());
}

#[tokio::test]
async fn unreadable_snapshot_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = json_engine(dir.path()).await;
        engine.apply(VersionId::BOOTSTRAP, &root_and_child()).await.unwrap();
    }
    std::fs::write(dir.path().join("versions").join("1.0.json"), b"{ not json").unwrap();

    let err = TaxonomyEngine::from_config(test_config().with_storage(StorageConfig::JsonFile {
        path: dir.path().to_path_buf(),
    }))
    .await
    .unwrap_err();
    assert!(matches!(err, TaxonomyError::Persistence { .. }), "{err:?}");
}

#[tokio::test]
async fn snapshot_that_no_longer_validates_fails_startup() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let t = open_engine(test_config(), backend.clone()).await;
        t.engine.apply(VersionId::BOOTSTRAP, &root_and_child()).await.unwrap();
    }

    // Inject a cyclic version directly into storage.
    let base = backend.load().await.unwrap().unwrap().snapshots.pop().unwrap();
    let mut edges = base.edges.clone();
    edges.push(TaxonomyEdge {
        parent: A,
        child: R,
        version: v(1, 1),
    });
    let bad = VersionDocument {
        meta: VersionMeta {
            version_id: v(1, 1),
            parent_version: Some(v(1, 0)),
            created_at: Utc::now(),
            author: Actor::new("intruder"),
            description: None,
            node_count: base.nodes.len(),
            edge_count: edges.len(),
        },
        nodes: base.nodes,
        edges,
    };
    backend.persist_snapshot(&bad).await.unwrap();

    let audit = Arc::new(taxo_kernel::logging::AuditLog::new());
    let err = TaxonomyEngine::open(test_config(), backend, audit).await.unwrap_err();
    let TaxonomyError::Persistence {
        operation, source, ..
    } = err
    else {
        panic!("expected a persistence error");
    };
    assert_eq!(operation, "recover");
    assert!(matches!(source, BackendError::Corrupt(_)));
}

#[tokio::test]
async fn tampered_audit_file_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = json_engine(dir.path()).await;
        let v1 = engine.apply(VersionId::BOOTSTRAP, &root_and_child()).await.unwrap();
        engine.activate(v1, curator()).await.unwrap();
    }
    let path = dir.path().join("audit.jsonl");
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replacen("curator", "mallory", 1)).unwrap();

    assert!(FileAuditLog::verify_file(&path).is_err());
}
