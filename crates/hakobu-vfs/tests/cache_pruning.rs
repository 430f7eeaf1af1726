//! File cache and pruner working together.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use hakobu_vfs::{
    BackendRegistry, BytesResource, CopyMode, EventBus, FileCache, FolderHandle, FolderPruner,
    MemoryBackend, Percent, PrunerConfig, VfsEvent, VfsPath,
};

const DAY: Duration = Duration::from_secs(86_400);

fn memory_registry() -> Arc<BackendRegistry> {
    let registry = BackendRegistry::new();
    registry.register(MemoryBackend::new());
    Arc::new(registry)
}

async fn add_aged(folder: &FolderHandle, name: &str, days: u32, size: usize) {
    let file = folder.file(name);
    file.write_all(&vec![b'x'; size]).await.unwrap();
    assert!(file.set_last_modified(SystemTime::now() - DAY * days).await.unwrap());
}

// ============================================================================
// Pruner policy
// ============================================================================

#[tokio::test]
async fn oldest_file_goes_first_regardless_of_size() {
    let registry = memory_registry();
    let folder = registry.folder("mem:/store");
    // Sizes chosen so that removing the largest file would also satisfy capacity
    add_aged(&folder, "ten-days", 10, 200).await;
    add_aged(&folder, "five-days", 5, 500).await;
    add_aged(&folder, "twenty-days", 20, 200).await;

    let pruner = FolderPruner::new(folder.clone());
    pruner.set_capacity(Some(800));
    let report = pruner.run_once().await.unwrap();

    let removed: Vec<_> = report.removed.iter().filter_map(|f| f.name()).collect();
    assert_eq!(removed, vec!["twenty-days"]);
    assert!(folder.file("five-days").exists().await.unwrap());
    assert!(folder.file("ten-days").exists().await.unwrap());
}

#[tokio::test]
async fn no_pressure_means_no_removals() {
    let registry = memory_registry();
    let folder = registry.folder("mem:/store");
    add_aged(&folder, "ancient", 365, 100).await;
    add_aged(&folder, "old", 30, 100).await;

    let pruner = FolderPruner::new(folder.clone());
    pruner.set_capacity(Some(200));
    pruner.set_minimum_age(DAY);
    pruner.set_minimum_usable_fraction(Percent::new(15.0));

    for _ in 0..3 {
        let report = pruner.run_once().await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.remaining_bytes, 200);
    }
    assert_eq!(folder.nested_files(&Default::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn disk_pressure_evicts_until_threshold() {
    let registry = Arc::new(BackendRegistry::new());
    registry.register(MemoryBackend::with_capacity(10_000));
    let folder = registry.folder("mem:/store");
    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        add_aged(&folder, name, 10 - i as u32, 2_000).await;
    }
    assert_eq!(folder.usable_fraction().await.unwrap(), Percent::new(20.0));

    let pruner = FolderPruner::from_config(
        folder.clone(),
        &PrunerConfig {
            minimum_usable_percent: 50.0,
            ..Default::default()
        },
    )
    .unwrap();
    let report = pruner.run_once().await.unwrap();

    let removed: Vec<_> = report.removed.iter().filter_map(|f| f.name()).collect();
    assert_eq!(removed, vec!["a", "b"]);
    assert_eq!(folder.usable_fraction().await.unwrap(), Percent::new(60.0));
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn second_add_with_same_name_is_a_no_op() {
    let registry = memory_registry();
    let cache = FileCache::new(registry.folder("mem:/cache"));

    let first = cache
        .add(&BytesResource::new("model.bin", "version one"), CopyMode::Overwrite)
        .await
        .unwrap();
    let first_mtime = first.last_modified().await.unwrap();

    // Different content, same name: the cache keeps the first copy
    let second = cache
        .add(&BytesResource::new("model.bin", "version two"), CopyMode::Overwrite)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second.read_to_string().await.unwrap(), "version one");
    assert_eq!(second.last_modified().await.unwrap(), first_mtime);
}

#[tokio::test]
async fn cache_from_file_handle_source() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dunce::canonicalize(dir.path()).unwrap();
    std::fs::write(root.join("input.csv"), b"a,b\n1,2\n").unwrap();

    let registry = Arc::new(BackendRegistry::with_defaults());
    let source = registry.file(VfsPath::from_local(&root.join("input.csv")));
    let cache = FileCache::new(registry.folder("mem:/cache"));

    let cached = cache.add(&source, CopyMode::DoNotOverwrite).await.unwrap();
    assert_eq!(cached.path().to_string(), "mem:/cache/input.csv");
    assert_eq!(cached.read_all().await.unwrap(), b"a,b\n1,2\n");
    assert!(cached.local_path().unwrap().is_none());
    assert!(registry.folder(VfsPath::from_local(&root)).exists().await.unwrap());
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn cached_file_is_pruned_at_zero_capacity() {
    let registry = memory_registry();
    let folder = registry.folder("mem:/cache");
    assert!(folder.mkdirs().await.unwrap());
    assert!(folder.is_empty().await.unwrap());

    let cache = FileCache::new(folder.clone());
    let added = cache
        .add(&BytesResource::new("x.txt", "resource A"), CopyMode::Overwrite)
        .await
        .unwrap();
    let x = registry.file("mem:/cache/x.txt");
    assert_eq!(added, x);
    assert!(x.exists().await.unwrap());
    assert_eq!(x.read_to_string().await.unwrap(), "resource A");

    let bus = EventBus::new(16);
    let mut removed = bus.subscribe("prune.removed");
    let pruner = FolderPruner::with_sink(folder, Arc::new(bus));
    pruner.set_minimum_age(Duration::ZERO);
    pruner.set_capacity(Some(0));
    pruner.set_frequency(Duration::from_millis(20));
    assert!(pruner.start());

    let msg = tokio::time::timeout(Duration::from_secs(5), removed.recv())
        .await
        .expect("pruner did not remove the file in time")
        .unwrap();
    assert!(matches!(msg.event, VfsEvent::FileRemoved { ref path, .. } if path == "mem:/cache/x.txt"));
    assert!(pruner.stop(Duration::from_secs(5)).await);

    assert!(!x.exists().await.unwrap());
    assert!(!cache.contains("x.txt").await.unwrap());
}
