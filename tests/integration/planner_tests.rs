use hashmerge::cache::HashCache;
use hashmerge::planner::{Planner, SourceRoot};
use hashmerge::refresh::{
    refresh_remote_metadata, run_budgeted_hashing, HashBudget, LocalObserver, SecondaryKey,
};
use hashmerge::remote::{LocalChannel, RemoteChannel};
use hashmerge::scanner::HashAlgorithm;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const NOW: i64 = 1_800_000_000;

fn unlimited() -> HashBudget {
    HashBudget {
        max_files: 0,
        max_bytes: 0,
        secondary: SecondaryKey::Size,
    }
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn root_string(dir: &TempDir) -> String {
    dir.path().to_string_lossy().into_owned()
}

/// Refreshes both sides at `now` and plans with round scoping.
fn refresh_and_plan(
    cache: &HashCache,
    channel: &LocalChannel,
    local: &Path,
    sources: &[SourceRoot],
    budget: &HashBudget,
    now: i64,
) -> hashmerge::planner::Plan {
    let algo = channel.detect_algorithm();
    let observer = LocalObserver::new(cache, local, algo);
    observer.refresh(now, None).unwrap();

    let roots: Vec<String> = sources.iter().map(|s| s.root.clone()).collect();
    refresh_remote_metadata(cache, channel, &roots, algo, now).unwrap();
    run_budgeted_hashing(cache, channel, &roots, algo, budget, 2, now).unwrap();

    Planner::new(cache, observer.root_key(), channel.host(), sources, algo)
        .plan(Some(now))
        .unwrap()
}

#[test]
fn test_plan_ignores_content_present_under_another_name() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write(src.path(), "photos/2024/img.jpg", b"jpeg bytes");
    write(src.path(), "docs/new.txt", b"only remote");
    write(dst.path(), "archive/renamed.jpg", b"jpeg bytes");

    let cache = HashCache::in_memory().unwrap();
    let channel = LocalChannel::new("srv");
    let sources = vec![SourceRoot {
        root: root_string(&src),
        alias: "src".into(),
    }];

    let plan = refresh_and_plan(&cache, &channel, dst.path(), &sources, &unlimited(), NOW);

    assert_eq!(plan.planned_files, 1);
    assert_eq!(plan.planned_bytes, 11);
    let paths: Vec<_> = plan.combined_paths().into_iter().collect();
    assert_eq!(paths, vec!["docs/new.txt".to_string()]);
    assert_eq!(plan.per_subfolder["docs"].files, 1);
}

#[test]
fn test_remote_duplicates_are_all_planned() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write(src.path(), "a/one.txt", b"same");
    write(src.path(), "b/two.txt", b"same");

    let cache = HashCache::in_memory().unwrap();
    let channel = LocalChannel::new("srv");
    let sources = vec![SourceRoot {
        root: root_string(&src),
        alias: "src".into(),
    }];

    let plan = refresh_and_plan(&cache, &channel, dst.path(), &sources, &unlimited(), NOW);

    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.planned_files, 2);
    assert_eq!(plan.planned_bytes, 8);
    let group = plan.entries.values().next().unwrap();
    assert_eq!(group[0].combined_rel, "a/one.txt");
    assert_eq!(group[1].combined_rel, "b/two.txt");
}

#[test]
fn test_multiple_roots_are_prefixed_by_alias() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write(first.path(), "x.txt", b"first");
    write(second.path(), "x.txt", b"second");

    let cache = HashCache::in_memory().unwrap();
    let channel = LocalChannel::new("srv");
    let sources = vec![
        SourceRoot {
            root: root_string(&first),
            alias: "data".into(),
        },
        SourceRoot {
            root: root_string(&second),
            alias: "backup".into(),
        },
    ];

    let plan = refresh_and_plan(&cache, &channel, dst.path(), &sources, &unlimited(), NOW);

    let paths: Vec<_> = plan.combined_paths().into_iter().collect();
    assert_eq!(paths, vec!["backup/x.txt".to_string(), "data/x.txt".to_string()]);
    let origin = &plan
        .iter_paths()
        .find(|(_, p)| p.combined_rel == "data/x.txt")
        .unwrap()
        .1
        .origin;
    assert_eq!(origin.rel, "x.txt");
    assert_eq!(origin.alias, "data");
}

#[test]
fn test_budget_spreads_remote_hashing_over_cycles() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write(src.path(), "big.bin", &[1u8; 300]);
    write(src.path(), "mid.bin", &[2u8; 200]);
    write(src.path(), "small.bin", &[3u8; 100]);

    let cache = HashCache::in_memory().unwrap();
    let channel = LocalChannel::new("srv");
    let sources = vec![SourceRoot {
        root: root_string(&src),
        alias: "src".into(),
    }];
    let budget = HashBudget {
        max_files: 1,
        max_bytes: 0,
        secondary: SecondaryKey::Size,
    };

    let first = refresh_and_plan(&cache, &channel, dst.path(), &sources, &budget, NOW);
    assert_eq!(first.combined_paths().into_iter().collect::<Vec<_>>(), vec!["big.bin"]);

    let second = refresh_and_plan(&cache, &channel, dst.path(), &sources, &budget, NOW + 60);
    assert_eq!(second.planned_files, 2);

    let third = refresh_and_plan(&cache, &channel, dst.path(), &sources, &budget, NOW + 120);
    assert_eq!(third.planned_files, 3);
    assert_eq!(third.planned_bytes, 600);
}

#[test]
fn test_round_scoping_drops_vanished_remote_files() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write(src.path(), "keep.txt", b"keep");
    write(src.path(), "gone.txt", b"gone");

    let cache = HashCache::in_memory().unwrap();
    let channel = LocalChannel::new("srv");
    let sources = vec![SourceRoot {
        root: root_string(&src),
        alias: "src".into(),
    }];

    let first = refresh_and_plan(&cache, &channel, dst.path(), &sources, &unlimited(), NOW);
    assert_eq!(first.planned_files, 2);

    fs::remove_file(src.path().join("gone.txt")).unwrap();
    let second = refresh_and_plan(&cache, &channel, dst.path(), &sources, &unlimited(), NOW + 60);
    let paths: Vec<_> = second.combined_paths().into_iter().collect();
    assert_eq!(paths, vec!["keep.txt".to_string()]);
}

#[test]
fn test_sha256_used_without_b3sum() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write(src.path(), "f.txt", b"content");
    write(dst.path(), "copy.txt", b"content");

    let cache = HashCache::in_memory().unwrap();
    let channel = LocalChannel::new("srv").without_blake3();
    assert_eq!(channel.detect_algorithm(), HashAlgorithm::Sha256);

    let sources = vec![SourceRoot {
        root: root_string(&src),
        alias: "src".into(),
    }];
    let plan = refresh_and_plan(&cache, &channel, dst.path(), &sources, &unlimited(), NOW);
    assert!(plan.is_empty());
}
