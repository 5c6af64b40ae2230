use hashmerge::cache::HashCache;
use hashmerge::merge::{ConflictPolicy, Confirm, MergeExecutor, MergeOutcome, OutcomeStatus};
use hashmerge::output::{load_run_log, run_log_path, RunLog, RunMeta};
use hashmerge::planner::{Plan, Planner, SourceRoot};
use hashmerge::refresh::{
    refresh_remote_metadata, run_budgeted_hashing, HashBudget, LocalObserver, SecondaryKey,
};
use hashmerge::remote::{LocalChannel, RemoteChannel};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const NOW: i64 = 1_800_000_000;

struct Decline;

impl Confirm for Decline {
    fn confirm(&self, _plan: &Plan, _dest_base: &Path) -> bool {
        false
    }
}

struct Trees {
    src: TempDir,
    dst: TempDir,
    channel: LocalChannel,
}

impl Trees {
    fn new() -> Self {
        Self {
            src: tempdir().unwrap(),
            dst: tempdir().unwrap(),
            channel: LocalChannel::new("srv"),
        }
    }

    fn write_src(&self, rel: &str, content: &[u8]) {
        write(self.src.path(), rel, content);
    }

    fn write_dst(&self, rel: &str, content: &[u8]) {
        write(self.dst.path(), rel, content);
    }

    fn plan(&self, cache: &HashCache) -> Plan {
        let algo = self.channel.detect_algorithm();
        let observer = LocalObserver::new(cache, self.dst.path(), algo);
        observer.refresh(NOW, None).unwrap();

        let roots = vec![self.src.path().to_string_lossy().into_owned()];
        refresh_remote_metadata(cache, &self.channel, &roots, algo, NOW).unwrap();
        let budget = HashBudget {
            max_files: 0,
            max_bytes: 0,
            secondary: SecondaryKey::Size,
        };
        run_budgeted_hashing(cache, &self.channel, &roots, algo, &budget, 2, NOW).unwrap();

        let sources = vec![SourceRoot {
            root: roots[0].clone(),
            alias: "src".into(),
        }];
        Planner::new(cache, observer.root_key(), self.channel.host(), &sources, algo)
            .plan(Some(NOW))
            .unwrap()
    }

    fn run_log(&self, run_id: &str, plan: &Plan) -> RunLog {
        let meta = RunMeta {
            run_id: run_id.to_string(),
            source_host: "srv".into(),
            planned_files: plan.planned_files,
            planned_bytes: plan.planned_bytes,
            ..RunMeta::default()
        };
        RunLog::new(
            run_log_path(&self.dst.path().join("_logs"), run_id),
            self.dst.path().to_path_buf(),
            meta,
        )
    }
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_overwrite_replaces_existing_destination() {
    let trees = Trees::new();
    trees.write_src("a/b.txt", b"0123456789");
    trees.write_dst("a/b.txt", b"old");

    let cache = HashCache::in_memory().unwrap();
    let plan = trees.plan(&cache);
    assert_eq!(plan.planned_files, 1);

    let report = MergeExecutor::new(&trees.channel, trees.dst.path(), ConflictPolicy::Overwrite)
        .execute(&plan)
        .unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(
        report.records[0].outcome,
        MergeOutcome::CopiedOverwrite {
            dest: "a/b.txt".into()
        }
    );
    assert_eq!(report.totals.copied_files, 1);
    assert_eq!(report.totals.copied_bytes, 10);
    assert_eq!(fs::read(trees.dst.path().join("a/b.txt")).unwrap(), b"0123456789");
}

#[test]
fn test_skip_leaves_destination_untouched() {
    let trees = Trees::new();
    trees.write_src("a/b.txt", b"0123456789");
    trees.write_dst("a/b.txt", b"old");

    let cache = HashCache::in_memory().unwrap();
    let plan = trees.plan(&cache);
    let report = MergeExecutor::new(&trees.channel, trees.dst.path(), ConflictPolicy::Skip)
        .execute(&plan)
        .unwrap();

    assert_eq!(report.records[0].outcome.status(), OutcomeStatus::SkippedConflict);
    assert_eq!(report.totals.conflict_files, 1);
    assert_eq!(report.totals.conflict_bytes, 10);
    assert_eq!(report.totals.copied_files, 0);
    assert_eq!(fs::read(trees.dst.path().join("a/b.txt")).unwrap(), b"old");
}

#[test]
fn test_version_keeps_both_files() {
    let trees = Trees::new();
    trees.write_src("docs/report.tar.gz", b"remote archive");
    trees.write_dst("docs/report.tar.gz", b"local archive");

    let cache = HashCache::in_memory().unwrap();
    let plan = trees.plan(&cache);
    let report = MergeExecutor::new(&trees.channel, trees.dst.path(), ConflictPolicy::Version)
        .execute(&plan)
        .unwrap();

    let MergeOutcome::ConflictVersioned { dest } = &report.records[0].outcome else {
        panic!("expected a versioned copy, got {:?}", report.records[0].outcome);
    };
    assert!(dest.starts_with("docs/report.v"), "{dest}");
    assert!(dest.ends_with(".tar.gz"), "{dest}");
    assert_eq!(fs::read(trees.dst.path().join(dest)).unwrap(), b"remote archive");
    assert_eq!(
        fs::read(trees.dst.path().join("docs/report.tar.gz")).unwrap(),
        b"local archive"
    );
    assert_eq!(report.totals.conflict_files, 1);
}

#[test]
fn test_source_deleted_after_planning() {
    let trees = Trees::new();
    trees.write_src("vanishing.txt", b"here for now");

    let cache = HashCache::in_memory().unwrap();
    let plan = trees.plan(&cache);
    fs::remove_file(trees.src.path().join("vanishing.txt")).unwrap();

    let report = MergeExecutor::new(&trees.channel, trees.dst.path(), ConflictPolicy::Version)
        .execute(&plan)
        .unwrap();

    let outcome = &report.records[0].outcome;
    assert_eq!(outcome.status(), OutcomeStatus::FailedMissingRemote);
    assert!(outcome.error().unwrap().starts_with("remote-missing"));
    assert_eq!(report.totals.failed_files, 1);
    assert_eq!(report.totals.failed_bytes, 12);
    assert!(!trees.dst.path().join("vanishing.txt").exists());
}

#[test]
fn test_run_log_records_every_outcome() {
    let trees = Trees::new();
    trees.write_src("new/one.txt", b"one");
    trees.write_src("new/dup.txt", b"one");
    trees.write_src("clash.txt", b"remote clash");
    trees.write_dst("clash.txt", b"local");

    let cache = HashCache::in_memory().unwrap();
    let plan = trees.plan(&cache);
    assert_eq!(plan.planned_files, 3);

    let mut log = trees.run_log("20250101-120000", &plan);
    let report = MergeExecutor::new(&trees.channel, trees.dst.path(), ConflictPolicy::Skip)
        .run(&plan, &mut log)
        .unwrap();
    assert_eq!(report.totals.copied_files, 2);
    assert_eq!(report.totals.conflict_files, 1);

    assert_eq!(log.meta().copied_files, Some(2));
    let doc = load_run_log(log.path()).unwrap();
    assert_eq!(doc.hashes.len(), 2);
    assert_eq!(doc.summary.files_by_status["copied"], 2);
    assert_eq!(doc.summary.files_by_status["skipped_conflict"], 1);
    assert_eq!(doc.summary.bytes_by_status["skipped_conflict"], 12);
    assert_eq!(doc.meta.copied_files, Some(2));
    assert_eq!(doc.meta.copied_bytes, Some(6));
    assert_eq!(doc.meta.conflict_files, Some(1));
    assert!(doc.meta.finished_at.is_some());
    assert!(doc.meta.cancelled.is_none());

    let statuses: Vec<_> = doc
        .hashes
        .iter()
        .flat_map(|g| g.duplicates.iter().map(|d| d.status))
        .collect();
    assert!(!statuses.contains(&OutcomeStatus::Pending));
}

#[test]
fn test_declined_merge_copies_nothing() {
    let trees = Trees::new();
    trees.write_src("a.txt", b"aaa");

    let cache = HashCache::in_memory().unwrap();
    let plan = trees.plan(&cache);
    let mut log = trees.run_log("20250101-130000", &plan);

    let report = MergeExecutor::new(&trees.channel, trees.dst.path(), ConflictPolicy::Version)
        .with_confirm(&Decline)
        .run(&plan, &mut log)
        .unwrap();

    assert!(report.cancelled);
    assert!(report.records.is_empty());
    assert!(!trees.dst.path().join("a.txt").exists());

    let doc = load_run_log(log.path()).unwrap();
    assert_eq!(doc.meta.cancelled, Some(true));
    assert_eq!(doc.meta.copied_files, Some(0));
}
