use chrono::Local;
use hashmerge::alert::{AlertError, Notifier};
use hashmerge::cache::HashCache;
use hashmerge::config::{Config, RemoteConfig, Transport};
use hashmerge::merge::ConflictPolicy;
use hashmerge::remote::{LocalChannel, LocalConnector};
use hashmerge::round::{CycleMode, Engine};
use hashmerge::session::{snapshot_path, RoundSnapshot};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

#[derive(Clone, Default)]
struct Recorder {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl Recorder {
    fn bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, body)| body.clone()).collect()
    }
}

impl Notifier for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn send(&self, subject: &str, body: &str, _attachment: Option<&Path>) -> Result<(), AlertError> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

struct Setup {
    src: TempDir,
    dst: TempDir,
    metrics: TempDir,
    config: Config,
}

fn setup(policy: ConflictPolicy) -> Setup {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    let metrics = tempdir().unwrap();

    let mut config = Config {
        target_root: dst.path().to_path_buf(),
        use_merge_subroot: true,
        merge_subroot: "incoming".into(),
        on_conflict: policy,
        remote: RemoteConfig {
            transport: Transport::Local,
            host: "srv".into(),
            roots: vec![src.path().to_string_lossy().into_owned()],
            ..RemoteConfig::default()
        },
        ..Config::default()
    };
    config.scrub.enabled = false;
    config.daemon.run_forever = false;
    config.metrics.dir = Some(metrics.path().to_path_buf());

    Setup {
        src,
        dst,
        metrics,
        config,
    }
}

fn engine(config: Config, recorder: &Recorder) -> Engine<LocalConnector> {
    Engine::new(
        config,
        HashCache::in_memory().unwrap(),
        LocalConnector::new(LocalChannel::new("srv")),
    )
    .with_notifiers(vec![Box::new(recorder.clone())])
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_rounds_copy_then_go_quiet() {
    let s = setup(ConflictPolicy::Version);
    write(s.src.path(), "music/a.flac", b"aaaa");
    write(s.src.path(), "music/b.flac", b"bbbbbb");
    let recorder = Recorder::default();
    let mut engine = engine(s.config.clone(), &recorder);

    let first = engine.run_round(Local::now());
    let cycle = first.cycle.unwrap();
    assert_eq!(cycle.totals().copied_files, 2);
    assert_eq!(cycle.totals().copied_bytes, 10);
    assert!(first.alerted);

    let dest_base = s.dst.path().join("incoming");
    assert_eq!(fs::read(dest_base.join("music/a.flac")).unwrap(), b"aaaa");
    assert!(cycle.log_path.as_ref().unwrap().starts_with(dest_base.join("_logs")));

    let body = &recorder.bodies()[0];
    assert!(body.contains("Source Host       : srv"), "{body}");
    assert!(body.contains("Use Merge Subroot : true"), "{body}");

    let second = engine.run_round(Local::now());
    assert!(second.cycle.unwrap().plan.is_empty());
    assert!(!second.alerted);
    assert_eq!(recorder.bodies().len(), 1);

    write(s.src.path(), "music/c.flac", b"cc");
    let third = engine.run_round(Local::now());
    let cycle = third.cycle.unwrap();
    assert_eq!(cycle.plan.planned_files, 1);
    assert!(third.alerted);
    assert_eq!(recorder.bodies().len(), 2);
}

#[test]
fn test_metrics_written_after_each_cycle() {
    let s = setup(ConflictPolicy::Overwrite);
    write(s.src.path(), "f.txt", b"12345");
    let recorder = Recorder::default();
    let mut engine = engine(s.config.clone(), &recorder);

    engine.run_round(Local::now());
    let prom = fs::read_to_string(s.metrics.path().join("merge_compare.prom")).unwrap();
    assert!(prom.contains("# TYPE merge_files_copied_total counter"));
    let copied = prom
        .lines()
        .find(|l| l.starts_with("merge_bytes_copied_total{"))
        .unwrap();
    assert!(copied.ends_with(" 5"), "{copied}");
    assert!(copied.contains("source_host=\"srv\""));
    assert!(!s.metrics.path().join("merge_compare.prom.tmp").exists());
}

#[test]
fn test_snapshot_tracks_unresolved_paths() {
    let s = setup(ConflictPolicy::Skip);
    write(s.src.path(), "clash.txt", b"remote");
    write(&s.dst.path().join("incoming"), "clash.txt", b"local");
    let recorder = Recorder::default();
    let mut engine = engine(s.config.clone(), &recorder);

    let first = engine.run_round(Local::now());
    assert_eq!(first.cycle.unwrap().totals().conflict_files, 1);
    assert!(first.alerted);

    let state = snapshot_path(&s.dst.path().join("incoming/_logs"));
    let saved = RoundSnapshot::load(&state).unwrap();
    assert!(saved.paths().contains("clash.txt"));

    // The conflict persists, so every round reports activity again.
    let second = engine.run_round(Local::now());
    assert_eq!(second.cycle.unwrap().totals().conflict_files, 1);
    assert!(second.changed);
    assert!(second.alerted);
    assert_eq!(fs::read(s.dst.path().join("incoming/clash.txt")).unwrap(), b"local");
}

#[test]
fn test_plan_only_cycle_leaves_target_alone() {
    let s = setup(ConflictPolicy::Version);
    write(s.src.path(), "x/y.txt", b"content");
    let recorder = Recorder::default();
    let engine = engine(s.config.clone(), &recorder);

    let outcome = engine.run_cycle("plan", CycleMode::PlanOnly).unwrap();
    assert_eq!(outcome.plan.planned_files, 1);
    assert!(outcome.report.is_none());
    assert!(outcome.log_path.is_none());
    assert!(!s.dst.path().join("incoming").exists());
}

#[test]
fn test_one_shot_loop_returns_not_interrupted() {
    let s = setup(ConflictPolicy::Version);
    write(s.src.path(), "a.txt", b"a");
    let recorder = Recorder::default();
    let mut engine = engine(s.config.clone(), &recorder);

    assert!(!engine.run_loop(true));
    assert!(s.dst.path().join("incoming/a.txt").exists());
}
