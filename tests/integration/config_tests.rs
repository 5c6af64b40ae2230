use hashmerge::config::{Config, ConfigError, Transport};
use hashmerge::merge::ConflictPolicy;
use hashmerge::refresh::SecondaryKey;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
target_root = "/srv/data"
use_merge_subroot = true
merge_subroot = "from_backup"
on_conflict = "suffix"
auto_merge = false
io_threads = 2

[remote]
host = "backup-02"
port = 2222
user = "sync"
key_file = "/etc/hashmerge/id_ed25519"
roots = ["/mnt/pool/photos", "/mnt/pool/docs"]

[budget]
files = 50
bytes = 1000000
secondary = "mtime"
hash_workers = 8

[daemon]
sleep_secs = 120

[scrub]
enabled = true
hour = 3
minute = 30

[metrics]
dir = "/var/lib/node_exporter"
basename = "hashmerge"
"#;

#[test]
fn test_load_full_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = Config::load(Some(&path)).unwrap();

    assert_eq!(config.target_root, PathBuf::from("/srv/data"));
    assert_eq!(config.dest_base(), PathBuf::from("/srv/data/from_backup"));
    assert_eq!(config.on_conflict, ConflictPolicy::Version);
    assert!(!config.auto_merge);
    assert_eq!(config.io_threads, 2);

    assert_eq!(config.remote.transport, Transport::Ssh);
    assert_eq!(config.remote.port, 2222);
    assert_eq!(config.remote.user, "sync");
    assert_eq!(config.aliases(), vec!["photos".to_string(), "docs".to_string()]);

    let ssh = config.ssh_settings();
    assert_eq!(ssh.host, "backup-02");
    assert_eq!(ssh.key_file, Some(PathBuf::from("/etc/hashmerge/id_ed25519")));

    let budget = config.budget.to_budget();
    assert_eq!(budget.max_files, 50);
    assert_eq!(budget.max_bytes, 1_000_000);
    assert_eq!(budget.secondary, SecondaryKey::Mtime);
    assert_eq!(config.budget.hash_workers, 8);

    assert_eq!(config.daemon.sleep_secs, 120);
    assert!(config.daemon.run_forever);
    assert!(config.scrub.enabled);
    assert_eq!((config.scrub.hour, config.scrub.minute), (3, 30));
    assert_eq!(config.metrics.dir, Some(PathBuf::from("/var/lib/node_exporter")));
    assert_eq!(config.metrics.basename, "hashmerge");
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        "[remote]\ntransport = \"local\"\nroots = [\"/mnt/source\"]\n",
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    let defaults = Config::default();

    assert_eq!(config.remote.transport, Transport::Local);
    assert_eq!(config.source_host(), "localhost");
    assert_eq!(config.on_conflict, defaults.on_conflict);
    assert_eq!(config.budget, defaults.budget);
    assert_eq!(config.scrub, defaults.scrub);
    assert_eq!(config.target_root, defaults.target_root);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");

    fs::write(&path, "[remote]\nhost = \"h\"\nroots = []\n").unwrap();
    assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Invalid(_))));

    fs::write(
        &path,
        "[remote]\nhost = \"h\"\nroots = [\"/a\"]\n[scrub]\nlocal_percent = 2.5\n",
    )
    .unwrap();
    assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Invalid(_))));

    fs::write(
        &path,
        "on_conflict = \"merge\"\n[remote]\nhost = \"h\"\nroots = [\"/a\"]\n",
    )
    .unwrap();
    assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Extract(_))));
}

#[test]
fn test_missing_file_and_target_root() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(matches!(
        Config::load(Some(&missing)),
        Err(ConfigError::NotFound(_))
    ));

    let config = Config {
        target_root: dir.path().join("not-there"),
        ..Config::default()
    };
    assert!(matches!(
        config.check_target_root(),
        Err(ConfigError::TargetMissing(_))
    ));

    let config = Config {
        target_root: dir.path().to_path_buf(),
        ..Config::default()
    };
    assert!(config.check_target_root().is_ok());
}
