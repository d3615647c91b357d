use std::time::Duration;

use lockore_core::LockoreError;
use lockore_storage::{DirBackend, SlotBackend};
use lockore_vault::{
    finish_migration, Field, Keep, MigrationJob, MigrationOutcome, Record, Storage, StorageOptions,
};

fn unlocked(backend: &DirBackend, id: &str, password: &[u8]) -> Storage {
    Storage::create(backend, id, id, "", 0).unwrap();
    let mut s = Storage::open(backend, id, StorageOptions::default()).unwrap();
    s.lock(password, b"salt").unwrap();
    s
}

fn fill(s: &mut Storage, n: usize) {
    for i in 0..n {
        let mut r = Record::new(format!("r{i}")).with_field(Field::string("k", format!("v{i}")));
        s.insert(&mut r).unwrap();
    }
}

#[test]
fn test_rekey_through_migration() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = DirBackend::new(tmp.path(), 1 << 22);
    let mut old = unlocked(&backend, "old", b"old pw");
    fill(&mut old, 12);
    let new = unlocked(&backend, "new", b"new pw");

    let job = MigrationJob::spawn(old, new).unwrap();
    while !job.is_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(job.progress().total, 12);
    let result = job.join().unwrap();
    assert_eq!(result.outcome.unwrap(), MigrationOutcome::Completed(12));

    let mut kept = finish_migration(result.from, result.to, Keep::Target).unwrap();
    kept.destroy().unwrap();
    assert_eq!(backend.list().unwrap(), vec!["new".to_string()]);

    let mut s = Storage::open(&backend, "new", StorageOptions::default()).unwrap();
    assert!(matches!(s.unlock(b"old pw", b"salt"), Err(LockoreError::BadSignature)));
    s.unlock(b"new pw", b"salt").unwrap();
    assert_eq!(s.len().unwrap(), 12);
    let mut values: Vec<String> = (0..12)
        .map(|i| s.load(i).unwrap().get_string("k", "").unwrap())
        .collect();
    values.sort();
    let mut expected: Vec<String> = (0..12).map(|i| format!("v{i}")).collect();
    expected.sort();
    assert_eq!(values, expected);
}

#[test]
fn test_canceled_migration_keeps_source() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = DirBackend::new(tmp.path(), 1 << 22);
    let mut old = unlocked(&backend, "old", b"pw");
    fill(&mut old, 30);
    let new = unlocked(&backend, "new", b"pw2");

    let job = MigrationJob::spawn(old, new).unwrap();
    job.cancel();
    let result = job.join().unwrap();
    let copied = match result.outcome.unwrap() {
        MigrationOutcome::Completed(n) => n,
        MigrationOutcome::Canceled => result.to.len().unwrap(),
    };
    assert!(copied <= 30);

    let kept = finish_migration(result.from, result.to, Keep::Source).unwrap();
    assert_eq!(kept.len().unwrap(), 30);
    assert!(!backend.exists("new").unwrap());
}
