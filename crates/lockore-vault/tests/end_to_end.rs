use lockore_core::{CancelToken, LockoreError, LockoreResult};
use lockore_crypto::Pbkdf2Params;
use lockore_storage::{DirBackend, SlotBackend};
use lockore_vault::field::format;
use lockore_vault::{Field, PasswordOutcome, Record, Storage, StorageOptions, StorageState};
use secrecy::SecretString;

fn params() -> Pbkdf2Params {
    Pbkdf2Params::new(1000).without_floor()
}

fn secret(pw: &str) -> SecretString {
    SecretString::from(pw.to_string())
}

fn unlock(s: &mut Storage, pw: &str) -> LockoreResult<PasswordOutcome> {
    s.unlock_with_password(&secret(pw), &params(), &CancelToken::new(), &mut |_| {})
}

fn bank() -> Record {
    Record::new("Bank")
        .with_field(Field::string("user", "alice"))
        .with_field(Field::string("pin", "1234").with_protected(true))
}

#[test]
fn test_bank_record_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = DirBackend::new(tmp.path(), 1 << 20);
    Storage::create(&backend, "personal", "Personal", "day to day", 0).unwrap();

    let mut s = Storage::open(&backend, "personal", StorageOptions::default()).unwrap();
    let outcome = s
        .lock_with_password(&secret("p@ss"), &params(), &CancelToken::new(), &mut |_| {})
        .unwrap();
    assert_eq!(outcome, PasswordOutcome::Done);
    let mut record = bank();
    s.insert(&mut record).unwrap();
    s.destroy().unwrap();
    assert_eq!(s.state(), StorageState::Closed);

    let mut s = Storage::open(&backend, "personal", StorageOptions::default()).unwrap();
    assert_eq!(s.state(), StorageState::Locked);
    assert!(matches!(unlock(&mut s, "p@s"), Err(LockoreError::BadSignature)));
    assert_eq!(s.state(), StorageState::Locked);
    assert_eq!(unlock(&mut s, "p@ss").unwrap(), PasswordOutcome::Done);

    assert_eq!(s.len().unwrap(), 1);
    let loaded = s.load(0).unwrap();
    assert!(loaded.content_eq(&bank()));
    assert!(loaded.find("pin").unwrap().unwrap().is_protected());
    assert_eq!(loaded.get_string("user", "").unwrap(), "alice");
}

#[test]
fn test_wrong_passwords_never_unlock() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = DirBackend::new(tmp.path(), 1 << 20);
    Storage::create(&backend, "v", "V", "", 0).unwrap();
    let mut s = Storage::open(&backend, "v", StorageOptions::default()).unwrap();
    s.lock_with_password(&secret("right"), &params(), &CancelToken::new(), &mut |_| {})
        .unwrap();
    s.insert(&mut bank()).unwrap();
    s.destroy().unwrap();

    let mut s = Storage::open(&backend, "v", StorageOptions::default()).unwrap();
    for wrong in ["", "Right", "right ", "rig", "wrong"] {
        assert!(unlock(&mut s, wrong).is_err());
        assert_eq!(s.state(), StorageState::Locked);
    }
    assert!(matches!(s.load(0), Err(LockoreError::Locked)));
}

#[test]
fn test_settings_only_store() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = DirBackend::new(tmp.path(), 1 << 20);
    Storage::create(&backend, "prefs", "Preferences", "", 0).unwrap();

    let mut s = Storage::open(&backend, "prefs", StorageOptions::default()).unwrap();
    s.set_value("theme", "dark").unwrap();
    s.set_int("timeout", 300).unwrap();
    s.save().unwrap();
    drop(s);

    let mut s = Storage::open(&backend, "prefs", StorageOptions::default()).unwrap();
    assert_eq!(s.get_value("theme", "").unwrap(), "dark");
    assert_eq!(s.get_int("timeout", 0).unwrap(), 300);
    assert_eq!(s.get_int("missing", 7).unwrap(), 7);
    assert!(matches!(unlock(&mut s, "anything"), Err(LockoreError::PublicStore)));
}

#[test]
fn test_many_records_and_edits() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = DirBackend::new(tmp.path(), 1 << 22);
    Storage::create(&backend, "big", "Big", "", 0).unwrap();
    let mut s = Storage::open(&backend, "big", StorageOptions::default()).unwrap();
    s.lock(b"pw", b"salt").unwrap();

    for i in 0..20 {
        let mut r = Record::new(format!("site {i:02}"))
            .with_field(Field::string("url", format!("https://{i}.example")).with_format(format::URI))
            .with_field(Field::integer("created", 1_700_000_000 + i).with_format(format::DATE))
            .with_field(Field::binary("totp", vec![i as u8; 20]).with_format(format::TOTP_SEED));
        s.insert(&mut r).unwrap();
    }
    let mut r = s.load(7).unwrap();
    r.set_string("url", "https://changed.example").unwrap();
    s.update(&mut r).unwrap();
    s.remove(0).unwrap();
    s.destroy().unwrap();

    let mut s = Storage::open(&backend, "big", StorageOptions::default()).unwrap();
    s.unlock(b"pw", b"salt").unwrap();
    assert_eq!(s.len().unwrap(), 19);
    let heads = s.heads().unwrap().to_vec();
    let changed = heads.iter().find(|h| h.name() == "site 07").unwrap();
    let full = s.load_record(changed).unwrap();
    assert_eq!(full.get_string("url", "").unwrap(), "https://changed.example");
    assert!(heads.iter().all(|h| h.name() != "site 00"));
}

#[test]
fn test_wipe_removes_container() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = DirBackend::new(tmp.path(), 1 << 20);
    Storage::create(&backend, "gone", "Gone", "", 0).unwrap();
    let mut s = Storage::open(&backend, "gone", StorageOptions::default()).unwrap();
    s.lock(b"pw", b"salt").unwrap();
    s.insert(&mut bank()).unwrap();
    s.wipe().unwrap();
    assert!(!backend.exists("gone").unwrap());
    assert!(!tmp.path().join("gone").exists());
}
