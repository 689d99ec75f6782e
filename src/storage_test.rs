use super::*;
use gate::purge_prefix;

fn scratch_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("moods-admin-test-{}", uuid::Uuid::new_v4().simple()))
        .join("storage.json")
}

fn cleanup(path: &Path) {
    if let Some(dir) = path.parent() {
        let _ = fs::remove_dir_all(dir);
    }
}

#[test]
fn missing_file_opens_empty_and_is_created_on_write() {
    let path = scratch_path();
    let storage = FileStorage::open(&path).unwrap();
    assert!(storage.keys().unwrap().is_empty());
    assert!(!path.exists());

    storage.set_item("sb-abc-auth-token", "{}").unwrap();

    assert!(path.exists());
    cleanup(&path);
}

#[test]
fn values_survive_reopen() {
    let path = scratch_path();
    {
        let storage = FileStorage::open(&path).unwrap();
        storage.set_item("sb-abc-auth-token", "session").unwrap();
        storage.set_item("theme", "dark").unwrap();
        storage.remove_item("theme").unwrap();
    }

    let reopened = FileStorage::open(&path).unwrap();
    assert_eq!(reopened.get_item("sb-abc-auth-token").unwrap().as_deref(), Some("session"));
    assert_eq!(reopened.get_item("theme").unwrap(), None);
    cleanup(&path);
}

#[test]
fn purge_prefix_removes_only_provider_keys_on_disk() {
    let path = scratch_path();
    let storage = FileStorage::open(&path).unwrap();
    storage.set_item("sb-abc-auth-token", "session").unwrap();
    storage.set_item("sb-abc-code-verifier", "v").unwrap();
    storage.set_item("theme", "dark").unwrap();

    assert_eq!(purge_prefix(&storage, "sb-abc-").unwrap(), 2);

    let reopened = FileStorage::open(&path).unwrap();
    assert_eq!(reopened.keys().unwrap(), vec!["theme".to_owned()]);
    cleanup(&path);
}

#[test]
fn corrupt_file_is_reported() {
    let path = scratch_path();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "[1, 2, 3]").unwrap();

    let err = FileStorage::open(&path).unwrap_err();

    assert!(matches!(err, StorageError::Corrupt(_)));
    cleanup(&path);
}

#[test]
fn no_temp_files_left_behind() {
    let path = scratch_path();
    let storage = FileStorage::open(&path).unwrap();
    storage.set_item("a", "1").unwrap();
    storage.set_item("b", "2").unwrap();

    let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("storage.json")]);
    cleanup(&path);
}

#[test]
fn removing_missing_key_does_not_write() {
    let path = scratch_path();
    let storage = FileStorage::open(&path).unwrap();
    storage.remove_item("nothing").unwrap();
    assert!(!path.exists());
    assert_eq!(storage.path(), path.as_path());
}
