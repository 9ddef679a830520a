use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use kaowu_core::catalog::FeatureKind;
use kaowu_core::feature::UserIdentity;
use kaowu_core::lockdown::LockdownManager;
use kaowu_core::sequence::SequenceResult;
use kaowu_core::state::StateJournal;
use kaowu_core::store::{KeyValueStore, Location, MemoryStore, RegistryValue, StoreError};
use uuid::Uuid;

const SID: &str = "S-1-5-21-3000";
const KINDS: [FeatureKind; 3] = [FeatureKind::Signout, FeatureKind::TaskManager, FeatureKind::PowerOptions];

fn user() -> Option<UserIdentity> {
    Some(UserIdentity::new(SID, Some("candidate".to_string())))
}

fn location_of(kind: FeatureKind) -> Location {
    kind.items(Some(SID)).remove(0).location().clone()
}

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// 只拒绝特定（位置, 值）写入的存储，用于区分启用失败与恢复失败。
#[derive(Default)]
struct SelectiveStore {
    inner: MemoryStore,
    denied: Mutex<Vec<(Location, RegistryValue)>>,
}

impl SelectiveStore {
    fn deny(&self, location: Location, value: RegistryValue) {
        self.denied.lock().unwrap().push((location, value));
    }

    fn clear(&self) {
        self.denied.lock().unwrap().clear();
    }
}

impl KeyValueStore for SelectiveStore {
    fn read(&self, location: &Location) -> Result<Option<RegistryValue>, StoreError> {
        self.inner.read(location)
    }

    fn write(&self, location: &Location, value: &RegistryValue) -> Result<(), StoreError> {
        let denied = self
            .denied
            .lock()
            .unwrap()
            .iter()
            .any(|(l, v)| l == location && v == value);
        if denied {
            return Err(StoreError::AccessDenied {
                location: location.to_string(),
            });
        }
        self.inner.write(location, value)
    }
}

#[test]
fn lock_then_unlock_restores_every_feature() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = LockdownManager::new(store.clone(), user());

    assert_eq!(manager.lock(&KINDS, None).unwrap(), SequenceResult::Success);
    assert!(manager.is_locked());
    assert!(manager.status(&KINDS).unwrap().iter().all(|s| s.enabled));

    assert!(manager.lock(&KINDS, None).is_err(), "double lock must be refused");

    assert_eq!(manager.relock(), Some(SequenceResult::Success));

    assert!(manager.unlock());
    assert!(!manager.is_locked());
    assert!(manager.status(&KINDS).unwrap().iter().all(|s| !s.enabled));
    assert!(manager.unlock(), "unlock without lock is a no-op");
    assert_eq!(manager.relock(), None);
}

#[test]
fn failed_lock_rolls_back_previous_features() {
    let store = Arc::new(SelectiveStore::default());
    let mut manager = LockdownManager::new(store.clone(), user());
    let power = location_of(FeatureKind::PowerOptions);
    store.deny(power.clone(), RegistryValue::Dword(1));

    assert_eq!(manager.lock(&KINDS, None).unwrap(), SequenceResult::Failed);
    assert!(!manager.is_locked());
    assert!(!manager.has_residue());
    let status = manager.status(&KINDS).unwrap();
    assert!(status.iter().all(|s| !s.enabled), "{status:?}");
    assert_eq!(store.read(&power).unwrap(), Some(RegistryValue::Dword(0)));
    assert_eq!(
        store.read(&location_of(FeatureKind::Signout)).unwrap(),
        Some(RegistryValue::Dword(0))
    );
}

#[test]
fn failed_rollback_keeps_residue_until_unlock_succeeds() {
    let store = Arc::new(SelectiveStore::default());
    let signout = location_of(FeatureKind::Signout);
    store.deny(signout.clone(), RegistryValue::Dword(0));
    store.deny(location_of(FeatureKind::TaskManager), RegistryValue::Dword(1));
    let kinds = [FeatureKind::Signout, FeatureKind::TaskManager];
    let mut manager = LockdownManager::new(store.clone(), user());

    assert_eq!(manager.lock(&kinds, None).unwrap(), SequenceResult::RollbackFailed);
    assert!(!manager.is_locked());
    assert!(manager.has_residue());
    assert_eq!(store.read(&signout).unwrap(), Some(RegistryValue::Dword(1)));
    assert!(manager.lock(&kinds, None).is_err(), "lock must be refused while residue remains");

    assert!(!manager.unlock());
    assert!(manager.has_residue());
    assert_eq!(store.read(&signout).unwrap(), Some(RegistryValue::Dword(1)));

    store.clear();
    assert!(manager.unlock());
    assert!(!manager.has_residue());
    assert_eq!(store.read(&signout).unwrap(), Some(RegistryValue::Dword(0)));
    assert!(manager.unlock());
}

#[test]
fn failing_feature_that_cannot_clean_up_is_a_rollback_failure() {
    let dir = unique_temp_dir("kaowu-lockdown-cleanup");
    let path = dir.join("lockdown-state.json");
    let store = Arc::new(MemoryStore::new());
    let power = location_of(FeatureKind::PowerOptions);
    store.deny_writes(&power);

    let manager = LockdownManager::new(store.clone(), user());
    let journal = Arc::new(StateJournal::create(&path, manager.new_state("test".to_string())).unwrap());
    let mut manager = manager.with_journal(journal.clone());

    let kinds = [FeatureKind::Signout, FeatureKind::PowerOptions];
    assert_eq!(manager.lock(&kinds, None).unwrap(), SequenceResult::RollbackFailed);
    assert!(manager.has_residue());
    let left: Vec<FeatureKind> = journal.snapshot().unwrap().features.iter().map(|f| f.kind).collect();
    assert_eq!(left, vec![FeatureKind::PowerOptions]);
    assert_eq!(store.get(&location_of(FeatureKind::Signout)), Some(RegistryValue::Dword(0)));

    store.allow_all();
    assert!(manager.unlock());
    assert!(journal.is_empty().unwrap());
    assert_eq!(store.get(&power), Some(RegistryValue::Dword(0)));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn failed_rollback_is_surfaced_and_journal_keeps_residue() {
    let dir = unique_temp_dir("kaowu-lockdown-residue");
    let path = dir.join("lockdown-state.json");
    let store = Arc::new(SelectiveStore::default());
    let signout = location_of(FeatureKind::Signout);
    let power = location_of(FeatureKind::PowerOptions);
    store.deny(power.clone(), RegistryValue::Dword(1));
    store.deny(signout.clone(), RegistryValue::Dword(0));

    let manager = LockdownManager::new(store.clone(), user());
    let journal = Arc::new(StateJournal::create(&path, manager.new_state("test".to_string())).unwrap());
    let mut manager = manager.with_journal(journal.clone());

    let result = manager.lock(&KINDS, None).unwrap();
    assert_eq!(result, SequenceResult::RollbackFailed);
    assert!(result.requires_attention());
    assert!(manager.has_residue());

    let residue = StateJournal::load(&path).unwrap().unwrap();
    let kinds: Vec<FeatureKind> = residue.features.iter().map(|f| f.kind).collect();
    assert_eq!(kinds, vec![FeatureKind::Signout]);
    assert_eq!(residue.group_id, manager.group_id());
    assert_eq!(store.read(&signout).unwrap(), Some(RegistryValue::Dword(1)));
    assert_eq!(store.read(&power).unwrap(), Some(RegistryValue::Dword(0)));

    store.clear();
    assert!(LockdownManager::restore(store.clone(), &residue, Some(journal.clone())));
    assert!(journal.is_empty().unwrap());
    assert_eq!(store.read(&signout).unwrap(), Some(RegistryValue::Dword(0)));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn restore_from_journal_after_crash() {
    let dir = unique_temp_dir("kaowu-lockdown-restore");
    let path = dir.join("lockdown-state.json");
    let store = Arc::new(MemoryStore::new());

    {
        let manager = LockdownManager::new(store.clone(), user());
        let journal = Arc::new(StateJournal::create(&path, manager.new_state("test".to_string())).unwrap());
        let mut manager = manager.with_journal(journal);
        assert_eq!(manager.lock(&KINDS, None).unwrap(), SequenceResult::Success);
        // 模拟进程退出：不调用 unlock。
    }

    let state = StateJournal::load(&path).unwrap().expect("journal must survive");
    assert_eq!(state.features.len(), KINDS.len());

    let journal = Arc::new(StateJournal::open(&path).unwrap().unwrap());
    assert!(LockdownManager::restore(store.clone(), &state, Some(journal.clone())));
    assert!(journal.is_empty().unwrap());
    journal.discard().unwrap();
    assert!(!path.exists());

    let checker = LockdownManager::new(store.clone(), user());
    assert!(checker.status(&KINDS).unwrap().iter().all(|s| !s.enabled));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn restore_keeps_failed_features_in_journal() {
    let dir = unique_temp_dir("kaowu-lockdown-partial-restore");
    let path = dir.join("lockdown-state.json");
    let store = Arc::new(MemoryStore::new());

    let manager = LockdownManager::new(store.clone(), user());
    let journal = Arc::new(StateJournal::create(&path, manager.new_state("test".to_string())).unwrap());
    let mut manager = manager.with_journal(journal);
    assert_eq!(manager.lock(&KINDS, None).unwrap(), SequenceResult::Success);

    let task_manager = location_of(FeatureKind::TaskManager);
    store.deny_writes(&task_manager);
    let state = StateJournal::load(&path).unwrap().unwrap();
    let journal = Arc::new(StateJournal::open(&path).unwrap().unwrap());
    assert!(!LockdownManager::restore(store.clone(), &state, Some(journal.clone())));

    let left: Vec<FeatureKind> = journal.snapshot().unwrap().features.iter().map(|f| f.kind).collect();
    assert_eq!(left, vec![FeatureKind::TaskManager]);
    assert_eq!(store.get(&location_of(FeatureKind::Signout)), Some(RegistryValue::Dword(0)));
    assert_eq!(store.get(&location_of(FeatureKind::PowerOptions)), Some(RegistryValue::Dword(0)));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn user_features_without_identity_are_rejected_before_any_write() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = LockdownManager::new(store.clone(), None);

    assert!(manager.lock(&KINDS, None).is_err());
    assert!(store.is_empty());

    assert_eq!(
        manager.lock(&[FeatureKind::PowerOptions, FeatureKind::UserSwitch], None).unwrap(),
        SequenceResult::Success
    );
    assert_eq!(store.len(), 2);
}
