#![cfg(windows)]

use kaowu_core::store::{Hive, KeyValueStore, Location, RegistryValue, StoreError};
use kaowu_windows::registry::RegistryStore;
use uuid::Uuid;
use winreg::enums::HKEY_CURRENT_USER;
use winreg::RegKey;

#[test]
fn missing_key_and_value_read_as_unset() {
    let (key_path, _guard) = create_test_key();
    let store = RegistryStore::new();

    let location = Location::new(Hive::CurrentUser, key_path.clone(), "NoLogoff");
    assert_eq!(store.read(&location).unwrap(), None);

    store.write(&location, &RegistryValue::Dword(1)).unwrap();
    let other = Location::new(Hive::CurrentUser, key_path, "Missing");
    assert_eq!(store.read(&other).unwrap(), None);
}

#[test]
fn dword_and_string_values_round_trip() {
    let (key_path, _guard) = create_test_key();
    let store = RegistryStore::new();

    let dword = Location::new(Hive::CurrentUser, format!("{key_path}\\Policies"), "DisableTaskMgr");
    store.write(&dword, &RegistryValue::Dword(1)).unwrap();
    assert_eq!(store.read(&dword).unwrap(), Some(RegistryValue::Dword(1)));
    store.write(&dword, &RegistryValue::Dword(0)).unwrap();
    assert_eq!(store.read(&dword).unwrap(), Some(RegistryValue::Dword(0)));

    let sz = Location::new(Hive::CurrentUser, key_path.clone(), "Debugger");
    store.write(&sz, &RegistryValue::Sz("KaowuDummy.exe".to_string())).unwrap();
    assert_eq!(store.read(&sz).unwrap(), Some(RegistryValue::Sz("KaowuDummy.exe".to_string())));

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let key = hkcu.open_subkey(&key_path).expect("open test key");
    let raw: String = key.get_value("Debugger").expect("read sz");
    assert_eq!(raw, "KaowuDummy.exe");
}

#[test]
fn unsupported_value_type_is_reported() {
    let (key_path, _guard) = create_test_key();
    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let (key, _disp) = hkcu.create_subkey(&key_path).expect("create subkey");
    key.set_value("Wide", &42u64).expect("set qword");

    let location = Location::new(Hive::CurrentUser, key_path, "Wide");
    let err = RegistryStore::new().read(&location).unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedType { .. }), "{err}");
}

fn create_test_key() -> (String, CleanupKey) {
    let path = format!("Software\\KaowuSecureBrowserTest\\{}", Uuid::new_v4());
    (path.clone(), CleanupKey(path))
}

struct CleanupKey(String);

impl Drop for CleanupKey {
    fn drop(&mut self) {
        let hkcu = RegKey::predef(HKEY_CURRENT_USER);
        let _ = hkcu.delete_subkey_all(&self.0);
    }
}
