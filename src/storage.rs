use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::{decrypt_with_key, encrypt_with_key, generate_key, KEY_LEN};
use crate::models::{EncryptedStore, Store};

pub const STORE_DIR: &str = ".codebook";
pub const STORE_FILE: &str = "store.json";
pub const KEY_FILE: &str = "store.key";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Serialize, Deserialize)]
pub struct Config {
    pub store_dir: String,
}

pub fn default_base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(STORE_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(default_base_dir()?.join(CONFIG_FILE))
}

pub fn load_config() -> Result<Option<Config>> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let cfg: Config = serde_json::from_str(&raw)?;
    Ok(Some(cfg))
}

pub fn save_config(base_dir: &Path) -> Result<()> {
    let cfg = Config {
        store_dir: base_dir
            .to_str()
            .ok_or_else(|| anyhow!("Invalid base dir path"))?
            .to_string(),
    };
    if let Some(parent) = config_path()?.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            restrict_dir(parent)?;
        }
    }
    let data = serde_json::to_string_pretty(&cfg)?;
    let path = config_path()?;
    atomic_write(path.as_path(), data.as_bytes())?;
    restrict_file(path.as_path())?;
    Ok(())
}

fn configured_base_dir() -> Result<PathBuf> {
    if let Some(cfg) = load_config()? {
        return validate_store_dir(Path::new(&cfg.store_dir));
    }
    default_base_dir()
}

pub fn store_path() -> Result<PathBuf> {
    Ok(configured_base_dir()?.join(STORE_FILE))
}

pub fn key_path() -> Result<PathBuf> {
    Ok(configured_base_dir()?.join(KEY_FILE))
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
        restrict_dir(parent)?;
        Ok(())
    } else {
        Err(anyhow!("Invalid store path"))
    }
}

/// Returns the store key, generating and persisting a fresh one on first run.
/// The key lives next to the store file, 0o600 on unix.
pub fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LEN]> {
    if path.exists() {
        let bytes = fs::read(path)?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| anyhow!("Key file has invalid length: {}", path.display()))?;
        return Ok(key);
    }
    let key = generate_key();
    atomic_write(path, &key)?;
    restrict_file(path)?;
    Ok(key)
}

/// Loads the account store, failing closed: a missing file, unreadable JSON,
/// failed decryption, or bad plaintext all come back as an empty store.
pub fn load_store(path: &Path, key: &[u8; KEY_LEN]) -> Store {
    match try_load_store(path, key) {
        Ok(store) => store,
        Err(_) => Store::default(),
    }
}

fn try_load_store(path: &Path, key: &[u8; KEY_LEN]) -> Result<Store> {
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Store::default());
    }
    let enc: EncryptedStore = serde_json::from_str(&raw)?;
    let decrypted = decrypt_with_key(key, &enc)?;
    let store: Store = serde_json::from_slice(&decrypted)?;
    Ok(store)
}

pub fn save_store(path: &Path, store: &Store, key: &[u8; KEY_LEN]) -> Result<()> {
    let plaintext = serde_json::to_vec(store)?;
    let enc = encrypt_with_key(key, &plaintext)?;
    let serialized = serde_json::to_string_pretty(&enc)?;
    atomic_write(path, serialized.as_bytes())?;
    restrict_file(path)?;
    Ok(())
}

/// Bumps the revision and writes the store. Called after every mutation.
pub fn persist_store(path: &Path, store: &mut Store, key: &[u8; KEY_LEN]) -> Result<()> {
    store.revision = store.revision.saturating_add(1);
    save_store(path, store, key)
}

pub fn validate_store_dir(raw: &Path) -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    let candidate = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        home.join(raw)
    };

    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(anyhow!(
            "Configured store path is invalid: parent traversal is not allowed"
        ));
    }
    if !candidate.starts_with(&home) {
        return Err(anyhow!(
            "Configured store path must be inside home directory ({})",
            home.display()
        ));
    }

    // Resolve symlinks when possible to prevent escaping home via symlink targets.
    let home_real = fs::canonicalize(&home).unwrap_or(home.clone());
    if candidate.exists() {
        let real = fs::canonicalize(&candidate)?;
        if !real.starts_with(&home_real) {
            return Err(anyhow!(
                "Configured store path resolves outside home directory ({})",
                home.display()
            ));
        }
    } else if let Some(parent) = candidate.parent() {
        if parent.exists() {
            let real_parent = fs::canonicalize(parent)?;
            if !real_parent.starts_with(&home_real) {
                return Err(anyhow!(
                    "Configured store parent resolves outside home directory ({})",
                    home.display()
                ));
            }
        }
    }

    Ok(candidate)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| anyhow!("Invalid target path"))?;
    if !parent.exists() {
        fs::create_dir_all(parent)?;
        restrict_dir(parent)?;
    }

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|e| anyhow!("Atomic write failed: {}", e.error))?;
    Ok(())
}

fn restrict_file(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.exists() {
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms)?;
        }
    }
    // On non-Unix platforms we skip explicit chmod; rely on platform defaults.
    Ok(())
}

fn restrict_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.exists() {
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(path, perms)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;

    #[test]
    fn key_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(KEY_FILE);
        let first = load_or_create_key(&path).unwrap();
        let second = load_or_create_key(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn store_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store_file = dir.path().join(STORE_FILE);
        let key = load_or_create_key(&dir.path().join(KEY_FILE)).unwrap();

        let mut store = Store::default();
        store.accounts.push(Account {
            id: crate::models::new_uuid(),
            name: "Example".to_string(),
            secret: "GEZDGNBVGY3TQOJQ".to_string(),
        });
        persist_store(&store_file, &mut store, &key).unwrap();
        assert_eq!(store.revision, 1);

        let loaded = load_store(&store_file, &key);
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.accounts.len(), 1);
        assert_eq!(loaded.accounts[0].name, "Example");
        assert_eq!(loaded.accounts[0].secret, "GEZDGNBVGY3TQOJQ");
    }

    #[test]
    fn missing_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let key = generate_key();
        let loaded = load_store(&dir.path().join(STORE_FILE), &key);
        assert!(loaded.accounts.is_empty());
        assert_eq!(loaded.revision, 0);
    }

    #[test]
    fn wrong_key_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store_file = dir.path().join(STORE_FILE);
        let key = generate_key();

        let mut store = Store::default();
        store.accounts.push(Account {
            id: crate::models::new_uuid(),
            name: "Example".to_string(),
            secret: "GEZDGNBVGY3TQOJQ".to_string(),
        });
        persist_store(&store_file, &mut store, &key).unwrap();

        let other = generate_key();
        let loaded = load_store(&store_file, &other);
        assert!(loaded.accounts.is_empty());
    }

    #[test]
    fn store_dir_with_parent_traversal_is_rejected() {
        assert!(validate_store_dir(Path::new("accounts/../escape")).is_err());
        assert!(validate_store_dir(Path::new("../outside")).is_err());
    }

    #[test]
    fn store_dir_outside_home_is_rejected() {
        assert!(validate_store_dir(Path::new("/definitely/not/home/codebook")).is_err());
    }

    #[test]
    fn relative_store_dir_resolves_under_home() {
        let home = dirs::home_dir().unwrap();
        let dir = validate_store_dir(Path::new(".codebook-alt")).unwrap();
        assert!(dir.starts_with(home));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_store_dir_escaping_home_is_rejected() {
        let home = dirs::home_dir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        if outside.path().starts_with(&home) {
            // temp lives under home on this machine; the escape cannot be staged
            return;
        }
        let staging = tempfile::Builder::new()
            .prefix(".codebook-test")
            .tempdir_in(&home)
            .unwrap();
        let link = staging.path().join("store");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();
        assert!(validate_store_dir(&link).is_err());
    }

    #[test]
    fn corrupted_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store_file = dir.path().join(STORE_FILE);
        fs::write(&store_file, "{ not even json").unwrap();
        let key = generate_key();
        assert!(load_store(&store_file, &key).accounts.is_empty());
    }
}
