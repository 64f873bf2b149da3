use crate::common::{BridgeError, Result};
use crate::engine::onnx::recognizer::Embedding;
use std::path::{Path, PathBuf};
use std::fs;
use serde::{Serialize, Deserialize};

const STORAGE_VERSION: u32 = 1;
const RECORD_EXTENSION: &str = "bincode";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub version: u32,
    pub user_id: String,
    pub template_version: i32,
    pub templates: Vec<Embedding>,
}

/// One bincode file per registered user.
pub struct UserStore {
    data_dir: PathBuf,
}

impl UserStore {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn save_user(&self, record: &UserRecord) -> Result<()> {
        let user_file = self.user_file(&record.user_id)?;
        let encoded = bincode::serialize(record)
            .map_err(|e| BridgeError::Storage(format!("Failed to serialize: {}", e)))?;
        fs::write(user_file, encoded)?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let user_file = self.user_file(user_id)?;
        if !user_file.exists() {
            return Ok(None);
        }

        let data = fs::read(user_file)?;
        let mut record: UserRecord = bincode::deserialize(&data)
            .map_err(|e| BridgeError::Storage(format!("Failed to deserialize: {}", e)))?;

        if record.version < STORAGE_VERSION {
            record.version = STORAGE_VERSION;
        }

        Ok(Some(record))
    }

    /// Registered user ids, sorted.
    pub fn list_users(&self) -> Result<Vec<String>> {
        let mut users = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                users.push(stem.to_string());
            }
        }
        users.sort();
        Ok(users)
    }

    /// Removing an unknown user is not an error.
    pub fn delete_user(&self, user_id: &str) -> Result<()> {
        let user_file = self.user_file(user_id)?;
        match fs::remove_file(&user_file) {
            Ok(()) => {
                tracing::info!("Deleted user {}", user_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores templates for `user_id`, appending to an existing record when
    /// `append` is set. Returns the number of templates now on file.
    pub fn add_templates(
        &self,
        user_id: &str,
        template_version: i32,
        templates: Vec<Embedding>,
        append: bool,
    ) -> Result<usize> {
        let record = match self.get_user(user_id)? {
            Some(_) if !append => {
                return Err(BridgeError::Storage(format!("User {} is already registered", user_id)));
            }
            Some(mut existing) => {
                if existing.template_version != template_version {
                    return Err(BridgeError::Storage(format!(
                        "User {} has templates of version {}, cannot append version {}",
                        user_id, existing.template_version, template_version
                    )));
                }
                existing.templates.extend(templates);
                existing
            }
            None => UserRecord {
                version: STORAGE_VERSION,
                user_id: user_id.to_string(),
                template_version,
                templates,
            },
        };

        self.save_user(&record)?;
        Ok(record.templates.len())
    }

    fn user_file(&self, user_id: &str) -> Result<PathBuf> {
        let valid = !user_id.is_empty()
            && !user_id.starts_with('.')
            && !user_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(BridgeError::Storage(format!("Invalid user id: {:?}", user_id)));
        }
        Ok(self.data_dir.join(format!("{}.{}", user_id, RECORD_EXTENSION)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::new(dir.path().join("users")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_fresh_store_lists_nothing() {
        let (_dir, store) = store();
        assert!(store.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_add_list_and_delete() {
        let (_dir, store) = store();
        store.add_templates("bob", 1, vec![vec![0.1, 0.2]], false).unwrap();
        store.add_templates("alice", 1, vec![vec![0.3, 0.4]], false).unwrap();
        assert_eq!(store.list_users().unwrap(), vec!["alice", "bob"]);

        store.delete_user("bob").unwrap();
        assert_eq!(store.list_users().unwrap(), vec!["alice"]);
        assert!(store.get_user("bob").unwrap().is_none());
    }

    #[test]
    fn test_delete_unknown_user_is_ok() {
        let (_dir, store) = store();
        store.delete_user("nobody").unwrap();
    }

    #[test]
    fn test_existing_user_requires_append() {
        let (_dir, store) = store();
        store.add_templates("bob", 1, vec![vec![1.0]], false).unwrap();
        assert!(store.add_templates("bob", 1, vec![vec![2.0]], false).is_err());
        assert_eq!(store.add_templates("bob", 1, vec![vec![2.0]], true).unwrap(), 2);
        assert_eq!(store.get_user("bob").unwrap().unwrap().templates.len(), 2);
    }

    #[test]
    fn test_append_rejects_version_mismatch() {
        let (_dir, store) = store();
        store.add_templates("bob", 1, vec![vec![1.0]], false).unwrap();
        assert!(store.add_templates("bob", 2, vec![vec![2.0]], true).is_err());
    }

    #[test]
    fn test_ignores_foreign_files() {
        let (_dir, store) = store();
        fs::write(store.data_dir().join("notes.txt"), b"hi").unwrap();
        assert!(store.list_users().unwrap().is_empty());
    }

    #[rstest]
    #[case("")]
    #[case("../etc/passwd")]
    #[case(".hidden")]
    #[case("a\\b")]
    fn test_rejects_unsafe_ids(#[case] user_id: &str) {
        let (_dir, store) = store();
        assert!(store.delete_user(user_id).is_err());
    }
}
