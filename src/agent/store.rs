//! Embedded transactional store with three isolated namespaces.
//!
//! Each namespace is its own SQLite table, so a key written to one can
//! never be observed through another. Values are JSON documents.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::platform;

/// Independent key spaces inside the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Config,
    Credentials,
    Cache,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Config, Namespace::Credentials, Namespace::Cache];

    fn table(self) -> &'static str {
        match self {
            Namespace::Config => "config",
            Namespace::Credentials => "credentials",
            Namespace::Cache => "cache",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{namespace} key not found: {key}")]
    NotFound { namespace: Namespace, key: String },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to prepare store location: {0}")]
    Setup(String),

    #[error("store connection poisoned by a panicked writer")]
    Poisoned,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// AWS credentials stored for a profile
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credential {
    pub access_key_id: String,
    pub secret_access_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    #[serde(default)]
    pub region: String,

    /// Absent for long-lived credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// A cached value and the instant it stops being readable
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The agent's persistent store
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            platform::ensure_private_directory(parent)
                .map_err(|e| StoreError::Setup(format!("{:#}", e)))?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;

        let store = Self::init(conn, path.to_path_buf())?;

        platform::set_file_permissions(path, 0o600)
            .map_err(|e| StoreError::Setup(format!("{:#}", e)))?;

        Ok(store)
    }

    /// Store that lives only as long as the value
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn init(mut conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        let tx = conn.transaction()?;
        for namespace in Namespace::ALL {
            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)",
                    namespace.table()
                ),
                [],
            )?;
        }
        tx.commit()?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside a single transaction, committing only on success
    fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn put<T: Serialize>(&self, namespace: Namespace, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        self.with_tx(|tx| {
            tx.execute(
                &format!(
                    "INSERT INTO {} (key, value) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    namespace.table()
                ),
                params![key, json],
            )?;
            Ok(())
        })
    }

    fn get<T: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Result<T, StoreError> {
        let json = self.with_tx(|tx| {
            let json: Option<String> = tx
                .query_row(
                    &format!("SELECT value FROM {} WHERE key = ?1", namespace.table()),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(json)
        })?;

        let json = json.ok_or_else(|| StoreError::NotFound {
            namespace,
            key: key.to_string(),
        })?;

        Ok(serde_json::from_str(&json)?)
    }

    /// Returns whether a row was removed
    fn delete(&self, namespace: Namespace, key: &str) -> Result<bool, StoreError> {
        self.with_tx(|tx| {
            let removed = tx.execute(
                &format!("DELETE FROM {} WHERE key = ?1", namespace.table()),
                params![key],
            )?;
            Ok(removed > 0)
        })
    }

    fn scan<T: DeserializeOwned>(&self, namespace: Namespace) -> Result<Vec<(String, T)>, StoreError> {
        let rows = self.with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT key, value FROM {} ORDER BY key",
                namespace.table()
            ))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(key, json)| Ok((key, serde_json::from_str(&json)?)))
            .collect()
    }

    /// Store an arbitrary configuration value
    pub fn set_config<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.put(Namespace::Config, key, value)
    }

    pub fn get_config<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        self.get(Namespace::Config, key)
    }

    /// Store (or replace) the credentials of a profile
    pub fn set_credential(&self, profile: &str, credential: &Credential) -> Result<(), StoreError> {
        self.put(Namespace::Credentials, profile, credential)
    }

    pub fn get_credential(&self, profile: &str) -> Result<Credential, StoreError> {
        self.get(Namespace::Credentials, profile)
    }

    /// All stored profiles, ordered by name
    pub fn list_credentials(&self) -> Result<Vec<(String, Credential)>, StoreError> {
        self.scan(Namespace::Credentials)
    }

    /// Remove a profile; succeeds whether or not it existed
    pub fn delete_credential(&self, profile: &str) -> Result<(), StoreError> {
        self.delete(Namespace::Credentials, profile).map(|_| ())
    }

    /// Remove a profile, reporting whether it existed
    ///
    /// The check and the delete share one transaction, so of two concurrent
    /// calls for the same profile only one sees `true`.
    pub fn delete_credential_if_present(&self, profile: &str) -> Result<bool, StoreError> {
        self.delete(Namespace::Credentials, profile)
    }

    /// Replace the cache entry for `key`, readable for `ttl`
    pub fn set_cache<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StoreError> {
        self.set_cache_at(key, value, ttl, Utc::now())
    }

    fn set_cache_at<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let entry = CacheEntry {
            value: serde_json::to_value(value)?,
            expires_at,
        };

        self.put(Namespace::Cache, key, &entry)
    }

    /// Read a cache entry; expired entries read as absent
    pub fn get_cache<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        self.get_cache_at(key, Utc::now())
    }

    fn get_cache_at<T: DeserializeOwned>(&self, key: &str, now: DateTime<Utc>) -> Result<T, StoreError> {
        let entry: CacheEntry = self.get(Namespace::Cache, key)?;

        // TODO: expired rows are masked but never deleted; decide on a sweep policy
        if entry.is_expired_at(now) {
            return Err(StoreError::NotFound {
                namespace: Namespace::Cache,
                key: key.to_string(),
            });
        }

        Ok(serde_json::from_value(entry.value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn credential() -> Credential {
        Credential {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG".to_string(),
            session_token: Some("token==".to_string()),
            region: "eu-west-1".to_string(),
            expiration: None,
        }
    }

    #[test]
    fn credential_roundtrip_and_delete() {
        let store = Store::open_in_memory().unwrap();

        store.set_credential("p", &credential()).unwrap();
        assert_eq!(store.get_credential("p").unwrap(), credential());

        store.delete_credential("p").unwrap();
        let err = store.get_credential("p").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn credential_with_expiration_roundtrips() {
        let store = Store::open_in_memory().unwrap();
        let mut cred = credential();
        cred.expiration = Some(Utc::now());

        store.set_credential("sts", &cred).unwrap();
        assert_eq!(store.get_credential("sts").unwrap(), cred);
    }

    #[test]
    fn set_credential_replaces_whole_record() {
        let store = Store::open_in_memory().unwrap();
        store.set_credential("p", &credential()).unwrap();

        let replacement = Credential {
            session_token: None,
            region: "us-west-2".to_string(),
            ..credential()
        };
        store.set_credential("p", &replacement).unwrap();

        assert_eq!(store.get_credential("p").unwrap(), replacement);
        assert_eq!(store.list_credentials().unwrap().len(), 1);
    }

    #[test]
    fn delete_missing_profile_succeeds() {
        let store = Store::open_in_memory().unwrap();
        store.delete_credential("ghost").unwrap();
    }

    #[test]
    fn delete_if_present_reports_existence_once() {
        let store = Store::open_in_memory().unwrap();
        store.set_credential("p", &credential()).unwrap();

        assert!(store.delete_credential_if_present("p").unwrap());
        assert!(!store.delete_credential_if_present("p").unwrap());
        assert!(!store.delete_credential_if_present("ghost").unwrap());
    }

    #[test]
    fn concurrent_deletes_of_one_profile_succeed_once() {
        let temp = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&temp.path().join("agent.db")).unwrap());
        store.set_credential("p", &credential()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.delete_credential_if_present("p").unwrap())
            })
            .collect();
        let removed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|removed| *removed)
            .count();

        assert_eq!(removed, 1);
    }

    #[test]
    fn list_credentials_is_ordered() {
        let store = Store::open_in_memory().unwrap();
        for profile in ["zeta", "alpha", "mid"] {
            store.set_credential(profile, &credential()).unwrap();
        }

        let names: Vec<String> = store
            .list_credentials()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn namespaces_are_isolated() {
        let store = Store::open_in_memory().unwrap();

        store.set_config("shared", &"config-value").unwrap();
        store.set_credential("shared", &credential()).unwrap();
        store
            .set_cache("shared", &serde_json::json!({"n": 1}), Duration::from_secs(60))
            .unwrap();

        assert_eq!(store.get_config::<String>("shared").unwrap(), "config-value");
        assert_eq!(store.get_credential("shared").unwrap(), credential());
        assert_eq!(
            store.get_cache::<serde_json::Value>("shared").unwrap(),
            serde_json::json!({"n": 1})
        );

        store.delete_credential("shared").unwrap();
        assert_eq!(store.get_config::<String>("shared").unwrap(), "config-value");
        assert!(store.get_cache::<serde_json::Value>("shared").is_ok());
    }

    #[test]
    fn config_values_are_typed() {
        let store = Store::open_in_memory().unwrap();
        store.set_config("port", &8737u16).unwrap();

        assert_eq!(store.get_config::<u16>("port").unwrap(), 8737);
        assert!(store.get_config::<u16>("missing").unwrap_err().is_not_found());
        assert!(matches!(
            store.get_config::<Vec<String>>("port").unwrap_err(),
            StoreError::Serialization(_)
        ));
    }

    #[test]
    fn zero_ttl_cache_entry_is_unreadable() {
        let store = Store::open_in_memory().unwrap();
        store.set_cache("k", &"v", Duration::ZERO).unwrap();

        assert!(store.get_cache::<String>("k").unwrap_err().is_not_found());
    }

    #[test]
    fn cache_entry_expires_lazily() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        store
            .set_cache_at("k", &vec![1, 2, 3], Duration::from_secs(30), now)
            .unwrap();

        let before: Vec<i32> = store.get_cache_at("k", now + chrono::Duration::seconds(29)).unwrap();
        assert_eq!(before, vec![1, 2, 3]);

        let at_expiry = store.get_cache_at::<Vec<i32>>("k", now + chrono::Duration::seconds(30));
        assert!(at_expiry.unwrap_err().is_not_found());

        // The expired row is masked, not swept
        let raw: CacheEntry = store.get(Namespace::Cache, "k").unwrap();
        assert_eq!(raw.value, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn set_cache_rewrites_entry() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        store
            .set_cache_at("k", &serde_json::json!({"a": 1, "b": 2}), Duration::from_secs(5), now)
            .unwrap();
        store
            .set_cache_at("k", &serde_json::json!({"a": 9}), Duration::from_secs(60), now)
            .unwrap();

        let value: serde_json::Value = store
            .get_cache_at("k", now + chrono::Duration::seconds(10))
            .unwrap();
        assert_eq!(value, serde_json::json!({"a": 9}));
    }

    #[test]
    fn huge_ttl_saturates() {
        let store = Store::open_in_memory().unwrap();
        store.set_cache("forever", &true, Duration::MAX).unwrap();
        assert!(store.get_cache::<bool>("forever").unwrap());
    }

    #[test]
    fn data_survives_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("data").join("agent.db");

        {
            let store = Store::open(&path).unwrap();
            store.set_credential("p", &credential()).unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_credential("p").unwrap(), credential());
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let store = Arc::new(Store::open_in_memory().unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.set_credential(&format!("p{}", i), &credential()).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list_credentials().unwrap().len(), 8);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", credential());
        assert!(rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("wJalrXUtnFEMI"));
        assert!(!rendered.contains("token=="));
    }
}
