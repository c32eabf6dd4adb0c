//! SecretResolver: symbolic-reference substitution plus a pluggable
//! secret store, OS keyring by default (spec 4.11).
//!
//! Only the resolver and its store should ever hold a live secret
//! value; everything else in the crate carries a `{{name}}` reference
//! or an already-redacted `Debug` rendering.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::SecretsConfig;

static SYMBOLIC_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\{\{([A-Za-z0-9_.-]+)\}\}$").unwrap());
static EMBEDDED_SYMBOLIC_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{([A-Za-z0-9_.-]+)\}\}").unwrap());

/// Secret store failure modes.
#[derive(Debug, Error)]
pub enum SecretError {
    /// No value stored under this key.
    #[error("secret not found: {0}")]
    NotFound(String),
    /// The backing store (keyring, file, etc.) failed.
    #[error("secret store access error: {0}")]
    Backend(String),
}

/// Opaque secret value. `Debug` always renders a fixed placeholder,
/// never the underlying value (spec 4.11).
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wrap a raw secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the raw value. Use only at the point a secret is injected
    /// into an outbound call; never log or persist the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// Abstract `{get, set, delete, list, has}` secret persistence.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key, if one is stored.
    async fn get(&self, key: &str) -> Result<Option<SecretValue>, SecretError>;
    /// Store (or overwrite) a secret by key.
    async fn set(&self, key: &str, value: SecretValue) -> Result<(), SecretError>;
    /// Delete a secret by key. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, SecretError>;
    /// List all known keys, alphabetically.
    async fn list(&self) -> Result<Vec<String>, SecretError>;
    /// Whether a key is present.
    async fn has(&self, key: &str) -> Result<bool, SecretError>;
}

/// In-memory secret store, used in tests and as a fallback when no
/// OS keyring is available.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, SecretValue>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<SecretValue>, SecretError> {
        Ok(self.secrets.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: SecretValue) -> Result<(), SecretError> {
        self.secrets.write().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, SecretError> {
        Ok(self.secrets.write().await.remove(key).is_some())
    }

    async fn list(&self) -> Result<Vec<String>, SecretError> {
        let mut keys: Vec<String> = self.secrets.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn has(&self, key: &str) -> Result<bool, SecretError> {
        Ok(self.secrets.read().await.contains_key(key))
    }
}

/// Secret store backed by the OS keyring (Keychain, Secret Service,
/// Credential Manager), via the `keyring` crate.
///
/// The OS keyring has no native `list`, so a sidecar alphabetical
/// index of known key names is maintained under a fixed service entry
/// and kept in lockstep with every `set`/`delete`.
pub struct KeyringSecretStore {
    service: String,
    index: RwLock<Vec<String>>,
}

const INDEX_ENTRY: &str = "__index__";

impl KeyringSecretStore {
    /// Open (or lazily create) the keyring-backed store under
    /// `service`, loading its existing key index.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Backend`] if the keyring cannot be
    /// reached at all (not merely if the index entry is absent).
    pub fn open(service: impl Into<String>) -> Result<Self, SecretError> {
        let service = service.into();
        let index = load_index(&service)?;
        Ok(Self { service, index: RwLock::new(index) })
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, SecretError> {
        keyring::Entry::new(&self.service, key).map_err(|e| SecretError::Backend(e.to_string()))
    }

    async fn persist_index(&self) -> Result<(), SecretError> {
        let index = self.index.read().await;
        let joined = index.join("\n");
        self.entry(INDEX_ENTRY)?.set_password(&joined).map_err(|e| SecretError::Backend(e.to_string()))
    }
}

fn load_index(service: &str) -> Result<Vec<String>, SecretError> {
    let entry = keyring::Entry::new(service, INDEX_ENTRY).map_err(|e| SecretError::Backend(e.to_string()))?;
    match entry.get_password() {
        Ok(joined) => Ok(joined.lines().map(str::to_owned).filter(|s| !s.is_empty()).collect()),
        Err(keyring::Error::NoEntry) => Ok(Vec::new()),
        Err(e) => Err(SecretError::Backend(e.to_string())),
    }
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, key: &str) -> Result<Option<SecretValue>, SecretError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(SecretValue::new(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SecretError::Backend(e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: SecretValue) -> Result<(), SecretError> {
        self.entry(key)?.set_password(value.expose()).map_err(|e| SecretError::Backend(e.to_string()))?;
        let mut index = self.index.write().await;
        if !index.iter().any(|k| k == key) {
            index.push(key.to_owned());
            index.sort();
        }
        drop(index);
        self.persist_index().await
    }

    async fn delete(&self, key: &str) -> Result<bool, SecretError> {
        let removed = match self.entry(key)?.delete_credential() {
            Ok(()) => true,
            Err(keyring::Error::NoEntry) => false,
            Err(e) => return Err(SecretError::Backend(e.to_string())),
        };
        if removed {
            let mut index = self.index.write().await;
            index.retain(|k| k != key);
            drop(index);
            self.persist_index().await?;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<String>, SecretError> {
        let mut keys = self.index.read().await.clone();
        keys.sort();
        Ok(keys)
    }

    async fn has(&self, key: &str) -> Result<bool, SecretError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Resolves `{{name}}` symbolic references against a session-scoped
/// table first, then the backing secret store.
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
    session_overrides: RwLock<HashMap<String, HashMap<String, SecretValue>>>,
}

impl SecretResolver {
    /// Wrap `store` in a resolver with no session overrides yet.
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store, session_overrides: RwLock::new(HashMap::new()) }
    }

    /// Build a resolver from config, choosing the keyring or in-memory
    /// backend per `config.backend`.
    ///
    /// # Errors
    ///
    /// Propagates [`SecretError::Backend`] if `backend == "keyring"`
    /// and the OS keyring cannot be reached.
    pub fn from_config(config: &SecretsConfig) -> Result<Self, SecretError> {
        let store: Arc<dyn SecretStore> = match config.backend.as_str() {
            "keyring" => Arc::new(KeyringSecretStore::open(config.keyring_service.clone())?),
            _ => Arc::new(MemorySecretStore::new()),
        };
        Ok(Self::new(store))
    }

    /// Register a secret visible only within `session_id`, overriding
    /// the backing store for the duration of that session.
    pub async fn set_session_secret(&self, session_id: &str, name: &str, value: SecretValue) {
        let mut overrides = self.session_overrides.write().await;
        overrides.entry(session_id.to_owned()).or_default().insert(name.to_owned(), value);
    }

    /// Drop every session-scoped secret registered for `session_id`.
    pub async fn clear_session(&self, session_id: &str) {
        self.session_overrides.write().await.remove(session_id);
    }

    /// Whether `value` is exactly a `{{name}}` symbolic reference.
    #[must_use]
    pub fn is_symbolic_ref(value: &str) -> bool {
        SYMBOLIC_REF.is_match(value)
    }

    /// Extract the referenced name from a symbolic reference, if `value`
    /// is one.
    #[must_use]
    pub fn ref_name(value: &str) -> Option<&str> {
        SYMBOLIC_REF.captures(value).map(|c| c.get(1).unwrap().as_str())
    }

    /// Resolve `value` if it is a symbolic reference, checking the
    /// session table first, then the backing store. Returns `None` if
    /// `value` is not a reference, or the reference is unknown.
    pub async fn resolve_symbolic(&self, value: &str, session_id: Option<&str>) -> Option<SecretValue> {
        let name = Self::ref_name(value)?;

        if let Some(session_id) = session_id {
            let overrides = self.session_overrides.read().await;
            if let Some(found) = overrides.get(session_id).and_then(|m| m.get(name)) {
                return Some(found.clone());
            }
        }

        self.store.get(name).await.ok().flatten()
    }

    /// Resolve `value` for use in an outbound call: every `{{name}}`
    /// reference found anywhere in `value` — whole-string or embedded in
    /// a larger sentence — resolves through [`Self::resolve_symbolic`];
    /// an unresolvable reference is left in place as a literal.
    pub async fn resolve_for_execution(&self, value: &str, session_id: Option<&str>) -> String {
        if value.is_empty() {
            return value.to_owned();
        }

        let refs: Vec<std::ops::Range<usize>> =
            EMBEDDED_SYMBOLIC_REF.find_iter(value).map(|m| m.range()).collect();
        if refs.is_empty() {
            return value.to_owned();
        }

        let mut result = String::with_capacity(value.len());
        let mut last_end = 0;
        for range in refs {
            result.push_str(&value[last_end..range.start]);
            let placeholder = &value[range.clone()];
            match self.resolve_symbolic(placeholder, session_id).await {
                Some(resolved) => result.push_str(resolved.expose()),
                None => result.push_str(placeholder),
            }
            last_end = range.end;
        }
        result.push_str(&value[last_end..]);
        result
    }

    /// Persist a secret under `key`.
    ///
    /// # Errors
    ///
    /// Propagates the backing store's [`SecretError`].
    pub async fn store_key(&self, key: &str, value: SecretValue) -> Result<(), SecretError> {
        self.store.set(key, value).await
    }

    /// Fetch a secret by key directly (not via symbolic resolution).
    ///
    /// # Errors
    ///
    /// Propagates the backing store's [`SecretError`].
    pub async fn get_key(&self, key: &str) -> Result<Option<SecretValue>, SecretError> {
        self.store.get(key).await
    }

    /// Delete a secret by key.
    ///
    /// # Errors
    ///
    /// Propagates the backing store's [`SecretError`].
    pub async fn delete_key(&self, key: &str) -> Result<bool, SecretError> {
        self.store.delete(key).await
    }

    /// List all known secret keys, alphabetically.
    ///
    /// # Errors
    ///
    /// Propagates the backing store's [`SecretError`].
    pub async fn list_keys(&self) -> Result<Vec<String>, SecretError> {
        self.store.list().await
    }

    /// Whether `key` is known to the backing store.
    ///
    /// # Errors
    ///
    /// Propagates the backing store's [`SecretError`].
    pub async fn has_key(&self, key: &str) -> Result<bool, SecretError> {
        self.store.has(key).await
    }

    /// Scan `text` for literal values matching secrets known to the
    /// store and rewrite each occurrence as its `{{name}}` reference.
    /// Used for safe logging and outbound sanitisation.
    ///
    /// # Errors
    ///
    /// Propagates the backing store's [`SecretError`].
    pub async fn convert_to_symbolic(&self, text: &str) -> Result<String, SecretError> {
        let keys = self.store.list().await?;
        let mut result = text.to_owned();
        for key in keys {
            if let Some(value) = self.store.get(&key).await? {
                let literal = value.expose();
                if !literal.is_empty() && result.contains(literal) {
                    result = result.replace(literal, &format!("{{{{{key}}}}}"));
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_value_debug_is_redacted() {
        let secret = SecretValue::new("sk-live-abc123");
        assert_eq!(format!("{secret:?}"), "__REDACTED__");
    }

    #[test]
    fn symbolic_ref_detection() {
        assert!(SecretResolver::is_symbolic_ref("{{openai_api_key}}"));
        assert!(!SecretResolver::is_symbolic_ref("openai_api_key"));
        assert!(!SecretResolver::is_symbolic_ref("{{not closed"));
    }

    #[tokio::test]
    async fn resolve_for_execution_falls_through_on_unknown_ref() {
        let resolver = SecretResolver::new(Arc::new(MemorySecretStore::new()));
        let resolved = resolver.resolve_for_execution("{{missing}}", None).await;
        assert_eq!(resolved, "{{missing}}");
    }

    #[tokio::test]
    async fn resolve_for_execution_resolves_known_ref_from_store() {
        let resolver = SecretResolver::new(Arc::new(MemorySecretStore::new()));
        resolver.store_key("openai_api_key", SecretValue::new("sk-test")).await.unwrap();
        let resolved = resolver.resolve_for_execution("{{openai_api_key}}", None).await;
        assert_eq!(resolved, "sk-test");
    }

    #[tokio::test]
    async fn resolve_for_execution_passes_through_literal_values() {
        let resolver = SecretResolver::new(Arc::new(MemorySecretStore::new()));
        let resolved = resolver.resolve_for_execution("plain-value", None).await;
        assert_eq!(resolved, "plain-value");
    }

    #[tokio::test]
    async fn session_override_takes_precedence_over_store() {
        let resolver = SecretResolver::new(Arc::new(MemorySecretStore::new()));
        resolver.store_key("k", SecretValue::new("store-value")).await.unwrap();
        resolver.set_session_secret("session-1", "k", SecretValue::new("session-value")).await;
        let resolved = resolver.resolve_symbolic("{{k}}", Some("session-1")).await.unwrap();
        assert_eq!(resolved.expose(), "session-value");
        resolver.clear_session("session-1").await;
        let resolved = resolver.resolve_symbolic("{{k}}", Some("session-1")).await.unwrap();
        assert_eq!(resolved.expose(), "store-value");
    }

    #[tokio::test]
    async fn list_keys_is_alphabetical() {
        let resolver = SecretResolver::new(Arc::new(MemorySecretStore::new()));
        resolver.store_key("zeta", SecretValue::new("z")).await.unwrap();
        resolver.store_key("alpha", SecretValue::new("a")).await.unwrap();
        assert_eq!(resolver.list_keys().await.unwrap(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn convert_to_symbolic_rewrites_known_literals() {
        let resolver = SecretResolver::new(Arc::new(MemorySecretStore::new()));
        resolver.store_key("token", SecretValue::new("sk-abc-123")).await.unwrap();
        let text = "Authorization: Bearer sk-abc-123";
        let converted = resolver.convert_to_symbolic(text).await.unwrap();
        assert_eq!(converted, "Authorization: Bearer {{token}}");
    }

    #[tokio::test]
    async fn resolve_for_execution_substitutes_embedded_ref() {
        let resolver = SecretResolver::new(Arc::new(MemorySecretStore::new()));
        resolver.store_key("openai_key", SecretValue::new("sk-ABC-123")).await.unwrap();
        let resolved = resolver.resolve_for_execution("Authorization: Bearer {{openai_key}}", None).await;
        assert_eq!(resolved, "Authorization: Bearer sk-ABC-123");
    }

    #[tokio::test]
    async fn resolve_for_execution_is_the_inverse_of_convert_to_symbolic() {
        let resolver = SecretResolver::new(Arc::new(MemorySecretStore::new()));
        resolver.store_key("openai_key", SecretValue::new("sk-ABC-123")).await.unwrap();
        let text = "Authorization: Bearer sk-ABC-123";
        let symbolic = resolver.convert_to_symbolic(text).await.unwrap();
        assert_eq!(symbolic, "Authorization: Bearer {{openai_key}}");
        let roundtripped = resolver.resolve_for_execution(&symbolic, None).await;
        assert_eq!(roundtripped, text);
    }

    #[tokio::test]
    async fn delete_key_reports_whether_anything_was_removed() {
        let resolver = SecretResolver::new(Arc::new(MemorySecretStore::new()));
        assert!(!resolver.delete_key("missing").await.unwrap());
        resolver.store_key("present", SecretValue::new("v")).await.unwrap();
        assert!(resolver.delete_key("present").await.unwrap());
    }
}
