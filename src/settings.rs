use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    episode::{CompileError, DEFAULT_PATTERN, Matcher, compile_or_default},
    error::{Error, Result},
};

const APP_DIR: &str = "subpair";
const FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    pub episode_regex: String,
    pub model_url: String,
    pub model_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            episode_regex: DEFAULT_PATTERN.to_string(),
            model_url: "http://localhost:11434/v1/chat/completions".to_string(),
            model_name: "qwen/qwen3-vl-8b".to_string(),
        }
    }
}

impl Settings {
    /// Apply `SUBPAIR_EPISODE_REGEX`, `SUBPAIR_MODEL_URL` and
    /// `SUBPAIR_MODEL_NAME` when they are set.
    pub fn with_env(mut self) -> Self {
        let vars = [
            ("SUBPAIR_EPISODE_REGEX", &mut self.episode_regex),
            ("SUBPAIR_MODEL_URL", &mut self.model_url),
            ("SUBPAIR_MODEL_NAME", &mut self.model_name),
        ];
        for (key, field) in vars {
            if let Ok(value) = env::var(key)
                && !value.trim().is_empty()
            {
                *field = value;
            }
        }
        self
    }

    pub fn matcher(&self) -> (Matcher, Option<CompileError>) {
        compile_or_default(&self.episode_regex)
    }
}

pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&Settings) + Send + Sync>;

/// Settings persisted as JSON. Listeners registered with
/// [`subscribe`](Self::subscribe) run synchronously after every save, outside
/// the registry lock, so they may subscribe or unsubscribe themselves.
pub struct SettingsStore {
    path: PathBuf,
    legacy_path: Option<PathBuf>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl SettingsStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            legacy_path: None,
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// `<config dir>/subpair/settings.json`, falling back to
    /// `./settings.json` for reading.
    pub fn open_default() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| Error::Settings("cannot locate the config directory".to_string()))?;
        let mut store = Self::open(base.join(APP_DIR).join(FILE_NAME));
        store.legacy_path = env::current_dir().ok().map(|cwd| cwd.join(FILE_NAME));
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Settings> {
        let source = if self.path.exists() {
            &self.path
        } else {
            match &self.legacy_path {
                Some(legacy) if legacy.exists() => legacy,
                _ => {
                    tracing::debug!("No settings at {:?}, using defaults", self.path);
                    return Ok(Settings::default());
                }
            }
        };

        let content = fs::read_to_string(source)?;
        let settings = serde_json::from_str(&content)
            .map_err(|e| Error::Settings(format!("failed to parse {:?}: {}", source, e)))?;
        tracing::debug!("Loaded settings from {:?}", source);
        Ok(settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| Error::Settings(format!("failed to serialize settings: {}", e)))?;
        fs::write(&self.path, json)?;
        tracing::info!("Saved settings to {:?}", self.path);

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .map_err(|_| Error::Settings("listener registry poisoned".to_string()))?
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(settings);
        }
        Ok(true)
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.listeners.lock() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(existing, _)| *existing != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::open(temp_dir.path().join("settings.json"));
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::open(temp_dir.path().join("nested").join("settings.json"));
        let settings = Settings {
            episode_regex: r"S\d{1,2}E(\d{2})".to_string(),
            ..Settings::default()
        };
        assert!(store.save(&settings).unwrap());
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn test_load_reads_legacy_file() {
        let temp_dir = TempDir::new().unwrap();
        let legacy = temp_dir.path().join("legacy.json");
        fs::write(
            &legacy,
            r#"{"episode_regex":"E(\\d+)","model_url":"http://m","model_name":"n"}"#,
        )
        .unwrap();
        let mut store = SettingsStore::open(temp_dir.path().join("settings.json"));
        store.legacy_path = Some(legacy);
        assert_eq!(store.load().unwrap().episode_regex, r"E(\d+)");
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, "{").unwrap();
        let store = SettingsStore::open(&path);
        assert!(matches!(store.load(), Err(Error::Settings(_))));
    }

    #[test]
    fn test_save_notifies_subscribers() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::open(temp_dir.path().join("settings.json"));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let id = store.subscribe(move |s| sink.lock().unwrap().push(s.model_name.clone()));

        let mut settings = Settings::default();
        settings.model_name = "first".to_string();
        store.save(&settings).unwrap();

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        settings.model_name = "second".to_string();
        store.save(&settings).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["first".to_string()]);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SettingsStore::open(temp_dir.path().join("settings.json")));
        let calls = Arc::new(AtomicU64::new(0));

        let id = Arc::new(AtomicU64::new(0));
        let (weak, own_id, counter) = (Arc::downgrade(&store), id.clone(), calls.clone());
        let subscribed = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            if let Some(store) = weak.upgrade() {
                store.unsubscribe(own_id.load(Ordering::Relaxed));
                store.subscribe(|_| {});
            }
        });
        id.store(subscribed, Ordering::Relaxed);

        store.save(&Settings::default()).unwrap();
        store.save(&Settings::default()).unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_invalid_regex_falls_back() {
        let settings = Settings {
            episode_regex: "(".to_string(),
            ..Settings::default()
        };
        let (matcher, err) = settings.matcher();
        assert!(err.is_some());
        assert_eq!(matcher.as_str(), DEFAULT_PATTERN);
    }
}
