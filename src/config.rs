use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::proxy::ProxySettings;

pub const CONFIG_FILE: &str = "config.json";

pub const STATE_FILE: &str = "state.json";

/// Get the config directory using platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/onyx-gui/`
/// - Linux: `~/.config/onyx-gui/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/onyx-gui/`
///
/// Falls back to `~/.onyx-gui/` if platform dir is unavailable.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("onyx-gui"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".onyx-gui")
        })
}

/// Load a JSON config file, returning Default if missing or corrupt.
pub fn load_json_config<T: DeserializeOwned + Default>(filename: &str) -> T {
    load_json_config_in(&config_dir(), filename)
}

/// Same as `load_json_config`, rooted at `dir`.
/// Logs when the file exists but cannot be read or parsed, so corrupt files
/// are visible in logs instead of silently resetting state.
pub fn load_json_config_in<T: DeserializeOwned + Default>(dir: &Path, filename: &str) -> T {
    let path = dir.join(filename);
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Could not read config {}: {e}", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Corrupt config {}: {e}. Using defaults.", path.display());
            T::default()
        }
    }
}

/// Save a JSON config file under `dir` atomically (temp file + rename).
/// Sets 0600 permissions on Unix since the file may hold the server token.
pub fn save_json_config_in<T: Serialize>(dir: &Path, filename: &str, config: &T) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create config directory: {e}"))?;

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {e}"))?;

    let target = dir.join(filename);
    let temp = dir.join(format!("{}.tmp.{}", filename, std::process::id()));

    std::fs::write(&temp, &json)
        .map_err(|e| format!("Failed to write temp config: {e}"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&temp, perms)
            .map_err(|e| format!("Failed to set config permissions: {e}"))?;
    }

    std::fs::rename(&temp, &target)
        .map_err(|e| {
            let _ = std::fs::remove_file(&temp);
            format!("Failed to commit config: {e}")
        })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// ExtensionConfig
// ---------------------------------------------------------------------------

/// Client-side settings: where the notebook server is and how to reach the
/// backend extension through it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Notebook server base URL, including any per-user path prefix
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Notebook server token, sent as `Authorization: token <token>`
    #[serde(default)]
    pub token: Option<String>,
    /// Path segment the backend extension is mounted under
    #[serde(default = "default_extension_path")]
    pub extension_path: String,
    /// Path segment used for `BackendTarget::Alternate`
    #[serde(default = "default_alternate_extension_path")]
    pub alternate_extension_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Durable state file (defaults to `<config_dir>/state.json`)
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8888/".to_string()
}

fn default_extension_path() -> String {
    crate::PLUGIN_NAME.to_string()
}

fn default_alternate_extension_path() -> String {
    crate::ALTERNATE_EXTENSION_PATH.to_string()
}

fn default_request_timeout_secs() -> u64 {
    crate::transport::DEFAULT_TIMEOUT_SECS
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            token: None,
            extension_path: default_extension_path(),
            alternate_extension_path: default_alternate_extension_path(),
            request_timeout_secs: default_request_timeout_secs(),
            state_file: None,
        }
    }
}

impl ExtensionConfig {
    /// Load from the config directory, then apply environment overrides.
    pub fn load() -> Self {
        Self::load_saved().with_env_overrides()
    }

    /// The saved file alone, without environment overrides.
    pub fn load_saved() -> Self {
        load_json_config(CONFIG_FILE)
    }

    /// Validate and save to the config directory.
    pub fn save(&self) -> Result<(), String> {
        self.save_in(&config_dir())
    }

    pub fn save_in(&self, dir: &Path) -> Result<(), String> {
        self.base_url()?;
        save_json_config_in(dir, CONFIG_FILE, self)
    }

    /// Copy for display, with the token masked.
    pub fn redacted(&self) -> Self {
        Self {
            token: self.token.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }

    /// `ONYX_GUI_SERVER_URL` and `JUPYTER_TOKEN` win over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("ONYX_GUI_SERVER_URL")
            && !url.is_empty()
        {
            self.server_url = url;
        }
        if let Ok(token) = std::env::var("JUPYTER_TOKEN")
            && !token.is_empty()
        {
            self.token = Some(token);
        }
        self
    }

    pub fn base_url(&self) -> Result<Url, String> {
        Url::parse(&self.server_url).map_err(|e| format!("Invalid server URL \"{}\": {e}", self.server_url))
    }

    pub fn proxy_settings(&self) -> Result<ProxySettings, String> {
        Ok(ProxySettings {
            base_url: self.base_url()?,
            extension_path: self.extension_path.clone(),
            alternate_extension_path: self.alternate_extension_path.clone(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| config_dir().join(STATE_FILE))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
