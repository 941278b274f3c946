//! Settings for cover-runner
//!
//! User settings live in `~/.config/cover-runner/settings.json`; a workspace
//! may override any key in `<workspace>/.cover-runner/settings.json`. Settings
//! are read fresh for every run and validated once while loading.

use crate::error::ConfigError;
use crate::keyring;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_SOURCE_FILE_PATH: &str = "{relativeFilePath}";
pub const DEFAULT_TEST_FILE_PATH: &str = "tests/test_{fileName}";
pub const DEFAULT_TEST_COMMAND: &str =
    "pytest {testFilePath} --cov={sourceDir} --cov-branch --cov-report=xml --cov-report=html";
pub const DEFAULT_COVERAGE_REPORT_PATH: &str = "coverage.xml";
pub const DEFAULT_COVERAGE_TYPE: &str = "cobertura";
pub const DEFAULT_DESIRED_COVERAGE: u8 = 100;
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
pub const DEFAULT_MAX_FIX_ATTEMPTS: u32 = 1;
pub const DEFAULT_PACKAGE_SPEC: &str = "cover-agent";

#[cfg(windows)]
pub const DEFAULT_PYTHON: &str = "python";
#[cfg(not(windows))]
pub const DEFAULT_PYTHON: &str = "python3";

/// Credential fallbacks, in priority order. First non-empty value wins.
pub const API_KEY_ENV_VARS: [&str; 7] = [
    "OPENAI_API_KEY",
    "FIREWORKS_AI_API_KEY",
    "DEEPSEEK_API_KEY",
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "GROQ_API_KEY",
    "QODO_API_KEY",
];

const SETTINGS_FILE: &str = "settings.json";
const WORKSPACE_DIR: &str = ".cover-runner";

/// One settings file as stored on disk. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_coverage_report_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_coverage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fix_attempts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_spec: Option<String>,
}

/// Keys accepted by `config set`, in display order.
pub const SETTING_KEYS: [&str; 14] = [
    "apiKey",
    "model",
    "baseUrl",
    "sourceFilePath",
    "testFilePath",
    "codeCoverageReportPath",
    "testCommand",
    "coverageType",
    "desiredCoverage",
    "maxIterations",
    "maxFixAttempts",
    "pythonPath",
    "installRoot",
    "packageSpec",
];

impl SettingsFile {
    /// Read a settings file. A missing file is an empty layer.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    action: "read",
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_json::Value = serde_json::from_str(&content).map_err(|err| {
            preserve_corrupt_settings(path, &content);
            ConfigError::Corrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;
        Self::from_json(value)
    }

    /// Typed view of parsed JSON. A wrong type is reported against its key
    /// and leaves the file alone.
    fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        let serde_json::Value::Object(map) = value else {
            return Err(ConfigError::InvalidValue {
                key: "settings",
                reason: "expected a JSON object".to_string(),
            });
        };
        for (name, field) in &map {
            let Some(key) = SETTING_KEYS.iter().copied().find(|k| *k == name.as_str()) else {
                continue;
            };
            let single = serde_json::Value::Object(
                std::iter::once((name.clone(), field.clone())).collect(),
            );
            if let Err(err) = serde_json::from_value::<SettingsFile>(single) {
                return Err(ConfigError::InvalidValue {
                    key,
                    reason: err.to_string(),
                });
            }
        }
        serde_json::from_value(serde_json::Value::Object(map)).map_err(|err| {
            ConfigError::InvalidValue {
                key: "settings",
                reason: err.to_string(),
            }
        })
    }

    /// Keys set in `upper` win over keys set in `self`.
    pub fn overlay(self, upper: SettingsFile) -> SettingsFile {
        SettingsFile {
            api_key: upper.api_key.or(self.api_key),
            model: upper.model.or(self.model),
            base_url: upper.base_url.or(self.base_url),
            source_file_path: upper.source_file_path.or(self.source_file_path),
            test_file_path: upper.test_file_path.or(self.test_file_path),
            code_coverage_report_path: upper
                .code_coverage_report_path
                .or(self.code_coverage_report_path),
            test_command: upper.test_command.or(self.test_command),
            coverage_type: upper.coverage_type.or(self.coverage_type),
            desired_coverage: upper.desired_coverage.or(self.desired_coverage),
            max_iterations: upper.max_iterations.or(self.max_iterations),
            max_fix_attempts: upper.max_fix_attempts.or(self.max_fix_attempts),
            python_path: upper.python_path.or(self.python_path),
            install_root: upper.install_root.or(self.install_root),
            package_spec: upper.package_spec.or(self.package_spec),
        }
    }

    /// Set one key from its textual value (as typed on the command line).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let text = || Some(value.to_string());
        let number = |key: &'static str| {
            value
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key,
                    reason: format!("expected an integer, got `{}`", value),
                })
        };
        match key {
            "apiKey" => self.api_key = text(),
            "model" => self.model = text(),
            "baseUrl" => self.base_url = text(),
            "sourceFilePath" => self.source_file_path = text(),
            "testFilePath" => self.test_file_path = text(),
            "codeCoverageReportPath" => self.code_coverage_report_path = text(),
            "testCommand" => self.test_command = text(),
            "coverageType" => self.coverage_type = text(),
            "desiredCoverage" => self.desired_coverage = number("desiredCoverage")?,
            "maxIterations" => self.max_iterations = number("maxIterations")?,
            "maxFixAttempts" => self.max_fix_attempts = number("maxFixAttempts")?,
            "pythonPath" => self.python_path = text(),
            "installRoot" => self.install_root = Some(PathBuf::from(value)),
            "packageSpec" => self.package_spec = text(),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Check every present value the way loading would, ignoring the credential.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Settings::from_layers(self.clone(), Some("unchecked".to_string()), |_| None).map(|_| ())
    }

    /// Write atomically, creating the parent directory.
    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |action: &'static str, path: &Path| {
            let path = path.to_path_buf();
            move |source| ConfigError::Io {
                action,
                path,
                source,
            }
        };

        let dir = path.parent().ok_or(ConfigError::NoConfigDir)?;
        fs::create_dir_all(dir).map_err(io_err("create", dir))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                tracing::debug!(error = %e, dir = %dir.display(), "failed to restrict settings dir");
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "settings",
            reason: e.to_string(),
        })?;
        write_settings_atomic(path, &content).map_err(io_err("write", path))
    }
}

/// Where settings are read from for one run.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub user_file: Option<PathBuf>,
    pub workspace_file: Option<PathBuf>,
    pub use_keyring: bool,
}

impl ConfigSources {
    pub fn discover(workspace_root: Option<&Path>) -> Self {
        Self {
            user_file: user_settings_path(),
            workspace_file: workspace_root.map(workspace_settings_path),
            use_keyring: !keyring::keyring_disabled(),
        }
    }

    /// User file overlaid by the workspace file, without defaults applied.
    pub fn merged(&self) -> Result<SettingsFile, ConfigError> {
        let user = match &self.user_file {
            Some(path) => SettingsFile::read(path)?,
            None => SettingsFile::default(),
        };
        let workspace = match &self.workspace_file {
            Some(path) => SettingsFile::read(path)?,
            None => SettingsFile::default(),
        };
        Ok(user.overlay(workspace))
    }
}

pub fn user_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("cover-runner").join(SETTINGS_FILE))
}

pub fn workspace_settings_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(WORKSPACE_DIR).join(SETTINGS_FILE)
}

pub fn default_install_root() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("cover-runner")
}

/// Fully-defaulted, validated settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub source_file_path: String,
    pub test_file_path: String,
    pub code_coverage_report_path: String,
    pub test_command: String,
    pub coverage_type: String,
    pub desired_coverage: u8,
    pub max_iterations: u32,
    pub max_fix_attempts: u32,
    pub python_path: String,
    pub install_root: PathBuf,
    pub package_spec: String,
}

/// Where the credential came from, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeySource {
    Settings,
    Keychain,
    Env(&'static str),
}

impl Settings {
    /// Load from the configured files, keychain, and process environment.
    pub fn load(sources: &ConfigSources) -> Result<(Self, ApiKeySource), ConfigError> {
        Self::load_with_env(sources, |name| std::env::var(name).ok())
    }

    pub fn load_with_env<F>(
        sources: &ConfigSources,
        env: F,
    ) -> Result<(Self, ApiKeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let merged = sources.merged()?;
        let stored = if sources.use_keyring {
            match keyring::get_api_key() {
                Ok(key) => key,
                Err(err) => {
                    keyring::warn_keychain_error_once(&err);
                    None
                }
            }
        } else {
            None
        };
        Self::from_layers(merged, stored, env)
    }

    /// Settings for tool setup, which needs no credential.
    pub fn load_without_credential(sources: &ConfigSources) -> Result<Self, ConfigError> {
        Self::from_layers(sources.merged()?, Some("unused".to_string()), |_| None)
            .map(|(settings, _)| settings)
    }

    /// Apply defaults, resolve the credential chain, and validate.
    pub fn from_layers<F>(
        file: SettingsFile,
        stored_key: Option<String>,
        env: F,
    ) -> Result<(Self, ApiKeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (api_key, source) =
            resolve_api_key(file.api_key.as_deref(), stored_key.as_deref(), env)
                .ok_or(ConfigError::MissingApiKey)?;

        let settings = Settings {
            api_key,
            model: non_empty("model", file.model, DEFAULT_MODEL)?,
            base_url: non_empty("baseUrl", file.base_url, DEFAULT_BASE_URL)?,
            source_file_path: non_empty(
                "sourceFilePath",
                file.source_file_path,
                DEFAULT_SOURCE_FILE_PATH,
            )?,
            test_file_path: non_empty("testFilePath", file.test_file_path, DEFAULT_TEST_FILE_PATH)?,
            code_coverage_report_path: non_empty(
                "codeCoverageReportPath",
                file.code_coverage_report_path,
                DEFAULT_COVERAGE_REPORT_PATH,
            )?,
            test_command: non_empty("testCommand", file.test_command, DEFAULT_TEST_COMMAND)?,
            coverage_type: non_empty("coverageType", file.coverage_type, DEFAULT_COVERAGE_TYPE)?,
            desired_coverage: in_range(
                "desiredCoverage",
                file.desired_coverage,
                DEFAULT_DESIRED_COVERAGE as i64,
                0,
                100,
            )? as u8,
            max_iterations: in_range(
                "maxIterations",
                file.max_iterations,
                DEFAULT_MAX_ITERATIONS as i64,
                1,
                u32::MAX as i64,
            )? as u32,
            max_fix_attempts: in_range(
                "maxFixAttempts",
                file.max_fix_attempts,
                DEFAULT_MAX_FIX_ATTEMPTS as i64,
                0,
                u32::MAX as i64,
            )? as u32,
            python_path: non_empty("pythonPath", file.python_path, DEFAULT_PYTHON)?,
            install_root: file.install_root.unwrap_or_else(default_install_root),
            package_spec: non_empty("packageSpec", file.package_spec, DEFAULT_PACKAGE_SPEC)?,
        };
        Ok((settings, source))
    }
}

/// Explicit setting, then the keychain, then the env fallbacks in order.
pub fn resolve_api_key<F>(
    explicit: Option<&str>,
    stored: Option<&str>,
    env: F,
) -> Option<(String, ApiKeySource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = explicit.filter(|v| !v.trim().is_empty()) {
        return Some((key.to_string(), ApiKeySource::Settings));
    }
    if let Some(key) = stored.filter(|v| !v.trim().is_empty()) {
        return Some((key.to_string(), ApiKeySource::Keychain));
    }
    API_KEY_ENV_VARS.into_iter().find_map(|name| {
        env(name)
            .filter(|v| !v.trim().is_empty())
            .map(|v| (v, ApiKeySource::Env(name)))
    })
}

fn non_empty(key: &'static str, value: Option<String>, default: &str) -> Result<String, ConfigError> {
    match value {
        None => Ok(default.to_string()),
        Some(v) if v.trim().is_empty() => Err(ConfigError::InvalidValue {
            key,
            reason: "must not be empty".to_string(),
        }),
        Some(v) => Ok(v),
    }
}

fn in_range(
    key: &'static str,
    value: Option<i64>,
    default: i64,
    min: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    let value = value.unwrap_or(default);
    if !(min..=max).contains(&value) {
        return Err(ConfigError::InvalidValue {
            key,
            reason: format!("{} is outside {}..={}", value, min, max),
        });
    }
    Ok(value)
}

/// Copy unparseable settings aside. The original stays so the user can fix it.
fn preserve_corrupt_settings(path: &Path, content: &str) {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let corrupt_path = path.with_extension(format!("json.corrupt-{}", stamp));
    if let Err(e) = fs::write(&corrupt_path, content) {
        tracing::debug!(error = %e, path = %corrupt_path.display(), "failed to back up corrupt settings");
    }
}

fn write_settings_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    use std::fs::OpenOptions;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::debug!(error = %e, "failed to restrict temp settings file");
        }
    }

    file.write_all(content.as_bytes())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let (settings, source) =
            Settings::from_layers(SettingsFile::default(), None, env_of(&[("QODO_API_KEY", "q")]))
                .unwrap();
        assert_eq!(source, ApiKeySource::Env("QODO_API_KEY"));
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.source_file_path, "{relativeFilePath}");
        assert_eq!(settings.test_file_path, "tests/test_{fileName}");
        assert_eq!(settings.code_coverage_report_path, "coverage.xml");
        assert_eq!(settings.coverage_type, "cobertura");
        assert_eq!(settings.desired_coverage, 100);
        assert_eq!(settings.max_iterations, 3);
        assert_eq!(settings.max_fix_attempts, 1);
    }

    #[test]
    fn test_api_key_env_fallback_deepseek_only() {
        let (settings, _) = Settings::from_layers(
            SettingsFile::default(),
            None,
            env_of(&[("DEEPSEEK_API_KEY", "ds-key")]),
        )
        .unwrap();
        assert_eq!(settings.api_key, "ds-key");
    }

    #[test]
    fn test_api_key_env_priority() {
        let env = env_of(&[("DEEPSEEK_API_KEY", "b"), ("OPENAI_API_KEY", "a")]);
        let (key, source) = resolve_api_key(None, None, env).unwrap();
        assert_eq!(key, "a");
        assert_eq!(source, ApiKeySource::Env("OPENAI_API_KEY"));
    }

    #[test]
    fn test_api_key_skips_empty_env_values() {
        let env = env_of(&[("OPENAI_API_KEY", ""), ("GROQ_API_KEY", "g")]);
        let (key, _) = resolve_api_key(None, None, env).unwrap();
        assert_eq!(key, "g");
    }

    #[test]
    fn test_api_key_explicit_then_keychain() {
        let env = env_of(&[("OPENAI_API_KEY", "env")]);
        let (key, source) = resolve_api_key(Some("explicit"), Some("stored"), &env).unwrap();
        assert_eq!((key.as_str(), source), ("explicit", ApiKeySource::Settings));
        let (key, source) = resolve_api_key(Some("  "), Some("stored"), &env).unwrap();
        assert_eq!((key.as_str(), source), ("stored", ApiKeySource::Keychain));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = Settings::from_layers(SettingsFile::default(), None, env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn test_desired_coverage_range_validated() {
        let file = SettingsFile {
            api_key: Some("k".to_string()),
            desired_coverage: Some(101),
            ..Default::default()
        };
        let err = Settings::from_layers(file, None, env_of(&[])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "desiredCoverage",
                ..
            }
        ));

        let file = SettingsFile {
            api_key: Some("k".to_string()),
            desired_coverage: Some(-1),
            ..Default::default()
        };
        assert!(Settings::from_layers(file, None, env_of(&[])).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_set() {
        let mut file = SettingsFile::default();
        file.set("maxIterations", "0").unwrap();
        assert!(matches!(
            file.validate(),
            Err(ConfigError::InvalidValue { key: "maxIterations", .. })
        ));
        file.set("maxIterations", "4").unwrap();
        assert!(file.validate().is_ok());
        assert!(matches!(
            file.set("desiredCoverage", "lots"),
            Err(ConfigError::InvalidValue { key: "desiredCoverage", .. })
        ));
    }

    #[test]
    fn test_setup_settings_use_workspace_layer_without_key() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("ws.json");
        fs::write(
            &workspace,
            r#"{"installRoot": "/opt/cover", "pythonPath": "python3.12", "packageSpec": "cover-agent==0.2.1"}"#,
        )
        .unwrap();

        let sources = ConfigSources {
            user_file: Some(dir.path().join("missing.json")),
            workspace_file: Some(workspace),
            use_keyring: false,
        };
        let settings = Settings::load_without_credential(&sources).unwrap();
        assert_eq!(settings.install_root, PathBuf::from("/opt/cover"));
        assert_eq!(settings.python_path, "python3.12");
        assert_eq!(settings.package_spec, "cover-agent==0.2.1");
    }

    #[test]
    fn test_workspace_overrides_user() {
        let dir = tempdir().unwrap();
        let user = dir.path().join("user.json");
        let workspace = dir.path().join("ws.json");
        fs::write(&user, r#"{"model": "user-model", "maxIterations": 7, "apiKey": "u"}"#).unwrap();
        fs::write(&workspace, r#"{"model": "ws-model", "somethingElse": true}"#).unwrap();

        let sources = ConfigSources {
            user_file: Some(user),
            workspace_file: Some(workspace),
            use_keyring: false,
        };
        let (settings, _) = Settings::load_with_env(&sources, |_| None).unwrap();
        assert_eq!(settings.model, "ws-model");
        assert_eq!(settings.max_iterations, 7);
        assert_eq!(settings.api_key, "u");
    }

    #[test]
    fn test_corrupt_settings_backed_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();

        let err = SettingsFile::read(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Corrupt { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
        let backups = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .contains(".corrupt-")
            })
            .count();
        assert_eq!(backups, 1);

        // Still reported on the next read rather than silently defaulted.
        assert!(matches!(
            SettingsFile::read(&path),
            Err(ConfigError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_wrong_type_names_key_and_keeps_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let content = r#"{"testCommand":"pytest -x {testFilePath}","desiredCoverage":85.5}"#;
        fs::write(&path, content).unwrap();

        for _ in 0..2 {
            match SettingsFile::read(&path) {
                Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "desiredCoverage"),
                other => panic!("expected invalid desiredCoverage, got {:?}", other),
            }
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), content);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        fs::write(&path, r#"{"testCommand":"pytest -x {testFilePath}","desiredCoverage":85}"#)
            .unwrap();
        let file = SettingsFile::read(&path).unwrap();
        assert_eq!(file.test_command.as_deref(), Some("pytest -x {testFilePath}"));
        assert_eq!(file.desired_coverage, Some(85));
    }

    #[test]
    fn test_non_object_settings_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            SettingsFile::read(&path),
            Err(ConfigError::InvalidValue { key: "settings", .. })
        ));
        assert!(path.exists());
    }

    #[test]
    fn test_set_and_write_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut file = SettingsFile::default();
        file.set("desiredCoverage", "80").unwrap();
        file.set("testCommand", "pytest {testFilePath}").unwrap();
        assert!(matches!(
            file.set("maxIterations", "many"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(file.set("bogus", "x"), Err(ConfigError::UnknownKey(_))));
        file.write(&path).unwrap();

        let read = SettingsFile::read(&path).unwrap();
        assert_eq!(read, file);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"desiredCoverage\": 80"));
    }
}
