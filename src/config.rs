use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the configuration file looked up in the working directory when no
/// explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tsumugi.json";

/// Immutable settings shared by every task in the graph.
///
/// The value is decided once, before the graph is built, and then handed to
/// each task constructor. Tasks never observe it changing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project root, every other path is relative to it.
    pub root: Utf8PathBuf,
    /// Source directory.
    pub src: Utf8PathBuf,
    /// Output directory.
    pub dist: Utf8PathBuf,
    /// Port of the development HTTP server.
    pub port: u16,
    /// Preferred port of the live-reload WebSocket.
    pub reload_port: u16,
    /// Bundler executable used for scripts.
    pub bundler: String,
    /// Development mode: watching, source maps, lenient script errors.
    #[serde(skip)]
    pub development: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            src: Utf8PathBuf::from("src"),
            dist: Utf8PathBuf::from("dist"),
            port: 3000,
            reload_port: 1337,
            bundler: String::from("esbuild"),
            development: false,
        }
    }
}

impl Config {
    /// Loads the configuration from `path`, or from [`DEFAULT_CONFIG_FILE`]
    /// if it exists. A missing default file yields the defaults, a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Utf8PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Read(path, e)),
        };

        tracing::debug!("loaded configuration from {path}");
        Self::from_json(&text).map_err(|e| ConfigError::Parse(path, e))
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn with_development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }

    pub fn src_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.src)
    }

    pub fn dist_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.dist)
    }

    pub fn styles_glob(&self) -> String {
        self.src_dir().join("styles/**/*.css").into_string()
    }

    pub fn scripts_glob(&self) -> String {
        self.src_dir().join("*.js").into_string()
    }

    pub fn markup_glob(&self) -> String {
        self.src_dir().join("**/*.html").into_string()
    }

    pub fn assets_glob(&self) -> String {
        self.src_dir().join("assets/**/*.*").into_string()
    }

    /// The single concatenated stylesheet.
    pub fn styles_output(&self) -> Utf8PathBuf {
        self.dist_dir().join("styles/main.css")
    }

    /// Globs whose changes trigger a browser reload.
    pub fn reload_globs(&self) -> Vec<String> {
        vec![
            self.dist_dir().join("**/*.*").into_string(),
            self.root.join("index.html").into_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_json(r#"{ "dist": "public", "port": 8080 }"#).unwrap();

        assert_eq!(config.dist, "public");
        assert_eq!(config.port, 8080);
        assert_eq!(config.src, "src");
        assert_eq!(config.bundler, "esbuild");
        assert!(!config.development);
    }

    #[test]
    fn development_is_not_read_from_file() {
        let config = Config::from_json(r#"{ "development": true }"#).unwrap();
        assert!(!config.development);
        assert!(config.with_development(true).development);
    }

    #[test]
    fn paths_are_rooted() {
        let config = Config {
            root: Utf8PathBuf::from("/project"),
            ..Config::default()
        };

        assert_eq!(config.styles_glob(), "/project/src/styles/**/*.css");
        assert_eq!(config.scripts_glob(), "/project/src/*.js");
        assert_eq!(config.markup_glob(), "/project/src/**/*.html");
        assert_eq!(config.assets_glob(), "/project/src/assets/**/*.*");
        assert_eq!(config.styles_output(), "/project/dist/styles/main.css");
        assert_eq!(
            config.reload_globs(),
            vec!["/project/dist/**/*.*", "/project/index.html"]
        );
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Utf8Path::new("/nonexistent/tsumugi.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read(..)));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("tsumugi.json")).unwrap();
        fs::write(&path, "{ port: ").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }
}
