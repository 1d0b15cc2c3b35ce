//! The stock task graph.

use std::sync::Arc;

use crate::tasks::{Assets, Bundle, Clean, Serve, Styles, Watch};
use crate::{Blueprint, Config, ConfigError, Remembered, parallel, series};

/// Task that marks a run as a development run.
pub const DEV: &str = "dev";

/// Task run when none is named.
pub const DEFAULT: &str = "default";

/// Registers every built-in task:
///
/// | task      | does                                            |
/// |-----------|-------------------------------------------------|
/// | `styles`  | incremental stylesheet                          |
/// | `webpack` | script bundle, watching in development          |
/// | `clean`   | removes the output directory                    |
/// | `assets`  | copies markup and static assets                 |
/// | `watch`   | re-runs `styles` / `assets` on source changes   |
/// | `build`   | `clean`, then `styles`, `assets`, `webpack`     |
/// | `server`  | dev server with live reload                     |
/// | `dev`     | `build`, then `watch` and `server`              |
/// | `default` | `dev`                                           |
pub fn standard(config: &Config) -> Result<Blueprint, ConfigError> {
    let remembered = Arc::new(Remembered::new());
    let mut blueprint = Blueprint::new();

    blueprint
        .task("styles")
        .run(Styles::new(config, remembered.clone()))?;
    blueprint
        .task("webpack")
        .continue_on_error(true)
        .run(Bundle::new(config))?;
    blueprint.task("clean").run(Clean::new(config))?;
    blueprint.task("assets").run(Assets::new(config))?;
    blueprint.task("watch").run(Watch::new(config, remembered))?;

    blueprint.compose(
        "build",
        series(["clean".into(), parallel(["styles", "assets", "webpack"])]),
    )?;
    blueprint.task("server").run(Serve::new(config))?;
    blueprint.compose(DEV, series(["build".into(), parallel(["watch", "server"])]))?;
    blueprint.compose(DEFAULT, DEV)?;

    Ok(blueprint)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn registers_every_task() {
        let blueprint = standard(&Config::default()).unwrap();
        for name in [
            "styles", "webpack", "clean", "assets", "watch", "build", "server", "dev", "default",
        ] {
            assert!(blueprint.contains(name), "{name} is missing");
        }
    }

    #[test]
    fn only_dev_targets_reach_dev() {
        let blueprint = standard(&Config::default()).unwrap();

        assert!(blueprint.reaches(DEFAULT, DEV));
        assert!(blueprint.reaches(DEV, DEV));
        assert!(!blueprint.reaches("build", DEV));
        assert!(!blueprint.reaches("styles", DEV));
    }

    #[test]
    fn graph_is_acyclic() {
        let runner = standard(&Config::default()).unwrap().finish().unwrap();
        assert_eq!(runner.tasks().count(), 9);
    }

    #[test]
    fn production_build_of_a_project_without_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            root: Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap(),
            bundler: String::from("tsumugi-missing-bundler"),
            ..Config::default()
        };

        let src = config.src_dir();
        fs::create_dir_all(src.join("styles")).unwrap();
        fs::write(src.join("styles/a.css"), ".a{color:red}").unwrap();
        fs::write(src.join("styles/b.css"), ".b{color:blue}").unwrap();
        fs::write(src.join("index.html"), "<html></html>").unwrap();

        fs::create_dir_all(config.dist_dir()).unwrap();
        fs::write(config.dist_dir().join("stale.txt"), "old").unwrap();

        let runner = standard(&config).unwrap().finish().unwrap();
        let session = runner.run("build").unwrap();
        assert!(session.is_idle());

        let dist = config.dist_dir();
        assert!(!dist.join("stale.txt").exists());
        assert!(dist.join("index.html").exists());

        let css = fs::read_to_string(config.styles_output()).unwrap();
        assert!(css.find(".a").unwrap() < css.find(".b").unwrap());

        let names: Vec<_> = session
            .diagnostics()
            .executions
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names[0], "clean");
        assert_eq!(names.len(), 4);
    }

    fn project(bundler: &str) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            root: Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap(),
            bundler: String::from(bundler),
            ..Config::default()
        };

        let src = config.src_dir();
        fs::create_dir_all(src.join("styles")).unwrap();
        fs::write(src.join("styles/a.css"), ".a{color:red}").unwrap();
        fs::write(src.join("index.html"), "<html></html>").unwrap();
        fs::write(src.join("main.js"), "exit 1\n").unwrap();

        (dir, config)
    }

    #[test]
    fn failing_bundler_does_not_stop_the_build() {
        let (_dir, config) = project("false");

        let runner = standard(&config).unwrap().finish().unwrap();
        let session = runner.run("build").unwrap();
        assert!(session.is_idle());

        assert!(config.styles_output().exists());
        assert!(config.dist_dir().join("index.html").exists());
    }

    #[test]
    fn missing_bundler_does_not_stop_the_build() {
        let (_dir, config) = project("tsumugi-missing-bundler");

        let runner = standard(&config).unwrap().finish().unwrap();
        runner.run("build").unwrap();

        assert!(config.styles_output().exists());
        assert!(config.dist_dir().join("index.html").exists());
    }

    #[test]
    fn failed_clean_stops_the_build() {
        let (_dir, config) = project("tsumugi-missing-bundler");
        // A regular file where the output directory should be.
        fs::write(config.dist_dir(), "not a directory").unwrap();

        let runner = standard(&config).unwrap().finish().unwrap();
        let err = runner.run("build").unwrap_err();
        assert_eq!(err.task(), "clean");

        for task in ["styles", "assets", "webpack"] {
            assert_eq!(runner.last_run(task), None, "{task} ran");
        }
        assert!(config.dist_dir().is_file());
        assert!(!config.styles_output().exists());
    }
}
