pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::{Cli, Commands};
use crate::error::ConfigError;
use anyhow::Context;
use std::path::{Path, PathBuf};

/// Name of the config file looked up in the global and output directories.
pub const CONFIG_FILE: &str = "armory.toml";

/// Load configuration by merging global, output-dir, explicit and CLI sources.
/// Precedence: CLI > `--config` file > output-dir config > global config > defaults.
///
/// Missing implicit config files are handled gracefully (defaults apply). An
/// explicit `--config` file must exist and parse.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config (~/.config/armory/armory.toml or platform equivalent)
    load_config_layers(cli, load_global_config())
}

fn load_config_layers(cli: &Cli, global: PartialConfig) -> anyhow::Result<AppConfig> {
    // Layer 3 is needed early: it may relocate the output directory.
    let explicit = match cli_config_path(cli) {
        Some(path) => load_explicit_config(path)?,
        None => PartialConfig::default(),
    };

    let cli_partial = cli_to_partial(cli);
    let output_dir = cli_partial
        .output_dir
        .clone()
        .or_else(|| explicit.output_dir.clone())
        .or_else(|| global.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("./armory-run"));

    // Layer 2: Output-dir config (output_dir/armory.toml)
    let workspace = load_toml_file(&output_dir.join(CONFIG_FILE)).unwrap_or_default();

    let config = cli_partial
        .with_fallback(explicit)
        .with_fallback(workspace)
        .with_fallback(global)
        .finalize();
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

/// Parse the contents of an armory.toml into a merge layer.
pub fn parse_config_str(contents: &str) -> Result<PartialConfig, toml::de::Error> {
    toml::from_str::<ConfigFile>(contents).map(ConfigFile::to_partial)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(p) => load_toml_file(&p).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

fn load_explicit_config(path: &Path) -> Result<PartialConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let partial = parse_config_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(partial)
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found; parse errors are logged and skipped.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match parse_config_str(&contents) {
            Ok(partial) => {
                tracing::info!("Loaded config from {}", path.display());
                Some(partial)
            }
            Err(e) => {
                tracing::warn!("Config parse error in {}: {}", path.display(), e);
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Failed to read config at {}: {}", path.display(), e);
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/armory/armory.toml
/// macOS: ~/Library/Application Support/armory/armory.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "armory").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

fn cli_config_path(cli: &Cli) -> Option<&Path> {
    match &cli.command {
        Commands::Run { config, .. } | Commands::Resume { config, .. } => config.as_deref(),
        Commands::Export { .. } | Commands::Inspect { .. } => None,
    }
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    match &cli.command {
        Commands::Run {
            model,
            output_dir,
            iterations,
            seed,
            top_k,
            theta,
            instances,
            config: _,
        } => PartialConfig {
            model: model.clone(),
            output_dir: output_dir.clone(),
            max_iterations: *iterations,
            seed: *seed,
            top_k: *top_k,
            theta: *theta,
            instances: instances.clone(),
            ..Default::default()
        },
        Commands::Resume {
            output_dir,
            iterations,
            instances,
            config: _,
        } => PartialConfig {
            output_dir: output_dir.clone(),
            max_iterations: *iterations,
            instances: instances.clone(),
            ..Default::default()
        },
        Commands::Export { output_dir, .. } | Commands::Inspect { output_dir } => PartialConfig {
            output_dir: output_dir.clone(),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::StopRule;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn parses_every_section() {
        let partial = parse_config_str(
            r#"
            [general]
            model = "qwen2.5:7b"
            seed = 42
            instances = "swe.jsonl"

            [loop]
            max_iterations = 8
            stop_rule = "convergence"
            convergence_patience = 2

            [growth]
            theta = 0.5

            [selection]
            top_k = 2
            exploration_c = 1.4

            [warmup]
            retry_budget = 1

            [execution]
            workers = 8
            cost_limit = 2.5
            harness_command = "./grade.sh"

            [credit]
            judge_concurrency = 16

            [retry]
            max_attempts = 5
            "#,
        )
        .expect("valid toml");

        assert_eq!(partial.model.as_deref(), Some("qwen2.5:7b"));
        assert_eq!(partial.seed, Some(42));
        assert_eq!(partial.instances, Some(PathBuf::from("swe.jsonl")));
        assert_eq!(partial.stop_rule, Some(StopRule::Convergence));
        assert_eq!(partial.convergence_patience, Some(2));
        assert_eq!(partial.theta, Some(0.5));
        assert_eq!(partial.exploration_c, Some(1.4));
        assert_eq!(partial.retry_budget, Some(1));
        assert_eq!(partial.cost_limit, Some(2.5));
        assert_eq!(partial.harness_command.as_deref(), Some("./grade.sh"));
        assert_eq!(partial.judge_concurrency, Some(16));
        assert_eq!(partial.max_attempts, Some(5));
        assert_eq!(partial.batch_size, None);
    }

    #[test]
    fn rejects_unknown_stop_rule_and_sections() {
        assert!(parse_config_str("[loop]\nstop_rule = \"whenever\"").is_err());
        assert!(parse_config_str("[safety]\nshell_timeout_secs = 3").is_err());
    }

    #[test]
    fn cli_overrides_output_dir_config() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "[selection]\ntop_k = 2\n[growth]\ntheta = 0.25\n",
        )
        .unwrap();

        let out = tmp.path().to_str().unwrap();
        let cli = Cli::parse_from(["armory", "run", "--output-dir", out, "--top-k", "4"]);
        let config = load_config_layers(&cli, PartialConfig::default()).expect("config loads");

        assert_eq!(config.output_dir, tmp.path());
        assert_eq!(config.top_k, 4);
        assert_eq!(config.theta, 0.25);
    }

    #[test]
    fn global_layer_fills_gaps_below_output_dir_config() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join(CONFIG_FILE), "[growth]\ntheta = 0.25\n").unwrap();
        let global = parse_config_str("[growth]\ntheta = 3.0\n[selection]\ntop_k = 6\n").unwrap();

        let out = tmp.path().to_str().unwrap();
        let cli = Cli::parse_from(["armory", "run", "--output-dir", out]);
        let config = load_config_layers(&cli, global).expect("config loads");

        assert_eq!(config.theta, 0.25);
        assert_eq!(config.top_k, 6);
    }

    #[test]
    fn explicit_config_must_exist() {
        let tmp = TempDir::new().expect("tempdir");
        let missing = tmp.path().join("nope.toml");
        let cli = Cli::parse_from([
            "armory",
            "run",
            "--output-dir",
            tmp.path().to_str().unwrap(),
            "--config",
            missing.to_str().unwrap(),
        ]);
        assert!(load_config_layers(&cli, PartialConfig::default()).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let cli = Cli::parse_from([
            "armory",
            "run",
            "--output-dir",
            tmp.path().to_str().unwrap(),
            "--theta=-2",
        ]);
        assert!(load_config_layers(&cli, PartialConfig::default()).is_err());
    }
}
