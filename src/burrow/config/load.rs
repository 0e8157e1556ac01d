use std::borrow::Cow;
use std::env;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::burrow::common::{Error, Result};
use crate::burrow::config::config::Settings;

/// Load configuration settings from burrow.yaml
/// Searching in order:
/// 1) the path given with -c/--config
/// 2) Current directory
/// 3) Any parent directory of the current directory, up to root
/// 4) ~/.config/burrow/
/// 5) ~/
/// 6) /etc/burrow/
///
/// This replaces ${ENV_VAR[:DEFAULT]} parameters in the yaml file with values
/// from the environment variable, if set, otherwise with the given default.
pub fn load_config(path: Option<PathBuf>) -> Result<&'static Settings> {
    let config_path = match path {
        Some(p) => p,
        None => find_config_file("burrow.yaml")?,
    };
    info!(config_path = %config_path.to_string_lossy().into_owned(), "found config file");
    let raw_yaml = std::fs::read_to_string(&config_path)?;
    let yaml_text = replace_env_vars(&raw_yaml)?;

    let mut config: Settings = serde_yaml::from_str(&yaml_text)?;
    config.load(config_path)?;
    Ok(Box::leak(Box::new(config)))
}

fn find_config_file(config_name: &str) -> Result<PathBuf> {
    // Check the current directory or any of its parents for config_name
    if let Ok(start) = env::current_dir() {
        let mut dir = start.as_path();
        while !dir.as_os_str().is_empty() {
            debug!("checking for config file in {}", dir.to_string_lossy());
            let fp = Path::join(dir, config_name);
            if fp.exists() {
                return Ok(fp);
            }
            if let Some(parent) = dir.parent() {
                dir = parent;
            } else {
                break;
            }
        }
    }

    // Check ~/.config/burrow/{config_name}
    // HOME is required to be set on POSIX systems, but if it's not set we'll try ~/
    let home = env::var("HOME").unwrap_or_else(|_| "~/".to_string());
    let mut conf_path = Path::join(Path::new(&home), Path::join(Path::new(".config/burrow"), config_name));
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    // Check ~/.{config_name}
    conf_path = Path::join(Path::new(&home), ".".to_string() + config_name);
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    // Check /etc/burrow/{config_name}
    conf_path = Path::join(Path::new("/etc/burrow"), config_name);
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    Err(Error::new(format!("config file {} not found", config_name)))
}

fn replace_env_vars(raw_yaml: &str) -> Result<Cow<str>> {
    // We only call this function once and then never again, so don't keep the regex
    let re_var = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)(?::([^}]*))?\}").unwrap();

    let mut errors = Vec::<String>::new();

    let replaced_text = re_var.replace_all(raw_yaml, |caps: &Captures| {
        match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = caps.get(2) {
                    default.as_str().to_string()
                } else {
                    errors.push(format!(
                        "environment variable {} is required but not defined",
                        &caps[1]
                    ));
                    "".to_string()
                }
            }
        }
    });

    if errors.is_empty() {
        Ok(replaced_text)
    } else {
        Err(Error::new(errors.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_env_vars() {
        env::set_var("BURROW_TEST_KEY", "hunter2");
        let replaced = replace_env_vars("key: ${BURROW_TEST_KEY}\nport: ${BURROW_TEST_MISSING:4194}\n").unwrap();
        assert_eq!(replaced, "key: hunter2\nport: 4194\n");
    }

    #[test]
    fn test_replace_env_vars_missing_required() {
        assert!(replace_env_vars("key: ${BURROW_TEST_UNDEFINED_VAR}\n").is_err());
    }
}
