use std::path::{Path, PathBuf};

use akari_resources::ResourcesConfig;

/// An explicit directory wins over the config file, which wins over the default
pub fn metadata_dir(
    explicit: Option<PathBuf>,
    config_file: Option<&Path>,
) -> Result<PathBuf, anyhow::Error> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }

    let config = match config_file {
        Some(file) => ResourcesConfig::from_file(file)
            .map_err(|err| anyhow::anyhow!("Failed to read config {:?}: {}", file, err))?,
        None => ResourcesConfig::default(),
    };

    Ok(config.metadata_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("resources.yaml");
        std::fs::write(&config, "metadata_dir: from_config\n").unwrap();

        assert_eq!(
            metadata_dir(Some("explicit".into()), Some(&config)).unwrap(),
            PathBuf::from("explicit")
        );
        assert_eq!(
            metadata_dir(None, Some(&config)).unwrap(),
            PathBuf::from("from_config")
        );
        assert_eq!(metadata_dir(None, None).unwrap(), PathBuf::from("metadata"));
        assert!(metadata_dir(None, Some(&dir.path().join("missing.yaml"))).is_err());
    }
}
