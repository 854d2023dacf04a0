use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{DATA_FILE_NAME, REMOTE_DATA_URL};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum PotentialSource {
    /// Loads a potential volume from a local `.npy` file
    Local { path: String },

    /// Fetches `url + file_name` into `cache_dir` once, then loads it from there.
    /// An existing cached file is reused unless `overwrite` is set.
    Remote {
        #[serde(default = "default_url")]
        url: String,
        #[serde(default = "default_file_name")]
        file_name: String,
        #[serde(default = "default_cache_dir")]
        cache_dir: String,
        #[serde(default)]
        overwrite: bool,
    },
}

impl Default for PotentialSource {
    fn default() -> Self {
        PotentialSource::Local {
            path: format!("data/{DATA_FILE_NAME}"),
        }
    }
}

impl PotentialSource {
    /// The path the volume is read from once any fetch has completed
    pub fn local_path(&self) -> PathBuf {
        match self {
            PotentialSource::Local { path } => PathBuf::from(path),
            PotentialSource::Remote {
                file_name,
                cache_dir,
                ..
            } => PathBuf::from(cache_dir).join(file_name),
        }
    }

    /// Full url of a remote source
    pub fn remote_url(&self) -> Option<String> {
        match self {
            PotentialSource::Local { .. } => None,
            PotentialSource::Remote { url, file_name, .. } => Some(format!("{url}{file_name}")),
        }
    }
}

fn default_url() -> String {
    REMOTE_DATA_URL.to_string()
}

fn default_file_name() -> String {
    DATA_FILE_NAME.to_string()
}

fn default_cache_dir() -> String {
    "data".to_string()
}

#[test]
fn test_remote_source_paths() {
    let source = PotentialSource::Remote {
        url: default_url(),
        file_name: default_file_name(),
        cache_dir: "cache".to_string(),
        overwrite: false,
    };
    assert_eq!(
        source.local_path(),
        PathBuf::from("cache").join(DATA_FILE_NAME)
    );
    assert_eq!(
        source.remote_url().unwrap(),
        format!("{REMOTE_DATA_URL}{DATA_FILE_NAME}")
    );
}

#[test]
fn test_default_source_is_local() {
    let source = PotentialSource::default();
    assert!(source.remote_url().is_none());
    assert_eq!(
        source.local_path(),
        PathBuf::from(format!("data/{DATA_FILE_NAME}"))
    );
}
