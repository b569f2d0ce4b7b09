use directories::ProjectDirs;
use std::path::PathBuf;

const SETTINGS_FILE: &str = "settings.json";
const RULES_DIR: &str = "rules";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "sieve-filter")
}

pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().to_path_buf())
}

pub fn settings_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(SETTINGS_FILE))
}

/// Where `FileRuleStore` keeps scripts unless the settings name a directory.
pub fn default_rules_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join(RULES_DIR))
}
