use std::path::{Path, PathBuf};

const BASE_DIR_ENV: &str = "OVERLAY_TRANSLATOR_DIR";
const BASE_DIR_NAME: &str = ".overlay-translator";

/// Directory holding user settings. `OVERLAY_TRANSLATOR_DIR` wins over `$HOME`.
pub(crate) fn settings_dir() -> Option<PathBuf> {
    if let Some(dir) = base_dir_override() {
        return Some(dir);
    }
    home_join(BASE_DIR_NAME)
}

pub(crate) fn debug_dir() -> PathBuf {
    if let Some(dir) = base_dir_override() {
        return dir.join(".cache/debug_images");
    }
    home_join(".overlay-translator/.cache/debug_images")
        .unwrap_or_else(|| PathBuf::from("debug_images"))
}

/// Expands `~` and drops redundant separators.
pub(crate) fn normalize_dir(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_tilde(trimmed);
    Some(normalize_path(PathBuf::from(expanded)))
}

fn base_dir_override() -> Option<PathBuf> {
    std::env::var(BASE_DIR_ENV)
        .ok()
        .and_then(|value| normalize_dir(&value))
}

fn home_join(suffix: &str) -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(suffix))
        }
    })
}

fn normalize_path(path: PathBuf) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        normalized.push(component.as_os_str());
    }
    normalized
}

fn expand_tilde(value: &str) -> String {
    if (value == "~" || value.starts_with("~/"))
        && let Ok(home) = std::env::var("HOME")
    {
        let home = home.trim();
        if home.is_empty() {
            return value.to_string();
        }
        if value == "~" {
            return home.to_string();
        }
        return format!("{}{}", home, &value[1..]);
    }
    value.to_string()
}
