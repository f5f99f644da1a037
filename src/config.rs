use std::path::PathBuf;
use tracing::warn;

pub const APP_DIR_NAME: &str = "plymouth-theme-manager";

pub const DEFAULT_CATALOG_URL: &str = "https://raw.githubusercontent.com/SoulInfernoDE/plymouth-theme-manager/refs/heads/main/plymouth_theme_manager/themes.json";

pub const DEFAULT_THEMES_DIR: &str = "/usr/share/plymouth/themes";

pub const DEFAULT_PREVIEW_HEIGHT: u32 = 150;

/// How privileged commands get their root rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    Pkexec,
    Sudo,
    None,
}

impl Elevation {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pkexec" => Some(Self::Pkexec),
            "sudo" => Some(Self::Sudo),
            "none" | "" => Some(Self::None),
            _ => None,
        }
    }

    pub fn program(self) -> Option<&'static str> {
        match self {
            Self::Pkexec => Some("pkexec"),
            Self::Sudo => Some("sudo"),
            Self::None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub catalog_url: String,
    pub config_dir: PathBuf,
    pub themes_dir: PathBuf,
    pub preview_height: u32,
    pub elevation: Elevation,
}

/// `$XDG_CONFIG_HOME` (or `~/.config`) plus the app directory. Without a home
/// directory the per-user temp dir is used, which is not persistent.
fn default_config_dir(config: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    let base = match (config, home) {
        (Some(config), _) => config,
        (None, Some(home)) => home.join(".config"),
        (None, None) => {
            let temp = std::env::temp_dir();
            warn!(dir = %temp.display(), "No config or home directory, using temp dir");
            temp
        }
    };
    base.join(APP_DIR_NAME)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            config_dir: default_config_dir(dirs::config_dir(), dirs::home_dir()),
            themes_dir: PathBuf::from(DEFAULT_THEMES_DIR),
            preview_height: DEFAULT_PREVIEW_HEIGHT,
            elevation: Elevation::Pkexec,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from `PTM_*` variables, keeping defaults for anything
    /// unset or unparsable.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(url) = lookup("PTM_CATALOG_URL").filter(|v| !v.trim().is_empty()) {
            settings.catalog_url = url.trim().to_string();
        }

        if let Some(dir) = lookup("PTM_CONFIG_DIR").filter(|v| !v.trim().is_empty()) {
            settings.config_dir = PathBuf::from(dir);
        }

        if let Some(dir) = lookup("PTM_THEMES_DIR").filter(|v| !v.trim().is_empty()) {
            settings.themes_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup("PTM_PREVIEW_HEIGHT") {
            match raw.trim().parse::<u32>() {
                Ok(height) if (16..=1024).contains(&height) => settings.preview_height = height,
                _ => warn!(value = %raw, "Ignoring invalid PTM_PREVIEW_HEIGHT"),
            }
        }

        if let Some(raw) = lookup("PTM_ELEVATE") {
            match Elevation::parse(&raw) {
                Some(elevation) => settings.elevation = elevation,
                None => warn!(value = %raw, "Ignoring unknown PTM_ELEVATE"),
            }
        }

        settings
    }

    pub fn catalog_cache(&self) -> PathBuf {
        self.config_dir.join("themes.json")
    }

    pub fn store_file(&self) -> PathBuf {
        self.config_dir.join("installed.json")
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.config_dir.join("converted")
    }

    pub fn alternatives_link(&self) -> PathBuf {
        self.themes_dir.join("default.plymouth")
    }

    pub fn theme_dir(&self, name: &str) -> PathBuf {
        self.themes_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let settings = Settings::from_lookup(|_| None);
        assert_eq!(settings.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(settings.themes_dir, PathBuf::from(DEFAULT_THEMES_DIR));
        assert_eq!(settings.preview_height, DEFAULT_PREVIEW_HEIGHT);
        assert_eq!(settings.elevation, Elevation::Pkexec);
        assert!(settings.config_dir.ends_with(APP_DIR_NAME));
    }

    #[test]
    fn env_overrides_apply() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("PTM_CATALOG_URL", "http://localhost/themes.json"),
            ("PTM_CONFIG_DIR", "/var/tmp/ptm"),
            ("PTM_THEMES_DIR", "/opt/themes"),
            ("PTM_PREVIEW_HEIGHT", "200"),
            ("PTM_ELEVATE", "none"),
        ]));

        assert_eq!(settings.catalog_url, "http://localhost/themes.json");
        assert_eq!(settings.store_file(), PathBuf::from("/var/tmp/ptm/installed.json"));
        assert_eq!(settings.converted_dir(), PathBuf::from("/var/tmp/ptm/converted"));
        assert_eq!(settings.theme_dir("spinner"), PathBuf::from("/opt/themes/spinner"));
        assert_eq!(
            settings.alternatives_link(),
            PathBuf::from("/opt/themes/default.plymouth")
        );
        assert_eq!(settings.preview_height, 200);
        assert_eq!(settings.elevation, Elevation::None);
    }

    #[test]
    fn invalid_overrides_keep_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("PTM_PREVIEW_HEIGHT", "huge"),
            ("PTM_ELEVATE", "doas-maybe"),
        ]));

        assert_eq!(settings.preview_height, DEFAULT_PREVIEW_HEIGHT);
        assert_eq!(settings.elevation, Elevation::Pkexec);
    }

    #[test]
    fn config_dir_falls_back_to_home_then_temp() {
        assert_eq!(
            default_config_dir(Some("/xdg".into()), Some("/home/me".into())),
            PathBuf::from("/xdg").join(APP_DIR_NAME)
        );
        assert_eq!(
            default_config_dir(None, Some("/home/me".into())),
            PathBuf::from("/home/me/.config").join(APP_DIR_NAME)
        );

        let fallback = default_config_dir(None, None);
        assert_eq!(fallback, std::env::temp_dir().join(APP_DIR_NAME));
    }

    #[test]
    fn elevation_programs() {
        assert_eq!(Elevation::parse("SUDO"), Some(Elevation::Sudo));
        assert_eq!(Elevation::Sudo.program(), Some("sudo"));
        assert_eq!(Elevation::None.program(), None);
    }
}
