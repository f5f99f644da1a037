use crate::config::Settings;
use crate::error::{PtmError, Result};
use crate::http;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::fs;
use tracing::{info, warn};

/// One entry of the remote theme catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub preview_url: Option<String>,
    pub download_url: Option<String>,
}

// Older catalogs call the archive link `theme_url`, newer ones `download_url`.
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    theme_url: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<RawDescriptor> for ThemeDescriptor {
    fn from(raw: RawDescriptor) -> Self {
        Self {
            name: raw.name.trim().to_string(),
            description: non_empty(raw.description),
            preview_url: non_empty(raw.preview_url),
            download_url: non_empty(raw.download_url).or_else(|| non_empty(raw.theme_url)),
        }
    }
}

pub fn parse_catalog(text: &str) -> Result<Vec<ThemeDescriptor>> {
    let raw: Vec<RawDescriptor> = serde_json::from_str(text)?;

    let themes = raw
        .into_iter()
        .map(ThemeDescriptor::from)
        .filter(|theme| {
            if theme.name.is_empty() {
                warn!("Skipping catalog entry without a name");
                false
            } else {
                true
            }
        })
        .collect();

    Ok(themes)
}

/// Downloads the catalog and refreshes the local cache. When the download
/// fails the cached copy is used instead.
pub fn fetch_catalog(settings: &Settings, client: &Client) -> Result<Vec<ThemeDescriptor>> {
    let cache = settings.catalog_cache();

    let fetched = http::get_bytes(client, &settings.catalog_url).and_then(|body| {
        let text = String::from_utf8_lossy(&body).into_owned();
        parse_catalog(&text).map(|themes| (text, themes))
    });

    // A malformed download never replaces a good cache.
    match fetched {
        Ok((text, themes)) => {
            if let Err(e) = fs::create_dir_all(&settings.config_dir)
                .and_then(|_| fs::write(&cache, text.as_bytes()))
            {
                warn!(path = %cache.display(), error = %e, "Could not write catalog cache");
            }

            info!(count = themes.len(), "Fetched theme catalog");
            Ok(themes)
        }
        Err(fetch_err) => {
            warn!(error = %fetch_err, "Catalog download failed, using cached copy");
            load_cached(settings).map_err(|cache_err| {
                PtmError::CatalogUnavailable(format!("{}; cache: {}", fetch_err, cache_err))
            })
        }
    }
}

pub fn load_cached(settings: &Settings) -> Result<Vec<ThemeDescriptor>> {
    let text = fs::read_to_string(settings.catalog_cache())?;
    parse_catalog(&text)
}
