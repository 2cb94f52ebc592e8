use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_TILE_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const DEFAULT_ATTRIBUTION: &str = "© OpenStreetMap contributors";
const DEFAULT_SUBDOMAINS: &str = "abc";

/// Option keys copied from the top level of a configuration object.
pub const PASSTHROUGH_KEYS: [&str; 12] = [
    "attribution",
    "maxZoom",
    "minZoom",
    "noWrap",
    "tms",
    "subdomains",
    "detectRetina",
    "tileSize",
    "zoomOffset",
    "bounds",
    "updateWhenIdle",
    "updateWhenZooming",
];

#[derive(Debug, Error)]
pub enum BasemapError {
    #[error("Map config must be an object or a tile URL.")]
    NotConfig,
    #[error("The map config is missing a tileUrl property.")]
    MissingTileUrl,
    #[error("Tile URL must include {{z}}, {{x}}, and {{y}} placeholders.")]
    InvalidTemplate,
    #[error("Map config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasemapConfig {
    pub name: String,
    pub tile_url: String,
    pub options: Map<String, Value>,
}

fn default_options() -> Map<String, Value> {
    let mut options = Map::new();
    options.insert(String::from("maxZoom"), Value::from(18));
    options.insert(String::from("attribution"), Value::from(DEFAULT_ATTRIBUTION));
    options
}

impl Default for BasemapConfig {
    fn default() -> Self {
        Self {
            name: String::from("OpenStreetMap"),
            tile_url: DEFAULT_TILE_URL.to_string(),
            options: default_options(),
        }
    }
}

impl BasemapConfig {
    /// Accepts a JSON object, a JSON string, or a bare tile URL.
    pub fn parse(raw: &str) -> Result<Self, BasemapError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BasemapError::NotConfig);
        }
        if trimmed.starts_with('{') || trimmed.starts_with('"') || trimmed.starts_with('[') {
            let value: Value = serde_json::from_str(trimmed)?;
            return Self::from_value(&value);
        }
        Self::from_value(&Value::from(trimmed))
    }

    pub fn from_value(value: &Value) -> Result<Self, BasemapError> {
        let object = match value {
            Value::String(url) => {
                let mut object = Map::new();
                object.insert(String::from("tileUrl"), Value::from(url.as_str()));
                object
            }
            Value::Object(object) => object.clone(),
            _ => return Err(BasemapError::NotConfig),
        };

        let tile_url = ["tileUrl", "url"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(BasemapError::MissingTileUrl)?
            .to_string();
        if !is_valid_template(&tile_url) {
            return Err(BasemapError::InvalidTemplate);
        }

        let mut options = default_options();
        if let Some(Value::Object(extra)) = object.get("options") {
            options.extend(extra.clone());
        }
        for key in PASSTHROUGH_KEYS {
            if let Some(value) = object.get(key) {
                options.insert(key.to_string(), value.clone());
            }
        }

        let name = object
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("Custom map")
            .to_string();

        Ok(Self {
            name,
            tile_url,
            options,
        })
    }

    pub fn max_zoom(&self) -> u32 {
        self.options
            .get("maxZoom")
            .and_then(Value::as_u64)
            .map(|zoom| zoom.min(22) as u32)
            .unwrap_or(18)
    }

    pub fn attribution(&self) -> Option<&str> {
        self.options.get("attribution").and_then(Value::as_str)
    }

    fn subdomains(&self) -> Vec<String> {
        match self.options.get("subdomains") {
            Some(Value::String(chars)) if !chars.is_empty() => {
                chars.chars().map(String::from).collect()
            }
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => DEFAULT_SUBDOMAINS.chars().map(String::from).collect(),
        }
    }

    /// Expands the template for one tile; `{s}` rotates through the
    /// configured subdomains.
    pub fn tile_url(&self, z: u32, x: u32, y: u32) -> String {
        let subdomains = self.subdomains();
        let subdomain = &subdomains[(x as usize + y as usize) % subdomains.len()];
        let mut url = self.tile_url.clone();
        for (placeholder, value) in [
            ("z", z.to_string()),
            ("x", x.to_string()),
            ("y", y.to_string()),
            ("s", subdomain.clone()),
        ] {
            url = url
                .replace(&format!("{{{placeholder}}}"), &value)
                .replace(&format!("{{{}}}", placeholder.to_uppercase()), &value);
        }
        url
    }
}

/// `{z}`, `{x}` and `{y}` must all appear, case-insensitively.
pub fn is_valid_template(url: &str) -> bool {
    let lower = url.to_lowercase();
    ["{z}", "{x}", "{y}"].iter().all(|placeholder| lower.contains(placeholder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_url_and_json_string() {
        let bare = BasemapConfig::parse("https://tiles.example/{z}/{x}/{y}.png").unwrap();
        assert_eq!(bare.name, "Custom map");
        assert_eq!(bare.max_zoom(), 18);
        let quoted = BasemapConfig::parse("\"https://tiles.example/{Z}/{X}/{Y}.png\"").unwrap();
        assert_eq!(quoted.tile_url(3, 1, 2), "https://tiles.example/3/1/2.png");
    }

    #[test]
    fn object_merges_options_and_passthrough() {
        let config = BasemapConfig::parse(
            r#"{"name":" Topo ","url":"https://{s}.topo/{z}/{x}/{y}","options":{"maxZoom":12,"foo":1},"attribution":"Topo","subdomains":["p","q"],"ignored":true}"#,
        )
        .unwrap();
        assert_eq!(config.name, "Topo");
        assert_eq!(config.max_zoom(), 12);
        assert_eq!(config.attribution(), Some("Topo"));
        assert!(config.options.contains_key("foo"));
        assert!(!config.options.contains_key("ignored"));
        assert_eq!(config.tile_url(1, 0, 1), "https://q.topo/1/0/1");
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(matches!(
            BasemapConfig::parse("https://tiles.example/{z}/{x}.png"),
            Err(BasemapError::InvalidTemplate)
        ));
        assert!(matches!(
            BasemapConfig::parse(r#"{"name":"x"}"#),
            Err(BasemapError::MissingTileUrl)
        ));
        assert!(matches!(BasemapConfig::parse("[1,2]"), Err(BasemapError::NotConfig)));
        assert!(matches!(BasemapConfig::parse("{oops"), Err(BasemapError::Json(_))));
    }

    #[test]
    fn default_is_openstreetmap() {
        let config = BasemapConfig::default();
        assert_eq!(config.tile_url(2, 1, 1), "https://c.tile.openstreetmap.org/2/1/1.png");
    }
}
