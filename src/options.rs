//! Request options and their normalization
//!
//! [`RenderOptions`] is the loosely typed request as it arrives (JSON with
//! camelCase keys, numbers possibly sent as strings). [`RenderOptions::normalize`]
//! applies the default table and produces [`MapOptions`], which is what the
//! template and the capture step consume.

use crate::{Error, Result, Viewport};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;
pub const DEFAULT_MAX_ZOOM: u32 = 17;
pub const DEFAULT_VECTOR_MAX_ZOOM: u32 = 20;
pub const DEFAULT_QUALITY: u8 = 100;
pub const DEFAULT_ATTRIBUTION: &str = "osm-static-maps | © OpenStreetMap contributors";
pub const DEFAULT_TILESERVER_URL: &str = "http://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const DEFAULT_VECTORSERVER_TOKEN: &str = "no-token";

/// Raster format of the captured screenshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            other => Err(Error::InvalidOptions(format!("unsupported image type '{}'", other))),
        }
    }
}

/// Which re-encoding step runs after the screenshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostProcess {
    /// Return the screenshot bytes untouched
    #[default]
    None,
    /// Re-encode inside this process (`imagemin` flag)
    InProcess,
    /// Pipe through the external encoder executable (`oxipng` flag)
    External,
}

/// Render request as received from a caller
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    pub geojson: Option<Value>,
    #[serde(deserialize_with = "lenient_number")]
    pub height: Option<i64>,
    #[serde(deserialize_with = "lenient_number")]
    pub width: Option<i64>,
    pub center: Option<Value>,
    pub zoom: Option<Value>,
    #[serde(deserialize_with = "lenient_number")]
    pub max_zoom: Option<i64>,
    pub attribution: Option<String>,
    pub tileserver_url: Option<String>,
    pub vectorserver_url: Option<String>,
    pub vectorserver_token: Option<String>,
    #[serde(rename = "type")]
    pub image_type: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub quality: Option<i64>,
    pub scale: Option<Value>,
    pub marker_icon_options: Option<Value>,
    pub arrows: bool,
    pub imagemin: bool,
    pub oxipng: bool,
    pub render_to_html: bool,
}

/// Fully defaulted options consumed by the template and the capture step
#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    pub geojson: String,
    pub viewport: Viewport,
    pub center: String,
    pub zoom: String,
    pub max_zoom: u32,
    pub attribution: String,
    pub tileserver_url: String,
    pub vectorserver_url: String,
    pub vectorserver_token: String,
    pub format: ImageFormat,
    /// Always within 1..=100
    pub quality: u8,
    /// Serialized scale control options, `None` when disabled
    pub scale: Option<String>,
    /// Serialized marker icon options, `None` for the bundled icon
    pub marker_icon_options: Option<String>,
    pub arrows: bool,
    pub post_process: PostProcess,
    pub render_to_html: bool,
}

impl MapOptions {
    /// Quality to hand to the capture step; only JPEG carries one.
    pub fn capture_quality(&self) -> Option<u8> {
        match self.format {
            ImageFormat::Jpeg => Some(self.quality),
            ImageFormat::Png => None,
        }
    }
}

impl RenderOptions {
    /// Parse options from a JSON document. An empty document means defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text).map_err(|e| Error::InvalidOptions(e.to_string()))
    }

    /// Apply the default table and serialize structured fields to text.
    pub fn normalize(self) -> Result<MapOptions> {
        let post_process = match (self.imagemin, self.oxipng) {
            (true, true) => {
                return Err(Error::InvalidOptions(
                    "'imagemin' and 'oxipng' are mutually exclusive".into(),
                ))
            }
            (true, false) => PostProcess::InProcess,
            (false, true) => PostProcess::External,
            (false, false) => PostProcess::None,
        };

        let format = match self.image_type.as_deref() {
            Some(t) => t.parse()?,
            None => ImageFormat::Png,
        };

        let vectorserver_url = non_empty(self.vectorserver_url).unwrap_or_default();
        let default_max_zoom = if vectorserver_url.is_empty() {
            DEFAULT_MAX_ZOOM
        } else {
            DEFAULT_VECTOR_MAX_ZOOM
        };

        Ok(MapOptions {
            geojson: json_text(self.geojson).unwrap_or_default(),
            viewport: Viewport {
                width: positive(self.width).unwrap_or(DEFAULT_WIDTH),
                height: positive(self.height).unwrap_or(DEFAULT_HEIGHT),
            },
            center: json_text(self.center).unwrap_or_default(),
            zoom: json_text(self.zoom).unwrap_or_default(),
            max_zoom: positive(self.max_zoom).unwrap_or(default_max_zoom),
            attribution: non_empty(self.attribution)
                .unwrap_or_else(|| DEFAULT_ATTRIBUTION.to_string()),
            tileserver_url: non_empty(self.tileserver_url)
                .unwrap_or_else(|| DEFAULT_TILESERVER_URL.to_string()),
            vectorserver_url,
            vectorserver_token: non_empty(self.vectorserver_token)
                .unwrap_or_else(|| DEFAULT_VECTORSERVER_TOKEN.to_string()),
            format,
            quality: clamp_quality(self.quality),
            scale: json_text(self.scale),
            marker_icon_options: json_text(self.marker_icon_options),
            arrows: self.arrows,
            post_process,
            render_to_html: self.render_to_html,
        })
    }
}

/// Missing or zero means the default; everything else is pulled into 1..=100.
pub fn clamp_quality(quality: Option<i64>) -> u8 {
    match quality {
        None | Some(0) => DEFAULT_QUALITY,
        Some(q) => q.clamp(1, 100) as u8,
    }
}

fn positive(value: Option<i64>) -> Option<u32> {
    value
        .filter(|v| *v > 0)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Text stays as is, structured values are serialized; falsy values
/// (null, false, 0, empty string) count as absent.
fn json_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|f| Some(f as i64))
            .map_err(|_| D::Error::custom(format!("expected a number, got '{}'", s))),
        Some(other) => Err(D::Error::custom(format!("expected a number, got {}", other))),
    }
}
