//! Static assets inlined into the generated HTML
//!
//! The mapping libraries are shipped as opaque files. They are read once at
//! startup into an immutable [`AssetBundle`]; binary assets are kept as base64
//! text so they can be dropped into `data:` URLs. The template refers to them
//! with bundler tokens of the form `//name//`, which are disjoint from the
//! template's own placeholder syntax.

use crate::{Error, Result};
use base64::Engine as Base64Engine;
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::Path;

/// How an asset is stored in the bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// UTF-8 text (scripts, stylesheets)
    Text,
    /// Raw bytes, stored base64-encoded
    Binary,
}

/// A named asset and its location relative to the asset root
#[derive(Debug, Clone, Copy)]
pub struct AssetSpec {
    pub name: &'static str,
    pub path: &'static str,
    pub kind: AssetKind,
}

/// Assets referenced by `templates/map.html`.
pub const DECLARED_ASSETS: &[AssetSpec] = &[
    AssetSpec { name: "leafletjs", path: "leaflet/dist/leaflet.js", kind: AssetKind::Text },
    AssetSpec { name: "leafletcss", path: "leaflet/dist/leaflet.css", kind: AssetKind::Text },
    AssetSpec {
        name: "leafletpolylinedecorator",
        path: "leaflet-polylinedecorator/dist/leaflet.polylineDecorator.js",
        kind: AssetKind::Text,
    },
    AssetSpec { name: "mapboxjs", path: "mapbox-gl/dist/mapbox-gl.js", kind: AssetKind::Text },
    AssetSpec { name: "mapboxcss", path: "mapbox-gl/dist/mapbox-gl.css", kind: AssetKind::Text },
    AssetSpec {
        name: "leafletmapboxjs",
        path: "mapbox-gl-leaflet/leaflet-mapbox-gl.js",
        kind: AssetKind::Text,
    },
    AssetSpec {
        name: "markericonpng",
        path: "leaflet/dist/images/marker-icon.png",
        kind: AssetKind::Binary,
    },
];

/// Immutable set of named asset contents
#[derive(Debug, Clone, Default)]
pub struct AssetBundle {
    entries: BTreeMap<String, String>,
}

impl AssetBundle {
    /// Load every declared asset below `root`. Any unreadable asset fails the
    /// whole load; there is no partial bundle.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        Self::load_from(root, DECLARED_ASSETS)
    }

    /// Load an explicit list of assets below `root`.
    pub fn load_from(root: impl AsRef<Path>, specs: &[AssetSpec]) -> Result<Self> {
        let root = root.as_ref();
        let mut entries = BTreeMap::new();

        for spec in specs {
            let path = root.join(spec.path);
            let content = read_asset(&path, spec)?;
            debug!("Loaded asset '{}' ({} bytes)", spec.name, content.len());
            entries.insert(spec.name.to_string(), content);
        }

        info!("Asset bundle loaded from {} ({} assets)", root.display(), entries.len());
        Ok(Self { entries })
    }

    /// Build a bundle from in-memory contents (already base64 for binary assets).
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every `//name//` token whose name is in the bundle with the
    /// asset's content.
    ///
    /// The scan is a single pass over the input, so content that was just
    /// inserted is never scanned again. Tokens naming an unknown asset are
    /// left verbatim.
    pub fn inline_assets(&self, html: &str) -> String {
        const MARK: &str = "//";

        let mut out = String::with_capacity(html.len() + self.inlined_size_hint(html));
        let mut rest = html;

        while let Some(pos) = rest.find(MARK) {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + MARK.len()..];

            match self.token_at(after) {
                Some((content, consumed)) => {
                    out.push_str(content);
                    rest = &after[consumed..];
                }
                None => {
                    // Only step over one slash so `///name//` still resolves.
                    out.push('/');
                    rest = &rest[pos + 1..];
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// If `text` starts with `name//` for a bundled asset, return its content
    /// and the number of bytes the token occupies after the leading marker.
    fn token_at<'a>(&'a self, text: &str) -> Option<(&'a str, usize)> {
        let end = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(text.len());
        let name = &text[..end];
        if name.is_empty() || !text[end..].starts_with("//") {
            return None;
        }
        self.entries
            .get(name)
            .map(|content| (content.as_str(), end + 2))
    }

    fn inlined_size_hint(&self, html: &str) -> usize {
        self.entries
            .iter()
            .filter(|(name, _)| html.contains(&format!("//{}//", name)))
            .map(|(_, content)| content.len())
            .sum()
    }
}

fn read_asset(path: &Path, spec: &AssetSpec) -> Result<String> {
    let load_error = |reason: String| Error::AssetLoad {
        name: spec.name.to_string(),
        path: path.display().to_string(),
        reason,
    };

    match spec.kind {
        AssetKind::Text => std::fs::read_to_string(path).map_err(|e| load_error(e.to_string())),
        AssetKind::Binary => {
            let bytes = std::fs::read(path).map_err(|e| load_error(e.to_string()))?;
            Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}
