//! HTML generation: fills `templates/map.html` from normalized options and
//! inlines the bundled assets.

use crate::assets::AssetBundle;
use crate::options::MapOptions;
use crate::{Error, Result};
use askama::Template;
use serde_json::Value;
use std::sync::Arc;

/// Placeholders are resolved at compile time; every value is already a
/// JavaScript literal when it reaches the template.
#[derive(Template)]
#[template(path = "map.html", escape = "none")]
struct MapTemplate {
    width: u32,
    height: u32,
    geojson: String,
    center: String,
    zoom: String,
    max_zoom: u32,
    attribution: String,
    tileserver_url: String,
    vectorserver_url: String,
    vectorserver_token: String,
    scale: String,
    marker_icon_options: String,
    arrows: bool,
}

impl From<&MapOptions> for MapTemplate {
    fn from(options: &MapOptions) -> Self {
        Self {
            width: options.viewport.width,
            height: options.viewport.height,
            geojson: raw_json_or(&options.geojson, "null"),
            center: js_string(&options.center),
            zoom: js_string(&options.zoom),
            max_zoom: options.max_zoom,
            attribution: js_string(&options.attribution),
            tileserver_url: js_string(&options.tileserver_url),
            vectorserver_url: js_string(&options.vectorserver_url),
            vectorserver_token: js_string(&options.vectorserver_token),
            scale: raw_json_or(options.scale.as_deref().unwrap_or(""), "false"),
            marker_icon_options: raw_json_or(
                options.marker_icon_options.as_deref().unwrap_or(""),
                "false",
            ),
            arrows: options.arrows,
        }
    }
}

/// Produces the final HTML document for a request
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    assets: Arc<AssetBundle>,
}

impl TemplateRenderer {
    pub fn new(assets: Arc<AssetBundle>) -> Self {
        Self { assets }
    }

    /// Fill the template and inline every bundled asset token.
    pub fn render(&self, options: &MapOptions) -> Result<String> {
        let html = MapTemplate::from(options)
            .render()
            .map_err(|e| Error::Template(e.to_string()))?;
        Ok(self.assets.inline_assets(&html))
    }
}

/// Quote text as a JSON string literal that is also safe inside `<script>`.
fn js_string(text: &str) -> String {
    script_safe(Value::String(text.to_owned()).to_string())
}

/// Structured values arrive as serialized JSON and are embedded as is.
fn raw_json_or(text: &str, fallback: &str) -> String {
    if text.is_empty() {
        fallback.to_string()
    } else {
        script_safe(text.to_string())
    }
}

fn script_safe(text: String) -> String {
    if text.contains("</") {
        text.replace("</", "<\\/")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RenderOptions;
    use serde_json::json;

    fn renderer() -> TemplateRenderer {
        TemplateRenderer::new(Arc::new(AssetBundle::from_entries([
            ("leafletjs", "/*leaflet*/"),
            ("markericonpng", "iVBORw0KGgo="),
        ])))
    }

    fn options(value: serde_json::Value) -> MapOptions {
        serde_json::from_value::<RenderOptions>(value)
            .unwrap()
            .normalize()
            .unwrap()
    }

    #[test]
    fn no_template_placeholder_survives() {
        for value in [
            json!({}),
            json!({ "geojson": { "type": "Point", "coordinates": [2.35, 48.85] }, "arrows": true }),
            json!({ "center": "-58.4,-34.6", "zoom": 10, "scale": true, "vectorserverUrl": "https://v" }),
        ] {
            let html = renderer().render(&options(value)).unwrap();
            assert!(!html.contains("{{"), "unresolved placeholder in {html}");
            assert!(!html.contains("}}"), "unresolved placeholder in {html}");
        }
    }

    #[test]
    fn bundled_assets_are_inlined_and_absent_ones_kept() {
        let html = renderer().render(&options(json!({}))).unwrap();
        assert!(html.contains("<script>/*leaflet*/</script>"));
        assert!(html.contains("data:image/png;base64,iVBORw0KGgo="));
        assert!(html.contains("//mapboxjs//"));
    }

    #[test]
    fn values_land_in_the_document() {
        let html = renderer()
            .render(&options(json!({ "width": 320, "height": 240, "attribution": "me</script>" })))
            .unwrap();
        assert!(html.contains("width: 320px; height: 240px;"));
        assert!(html.contains(r#"var attribution = "me<\/script>";"#));
        assert!(html.contains("var maxZoom = 17;"));
        assert!(html.contains("var geojson = null;"));
        assert!(html.contains("var scale = false;"));
        assert!(html.contains("var arrows = false;"));
    }
}
