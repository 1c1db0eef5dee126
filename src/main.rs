use clap::Parser;
use osm_static_maps::{AssetBundle, RenderOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// Render a static map image from JSON options
#[derive(Parser, Debug)]
#[command(name = "osm-static-maps", version, about)]
struct Cli {
    /// JSON options file ('-' reads stdin)
    #[arg(short, long, default_value = "-")]
    options: String,

    /// Where to write the image or HTML ('-' writes stdout)
    #[arg(short = 'O', long, default_value = "-")]
    output: String,

    /// Directory holding the mapping libraries (node_modules layout)
    #[arg(long, env = "OSM_STATIC_MAPS_ASSETS", default_value = "node_modules")]
    assets: PathBuf,

    /// Chrome/Chromium binary; located automatically when omitted
    #[arg(long, env = "CHROME_PATH")]
    chrome: Option<PathBuf>,

    /// Executable used when the options ask for `oxipng`
    #[arg(long, env = "OSM_STATIC_MAPS_ENCODER", default_value = "oxipng")]
    encoder: PathBuf,

    /// Bound for loading the page and reaching network-idle
    #[arg(long, default_value_t = 20000)]
    timeout_ms: u64,

    /// Emit the generated HTML instead of an image
    #[arg(long)]
    html: bool,
}

fn read_options(source: &str) -> osm_static_maps::Result<RenderOptions> {
    let text = if source == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| osm_static_maps::Error::InvalidOptions(format!("stdin: {}", e)))?;
        buf
    } else {
        std::fs::read_to_string(source)
            .map_err(|e| osm_static_maps::Error::InvalidOptions(format!("{}: {}", source, e)))?
    };
    RenderOptions::from_json(&text)
}

fn write_output(target: &str, bytes: &[u8]) -> io::Result<()> {
    if target == "-" {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        out.write_all(bytes)?;
        out.flush()
    } else {
        std::fs::write(target, bytes)
    }
}

#[cfg(feature = "cdp")]
async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = read_options(&cli.options)?;
    options.render_to_html |= cli.html;

    let assets = AssetBundle::load(&cli.assets)?;

    let mut config = osm_static_maps::RendererConfig::default();
    config.browser.executable = cli.chrome;
    config.encoder.program = cli.encoder;
    config.content_load_timeout_ms = cli.timeout_ms;

    let renderer = osm_static_maps::Renderer::with_chrome(assets, config);
    let output = renderer.render(options).await?;
    log::info!("Rendered {} bytes ({})", output.as_bytes().len(), output.content_type());

    write_output(&cli.output, &output.into_bytes())?;
    Ok(())
}

#[cfg(not(feature = "cdp"))]
async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    // Without a browser backend only HTML output is possible.
    let options = read_options(&cli.options)?;
    let assets = AssetBundle::load(&cli.assets)?;
    let html = osm_static_maps::TemplateRenderer::new(assets.into()).render(&options.normalize()?)?;
    write_output(&cli.output, html.as_bytes())?;
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("osm-static-maps: {}", e);
        std::process::exit(1);
    }
}
