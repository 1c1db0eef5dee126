//! Optional re-encoding of captured screenshots
//!
//! Two strategies, selected per request by [`PostProcess`]:
//! - in process: lossless only. PNG is re-encoded with `image` at the
//!   strongest compression; JPEG keeps its entropy-coded data and only loses
//!   metadata segments.
//! - external: pipe the bytes through an encoder executable (stdin in, stdout
//!   out), e.g. `oxipng -`

use crate::options::{ImageFormat, PostProcess};
use crate::session::blocking;
use crate::{Error, ExternalEncoderConfig, Result};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::ImageEncoder;
use log::debug;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const COM: u8 = 0xFE;

/// Applies the post-processing strategy a request selected
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    encoder: ExternalEncoderConfig,
}

impl PostProcessor {
    pub fn new(encoder: ExternalEncoderConfig) -> Self {
        Self { encoder }
    }

    /// Run `image` through `strategy`. With [`PostProcess::None`] the bytes are
    /// returned untouched.
    pub async fn apply(
        &self,
        strategy: PostProcess,
        format: ImageFormat,
        image: Vec<u8>,
    ) -> Result<Vec<u8>> {
        match strategy {
            PostProcess::None => Ok(image),
            PostProcess::InProcess => blocking(move || compress(image, format)).await,
            PostProcess::External => run_encoder(&self.encoder, &image).await,
        }
    }
}

/// Losslessly shrink `image`. The pixels are never altered and the result is
/// never larger than the input: if re-encoding does not help, the input comes
/// back unchanged.
pub fn compress(image: Vec<u8>, format: ImageFormat) -> Result<Vec<u8>> {
    let out = match format {
        ImageFormat::Png => recompress_png(&image)?,
        ImageFormat::Jpeg => strip_jpeg_metadata(&image)?,
    };

    if out.len() >= image.len() {
        debug!("Kept {} image as captured ({} bytes)", format, image.len());
        return Ok(image);
    }
    debug!("Compressed {} image: {} -> {} bytes", format, image.len(), out.len());
    Ok(out)
}

/// Re-encode in the decoded color type (an RGB capture stays RGB) with the
/// strongest deflate level and adaptive filtering.
fn recompress_png(image: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(image, image::ImageFormat::Png)
        .map_err(|e| Error::Compression(e.to_string()))?;
    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
        .write_image(decoded.as_bytes(), decoded.width(), decoded.height(), decoded.color())
        .map_err(|e| Error::Compression(e.to_string()))?;
    Ok(out)
}

/// Drop comment and application segments that do not affect decoding
/// (EXIF/XMP in APP1, vendor data in APP3..APP13 and APP15). JFIF (APP0),
/// ICC profiles (APP2) and the Adobe color transform (APP14) are kept; the
/// scan data after SOS is copied verbatim.
fn strip_jpeg_metadata(image: &[u8]) -> Result<Vec<u8>> {
    let truncated = || Error::Compression("truncated JPEG".to_string());

    if image.len() < 4 || image[0] != 0xFF || image[1] != SOI {
        return Err(Error::Compression("not a JPEG stream".to_string()));
    }

    let mut out = Vec::with_capacity(image.len());
    out.extend_from_slice(&image[..2]);
    let mut pos = 2;

    loop {
        if pos + 1 >= image.len() {
            return Err(truncated());
        }
        if image[pos] != 0xFF {
            return Err(Error::Compression(format!("bad JPEG marker at offset {}", pos)));
        }
        let marker = image[pos + 1];
        match marker {
            // fill byte
            0xFF => pos += 1,
            SOS | EOI => {
                out.extend_from_slice(&image[pos..]);
                return Ok(out);
            }
            0x01 | 0xD0..=0xD7 => {
                out.extend_from_slice(&image[pos..pos + 2]);
                pos += 2;
            }
            _ => {
                let len_bytes = image.get(pos + 2..pos + 4).ok_or_else(truncated)?;
                let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
                let end = pos + 2 + len;
                if len < 2 || end > image.len() {
                    return Err(truncated());
                }
                if !is_metadata(marker) {
                    out.extend_from_slice(&image[pos..end]);
                }
                pos = end;
            }
        }
    }
}

fn is_metadata(marker: u8) -> bool {
    matches!(marker, 0xE1 | 0xE3..=0xED | 0xEF | COM)
}

/// Pipe `input` through the external encoder and collect what it prints.
///
/// Stdin is written and closed while stdout is drained, so a large image
/// cannot deadlock on full pipes. A non-zero exit, a failed stream operation
/// and an empty output are reported as distinct errors.
pub async fn run_encoder(config: &ExternalEncoderConfig, input: &[u8]) -> Result<Vec<u8>> {
    let mut child = Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::EncoderLaunch(format!("{}: {}", config.program.display(), e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::EncoderIo("encoder stdin unavailable".into()))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::EncoderIo("encoder stdout unavailable".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::EncoderIo("encoder stderr unavailable".into()))?;

    let write = async move {
        stdin.write_all(input).await?;
        stdin.shutdown().await
    };
    let read = async {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.map(|_| buf)
    };
    let read_stderr = async {
        let mut text = String::new();
        stderr.read_to_string(&mut text).await.map(|_| text)
    };

    let (written, output, diagnostics) = tokio::join!(write, read, read_stderr);

    let status = child
        .wait()
        .await
        .map_err(|e| Error::EncoderIo(format!("waiting for encoder: {}", e)))?;

    if !status.success() {
        return Err(Error::EncoderExit {
            status: status.to_string(),
            stderr: diagnostics.unwrap_or_default().trim().to_string(),
        });
    }

    let output = output.map_err(|e| Error::EncoderIo(format!("reading from encoder: {}", e)))?;
    if output.is_empty() {
        return Err(Error::EncoderEmptyOutput);
    }
    written.map_err(|e| Error::EncoderIo(format!("writing to encoder: {}", e)))?;

    debug!(
        "Encoder {} produced {} bytes from {}",
        config.program.display(),
        output.len(),
        input.len()
    );
    Ok(output)
}
