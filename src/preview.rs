use crate::config::Settings;
use crate::error::Result;
use crate::http;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, Delay, Frame, ImageFormat, RgbaImage};
use reqwest::blocking::Client;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const MIN_FRAME_DELAY_MS: u32 = 100;

/// A decoded preview, ready to be uploaded as textures.
#[derive(Debug, Clone)]
pub struct PreviewAnimation {
    pub frames: Vec<PreviewFrame>,
}

#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 pixels.
    pub rgba: Vec<u8>,
    pub delay_ms: u32,
}

/// Turns a theme name into a file name. ASCII letters, digits and `-` are
/// kept; every other byte becomes `_XX`, so distinct names never share a file.
pub fn cache_file_name(name: &str) -> String {
    let mut stem = String::with_capacity(name.len() + 1);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{:02X}", byte));
        }
    }
    if stem.is_empty() {
        stem.push('_');
    }
    format!("{}.gif", stem)
}

fn scaled_width(width: u32, height: u32, target_height: u32) -> u32 {
    if height == 0 {
        return 1;
    }
    ((u64::from(width) * u64::from(target_height)) / u64::from(height)).max(1) as u32
}

fn resize_frame(buffer: &RgbaImage, target_height: u32) -> RgbaImage {
    let width = scaled_width(buffer.width(), buffer.height(), target_height);
    imageops::resize(buffer, width, target_height, FilterType::Lanczos3)
}

/// Scales a GIF (all frames) or a still image to `target_height` and encodes
/// the result as a looping GIF.
pub fn scale_to_height(bytes: &[u8], target_height: u32) -> Result<Vec<u8>> {
    let format = image::guess_format(bytes)?;

    let frames: Vec<Frame> = if format == ImageFormat::Gif {
        let decoder = GifDecoder::new(Cursor::new(bytes))?;
        decoder
            .into_frames()
            .collect_frames()?
            .into_iter()
            .map(|frame| {
                let delay = frame.delay();
                Frame::from_parts(resize_frame(frame.buffer(), target_height), 0, 0, delay)
            })
            .collect()
    } else {
        let still = image::load_from_memory_with_format(bytes, format)?.to_rgba8();
        vec![Frame::from_parts(
            resize_frame(&still, target_height),
            0,
            0,
            Delay::from_numer_denom_ms(MIN_FRAME_DELAY_MS, 1),
        )]
    };

    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(Repeat::Infinite)?;
        encoder.encode_frames(frames)?;
    }
    Ok(out)
}

/// Returns the cached, scaled preview for `name`, downloading and converting
/// it first when no cached copy exists.
pub fn get_or_create_scaled(
    settings: &Settings,
    client: &Client,
    name: &str,
    url: &str,
) -> Result<PathBuf> {
    let path = settings.converted_dir().join(cache_file_name(name));
    if path.is_file() {
        debug!(theme = name, path = %path.display(), "Using cached preview");
        return Ok(path);
    }

    let bytes = http::get_bytes(client, url)?;
    store_scaled(&path, &bytes, settings.preview_height)?;
    info!(theme = name, path = %path.display(), "Cached scaled preview");
    Ok(path)
}

fn store_scaled(path: &Path, bytes: &[u8], target_height: u32) -> Result<()> {
    let scaled = scale_to_height(bytes, target_height)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    // A cached file is trusted as-is, so it must only ever appear complete.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&scaled)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn load_animation(path: &Path) -> Result<PreviewAnimation> {
    let bytes = fs::read(path)?;
    decode_animation(&bytes)
}

pub fn decode_animation(bytes: &[u8]) -> Result<PreviewAnimation> {
    let decoder = GifDecoder::new(Cursor::new(bytes))?;
    let frames = decoder
        .into_frames()
        .collect_frames()?
        .into_iter()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let delay_ms = if denom == 0 { 0 } else { numer / denom };
            let buffer = frame.into_buffer();
            PreviewFrame {
                width: buffer.width(),
                height: buffer.height(),
                rgba: buffer.into_raw(),
                delay_ms: delay_ms.max(MIN_FRAME_DELAY_MS),
            }
        })
        .collect();

    Ok(PreviewAnimation { frames })
}
