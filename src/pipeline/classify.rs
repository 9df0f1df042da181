//! File-type classification: URL extension hints and magic numbers.
//!
//! Only static raster formats are accepted. SVG in particular is refused
//! because it can carry script; it has no magic number the detector knows,
//! so it falls out as [`ImageError::UnsupportedFormat`] without a special
//! case.

use crate::error::ImageError;
use image::ImageFormat;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// The static image formats the service stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl FileType {
    /// Canonical file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Png => "png",
            FileType::Jpeg => "jpg",
            FileType::Webp => "webp",
            FileType::Gif => "gif",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            FileType::Png => "image/png",
            FileType::Jpeg => "image/jpeg",
            FileType::Webp => "image/webp",
            FileType::Gif => "image/gif",
        }
    }

    /// Map a file extension (case-insensitive, no dot) to a type.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(FileType::Png),
            "jpg" | "jpeg" => Some(FileType::Jpeg),
            "webp" => Some(FileType::Webp),
            "gif" => Some(FileType::Gif),
            _ => None,
        }
    }

    /// Map a declared MIME type to a type. `image/jpg` is accepted as an
    /// alias of `image/jpeg`; parameters such as `; charset=` are ignored.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(FileType::Png),
            "image/jpeg" | "image/jpg" => Some(FileType::Jpeg),
            "image/webp" => Some(FileType::Webp),
            "image/gif" => Some(FileType::Gif),
            _ => None,
        }
    }

    fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Png => Some(FileType::Png),
            ImageFormat::Jpeg => Some(FileType::Jpeg),
            ImageFormat::WebP => Some(FileType::Webp),
            ImageFormat::Gif => Some(FileType::Gif),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Extension of the last path segment of `url`, if it has one.
///
/// Query strings and fragments are ignored, so
/// `https://cdn/x/photo.PNG?w=200` yields `Some("PNG")`.
pub fn extension_hint(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_string())
}

/// Classify `bytes` by magic number.
///
/// The magic number is authoritative. `hint` (usually from the URL
/// extension or a declared MIME type) is only compared against it for
/// diagnostics, since external hosts routinely serve webp under `.png`.
pub fn classify(bytes: &[u8], hint: Option<FileType>) -> Result<FileType, ImageError> {
    let detected = match image::guess_format(bytes) {
        Ok(format) => format,
        Err(_) => {
            return Err(ImageError::UnsupportedFormat {
                detected: sniff_markup(bytes),
            })
        }
    };

    let file_type = FileType::from_format(detected).ok_or_else(|| ImageError::UnsupportedFormat {
        detected: Some(format!("{detected:?}").to_ascii_lowercase()),
    })?;

    if let Some(h) = hint {
        if h != file_type {
            debug!("Type hint {} disagrees with magic number {}; using {}", h, file_type, file_type);
        }
    }
    Ok(file_type)
}

/// Name text payloads for the error message. Only used when the magic-number
/// detector gave up.
fn sniff_markup(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(512)];
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    if text.contains("<svg") {
        Some("svg".into())
    } else if text.trim_start().starts_with('<') {
        Some("html".into())
    } else {
        None
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn classifies_static_formats() {
        assert_eq!(classify(PNG, None).unwrap(), FileType::Png);
        assert_eq!(classify(JPEG, None).unwrap(), FileType::Jpeg);
        assert_eq!(classify(GIF, None).unwrap(), FileType::Gif);
        assert_eq!(classify(WEBP, None).unwrap(), FileType::Webp);
    }

    #[test]
    fn svg_is_rejected_even_with_png_hint() {
        let err = classify(SVG, Some(FileType::Png)).unwrap_err();
        match err {
            ImageError::UnsupportedFormat { detected } => assert_eq!(detected.as_deref(), Some("svg")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn known_but_disallowed_format_is_rejected() {
        let err = classify(BMP, None).unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedFormat { detected: Some(_) }));
    }

    #[test]
    fn magic_number_wins_over_hint() {
        assert_eq!(classify(WEBP, Some(FileType::Png)).unwrap(), FileType::Webp);
    }

    #[test]
    fn extension_hint_from_url() {
        assert_eq!(extension_hint("http://ext/a/b/photo.PNG?w=1").as_deref(), Some("PNG"));
        assert_eq!(extension_hint("https://ext/img.jpeg#frag").as_deref(), Some("jpeg"));
        assert_eq!(extension_hint("https://ext/noext"), None);
        assert_eq!(extension_hint("https://ext/.hidden"), None);
        assert_eq!(extension_hint("not a url"), None);
    }

    #[test]
    fn mime_aliases() {
        assert_eq!(FileType::from_mime("image/jpg"), Some(FileType::Jpeg));
        assert_eq!(FileType::from_mime("IMAGE/PNG; charset=binary"), Some(FileType::Png));
        assert_eq!(FileType::from_mime("image/svg+xml"), None);
    }

    #[test]
    fn extension_round_trip() {
        for t in [FileType::Png, FileType::Jpeg, FileType::Webp, FileType::Gif] {
            assert_eq!(FileType::from_extension(t.extension()), Some(t));
        }
        assert_eq!(FileType::from_extension("svg"), None);
    }
}
