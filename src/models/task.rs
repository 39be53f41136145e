use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Image encodings the archiver accepts, keyed by file extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpg,
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Codec used to decode and re-encode files of this format.
    pub fn codec(self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpg | ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
        }
    }
}

/// One image file discovered under the root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask {
    pub dir: PathBuf,
    /// File name without its extension.
    pub basename: String,
    pub format: ImageFormat,
    /// File name exactly as listed on disk, extension case preserved.
    pub file_name: String,
    pub modified: DateTime<Local>,
}

impl ImageTask {
    /// Split `file_name` into basename and recognized format.
    ///
    /// Returns `None` for names without an extension, with an empty basename, or with
    /// an extension outside [`ImageFormat`].
    pub fn parse_name(file_name: &str) -> Option<(String, ImageFormat)> {
        let (basename, ext) = file_name.rsplit_once('.')?;
        if basename.is_empty() {
            return None;
        }
        let format = ext.parse::<ImageFormat>().ok()?;
        Some((basename.to_string(), format))
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}
