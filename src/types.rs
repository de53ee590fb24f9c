//! Shared value types used by every layer of the image stack.
//!
//! These are the nouns of the crate: what size an image is, whose image it
//! is, and the immutable record that travels from the generator through the
//! storage and cache tiers to the provider.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a stored image. Also the file name of its payload on disk.
pub type ImageId = u64;

/// Supported image resolutions, ordered from smallest to largest.
///
/// The derived `Ord` follows declaration order, so `Icon < Preview < Full`.
/// [`SizeVariant::largest`] is the canonical variant used to decide whether
/// a product "has an image".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeVariant {
    Icon,
    Preview,
    Full,
}

impl SizeVariant {
    pub const ALL: [SizeVariant; 3] = [SizeVariant::Icon, SizeVariant::Preview, SizeVariant::Full];

    pub fn largest() -> Self {
        SizeVariant::Full
    }

    /// Pixel dimensions `(width, height)` of this variant.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            SizeVariant::Icon => (64, 64),
            SizeVariant::Preview => (125, 125),
            SizeVariant::Full => (500, 500),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SizeVariant::Icon => "icon",
            SizeVariant::Preview => "preview",
            SizeVariant::Full => "full",
        }
    }
}

impl fmt::Display for SizeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "icon" => Ok(SizeVariant::Icon),
            "preview" => Ok(SizeVariant::Preview),
            "full" => Ok(SizeVariant::Full),
            other => Err(format!("unknown size variant '{other}'")),
        }
    }
}

/// Whose image a mapping belongs to.
///
/// Products are keyed by their numeric storefront id. Everything else the
/// storefront shows (logo, category icons, banners) is a named web image.
/// Web images survive reconfiguration; product images only survive if the
/// product still exists upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKey {
    Product(u64),
    Web(String),
}

impl SubjectKey {
    pub fn is_product(&self) -> bool {
        matches!(self, SubjectKey::Product(_))
    }
}

impl From<u64> for SubjectKey {
    fn from(id: u64) -> Self {
        SubjectKey::Product(id)
    }
}

impl From<&str> for SubjectKey {
    fn from(name: &str) -> Self {
        SubjectKey::Web(name.to_string())
    }
}

impl From<String> for SubjectKey {
    fn from(name: String) -> Self {
        SubjectKey::Web(name)
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKey::Product(id) => write!(f, "product:{id}"),
            SubjectKey::Web(name) => write!(f, "web:{name}"),
        }
    }
}

/// Encoding of an image payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormatTag {
    Png,
    Jpeg,
}

impl ImageFormatTag {
    /// Format every generated or ingested image is stored in.
    pub const STORE: ImageFormatTag = ImageFormatTag::Png;

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormatTag::Png => "png",
            ImageFormatTag::Jpeg => "jpg",
        }
    }

    /// Detect the format from the payload's magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(ImageFormatTag::Png),
            image::ImageFormat::Jpeg => Some(ImageFormatTag::Jpeg),
            _ => None,
        }
    }
}

/// An encoded image with its identity.
///
/// Immutable once built. Layers share records as `Arc<ImageRecord>`, so a
/// cache hit hands out the same allocation the generator produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: ImageId,
    pub variant: SizeVariant,
    pub bytes: Vec<u8>,
    pub format: ImageFormatTag,
}

impl ImageRecord {
    pub fn new(id: ImageId, variant: SizeVariant, bytes: Vec<u8>, format: ImageFormatTag) -> Self {
        Self {
            id,
            variant,
            bytes,
            format,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
