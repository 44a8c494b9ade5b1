//! Signed URLs for the imgproxy sidecar, which reads originals straight from
//! the bucket (`s3://` sources) and resizes them on request.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;
use serde::Serialize;

use crate::config::ImgproxyConfig;

pub const MAX_DIMENSION: u32 = 4000;
pub const DEFAULT_DIMENSION: u32 = 1200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    #[default]
    Fit,
    Fill,
    Resize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Webp,
    Jpeg,
    Jpg,
    Png,
}

/// Fixed-height sizes; width 0 lets imgproxy keep the aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Thumbnail,
    Medium,
    Preview,
    Full,
}

impl Preset {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Preset::Thumbnail => (0, 120),
            Preset::Medium => (0, 320),
            Preset::Preview => (0, 720),
            Preset::Full => (0, 1080),
        }
    }
}

impl FromStr for ResizeMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "fit" => Ok(ResizeMode::Fit),
            "fill" => Ok(ResizeMode::Fill),
            "resize" => Ok(ResizeMode::Resize),
            _ => Err(()),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "webp" => Ok(OutputFormat::Webp),
            "jpeg" => Ok(OutputFormat::Jpeg),
            "jpg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            _ => Err(()),
        }
    }
}

impl FromStr for Preset {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "thumbnail" => Ok(Preset::Thumbnail),
            "medium" => Ok(Preset::Medium),
            "preview" => Ok(Preset::Preview),
            "full" => Ok(Preset::Full),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResizeMode::Fit => "fit",
            ResizeMode::Fill => "fill",
            ResizeMode::Resize => "resize",
        })
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    pub mode: ResizeMode,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            mode: ResizeMode::Fit,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            format: OutputFormat::Webp,
        }
    }
}

impl Transform {
    pub fn thumbnail() -> Self {
        Self::preset(Preset::Thumbnail)
    }

    pub fn preset(preset: Preset) -> Self {
        let (width, height) = preset.dimensions();
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

/// Builds imgproxy URLs for objects in one bucket.
#[derive(Clone)]
pub struct UrlBuilder {
    base_url: String,
    bucket: String,
    signing: Option<(hmac::Key, Vec<u8>)>,
}

impl UrlBuilder {
    /// Key and salt are hex. Undecodable values fall back to unsigned URLs.
    pub fn new(config: &ImgproxyConfig, bucket: impl Into<String>) -> Self {
        let signing = match (config.key.as_deref(), config.salt.as_deref()) {
            (Some(key), Some(salt)) => match (hex::decode(key), hex::decode(salt)) {
                (Ok(key), Ok(salt)) => Some((hmac::Key::new(hmac::HMAC_SHA256, &key), salt)),
                _ => {
                    tracing::warn!("IMGPROXY_KEY or IMGPROXY_SALT is not valid hex, using unsigned URLs");
                    None
                }
            },
            _ => None,
        };

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            signing,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signing.is_some()
    }

    /// `<base>/<signature>/rs:<mode>:<w>:<h>/plain/s3://<bucket>/<key>@<format>`
    pub fn url(&self, key: &str, transform: Transform) -> String {
        let path = format!(
            "/rs:{}:{}:{}/plain/s3://{}/{}@{}",
            transform.mode,
            transform.width,
            transform.height,
            self.bucket,
            key.trim_start_matches('/'),
            transform.format,
        );

        match &self.signing {
            Some((key, salt)) => {
                let mut message = salt.clone();
                message.extend_from_slice(path.as_bytes());
                let signature = URL_SAFE_NO_PAD.encode(hmac::sign(key, &message));
                format!("{}/{signature}{path}", self.base_url)
            }
            None => format!("{}/unsafe{path}", self.base_url),
        }
    }

    /// The default 1200x1200 fit preview attached to listings and uploads.
    pub fn preview_url(&self, key: &str) -> String {
        self.url(key, Transform::default())
    }
}
