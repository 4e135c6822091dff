//! Local files attached to a prompt, carried inline as data URLs.

use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::Result;
use crate::events::{ContentPart, FileRef, UrlRef};

const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = image_mime(path).unwrap_or(FALLBACK_MIME).to_string();

        tracing::debug!(name = %name, mime = %mime_type, bytes = data.len(), "attachment loaded");
        Ok(Self {
            name,
            mime_type,
            data,
        })
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }

    pub fn into_part(self) -> ContentPart {
        let url = self.data_url();
        if self.is_image() {
            ContentPart::ImageUrl {
                image_url: UrlRef { url },
            }
        } else {
            ContentPart::FileUrl {
                file_url: FileRef {
                    url,
                    name: self.name,
                },
            }
        }
    }
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
