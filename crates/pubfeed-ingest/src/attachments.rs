//! Attachment binding
//!
//! Resolves the media files a document references, turns them into
//! attachment entities (once per GUID) and rewrites the body placeholders the
//! parsers left behind.

use crate::config::{PublisherConfig, TypeConfig};
use crate::model::{CanonicalDocument, EntityId, Guid, MediaReference};
use crate::store::{AttachmentUpload, ContentStore, StoreError};
use crate::xml::escape_html;
use pubfeed_common::checksum::{fingerprint_file, verify_file};
use pubfeed_common::text::decode_utf8_or_latin1;
use pubfeed_common::PubfeedError;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to stage '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Staged copy of '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: PubfeedError,
    },
}

/// What binding did to one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindReport {
    /// Attachment ids in media order
    pub attached: Vec<EntityId>,
    /// Newly uploaded attachment ids
    pub uploaded: Vec<EntityId>,
    pub thumbnail: Option<EntityId>,
    /// Referenced filenames with no file on disk
    pub missing: Vec<String>,
}

#[allow(clippy::expect_used)]
fn hex_escape_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_([0-9A-Fa-f]{2})").expect("static pattern"))
}

/// Decode `_xx` hex escapes, e.g. `stra_C3_9Fe.jpg` to `straße.jpg`.
pub fn decode_hex_escapes(filename: &str) -> Option<String> {
    let escaped = hex_escape_pattern().replace_all(filename, "%$1");
    if matches!(escaped, Cow::Borrowed(_)) {
        return None;
    }
    let bytes = urlencoding::decode_binary(escaped.as_bytes());
    Some(decode_utf8_or_latin1(&bytes))
}

/// Path of a name re-encoded in code page 1252, for files copied off legacy shares
#[cfg(unix)]
fn legacy_path(dir: &Path, name: &str) -> Option<PathBuf> {
    use pubfeed_common::text::encode_cp1252;
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let bytes = encode_cp1252(name)?;
    (bytes != name.as_bytes()).then(|| dir.join(OsStr::from_bytes(&bytes)))
}

#[cfg(not(unix))]
fn legacy_path(_dir: &Path, _name: &str) -> Option<PathBuf> {
    None
}

/// Find a referenced file: literal name, then hex escapes decoded, then the
/// code page 1252 spelling of either.
pub fn locate(dir: &Path, filename: &str) -> Option<PathBuf> {
    let mut candidates = vec![dir.join(filename)];
    let decoded = decode_hex_escapes(filename);
    if let Some(decoded) = &decoded {
        candidates.push(dir.join(decoded));
    }
    candidates.extend(legacy_path(dir, decoded.as_deref().unwrap_or(filename)));
    candidates.into_iter().find(|path| path.is_file())
}

/// Figure markup for an embedded image
fn figure(id: EntityId, url: &str, media: &MediaReference, size: &str) -> String {
    let alt = escape_html(media.alt.as_deref().unwrap_or_default());
    let img = format!(
        "<img class=\"size-{} wp-image-{}\" src=\"{}\" alt=\"{}\" />",
        size,
        id,
        escape_html(url),
        alt
    );
    match media.caption.as_deref().filter(|c| !c.is_empty()) {
        Some(caption) => format!(
            "<figure id=\"attachment_{}\" class=\"wp-caption alignnone\">{}<figcaption class=\"wp-caption-text\">{}</figcaption></figure>",
            id,
            img,
            escape_html(caption)
        ),
        None => img,
    }
}

pub struct AttachmentBinder<'a> {
    store: &'a dyn ContentStore,
    publisher: &'a PublisherConfig,
    type_config: &'a TypeConfig,
    staging_dir: PathBuf,
}

impl<'a> AttachmentBinder<'a> {
    pub fn new(store: &'a dyn ContentStore, publisher: &'a PublisherConfig, type_config: &'a TypeConfig) -> Self {
        Self {
            store,
            publisher,
            type_config,
            staging_dir: std::env::temp_dir(),
        }
    }

    /// Directory uploads are staged in before the store takes them over
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    fn guid(&self, filename: &str) -> Guid {
        Guid::new(&self.publisher.id, self.publisher.system_for(self.type_config), filename)
    }

    /// Copy a file next to the staging area and check the copy.
    fn stage(&self, source: &Path, media: &MediaReference) -> Result<PathBuf, AttachmentError> {
        let staged = self
            .staging_dir
            .join(format!(".pubfeed-{}-{}", std::process::id(), media.target_name));
        let staging = |e| AttachmentError::Staging {
            path: source.to_path_buf(),
            source: e,
        };
        std::fs::copy(source, &staged).map_err(staging)?;

        let corrupt = |e| AttachmentError::Corrupt {
            path: source.to_path_buf(),
            source: e,
        };
        let expected = fingerprint_file(source).map_err(corrupt)?;
        verify_file(&staged, &expected).map_err(corrupt)?;
        Ok(staged)
    }

    /// Write caption, credit, alt text and extras onto an attachment.
    fn annotate(&self, id: EntityId, media: &MediaReference) -> Result<(), StoreError> {
        match media.credit.as_deref().filter(|c| !c.is_empty()) {
            Some(credit) => self.store.set_meta(id, "credit", &Value::from(credit))?,
            None => self.store.delete_meta(id, "credit")?,
        }
        if let Some(alt) = media.alt.as_deref().filter(|a| !a.is_empty()) {
            self.store.set_meta(id, "_alt", &Value::from(alt))?;
        }
        for (key, value) in &media.extra {
            self.store.set_meta(id, key, &Value::from(value.as_str()))?;
        }
        Ok(())
    }

    fn attach(&self, source: &Path, media: &MediaReference, parent: EntityId) -> Result<(EntityId, bool), AttachmentError> {
        // keyed by the name found on disk so escaped spellings share one attachment
        let resolved = source
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&media.filename);
        let guid = self.guid(resolved);
        let caption = media.caption.clone().unwrap_or_default();

        if let Some(existing) = self.store.find_by_guid(&guid)? {
            self.store.update_attachment_caption(existing.id, &caption)?;
            self.annotate(existing.id, media)?;
            return Ok((existing.id, false));
        }

        let staged = self.stage(source, media)?;
        let id = self.store.upload_attachment(&AttachmentUpload {
            guid,
            parent: Some(parent),
            staged_path: staged,
            target_name: media.target_name.clone(),
            title: media.filename.clone(),
            caption,
        })?;
        self.annotate(id, media)?;
        Ok((id, true))
    }

    /// Bind every media reference of `doc`, owned by entity `parent`.
    pub fn bind(&self, doc: &mut CanonicalDocument, parent: EntityId) -> Result<BindReport, AttachmentError> {
        let mut report = BindReport::default();
        if doc.media.is_empty() {
            return Ok(report);
        }
        let Some(dir) = self.type_config.media.as_deref() else {
            warn!(guid = %doc.guid, count = doc.media.len(), "No media directory configured");
            report.missing = doc.media.keys().cloned().collect();
            return Ok(report);
        };

        let references: Vec<MediaReference> = doc.media.values().cloned().collect();
        let mut images = Vec::new();
        for (index, media) in references.iter().enumerate() {
            let Some(source) = locate(dir, &media.filename) else {
                warn!(guid = %doc.guid, file = %media.filename, "Media file not found");
                report.missing.push(media.filename.clone());
                continue;
            };

            let (id, uploaded) = self.attach(&source, media, parent)?;
            debug!(guid = %doc.guid, file = %media.filename, attachment = id, uploaded, "Bound media");
            report.attached.push(id);
            if uploaded {
                report.uploaded.push(id);
            }

            let html = if index == 0 {
                self.store.set_thumbnail(parent, id)?;
                report.thumbnail = Some(id);
                String::new()
            } else if doc.is_gallery() {
                String::new()
            } else {
                let url = self.store.attachment_url(id)?.unwrap_or_default();
                figure(id, &url, media, &self.type_config.embed_size)
            };
            if doc.is_gallery() {
                images.push(Value::from(id));
            }

            doc.body = format!("{}\n", doc.body.replace(&media.placeholder(), &html).trim());
        }

        if !images.is_empty() {
            doc.set_meta("images", images);
        }

        if let Some(folder) = &self.type_config.media_folder {
            if !report.uploaded.is_empty() && !self.store.move_to_folder(folder, &report.uploaded)? {
                warn!(folder = %folder, "Media folder not found");
            }
        }
        Ok(report)
    }
}
