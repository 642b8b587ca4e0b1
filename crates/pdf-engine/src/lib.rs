//! Document model for the markup engine
//!
//! [`DocumentModel`] is the seam between the overlay engine and whatever
//! holds the PDF. [`LopdfDocument`] is the default implementation; it keeps
//! the parsed document in memory, appends stroke stamps to page `/Annots`
//! arrays and serializes the whole file on save.

pub mod stamp;

use lopdf::{Document, Object, ObjectId};
use pdf_markup_core::{MarkupError, PageId, Rect, Rotation, Stroke};
use std::fs;
use std::path::{Path, PathBuf};

pub use stamp::{AnnotationContent, STROKE_RECORD_KEY};

/// Media box used when a page and its ancestors carry none (US Letter)
const DEFAULT_MEDIA_BOX: Rect = Rect { x: 0.0, y: 0.0, width: 612.0, height: 792.0 };

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("stroke record error: {0}")]
    Record(#[from] serde_json::Error),
    #[error("{page} out of range (page_count={page_count})")]
    PageOutOfRange { page: PageId, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("invalid annotation content: {0}")]
    InvalidContent(String),
    #[error("document has no save destination")]
    NoDestination,
    #[error("backend error: {0}")]
    Backend(String),
}

impl PdfEngineError {
    /// Convert into the engine's error taxonomy, attributing it to `page`
    pub fn into_markup(self, page: Option<PageId>) -> MarkupError {
        MarkupError::persistence(page, self.to_string())
    }
}

impl From<PdfEngineError> for MarkupError {
    fn from(err: PdfEngineError) -> Self {
        err.into_markup(None)
    }
}

pub type PdfEngineResult<T> = Result<T, PdfEngineError>;

/// External document model consumed by the markup engine.
///
/// Implementations are moved onto the persistence worker in background mode,
/// hence the `Send` bound.
pub trait DocumentModel: Send + 'static {
    fn page_count(&self) -> u32;

    fn page_media_box(&self, page: PageId) -> PdfEngineResult<Rect>;

    fn page_rotation(&self, page: PageId) -> PdfEngineResult<Rotation>;

    /// Append a rendered stroke to the page's annotations
    fn append_annotation(&mut self, page: PageId, content: &AnnotationContent)
        -> PdfEngineResult<()>;

    /// Strokes previously appended to `page`, in append order
    fn page_strokes(&self, page: PageId) -> PdfEngineResult<Vec<Stroke>>;

    /// Current bytes of the whole document
    fn serialize(&mut self) -> PdfEngineResult<Vec<u8>>;

    /// Store serialized bytes at `destination`
    fn write(&self, bytes: &[u8], destination: &Path) -> PdfEngineResult<()> {
        write_atomic(bytes, destination)
    }

    /// Where `save` writes when the caller gives no explicit destination
    fn destination(&self) -> Option<PathBuf> {
        None
    }
}

/// Write through a sibling temporary file and rename it into place
pub fn write_atomic(bytes: &[u8], destination: &Path) -> PdfEngineResult<()> {
    let mut temp_name = destination.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, bytes)?;
    if let Err(err) = fs::rename(&temp_path, destination) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }
    Ok(())
}

/// In-memory lopdf document
#[derive(Debug)]
pub struct LopdfDocument {
    doc: Document,
    pages: Vec<ObjectId>,
    destination: Option<PathBuf>,
}

impl LopdfDocument {
    /// Open from a path or in-memory bytes.
    ///
    /// A document opened from a path saves back to that path by default.
    pub fn open(source: impl Into<OpenSource>) -> PdfEngineResult<Self> {
        let (bytes, destination) = match source.into() {
            OpenSource::Path(path) => (fs::read(&path)?, Some(path)),
            OpenSource::Bytes(bytes) => (bytes, None),
        };

        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let mut document = Self::from_document(Document::load_mem(&bytes)?)?;
        document.destination = destination;
        Ok(document)
    }

    /// Wrap an already parsed document
    pub fn from_document(doc: Document) -> PdfEngineResult<Self> {
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }
        log::debug!("opened document with {} pages", pages.len());
        Ok(Self { doc, pages, destination: None })
    }

    /// Set the default save destination
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    fn page_object(&self, page: PageId) -> PdfEngineResult<ObjectId> {
        self.pages.get(page.index() as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page,
            page_count: self.pages.len() as u32,
        })
    }

    /// Look up a page attribute, following `/Parent` for inheritable keys
    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> PdfEngineResult<Option<&Object>> {
        let mut current = Some(page_id);
        while let Some(id) = current {
            let dict = self.doc.get_dictionary(id)?;
            if let Ok(value) = dict.get(key) {
                return Ok(Some(self.resolve(value)));
            }
            current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        }
        Ok(None)
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        match object {
            Object::Reference(id) => self.doc.get_object(*id).unwrap_or(object),
            other => other,
        }
    }
}

impl DocumentModel for LopdfDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_media_box(&self, page: PageId) -> PdfEngineResult<Rect> {
        let page_id = self.page_object(page)?;
        let media_box = self
            .inherited(page_id, b"MediaBox")?
            .and_then(|obj| obj.as_array().ok())
            .and_then(|array| {
                if array.len() != 4 {
                    return None;
                }
                let x0 = obj_to_f64(self.resolve(&array[0]))?;
                let y0 = obj_to_f64(self.resolve(&array[1]))?;
                let x1 = obj_to_f64(self.resolve(&array[2]))?;
                let y1 = obj_to_f64(self.resolve(&array[3]))?;
                Some(Rect::new(x0.min(x1), y0.min(y1), (x1 - x0).abs(), (y1 - y0).abs()))
            });

        Ok(media_box.unwrap_or_else(|| {
            log::warn!("{page} has no usable MediaBox, assuming US Letter");
            DEFAULT_MEDIA_BOX
        }))
    }

    fn page_rotation(&self, page: PageId) -> PdfEngineResult<Rotation> {
        let page_id = self.page_object(page)?;
        let degrees = match self.inherited(page_id, b"Rotate")? {
            Some(Object::Integer(degrees)) => *degrees,
            Some(Object::Real(degrees)) => *degrees as i64,
            _ => 0,
        };

        Ok(Rotation::from_degrees(degrees).unwrap_or_else(|| {
            log::warn!("{page} has invalid /Rotate {degrees}, ignoring");
            Rotation::Deg0
        }))
    }

    fn append_annotation(
        &mut self,
        page: PageId,
        content: &AnnotationContent,
    ) -> PdfEngineResult<()> {
        let page_id = self.page_object(page)?;

        // `/Annots` may be an indirect array shared through a reference.
        let annots_ref =
            self.doc.get_dictionary(page_id)?.get(b"Annots").and_then(Object::as_reference).ok();
        if let Some(array_id) = annots_ref {
            if !matches!(self.doc.get_object(array_id), Ok(Object::Array(_))) {
                return Err(PdfEngineError::Backend(format!(
                    "{page}: /Annots {} {} R does not resolve to an array",
                    array_id.0, array_id.1
                )));
            }
        }

        let annot_id = stamp::add_stamp(&mut self.doc, page_id, content)?;
        match annots_ref {
            Some(array_id) => {
                if let Ok(Object::Array(array)) = self.doc.get_object_mut(array_id) {
                    array.push(Object::Reference(annot_id));
                }
            }
            None => {
                let page_dict = self.doc.get_dictionary_mut(page_id)?;
                if let Ok(Object::Array(array)) = page_dict.get_mut(b"Annots") {
                    array.push(Object::Reference(annot_id));
                } else {
                    page_dict.set("Annots", Object::Array(vec![Object::Reference(annot_id)]));
                }
            }
        }

        log::trace!("{page}: appended stamp for stroke {}", content.stroke_id);
        Ok(())
    }

    fn page_strokes(&self, page: PageId) -> PdfEngineResult<Vec<Stroke>> {
        let page_id = self.page_object(page)?;
        let annots = match self.doc.get_dictionary(page_id)?.get(b"Annots") {
            Ok(annots) => self.resolve(annots),
            Err(_) => return Ok(Vec::new()),
        };
        let Ok(annots) = annots.as_array() else {
            return Ok(Vec::new());
        };

        let mut strokes = Vec::new();
        for entry in annots {
            let Ok(annot) = self.resolve(entry).as_dict() else {
                continue;
            };
            match stamp::decode_stamp(annot) {
                Some(Ok(stroke)) => strokes.push(stroke),
                Some(Err(err)) => log::warn!("{page}: skipping unreadable stroke stamp: {err}"),
                None => {}
            }
        }
        Ok(strokes)
    }

    fn serialize(&mut self) -> PdfEngineResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes)?;
        Ok(bytes)
    }

    fn destination(&self) -> Option<PathBuf> {
        self.destination.clone()
    }
}

fn obj_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(f64::from(*f)),
        _ => None,
    }
}
