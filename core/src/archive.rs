//! Streaming reader for document-vector archives.
//!
//! The archive is a gzip-compressed tar file with one entry per document:
//!
//! ```text
//! <DOCNO>FT911-3</DOCNO>
//! tariff 3.218876
//! import 1.609438
//! ```
//!
//! Documents are decoded one entry at a time; nothing beyond the current
//! line is held in memory.

use crate::error::{PipelineError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// An opened archive. Call [`TfidfArchive::documents`] to stream it.
pub struct TfidfArchive<R: Read> {
    name: String,
    archive: tar::Archive<GzDecoder<R>>,
}

impl TfidfArchive<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::from_reader(path.display().to_string(), BufReader::new(file)))
    }
}

impl<R: Read> TfidfArchive<R> {
    /// Wraps any gzip'd tar stream; `name` is used in parse errors.
    pub fn from_reader(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            archive: tar::Archive::new(GzDecoder::new(reader)),
        }
    }

    pub fn documents(&mut self) -> Result<DocumentStream<'_, R>> {
        let entries = self.archive.entries()?;
        Ok(DocumentStream {
            name: &self.name,
            entries,
            current: None,
            doc_id: None,
            line_no: 0,
            pending: None,
        })
    }
}

/// Cursor over the documents of one archive.
///
/// `has_next_document` moves to the next document, discarding whatever was
/// left unread of the previous one. Within a document, `has_next_weight`
/// and `next_weight` walk its (term, weight) pairs.
pub struct DocumentStream<'a, R: Read> {
    name: &'a str,
    entries: tar::Entries<'a, GzDecoder<R>>,
    current: Option<BufReader<tar::Entry<'a, GzDecoder<R>>>>,
    doc_id: Option<String>,
    line_no: usize,
    pending: Option<String>,
}

impl<'a, R: Read> DocumentStream<'a, R> {
    pub fn has_next_document(&mut self) -> Result<bool> {
        self.skip_document();
        self.doc_id = None;
        let entry = match self.entries.next() {
            Some(entry) => entry?,
            None => return Ok(false),
        };
        let mut reader = BufReader::new(entry);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        self.line_no = 1;
        let id = parse_docno(&header)
            .ok_or_else(|| PipelineError::parse(self.name, 1, format!("expected <DOCNO> header, found {:?}", header.trim_end())))?;
        self.doc_id = Some(id.to_string());
        self.current = Some(reader);
        Ok(true)
    }

    /// Id of the current document; `None` before the first
    /// `has_next_document` and after the archive is exhausted.
    pub fn next_document_id(&self) -> Option<&str> {
        self.doc_id.as_deref()
    }

    /// Drops the remaining pairs of the current document unparsed.
    pub fn skip_document(&mut self) {
        self.current = None;
        self.pending = None;
    }

    pub fn has_next_weight(&mut self) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        let reader = match self.current.as_mut() {
            Some(reader) => reader,
            None => return Ok(false),
        };
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                self.current = None;
                return Ok(false);
            }
            self.line_no += 1;
            if !line.trim().is_empty() {
                self.pending = Some(line);
                return Ok(true);
            }
        }
    }

    pub fn next_weight(&mut self) -> Result<(String, f32)> {
        if !self.has_next_weight()? {
            return Err(self.error("no term weights left in document"));
        }
        let line = self.pending.take().unwrap_or_default();
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(self.error(format!("expected `term weight`, found {} fields", fields.len())));
        }
        let weight: f32 = fields[1]
            .parse()
            .map_err(|_| self.error(format!("non-numeric weight {:?} for term {:?}", fields[1], fields[0])))?;
        if !weight.is_finite() {
            return Err(self.error(format!("non-finite weight {:?} for term {:?}", fields[1], fields[0])));
        }
        Ok((fields[0].to_string(), weight))
    }

    fn error(&self, message: impl Into<String>) -> PipelineError {
        let doc = self.doc_id.as_deref().unwrap_or("?");
        PipelineError::parse(format!("{} [{}]", self.name, doc), self.line_no, message)
    }
}

fn parse_docno(line: &str) -> Option<&str> {
    let line = line.trim();
    let inner = line.strip_prefix("<DOCNO>")?.strip_suffix("</DOCNO>")?;
    Some(inner.trim())
}
