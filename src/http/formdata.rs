//! Request bodies and the upload stream that feeds them to the transport.
//!
//! A [`FormData`] is an ordered list of elements (inline bytes, file ranges,
//! blobs). A [`FormDataStream`] walks those elements chunk by chunk on demand,
//! the way a transport upload callback pulls data.
//!
//! Element lengths are settled when a stream is opened or refreshed, so the
//! declared size always matches the bytes produced. A file element that cannot
//! be opened as a regular file at that point is skipped: it contributes zero
//! bytes, a warning is logged, and its index is recorded in
//! [`FormDataStream::skipped_elements`]. A file that shrinks or fails while it
//! is being read ends the body with [`NetError::UploadFileChanged`].

use crate::base::neterror::NetError;
use bytes::Bytes;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// One piece of a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormDataElement {
    /// Inline bytes.
    Data(Bytes),
    /// A byte range of a file on disk. `length: None` reads to EOF.
    File {
        path: PathBuf,
        start: u64,
        length: Option<u64>,
    },
    /// Bytes of an in-memory blob.
    Blob(Bytes),
}

/// Length of a file range, checked against the file as it is now.
fn file_range_len(path: &Path, start: u64, length: Option<u64>) -> io::Result<u64> {
    let metadata = File::open(path)?.metadata()?;
    if !metadata.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }
    let available = metadata.len().saturating_sub(start);
    Ok(length.map_or(available, |l| l.min(available)))
}

/// Request body for HTTP methods that send data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    elements: Vec<FormDataElement>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append inline bytes.
    pub fn append_data(mut self, data: impl Into<Bytes>) -> Self {
        self.elements.push(FormDataElement::Data(data.into()));
        self
    }

    /// Append a whole file.
    pub fn append_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.elements.push(FormDataElement::File {
            path: path.into(),
            start: 0,
            length: None,
        });
        self
    }

    /// Append a byte range of a file.
    pub fn append_file_range(mut self, path: impl Into<PathBuf>, start: u64, length: u64) -> Self {
        self.elements.push(FormDataElement::File {
            path: path.into(),
            start,
            length: Some(length),
        });
        self
    }

    /// Append blob bytes.
    pub fn append_blob(mut self, data: impl Into<Bytes>) -> Self {
        self.elements.push(FormDataElement::Blob(data.into()));
        self
    }

    pub fn elements(&self) -> &[FormDataElement] {
        &self.elements
    }

    /// Check if the body has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Total body size as a stream opened now would declare it; unreadable
    /// files count as zero.
    pub fn total_size(&self) -> u64 {
        self.stream().total_size()
    }

    /// Create a fresh stream positioned at the first element.
    pub fn stream(&self) -> FormDataStream {
        FormDataStream::new(self.clone())
    }
}

impl From<String> for FormData {
    fn from(s: String) -> Self {
        FormData::new().append_data(s)
    }
}

impl From<Vec<u8>> for FormData {
    fn from(v: Vec<u8>) -> Self {
        FormData::new().append_data(v)
    }
}

impl From<&str> for FormData {
    fn from(s: &str) -> Self {
        FormData::new().append_data(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for FormData {
    fn from(b: Bytes) -> Self {
        FormData::new().append_data(b)
    }
}

/// Sequential reader over a [`FormData`].
#[derive(Debug)]
pub struct FormDataStream {
    form: FormData,
    /// Settled length per element; `None` for a skipped element.
    sizes: Vec<Option<u64>>,
    /// Index of the element being read.
    element_index: usize,
    /// Byte offset inside the current element.
    element_offset: u64,
    /// Open handle for the current file element.
    file: Option<File>,
    skipped: Vec<usize>,
    total_read: u64,
    failure: Option<NetError>,
    generation: u64,
}

impl FormDataStream {
    pub fn new(form: FormData) -> Self {
        let mut stream = Self {
            form,
            sizes: Vec::new(),
            element_index: 0,
            element_offset: 0,
            file: None,
            skipped: Vec::new(),
            total_read: 0,
            failure: None,
            generation: 0,
        };
        stream.settle();
        stream
    }

    fn settle(&mut self) {
        self.skipped.clear();
        let mut sizes = Vec::with_capacity(self.form.elements.len());
        for (index, element) in self.form.elements.iter().enumerate() {
            let size = match element {
                FormDataElement::Data(b) | FormDataElement::Blob(b) => Some(b.len() as u64),
                FormDataElement::File {
                    path,
                    start,
                    length,
                } => match file_range_len(path, *start, *length) {
                    Ok(len) => Some(len),
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            element = index,
                            error = %e,
                            "skipping unreadable upload element"
                        );
                        self.skipped.push(index);
                        None
                    }
                },
            };
            sizes.push(size);
        }
        self.sizes = sizes;
    }

    /// Whether any element remains to be read.
    pub fn has_more_elements(&self) -> bool {
        self.failure.is_none() && self.element_index < self.form.elements.len()
    }

    /// Rewind to the first byte of the first element and settle lengths again.
    pub fn refresh(&mut self) {
        self.element_index = 0;
        self.element_offset = 0;
        self.file = None;
        self.total_read = 0;
        self.failure = None;
        self.generation += 1;
        self.settle();
    }

    /// Incremented by every [`refresh`](Self::refresh).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Total size of the body this stream produces.
    pub fn total_size(&self) -> u64 {
        self.sizes.iter().flatten().sum()
    }

    /// Bytes handed out since the last refresh.
    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// Indexes of file elements that could not be read.
    pub fn skipped_elements(&self) -> &[usize] {
        &self.skipped
    }

    /// Why the body ended early, if it did.
    pub fn failure(&self) -> Option<&NetError> {
        self.failure.as_ref()
    }

    /// Fill `buf` with the next bytes of the body.
    ///
    /// Returns the number of bytes written; 0 means the body is exhausted or
    /// has failed (see [`failure`](Self::failure)). A single call never spans
    /// two elements.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        while self.has_more_elements() {
            let Some(size) = self.sizes[self.element_index] else {
                self.advance();
                continue;
            };
            if self.element_offset >= size {
                self.advance();
                continue;
            }
            let want = ((size - self.element_offset) as usize).min(buf.len());

            let n = match self.form.elements[self.element_index].clone() {
                FormDataElement::Data(bytes) | FormDataElement::Blob(bytes) => {
                    let offset = self.element_offset as usize;
                    buf[..want].copy_from_slice(&bytes[offset..offset + want]);
                    want
                }
                FormDataElement::File { path, start, .. } => {
                    match self.read_from_file(&path, start, &mut buf[..want]) {
                        Ok(n) if n > 0 => n,
                        result => {
                            let reason = match result {
                                Err(e) => e.to_string(),
                                Ok(_) => "file shorter than its settled length".to_string(),
                            };
                            tracing::warn!(
                                path = %path.display(),
                                element = self.element_index,
                                offset = self.element_offset,
                                %reason,
                                "upload file changed while reading"
                            );
                            self.failure = Some(NetError::UploadFileChanged);
                            self.file = None;
                            return 0;
                        }
                    }
                }
            };

            self.element_offset += n as u64;
            self.total_read += n as u64;
            return n;
        }

        0
    }

    /// Read the remaining body into a single buffer.
    pub fn read_to_end(&mut self) -> Bytes {
        let mut out = Vec::new();
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let n = self.read(&mut chunk);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Bytes::from(out)
    }

    fn advance(&mut self) {
        self.element_index += 1;
        self.element_offset = 0;
        self.file = None;
    }

    fn read_from_file(&mut self, path: &Path, start: u64, buf: &mut [u8]) -> io::Result<usize> {
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(start + self.element_offset))?;
                self.file.insert(file)
            }
        };
        file.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn drain(stream: &mut FormDataStream, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = stream.read(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_empty_body() {
        let form = FormData::new();
        assert!(form.is_empty());
        let mut stream = form.stream();
        assert!(!stream.has_more_elements());
        assert_eq!(drain(&mut stream, 8), Vec::<u8>::new());
    }

    #[test]
    fn test_elements_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.txt");
        std::fs::File::create(&path).unwrap().write_all(b"FILE").unwrap();

        let form = FormData::new()
            .append_data("head-")
            .append_file(&path)
            .append_blob(Bytes::from_static(b"-blob"));

        assert_eq!(form.total_size(), 14);
        let mut stream = form.stream();
        assert_eq!(drain(&mut stream, 3), b"head-FILE-blob");
        assert!(!stream.has_more_elements());
        assert_eq!(stream.total_read(), 14);
    }

    #[test]
    fn test_read_does_not_span_elements() {
        let form = FormData::new().append_data("ab").append_data("cd");
        let mut stream = form.stream();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(stream.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"cd");
        assert_eq!(stream.read(&mut buf), 0);
    }

    #[test]
    fn test_file_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("range.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let form = FormData::new().append_file_range(&path, 2, 5);
        assert_eq!(form.total_size(), 5);
        let mut stream = form.stream();
        assert_eq!(drain(&mut stream, 2), b"23456");
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let form = FormData::new()
            .append_data("a")
            .append_file("/nonexistent/netloader/upload.bin")
            .append_data("b");

        let mut stream = form.stream();
        assert_eq!(drain(&mut stream, 4), b"ab");
        assert_eq!(stream.skipped_elements(), &[1]);
    }

    #[test]
    fn test_directory_element_is_not_declared() {
        let dir = tempfile::tempdir().unwrap();
        let form = FormData::new()
            .append_data("a")
            .append_file(dir.path())
            .append_data("b");

        let mut stream = form.stream();
        assert_eq!(stream.skipped_elements(), &[1]);
        assert_eq!(stream.total_size(), 2);
        assert_eq!(form.total_size(), 2);

        assert_eq!(stream.read_to_end(), Bytes::from_static(b"ab"));
        assert_eq!(stream.total_read(), stream.total_size());
        assert!(stream.failure().is_none());
    }

    #[test]
    fn test_shrunk_file_ends_body_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrinks.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let form = FormData::new().append_file(&path).append_data("tail");
        let mut stream = form.stream();
        assert_eq!(stream.total_size(), 14);

        std::fs::write(&path, b"0123").unwrap();
        assert_eq!(stream.read_to_end(), Bytes::from_static(b"0123"));
        assert_eq!(stream.failure(), Some(&NetError::UploadFileChanged));
        assert!(!stream.has_more_elements());

        stream.refresh();
        assert!(stream.failure().is_none());
        assert_eq!(stream.total_size(), 8);
        assert_eq!(stream.read_to_end(), Bytes::from_static(b"0123tail"));
    }

    #[test]
    fn test_grown_file_capped_at_settled_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grows.bin");
        std::fs::write(&path, b"abcd").unwrap();

        let mut stream = FormData::new().append_file(&path).stream();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"efgh")
            .unwrap();

        assert_eq!(stream.read_to_end(), Bytes::from_static(b"abcd"));
        assert_eq!(stream.total_read(), stream.total_size());
    }

    #[test]
    fn test_refresh_rewinds() {
        let form = FormData::new().append_data("hello").append_blob("!");
        let mut stream = form.stream();
        assert_eq!(drain(&mut stream, 2), b"hello!");
        assert!(!stream.has_more_elements());

        stream.refresh();
        assert!(stream.has_more_elements());
        assert_eq!(stream.total_read(), 0);
        assert_eq!(stream.read_to_end(), Bytes::from_static(b"hello!"));
    }

    #[test]
    fn test_from_conversions() {
        let body: FormData = "test".into();
        assert_eq!(body.total_size(), 4);
        let body: FormData = vec![1u8, 2, 3].into();
        assert_eq!(body.total_size(), 3);
        let body: FormData = String::from("xy").into();
        assert_eq!(body.elements().len(), 1);
    }
}
