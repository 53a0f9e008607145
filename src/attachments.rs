use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const UPLOADS_DIR: &str = "uploads";

const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("ppt", "application/vnd.ms-powerpoint"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("txt", "text/plain"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    Note,
    TestPaper,
}

impl OwnerKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "note" | "notes" => Some(OwnerKind::Note),
            "testPaper" | "test_paper" | "questionPaper" => Some(OwnerKind::TestPaper),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OwnerKind::Note => "note",
            OwnerKind::TestPaper => "testPaper",
        }
    }

    fn subdir(self) -> &'static str {
        match self {
            OwnerKind::Note => "notes",
            OwnerKind::TestPaper => "question-papers",
        }
    }

    fn file_prefix(self) -> &'static str {
        match self {
            OwnerKind::Note => "note",
            OwnerKind::TestPaper => "qp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub stored_name: String,
    pub original_name: String,
    /// Relative to the workspace root, always with forward slashes.
    pub relative_path: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub sha256: String,
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// MIME type for an accepted extension; `None` for anything not on the list.
pub fn mime_for(name: &str) -> Option<&'static str> {
    let ext = extension_of(name)?;
    ALLOWED_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, m)| *m)
}

pub fn is_allowed_mime(mime: &str) -> bool {
    let m = mime.trim().to_ascii_lowercase();
    m == "image/jpg" || ALLOWED_TYPES.iter().any(|(_, allowed)| *allowed == m)
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The file itself is unacceptable: wrong type, too large, unnamed.
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Copies `source` into the workspace upload tree under a fresh name.
///
/// The file is streamed through SHA-256 while copying; its contents are never
/// interpreted. Nothing is left under `uploads/` when the copy fails.
pub fn store_file(
    workspace: &Path,
    kind: OwnerKind,
    source: &Path,
    original_name: Option<&str>,
    declared_mime: Option<&str>,
    max_bytes: u64,
) -> Result<StoredFile, StoreError> {
    let meta = std::fs::metadata(source)
        .with_context(|| format!("failed to read source file {}", source.to_string_lossy()))?;
    if !meta.is_file() {
        return Err(StoreError::Rejected(format!(
            "not a file: {}",
            source.to_string_lossy()
        )));
    }
    if meta.len() > max_bytes {
        return Err(too_large(meta.len(), max_bytes));
    }

    let original_name = original_name
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            source
                .file_name()
                .and_then(|n| n.to_str())
                .map(|s| s.to_string())
        })
        .ok_or_else(|| StoreError::Rejected("cannot determine original file name".to_string()))?;

    let mime_type = match declared_mime.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) if is_allowed_mime(m) => m.to_ascii_lowercase(),
        Some(m) => return Err(StoreError::Rejected(format!("invalid file type: {m}"))),
        None => mime_for(&original_name)
            .ok_or_else(|| StoreError::Rejected(format!("invalid file type: {original_name}")))?
            .to_string(),
    };

    let subdir = PathBuf::from(UPLOADS_DIR).join(kind.subdir());
    let dest_dir = workspace.join(&subdir);
    std::fs::create_dir_all(&dest_dir)
        .with_context(|| format!("failed to create directory {}", dest_dir.to_string_lossy()))?;

    let stored_name = match extension_of(&original_name) {
        Some(ext) => format!("{}-{}.{}", kind.file_prefix(), Uuid::new_v4().simple(), ext),
        None => format!("{}-{}", kind.file_prefix(), Uuid::new_v4().simple()),
    };
    let (size_bytes, sha256) = copy_hashed(source, &dest_dir.join(&stored_name), max_bytes)?;

    Ok(StoredFile {
        relative_path: format!("{}/{}/{}", UPLOADS_DIR, kind.subdir(), stored_name),
        stored_name,
        original_name,
        size_bytes,
        mime_type,
        sha256,
    })
}

fn too_large(size: u64, max_bytes: u64) -> StoreError {
    StoreError::Rejected(format!(
        "file is {} bytes; the limit is {} bytes",
        size, max_bytes
    ))
}

/// Streams `source` to `dest`, returning the byte count and hex digest.
/// `dest` is removed if anything goes wrong after it was created.
fn copy_hashed(source: &Path, dest: &Path, max_bytes: u64) -> Result<(u64, String), StoreError> {
    let mut input = File::open(source)
        .with_context(|| format!("failed to open {}", source.to_string_lossy()))?;
    let mut output = File::create(dest)
        .with_context(|| format!("failed to create {}", dest.to_string_lossy()))?;

    let copied = stream_hashed(&mut input, &mut output, max_bytes);
    if copied.is_err() {
        drop(output);
        let _ = std::fs::remove_file(dest);
    }
    copied
}

fn stream_hashed(
    input: &mut File,
    output: &mut File,
    max_bytes: u64,
) -> Result<(u64, String), StoreError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size_bytes: u64 = 0;
    loop {
        let n = input.read(&mut buf).context("failed to read source file")?;
        if n == 0 {
            break;
        }
        size_bytes += n as u64;
        if size_bytes > max_bytes {
            return Err(too_large(size_bytes, max_bytes));
        }
        hasher.update(&buf[..n]);
        output
            .write_all(&buf[..n])
            .context("failed to write stored file")?;
    }
    output.flush().context("failed to flush stored file")?;
    Ok((size_bytes, format!("{:x}", hasher.finalize())))
}

pub fn remove_stored_file(workspace: &Path, relative_path: &str) -> anyhow::Result<()> {
    let rel = Path::new(relative_path);
    if rel.is_absolute() || rel.components().any(|c| c.as_os_str() == "..") {
        return Err(anyhow!("refusing to remove {relative_path}"));
    }
    let path = workspace.join(rel);
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove {}", path.to_string_lossy()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn stores_copy_with_hash_and_mime() {
        let ws = temp_dir("schoold-attach-ws");
        let src_dir = temp_dir("schoold-attach-src");
        let src = src_dir.join("Chapter 1.PDF");
        std::fs::write(&src, b"abc").expect("write");

        let stored =
            store_file(&ws, OwnerKind::Note, &src, None, None, 1024).expect("store");
        assert_eq!(stored.original_name, "Chapter 1.PDF");
        assert_eq!(stored.mime_type, "application/pdf");
        assert_eq!(stored.size_bytes, 3);
        assert_eq!(
            stored.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(stored.stored_name.starts_with("note-"));
        assert!(stored.stored_name.ends_with(".pdf"));
        assert!(stored.relative_path.starts_with("uploads/notes/"));
        assert_eq!(
            std::fs::read(ws.join(&stored.relative_path)).expect("read back"),
            b"abc"
        );

        remove_stored_file(&ws, &stored.relative_path).expect("remove");
        assert!(!ws.join(&stored.relative_path).exists());

        let _ = std::fs::remove_dir_all(ws);
        let _ = std::fs::remove_dir_all(src_dir);
    }

    #[test]
    fn rejects_unknown_types_and_oversize_files() {
        let ws = temp_dir("schoold-attach-reject");
        let src = ws.join("payload.exe");
        std::fs::write(&src, b"MZ").expect("write");
        assert!(store_file(&ws, OwnerKind::TestPaper, &src, None, None, 1024).is_err());
        assert!(store_file(
            &ws,
            OwnerKind::TestPaper,
            &src,
            Some("paper.pdf"),
            Some("application/x-msdownload"),
            1024
        )
        .is_err());

        let big = ws.join("big.txt");
        std::fs::write(&big, vec![b'x'; 32]).expect("write");
        assert!(store_file(&ws, OwnerKind::TestPaper, &big, None, None, 16).is_err());
        let ok = store_file(&ws, OwnerKind::TestPaper, &big, None, None, 32).expect("at limit");
        assert!(ok.stored_name.starts_with("qp-"));

        assert!(matches!(
            store_file(&ws, OwnerKind::TestPaper, &big, None, None, 16),
            Err(StoreError::Rejected(_))
        ));

        assert!(remove_stored_file(&ws, "../outside.txt").is_err());
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn failed_copy_leaves_no_partial_file() {
        let ws = temp_dir("schoold-attach-partial");
        let big = ws.join("grown.txt");
        std::fs::write(&big, vec![b'x'; 100_000]).expect("write");
        let dest = ws.join("copy-limit.txt");
        assert!(matches!(
            copy_hashed(&big, &dest, 70_000),
            Err(StoreError::Rejected(_))
        ));
        assert!(!dest.exists());

        // Reading a directory fails after both handles are open.
        let dir = ws.join("not-a-file");
        std::fs::create_dir_all(&dir).expect("dir");
        let dest = ws.join("copy-io.txt");
        assert!(matches!(
            copy_hashed(&dir, &dest, 1024),
            Err(StoreError::Io(_))
        ));
        assert!(!dest.exists());

        let (size, digest) = copy_hashed(&big, &ws.join("copy-ok.txt"), 100_000).expect("copy");
        assert_eq!(size, 100_000);
        assert_eq!(digest.len(), 64);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn unwritable_upload_tree_is_an_io_error() {
        let ws = temp_dir("schoold-attach-io");
        std::fs::write(ws.join(UPLOADS_DIR), b"in the way").expect("block uploads dir");
        let src = ws.join("notes.txt");
        std::fs::write(&src, b"abc").expect("write");
        assert!(matches!(
            store_file(&ws, OwnerKind::Note, &src, None, None, 1024),
            Err(StoreError::Io(_))
        ));
        let _ = std::fs::remove_dir_all(ws);
    }
}
