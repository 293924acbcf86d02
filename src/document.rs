use crate::error::{Error, Result};
use log::{debug, error, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fs;
use std::panic;
use std::path::Path;

/// A loaded document: extracted text plus the identifier of where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    /// The extracted text content
    pub content: String,
    /// File name, or the mapped source field for JSON records
    pub source: String,
}

/// How records of a JSON file map onto documents.
///
/// Both fields are dotted paths into each record, e.g. `metadata.source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonMapping {
    pub content_field: String,
    pub source_field: String,
}

impl Default for JsonMapping {
    fn default() -> Self {
        JsonMapping {
            content_field: "content".to_string(),
            source_field: "source".to_string(),
        }
    }
}

/// Result of scanning a corpus directory
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Documents in file-name order
    pub documents: Vec<RawDocument>,
    /// Files or records that were skipped, with the reason
    pub skipped: Vec<Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Pdf,
    Text,
    Json,
}

/// Load every recognized file of a flat corpus directory.
///
/// Unsupported files and per-file extraction failures are logged and collected
/// in [`LoadOutcome::skipped`]; they never abort the scan.
pub fn load_directory<P: AsRef<Path>>(dir: P, mapping: &JsonMapping) -> Result<LoadOutcome> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::DirectoryNotFound(dir.to_path_buf()));
    }

    info!("Loading documents from {}", dir.display());

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        } else {
            debug!("Skipping non-file entry {}", path.display());
        }
    }
    paths.sort();

    let mut outcome = LoadOutcome::default();
    for path in paths {
        let file_name = file_name_of(&path);
        let mime_type = from_path(&path).first_or_octet_stream().to_string();

        let Some(kind) = classify(&mime_type) else {
            warn!("Unsupported format: {} ({})", file_name, mime_type);
            outcome.skipped.push(Error::UnsupportedFileType {
                file: file_name,
                mime_type,
            });
            continue;
        };

        debug!("Loading {} as {:?}", path.display(), kind);
        match kind {
            FileKind::Pdf => match read_pdf(&path) {
                Ok(content) => outcome.documents.push(RawDocument {
                    content,
                    source: file_name,
                }),
                Err(reason) => record_failure(&mut outcome, file_name, reason),
            },
            FileKind::Text => match fs::read_to_string(&path) {
                Ok(content) => outcome.documents.push(RawDocument {
                    content,
                    source: file_name,
                }),
                Err(e) => record_failure(&mut outcome, file_name, e.to_string()),
            },
            FileKind::Json => match fs::read_to_string(&path) {
                Ok(raw) => load_json_records(&raw, &file_name, mapping, &mut outcome),
                Err(e) => record_failure(&mut outcome, file_name, e.to_string()),
            },
        }
    }

    info!(
        "Loaded {} documents ({} skipped)",
        outcome.documents.len(),
        outcome.skipped.len()
    );

    Ok(outcome)
}

fn classify(mime_type: &str) -> Option<FileKind> {
    match mime_type {
        "application/pdf" => Some(FileKind::Pdf),
        "application/json" => Some(FileKind::Json),
        "text/plain" | "text/markdown" | "text/x-markdown" => Some(FileKind::Text),
        _ => None,
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn record_failure(outcome: &mut LoadOutcome, file: String, reason: String) {
    error!("Failed to load {}: {}", file, reason);
    outcome.skipped.push(Error::ExtractionFailure { file, reason });
}

/// Extract the text of every page, in page order
fn read_pdf(path: &Path) -> std::result::Result<String, String> {
    // pdf-extract panics on some malformed documents instead of returning an error
    let content = panic::catch_unwind(|| extract_text(path))
        .map_err(|payload| format!("PDF extractor panicked: {}", panic_message(&*payload)))?
        .map_err(|e| e.to_string())?;

    // PDF extraction can sometimes include excessive whitespace
    let cleaned = normalize_whitespace(&content);
    if cleaned.is_empty() {
        warn!("Extracted PDF content of {} is empty", path.display());
    }
    Ok(cleaned)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown cause"
    }
}

fn load_json_records(raw: &str, file_name: &str, mapping: &JsonMapping, outcome: &mut LoadOutcome) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => return record_failure(outcome, file_name.to_string(), e.to_string()),
    };

    let records = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    for (idx, record) in records.iter().enumerate() {
        let Some(content) = lookup(record, &mapping.content_field).and_then(Value::as_str) else {
            record_failure(
                outcome,
                format!("{}[{}]", file_name, idx),
                format!("missing string field '{}'", mapping.content_field),
            );
            continue;
        };

        let source = match lookup(record, &mapping.source_field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => file_name.to_string(),
            Some(other) => other.to_string(),
        };

        outcome.documents.push(RawDocument {
            content: content.to_string(),
            source,
        });
    }
}

/// Resolve a dotted path such as `metadata.source` inside a JSON value
fn lookup<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .filter(|part| !part.is_empty())
        .try_fold(value, |current, part| current.get(part))
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    // Replace multiple consecutive newlines with double newlines (paragraph separator)
    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
            continue;
        }

        if newline_count > 0 {
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
        }

        // Don't add consecutive spaces
        if !(c == ' ' && prev_char == ' ') {
            normalized.push(c);
        }
        prev_char = c;
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = load_directory(&missing, &JsonMapping::default()).unwrap_err();
        assert!(matches!(err, Error::DirectoryNotFound(p) if p == missing));
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let dir = tempdir().unwrap();
        let outcome = load_directory(dir.path(), &JsonMapping::default()).unwrap();
        assert!(outcome.documents.is_empty());
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_text_and_markdown_in_name_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "# Leases\nIFRS 16").unwrap();
        fs::write(dir.path().join("a.txt"), "plain notes").unwrap();

        let outcome = load_directory(dir.path(), &JsonMapping::default()).unwrap();

        assert_eq!(
            outcome.documents,
            vec![
                RawDocument {
                    content: "plain notes".to_string(),
                    source: "a.txt".to_string(),
                },
                RawDocument {
                    content: "# Leases\nIFRS 16".to_string(),
                    source: "b.md".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_unsupported_file_is_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "kept").unwrap();
        fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let outcome = load_directory(dir.path(), &JsonMapping::default()).unwrap();

        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(matches!(
            &outcome.skipped[0],
            Error::UnsupportedFileType { file, .. } if file == "image.png"
        ));
    }

    #[test]
    fn test_broken_pdf_does_not_abort_scan() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.pdf"), b"not a pdf at all").unwrap();
        fs::write(dir.path().join("ok.txt"), "still loaded").unwrap();

        let outcome = load_directory(dir.path(), &JsonMapping::default()).unwrap();

        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.documents[0].source, "ok.txt");
        assert!(matches!(
            &outcome.skipped[0],
            Error::ExtractionFailure { file, .. } if file == "broken.pdf"
        ));
    }

    /// A PDF that parses but selects a font its page never declares
    fn write_pdf_with_undeclared_font(path: &Path) {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F9".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal("Missing font")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn test_pdf_extractor_panic_is_reported() {
        let dir = tempdir().unwrap();
        write_pdf_with_undeclared_font(&dir.path().join("a_bad.pdf"));
        fs::write(dir.path().join("b_ok.txt"), "loaded after the bad PDF").unwrap();

        let outcome = load_directory(dir.path(), &JsonMapping::default()).unwrap();

        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.documents[0].source, "b_ok.txt");
        assert_eq!(outcome.skipped.len(), 1);
        assert!(matches!(
            &outcome.skipped[0],
            Error::ExtractionFailure { file, .. } if file == "a_bad.pdf"
        ));
    }

    #[test]
    fn test_json_records_with_nested_source() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("faq.json"),
            r#"[
                {"text": "Leases are capitalized.", "metadata": {"source": "ifrs16"}},
                {"text": "Revenue follows control.", "metadata": {}},
                {"metadata": {"source": "orphan"}}
            ]"#,
        )
        .unwrap();
        let mapping = JsonMapping {
            content_field: "text".to_string(),
            source_field: "metadata.source".to_string(),
        };

        let outcome = load_directory(dir.path(), &mapping).unwrap();

        assert_eq!(outcome.documents.len(), 2);
        assert_eq!(outcome.documents[0].source, "ifrs16");
        assert_eq!(outcome.documents[1].source, "faq.json");
        assert!(matches!(
            &outcome.skipped[0],
            Error::ExtractionFailure { file, .. } if file == "faq.json[2]"
        ));
    }

    #[test]
    fn test_json_single_object() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("one.json"),
            r#"{"content": "single record", "source": "memo"}"#,
        )
        .unwrap();

        let outcome = load_directory(dir.path(), &JsonMapping::default()).unwrap();

        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.documents[0].content, "single record");
        assert_eq!(outcome.documents[0].source, "memo");
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{ nope").unwrap();

        let outcome = load_directory(dir.path(), &JsonMapping::default()).unwrap();

        assert!(outcome.documents.is_empty());
        assert!(matches!(&outcome.skipped[0], Error::ExtractionFailure { .. }));
    }
}
