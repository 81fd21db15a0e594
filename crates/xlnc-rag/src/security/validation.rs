//! Upload checks run before any job exists: size, extension, magic number

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::types::ContentKind;

const PDF_MAGIC: &[u8] = b"%PDF";
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGICS: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

pub struct UploadValidator {
    max_file_size: u64,
    allowed_extensions: Vec<String>,
}

impl UploadValidator {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Validate an upload and resolve its extraction family from the extension
    pub fn validate(&self, filename: &str, data: &[u8]) -> Result<ContentKind> {
        if data.is_empty() {
            return Err(Error::Validation("No file provided".into()));
        }

        if data.len() as u64 > self.max_file_size {
            return Err(Error::Validation(format!(
                "File size exceeds maximum allowed size of {}MB",
                self.max_file_size / (1024 * 1024)
            )));
        }

        let extension = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if extension.is_empty() || !self.allowed_extensions.contains(&extension) {
            return Err(Error::Validation(format!(
                "File type .{} is not allowed",
                extension
            )));
        }

        if !signature_matches(&extension, data) {
            return Err(Error::Validation(
                "File content does not match its extension".into(),
            ));
        }

        let kind = ContentKind::from_extension(&extension);
        if !kind.is_supported() {
            return Err(Error::UnsupportedContentType(extension));
        }
        Ok(kind)
    }
}

/// Whether the leading bytes fit the extension. Unknown extensions pass.
pub fn signature_matches(extension: &str, data: &[u8]) -> bool {
    match extension {
        "pdf" => data.starts_with(PDF_MAGIC),
        "doc" => data.starts_with(OLE2_MAGIC),
        "docx" => ZIP_MAGICS.iter().any(|magic| data.starts_with(magic)),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> UploadValidator {
        UploadValidator::new(&UploadConfig {
            max_file_size: 1024,
            ..UploadConfig::default()
        })
    }

    #[test]
    fn test_accepts_matching_signatures() {
        let v = validator();
        assert_eq!(v.validate("a.pdf", b"%PDF-1.7 ...").unwrap(), ContentKind::Pdf);
        assert_eq!(
            v.validate("a.DOCX", b"PK\x03\x04rest").unwrap(),
            ContentKind::ModernWordProcessing
        );
        let mut ole = OLE2_MAGIC.to_vec();
        ole.extend_from_slice(b"body");
        assert_eq!(v.validate("a.doc", &ole).unwrap(), ContentKind::LegacyWordProcessing);
    }

    #[test]
    fn test_rejects_mismatched_signature() {
        let err = validator().validate("a.pdf", b"PK\x03\x04").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_rejects_extension_and_size() {
        let v = validator();
        assert!(matches!(v.validate("a.exe", b"MZ"), Err(Error::Validation(_))));
        assert!(matches!(v.validate("noext", b"%PDF"), Err(Error::Validation(_))));
        assert!(matches!(v.validate("a.pdf", b""), Err(Error::Validation(_))));

        let big = vec![b'%'; 2048];
        assert!(matches!(v.validate("a.pdf", &big), Err(Error::Validation(_))));
    }
}
