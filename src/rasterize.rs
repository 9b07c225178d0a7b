// src/rasterize.rs

use crate::config::OcrSection;
use crate::document::SourceDocument;
use crate::error::OcrError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{info, warn};

/// Per-document scratch directory holding the page images OCR reads.
///
/// The directory and everything in it are removed when this value is
/// dropped, so success, error, and cancellation all clean up.
pub struct PageImages {
    dir: TempDir,
    pages: Vec<PathBuf>,
}

impl PageImages {
    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now and report failures, instead of the silent
    /// removal on drop.
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(dir = %path.display(), error = %e, "Failed to remove page images");
        }
    }
}

/// Create the scoped directory for one document.
pub fn scratch_dir(cfg: &OcrSection, document: &SourceDocument) -> Result<TempDir, OcrError> {
    let prefix = format!("invoice-{}-", document.id());
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    let dir = match &cfg.temp_dir {
        Some(base) => builder.tempdir_in(base)?,
        None => builder.tempdir()?,
    };
    Ok(dir)
}

/// Produce one image per page. PDFs are rendered with `pdftoppm` at the
/// configured DPI; images are written as-is as the single page.
pub async fn page_images(cfg: &OcrSection, document: &SourceDocument) -> Result<PageImages, OcrError> {
    let dir = scratch_dir(cfg, document)?;

    let source = dir
        .path()
        .join(format!("source.{}", document.kind().extension()));
    tokio::fs::write(&source, document.bytes()).await?;

    if !document.kind().is_pdf() {
        return Ok(PageImages {
            dir,
            pages: vec![source],
        });
    }

    let dpi = cfg.effective_dpi();
    let prefix = dir.path().join("page");
    let output = Command::new(&cfg.pdftoppm_path)
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-png")
        .arg(&source)
        .arg(&prefix)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| OcrError::NotAvailable(format!("{}: {e}", cfg.pdftoppm_path)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OcrError::Rasterize(format!("pdftoppm failed: {}", stderr.trim())));
    }

    let pages = collect_pages(dir.path()).await?;
    info!(pages = pages.len(), dpi, "Rendered PDF pages for OCR");
    Ok(PageImages { dir, pages })
}

/// `pdftoppm` names pages `page-1.png` or `page-01.png` depending on the page
/// count, so order by the parsed number rather than by name.
async fn collect_pages(dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
    let mut numbered = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(n) = page_number(&path) {
            numbered.push((n, path));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

fn page_number(path: &Path) -> Option<u32> {
    if path.extension()?.to_str()? != "png" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix("page-")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_number_parsing() {
        assert_eq!(page_number(Path::new("/t/page-1.png")), Some(1));
        assert_eq!(page_number(Path::new("/t/page-012.png")), Some(12));
        assert_eq!(page_number(Path::new("/t/source.pdf")), None);
        assert_eq!(page_number(Path::new("/t/page-x.png")), None);
    }

    #[tokio::test]
    async fn test_collect_pages_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page-10.png", "page-2.png", "page-1.png", "source.pdf"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pages = collect_pages(dir.path()).await.unwrap();
        let names: Vec<_> = pages
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page-1.png", "page-2.png", "page-10.png"]);
    }

    #[tokio::test]
    async fn test_image_input_is_single_page_and_cleaned_up() {
        let base = tempfile::tempdir().unwrap();
        let cfg = OcrSection {
            temp_dir: Some(base.path().to_path_buf()),
            ..Default::default()
        };
        let doc = SourceDocument::from_bytes(b"\x89PNG\r\n\x1a\nfake".to_vec(), None).unwrap();

        let images = page_images(&cfg, &doc).await.unwrap();
        assert_eq!(images.pages().len(), 1);
        assert!(images.pages()[0].exists());
        let dir = images.dir().to_path_buf();
        assert!(dir.starts_with(base.path()));

        images.cleanup();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_dropped_images_are_removed() {
        let base = tempfile::tempdir().unwrap();
        let cfg = OcrSection {
            temp_dir: Some(base.path().to_path_buf()),
            ..Default::default()
        };
        let doc = SourceDocument::from_bytes(b"\xFF\xD8\xFFjpeg".to_vec(), None).unwrap();
        let dir = {
            let images = page_images(&cfg, &doc).await.unwrap();
            images.dir().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_missing_pdftoppm_cleans_up() {
        let base = tempfile::tempdir().unwrap();
        let cfg = OcrSection {
            temp_dir: Some(base.path().to_path_buf()),
            pdftoppm_path: "/nonexistent/pdftoppm".to_string(),
            ..Default::default()
        };
        let bytes = crate::document::tests::make_pdf(&[&["x"]]);
        let doc = SourceDocument::from_bytes(bytes, None).unwrap();

        let err = match page_images(&cfg, &doc).await {
            Err(e) => e,
            Ok(_) => panic!("expected failure"),
        };
        assert!(matches!(err, OcrError::NotAvailable(_)));
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }
}
