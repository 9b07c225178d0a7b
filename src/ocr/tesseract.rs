// src/ocr/tesseract.rs

use super::{BoundingBox, EngineFactory, OcrEngine, OcrLine, OcrOutput, OcrWord, PageSegMode};
use crate::config::OcrSection;
use crate::error::OcrError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// stderr fragments that mean the engine itself is in a bad state rather
/// than the image being unreadable.
const TRANSIENT_MARKERS: &[&str] = &[
    "could not set",
    "parameter",
    "segmentation fault",
    "corrupt",
    "assert",
];

/// Starts tesseract engines after checking the binary and language data.
pub struct TesseractFactory {
    binary: String,
    language: String,
}

impl TesseractFactory {
    pub fn new(binary: &str, language: &str) -> Self {
        Self {
            binary: binary.to_string(),
            language: language.to_string(),
        }
    }

    pub fn from_config(cfg: &OcrSection) -> Self {
        Self::new(&cfg.tesseract_path, &cfg.language)
    }
}

#[async_trait]
impl EngineFactory for TesseractFactory {
    async fn create(&self) -> Result<Arc<dyn OcrEngine>, OcrError> {
        let version = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| OcrError::NotAvailable(format!("{}: {e}", self.binary)))?;
        // Older builds print the version banner on stderr.
        let banner = String::from_utf8_lossy(if version.stdout.is_empty() {
            &version.stderr
        } else {
            &version.stdout
        })
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();

        let langs = Command::new(&self.binary)
            .arg("--list-langs")
            .output()
            .await
            .map_err(|e| OcrError::NotAvailable(format!("{}: {e}", self.binary)))?;
        let installed = String::from_utf8_lossy(&langs.stdout).into_owned();
        let installed: Vec<&str> = installed.lines().skip(1).map(str::trim).collect();
        for wanted in self.language.split('+') {
            if !installed.contains(&wanted) {
                return Err(OcrError::NotAvailable(format!(
                    "language pack '{wanted}' not installed"
                )));
            }
        }

        info!(version = %banner, language = %self.language, "Tesseract engine initialized");
        Ok(Arc::new(TesseractEngine {
            binary: self.binary.clone(),
            language: self.language.clone(),
        }))
    }
}

/// One configured tesseract binary + language.
pub struct TesseractEngine {
    binary: String,
    language: String,
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &Path, mode: PageSegMode) -> Result<OcrOutput, OcrError> {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(mode.psm().to_string())
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await?;

        check_status(&output)?;
        let tsv = String::from_utf8_lossy(&output.stdout);
        let result = parse_tsv(&tsv);
        debug!(
            psm = mode.psm(),
            words = result.words.len(),
            confidence = result.confidence,
            "Tesseract pass finished"
        );
        Ok(result)
    }
}

fn check_status(output: &Output) -> Result<(), OcrError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    // Killed by a signal: the process state is gone, worth a fresh start.
    if output.status.code().is_none() {
        return Err(OcrError::Transient(format!("tesseract terminated: {stderr}")));
    }
    let lower = stderr.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        Err(OcrError::Transient(stderr))
    } else {
        Err(OcrError::Failed(stderr))
    }
}

/// Rebuild words and lines from tesseract's TSV output.
pub(crate) fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut words = Vec::new();
    // (page, block, paragraph, line) -> word indices, in reading order
    let mut line_map: BTreeMap<(u32, u32, u32, u32), Vec<usize>> = BTreeMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        let Ok(conf) = cols[10].trim().parse::<f64>() else {
            continue;
        };
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let key = (num(1), num(2), num(3), num(4));
        line_map.entry(key).or_default().push(words.len());
        words.push(OcrWord {
            text: text.to_string(),
            confidence: conf.clamp(0.0, 100.0),
            bounds: BoundingBox {
                left: num(6),
                top: num(7),
                width: num(8),
                height: num(9),
            },
        });
    }

    let lines: Vec<OcrLine> = line_map
        .values()
        .map(|idx| OcrLine {
            text: idx
                .iter()
                .map(|&i| words[i].text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            confidence: mean(idx.iter().map(|&i| words[i].confidence)),
        })
        .collect();

    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let confidence = mean(words.iter().map(|w| w.confidence));

    OcrOutput {
        text,
        confidence,
        words,
        lines,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_tsv_groups_lines() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t\n\
             4\t1\t1\t1\t1\t0\t10\t10\t300\t20\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t10\t80\t20\t96.5\tInvoice\n\
             5\t1\t1\t1\t1\t2\t95\t10\t90\t20\t91\t#INV-7\n\
             5\t1\t1\t1\t2\t1\t10\t40\t60\t20\t88.0\tTotal\n\
             5\t1\t1\t1\t2\t2\t75\t40\t60\t20\t-1\t \n\
             5\t1\t1\t1\t2\t3\t140\t40\t60\t20\t84\t54.00\n"
        );
        let out = parse_tsv(&tsv);
        assert_eq!(out.text, "Invoice #INV-7\nTotal 54.00");
        assert_eq!(out.words.len(), 4);
        assert_eq!(out.lines.len(), 2);
        assert!((out.confidence - 89.875).abs() < 1e-9);
        assert_eq!(out.words[1].bounds.left, 95);
    }

    #[test]
    fn test_parse_tsv_empty_page() {
        let tsv = format!("{HEADER}\n1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t\n");
        let out = parse_tsv(&tsv);
        assert!(out.text.is_empty());
        assert_eq!(out.confidence, 0.0);
        assert!(out.lines.is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_available() {
        let factory = TesseractFactory::new("/nonexistent/tesseract-binary", "eng");
        let err = match factory.create().await {
            Err(e) => e,
            Ok(_) => panic!("expected failure"),
        };
        assert!(matches!(err, OcrError::NotAvailable(_)));
    }
}
