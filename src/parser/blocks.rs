use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ── Input shape (produced by the PDF decoder) ──

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInput {
    #[serde(default)]
    pub document_name: Option<String>,
    pub pages: Vec<PageInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageInput {
    pub page: u32,
    #[serde(default)]
    pub blocks: Vec<BlockInput>,
    #[serde(default)]
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockInput {
    pub bbox: [f64; 4],
    pub number: u32,
    #[serde(default)]
    pub header: Option<String>,
    pub lines: Vec<LineInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineInput {
    pub text: String,
    #[serde(default)]
    pub header: Option<String>,
}

// ── Normalized model ──

/// Bounding box `(x0, y0, x1, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect(pub f64, pub f64, pub f64, pub f64);

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    /// Line-level marker if the decoder gave one, else the block's marker.
    pub marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub rect: Rect,
    pub page: u32,
    pub block_index: u32,
    pub lines: Vec<TextLine>,
    pub heading_marker: Option<String>,
}

impl TextBlock {
    pub fn from_input(page: u32, input: BlockInput) -> Result<Self, PipelineError> {
        let [x0, y0, x1, y1] = input.bbox;
        if !input.bbox.iter().all(|v| v.is_finite()) {
            return Err(PipelineError::input(format!(
                "block {}.{} has a non-finite bbox",
                page, input.number
            )));
        }

        let heading_marker = normalize_marker(input.header);
        let lines = input
            .lines
            .into_iter()
            .map(|l| TextLine {
                text: l.text,
                marker: normalize_marker(l.header).or_else(|| heading_marker.clone()),
            })
            .collect();

        Ok(TextBlock {
            rect: Rect(x0, y0, x1, y1),
            page,
            block_index: input.number,
            lines,
            heading_marker,
        })
    }

    /// Character count of all lines joined with `\n`, plus a trailing newline.
    pub fn text_length(&self) -> usize {
        let chars: usize = self.lines.iter().map(|l| l.text.chars().count()).sum();
        chars + self.lines.len().saturating_sub(1) + 1
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|l| l.text.as_str())
    }

    /// `"<page>.<block>"`, the block's identity in raw output.
    pub fn page_block_id(&self) -> String {
        format!("{}.{}", self.page, self.block_index)
    }
}

fn normalize_marker(marker: Option<String>) -> Option<String> {
    marker
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}

pub const BODY_CLUSTER: u8 = 0;
pub const NOISE_CLUSTER: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusteredBlock {
    pub block: TextBlock,
    pub cluster: u8,
}

impl ClusteredBlock {
    pub fn is_noise(&self) -> bool {
        self.cluster != BODY_CLUSTER
    }
}

/// One non-blank body line, detached from its block.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub text: String,
    pub page: u32,
    pub marker: Option<String>,
    pub cluster: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawTable {
    pub page: u32,
    pub markdown: String,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub blocks: Vec<TextBlock>,
    /// Every page in order with its raw tables, empty pages included.
    pub page_tables: Vec<(u32, Vec<String>)>,
}

impl Document {
    pub fn from_input(input: DocumentInput, fallback_name: &str) -> Result<Self, PipelineError> {
        let name = input
            .document_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name.to_string());

        let mut pages = input.pages;
        pages.sort_by_key(|p| p.page);

        let mut seen_pages = HashSet::new();
        let mut seen_blocks = HashSet::new();
        let mut blocks = Vec::new();
        let mut page_tables = Vec::with_capacity(pages.len());

        for page in pages {
            if page.page == 0 {
                return Err(PipelineError::input("page numbers start at 1"));
            }
            if !seen_pages.insert(page.page) {
                return Err(PipelineError::input(format!("page {} appears twice", page.page)));
            }
            for block in page.blocks {
                if !seen_blocks.insert((page.page, block.number)) {
                    return Err(PipelineError::input(format!(
                        "block {}.{} appears twice",
                        page.page, block.number
                    )));
                }
                blocks.push(TextBlock::from_input(page.page, block)?);
            }
            page_tables.push((page.page, page.tables));
        }

        Ok(Document {
            name,
            blocks,
            page_tables,
        })
    }

    /// Non-blank tables in page order.
    pub fn tables(&self) -> Vec<RawTable> {
        self.page_tables
            .iter()
            .flat_map(|(page, tables)| {
                tables
                    .iter()
                    .filter(|t| !t.trim().is_empty())
                    .map(|t| RawTable {
                        page: *page,
                        markdown: t.clone(),
                    })
            })
            .collect()
    }
}

/// Read and validate a decoder JSON document.
pub fn load_document(path: &Path) -> Result<Document, PipelineError> {
    let raw = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let input: DocumentInput = serde_json::from_str(&raw).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let fallback = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Document::from_input(input, &fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(lines: &[&str]) -> TextBlock {
        TextBlock {
            rect: Rect(0.0, 0.0, 10.0, 10.0),
            page: 1,
            block_index: 0,
            lines: lines
                .iter()
                .map(|t| TextLine {
                    text: t.to_string(),
                    marker: None,
                })
                .collect(),
            heading_marker: None,
        }
    }

    #[test]
    fn text_length_counts_separators_and_trailing_newline() {
        assert_eq!(block(&["ab", "cde"]).text_length(), 7);
        assert_eq!(block(&["é"]).text_length(), 2);
        assert_eq!(block(&[]).text_length(), 1);
    }

    #[test]
    fn line_marker_falls_back_to_block_marker() {
        let input: BlockInput = serde_json::from_str(
            r###"{"bbox":[1,2,3,4],"number":7,"header":"## ",
                "lines":[{"text":"a"},{"text":"b","header":"# "},{"text":"c","header":"  "}]}"###,
        )
        .unwrap();
        let b = TextBlock::from_input(3, input).unwrap();
        let markers: Vec<_> = b.lines.iter().map(|l| l.marker.as_deref()).collect();
        assert_eq!(markers, vec![Some("##"), Some("#"), Some("##")]);
        assert_eq!(b.page_block_id(), "3.7");
    }

    #[test]
    fn missing_lines_is_rejected() {
        let err = serde_json::from_str::<BlockInput>(r#"{"bbox":[1,2,3,4],"number":0}"#);
        assert!(err.is_err());
    }

    #[test]
    fn duplicate_block_is_input_error() {
        let input: DocumentInput = serde_json::from_str(
            r#"{"pages":[{"page":1,"blocks":[
                {"bbox":[0,0,1,1],"number":0,"lines":[]},
                {"bbox":[0,0,1,1],"number":0,"lines":[]}]}]}"#,
        )
        .unwrap();
        let err = Document::from_input(input, "x.json").unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[test]
    fn pages_sorted_and_blank_tables_skipped() {
        let input: DocumentInput = serde_json::from_str(
            r#"{"pages":[
                {"page":2,"tables":["| a |","  "]},
                {"page":1,"tables":[]}]}"#,
        )
        .unwrap();
        let doc = Document::from_input(input, "report.json").unwrap();
        assert_eq!(doc.name, "report.json");
        assert_eq!(doc.page_tables[0].0, 1);
        let tables = doc.tables();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].page, 2);
    }

    #[test]
    fn load_fixture() {
        let doc = load_document(Path::new("tests/fixtures/intro.json")).unwrap();
        assert_eq!(doc.name, "intro.pdf");
        assert!(!doc.blocks.is_empty());
    }
}
