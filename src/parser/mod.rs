pub mod blocks;
pub mod cluster;
pub mod headings;
pub mod sections;
pub mod tables;

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::PipelineError;
use blocks::{ClusteredBlock, Document, Rect};
use cluster::{Dbscan, NoiseClusterer};
use sections::{SectionRecord, TocEntry};

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub extract_tables: bool,
    pub process_headings: bool,
    pub dbscan: Dbscan,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            extract_tables: true,
            process_headings: true,
            dbscan: Dbscan::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageTables {
    pub page: u32,
    pub tables: Vec<String>,
}

/// The structured result handed back to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub document_name: String,
    pub local_doc_path: String,
    pub table_of_contents: Vec<TocEntry>,
    pub tables: Vec<PageTables>,
    pub sections: Vec<SectionRecord>,
}

/// One clustered block as it appears in the raw dump.
#[derive(Debug, Clone, Serialize)]
pub struct RawBlockRow {
    pub bbox: Rect,
    pub text_lst: Vec<String>,
    pub pg_blk: String,
    pub page: u32,
    pub header_tag: Vec<Option<String>>,
    pub cluster: u8,
    pub header_footer: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawDocument {
    pub document_name: String,
    pub local_doc_path: String,
    pub sections: Vec<RawBlockRow>,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub raw: RawDocument,
    pub processed: ProcessedDocument,
}

/// blocks → body/noise → sections + TOC → tables merged in.
pub fn process_document(doc: Document, local_doc_path: &str, opts: &PipelineOptions) -> Extraction {
    let table_list = if opts.extract_tables {
        doc.tables()
    } else {
        Vec::new()
    };
    let page_tables: Vec<PageTables> = if opts.extract_tables {
        doc.page_tables
            .iter()
            .map(|(page, tables)| PageTables {
                page: *page,
                tables: tables.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    let clustered = NoiseClusterer::new(opts.dbscan).cluster(doc.blocks);
    let (toc, sections) = sections::build_sections(&clustered, opts.process_headings);
    debug!(
        "{}: {} toc entries, {} sections, {} tables",
        doc.name,
        toc.len(),
        sections.len(),
        table_list.len()
    );
    let sections = tables::merge_tables(sections, &table_list);

    let raw = RawDocument {
        document_name: doc.name.clone(),
        local_doc_path: local_doc_path.to_string(),
        sections: clustered.iter().map(raw_row).collect(),
    };
    let processed = ProcessedDocument {
        document_name: doc.name,
        local_doc_path: local_doc_path.to_string(),
        table_of_contents: toc,
        tables: page_tables,
        sections,
    };

    Extraction { raw, processed }
}

fn raw_row(b: &ClusteredBlock) -> RawBlockRow {
    RawBlockRow {
        bbox: b.block.rect,
        text_lst: b.block.texts().map(str::to_string).collect(),
        pg_blk: b.block.page_block_id(),
        page: b.block.page,
        header_tag: b.block.lines.iter().map(|l| l.marker.clone()).collect(),
        cluster: b.cluster,
        header_footer: b.is_noise(),
    }
}

/// Load a decoder document from disk and run the whole pipeline on it.
pub fn extract_file(path: &Path, opts: &PipelineOptions) -> Result<Extraction, PipelineError> {
    let doc = blocks::load_document(path)?;
    let local = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Ok(process_document(doc, &local.to_string_lossy(), opts))
}
