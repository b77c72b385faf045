use serde::Serialize;
use tracing::debug;

use super::blocks::{ClusteredBlock, LineItem};
use super::headings::HeadingLevelMap;

pub const NO_HEADER_TITLE: &str = "**no_header**";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocEntry {
    pub page: u32,
    pub text: String,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionRecord {
    #[serde(skip)]
    pub order_key: f64,
    pub title: String,
    pub page_nos: Vec<u32>,
    pub content: String,
}

impl SectionRecord {
    pub fn touches_page(&self, page: u32) -> bool {
        self.page_nos.contains(&page)
    }
}

/// Body blocks exploded into non-blank lines, document order.
pub fn explode_lines(blocks: &[ClusteredBlock]) -> Vec<LineItem> {
    blocks
        .iter()
        .filter(|b| !b.is_noise())
        .flat_map(|b| {
            b.block
                .lines
                .iter()
                .filter(|l| !l.text.trim().is_empty())
                .map(|l| LineItem {
                    text: l.text.clone(),
                    page: b.block.page,
                    marker: l.marker.clone(),
                    cluster: b.cluster,
                })
        })
        .collect()
}

pub fn build_toc(items: &[LineItem], levels: &HeadingLevelMap) -> Vec<TocEntry> {
    items
        .iter()
        .filter_map(|item| {
            let level = levels.level(item.marker.as_deref())?;
            Some(TocEntry {
                page: item.page,
                text: item.text.trim().to_string(),
                level,
            })
        })
        .collect()
}

/// Split lines into runs that each start at a mapped heading. Lines before the
/// first heading form a [`NO_HEADER_TITLE`] run. The heading line gives the
/// title and its page; the content is the lines under it.
pub fn group_by_heading(items: &[LineItem], levels: &HeadingLevelMap) -> Vec<SectionRecord> {
    let mut sections: Vec<SectionRecord> = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_pages: Vec<u32> = Vec::new();
    let mut current_lines: Vec<&str> = Vec::new();

    for item in items {
        if levels.level(item.marker.as_deref()).is_some() {
            if current_title.is_some() || !current_lines.is_empty() {
                sections.push(finish_run(
                    sections.len(),
                    current_title.take(),
                    std::mem::take(&mut current_pages),
                    std::mem::take(&mut current_lines),
                ));
            }
            current_title = Some(item.text.trim().to_string());
            push_page(&mut current_pages, item.page);
            continue;
        }
        push_page(&mut current_pages, item.page);
        current_lines.push(&item.text);
    }

    if current_title.is_some() || !current_lines.is_empty() {
        sections.push(finish_run(
            sections.len(),
            current_title,
            current_pages,
            current_lines,
        ));
    }

    sections
}

fn finish_run(
    position: usize,
    title: Option<String>,
    page_nos: Vec<u32>,
    lines: Vec<&str>,
) -> SectionRecord {
    SectionRecord {
        order_key: position as f64,
        title: title.unwrap_or_else(|| NO_HEADER_TITLE.to_string()),
        page_nos,
        content: lines.join("\n"),
    }
}

fn push_page(pages: &mut Vec<u32>, page: u32) {
    if !pages.contains(&page) {
        pages.push(page);
    }
}

/// One section per page of body text, titled `Page: <n>`. Used when the
/// document has no usable headings.
pub fn group_by_page(blocks: &[ClusteredBlock]) -> Vec<SectionRecord> {
    let mut pages: Vec<(u32, Vec<&str>)> = Vec::new();
    for b in blocks.iter().filter(|b| !b.is_noise()) {
        match pages.last_mut() {
            Some((page, lines)) if *page == b.block.page => lines.extend(b.block.texts()),
            _ => pages.push((b.block.page, b.block.texts().collect())),
        }
    }

    pages
        .into_iter()
        .filter(|(_, lines)| lines.iter().any(|l| !l.trim().is_empty()))
        .enumerate()
        .map(|(i, (page, lines))| SectionRecord {
            order_key: i as f64,
            title: format!("Page: {}", page),
            page_nos: vec![page],
            content: lines.join("\n"),
        })
        .collect()
}

/// TOC plus ordered sections for the clustered document.
pub fn build_sections(
    blocks: &[ClusteredBlock],
    process_headings: bool,
) -> (Vec<TocEntry>, Vec<SectionRecord>) {
    if process_headings {
        let items = explode_lines(blocks);
        let levels = HeadingLevelMap::from_line_items(&items);
        if !levels.is_empty() {
            debug!("{} heading levels", levels.len());
            let toc = build_toc(&items, &levels);
            let sections = group_by_heading(&items, &levels);
            return (toc, sections);
        }
    }
    (Vec::new(), group_by_page(blocks))
}
