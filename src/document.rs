use crate::error::WiError;
use crate::logw;
use crate::parser::{Step, is_procedure_line, is_step_detail, is_table_line};
use crate::registry::StepRegistry;
use crate::timestamp::Timestamp;
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGE_WIDTH_INCHES: f32 = 6.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Title(String),
    Heading { level: u8, text: String },
    Paragraph(String),
    Image {
        path: PathBuf,
        width_inches: f32,
        caption: String,
    },
}

/// Writer-agnostic document: an ordered list of heading, paragraph and image blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn images(&self) -> impl Iterator<Item = &Path> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Image { path, .. } => Some(path.as_path()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub title: String,
    pub image_width_inches: f32,
    /// Heading used when the draft has no procedure section to anchor the steps.
    pub procedure_heading: String,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            title: "Work Instructions".to_string(),
            image_width_inches: DEFAULT_IMAGE_WIDTH_INCHES,
            procedure_heading: "Procedure".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Assembly {
    pub document: Document,
    /// Steps emitted text-only because their image was never produced or is gone.
    pub missing_images: Vec<Timestamp>,
}

impl Assembly {
    pub fn is_partial(&self) -> bool {
        !self.missing_images.is_empty()
    }

    pub fn warning(&self) -> Option<WiError> {
        self.is_partial().then(|| WiError::AssemblyPartial {
            missing: self.missing_images.clone(),
        })
    }
}

fn markdown_heading_regex() -> Result<&'static Regex> {
    static HEADING_RE: OnceCell<Regex> = OnceCell::new();
    HEADING_RE.get_or_try_init(|| {
        Regex::new(r"^(#{1,6})\s+(.+?)\s*#*$").context("failed to compile heading regex")
    })
}

fn bold_heading_regex() -> Result<&'static Regex> {
    static BOLD_RE: OnceCell<Regex> = OnceCell::new();
    BOLD_RE.get_or_try_init(|| {
        Regex::new(r"^\*\*([^*]+?)\*\*:?$").context("failed to compile bold heading regex")
    })
}

fn blank_line_regex() -> Result<&'static Regex> {
    static BLANK_RE: OnceCell<Regex> = OnceCell::new();
    BLANK_RE.get_or_try_init(|| {
        Regex::new(r"\n[ \t]*\n").context("failed to compile block separator regex")
    })
}

/// Recognized section-header shapes: `# Title`, `**Title**`, and short `Title:` lines.
fn section_heading(line: &str) -> Option<(u8, String)> {
    let line = line.trim();
    if let Some(cap) = markdown_heading_regex().ok()?.captures(line) {
        let level = cap[1].len().min(3) as u8;
        let text = cap[2].trim_matches('*').trim().to_string();
        return Some((level, text));
    }
    if let Some(cap) = bold_heading_regex().ok()?.captures(line) {
        return Some((2, cap[1].trim().trim_end_matches(':').to_string()));
    }
    if line.len() <= 60 && !line.contains('|') {
        if let Some(text) = line.strip_suffix(':') {
            let first = text.chars().next()?;
            if first.is_uppercase() && !text.contains(['.', '[']) {
                return Some((2, text.trim().to_string()));
            }
        }
    }
    None
}

fn split_blocks(draft: &str) -> Vec<String> {
    let normalized = draft.replace("\r\n", "\n");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match blank_line_regex() {
        Ok(re) => re.split(trimmed).map(str::to_string).collect(),
        Err(err) => {
            logw(format!("Block split fallback: {}", err));
            trimmed.split("\n\n").map(str::to_string).collect()
        }
    }
}

fn push_step_group(
    doc: &mut Document,
    missing: &mut Vec<Timestamp>,
    number: usize,
    step: &Step,
    opts: &AssembleOptions,
) {
    doc.push(Block::Heading {
        level: 3,
        text: format!("Step {} [{}]", number, step.timestamp),
    });
    if !step.label_text.trim().is_empty() {
        doc.push(Block::Paragraph(step.label_text.clone()));
    }
    for detail in &step.details {
        doc.push(Block::Paragraph(detail.clone()));
    }
    if let Some(hazard) = &step.hazard_text {
        doc.push(Block::Paragraph(format!("Hazard: {}", hazard)));
    }

    match step.image().filter(|p| p.is_file()) {
        Some(path) => doc.push(Block::Image {
            path: path.to_path_buf(),
            width_inches: opts.image_width_inches,
            caption: format!("Frame at {}", step.timestamp),
        }),
        None => missing.push(step.timestamp),
    }
}

fn push_steps(
    doc: &mut Document,
    missing: &mut Vec<Timestamp>,
    registry: &StepRegistry,
    opts: &AssembleOptions,
) {
    for (i, step) in registry.iter().enumerate() {
        push_step_group(doc, missing, i + 1, step, opts);
    }
}

pub fn assemble(draft: &str, registry: &StepRegistry) -> Assembly {
    assemble_with(draft, registry, &AssembleOptions::default())
}

/// Builds the export document. Prose blocks pass through as heading and paragraph
/// blocks; the procedure section is replaced by the registry's current steps.
pub fn assemble_with(draft: &str, registry: &StepRegistry, opts: &AssembleOptions) -> Assembly {
    let mut doc = Document::default();
    let mut missing = Vec::new();
    let mut steps_emitted = false;

    doc.push(Block::Title(opts.title.clone()));

    for block in split_blocks(draft) {
        let lines: Vec<&str> = block
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .collect();
        if lines.is_empty() {
            continue;
        }

        let procedure_table = lines
            .iter()
            .any(|l| is_table_line(l) && is_procedure_line(l));
        let is_procedure = |line: &str| {
            is_procedure_line(line) || (procedure_table && is_table_line(line))
        };

        let mut body = &lines[..];
        if !is_procedure(lines[0]) {
            if let Some((level, text)) = section_heading(lines[0]) {
                doc.push(Block::Heading { level, text });
                body = &lines[1..];
            }
        }

        // detail lines under a marker line travel with their step
        let mut under_step = false;
        for &line in body {
            if is_procedure(line) {
                if !steps_emitted {
                    push_steps(&mut doc, &mut missing, registry, opts);
                    steps_emitted = true;
                }
                under_step = !is_table_line(line);
                continue;
            }
            if under_step && is_step_detail(line) {
                continue;
            }
            under_step = false;
            doc.push(Block::Paragraph(line.to_string()));
        }
    }

    if !steps_emitted && !registry.is_empty() {
        doc.push(Block::Heading {
            level: 2,
            text: opts.procedure_heading.clone(),
        });
        push_steps(&mut doc, &mut missing, registry, opts);
    }

    if !missing.is_empty() {
        logw(format!(
            "{} step(s) exported without an image",
            missing.len()
        ));
    }

    Assembly {
        document: doc,
        missing_images: missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StaticFrameExtractor;
    use crate::parser::parse;

    const DRAFT: &str = "## Overview\nOperator packs a shipping carton.\n\n## Procedure\n[00:05] Fold box\n[00:12] Seal box\n[00:20] Label box\n\nNotes:\nKeep tape gun clear of the conveyor.";

    fn headings(doc: &Document) -> Vec<String> {
        doc.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Heading { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn prose_only_when_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let draft = "## Overview\nThis video shows packing.\n\n**Safety**\nWear gloves.";
        let reg = StepRegistry::new(dir.path().join("v.mp4"), dir.path());

        let assembly = assemble(draft, &reg);
        assert_eq!(
            assembly.document.blocks,
            vec![
                Block::Title("Work Instructions".to_string()),
                Block::Heading { level: 2, text: "Overview".to_string() },
                Block::Paragraph("This video shows packing.".to_string()),
                Block::Heading { level: 2, text: "Safety".to_string() },
                Block::Paragraph("Wear gloves.".to_string()),
            ]
        );
        assert_eq!(assembly.document.images().count(), 0);
        assert!(!assembly.is_partial());
        assert!(assembly.warning().is_none());
    }

    #[test]
    fn procedure_lines_dropped_when_all_steps_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = StepRegistry::with_steps(dir.path().join("v.mp4"), dir.path(), parse(DRAFT));
        reg.clear();

        let assembly = assemble(DRAFT, &reg);
        assert_eq!(headings(&assembly.document), vec!["Overview", "Procedure", "Notes"]);
        assert!(!assembly.document.blocks.iter().any(|b| matches!(
            b,
            Block::Paragraph(p) if p.contains("[00:")
        )));
    }

    #[tokio::test]
    async fn steps_follow_registry_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = StepRegistry::with_steps(dir.path().join("v.mp4"), dir.path(), parse(DRAFT));
        let extractor = StaticFrameExtractor::new();
        reg.re_extract(0, &extractor).await.unwrap();
        reg.re_extract(2, &extractor).await.unwrap();
        reg.remove(1).unwrap();

        let assembly = assemble(DRAFT, &reg);
        assert_eq!(
            headings(&assembly.document),
            vec!["Overview", "Procedure", "Step 1 [00:05]", "Step 2 [00:20]", "Notes"]
        );
        assert_eq!(assembly.document.images().count(), 2);
        assert!(!assembly.is_partial());

        // an image deleted behind the registry's back degrades to text-only
        std::fs::remove_file(reg.steps()[1].image().unwrap()).unwrap();
        let assembly = assemble(DRAFT, &reg);
        assert_eq!(assembly.document.images().count(), 1);
        assert_eq!(assembly.missing_images, vec![Timestamp::parse("00:20").unwrap()]);
        assert!(matches!(assembly.warning(), Some(WiError::AssemblyPartial { .. })));
    }

    #[test]
    fn table_section_is_replaced_with_hazards() {
        let dir = tempfile::tempdir().unwrap();
        let draft = "## Steps\n| # | Time | Action | Hazard |\n|---|---|---|---|\n| 1 | [00:04] | Insert divider | Pinch point |\n\nDone.";
        let reg = StepRegistry::with_steps(dir.path().join("v.mp4"), dir.path(), parse(draft));

        let assembly = assemble(draft, &reg);
        let blocks = &assembly.document.blocks;
        assert!(blocks.contains(&Block::Paragraph("Hazard: Pinch point".to_string())));
        assert!(!blocks.iter().any(|b| matches!(b, Block::Paragraph(p) if p.starts_with('|'))));
        assert_eq!(assembly.missing_images.len(), 1);
    }

    #[test]
    fn seconds_steps_are_appended_after_prose() {
        let dir = tempfile::tempdir().unwrap();
        let draft = "Summary\nThe carton is closed at 4s and taped at 9.5s.";
        let reg = StepRegistry::with_steps(dir.path().join("v.mp4"), dir.path(), parse(draft));

        let assembly = assemble(draft, &reg);
        assert_eq!(headings(&assembly.document), vec!["Procedure", "Step 1 [4s]", "Step 2 [9.5s]"]);
        assert_eq!(
            assembly.document.blocks[1],
            Block::Paragraph("Summary".to_string())
        );
    }

    fn paragraphs(doc: &Document) -> Vec<String> {
        doc.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn numbered_step_lines_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let draft = "## Procedure\n**Step 1:** [00:05] Fold box\n**Step 2:** [00:12] Seal box";
        let mut reg = StepRegistry::with_steps(dir.path().join("v.mp4"), dir.path(), parse(draft));
        reg.remove(1).unwrap();

        let assembly = assemble(draft, &reg);
        assert_eq!(
            assembly.document.blocks,
            vec![
                Block::Title("Work Instructions".to_string()),
                Block::Heading { level: 2, text: "Procedure".to_string() },
                Block::Heading { level: 3, text: "Step 1 [00:05]".to_string() },
                Block::Paragraph("Fold box".to_string()),
            ]
        );
    }

    #[test]
    fn step_details_are_removed_with_their_step() {
        let dir = tempfile::tempdir().unwrap();
        let draft = "## Procedure\n[00:05] Fold box\n- Tools: hands\n\n[00:12] Seal box\n- Tools: tape gun\n\nWipe the bench.";
        let mut reg = StepRegistry::with_steps(dir.path().join("v.mp4"), dir.path(), parse(draft));

        let assembly = assemble(draft, &reg);
        assert_eq!(
            paragraphs(&assembly.document),
            vec!["Fold box", "- Tools: hands", "Seal box", "- Tools: tape gun", "Wipe the bench."]
        );

        reg.remove(1).unwrap();
        let assembly = assemble(draft, &reg);
        assert_eq!(
            paragraphs(&assembly.document),
            vec!["Fold box", "- Tools: hands", "Wipe the bench."]
        );
        assert_eq!(headings(&assembly.document), vec!["Procedure", "Step 1 [00:05]"]);
    }

    #[test]
    fn heading_shapes() {
        assert_eq!(section_heading("# Title"), Some((1, "Title".to_string())));
        assert_eq!(section_heading("#### Deep ##"), Some((3, "Deep".to_string())));
        assert_eq!(section_heading("**Tools:**"), Some((2, "Tools".to_string())));
        assert_eq!(section_heading("Materials:"), Some((2, "Materials".to_string())));
        assert_eq!(section_heading("Note: keep clear."), None);
        assert_eq!(section_heading("plain text"), None);
    }
}
