use crate::document::{Block, Document};
use crate::logw;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::io::{Cursor, Seek, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const EMU_PER_INCH: f64 = 914_400.0;
const FALLBACK_ASPECT: f64 = 9.0 / 16.0;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/><Default Extension="jpeg" ContentType="image/jpeg"/><Default Extension="jpg" ContentType="image/jpeg"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:cs="Calibri"/><w:sz w:val="22"/></w:rPr></w:rPrDefault><w:pPrDefault><w:pPr><w:spacing w:after="160" w:line="259" w:lineRule="auto"/></w:pPr></w:pPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/></w:style><w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:rPr><w:sz w:val="56"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="240"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:sz w:val="32"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="200"/><w:outlineLvl w:val="1"/></w:pPr><w:rPr><w:b/><w:sz w:val="26"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading3"><w:name w:val="heading 3"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="160"/><w:outlineLvl w:val="2"/></w:pPr><w:rPr><w:b/><w:sz w:val="24"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Caption"><w:name w:val="caption"/><w:basedOn w:val="Normal"/><w:rPr><w:i/><w:sz w:val="18"/></w:rPr></w:style></w:styles>"#;

const DOCUMENT_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture"><w:body>"#;

const SECTION_PROPS: &str = r#"<w:sectPr><w:pgSz w:w="12240" w:h="15840"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="720" w:footer="720" w:gutter="0"/></w:sectPr></w:body></w:document>"#;

struct Media {
    rel_id: String,
    part_name: String,
    bytes: Vec<u8>,
}

/// Serializes a [`Document`] into a `.docx` package.
pub struct DocxWriter {
    created: DateTime<Utc>,
}

impl Default for DocxWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DocxWriter {
    pub fn new() -> Self {
        Self {
            created: Utc::now(),
        }
    }

    pub fn with_created(created: DateTime<Utc>) -> Self {
        Self { created }
    }

    pub fn to_bytes(&self, doc: &Document) -> Result<Vec<u8>> {
        let cursor = self.write(doc, Cursor::new(Vec::new()))?;
        Ok(cursor.into_inner())
    }

    /// Writes the package to `path` through a temp file and an atomic rename.
    pub fn write_to_path(&self, doc: &Document, path: &Path) -> Result<()> {
        let bytes = self.to_bytes(doc)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create dir {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp docx in {}", dir.display()))?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("write docx: {}", path.display()))?;
        Ok(())
    }

    pub fn write<W: Write + Seek>(&self, doc: &Document, out: W) -> Result<W> {
        let (body, media) = render_body(doc);

        let mut zip = ZipWriter::new(out);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("[Content_Types].xml", options)?;
        zip.write_all(CONTENT_TYPES.as_bytes())?;

        zip.start_file("_rels/.rels", options)?;
        zip.write_all(PACKAGE_RELS.as_bytes())?;

        zip.start_file("docProps/core.xml", options)?;
        zip.write_all(self.core_properties(doc).as_bytes())?;

        zip.start_file("word/styles.xml", options)?;
        zip.write_all(STYLES.as_bytes())?;

        zip.start_file("word/document.xml", options)?;
        zip.write_all(body.as_bytes())?;

        zip.start_file("word/_rels/document.xml.rels", options)?;
        zip.write_all(document_rels(&media).as_bytes())?;

        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for item in &media {
            zip.start_file(format!("word/{}", item.part_name), stored)?;
            zip.write_all(&item.bytes)?;
        }

        Ok(zip.finish().context("finalize docx package")?)
    }

    fn core_properties(&self, doc: &Document) -> String {
        let title = doc
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::Title(t) => Some(t.as_str()),
                _ => None,
            })
            .unwrap_or_default();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><dc:title>{}</dc:title><dc:creator>video-wi</dc:creator><dcterms:created xsi:type="dcterms:W3CDTF">{}</dcterms:created></cp:coreProperties>"#,
            escape_xml(title),
            self.created.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

fn paragraph(out: &mut String, style: Option<&str>, text: &str) {
    out.push_str("<w:p>");
    if let Some(style) = style {
        let _ = write!(out, r#"<w:pPr><w:pStyle w:val="{}"/></w:pPr>"#, style);
    }
    let _ = write!(
        out,
        r#"<w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        escape_xml(text)
    );
}

fn image_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "jpeg",
        _ => "png",
    }
}

fn image_extent_emu(path: &Path, width_inches: f32) -> (u64, u64) {
    let cx = width_inches as f64 * EMU_PER_INCH;
    let aspect = match image::image_dimensions(path) {
        Ok((w, h)) if w > 0 => h as f64 / w as f64,
        _ => FALLBACK_ASPECT,
    };
    (cx.round() as u64, (cx * aspect).round() as u64)
}

fn drawing(out: &mut String, id: usize, rel_id: &str, cx: u64, cy: u64) {
    let _ = write!(
        out,
        concat!(
            r#"<w:p><w:r><w:drawing><wp:inline distT="0" distB="0" distL="0" distR="0">"#,
            r#"<wp:extent cx="{cx}" cy="{cy}"/><wp:docPr id="{id}" name="Picture {id}"/>"#,
            r#"<a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
            r#"<pic:pic><pic:nvPicPr><pic:cNvPr id="{id}" name="image{id}"/><pic:cNvPicPr/></pic:nvPicPr>"#,
            r#"<pic:blipFill><a:blip r:embed="{rel}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>"#,
            r#"<pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr></pic:pic>"#,
            r#"</a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>"#
        ),
        cx = cx,
        cy = cy,
        id = id,
        rel = rel_id
    );
}

fn render_body(doc: &Document) -> (String, Vec<Media>) {
    let mut out = String::from(DOCUMENT_OPEN);
    let mut media: Vec<Media> = Vec::new();

    for block in &doc.blocks {
        match block {
            Block::Title(text) => paragraph(&mut out, Some("Title"), text),
            Block::Heading { level, text } => {
                let style = format!("Heading{}", (*level).clamp(1, 3));
                paragraph(&mut out, Some(&style), text);
            }
            Block::Paragraph(text) => paragraph(&mut out, None, text),
            Block::Image {
                path,
                width_inches,
                caption,
            } => {
                let bytes = match std::fs::read(path) {
                    Ok(b) => b,
                    Err(err) => {
                        logw(format!("Skipping image {}: {}", path.display(), err));
                        continue;
                    }
                };
                let n = media.len() + 1;
                let rel_id = format!("rId{}", n + 1);
                let (cx, cy) = image_extent_emu(path, *width_inches);
                drawing(&mut out, n, &rel_id, cx, cy);
                paragraph(&mut out, Some("Caption"), caption);
                media.push(Media {
                    rel_id,
                    part_name: format!("media/image{}.{}", n, image_extension(path)),
                    bytes,
                });
            }
        }
    }

    out.push_str(SECTION_PROPS);
    (out, media)
}

fn document_rels(media: &[Media]) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
    );
    for item in media {
        let _ = write!(
            out,
            r#"<Relationship Id="{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="{}"/>"#,
            item.rel_id, item.part_name
        );
    }
    out.push_str("</Relationships>");
    out
}
