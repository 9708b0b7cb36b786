//! EPUB container reading and chapter text extraction
//!
//! An EPUB is a ZIP archive. `META-INF/container.xml` names the package
//! document, whose manifest lists the content files and whose spine gives
//! the reading order. Each content document in reading order becomes one
//! [`Chapter`] once its markup has been reduced to plain text.
//!
//! Navigation documents and `titlepage.xhtml` are skipped; `<nav>` blocks and
//! elements classed `page-number`, `pagenum` or `pagebreak` are removed
//! before the text is taken.

use crate::error::{Error, Result};
use crate::types::Chapter;
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Largest EPUB accepted
pub const MAX_EPUB_SIZE: u64 = 500 * 1024 * 1024;

/// Longest entry name accepted inside the archive
const MAX_ENTRY_NAME_LEN: usize = 255;

const EPUB_MIMETYPE: &str = "application/epub+zip";
const CONTAINER_PATH: &str = "META-INF/container.xml";
const SKIPPED_DOCUMENTS: &[&str] = &["titlepage.xhtml"];
const SKIPPED_CLASSES: &[&str] = &["page-number", "pagenum", "pagebreak"];
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Title and chapters read from an EPUB
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Book {
    /// `dc:title`, or `Untitled`
    pub title: String,
    /// Non-empty chapters in reading order, indexed from 0
    pub chapters: Vec<Chapter>,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidEpub(message.into())
}

/// Check that a file is a well-formed, safe EPUB container
///
/// The file must exist, be non-empty and at most [`MAX_EPUB_SIZE`], open as
/// a ZIP archive, contain `mimetype` (equal to `application/epub+zip`) and
/// `META-INF/container.xml`, and have no absolute, `..` or over-long entry
/// names.
pub fn validate_epub_file(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            invalid(format!("file not found: {}", path.display()))
        } else {
            Error::Io(e)
        }
    })?;

    let size = metadata.len();
    if size == 0 {
        return Err(invalid("file is empty"));
    }
    if size > MAX_EPUB_SIZE {
        return Err(invalid(format!(
            "file too large: {:.1}MB (max: {}MB)",
            size as f64 / (1024.0 * 1024.0),
            MAX_EPUB_SIZE / (1024 * 1024)
        )));
    }

    let mut archive = open_archive(path)?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    for required in ["mimetype", CONTAINER_PATH] {
        if !names.iter().any(|n| n == required) {
            return Err(invalid(format!("missing required file '{required}'")));
        }
    }

    for name in &names {
        if name.starts_with('/') || name.contains("..") {
            return Err(invalid(format!("suspicious file path: {name}")));
        }
        if name.chars().count() > MAX_ENTRY_NAME_LEN {
            let prefix: String = name.chars().take(50).collect();
            return Err(invalid(format!("file path too long: {prefix}...")));
        }
    }

    let mimetype = read_entry(&mut archive, "mimetype")?;
    if mimetype.trim() != EPUB_MIMETYPE {
        return Err(invalid(format!("unexpected mimetype: {}", mimetype.trim())));
    }

    Ok(())
}

/// Read the title and chapters of an EPUB
pub fn read_book(path: &Path) -> Result<Book> {
    let markup = Markup::new()?;
    let mut archive = open_archive(path)?;

    let container = read_entry(&mut archive, CONTAINER_PATH)?;
    let package_path = markup
        .rootfile(&container)
        .ok_or_else(|| invalid("container.xml does not name a package document"))?;
    let package_doc = read_entry(&mut archive, &package_path)?;
    let package = Package::parse(&package_doc, &markup);
    let base_dir = package_path
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or("");

    let mut chapters = Vec::new();
    for item in package.reading_order() {
        if item.is_nav() {
            continue;
        }
        let entry = resolve_href(base_dir, &item.href);
        let file_name = entry.rsplit('/').next().unwrap_or(entry.as_str()).to_lowercase();
        if SKIPPED_DOCUMENTS.contains(&file_name.as_str()) {
            tracing::debug!(entry = %entry, "skipping title page");
            continue;
        }

        let html = match read_entry(&mut archive, &entry) {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(entry = %entry, error = %e, "skipping unreadable content document");
                continue;
            }
        };

        let text = markup.chapter_text(&html);
        if text.is_empty() {
            continue;
        }
        let mut chapter = Chapter::new(chapters.len(), text);
        if let Some(heading) = markup.heading(&html) {
            chapter = chapter.with_title(heading);
        }
        chapters.push(chapter);
    }

    tracing::info!(
        title = %package.title,
        chapters = chapters.len(),
        "read EPUB"
    );

    Ok(Book {
        title: package.title,
        chapters,
    })
}

/// Validate and read an EPUB without blocking the async runtime
pub async fn load_book(path: &Path) -> Result<Book> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        validate_epub_file(&path)?;
        read_book(&path)
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(format!("EPUB reader task failed: {e}"))))?
}

/// Write each chapter to `Chapter_001.txt`, `Chapter_002.txt`, ... in `dir`
pub async fn export_text(book: &Book, dir: &Path) -> Result<Vec<PathBuf>> {
    if book.chapters.is_empty() {
        return Err(Error::NoChapters);
    }
    tokio::fs::create_dir_all(dir).await?;

    let mut written = Vec::with_capacity(book.chapters.len());
    for (i, chapter) in book.chapters.iter().enumerate() {
        let path = dir.join(format!("Chapter_{:03}.txt", i + 1));
        tokio::fs::write(&path, &chapter.text).await?;
        written.push(path);
    }

    tracing::info!(
        chapters = written.len(),
        dir = %dir.display(),
        "exported chapter text"
    );
    Ok(written)
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<std::fs::File>> {
    let file = std::fs::File::open(path)?;
    zip::ZipArchive::new(file).map_err(|e| invalid(format!("not a valid ZIP archive: {e}")))
}

fn read_entry(archive: &mut zip::ZipArchive<std::fs::File>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| invalid(format!("cannot open '{name}': {e}")))?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Resolve a manifest href against the package directory
///
/// Fragments are dropped, percent-escapes decoded and `.`/`..` segments
/// folded; the result never climbs above the archive root.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let decoded = urlencoding::decode(href)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| href.to_string());

    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[derive(Debug)]
struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: String,
}

impl ManifestItem {
    fn is_document(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            "application/xhtml+xml" | "text/html"
        )
    }

    fn is_nav(&self) -> bool {
        self.properties.split_whitespace().any(|p| p == "nav")
    }
}

#[derive(Debug)]
struct Package {
    title: String,
    manifest: Vec<ManifestItem>,
    spine: Vec<String>,
}

impl Package {
    fn parse(doc: &str, markup: &Markup) -> Self {
        let title = markup
            .title
            .captures(doc)
            .and_then(|c| c.get(1))
            .map(|m| markup.plain_text(m.as_str()))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let manifest = markup
            .item
            .find_iter(doc)
            .filter_map(|tag| {
                let attr = |name: &str| markup.attribute(tag.as_str(), name);
                Some(ManifestItem {
                    id: attr("id")?,
                    href: attr("href")?,
                    media_type: attr("media-type").unwrap_or_default(),
                    properties: attr("properties").unwrap_or_default(),
                })
            })
            .collect();

        let spine = markup
            .itemref
            .find_iter(doc)
            .filter_map(|tag| markup.attribute(tag.as_str(), "idref"))
            .collect();

        Self {
            title,
            manifest,
            spine,
        }
    }

    /// Content documents in spine order, or manifest order without a spine
    fn reading_order(&self) -> Vec<&ManifestItem> {
        let from_spine: Vec<&ManifestItem> = self
            .spine
            .iter()
            .filter_map(|idref| self.manifest.iter().find(|item| &item.id == idref))
            .filter(|item| item.is_document())
            .collect();

        if from_spine.is_empty() {
            self.manifest.iter().filter(|i| i.is_document()).collect()
        } else {
            from_spine
        }
    }
}

/// Compiled patterns for package and content documents
struct Markup {
    rootfile: Regex,
    title: Regex,
    item: Regex,
    itemref: Regex,
    attribute: Regex,
    non_narrative: Regex,
    open_tag: Regex,
    any_tag: Regex,
    heading: Regex,
    entity: Regex,
    whitespace: Regex,
}

impl Markup {
    fn new() -> Result<Self> {
        let re = |pattern: &str| {
            Regex::new(pattern).map_err(|e| invalid(format!("markup pattern failed to compile: {e}")))
        };
        Ok(Self {
            rootfile: re(r"(?is)<rootfile\b[^>]*>")?,
            title: re(r"(?is)<dc:title\b[^>]*>(.*?)</dc:title\s*>")?,
            item: re(r"(?is)<item\b[^>]*>")?,
            itemref: re(r"(?is)<itemref\b[^>]*>")?,
            attribute: re(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            non_narrative: re(
                r"(?is)<!--.*?-->|<head\b.*?</head\s*>|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<nav\b.*?</nav\s*>",
            )?,
            open_tag: re(r"(?s)<(/?)([A-Za-z][A-Za-z0-9]*)\b([^>]*)>")?,
            any_tag: re(r"(?s)<[^>]*>")?,
            heading: re(r"(?is)<h[1-2]\b[^>]*>(.*?)</h[1-2]\s*>")?,
            entity: re(r"&(#[0-9]{1,7}|#[xX][0-9A-Fa-f]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});")?,
            whitespace: re(r"\s+")?,
        })
    }

    fn attribute(&self, tag: &str, name: &str) -> Option<String> {
        self.attribute
            .captures_iter(tag)
            .find(|c| c.get(1).is_some_and(|n| n.as_str().eq_ignore_ascii_case(name)))
            .and_then(|c| c.get(2).or_else(|| c.get(3)))
            .map(|v| v.as_str().to_string())
    }

    fn rootfile(&self, container: &str) -> Option<String> {
        self.rootfile
            .find_iter(container)
            .find_map(|tag| self.attribute(tag.as_str(), "full-path"))
    }

    fn heading(&self, html: &str) -> Option<String> {
        self.heading
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| self.plain_text(m.as_str()))
            .filter(|h| !h.is_empty())
    }

    /// Narrative text of a content document
    fn chapter_text(&self, html: &str) -> String {
        let without_blocks = self.non_narrative.replace_all(html, " ");
        let without_pages = self.remove_classed_elements(&without_blocks);
        self.plain_text(&without_pages)
    }

    /// Strip tags, decode entities and collapse whitespace
    fn plain_text(&self, html: &str) -> String {
        let untagged = self.any_tag.replace_all(html, " ");
        let decoded = self
            .entity
            .replace_all(&untagged, |caps: &regex::Captures<'_>| decode_entity(&caps[1]));
        self.whitespace.replace_all(decoded.trim(), " ").into_owned()
    }

    fn has_skipped_class(&self, attrs: &str) -> bool {
        self.attribute(attrs, "class").is_some_and(|class| {
            class
                .split_whitespace()
                .any(|c| SKIPPED_CLASSES.contains(&c))
        })
    }

    /// Drop every element carrying one of the skipped classes, with its content
    fn remove_classed_elements(&self, html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut cursor = 0;
        let mut search = 0;

        while let Some(caps) = self.open_tag.captures_at(html, search) {
            let (Some(tag), Some(name)) = (caps.get(0), caps.get(2)) else {
                break;
            };
            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            let attrs = caps.get(3).map_or("", |m| m.as_str());

            if closing || !self.has_skipped_class(attrs) {
                search = tag.end();
                continue;
            }

            let name = name.as_str().to_ascii_lowercase();
            let self_closing =
                attrs.trim_end().ends_with('/') || VOID_ELEMENTS.contains(&name.as_str());
            let end = if self_closing {
                tag.end()
            } else {
                self.element_end(html, &name, tag.end())
            };

            out.push_str(&html[cursor..tag.start()]);
            out.push(' ');
            cursor = end;
            search = end;
        }

        out.push_str(&html[cursor..]);
        out
    }

    /// Byte offset just past the tag closing the element opened before `from`
    fn element_end(&self, html: &str, name: &str, from: usize) -> usize {
        let mut depth = 1usize;
        for caps in self.open_tag.captures_iter(&html[from..]) {
            let (Some(tag), Some(tag_name)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            if !tag_name.as_str().eq_ignore_ascii_case(name) {
                continue;
            }
            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            let attrs = caps.get(3).map_or("", |m| m.as_str());
            if closing {
                depth -= 1;
                if depth == 0 {
                    return from + tag.end();
                }
            } else if !attrs.trim_end().ends_with('/') {
                depth += 1;
            }
        }
        html.len()
    }
}

fn decode_entity(entity: &str) -> String {
    let numeric = if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };
    if let Some(c) = numeric.and_then(char::from_u32) {
        return c.to_string();
    }

    let named = match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201C}",
        "rdquo" => "\u{201D}",
        _ => return format!("&{entity};"),
    };
    named.to_string()
}
