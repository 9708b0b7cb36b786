//! Book fixtures and option presets

use epub2audio::{BookOptions, Chapter, Event};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

/// Chapters whose text is `Chapter <n>` (1-based), optionally marked
pub fn chapters(count: usize, mark: impl Fn(usize) -> Option<&'static str>) -> Vec<Chapter> {
    Chapter::from_texts((0..count).map(|i| match mark(i) {
        Some(tag) => format!("Chapter {} {tag}", i + 1),
        None => format!("Chapter {}", i + 1),
    }))
}

/// The segment bytes the fake speech tool writes for `chapter`
pub fn expected_segment(chapter: &Chapter) -> String {
    format!("[{}]", chapter.text)
}

/// Options writing under `output_dir` with no retry delay
pub fn test_options(output_dir: &Path, book: &str, concurrency: usize) -> BookOptions {
    let mut options = BookOptions::new(book, concurrency);
    options.output_dir = output_dir.to_path_buf();
    options.max_retries = 1;
    options.retry_delay = Duration::ZERO;
    options.conversion_timeout = Duration::from_secs(10);
    options.merge_timeout = Duration::from_secs(10);
    options
}

/// Drain every event currently buffered on a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Write a minimal EPUB 3 whose spine lists `chapters` as XHTML bodies
pub fn write_epub(path: &Path, title: &str, chapters: &[&str]) {
    let file = std::fs::File::create(path).expect("create epub");
    let mut zip = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    let mut add = |name: &str, content: &str| {
        zip.start_file(name, options).expect("start entry");
        zip.write_all(content.as_bytes()).expect("write entry");
    };

    add("mimetype", "application/epub+zip");
    add(
        "META-INF/container.xml",
        r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
    );

    let manifest: String = (0..chapters.len())
        .map(|i| {
            format!(r#"<item id="c{i}" href="ch{i}.xhtml" media-type="application/xhtml+xml"/>"#)
        })
        .collect();
    let spine: String = (0..chapters.len())
        .map(|i| format!(r#"<itemref idref="c{i}"/>"#))
        .collect();
    add(
        "OEBPS/content.opf",
        &format!(
            r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>{title}</dc:title></metadata>
  <manifest>{manifest}</manifest>
  <spine>{spine}</spine>
</package>"#
        ),
    );

    for (i, body) in chapters.iter().enumerate() {
        add(
            &format!("OEBPS/ch{i}.xhtml"),
            &format!("<html><head><title>x</title></head><body><p>{body}</p></body></html>"),
        );
    }

    zip.finish().expect("finish epub");
}
