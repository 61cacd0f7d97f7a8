use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveError, ArchiveResult};
use crate::database::models::from_unix_seconds;
use crate::logger;

/// Header fields pulled out of a save document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    /// `<save date="...">` when the document carries one.
    pub save_time: Option<DateTime<Utc>>,
    pub game_version: String,
    pub original_game_version: String,
    pub modified: bool,
    /// Elapsed in-game time in seconds.
    pub playtime: f64,
    pub start_type: String,
    pub character_name: String,
    pub company_name: String,
    pub money: f64,
}

/// Reads the header of a gzip-compressed save document.
///
/// The document is inflated to a scratch file inside `scratch_dir` and then
/// parsed event by event. Only a handful of tags are inspected and parsing
/// stops at the end of the `<info>` element, so the universe data that makes
/// up the bulk of a save is never parsed.
pub struct SaveDocumentExtractor {
    scratch_dir: PathBuf,
}

impl SaveDocumentExtractor {
    const CHUNK_SIZE: usize = 64 * 1024;
    /// Tags whose attributes are read. Everything else is skipped.
    const HEADER_TAGS: [&'static [u8]; 4] = [b"save", b"game", b"player", b"info"];
    const END_OF_HEADER: &'static [u8] = b"info";

    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self { scratch_dir: scratch_dir.into() }
    }

    pub fn extract(&self, save_path: &Path) -> ArchiveResult<SaveMetadata> {
        std::fs::create_dir_all(&self.scratch_dir)?;

        // removed on drop, whichever way this function returns
        let scratch = tempfile::Builder::new()
            .prefix("extract-")
            .suffix(".xml")
            .tempfile_in(&self.scratch_dir)?;

        self.inflate(save_path, scratch.as_file())?;
        let metadata = Self::parse_header(scratch.reopen()?)?;

        logger::debug(
            "EXTRACTOR",
            "Extracted save header",
            Some(&format!("{} ({})", save_path.display(), metadata.game_version)),
        );
        Ok(metadata)
    }

    fn inflate(&self, save_path: &Path, scratch: &File) -> ArchiveResult<()> {
        let mut decoder = GzDecoder::new(BufReader::new(File::open(save_path)?));
        let mut writer = BufWriter::with_capacity(Self::CHUNK_SIZE, scratch);
        let mut chunk = vec![0u8; Self::CHUNK_SIZE];

        loop {
            let read = decoder.read(&mut chunk).map_err(|e| {
                ArchiveError::Corrupt(format!("{}: {}", save_path.display(), e))
            })?;
            if read == 0 {
                break;
            }
            writer.write_all(&chunk[..read])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn parse_header(document: File) -> ArchiveResult<SaveMetadata> {
        let mut reader = Reader::from_reader(BufReader::with_capacity(Self::CHUNK_SIZE, document));
        reader.trim_text(true);

        let mut metadata = SaveMetadata::default();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(element) => {
                    Self::read_element(&element, &mut metadata)?;
                }
                Event::Empty(element) => {
                    Self::read_element(&element, &mut metadata)?;
                    if element.name().as_ref() == Self::END_OF_HEADER {
                        break;
                    }
                }
                Event::End(element) if element.name().as_ref() == Self::END_OF_HEADER => break,
                Event::Eof => {
                    logger::warn("EXTRACTOR", "Reached end of document before <info> closed", None);
                    break;
                }
                _ => {}
            }
            // each event's bytes are dropped before the next one is read
            buf.clear();
        }

        Ok(metadata)
    }

    fn read_element(element: &BytesStart, metadata: &mut SaveMetadata) -> ArchiveResult<()> {
        let name = element.name();
        if !Self::HEADER_TAGS.contains(&name.as_ref()) {
            return Ok(());
        }

        let attrs = attributes(element)?;
        let get = |key: &str| attrs.get(key).map(String::as_str).unwrap_or("");

        match name.as_ref() {
            b"save" => {
                metadata.save_time = get("date").parse::<f64>().ok().map(from_unix_seconds);
            }
            b"game" => {
                metadata.game_version = version_string(get("version"), get("build"));
                metadata.original_game_version = version_string(get("original"), get("originalbuild"));
                metadata.modified = matches!(get("modified").to_ascii_lowercase().as_str(), "1" | "true");
                metadata.playtime = get("time").parse().unwrap_or(0.0);
                metadata.start_type = get("start").to_string();
            }
            b"player" => {
                metadata.character_name = get("name").to_string();
                metadata.company_name = get("company").to_string();
                metadata.money = get("money").parse().unwrap_or(0.0);
            }
            _ => {}
        }
        Ok(())
    }
}

fn attributes(element: &BytesStart) -> ArchiveResult<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn version_string(version: &str, build: &str) -> String {
    if version.is_empty() && build.is_empty() {
        String::new()
    } else {
        format!("{} build {}", version, build)
    }
}
