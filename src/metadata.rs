//! Tag and cover-art readers backed by `lofty` with a `symphonia` fallback.
//!
//! Readers return sentinel-complete metadata: any field the tags do not
//! carry keeps its "Unknown" value so callers can merge without special
//! cases. Failure to read anything at all is recovered by filename parsing
//! at the call site and never surfaced to the user.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use lofty::config::{ParseOptions, ParsingMode};
use lofty::file::TaggedFile;
use lofty::file::TaggedFileExt;
use lofty::prelude::Accessor;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use log::{debug, warn};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

use crate::playlist::{TrackMetadata, UNKNOWN_YEAR};

/// Scans a free-form date tag for a 4-digit year.
pub fn derive_year_from_date(date: &str) -> Option<String> {
    let mut consecutive_digits = String::with_capacity(4);
    for character in date.chars() {
        if character.is_ascii_digit() {
            consecutive_digits.push(character);
            if consecutive_digits.len() == 4 {
                return Some(consecutive_digits);
            }
        } else {
            consecutive_digits.clear();
        }
    }
    None
}

fn first_non_empty_value<F>(primary_tag: Option<&Tag>, tags: &[Tag], mut extractor: F) -> Option<String>
where
    F: FnMut(&Tag) -> Option<String>,
{
    primary_tag
        .iter()
        .copied()
        .chain(tags.iter())
        .find_map(|tag| {
            extractor(tag)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
}

fn read_tagged_file(path: &Path, read_cover_art: bool) -> Option<TaggedFile> {
    let options = ParseOptions::new()
        .read_properties(false)
        .read_cover_art(read_cover_art)
        .parsing_mode(ParsingMode::BestAttempt);

    match Probe::open(path) {
        Ok(probe) => match probe.options(options).read() {
            Ok(tagged_file) => return Some(tagged_file),
            Err(primary_error) => {
                debug!(
                    "Metadata read failed for {} with extension-based probe: {}",
                    path.display(),
                    primary_error
                );
            }
        },
        Err(open_error) => {
            debug!(
                "Metadata read could not open {}: {}",
                path.display(),
                open_error
            );
        }
    }

    // Content-based retry with relaxed parsing for files with broken
    // extensions or junk between tag and audio data.
    let relaxed_options = ParseOptions::new()
        .read_properties(false)
        .read_cover_art(read_cover_art)
        .parsing_mode(ParsingMode::Relaxed)
        .max_junk_bytes(64 * 1024);
    let file = File::open(path).ok()?;
    let guessed = Probe::new(BufReader::new(file))
        .options(relaxed_options)
        .guess_file_type()
        .ok()?;
    match guessed.read() {
        Ok(tagged_file) => {
            debug!(
                "Metadata read recovered via content-based parsing for {}",
                path.display()
            );
            Some(tagged_file)
        }
        Err(fallback_error) => {
            debug!(
                "Metadata read failed for {} after content-based fallback: {}",
                path.display(),
                fallback_error
            );
            None
        }
    }
}

fn read_with_lofty(path: &Path) -> Option<TrackMetadata> {
    let tagged_file = read_tagged_file(path, false)?;
    let primary_tag = tagged_file.primary_tag();
    let tags = tagged_file.tags();

    let mut metadata = TrackMetadata::default();
    if let Some(title) = first_non_empty_value(primary_tag, tags, |tag| {
        tag.title().map(|value| value.into_owned())
    }) {
        metadata.title = title;
    }
    if let Some(artist) = first_non_empty_value(primary_tag, tags, |tag| {
        tag.artist().map(|value| value.into_owned())
    }) {
        metadata.artist = artist;
    }
    if let Some(album) = first_non_empty_value(primary_tag, tags, |tag| {
        tag.album().map(|value| value.into_owned())
    }) {
        metadata.album = album;
    }
    if let Some(genre) = first_non_empty_value(primary_tag, tags, |tag| {
        tag.genre().map(|value| value.into_owned())
    }) {
        metadata.genre = genre;
    }

    let direct_year = first_non_empty_value(primary_tag, tags, |tag| {
        tag.get_string(ItemKey::Year).map(str::to_string)
    });
    let date = first_non_empty_value(primary_tag, tags, |tag| {
        tag.get_string(ItemKey::RecordingDate)
            .or_else(|| tag.get_string(ItemKey::ReleaseDate))
            .or_else(|| tag.get_string(ItemKey::OriginalReleaseDate))
            .map(str::to_string)
    });
    if let Some(year) = direct_year
        .as_deref()
        .and_then(derive_year_from_date)
        .or_else(|| date.as_deref().and_then(derive_year_from_date))
    {
        metadata.year = year;
    }

    metadata.lyrics = first_non_empty_value(primary_tag, tags, |tag| {
        tag.get_string(ItemKey::Lyrics).map(str::to_string)
    });

    Some(metadata)
}

fn open_symphonia_probe(path: &Path) -> Option<symphonia::core::probe::ProbeResult> {
    let file = File::open(path).ok()?;
    let media_source = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|extension| extension.to_str()) {
        hint.with_extension(extension);
    }
    symphonia::default::get_probe()
        .format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()
}

fn apply_symphonia_revision(metadata: &mut TrackMetadata, revision: &MetadataRevision) {
    let defaults = TrackMetadata::default();
    for tag in revision.tags() {
        let value = tag.value.to_string().trim().to_string();
        if value.is_empty() {
            continue;
        }
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) if metadata.title == defaults.title => {
                metadata.title = value;
            }
            Some(StandardTagKey::Artist) if metadata.artist == defaults.artist => {
                metadata.artist = value;
            }
            Some(StandardTagKey::Album) if metadata.album == defaults.album => {
                metadata.album = value;
            }
            Some(StandardTagKey::Genre) if metadata.genre == defaults.genre => {
                metadata.genre = value;
            }
            Some(StandardTagKey::Date)
            | Some(StandardTagKey::ReleaseDate)
            | Some(StandardTagKey::OriginalDate)
                if metadata.year == UNKNOWN_YEAR =>
            {
                if let Some(year) = derive_year_from_date(&value) {
                    metadata.year = year;
                }
            }
            Some(StandardTagKey::Lyrics) if metadata.lyrics.is_none() => {
                metadata.lyrics = Some(value);
            }
            _ => {}
        }
    }
}

fn read_with_symphonia(path: &Path) -> Option<TrackMetadata> {
    let mut probed = open_symphonia_probe(path)?;
    let mut metadata = TrackMetadata::default();

    if let Some(probe_metadata) = probed.metadata.get() {
        if let Some(revision) = probe_metadata.current() {
            apply_symphonia_revision(&mut metadata, revision);
        }
    }
    while !probed.format.metadata().is_latest() {
        let _ = probed.format.metadata().pop();
    }
    if let Some(revision) = probed.format.metadata().current() {
        apply_symphonia_revision(&mut metadata, revision);
    }

    if metadata == TrackMetadata::default() {
        None
    } else {
        Some(metadata)
    }
}

/// Reads sentinel-complete metadata from a media file. `None` means neither
/// reader could extract anything; callers fall back to filename parsing.
pub fn read_track_metadata(path: &Path) -> Option<TrackMetadata> {
    if let Some(metadata) = read_with_lofty(path) {
        return Some(metadata);
    }
    let fallback = read_with_symphonia(path);
    if fallback.is_some() {
        debug!(
            "Metadata read recovered via symphonia fallback for {}",
            path.display()
        );
    } else {
        warn!(
            "Metadata read failed for {} in both lofty and symphonia paths",
            path.display()
        );
    }
    fallback
}

/// Reads embedded cover-art bytes from a media file, if present.
pub fn read_embedded_cover_art(path: &Path) -> Option<Vec<u8>> {
    let tagged_file = read_tagged_file(path, true)?;
    if let Some(tag) = tagged_file.primary_tag() {
        if let Some(picture) = tag.pictures().first() {
            return Some(picture.data().to_vec());
        }
    }
    for tag in tagged_file.tags() {
        if let Some(picture) = tag.pictures().first() {
            return Some(picture.data().to_vec());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn test_derive_year_from_full_date() {
        assert_eq!(derive_year_from_date("1998-10-31").as_deref(), Some("1998"));
    }

    #[test]
    fn test_derive_year_from_short_value_is_none() {
        assert_eq!(derive_year_from_date("99"), None);
    }

    #[test]
    fn test_derive_year_from_non_leading_position() {
        assert_eq!(
            derive_year_from_date("released 2003-04-01").as_deref(),
            Some("2003")
        );
    }

    fn unique_temp_mp3_path(name: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        std::env::temp_dir().join(format!("cadenza_{name}_{nonce}.mp3"))
    }

    fn write_mp3_with_album_tag(path: &PathBuf) {
        let mut bytes = Vec::new();
        // ID3v2.3 header with payload size 0x23 (35 bytes)
        bytes.extend_from_slice(&[0x49, 0x44, 0x33, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x23]);
        // TALB frame content (UTF-16LE "aaaaaaaaaaa")
        bytes.extend_from_slice(&[
            0x54, 0x41, 0x4C, 0x42, 0x00, 0x00, 0x00, 0x19, 0x00, 0x00, 0x01, 0xFF, 0xFE, 0x61,
            0x00, 0x61, 0x00, 0x61, 0x00, 0x61, 0x00, 0x61, 0x00, 0x61, 0x00, 0x61, 0x00, 0x61,
            0x00, 0x61, 0x00, 0x61, 0x00, 0x61, 0x00,
        ]);
        // Start of an MPEG frame (minimal bytes, enough for tag reader context)
        bytes.extend_from_slice(&[
            0xFF, 0xFB, 0x50, 0xC4, 0x00, 0x03, 0xC0, 0x00, 0x01, 0xA4, 0x00, 0x00, 0x00, 0x20,
            0x00, 0x00, 0x34, 0x80, 0x00, 0x00, 0x04,
        ]);
        fs::write(path, bytes).expect("should write mp3 fixture");
    }

    #[test]
    fn test_read_track_metadata_finds_album_tag() {
        let path = unique_temp_mp3_path("album_tag");
        write_mp3_with_album_tag(&path);

        let metadata = read_track_metadata(path.as_path())
            .expect("metadata should be readable from the fixture");
        assert_eq!(metadata.album, "aaaaaaaaaaa");

        fs::remove_file(path).expect("fixture should be removable");
    }

    #[test]
    fn test_unreadable_file_returns_none() {
        let path = unique_temp_mp3_path("not_audio");
        fs::write(&path, b"plain text pretending to be audio").expect("fixture write");
        assert!(read_track_metadata(path.as_path()).is_none());
        fs::remove_file(path).expect("fixture should be removable");
    }
}
