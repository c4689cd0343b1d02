//! Display filtering for the active playlist.
//!
//! Pure functions: free-text search over title/artist/album/filename, then
//! exact genre and year facets. Empty criteria pass everything through.

use crate::playlist::{Track, UNKNOWN_GENRE, UNKNOWN_YEAR};

/// Applies search, genre and year criteria in order and returns the
/// displayable subset.
pub fn display<'a>(
    tracks: &'a [Track],
    search_term: &str,
    genre_filter: &str,
    year_filter: &str,
) -> Vec<&'a Track> {
    let search_term = search_term.trim().to_lowercase();
    tracks
        .iter()
        .filter(|track| {
            if search_term.is_empty() {
                return true;
            }
            let metadata = &track.metadata;
            metadata.title.to_lowercase().contains(&search_term)
                || metadata.artist.to_lowercase().contains(&search_term)
                || metadata.album.to_lowercase().contains(&search_term)
                || track.name.to_lowercase().contains(&search_term)
        })
        .filter(|track| {
            genre_filter.is_empty() || track.metadata.genre.eq_ignore_ascii_case(genre_filter)
        })
        .filter(|track| year_filter.is_empty() || track.metadata.year == year_filter)
        .collect()
}

/// Unique genres of the unfiltered playlist, sentinels excluded, sorted
/// alphabetically (case-insensitive).
pub fn unique_genres(tracks: &[Track]) -> Vec<String> {
    let mut genres: Vec<String> = Vec::new();
    for track in tracks {
        let genre = &track.metadata.genre;
        if genre != UNKNOWN_GENRE && !genres.contains(genre) {
            genres.push(genre.clone());
        }
    }
    genres.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
    genres
}

/// Unique years of the unfiltered playlist, sentinels excluded, sorted
/// descending. Years are 4-digit strings, so lexicographic equals numeric.
pub fn unique_years(tracks: &[Track]) -> Vec<String> {
    let mut years: Vec<String> = Vec::new();
    for track in tracks {
        let year = &track.metadata.year;
        if year != UNKNOWN_YEAR && !years.contains(year) {
            years.push(year.clone());
        }
    }
    years.sort_by(|a, b| b.cmp(a));
    years
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::{TrackMetadata, UNKNOWN_TITLE};
    use std::path::PathBuf;

    fn track(name: &str, title: &str, artist: &str, genre: &str, year: &str) -> Track {
        let mut track = Track::from_path(PathBuf::from(format!("/tmp/{name}")));
        track.metadata = TrackMetadata {
            title: title.to_string(),
            artist: artist.to_string(),
            genre: genre.to_string(),
            year: year.to_string(),
            ..TrackMetadata::default()
        };
        track
    }

    fn fixture() -> Vec<Track> {
        vec![
            track("a.mp3", "Thunder Road", "Bruce", "Rock", "1999"),
            track("b.mp3", "Blue in Green", "Miles", "Jazz", "1999"),
            track("c.mp3", "Badlands", "Bruce", "Rock", "2001"),
            track("mystery.mp3", UNKNOWN_TITLE, "Unknown Artist", UNKNOWN_GENRE, UNKNOWN_YEAR),
        ]
    }

    #[test]
    fn test_empty_criteria_pass_everything_through() {
        let tracks = fixture();
        assert_eq!(display(&tracks, "", "", "").len(), tracks.len());
    }

    #[test]
    fn test_search_matches_any_field_case_insensitively() {
        let tracks = fixture();
        let by_title = display(&tracks, "thunder", "", "");
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].metadata.title, "Thunder Road");

        let by_artist = display(&tracks, "BRUCE", "", "");
        assert_eq!(by_artist.len(), 2);

        let by_filename = display(&tracks, "mystery", "", "");
        assert_eq!(by_filename.len(), 1);
    }

    #[test]
    fn test_genre_and_year_compose() {
        let tracks = fixture();
        let filtered = display(&tracks, "", "Rock", "2001");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].metadata.title, "Badlands");
    }

    #[test]
    fn test_genre_filter_is_case_insensitive_exact_match() {
        let tracks = fixture();
        assert_eq!(display(&tracks, "", "rock", "").len(), 2);
        assert_eq!(display(&tracks, "", "roc", "").len(), 0);
    }

    #[test]
    fn test_unique_genres_excludes_sentinels_and_sorts() {
        let tracks = fixture();
        assert_eq!(unique_genres(&tracks), vec!["Jazz", "Rock"]);
    }

    #[test]
    fn test_unique_years_sorted_descending_without_sentinels() {
        let tracks = fixture();
        assert_eq!(unique_years(&tracks), vec!["2001", "1999"]);
    }
}
