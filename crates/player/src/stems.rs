use std::fs;
use std::path::Path;

use backtrack_core::{FileSourceProvider, Song, SongId, Track, TrackId};

const AUDIO_EXTENSIONS: &[&str] = &["wav", "flac", "mp3", "ogg", "m4a", "aac", "aif", "aiff"];

/// Build a song with one track per audio file in `folder`, ordered by file
/// name, and register each file with `provider`.
pub fn song_from_folder(folder: &Path, provider: &FileSourceProvider) -> std::io::Result<Song> {
    let mut files: Vec<_> = fs::read_dir(folder)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_audio(path))
        .collect();
    files.sort();

    let title = folder
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string());
    let mut song = Song::new(SongId(1), title, "");

    for (i, path) in files.into_iter().enumerate() {
        let id = TrackId(i as u64 + 1);
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        song.tracks.push(Track::new(id, name).with_resource(path.to_string_lossy().into_owned()));
        provider.insert(id, path);
    }
    Ok(song)
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_audio_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["02 Bass.wav", "01 Drums.FLAC", "notes.txt", "03 Keys.mp3"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("bounces.wav")).unwrap();

        let provider = FileSourceProvider::new();
        let song = song_from_folder(dir.path(), &provider).unwrap();

        let names: Vec<_> = song.tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["01 Drums", "02 Bass", "03 Keys"]);
        assert_eq!(song.tracks[0].id, TrackId(1));
    }
}
