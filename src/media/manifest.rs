//! HLS master playlist generation.

use crate::job::model::Quality;

/// Sub-playlist path for a quality, relative to the master playlist.
pub fn variant_playlist_path(quality: &Quality) -> String {
    format!("{}/playlist.m3u8", quality.label)
}

/// Builds the master playlist referencing one sub-playlist per quality,
/// in the given order.
pub fn master_playlist(qualities: &[Quality]) -> String {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for quality in qualities {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n{}\n",
            quality.bandwidth(),
            quality.resolution(),
            variant_playlist_path(quality),
        ));
    }
    playlist
}
