//! Named quality preset catalog.

use super::model::Quality;

/// (label, width, height, bitrate kbps, frame rate)
const CATALOG: &[(&str, u32, u32, u32, u32)] = &[
    ("240p", 426, 240, 400, 30),
    ("360p", 640, 360, 800, 30),
    ("480p", 854, 480, 1400, 30),
    ("720p", 1280, 720, 2800, 30),
    ("1080p", 1920, 1080, 5000, 30),
    ("1440p", 2560, 1440, 9000, 60),
    ("4k", 3840, 2160, 16000, 60),
];

/// Returns every preset, lowest first.
pub fn catalog() -> Vec<Quality> {
    CATALOG
        .iter()
        .map(|&(label, w, h, bitrate, fps)| Quality::new(label, w, h, bitrate, fps))
        .collect()
}

/// Looks up a preset by name, case-insensitively. "2160p" is accepted for "4k".
pub fn preset(name: &str) -> Option<Quality> {
    let name = name.trim().to_lowercase();
    let name = if name == "2160p" { "4k".to_string() } else { name };
    catalog().into_iter().find(|q| q.label == name)
}

/// Presets that do not upscale a source of the given height.
pub fn recommended_for_height(source_height: u32) -> Vec<Quality> {
    let mut presets: Vec<Quality> = catalog()
        .into_iter()
        .filter(|q| q.height <= source_height)
        .collect();
    if presets.is_empty() {
        presets.extend(preset("240p"));
    }
    presets
}

/// Finds the preset name closest to an unknown name.
pub fn closest_preset_name(name: &str) -> Option<&'static str> {
    let name = name.to_lowercase();
    CATALOG
        .iter()
        .map(|(label, ..)| (*label, strsim::levenshtein(&name, label)))
        .filter(|(_, distance)| *distance <= 2)
        .min_by_key(|(_, distance)| *distance)
        .map(|(label, _)| label)
}
