//! Variant deduplication and ordering.
//!
//! Each quality tier (resolution label for video, bitrate for audio) keeps a
//! single representative. Variants that carry audio win over silent ones, and
//! among equals an mp4/m4a container wins over webm. The survivors are sorted
//! best quality first.

use super::types::{Container, FormatGroups, MediaVariant, SourceFormat};
use std::{cmp::Reverse, collections::HashMap, hash::Hash};

/// Splits source formats into the client-facing groups.
pub fn group_formats(formats: &[SourceFormat]) -> FormatGroups {
    let video = formats
        .iter()
        .map(|f| &f.variant)
        .filter(|v| v.has_video)
        .cloned();
    let audio = formats
        .iter()
        .map(|f| &f.variant)
        .filter(|v| v.is_audio_only())
        .cloned();

    FormatGroups {
        video_with_audio: unique_video(video),
        video_only: Vec::new(),
        audio_only: unique_audio(audio),
    }
}

pub fn unique_video(variants: impl IntoIterator<Item = MediaVariant>) -> Vec<MediaVariant> {
    let mut unique = dedup_by(variants, |v| v.quality_label.clone());
    unique.sort_by_key(|v| {
        (
            Reverse(v.quality_label.as_deref().map_or(0, leading_number)),
            !v.has_audio,
        )
    });
    unique
}

pub fn unique_audio(variants: impl IntoIterator<Item = MediaVariant>) -> Vec<MediaVariant> {
    let mut unique = dedup_by(variants, |v| v.audio_bitrate);
    unique.sort_by_key(|v| (Reverse(v.audio_bitrate.unwrap_or(0)), !v.has_audio));
    unique
}

/// Highest-bitrate audio-only format, preferring mp4/m4a on equal bitrate.
pub fn best_audio(formats: &[SourceFormat]) -> Option<&SourceFormat> {
    let mut best: Option<&SourceFormat> = None;
    for format in formats.iter().filter(|f| f.variant.is_audio_only()) {
        let better = match best {
            None => true,
            Some(current) => {
                let (a, b) = (&format.variant, &current.variant);
                let (a_rate, b_rate) = (a.audio_bitrate.unwrap_or(0), b.audio_bitrate.unwrap_or(0));
                a_rate > b_rate
                    || (a_rate == b_rate && a.container.is_modern() && !b.container.is_modern())
            }
        };
        if better {
            best = Some(format);
        }
    }
    best
}

fn dedup_by<K, F>(variants: impl IntoIterator<Item = MediaVariant>, key: F) -> Vec<MediaVariant>
where
    K: Eq + Hash,
    F: Fn(&MediaVariant) -> Option<K>,
{
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut kept: Vec<MediaVariant> = Vec::new();

    for candidate in variants {
        let Some(k) = key(&candidate) else {
            continue;
        };

        match slots.get(&k) {
            None => {
                slots.insert(k, kept.len());
                kept.push(candidate);
            }
            Some(&idx) => {
                if should_replace(&kept[idx], &candidate) {
                    kept[idx] = candidate;
                }
            }
        }
    }

    kept
}

fn should_replace(existing: &MediaVariant, candidate: &MediaVariant) -> bool {
    if !existing.has_audio && candidate.has_audio {
        return true;
    }
    existing.has_audio == candidate.has_audio
        && existing.container == Container::Webm
        && candidate.container.is_modern()
}

/// "1080p60" -> 1080
fn leading_number(label: &str) -> u32 {
    let digits: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn video(id: &str, label: &str, container: Container, has_audio: bool) -> MediaVariant {
        MediaVariant {
            stream_id: id.to_string(),
            container,
            quality_label: Some(label.to_string()),
            audio_bitrate: None,
            has_audio,
            has_video: true,
            byte_length: None,
        }
    }

    fn audio(id: &str, kbps: u32, container: Container) -> MediaVariant {
        MediaVariant {
            stream_id: id.to_string(),
            container,
            quality_label: None,
            audio_bitrate: Some(kbps),
            has_audio: true,
            has_video: false,
            byte_length: None,
        }
    }

    fn source(variant: MediaVariant) -> SourceFormat {
        SourceFormat {
            url: format!("https://cdn.example/{}", variant.stream_id),
            variant,
            http_headers: HashMap::new(),
            chunk_size: None,
        }
    }

    fn ids(variants: &[MediaVariant]) -> Vec<&str> {
        variants.iter().map(|v| v.stream_id.as_str()).collect()
    }

    #[test]
    fn test_prefers_audio_over_container() {
        let unique = unique_video(vec![
            video("248", "1080p", Container::Webm, false),
            video("137", "1080p", Container::Mp4, false),
            video("22", "720p", Container::Mp4, true),
            video("136", "720p", Container::Mp4, false),
            video("247", "720p", Container::Webm, false),
        ]);

        assert_eq!(ids(&unique), vec!["137", "22"]);
        assert!(unique[1].has_audio);
    }

    #[test]
    fn test_audio_candidate_replaces_silent_webm_or_mp4() {
        let unique = unique_video(vec![
            video("136", "360p", Container::Mp4, false),
            video("43", "360p", Container::Webm, true),
        ]);
        assert_eq!(ids(&unique), vec!["43"]);
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let unique = unique_video(vec![
            video("a", "480p", Container::Mp4, false),
            video("b", "480p", Container::Mp4, false),
            video("c", "480p", Container::Webm, false),
        ]);
        assert_eq!(ids(&unique), vec!["a"]);

        // mp4 is never replaced by webm, and 3gp is not treated as legacy
        let unique = unique_video(vec![
            video("x", "144p", Container::ThreeGp, true),
            video("y", "144p", Container::Mp4, true),
        ]);
        assert_eq!(ids(&unique), vec!["x"]);
    }

    #[test]
    fn test_drops_unset_keys() {
        let mut unlabeled = video("u", "", Container::Mp4, true);
        unlabeled.quality_label = None;
        let unique = unique_video(vec![unlabeled, video("v", "240p", Container::Mp4, false)]);
        assert_eq!(ids(&unique), vec!["v"]);

        let mut no_rate = audio("n", 0, Container::M4a);
        no_rate.audio_bitrate = None;
        assert!(unique_audio(vec![no_rate]).is_empty());
    }

    #[test]
    fn test_video_sorted_descending_with_audio_first_on_equal_height() {
        let unique = unique_video(vec![
            video("160", "144p", Container::Mp4, false),
            video("299", "1080p60", Container::Mp4, false),
            video("18", "360p", Container::Mp4, true),
            video("137", "1080p", Container::Mp4, false),
            video("22", "720p", Container::Mp4, true),
            video("400", "1440p", Container::Mp4, false),
            video("999", "1080p", Container::Mp4, true),
        ]);

        assert_eq!(ids(&unique), vec!["400", "999", "299", "22", "18", "160"]);
        let heights: Vec<u32> = unique
            .iter()
            .map(|v| leading_number(v.quality_label.as_deref().unwrap()))
            .collect();
        assert!(heights.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_one_representative_per_key_with_audio_if_any() {
        let candidates = vec![
            video("1", "720p", Container::Webm, false),
            video("2", "720p", Container::Webm, true),
            video("3", "720p", Container::Mp4, false),
            video("4", "480p", Container::Webm, false),
            video("5", "480p", Container::Mp4, false),
            video("6", "480p", Container::Mp4, true),
            video("7", "480p", Container::Webm, true),
        ];
        let unique = unique_video(candidates.clone());

        for label in ["720p", "480p"] {
            let reps: Vec<_> = unique
                .iter()
                .filter(|v| v.quality_label.as_deref() == Some(label))
                .collect();
            assert_eq!(reps.len(), 1);
            let any_audio = candidates
                .iter()
                .any(|v| v.quality_label.as_deref() == Some(label) && v.has_audio);
            assert_eq!(reps[0].has_audio, any_audio);
        }
        assert_eq!(ids(&unique), vec!["2", "6"]);
    }

    #[test]
    fn test_audio_dedup_prefers_m4a() {
        let unique = unique_audio(vec![
            audio("250", 70, Container::Webm),
            audio("251", 160, Container::Webm),
            audio("249", 50, Container::Webm),
            audio("140", 160, Container::M4a),
            audio("139", 48, Container::M4a),
        ]);
        assert_eq!(ids(&unique), vec!["140", "250", "249", "139"]);
    }

    #[test]
    fn test_group_formats() {
        let formats = vec![
            source(video("18", "360p", Container::Mp4, true)),
            source(video("137", "1080p", Container::Mp4, false)),
            source(audio("140", 128, Container::M4a)),
            source(audio("251", 160, Container::Webm)),
        ];

        let groups = group_formats(&formats);
        assert_eq!(ids(&groups.video_with_audio), vec!["137", "18"]);
        assert!(groups.video_only.is_empty());
        assert_eq!(ids(&groups.audio_only), vec!["251", "140"]);
    }

    #[test]
    fn test_best_audio() {
        let formats = vec![
            source(video("22", "720p", Container::Mp4, true)),
            source(audio("251", 160, Container::Webm)),
            source(audio("140", 160, Container::M4a)),
            source(audio("250", 70, Container::Webm)),
        ];
        assert_eq!(best_audio(&formats).unwrap().variant.stream_id, "140");

        let formats = vec![source(video("22", "720p", Container::Mp4, true))];
        assert!(best_audio(&formats).is_none());
    }
}
