//! Result normalization: canonical word list plus derived subtitle,
//! plain-text, and metadata views.
//!
//! Regrouping for subtitles happens again at this layer with the same
//! 10-word / 5-second rule the backends use, so the subtitle view never
//! depends on upstream segment granularity.

use crate::backend::{MAX_SEGMENT_SPAN_SECONDS, MAX_WORDS_PER_SEGMENT};
use crate::model::{NormalizedTranscript, TranscriptMetadata, TranscriptionResult, Word};

/// Convert a transcription result into the caller-facing normalized shape.
///
/// A result with zero segments still produces a well-formed empty transcript
/// rather than an error; this is the terminal fallback shape callers can
/// always rely on.
#[must_use]
pub fn normalize(result: &TranscriptionResult, source_ref: &str) -> NormalizedTranscript {
    let words = flatten_words(result);
    let plain_text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let srt = render_srt(&words);

    let word_count = words.len();
    let duration = words.last().map_or(0.0, |w| w.end);
    let confidence = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.confidence).sum::<f64>() / words.len() as f64
    };

    NormalizedTranscript {
        words,
        srt,
        plain_text,
        metadata: TranscriptMetadata {
            source_ref: source_ref.to_owned(),
            word_count,
            duration,
            language: result.language.clone(),
            confidence,
        },
    }
}

/// Flatten every segment's words in order, trimming surrounding whitespace.
/// Words that are empty after trimming are dropped; their neighbors keep
/// their original relative order.
fn flatten_words(result: &TranscriptionResult) -> Vec<Word> {
    result
        .segments
        .iter()
        .flat_map(|segment| segment.words.iter())
        .filter_map(|word| {
            let text = word.text.trim();
            if text.is_empty() {
                return None;
            }
            Some(Word {
                text: text.to_owned(),
                start: word.start,
                end: word.end,
                confidence: word.confidence,
            })
        })
        .collect()
}

/// Render an SRT document: blocks of at most 10 words or 5 seconds,
/// numbered from 1, timestamps formatted `HH:MM:SS,mmm`.
#[must_use]
pub fn render_srt(words: &[Word]) -> String {
    if words.is_empty() {
        return String::new();
    }

    let mut lines: Vec<String> = Vec::new();
    let mut block_index = 1;
    let mut group: Vec<&Word> = Vec::new();
    let mut group_start = 0.0_f64;

    let mut flush = |group: &mut Vec<&Word>, group_start: f64, block_index: &mut usize| {
        if group.is_empty() {
            return;
        }
        let end = group.last().map_or(group_start, |w| w.end);
        lines.push(block_index.to_string());
        lines.push(format!(
            "{} --> {}",
            format_srt_time(group_start),
            format_srt_time(end)
        ));
        lines.push(
            group
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        );
        lines.push(String::new());
        *block_index += 1;
        group.clear();
    };

    for word in words {
        if group.is_empty() {
            group_start = word.start;
        }
        let group_end = word.end;
        group.push(word);

        let full = group.len() >= MAX_WORDS_PER_SEGMENT
            || (group_end - group_start) >= MAX_SEGMENT_SPAN_SECONDS;
        if full {
            flush(&mut group, group_start, &mut block_index);
        }
    }
    flush(&mut group, group_start, &mut block_index);

    lines.join("\n")
}

/// Format seconds as an SRT timestamp with zero-padded fields.
#[must_use]
pub fn format_srt_time(seconds: f64) -> String {
    let clamped = seconds.max(0.0);
    let total_millis = (clamped * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Segment, TranscriptionResult};

    fn word(text: &str, start: f64, end: f64, confidence: f64) -> Word {
        Word {
            text: text.to_owned(),
            start,
            end,
            confidence,
        }
    }

    fn result_with_words(words: Vec<Word>) -> TranscriptionResult {
        let end = words.last().map_or(0.0, |w| w.end);
        TranscriptionResult {
            segments: vec![Segment {
                id: 0,
                start: 0.0,
                end,
                text: String::new(),
                words,
            }],
            language: Some("en".to_owned()),
            language_confidence: Some(0.95),
            duration_seconds: end,
        }
    }

    #[test]
    fn empty_result_normalizes_to_empty_shape() {
        let empty = TranscriptionResult {
            segments: vec![],
            language: None,
            language_confidence: None,
            duration_seconds: 0.0,
        };
        let normalized = normalize(&empty, "https://x/watch?v=abc12345678");
        assert!(normalized.words.is_empty());
        assert_eq!(normalized.srt, "");
        assert_eq!(normalized.plain_text, "");
        assert_eq!(normalized.metadata.word_count, 0);
        assert_eq!(normalized.metadata.duration, 0.0);
        assert_eq!(normalized.metadata.confidence, 0.0);
    }

    #[test]
    fn whitespace_only_words_are_dropped() {
        let result = result_with_words(vec![
            word(" hello ", 0.0, 0.5, 0.9),
            word("   ", 0.5, 0.7, 0.1),
            word("world", 0.8, 1.2, 0.7),
        ]);
        let normalized = normalize(&result, "ref");
        assert_eq!(normalized.plain_text, "hello world");
        assert_eq!(normalized.metadata.word_count, 2);
        assert!((normalized.metadata.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn srt_groups_twenty_three_words_into_three_blocks() {
        let words: Vec<Word> = (0..23)
            .map(|i| {
                let start = i as f64 * 0.3;
                word(&format!("w{i}"), start, start + 0.2, 0.5)
            })
            .collect();
        let result = result_with_words(words);
        let normalized = normalize(&result, "ref");

        let blocks: Vec<&str> = normalized.srt.split("\n\n").filter(|b| !b.is_empty()).collect();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].starts_with("1\n"));
        assert!(blocks[1].starts_with("2\n"));
        assert!(blocks[2].starts_with("3\n"));
        assert_eq!(blocks[0].lines().nth(2).unwrap().split(' ').count(), 10);
        assert_eq!(blocks[2].lines().nth(2).unwrap().split(' ').count(), 3);
        assert!(blocks[0].contains("00:00:00,000 --> 00:00:02,900"));
    }

    #[test]
    fn srt_timestamps_are_zero_padded() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(3661.042), "01:01:01,042");
        assert_eq!(format_srt_time(59.9994), "00:00:59,999");
        assert_eq!(format_srt_time(-1.0), "00:00:00,000");
    }

    #[test]
    fn metadata_reports_last_word_end_and_language() {
        let result = result_with_words(vec![
            word("a", 0.0, 1.0, 1.0),
            word("b", 1.0, 2.5, 0.5),
        ]);
        let normalized = normalize(&result, "https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(normalized.metadata.duration, 2.5);
        assert_eq!(normalized.metadata.language.as_deref(), Some("en"));
        assert_eq!(normalized.metadata.source_ref, "https://youtu.be/dQw4w9WgXcQ");
        assert!((normalized.metadata.confidence - 0.75).abs() < 1e-9);
    }
}
