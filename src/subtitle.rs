use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::error::{Result, SubtitleError};

/// Maximum characters per subtitle line after wrapping
pub const LINE_WRAP_LIMIT: usize = 50;

/// One numbered entry of an SRT file; times are in milliseconds
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Parse SRT content into cues, ignoring the original numbering
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleCue>> {
    let normalized = content.replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()).peekable();
        let Some(first) = lines.peek().copied() else {
            continue;
        };

        if !first.contains("-->") {
            // numeric index line
            lines.next();
        }
        let timing = lines
            .next()
            .ok_or_else(|| SubtitleError::InvalidSubtitle(format!("cue without timing: {}", first)))?;
        let (start, end) = parse_timing(timing)?;

        let text = lines.collect::<Vec<_>>().join("\n");
        cues.push(SubtitleCue {
            start_ms: start,
            end_ms: end,
            text,
        });
    }

    Ok(cues)
}

fn parse_timing(line: &str) -> Result<(u64, u64)> {
    let (start, rest) = line
        .split_once("-->")
        .ok_or_else(|| SubtitleError::InvalidSubtitle(format!("bad timing line: {}", line)))?;
    // Anything after the end time (positioning) is dropped
    let end = rest.split_whitespace().next().unwrap_or_default();
    Ok((parse_srt_time(start.trim())?, parse_srt_time(end)?))
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too)
fn parse_srt_time(value: &str) -> Result<u64> {
    let invalid = || SubtitleError::InvalidSubtitle(format!("bad timestamp: {}", value));
    let (hms, millis) = value.split_once([',', '.']).ok_or_else(invalid)?;

    let parts: Vec<u64> = hms
        .split(':')
        .map(|p| p.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| invalid())?;
    let [hours, minutes, seconds] = parts[..] else {
        return Err(invalid());
    };
    // A short fraction is a decimal fraction of a second: ",5" is 500 ms
    if millis.is_empty() || millis.len() > 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let millis: u64 = format!("{:0<3}", millis).parse().map_err(|_| invalid())?;

    Ok(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

/// Format milliseconds to SRT time format (HH:MM:SS,mmm)
fn format_srt_time(total_milliseconds: u64) -> String {
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render cues as SRT, renumbering from 1
pub fn format_srt(cues: &[SubtitleCue]) -> String {
    let mut srt_content = String::new();

    for (index, cue) in cues.iter().enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(cue.start_ms),
            format_srt_time(cue.end_ms),
            cue.text.trim()
        ));
    }

    srt_content
}

/// Greedy word wrap of a cue's text into lines of at most `limit` characters
pub fn wrap_text(text: &str, limit: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };

        if needed > limit && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines.join("\n")
}

pub fn wrap_cues(cues: &mut [SubtitleCue]) {
    for cue in cues.iter_mut() {
        cue.text = wrap_text(&cue.text, LINE_WRAP_LIMIT);
    }
}

/// Re-wrap the lines of an SRT file in place
pub async fn wrap_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    debug!("Wrapping lines in {}", path.display());

    let content = fs::read_to_string(path).await?;
    let mut cues = parse_srt(&content)?;
    wrap_cues(&mut cues);
    fs::write(path, format_srt(&cues)).await?;
    Ok(())
}

/// Convert SRT content to WebVTT
pub fn srt_to_vtt(content: &str) -> Result<String> {
    let cues = parse_srt(content)?;
    let mut vtt = String::from("WEBVTT\n\n");

    for cue in &cues {
        vtt.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_srt_time(cue.start_ms).replace(',', "."),
            format_srt_time(cue.end_ms).replace(',', "."),
            cue.text.trim()
        ));
    }

    Ok(vtt)
}
