//! Text shaping helpers: markup stripping, placeholder detection, media
//! detection, and formula value formatting.

use regex::Regex;
use std::sync::OnceLock;

use super::Dynamic;
use super::cell::ContentKind;

/// Marker shown for cells that have never been run.
pub const NO_GENERATIONS_MARKER: &str = "No generations yet";
/// Marker shown while a run is in flight.
pub const GENERATING_MARKER: &str = "Generating...";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "m4v", "avi"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "flac", "aac"];

fn tag_re() -> &'static Regex {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    TAG_RE.get_or_init(|| Regex::new(r"<[^<>]+>").expect("markup tag regex must compile"))
}

fn history_re() -> &'static Regex {
    static HISTORY_RE: OnceLock<Regex> = OnceLock::new();
    HISTORY_RE.get_or_init(|| {
        Regex::new(r"(?m)^(Generation History|Generation \d+ \(.*\):)")
            .expect("generation history regex must compile")
    })
}

fn url_re() -> &'static Regex {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    URL_RE.get_or_init(|| {
        Regex::new(r#"(?:https?://[^\s"'<>]+|data:image/[A-Za-z+.-]+;base64,[A-Za-z0-9+/=]+)"#)
            .expect("url regex must compile")
    })
}

/// Strip markup tags and decode the handful of entities rich-text cells use.
pub fn strip_markup(text: &str) -> String {
    let text = text
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n");
    let stripped = tag_re().replace_all(&text, "");
    stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Whether a stored output is UI chrome rather than real content.
pub fn is_placeholder_output(output: &str) -> bool {
    let plain = strip_markup(output);
    if plain.is_empty() {
        return true;
    }
    plain == NO_GENERATIONS_MARKER
        || plain == GENERATING_MARKER
        || history_re().is_match(&plain)
}

/// Infer what kind of content an output string carries.
pub fn infer_content_kind(output: &str) -> ContentKind {
    let trimmed = output.trim();
    if trimmed.starts_with("data:image/") {
        return ContentKind::Image;
    }
    if trimmed.starts_with("data:video/") {
        return ContentKind::Video;
    }
    if trimmed.starts_with("data:audio/") {
        return ContentKind::Audio;
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://"))
        || trimmed.contains(char::is_whitespace)
    {
        return ContentKind::Text;
    }
    match url_extension(trimmed) {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => ContentKind::Image,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => ContentKind::Video,
        Some(ext) if AUDIO_EXTENSIONS.contains(&ext.as_str()) => ContentKind::Audio,
        _ => ContentKind::Text,
    }
}

fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// First image URL appearing anywhere in `text`.
pub fn find_image_url(text: &str) -> Option<String> {
    url_re()
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')', ']']))
        .find(|url| infer_content_kind(url) == ContentKind::Image)
        .map(str::to_string)
}

pub fn contains_image_url(text: &str) -> bool {
    find_image_url(text).is_some()
}

/// Format a Dynamic value for display.
pub fn format_dynamic(value: &Dynamic) -> String {
    if value.is_unit() {
        String::new()
    } else if let Ok(n) = value.as_float() {
        format_number(n)
    } else if let Ok(n) = value.as_int() {
        n.to_string()
    } else if let Ok(b) = value.as_bool() {
        if b { "TRUE" } else { "FALSE" }.to_string()
    } else if let Ok(s) = value.clone().into_string() {
        s
    } else {
        format!("{:?}", value)
    }
}

/// Format a number for display.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e10 {
        format!("{:.0}", n)
    } else {
        format!("{:.2}", n)
    }
}
