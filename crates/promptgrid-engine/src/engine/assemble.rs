//! Prompt assembly.
//!
//! Builds the text sent to a generation provider from a cell's prompt:
//!
//! - **Pins / template**: pinned generations are prepended; otherwise the
//!   cell's template wraps the prompt (`{input}` marks where it goes)
//! - **Substitution**: each `{{...}}` occurrence is replaced, in order, by the
//!   value resolved for it
//! - **Image hand-off**: image-to-video models get an `image_url:` header

use super::deps::token_re;

/// Placeholder inside a cell template that receives the prompt.
pub const TEMPLATE_INPUT: &str = "{input}";

/// Replace each reference occurrence with the matching entry of `values`.
///
/// `values[i]` belongs to the i-th token returned by
/// [`parse_references`](super::parse_references) on the same text. Occurrences
/// without a value are left untouched. Values are inserted verbatim and never
/// rescanned.
pub fn substitute_references(text: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (whole, value) in token_re().find_iter(text).zip(values) {
        out.push_str(&text[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Wrap `input` with a cell template.
pub fn apply_template(template: &str, input: &str) -> String {
    if template.contains(TEMPLATE_INPUT) {
        template.replace(TEMPLATE_INPUT, input)
    } else if input.is_empty() {
        template.to_string()
    } else {
        format!("{}\n\n{}", template, input)
    }
}

/// Prepend rendered pins to a prompt.
pub fn prepend_block(block: &str, prompt: &str) -> String {
    if prompt.trim().is_empty() {
        block.to_string()
    } else {
        format!("{}\n\n{}", block, prompt)
    }
}

/// Whether `model` is an image-to-video model, by substring markers.
pub fn is_image_to_video_model(model: &str, markers: &[String]) -> bool {
    let model = model.to_ascii_lowercase();
    markers
        .iter()
        .any(|marker| model.contains(&marker.to_ascii_lowercase()))
}

/// The fixed shape image-to-video providers expect.
pub fn attach_image_url(url: &str, prompt: &str) -> String {
    format!("image_url: {}\nprompt: {}", url, prompt)
}
