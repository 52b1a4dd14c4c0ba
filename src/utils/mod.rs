/// Replaces every character that is not an ASCII letter or digit with `_`.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn attachment_filename(title: &str, extension: &str) -> String {
    let stem = sanitize_title(title);
    let stem = if stem.is_empty() { "download".to_string() } else { stem };
    format!("{}.{}", stem, extension)
}
