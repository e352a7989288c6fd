use chrono::NaiveDateTime;
use image::ImageFormat;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.3f";
const TIMESTAMP_LEN: usize = 23;

/// File extension for an image payload, from its magic bytes.
pub(crate) fn extension_for(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(ImageFormat::Jpeg) | Err(_) => "jpg",
        Ok(format) => format.extensions_str().first().copied().unwrap_or("jpg"),
    }
}

/// Camera id reduced to `[A-Za-z0-9-]` so it is safe inside a filename.
pub(crate) fn camera_slug(camera: &str) -> String {
    let slug: String = camera
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    if slug.is_empty() {
        "camera".into()
    } else {
        slug
    }
}

/// `2024-01-01_12-30-05.123_balkon.jpg`, with `_N` appended for `attempt > 1`.
pub(crate) fn picture_filename(
    camera: &str,
    captured_at: NaiveDateTime,
    extension: &str,
    attempt: u32,
) -> String {
    let stamp = captured_at.format(TIMESTAMP_FORMAT);
    let slug = camera_slug(camera);
    if attempt > 1 {
        format!("{stamp}_{slug}_{attempt}.{extension}")
    } else {
        format!("{stamp}_{slug}.{extension}")
    }
}

/// Recovers camera and capture time from a name produced by
/// [`picture_filename`]. Used to adopt files missing from the index.
pub(crate) fn parse_filename(filename: &str) -> Option<(String, NaiveDateTime)> {
    let stem = filename.rsplit_once('.').map(|(stem, _)| stem)?;
    if stem.len() <= TIMESTAMP_LEN + 1 || !stem.is_char_boundary(TIMESTAMP_LEN) {
        return None;
    }
    let (stamp, rest) = stem.split_at(TIMESTAMP_LEN);
    let captured_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    let camera = rest.strip_prefix('_')?.split('_').next()?;
    if camera.is_empty() {
        return None;
    }
    Some((camera.to_string(), captured_at))
}

/// Rejects names that could escape the archive directory.
pub(crate) fn is_plain_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains(['/', '\\'])
        && filename != "."
        && !filename.contains("..")
}
