use std::io;
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

const SLUG_FALLBACK: &str = "file";

/// Lowercase ASCII alphanumerics, every other run collapsed to one `-`,
/// no leading or trailing `-`. Accented letters lose their accents
/// (compatibility decomposition). Idempotent.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.nfkd().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        SLUG_FALLBACK.to_string()
    } else {
        slug
    }
}

/// Splits `file_name` into the base name to use and its extension
/// (with the leading dot, or empty).
fn split_name(file_name: &str, base_override: Option<&str>, slug: bool) -> (String, String) {
    let path = Path::new(file_name);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let stem = base_override
        .map(str::to_string)
        .or_else(|| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
        .unwrap_or_default();

    let base = if slug { slugify(&stem) } else { stem };
    (base, extension)
}

/// Picks the first free path for `file_name` in `directory`:
/// `base.ext`, then `base-1.ext`, `base-2.ext`, ...
///
/// Nothing is created. Two callers resolving concurrently can get the same
/// path; whoever writes second overwrites.
pub async fn resolve(
    directory: &Path,
    file_name: &str,
    base_override: Option<&str>,
    slug: bool,
) -> io::Result<PathBuf> {
    let (base, extension) = split_name(file_name, base_override, slug);

    let candidate = directory.join(format!("{}{}", base, extension));
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let mut index: u64 = 1;
    loop {
        let candidate = directory.join(format!("{}-{}{}", base, index, extension));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        index += 1;
    }
}
