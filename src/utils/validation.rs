use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Checks that `name` is a single path component that cannot leave the
/// directory it is joined to. Used for file names, new names and staging ids.
pub fn validate_file_name(name: &str) -> Result<&str, ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        tracing::warn!("Path traversal attempt detected: {}", name);
        return Err(ValidationError {
            code: "PATH_TRAVERSAL",
            message: format!("Filename '{}' must not contain path separators", name),
        });
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename contains control characters".to_string(),
        });
    }

    if name.len() > 255 {
        return Err(ValidationError {
            code: "FILENAME_TOO_LONG",
            message: format!("Filename is {} bytes, the limit is 255", name.len()),
        });
    }

    Ok(name)
}

/// Strips any directory part a browser may have sent along with an
/// uploaded file's name (old IE sends full client paths).
pub fn client_file_name(raw: &str) -> &str {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    Path::new(last)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_name_accepts_plain_names() {
        assert_eq!(validate_file_name("report.txt"), Ok("report.txt"));
        assert_eq!(validate_file_name("ảnh đẹp.png"), Ok("ảnh đẹp.png"));
    }

    #[test]
    fn test_validate_file_name_rejects_traversal() {
        assert_eq!(validate_file_name("../secret").unwrap_err().code, "PATH_TRAVERSAL");
        assert_eq!(validate_file_name("a\\b").unwrap_err().code, "PATH_TRAVERSAL");
        assert_eq!(validate_file_name("..").unwrap_err().code, "PATH_TRAVERSAL");
        assert_eq!(validate_file_name("  ").unwrap_err().code, "INVALID_FILENAME");
        assert_eq!(validate_file_name("a\nb").unwrap_err().code, "INVALID_FILENAME");
    }

    #[test]
    fn test_client_file_name() {
        assert_eq!(client_file_name("C:\\Users\\me\\photo.jpg"), "photo.jpg");
        assert_eq!(client_file_name("dir/photo.jpg"), "photo.jpg");
        assert_eq!(client_file_name("photo.jpg"), "photo.jpg");
    }
}
