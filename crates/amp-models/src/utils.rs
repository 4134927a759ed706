//! File naming helpers shared by the generation pipelines.

/// Fallback segment used when a name sanitizes to nothing.
pub const DEFAULT_PATH_SEGMENT: &str = "general";

/// Turn a free-text name into a lowercase, hyphen-separated path segment.
///
/// Non-alphanumeric runs become a single `-` and leading/trailing hyphens are
/// trimmed. The function is idempotent.
pub fn sanitize_path_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    if out.is_empty() {
        DEFAULT_PATH_SEGMENT.to_string()
    } else {
        out
    }
}

/// Stem used when a client-supplied name has nothing usable left.
pub const DEFAULT_FILE_STEM: &str = "upload";

/// Split a client-supplied file name into stem and extension.
///
/// Any directory part (`/` or `\` separated) is dropped first. Names without
/// a dot get `fallback_ext`; an empty stem becomes [`DEFAULT_FILE_STEM`].
pub fn split_file_name<'a>(name: &'a str, fallback_ext: &'a str) -> (&'a str, &'a str) {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, ext),
        _ => (base, fallback_ext),
    };
    if stem.is_empty() {
        (DEFAULT_FILE_STEM, ext)
    } else {
        (stem, ext)
    }
}

/// Build `{prefix}{stem}_{millis}.{ext}`.
pub fn timestamped_file_name(prefix: &str, stem: &str, millis: i64, ext: &str) -> String {
    format!("{}{}_{}.{}", prefix, stem, millis, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_examples() {
        assert_eq!(sanitize_path_segment("Acme Soda!! 2.0"), "acme-soda-2-0");
        assert_eq!(sanitize_path_segment("--Energy  Drink--"), "energy-drink");
        assert_eq!(sanitize_path_segment("Café Crème"), "caf-cr-me");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for input in ["Acme Soda!! 2.0", "  ", "a__b", "ÄÖÜ", "x-y-z", "Sparkling Water 500ml"] {
            let once = sanitize_path_segment(input);
            assert_eq!(sanitize_path_segment(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn test_sanitize_empty_defaults() {
        assert_eq!(sanitize_path_segment(""), "general");
        assert_eq!(sanitize_path_segment("!!!"), "general");
    }

    #[test]
    fn test_split_file_name() {
        assert_eq!(split_file_name("soda_can.png", "bin"), ("soda_can", "png"));
        assert_eq!(split_file_name("archive.tar.gz", "bin"), ("archive.tar", "gz"));
        assert_eq!(split_file_name("noext", "jpg"), ("noext", "jpg"));
        assert_eq!(split_file_name(".hidden", "jpg"), (".hidden", "jpg"));
    }

    #[test]
    fn test_split_file_name_drops_directories() {
        assert_eq!(split_file_name("photos/cola.png", "bin"), ("cola", "png"));
        assert_eq!(split_file_name("C:\\Users\\me\\cola.jpg", "bin"), ("cola", "jpg"));
        assert_eq!(split_file_name("../../etc/passwd", "bin"), ("passwd", "bin"));
        assert_eq!(split_file_name("photos/", "png"), ("upload", "png"));
        assert_eq!(split_file_name("", "png"), ("upload", "png"));
    }

    #[test]
    fn test_timestamped_file_name() {
        assert_eq!(
            timestamped_file_name("generated_", "soda", 1700000000000, "png"),
            "generated_soda_1700000000000.png"
        );
    }
}
