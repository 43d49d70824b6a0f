//! File-naming conventions shared by the upload gateway, the processor and
//! the progress endpoints.
//!
//! All job state lives on the filesystem, so these derivations *are* the job
//! protocol: an input file `{ts}_{name}` has a debug log
//! `{ts}_{name}.debug.txt` and, once processing finished, a marker
//! `{ts}_{name}.success` next to the produced output file.

use std::path::Path;

/// Suffix appended to an input file name to form its debug-log name.
pub const DEBUG_SUFFIX: &str = ".debug.txt";

/// Suffix of the completion marker written by the processor.
pub const SUCCESS_SUFFIX: &str = ".success";

/// Reduce a caller-supplied file name to its final path component.
///
/// Returns `None` for names with no usable component (`""`, `"."`, `".."`,
/// `"/"`), which handlers reject as a client error. Anything else is safe to
/// join onto a data directory without escaping it.
pub fn sanitize(raw: &str) -> Option<String> {
    Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Name given to an uploaded file inside the input directory. The timestamp
/// prefix keeps concurrent uploads from clashing (at second granularity).
pub fn input_name(unix_seconds: u64, original: &str) -> String {
    format!("{}_{}", unix_seconds, original)
}

/// Debug-log name for an input file.
pub fn debug_name(input: &str) -> String {
    format!("{}{}", input, DEBUG_SUFFIX)
}

/// Success-marker name derived from a debug-log name.
///
/// Strips a trailing `.debug.txt` when the remainder is non-empty and appends
/// `.success`. A name without the suffix (or consisting solely of it) gets
/// `.success` appended to the whole name; clients passing such names get a
/// marker that the processor will never write, which matches the observed
/// behavior of the protocol and is kept as-is.
pub fn success_name(debug: &str) -> String {
    let base = match debug.strip_suffix(DEBUG_SUFFIX) {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => debug,
    };
    format!("{}{}", base, SUCCESS_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_plain_names() {
        assert_eq!(sanitize("scan.pdf").as_deref(), Some("scan.pdf"));
        assert_eq!(
            sanitize("1700000000_scan.pdf.debug.txt").as_deref(),
            Some("1700000000_scan.pdf.debug.txt")
        );
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize("/etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize("dir/scan.pdf").as_deref(), Some("scan.pdf"));
    }

    #[test]
    fn sanitize_rejects_empty_components() {
        assert_eq!(sanitize(""), None);
        assert_eq!(sanitize("."), None);
        assert_eq!(sanitize(".."), None);
        assert_eq!(sanitize("/"), None);
    }

    #[test]
    fn input_name_is_timestamp_underscore_base() {
        assert_eq!(input_name(1700000000, "scan.pdf"), "1700000000_scan.pdf");
    }

    #[test]
    fn debug_name_appends_suffix() {
        assert_eq!(
            debug_name("1700000000_scan.pdf"),
            "1700000000_scan.pdf.debug.txt"
        );
    }

    #[test]
    fn success_name_strips_debug_suffix() {
        assert_eq!(
            success_name("1700000000_scan.pdf.debug.txt"),
            "1700000000_scan.pdf.success"
        );
    }

    #[test]
    fn success_name_without_suffix_appends_to_whole_name() {
        assert_eq!(success_name("out.pdf"), "out.pdf.success");
    }

    #[test]
    fn success_name_of_bare_suffix_is_not_stripped() {
        assert_eq!(success_name(".debug.txt"), ".debug.txt.success");
    }
}
