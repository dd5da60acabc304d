//! Utility functions for processors.

use std::path::Path;

use process_utils::CapturedOutput;

/// Video containers a recorder may be writing next to a danmaku file.
pub const VIDEO_EXTENSIONS: &[&str] = &["flv", "mp4", "ts", "mkv"];

/// Case-insensitive extension check.
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// File stem as an owned string, if the path has one.
pub fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// Escape a value for use inside a single-quoted ffmpeg filter option.
pub fn escape_filter_path(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Short description of why a tool run failed.
pub fn describe_exit(tool: &str, output: &CapturedOutput) -> String {
    let code = output
        .status
        .code()
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    match output.last_stderr_line() {
        Some(line) => format!("{tool} exited with {code}: {line}"),
        None => format!("{tool} exited with {code}"),
    }
}
