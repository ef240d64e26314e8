use std::sync::OnceLock;

use regex::Regex;

fn csi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // ESC '[' <params> <final letter>. LinuxGSM emits SGR colors and the
        // occasional cursor/erase sequence; private-mode `?` shows up too.
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("ANSI pattern compiles")
    })
}

/// Remove terminal control sequences from captured output.
///
/// Runs to a fixpoint: removing `ESC[0m` from `ESC ESC[0m [0m` leaves a fresh
/// sequence behind, which a single pass would miss.
pub fn strip_ansi(text: &str) -> String {
    let re = csi_regex();
    let mut out = text.to_string();
    while re.is_match(&out) {
        out = re.replace_all(&out, "").into_owned();
    }
    out
}
