//! Text cleanup before synthesis

use std::sync::LazyLock;

use regex::Regex;

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

static PICTOGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\x{2011}-\x{26FF}\x{2700}-\x{27BF}\x{E000}-\x{F8FF}\x{1F000}-\x{1F7FF}\x{1F910}-\x{1F9FF}]",
    )
    .expect("valid regex")
});

/// Strip markup and pictographs so only speakable text remains
///
/// `<br>` variants become line breaks, every other tag is removed, then emoji
/// and symbol ranges are dropped and the result is trimmed.
#[must_use]
pub fn sanitize(text: &str) -> String {
    let text = LINE_BREAK.replace_all(text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = PICTOGRAPH.replace_all(&text, "");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags() {
        assert_eq!(
            sanitize("<p>受付は<b>2階</b>です</p>"),
            "受付は2階です"
        );
    }

    #[test]
    fn test_line_breaks() {
        assert_eq!(sanitize("一行目<br>二行目<BR/>三行目"), "一行目\n二行目\n三行目");
    }

    #[test]
    fn test_strips_emoji() {
        assert_eq!(sanitize("ようこそ😊！🎉"), "ようこそ！");
        assert_eq!(sanitize("OK ✅ ★"), "OK");
    }

    #[test]
    fn test_blank_after_cleanup() {
        assert_eq!(sanitize("  <i></i> 👍 "), "");
    }
}
