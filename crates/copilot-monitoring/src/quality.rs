//! Title/quality/season-episode parsing for the Recovery Loop's
//! QualityFallback strategy.
//!
//! The quality chain is fixed: `2160p -> 1080p -> 720p -> HDTV`, ending
//! there.

use once_cell::sync::Lazy;
use regex::Regex;

const QUALITY_CHAIN: &[&str] = &["2160p", "1080p", "720p", "HDTV"];

static QUALITY_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(2160p|1080p|720p|hdtv)").expect("valid regex"));
static EPISODE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)s\d{1,2}e\d{1,2}|season\s*\d+").expect("valid regex"));

/// True if `name` carries a season/episode token, i.e. belongs to TvManager
/// rather than MovieManager.
pub fn is_tv(name: &str) -> bool {
    EPISODE_TOKEN.is_match(name)
}

/// The quality tier embedded in `name`, normalized to the chain's casing.
pub fn current_quality(name: &str) -> Option<&'static str> {
    let found = QUALITY_TOKEN.find(name)?;
    QUALITY_CHAIN.iter().find(|tier| tier.eq_ignore_ascii_case(found.as_str())).copied()
}

/// The next tier down the chain, or `None` once at the floor (`HDTV`).
pub fn next_lower_tier(current: &str) -> Option<&'static str> {
    let idx = QUALITY_CHAIN.iter().position(|tier| tier.eq_ignore_ascii_case(current))?;
    QUALITY_CHAIN.get(idx + 1).copied()
}

/// `name` with its quality token and release-scene punctuation stripped, for
/// use as a manager-upstream search term.
pub fn title_without_quality(name: &str) -> String {
    let stripped = QUALITY_TOKEN.replace(name, "");
    stripped.replace(['.', '_'], " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_tv_episode_token() {
        assert!(is_tv("Breaking.Bad.S05E14.2160p"));
        assert!(!is_tv("Dune.Part.Two.2160p"));
    }

    #[test]
    fn downgrades_quality_chain_in_fixed_order() {
        assert_eq!(next_lower_tier("2160p"), Some("1080p"));
        assert_eq!(next_lower_tier("1080p"), Some("720p"));
        assert_eq!(next_lower_tier("720p"), Some("HDTV"));
        assert_eq!(next_lower_tier("HDTV"), None);
    }

    #[test]
    fn extracts_current_quality_case_insensitively() {
        assert_eq!(current_quality("breaking.bad.s05e14.2160P"), Some("2160p"));
    }

    #[test]
    fn strips_quality_token_and_punctuation_from_title() {
        assert_eq!(title_without_quality("Breaking.Bad.S05E14.2160p"), "Breaking Bad S05E14");
    }
}
