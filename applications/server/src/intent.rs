/// Intent classification for final ASR transcripts
use crate::config::CommandSettings;
use std::collections::HashSet;

/// Punctuation trimmed from both ends of an utterance before matching.
const TRIMMED_PUNCTUATION: &[char] = &['：', ':', '，', ',', '。', '！', '？', '!', '?'];

/// Strip surrounding whitespace, then surrounding CJK/ASCII punctuation.
pub fn normalize(text: &str) -> &str {
    text.trim()
        .trim_matches(|c: char| TRIMMED_PUNCTUATION.contains(&c))
}

/// `normalize` plus removal of every ASCII space, the form all keyword sets
/// are compared in.
pub fn normalize_compact(text: &str) -> String {
    normalize(text).replace(' ', "")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Stop,
    Refresh,
    Random,
    Play(String),
    Unmatched,
}

/// Classifies utterances against the configured keyword sets.
///
/// All sets are normalized-compact at construction; stop/refresh/random are
/// exact matches and checked before play-prefix extraction.
pub struct IntentParser {
    play_prefixes: Vec<String>,
    stop: HashSet<String>,
    refresh: HashSet<String>,
    random: HashSet<String>,
    whitelist: HashSet<String>,
}

impl IntentParser {
    pub fn new(commands: &CommandSettings) -> Self {
        Self {
            play_prefixes: commands
                .play_keywords
                .iter()
                .map(|k| normalize(k).to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            stop: keyword_set(&commands.stop_keywords),
            refresh: keyword_set(&commands.refresh_keywords),
            random: keyword_set(&commands.random_play_keywords),
            whitelist: keyword_set(&commands.interrupt_whitelist_keywords),
        }
    }

    pub fn classify(&self, text: &str) -> Intent {
        let compact = normalize_compact(text);
        if compact.is_empty() {
            return Intent::Unmatched;
        }
        if self.stop.contains(&compact) {
            return Intent::Stop;
        }
        if self.refresh.contains(&compact) {
            return Intent::Refresh;
        }
        if self.random.contains(&compact) {
            return Intent::Random;
        }
        for prefix in &self.play_prefixes {
            if let Some(rest) = text.strip_prefix(prefix.as_str()) {
                let keyword = normalize(rest);
                return if keyword.is_empty() {
                    Intent::Unmatched
                } else {
                    Intent::Play(keyword.to_string())
                };
            }
        }
        Intent::Unmatched
    }

    /// Whitelisted utterances reach the assistant without clearing local
    /// playback. A keyword matches on equality or as a substring of the
    /// utterance; the substring rule is deliberate (it survives fillers like
    /// "请问现在几点了"), so short whitelist keywords should be avoided in
    /// configuration.
    pub fn is_whitelisted(&self, text: &str) -> bool {
        let compact = normalize_compact(text);
        if compact.is_empty() {
            return false;
        }
        self.whitelist
            .iter()
            .any(|keyword| compact == *keyword || compact.contains(keyword.as_str()))
    }
}

fn keyword_set(keywords: &[String]) -> HashSet<String> {
    keywords
        .iter()
        .map(|k| normalize_compact(k))
        .filter(|k| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandSettings;

    fn parser() -> IntentParser {
        let mut commands = crate::config::AppConfig::default().commands;
        commands.interrupt_whitelist_keywords = vec!["几点了".to_string(), "你好".to_string()];
        IntentParser::new(&commands)
    }

    fn parser_with(commands: CommandSettings) -> IntentParser {
        IntentParser::new(&commands)
    }

    #[test]
    fn normalize_strips_whitespace_and_punctuation() {
        assert_eq!(normalize("  播放周杰伦！"), "播放周杰伦");
        assert_eq!(normalize("：你好。"), "你好");
        assert_eq!(normalize("hello?"), "hello");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn normalize_compact_removes_spaces() {
        assert_eq!(normalize_compact(" 停止 播放 ！"), "停止播放");
        assert_eq!(normalize_compact("stop now"), "stopnow");
    }

    #[test]
    fn classifies_exact_commands() {
        let parser = parser();
        assert_eq!(parser.classify("停止播放"), Intent::Stop);
        assert_eq!(parser.classify("停止 播放"), Intent::Stop);
        assert_eq!(parser.classify("刷新曲库"), Intent::Refresh);
        assert_eq!(parser.classify("随便听听"), Intent::Random);
    }

    #[test]
    fn classifies_play_with_keyword() {
        let parser = parser();
        assert_eq!(
            parser.classify("播放周杰伦"),
            Intent::Play("周杰伦".to_string())
        );
        assert_eq!(
            parser.classify("播放 hello"),
            Intent::Play("hello".to_string())
        );
        assert_eq!(
            parser.classify("播放hello！"),
            Intent::Play("hello".to_string())
        );
    }

    #[test]
    fn bare_play_prefix_is_unmatched() {
        let parser = parser();
        assert_eq!(parser.classify("播放"), Intent::Unmatched);
        assert_eq!(parser.classify("播放！"), Intent::Unmatched);
    }

    #[test]
    fn stop_wins_over_play_prefix() {
        // "停止播放" contains no play prefix at position 0, but even an
        // ambiguous phrasing resolves by check order: exact sets first.
        let mut commands = crate::config::AppConfig::default().commands;
        commands.play_keywords = vec!["停止".to_string()];
        let parser = parser_with(commands);
        assert_eq!(parser.classify("停止播放"), Intent::Stop);
    }

    #[test]
    fn unrelated_text_is_unmatched() {
        assert_eq!(parser().classify("今天天气怎么样"), Intent::Unmatched);
        assert_eq!(parser().classify(""), Intent::Unmatched);
    }

    #[test]
    fn whitelist_matches_exactly_and_by_containment() {
        let parser = parser();
        assert!(parser.is_whitelisted("几点了"));
        assert!(parser.is_whitelisted("请问现在几点了？"));
        assert!(parser.is_whitelisted("你好 呀"));
        assert!(!parser.is_whitelisted("今天天气怎么样"));
        assert!(!parser.is_whitelisted(""));
    }

    #[test]
    fn empty_keywords_are_dropped() {
        let mut commands = crate::config::AppConfig::default().commands;
        commands.stop_keywords = vec![String::new(), "  ".to_string()];
        commands.interrupt_whitelist_keywords = vec!["！".to_string()];
        let parser = parser_with(commands);
        assert_eq!(parser.classify("停止播放"), Intent::Unmatched);
        assert!(!parser.is_whitelisted("anything"));
    }
}
