//! Teams reaction labels to host emoji names.

/// Teams' named reactions, and glyphs whose host name differs from the
/// gemoji shortcode.
const NAMED_REACTIONS: &[(&str, &str)] = &[
    ("like", "+1"),
    ("sad", "cry"),
    ("angry", "angry"),
    ("laugh", "laughing"),
    ("heart", "heart"),
    ("surprised", "open_mouth"),
    ("checkmarkbutton", "white_check_mark"),
];

/// Host emoji name for a Teams reaction label, if known.
pub fn emoji_name(reaction: &str) -> Option<&'static str> {
    if let Some((_, name)) = NAMED_REACTIONS.iter().find(|(label, _)| *label == reaction) {
        return Some(*name);
    }
    if reaction.is_empty() {
        return None;
    }

    emojis::get(reaction)
        .or_else(|| {
            let bare: String = reaction.chars().filter(|c| *c != '\u{fe0f}').collect();
            emojis::get(&bare)
        })
        .and_then(|emoji| emoji.shortcode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_reactions() {
        assert_eq!(emoji_name("like"), Some("+1"));
        assert_eq!(emoji_name("checkmarkbutton"), Some("white_check_mark"));
        assert_eq!(emoji_name("surprised"), Some("open_mouth"));
    }

    #[test]
    fn test_unicode_reactions() {
        assert_eq!(emoji_name("👍"), Some("+1"));
        assert_eq!(emoji_name("❤\u{fe0f}"), Some("heart"));
        assert_eq!(emoji_name("🚀"), Some("rocket"));
    }

    #[test]
    fn test_unicode_beyond_named_list() {
        assert_eq!(emoji_name("🍕"), Some("pizza"));
        assert_eq!(emoji_name("🐙"), Some("octopus"));
    }

    #[test]
    fn test_unknown_reaction() {
        assert_eq!(emoji_name("custom-party-parrot"), None);
        assert_eq!(emoji_name(""), None);
    }
}
