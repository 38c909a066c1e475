//! Deterministic content checks run on every draft.

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct ContentPolicy {
    pub max_length: usize,
    /// Matched case-insensitively
    pub banned_phrases: Vec<String>,
    pub max_hashtags: usize,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            max_length: 500,
            banned_phrases: vec![
                "as an ai".to_string(),
                "in today's fast-paced world".to_string(),
                "game-changer".to_string(),
                "delve".to_string(),
            ],
            max_hashtags: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum PolicyViolation {
    Empty,
    TooLong { length: usize, max: usize },
    BannedPhrase { phrase: String },
    TooManyHashtags { count: usize, max: usize },
}

impl PolicyViolation {
    /// Instruction appended to the next prompt.
    pub fn correction(&self) -> String {
        match self {
            PolicyViolation::Empty => "The previous draft was empty. Write the post text.".to_string(),
            PolicyViolation::TooLong { length, max } => format!(
                "The previous draft was {length} characters. Keep it under {max} characters."
            ),
            PolicyViolation::BannedPhrase { phrase } => {
                format!("Do not use the phrase \"{phrase}\".")
            }
            PolicyViolation::TooManyHashtags { count, max } => {
                format!("The previous draft used {count} hashtags. Use at most {max}.")
            }
        }
    }
}

impl ContentPolicy {
    pub fn check(&self, text: &str) -> Vec<PolicyViolation> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return vec![PolicyViolation::Empty];
        }

        let mut violations = Vec::new();

        let length = trimmed.chars().count();
        if length > self.max_length {
            violations.push(PolicyViolation::TooLong {
                length,
                max: self.max_length,
            });
        }

        let lowered = trimmed.to_lowercase();
        for phrase in &self.banned_phrases {
            if lowered.contains(&phrase.to_lowercase()) {
                violations.push(PolicyViolation::BannedPhrase {
                    phrase: phrase.clone(),
                });
            }
        }

        let count = count_hashtags(trimmed);
        if count > self.max_hashtags {
            violations.push(PolicyViolation::TooManyHashtags {
                count,
                max: self.max_hashtags,
            });
        }

        violations
    }
}

/// Words starting with `#` followed by at least one alphanumeric character.
pub fn count_hashtags(text: &str) -> usize {
    text.split_whitespace()
        .filter(|word| {
            let mut chars = word.chars();
            chars.next() == Some('#') && chars.next().is_some_and(char::is_alphanumeric)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_post_passes() {
        let policy = ContentPolicy::default();
        assert!(policy
            .check("Shipped the smallest possible fix today and it held. #buildinpublic")
            .is_empty());
    }

    #[test]
    fn collects_every_violation() {
        let policy = ContentPolicy {
            max_length: 20,
            ..ContentPolicy::default()
        };
        let violations = policy.check("This is a Game-Changer for everyone #one #two");
        assert_eq!(
            violations,
            vec![
                PolicyViolation::TooLong { length: 45, max: 20 },
                PolicyViolation::BannedPhrase {
                    phrase: "game-changer".into()
                },
                PolicyViolation::TooManyHashtags { count: 2, max: 1 },
            ]
        );
    }

    #[test]
    fn blank_is_only_empty() {
        assert_eq!(ContentPolicy::default().check("   \n"), vec![PolicyViolation::Empty]);
    }

    #[test]
    fn hashtag_counting_ignores_bare_hashes() {
        assert_eq!(count_hashtags("# not a tag, #rust and C# #2026"), 2);
    }

    #[test]
    fn corrections_name_the_problem() {
        let correction = PolicyViolation::TooManyHashtags { count: 3, max: 1 }.correction();
        assert!(correction.contains("3 hashtags"));
    }
}
