//! Prompt assembly for post generation.

/// Advisory context blended into the base prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptContext<'a> {
    pub base: &'a str,
    pub topic: Option<&'a str>,
    pub keywords: &'a [String],
    /// Best-performing past posts
    pub exemplars: &'a [String],
    /// Most recent posts; the draft must not repeat them
    pub recent: &'a [String],
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = ctx.base.trim().to_string();

    if let Some(topic) = ctx.topic.filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!("\n\nTopic: {}", topic.trim()));
    }
    if !ctx.keywords.is_empty() {
        prompt.push_str(&format!("\nWork in these keywords naturally: {}", ctx.keywords.join(", ")));
    }

    if !ctx.exemplars.is_empty() {
        prompt.push_str("\n\nPosts that resonated with readers (match the voice, not the content):");
        for exemplar in ctx.exemplars {
            prompt.push_str(&format!("\n- {}", one_line(exemplar)));
        }
    }

    if !ctx.recent.is_empty() {
        prompt.push_str("\n\nRecently published. Do not repeat these ideas or openings:");
        for recent in ctx.recent {
            prompt.push_str(&format!("\n- {}", one_line(recent)));
        }
    }

    prompt.push_str("\n\nReply with the post text only.");
    prompt
}

/// Append corrective instructions from the previous draft's failed checks.
pub fn with_corrections(prompt: &str, corrections: &[String]) -> String {
    if corrections.is_empty() {
        return prompt.to_string();
    }
    let mut corrected = prompt.to_string();
    corrected.push_str("\n\nThe previous draft was rejected:");
    for correction in corrections {
        corrected.push_str(&format!("\n- {correction}"));
    }
    corrected
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_only() {
        let prompt = build_prompt(&PromptContext {
            base: "Write about testing.",
            ..Default::default()
        });
        assert_eq!(prompt, "Write about testing.\n\nReply with the post text only.");
    }

    #[test]
    fn context_sections_are_included() {
        let keywords = vec!["latency".to_string(), "caching".to_string()];
        let exemplars = vec!["Cache\ninvalidation is hard.".to_string()];
        let recent = vec!["We cut p99 in half.".to_string()];
        let prompt = build_prompt(&PromptContext {
            base: "Write a post.",
            topic: Some("performance"),
            keywords: &keywords,
            exemplars: &exemplars,
            recent: &recent,
        });

        assert!(prompt.contains("Topic: performance"));
        assert!(prompt.contains("latency, caching"));
        assert!(prompt.contains("- Cache invalidation is hard."));
        assert!(prompt.contains("Do not repeat"));
        assert!(prompt.contains("- We cut p99 in half."));
    }

    #[test]
    fn corrections_are_appended_in_order() {
        let corrected = with_corrections("Base.", &["Shorter.".into(), "No hashtags.".into()]);
        assert!(corrected.starts_with("Base."));
        assert!(corrected.ends_with("- Shorter.\n- No hashtags."));
        assert_eq!(with_corrections("Base.", &[]), "Base.");
    }
}
