//! Retry policy for failed turns.

use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::Regex;

/// Exponential backoff without jitter: attempt `n` waits `base × 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::from_millis(100),
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// retries are used up.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

static CONTEXT_LENGTH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"This model's maximum context length is (\d+) tokens. However, your messages resulted in (\d+) tokens",
    )
    .ok()
});

/// Shorten `prompt` when `error` says the context window was exceeded.
///
/// Drops `10 + overflow × 4` characters from the end, roughly four
/// characters per token. Any other error leaves the prompt as is.
pub fn cut_prompt(error: &str, prompt: &str) -> String {
    let Some(re) = CONTEXT_LENGTH.as_ref() else {
        return prompt.to_string();
    };
    let Some(caps) = re.captures(error) else {
        return prompt.to_string();
    };
    let (Ok(max), Ok(current)) = (caps[1].parse::<usize>(), caps[2].parse::<usize>()) else {
        return prompt.to_string();
    };
    if max > current {
        return prompt.to_string();
    }

    let reduce_by = 10 + (current - max) * 4;
    let len = prompt.chars().count();
    if len <= reduce_by {
        return prompt.to_string();
    }
    crate::setup::truncate_chars(prompt, len - reduce_by).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_limit() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(800)));
        assert_eq!(policy.next_delay(4), None);
    }

    #[test]
    fn zero_retries_never_waits() {
        assert_eq!(RetryPolicy::new(0).next_delay(1), None);
    }

    #[test]
    fn large_attempt_counts_saturate_instead_of_stopping() {
        let policy = RetryPolicy::new(40);
        let capped = policy.next_delay(32).unwrap();
        assert!(capped > policy.next_delay(31).unwrap());
        assert_eq!(policy.next_delay(40), Some(capped));
        assert_eq!(policy.next_delay(41), None);
        assert!(RetryPolicy::new(u32::MAX).next_delay(u32::MAX).is_some());
    }

    #[test]
    fn context_overflow_shortens_the_prompt() {
        let error = "API request failed: This model's maximum context length is 100 tokens. \
                     However, your messages resulted in 102 tokens. (status: 400)";
        let prompt = "x".repeat(30);
        // 10 + 2 * 4 = 18
        assert_eq!(cut_prompt(error, &prompt).len(), 12);
    }

    #[test]
    fn unrelated_errors_keep_the_prompt() {
        assert_eq!(cut_prompt("Network error: reset", "hello"), "hello");
    }

    #[test]
    fn short_prompts_are_kept() {
        let error = "This model's maximum context length is 10 tokens. \
                     However, your messages resulted in 50 tokens";
        assert_eq!(cut_prompt(error, "tiny"), "tiny");
    }
}
