//! Operator decisions, kept out of the pipeline.
//!
//! The pipeline never prompts. A shell (the CLI) asks the question, feeds the
//! answer through [`decide`], and hands the resolved decision to the run.

use std::fmt;

/// A question the operator may need to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// The analytics endpoint looks like a template value.
    PlaceholderOverride {
        /// The configured URI.
        uri: String,
    },
    /// Run the freshly scheduled job once, now.
    ManualTrigger {
        /// Scheduler job name.
        job: String,
    },
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlaceholderOverride { uri } => write!(
                f,
                "Target URI `{uri}` looks like a placeholder. Deploy anyway? [y/N] "
            ),
            Self::ManualTrigger { job } => {
                write!(f, "Run scheduler job `{job}` once now to test it? [y/N] ")
            }
        }
    }
}

/// What the shell collected for a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// A line typed at the terminal.
    Typed(String),
    /// Resolved ahead of time by a flag, for non-interactive runs.
    Preset(bool),
}

/// Outcome of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Go ahead.
    Proceed,
    /// Do not go ahead.
    Decline,
}

impl Decision {
    /// Whether the decision is to proceed.
    #[must_use]
    pub const fn proceeds(self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Resolve an answer into a decision.
///
/// Both prompts default to declining: only an explicit `y`/`yes` or a
/// `true` preset proceeds.
#[must_use]
pub fn decide(_prompt: &Prompt, answer: &Answer) -> Decision {
    let proceed = match answer {
        Answer::Typed(line) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Answer::Preset(value) => *value,
    };
    if proceed {
        Decision::Proceed
    } else {
        Decision::Decline
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn placeholder() -> Prompt {
        Prompt::PlaceholderOverride {
            uri: "https://ga4-mcp-server-XXXX.run.app".to_owned(),
        }
    }

    #[rstest]
    #[case("y", Decision::Proceed)]
    #[case("YES\n", Decision::Proceed)]
    #[case(" yes ", Decision::Proceed)]
    #[case("n", Decision::Decline)]
    #[case("", Decision::Decline)]
    #[case("sure", Decision::Decline)]
    fn typed_answers(#[case] line: &str, #[case] expected: Decision) {
        assert_eq!(decide(&placeholder(), &Answer::Typed(line.to_owned())), expected);
    }

    #[test]
    fn preset_answers() {
        let prompt = Prompt::ManualTrigger {
            job: "ga4-analytics-agent-trigger".to_owned(),
        };
        assert_eq!(decide(&prompt, &Answer::Preset(true)), Decision::Proceed);
        assert_eq!(decide(&prompt, &Answer::Preset(false)), Decision::Decline);
    }

    #[test]
    fn prompt_text_names_the_subject() {
        assert!(placeholder().to_string().contains("XXXX"));
    }
}
