//! Yes/no confirmation prompts
//!
//! Decision logic never touches the terminal directly; it asks a
//! [`Confirm`] implementation, which tests replace with [`ScriptedPrompt`].

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};

use crate::Result;

/// Source of yes/no answers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Confirm: Send + Sync {
    /// Ask `question`; an empty answer means `default`
    async fn confirm(&self, question: &str, default: bool) -> Result<bool>;
}

/// Prompts on stdout and reads one line per question from a shared reader.
///
/// The reader outlives each prompt, so answers piped in ahead of time
/// (`printf 'y\ny\n' | kn-quickstart ...`) are consumed one line per
/// question instead of being lost in a discarded buffer.
#[derive(Debug)]
pub struct TerminalPrompt<R = BufReader<Stdin>> {
    input: tokio::sync::Mutex<R>,
}

impl TerminalPrompt {
    /// Prompt reading answers from stdin
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> TerminalPrompt<R> {
    /// Prompt reading answers from `input`
    pub fn from_reader(input: R) -> Self {
        Self {
            input: tokio::sync::Mutex::new(input),
        }
    }
}

#[async_trait]
impl<R> Confirm for TerminalPrompt<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        let mut reader = self.input.lock().await;

        let hint = if default { "[Y/n]" } else { "[y/N]" };
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("{} {}: ", question, hint).as_bytes())
            .await?;
        stdout.flush().await?;

        let mut input = String::new();
        reader.read_line(&mut input).await?;
        Ok(parse_answer(&input, default))
    }
}

/// Replays a fixed list of answers, then falls back to each prompt's default
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    /// Answer prompts with `answers`, in order
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Questions asked so far
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Confirm for ScriptedPrompt {
    async fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(question.to_string());
        }
        let next = self
            .answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front());
        Ok(next.unwrap_or(default))
    }
}

/// Interpret a typed answer. Only `y`/`yes` and `n`/`no` count, case-insensitive.
pub fn parse_answer(input: &str, default: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_are_case_insensitive() {
        assert!(parse_answer("Y\n", false));
        assert!(parse_answer("yes", false));
        assert!(!parse_answer("N", true));
        assert!(!parse_answer("no\n", true));
    }

    #[test]
    fn empty_or_unknown_answer_uses_default() {
        assert!(!parse_answer("\n", false));
        assert!(parse_answer("", true));
        assert!(!parse_answer("maybe", false));
    }

    #[tokio::test]
    async fn piped_answers_are_read_one_per_question() {
        let prompt = TerminalPrompt::from_reader(BufReader::new(&b"y\ny\n"[..]));
        assert!(prompt.confirm("first?", false).await.unwrap());
        assert!(prompt.confirm("second?", false).await.unwrap());
        // Input exhausted: fall back to the default
        assert!(prompt.confirm("third?", true).await.unwrap());
        assert!(!prompt.confirm("fourth?", false).await.unwrap());
    }

    #[tokio::test]
    async fn scripted_prompt_replays_then_defaults() {
        let prompt = ScriptedPrompt::new([true, false]);
        assert!(prompt.confirm("first?", false).await.unwrap());
        assert!(!prompt.confirm("second?", true).await.unwrap());
        assert!(prompt.confirm("third?", true).await.unwrap());
        assert_eq!(prompt.asked(), vec!["first?", "second?", "third?"]);
    }
}
