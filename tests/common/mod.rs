//! Shared test helpers: a scripted, recording command runner

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use kn_quickstart::command::{CommandOutput, CommandRunner, CommandSpec, DetachedProcess};
use kn_quickstart::Result;

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub command: String,
    pub stdin: Option<String>,
}

/// Scripted answer for commands starting with `prefix`
struct Rule {
    prefix: String,
    output: CommandOutput,
    once: bool,
}

/// Runner that answers from a script and records every call.
///
/// Responses are matched by command-line prefix; the first matching rule
/// wins and unmatched commands succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    rules: Mutex<Vec<Rule>>,
    missing_tools: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
    detached: Mutex<Vec<String>>,
}

impl RecordingRunner {
    /// Runner whose backend tools report supported versions
    pub fn new() -> Self {
        Self::default()
            .on("kind version", CommandOutput::ok("kind v0.26.0 go1.23.4 linux/amd64\n"))
            .on("minikube version --short", CommandOutput::ok("v1.35.0\n"))
    }

    /// Answer commands starting with `prefix` with `output`.
    ///
    /// Later rules take precedence over earlier ones.
    pub fn on(self, prefix: &str, output: CommandOutput) -> Self {
        self.push_rule(prefix, output, false)
    }

    /// Like [`on`](Self::on), but the rule is dropped after its first match
    pub fn once(self, prefix: &str, output: CommandOutput) -> Self {
        self.push_rule(prefix, output, true)
    }

    fn push_rule(self, prefix: &str, output: CommandOutput, once: bool) -> Self {
        self.rules.lock().unwrap().insert(
            0,
            Rule {
                prefix: prefix.to_string(),
                output,
                once,
            },
        );
        self
    }

    /// Report `tool` as absent from PATH
    pub fn without_tool(self, tool: &str) -> Self {
        self.missing_tools.lock().unwrap().insert(tool.to_string());
        self
    }

    /// Every command line run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Every call run so far, with stdin
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Detached processes started so far
    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().unwrap().clone()
    }

    /// Index of the first command starting with `prefix`
    pub fn position(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .position(|c| c.starts_with(prefix))
            .unwrap_or_else(|| panic!("no command starting with {:?} in {:#?}", prefix, self.commands()))
    }

    /// Number of commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Whether any command contains `needle`
    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let command = spec.command_line();
        self.calls.lock().unwrap().push(Call {
            command: command.clone(),
            stdin: spec.stdin.clone(),
        });
        let mut rules = self.rules.lock().unwrap();
        let output = match rules
            .iter()
            .position(|rule| command.starts_with(rule.prefix.as_str()))
        {
            Some(i) if rules[i].once => rules.remove(i).output,
            Some(i) => rules[i].output.clone(),
            None => CommandOutput::ok(""),
        };
        Ok(output)
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<DetachedProcess> {
        self.detached.lock().unwrap().push(spec.command_line());
        Ok(DetachedProcess {
            command: spec.command_line(),
            pid: Some(4242),
        })
    }

    fn tool_available(&self, tool: &str) -> bool {
        !self.missing_tools.lock().unwrap().contains(tool)
    }
}
