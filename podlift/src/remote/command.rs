//! Structured remote command builder
//!
//! A [`Script`] is an ordered list of [`Step`]s joined with `&&`, so a failing
//! step stops everything after it. Arguments are quoted for a POSIX shell
//! unless added as raw text.

use std::fmt;

/// Whether a command changes remote state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Read-only; runs even in dry-run mode
    Query,

    /// Changes durable state; recorded but skipped in dry-run mode
    Mutate,

    /// Read-only check of state an earlier mutation produced; skipped in
    /// dry-run mode because that state was never produced
    Probe,
}

/// Quote a single shell word.
///
/// Words made only of safe characters are returned unchanged. A leading `~/`
/// stays unquoted so the remote shell still expands it.
pub fn quote(word: &str) -> String {
    if let Some(rest) = word.strip_prefix("~/") {
        if rest.is_empty() {
            return "~/".to_string();
        }
        return format!("~/{}", quote(rest));
    }
    if !word.is_empty() && word.chars().all(is_safe) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StepKind {
    Words(Vec<String>),
    Raw(String),
    IfExists(String, Box<Step>),
    OrTrue(Box<Step>),
}

/// One shell command inside a [`Script`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    kind: StepKind,
}

impl Step {
    /// Start a command; the program name is quoted like any argument
    pub fn cmd(program: &str) -> Self {
        Self {
            kind: StepKind::Words(vec![quote(program)]),
        }
    }

    /// Verbatim shell text, for expansions such as `$(id -u)`
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Raw(text.into()),
        }
    }

    /// Append a quoted argument
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        if let StepKind::Words(words) = &mut self.kind {
            words.push(quote(arg.as_ref()));
        }
        self
    }

    /// Append several quoted arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Append an argument without quoting
    pub fn raw_arg(mut self, arg: impl Into<String>) -> Self {
        if let StepKind::Words(words) = &mut self.kind {
            words.push(arg.into());
        }
        self
    }

    /// Run only when `path` is a regular file; a missing file is not a failure
    pub fn if_exists(path: &str, step: Step) -> Self {
        Self {
            kind: StepKind::IfExists(path.to_string(), Box::new(step)),
        }
    }

    /// Never fail the script because of this step
    pub fn or_true(self) -> Self {
        Self {
            kind: StepKind::OrTrue(Box::new(self)),
        }
    }

    pub fn render(&self) -> String {
        match &self.kind {
            StepKind::Words(words) => words.join(" "),
            StepKind::Raw(text) => text.clone(),
            StepKind::IfExists(path, step) => {
                format!("if [ -f {} ]; then {}; fi", quote(path), step.render())
            }
            StepKind::OrTrue(step) => format!("{{ {} || true; }}", step.render()),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Success-gated sequence of steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(Step::render)
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

impl From<Step> for Script {
    fn from(step: Step) -> Self {
        Script::new().step(step)
    }
}

/// A script tagged with its effect and a short label for progress output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub label: String,
    pub effect: Effect,
    pub script: Script,
}

impl RemoteCommand {
    pub fn query(label: impl Into<String>, script: impl Into<Script>) -> Self {
        Self {
            label: label.into(),
            effect: Effect::Query,
            script: script.into(),
        }
    }

    pub fn mutate(label: impl Into<String>, script: impl Into<Script>) -> Self {
        Self {
            label: label.into(),
            effect: Effect::Mutate,
            script: script.into(),
        }
    }

    pub fn probe(label: impl Into<String>, script: impl Into<Script>) -> Self {
        Self {
            label: label.into(),
            effect: Effect::Probe,
            script: script.into(),
        }
    }

    pub fn render(&self) -> String {
        self.script.render()
    }
}

/// `systemctl --user <action> <unit>`
pub fn systemctl(action: &str, unit: &str) -> Step {
    Step::cmd("systemctl").arg("--user").arg(action).arg(unit)
}

/// `systemctl --user daemon-reload`
pub fn daemon_reload() -> Step {
    Step::cmd("systemctl").arg("--user").arg("daemon-reload")
}
