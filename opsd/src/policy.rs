// ABOUTME: decides whether a proposed command or config key may reach an external effect.
// ABOUTME: runs a fixed, fail-closed sequence of pure checks so decisions stay deterministic under hostile plans.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

pub const DEFAULT_JAIL_ROOT: &str = "/sim";

const ALLOWED_COMMANDS: &[&str] = &[
    "cat", "head", "tail", "grep", "ls", "echo", "wc", "sort", "uniq", "cut", "awk", "sed", "find",
    "stat", "file", "date", "hostname", "env", "printenv",
];

const BLOCKED_COMMANDS: &[&str] = &[
    // file modification
    "rm", "rmdir", "mv", "cp", "touch", "mkdir", "chmod", "chown", "chgrp", "ln",
    // network
    "curl", "wget", "nc", "netcat", "ncat", "telnet", "ssh", "scp", "rsync", "ftp", "sftp",
    // shells and interpreters
    "bash", "sh", "zsh", "csh", "tcsh", "ksh", "fish", "python", "python3", "perl", "ruby", "node",
    "php",
    // privilege escalation
    "sudo", "su", "doas", "pkexec",
    // system control
    "kill", "killall", "pkill", "reboot", "shutdown", "halt", "poweroff", "init", "systemctl",
    "service",
    // package management
    "apt", "apt-get", "yum", "dnf", "rpm", "pip", "npm",
    // misc
    "dd", "mkfs", "fdisk", "mount", "umount", "chroot", "nohup", "eval", "exec", "xargs",
];

const METACHARACTERS: &[(&str, &str)] = &[
    (";", "semicolon"),
    ("|", "pipe"),
    ("&", "ampersand"),
    ("`", "backtick"),
    ("$(", "command substitution"),
    ("${", "variable expansion"),
    (")", "closing parenthesis"),
    (">", "output redirection"),
    ("<", "input redirection"),
    ("\r", "carriage return"),
    ("\n", "line feed"),
    ("\0", "null byte"),
];

// find primaries that run programs, delete, or write files.
const FIND_ACTIONS: &[&str] = &["-exec", "-execdir", "-ok", "-okdir", "-delete", "-fls"];

const SENSITIVE_CONFIG_KEYS: &[&str] = &[
    "api_secret",
    "api_key",
    "password",
    "token",
    "secret",
    "credential",
    "private_key",
];

/// Why a command or config key was refused. The display text is what callers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenialReason {
    #[error("empty command")]
    EmptyCommand,
    #[error("command blocked: {command} is on the blocklist")]
    Blocklist { command: String },
    #[error("command blocked: {command} is not on the allowlist")]
    Allowlist { command: String },
    #[error("metacharacter blocked: {name}")]
    Metacharacter { name: &'static str },
    #[error("path traversal blocked: {argument}")]
    PathTraversal { argument: String },
    #[error("path not allowed: {argument} is outside {root}")]
    PathJail { argument: String, root: String },
    #[error("command blocked: {command} {option} runs another program or writes files")]
    UnsafeOption { command: String, option: String },
    #[error("config key must not be empty")]
    EmptyConfigKey,
    #[error("config key blocked: {key} matches a sensitive identifier")]
    SensitiveKey { key: String },
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::EmptyCommand => "empty_command",
            DenialReason::Blocklist { .. } => "blocklist",
            DenialReason::Allowlist { .. } => "allowlist",
            DenialReason::Metacharacter { .. } => "metacharacter",
            DenialReason::UnsafeOption { .. } => "unsafe_option",
            DenialReason::PathTraversal { .. } => "path_traversal",
            DenialReason::PathJail { .. } => "path_jail",
            DenialReason::EmptyConfigKey => "empty_config_key",
            DenialReason::SensitiveKey { .. } => "sensitive_key",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), DenialReason> {
        match self.reason {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

/// Splits a command exactly the way the executor will receive it.
pub fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

struct CommandInput<'a> {
    raw: &'a str,
    base: &'a str,
    args: Vec<&'a str>,
}

impl<'a> CommandInput<'a> {
    fn parse(raw: &'a str) -> Option<Self> {
        let mut tokens = raw.split_whitespace();
        let first = tokens.next()?;
        let base = Path::new(first)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(first);
        Some(Self {
            raw,
            base,
            args: tokens.collect(),
        })
    }
}

type CommandCheck = fn(&CommandPolicy, &CommandInput<'_>) -> Result<(), DenialReason>;

// Order is part of the contract: blocklist wins over any allowlist entry.
const COMMAND_CHECKS: &[(&str, CommandCheck)] = &[
    ("blocklist", check_blocklist as CommandCheck),
    ("allowlist", check_allowlist as CommandCheck),
    ("metacharacters", check_metacharacters as CommandCheck),
    ("side_effects", check_side_effects as CommandCheck),
    ("path_jail", check_path_jail as CommandCheck),
];

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed: BTreeSet<String>,
    blocked: BTreeSet<String>,
    sensitive_keys: Vec<String>,
    jail_root: PathBuf,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(
            ALLOWED_COMMANDS.iter().copied(),
            BLOCKED_COMMANDS.iter().copied(),
            DEFAULT_JAIL_ROOT,
        )
    }
}

impl CommandPolicy {
    pub fn new<'a>(
        allowed: impl IntoIterator<Item = &'a str>,
        blocked: impl IntoIterator<Item = &'a str>,
        jail_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().map(str::to_string).collect(),
            blocked: blocked.into_iter().map(str::to_string).collect(),
            sensitive_keys: SENSITIVE_CONFIG_KEYS.iter().map(|k| k.to_string()).collect(),
            jail_root: lexical_normalize(&jail_root.into()),
        }
    }

    pub fn with_jail_root(mut self, jail_root: impl Into<PathBuf>) -> Self {
        self.jail_root = lexical_normalize(&jail_root.into());
        self
    }

    pub fn jail_root(&self) -> &Path {
        &self.jail_root
    }

    pub fn check_order() -> Vec<&'static str> {
        COMMAND_CHECKS.iter().map(|(name, _)| *name).collect()
    }

    pub fn evaluate(&self, command: &str) -> PolicyDecision {
        let input = match CommandInput::parse(command) {
            Some(input) => input,
            None => return PolicyDecision::deny(DenialReason::EmptyCommand),
        };

        for (_, check) in COMMAND_CHECKS {
            if let Err(reason) = check(self, &input) {
                return PolicyDecision::deny(reason);
            }
        }

        PolicyDecision::allow()
    }

    pub fn evaluate_config_key(&self, key: &str) -> PolicyDecision {
        let key = key.trim();
        if key.is_empty() {
            return PolicyDecision::deny(DenialReason::EmptyConfigKey);
        }

        let lowered = key.to_lowercase();
        if self
            .sensitive_keys
            .iter()
            .any(|sensitive| lowered.contains(sensitive.as_str()))
        {
            return PolicyDecision::deny(DenialReason::SensitiveKey {
                key: key.to_string(),
            });
        }

        PolicyDecision::allow()
    }
}

fn check_blocklist(policy: &CommandPolicy, input: &CommandInput<'_>) -> Result<(), DenialReason> {
    if policy.blocked.contains(input.base) {
        return Err(DenialReason::Blocklist {
            command: input.base.to_string(),
        });
    }
    Ok(())
}

fn check_allowlist(policy: &CommandPolicy, input: &CommandInput<'_>) -> Result<(), DenialReason> {
    if !policy.allowed.contains(input.base) {
        return Err(DenialReason::Allowlist {
            command: input.base.to_string(),
        });
    }
    Ok(())
}

fn check_metacharacters(_policy: &CommandPolicy, input: &CommandInput<'_>) -> Result<(), DenialReason> {
    match METACHARACTERS
        .iter()
        .find(|(pattern, _)| input.raw.contains(pattern))
    {
        Some((_, name)) => Err(DenialReason::Metacharacter { name: *name }),
        None => Ok(()),
    }
}

/// Allowlisted binaries can still exec, delete, or write through their options.
fn check_side_effects(_policy: &CommandPolicy, input: &CommandInput<'_>) -> Result<(), DenialReason> {
    let args = input.args.as_slice();
    let offending = match input.base {
        // a non-flag operand to env is the program it runs
        "env" => args
            .iter()
            .copied()
            .find(|a| !is_flag(a))
            .or_else(|| flag_hit(args, &['S'], &[], &["--split-string", "--chdir"])),
        "printenv" => args.iter().copied().find(|a| !is_flag(a)),
        "find" => args
            .iter()
            .copied()
            .find(|a| FIND_ACTIONS.contains(a) || a.starts_with("-fprint")),
        "sed" => sed_violation(args),
        "awk" => flag_hit(
            args,
            &['f', 'i', 'l', 'E', 'd', 'p', 'o', 'D'],
            &['v', 'F'],
            &[
                "--file",
                "--include",
                "--load",
                "--exec",
                "--dump-variables",
                "--profile",
                "--pretty-print",
                "--debug",
            ],
        ),
        "sort" => flag_hit(
            args,
            &['o'],
            &['k', 't', 'S', 'T'],
            &["--output", "--compress-program"],
        ),
        // uniq writes its second operand
        "uniq" => operands(args, &["-f", "-s", "-w"]).nth(1),
        "date" => operands(args, &["-d", "-f", "-r", "--date", "--file", "--reference"])
            .find(|a| !a.starts_with('+'))
            .or_else(|| flag_hit(args, &['s'], &['d', 'f', 'r'], &["--set"])),
        "hostname" => operands(args, &[])
            .next()
            .or_else(|| flag_hit(args, &['F', 'b'], &[], &["--file", "--boot"])),
        "file" => flag_hit(args, &['C'], &['m', 'e', 'f', 'F', 'P'], &["--compile"]),
        _ => None,
    };

    match offending {
        Some(option) => Err(DenialReason::UnsafeOption {
            command: input.base.to_string(),
            option: option.to_string(),
        }),
        None => Ok(()),
    }
}

fn is_flag(arg: &str) -> bool {
    arg.starts_with('-') && arg.len() > 1
}

/// Finds the first argument enabling a denied short or long option. Scanning a
/// short cluster stops at an option that consumes the rest as its value.
fn flag_hit<'a>(
    args: &[&'a str],
    short: &[char],
    takes_value: &[char],
    long: &[&str],
) -> Option<&'a str> {
    for &arg in args {
        if arg == "--" {
            break;
        }
        if let Some(name) = arg.strip_prefix("--") {
            let name = name.split('=').next().unwrap_or(name);
            if long.iter().any(|l| l.trim_start_matches('-') == name) {
                return Some(arg);
            }
            continue;
        }
        if !is_flag(arg) {
            continue;
        }
        for c in arg[1..].chars() {
            if short.contains(&c) {
                return Some(arg);
            }
            if takes_value.contains(&c) {
                break;
            }
        }
    }
    None
}

/// Non-flag arguments, skipping the value that follows any of `valued` flags.
fn operands<'a, 'b>(
    args: &'b [&'a str],
    valued: &'b [&'b str],
) -> impl Iterator<Item = &'a str> + 'b {
    let mut skip_next = false;
    args.iter().copied().filter(move |arg| {
        if skip_next {
            skip_next = false;
            return false;
        }
        if valued.contains(arg) {
            skip_next = true;
            return false;
        }
        !is_flag(arg)
    })
}

/// Refuses in-place editing, script files, and any script beyond `s`, `p`, `d`, `q`, `=`.
fn sed_violation<'a>(args: &[&'a str]) -> Option<&'a str> {
    let mut scripts = Vec::new();
    let mut explicit = false;
    let mut expect_script = false;
    let mut first_operand = None;

    for &arg in args {
        if expect_script {
            scripts.push(arg);
            expect_script = false;
            continue;
        }
        if let Some(name) = arg.strip_prefix("--") {
            let (name, value) = match name.split_once('=') {
                Some((n, v)) => (n, Some(v)),
                None => (name, None),
            };
            match name {
                "in-place" | "file" => return Some(arg),
                "expression" => {
                    explicit = true;
                    match value {
                        Some(v) => scripts.push(v),
                        None => expect_script = true,
                    }
                }
                _ => {}
            }
            continue;
        }
        if is_flag(arg) {
            for (i, c) in arg.char_indices().skip(1) {
                match c {
                    'i' | 'f' => return Some(arg),
                    'e' => {
                        explicit = true;
                        let rest = &arg[i + 1..];
                        if rest.is_empty() {
                            expect_script = true;
                        } else {
                            scripts.push(rest);
                        }
                        break;
                    }
                    _ => {}
                }
            }
            continue;
        }
        if first_operand.is_none() {
            first_operand = Some(arg);
        }
    }

    if !explicit {
        scripts.extend(first_operand);
    }
    scripts.into_iter().find(|script| !is_plain_sed_script(script))
}

fn is_plain_sed_script(script: &str) -> bool {
    let rest = skip_sed_address(script);
    let rest = skip_sed_address_tail(rest);
    let rest = rest.strip_prefix('!').unwrap_or(rest);

    let mut chars = rest.chars();
    match chars.next() {
        Some('p') | Some('d') | Some('=') => chars.as_str().is_empty(),
        Some('q') => chars.as_str().chars().all(|c| c.is_ascii_digit()),
        Some('s') => {
            let Some(delim) = chars.next() else {
                return false;
            };
            if delim == '\\' || delim.is_alphanumeric() {
                return false;
            }
            let mut parts = 0;
            let mut escaped = false;
            let mut flags = "";
            let body = chars.as_str();
            for (i, c) in body.char_indices() {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == delim {
                    parts += 1;
                    if parts == 2 {
                        flags = &body[i + c.len_utf8()..];
                        break;
                    }
                }
            }
            parts == 2 && flags.chars().all(|c| "gpiIm0123456789".contains(c))
        }
        _ => false,
    }
}

fn skip_sed_address(script: &str) -> &str {
    if let Some(rest) = script.strip_prefix('/') {
        let mut escaped = false;
        for (i, c) in rest.char_indices() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '/' {
                return &rest[i + 1..];
            }
        }
        return "";
    }
    script.trim_start_matches(|c: char| c.is_ascii_digit() || c == '$' || c == '~')
}

fn skip_sed_address_tail(rest: &str) -> &str {
    match rest.strip_prefix(',') {
        Some(second) => skip_sed_address(second),
        None => rest,
    }
}

fn check_path_jail(policy: &CommandPolicy, input: &CommandInput<'_>) -> Result<(), DenialReason> {
    for &arg in &input.args {
        let candidate = if arg.starts_with("--") {
            match arg.split_once('=') {
                Some((_, value)) => value,
                None => continue,
            }
        } else if is_flag(arg) {
            // a value glued to short flags, as in `-f/etc/passwd`
            match arg[1..].find(['/', '.', '~']) {
                Some(i) => &arg[i + 1..],
                None => continue,
            }
        } else {
            arg
        };

        if !looks_like_path(candidate) {
            continue;
        }

        // Rejected on syntax alone, before any resolution.
        if candidate.contains("..") {
            return Err(DenialReason::PathTraversal {
                argument: arg.to_string(),
            });
        }

        let inside = if candidate.starts_with('~') || candidate.starts_with('$') {
            false
        } else {
            let joined = if Path::new(candidate).is_absolute() {
                PathBuf::from(candidate)
            } else {
                policy.jail_root.join(candidate)
            };
            lexical_normalize(&joined).starts_with(&policy.jail_root)
        };

        if !inside {
            return Err(DenialReason::PathJail {
                argument: arg.to_string(),
                root: policy.jail_root.display().to_string(),
            });
        }
    }
    Ok(())
}

fn looks_like_path(arg: &str) -> bool {
    arg.contains('/') || arg.starts_with('.') || arg.starts_with('~') || arg.starts_with('$')
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
