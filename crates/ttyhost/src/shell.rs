// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell resolution: map a [`ShellKind`] to an executable, argv, and the
//! environment a native terminal would provide.
//!
//! Every shell that `supports_osc7` gets its prompt augmented here so the
//! host's CWD tracking actually receives reports: bash via
//! `PROMPT_COMMAND`, zsh via a scoped `ZDOTDIR` precmd hook, pwsh and
//! powershell via a prompt override passed with `-Command`.

use std::path::PathBuf;

use anyhow::Context;

use mtwire::session::ShellKind;

/// A shell resolved against the local system.
#[derive(Debug, Clone)]
pub struct ResolvedShell {
    pub kind: ShellKind,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// OSC-7 emitting PROMPT_COMMAND for bash.
const BASH_OSC7_PROMPT: &str =
    r#"printf '\033]7;file://%s%s\033\\' "${HOSTNAME:-localhost}" "$PWD""#;

/// Scoped zshrc installed under a private ZDOTDIR. zsh ignores
/// PROMPT_COMMAND, so the rc chains to the user's own `~/.zshrc` and then
/// registers a precmd hook that reports the cwd.
const ZSH_OSC7_RC: &str = r#"[[ -f "$HOME/.zshrc" ]] && source "$HOME/.zshrc"
_midterm_report_cwd() { printf '\033]7;file://%s%s\033\\' "${HOST:-localhost}" "$PWD"; }
typeset -ga precmd_functions
precmd_functions+=(_midterm_report_cwd)
_midterm_report_cwd
"#;

/// Prompt override for pwsh/powershell. Neither honors an env hook, so the
/// function is handed over with `-Command`; `-NoExit` keeps the shell
/// interactive afterwards.
const PWSH_OSC7_PROMPT: &str = r#"function prompt { $e = [char]27; $p = $PWD.ProviderPath; "$e]7;file://localhost$p$e\" + "PS $p> " }"#;

/// Resolve a shell kind against the local system.
///
/// Fails when the executable cannot be found on PATH.
pub fn resolve(kind: ShellKind) -> anyhow::Result<ResolvedShell> {
    let program = which::which(kind.as_str())
        .map_err(|e| anyhow::anyhow!("shell {kind} not available: {e}"))?;

    let mut env: Vec<(String, String)> = vec![
        ("TERM".to_owned(), "xterm-256color".to_owned()),
        ("COLORTERM".to_owned(), "truecolor".to_owned()),
    ];
    let args = match kind {
        ShellKind::Bash => {
            env.push(("SHELL".to_owned(), program.display().to_string()));
            env.push(("PROMPT_COMMAND".to_owned(), BASH_OSC7_PROMPT.to_owned()));
            vec!["-i".to_owned()]
        }
        ShellKind::Zsh => {
            env.push(("SHELL".to_owned(), program.display().to_string()));
            let zdotdir = install_zsh_osc7_rc()?;
            env.push(("ZDOTDIR".to_owned(), zdotdir.display().to_string()));
            vec!["-i".to_owned()]
        }
        ShellKind::Pwsh | ShellKind::Powershell => vec![
            "-NoLogo".to_owned(),
            "-NoExit".to_owned(),
            "-Command".to_owned(),
            PWSH_OSC7_PROMPT.to_owned(),
        ],
        ShellKind::Cmd => vec![],
    };

    Ok(ResolvedShell { kind, program, args, env })
}

/// Write the scoped zshrc and return the directory to use as ZDOTDIR.
///
/// Shared by every zsh session on this machine. Written via a unique temp
/// file plus rename so a concurrent spawn never reads a truncated rc.
pub fn install_zsh_osc7_rc() -> anyhow::Result<PathBuf> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static TMP_SEQ: AtomicU32 = AtomicU32::new(0);

    let dir = mtwire::endpoint::default_runtime_dir().join("midterm-zdot");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create {}", dir.display()))?;

    let rc = dir.join(".zshrc");
    let tmp = dir.join(format!(
        ".zshrc.{}.{}",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&tmp, ZSH_OSC7_RC)
        .with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, &rc)
        .with_context(|| format!("install {}", rc.display()))?;
    Ok(dir)
}

/// Whether the shell's executable is present on this system.
pub fn available(kind: ShellKind) -> bool {
    which::which(kind.as_str()).is_ok()
}

/// Platform default shell: `$SHELL` basename when it names a supported
/// shell, otherwise the first available of zsh, bash.
pub fn default_shell() -> ShellKind {
    if let Ok(shell) = std::env::var("SHELL") {
        let base = shell.rsplit('/').next().unwrap_or(&shell);
        if let Some(kind) = ShellKind::from_name(base) {
            if available(kind) {
                return kind;
            }
        }
    }
    if available(ShellKind::Zsh) && !available(ShellKind::Bash) {
        ShellKind::Zsh
    } else {
        ShellKind::Bash
    }
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
