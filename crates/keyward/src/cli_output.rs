//! Prompts and user-facing output. Prompts and notices go to stderr; stdout carries only results.

use eyre::Context as _;
use keyward::{
    errors::ErrorReport,
    lifecycle::{Confirmation, RecoveryAction},
};
use secrecy::SecretString;
use serde::Serialize;
use std::io::{BufRead as _, IsTerminal as _, Write as _};

/// Non-interactive password source, used for every password prompt.
pub const PASSWORD_ENV: &str = "KEYWARD_PASSWORD";
/// Non-interactive source for `init --import`.
pub const IMPORT_KEY_ENV: &str = "KEYWARD_IMPORT_KEY";

fn stderr_write(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    let _flush = stderr.flush();
}

pub fn notice(s: &str) {
    stderr_write(s);
    stderr_write("\n");
}

pub fn print_json<T: Serialize>(v: &T) -> eyre::Result<()> {
    let s = serde_json::to_string(v).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")?;
    Ok(())
}

/// One JSON line on stderr, so scripts can branch on `code` without parsing the report.
pub fn print_error_report(report: &ErrorReport) {
    if let Ok(s) = serde_json::to_string(report) {
        notice(&s);
    }
}

pub fn print_line(s: &str) -> eyre::Result<()> {
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")
}

pub fn interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

fn env_secret(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| SecretString::new(v.into()))
}

pub fn password_from_env() -> bool {
    env_secret(PASSWORD_ENV).is_some()
}

fn prompt_secret(prompt: &str) -> eyre::Result<SecretString> {
    if !interactive() {
        eyre::bail!("no terminal to prompt on; set {PASSWORD_ENV}");
    }
    let s = rpassword::prompt_password(prompt).context("read from terminal")?;
    Ok(SecretString::new(s.into()))
}

pub fn read_password(prompt: &str) -> eyre::Result<SecretString> {
    match env_secret(PASSWORD_ENV) {
        Some(s) => Ok(s),
        None => prompt_secret(prompt),
    }
}

/// Password plus its confirmation. Comparing them is the lifecycle's job.
pub fn read_new_password() -> eyre::Result<(SecretString, SecretString)> {
    if let (Some(a), Some(b)) = (env_secret(PASSWORD_ENV), env_secret(PASSWORD_ENV)) {
        return Ok((a, b));
    }
    let a = prompt_secret("New password: ")?;
    let b = prompt_secret("Repeat password: ")?;
    Ok((a, b))
}

pub fn read_private_key(prompt: &str) -> eyre::Result<SecretString> {
    match env_secret(IMPORT_KEY_ENV) {
        Some(s) => Ok(s),
        None => prompt_secret(prompt),
    }
}

fn read_answer(question: &str) -> eyre::Result<String> {
    stderr_write(question);
    let mut line = String::new();
    let n = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read answer")?;
    if n == 0 {
        eyre::bail!("stdin closed");
    }
    Ok(line.trim().to_ascii_lowercase())
}

/// `--yes` confirms; otherwise ask on a terminal. Without a terminal the answer is no.
pub fn confirm(question: &str, yes: bool) -> eyre::Result<Confirmation> {
    if yes {
        return Ok(Confirmation::Confirmed);
    }
    if !interactive() {
        notice("Not a terminal; pass --yes to confirm.");
        return Ok(Confirmation::Declined);
    }
    let ans = read_answer(&format!("{question} [y/N] "))?;
    Ok(if ans == "y" || ans == "yes" {
        Confirmation::Confirmed
    } else {
        Confirmation::Declined
    })
}

pub fn choose_recovery(offered: &[RecoveryAction]) -> eyre::Result<RecoveryAction> {
    loop {
        let ans = read_answer("[r]etry, re[i]mport and overwrite, or [a]bandon? ")?;
        let picked = match ans.as_str() {
            "r" | "retry" => RecoveryAction::Retry,
            "i" | "reimport" => RecoveryAction::Reimport,
            "a" | "abandon" => RecoveryAction::Abandon,
            _ => continue,
        };
        if offered.contains(&picked) {
            return Ok(picked);
        }
    }
}
