//! Interactive confirmation gate for risky actions.
//!
//! The core reports facts (what would be replaced or overwritten); this is
//! the only place allowed to talk to a terminal. In JSON or non-interactive
//! mode a gated action fails with a message telling the user to rerun with
//! `--yes`.

use anyhow::bail;
use std::io::{BufRead, IsTerminal, Write};

/// Gate a risky action behind a y/N prompt unless `--yes` was given.
///
/// # Errors
///
/// Returns an error when the action is risky and either the context is
/// non-interactive or the user declines.
pub fn confirm_risk_action(
    json_mode: bool,
    yes: bool,
    risk: bool,
    non_interactive_message: &str,
    prompt: &str,
    preview: &[String],
    cancelled_message: &str,
) -> anyhow::Result<()> {
    if !risk || yes {
        return Ok(());
    }
    if json_mode || !std::io::stdin().is_terminal() {
        bail!("{non_interactive_message}; rerun with --yes");
    }
    let mut stderr = std::io::stderr();
    for line in preview {
        let _ = writeln!(stderr, "  - {line}");
    }
    let _ = write!(stderr, "{prompt} [y/N]: ");
    let _ = stderr.flush();
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    if answer != "y" && answer != "yes" {
        bail!("{cancelled_message} cancelled");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_risk_passes_without_prompting() {
        confirm_risk_action(false, false, false, "msg", "prompt", &[], "op").unwrap();
    }

    #[test]
    fn yes_bypasses_the_gate() {
        confirm_risk_action(true, true, true, "msg", "prompt", &[], "op").unwrap();
    }

    #[test]
    fn json_mode_requires_yes() {
        let err = confirm_risk_action(true, false, true, "build would overwrite", "p", &[], "build")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "build would overwrite; rerun with --yes"
        );
    }
}
