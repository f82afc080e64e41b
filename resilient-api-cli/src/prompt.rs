//! Interactive handling of policy acceptance episodes

use colored::Colorize;
use dialoguer::Confirm;
use resilient_api_sdk::{PolicyPrompt, PolicySubscriber};
use tokio::runtime::Handle;

/// Shows the outstanding requirements on the terminal and asks the user to
/// confirm once they have accepted them
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePolicyPrompt;

impl PolicySubscriber for ConsolePolicyPrompt {
    fn on_policy_required(&self, prompt: PolicyPrompt) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!("No runtime available to prompt for policy acceptance");
            prompt.deny(None);
            return;
        };

        handle.spawn_blocking(move || {
            for line in describe(&prompt) {
                eprintln!("{}", line);
            }

            let accepted = Confirm::new()
                .with_prompt("Have you accepted the requirements above?")
                .default(false)
                .interact()
                .unwrap_or(false);

            if accepted {
                prompt.resolve();
            } else {
                prompt.deny(None);
            }
        });
    }
}

/// Lines describing the episode, one per requirement
pub fn describe(prompt: &PolicyPrompt) -> Vec<String> {
    let mut lines = vec![format!("{} {}", "⚠".yellow(), prompt.message)];
    for requirement in &prompt.requirements {
        let mut line = format!("  - {}", requirement.title.as_deref().unwrap_or(&requirement.id));
        if let Some(version) = &requirement.version {
            line.push_str(&format!(" (v{})", version));
        }
        if let Some(url) = &requirement.url {
            line.push_str(&format!(": {}", url));
        }
        lines.push(line);
    }
    lines
}
