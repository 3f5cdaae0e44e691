use clap::CommandFactory;
use clap_complete::Shell;
use std::io::Write;

use crate::cli::Args;

/// Write the completion script for `shell` to stdout
pub fn run(shell: Shell) {
    generate(shell, &mut std::io::stdout());
}

fn generate(shell: Shell, out: &mut dyn Write) {
    let mut command = Args::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(shell: Shell) -> String {
        let mut out = Vec::new();
        generate(shell, &mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn scripts_cover_subcommands() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish, Shell::PowerShell] {
            let text = script(shell);
            assert!(text.contains("create-bucket"), "{:?} script lacks create-bucket", shell);
            assert!(text.contains("credentials"), "{:?} script lacks credentials", shell);
        }
    }

    #[test]
    fn bash_script_registers_ark() {
        assert!(script(Shell::Bash).contains("complete -F _ark"));
    }
}
