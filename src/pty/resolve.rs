//! Command resolution (§4.3): turns a caller-supplied argv into the actual
//! binary and arguments to `execvp`, and records which rule resolved it.

const LOGIN_SHELLS: &[&str] = &["bash", "zsh", "sh", "fish"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedFrom {
    Path,
    Shell,
    Alias,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub binary: String,
    pub args: Vec<String>,
    pub resolved_from: ResolvedFrom,
}

fn on_path(name: &str) -> bool {
    let Ok(path_var) = std::env::var("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(name).is_file())
}

fn strip_leading_separator(argv: &[String]) -> &[String] {
    match argv.first() {
        Some(first) if first == "--" => &argv[1..],
        _ => argv,
    }
}

/// Resolves `argv` per the §4.3 order: PATH/path-separator, known login
/// shell, then `USER_SHELL -c`.
pub fn resolve_command(argv: &[String]) -> anyhow::Result<ResolvedCommand> {
    let argv = strip_leading_separator(argv);
    let Some(program) = argv.first() else {
        anyhow::bail!("empty command");
    };

    if program.contains(std::path::MAIN_SEPARATOR) || on_path(program) {
        return Ok(ResolvedCommand {
            binary: program.clone(),
            args: argv[1..].to_vec(),
            resolved_from: ResolvedFrom::Path,
        });
    }

    let joined = argv.join(" ");

    if LOGIN_SHELLS.contains(&program.as_str()) {
        return Ok(ResolvedCommand {
            binary: program.clone(),
            args: vec!["-i".into(), "-l".into(), "-c".into(), joined],
            resolved_from: ResolvedFrom::Shell,
        });
    }

    let user_shell = std::env::var("USER_SHELL").unwrap_or_else(|_| "/bin/sh".into());
    Ok(ResolvedCommand {
        binary: user_shell,
        args: vec!["-c".into(), joined],
        resolved_from: ResolvedFrom::Alias,
    })
}

/// Generates a deterministic window title from working directory, command,
/// and optional session name (§4.3, §8 "title generation determinism").
pub fn generate_title(working_dir: &str, command: &[String], name: Option<&str>) -> String {
    let collapsed = collapse_home(working_dir);
    let cmd = command.join(" ");
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{name} - {cmd} ({collapsed})"),
        None => format!("{cmd} ({collapsed})"),
    }
}

/// Replaces a leading home-directory prefix with `~`. Idempotent: applying
/// it to an already-collapsed path is a no-op.
pub fn collapse_home(path: &str) -> String {
    if let Some(home) = dirs::home_dir().and_then(|h| h.to_str().map(str::to_owned)) {
        if path == home {
            return "~".to_string();
        }
        if let Some(rest) = path.strip_prefix(&home) {
            if rest.starts_with(std::path::MAIN_SEPARATOR) {
                return format!("~{rest}");
            }
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_absolute_path_directly() {
        let resolved = resolve_command(&["/bin/echo".into(), "hi".into()]).unwrap();
        assert_eq!(resolved.binary, "/bin/echo");
        assert_eq!(resolved.args, vec!["hi".to_string()]);
        assert_eq!(resolved.resolved_from, ResolvedFrom::Path);
    }

    #[test]
    fn resolves_known_login_shell_with_dash_c() {
        let resolved = resolve_command(&["zsh".into(), "-c".into(), "echo hi".into()]).unwrap();
        assert_eq!(resolved.resolved_from, ResolvedFrom::Shell);
        assert_eq!(resolved.binary, "zsh");
        assert!(resolved.args.contains(&"-i".to_string()));
    }

    #[test]
    fn falls_back_to_user_shell_for_unknown_alias() {
        std::env::set_var("USER_SHELL", "/bin/myshell");
        let resolved = resolve_command(&["myalias".into(), "arg".into()]).unwrap();
        assert_eq!(resolved.resolved_from, ResolvedFrom::Alias);
        assert_eq!(resolved.binary, "/bin/myshell");
        std::env::remove_var("USER_SHELL");
    }

    #[test]
    fn strips_leading_double_dash() {
        let resolved = resolve_command(&["--".into(), "/bin/echo".into()]).unwrap();
        assert_eq!(resolved.binary, "/bin/echo");
    }

    #[test]
    fn collapse_home_is_idempotent() {
        let home = dirs::home_dir().unwrap();
        let sub = home.join("projects").join("x");
        let sub_str = sub.to_str().unwrap();
        let once = collapse_home(sub_str);
        let twice = collapse_home(&once);
        assert_eq!(once, twice);
        assert!(once.starts_with('~'));
    }

    #[test]
    fn generate_title_ignores_blank_name() {
        let a = generate_title("/tmp", &["sh".into()], Some("   "));
        let b = generate_title("/tmp", &["sh".into()], None);
        assert_eq!(a, b);
    }
}
