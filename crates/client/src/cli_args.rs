/// CLIs that accept a `--model` flag, keyed by their lowercase base name
/// (the part of `cli` before any `:variant` suffix).
const MODEL_FLAG_CLIS: &[&str] = &["claude", "codex", "gemini", "goose", "aider"];

/// Arguments prepended for a given CLI regardless of what the caller passed.
fn default_args_for(cli_name: &str) -> &'static [&'static str] {
    match cli_name {
        "codex" => &["-c", "check_for_update_on_startup=false"],
        _ => &[],
    }
}

fn has_model_arg(args: &[String]) -> bool {
    args.iter().any(|arg| arg == "--model" || arg.starts_with("--model="))
}

/// Builds the full pty argument list for a `spawn_pty` request: the CLI's
/// default arguments, then the caller's own arguments, with `--model`
/// prepended when the CLI supports it, a model was requested, and the
/// caller hasn't already supplied one.
///
/// `cli` may carry a `name:variant` form (e.g. `claude:sonnet`); only the
/// part before the colon is used to decide default arguments and model
/// support.
pub fn build_pty_args_with_model(cli: &str, args: &[String], model: Option<&str>) -> Vec<String> {
    let cli_name = cli.split(':').next().unwrap_or(cli).trim().to_lowercase();

    let defaults = default_args_for(&cli_name);
    // Re-shaping an already-shaped vector must be a no-op on the defaults
    // (§8 "applying it with a model... is idempotent"): don't prepend a
    // second copy if the caller's args already start with them.
    let defaults_present = args.len() >= defaults.len()
        && args[..defaults.len()]
            .iter()
            .zip(defaults.iter())
            .all(|(a, d)| a == d);
    let prefix: Vec<String> = if defaults_present {
        Vec::new()
    } else {
        defaults.iter().map(|s| s.to_string()).collect()
    };

    let inject_model = model
        .filter(|_| MODEL_FLAG_CLIS.contains(&cli_name.as_str()))
        .filter(|_| !has_model_arg(args))
        .filter(|_| !has_model_arg(&prefix));

    let mut result = prefix;
    if let Some(model) = inject_model {
        result.push("--model".to_string());
        result.push(model.to_string());
    }
    result.extend(args.iter().cloned());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codex_gets_default_args_and_model_flag() {
        let args = build_pty_args_with_model("codex", &[], Some("o3"));
        assert_eq!(
            args,
            vec!["-c", "check_for_update_on_startup=false", "--model", "o3"]
        );
    }

    /// Literal example of the argument-shaping contract: default args
    /// first, then the injected `--model`, then the caller's own tail.
    #[test]
    fn codex_with_caller_args_matches_spec_example() {
        let args = build_pty_args_with_model("codex", &["-x".to_string()], Some("gpt-5.2"));
        assert_eq!(
            args,
            vec!["-c", "check_for_update_on_startup=false", "--model", "gpt-5.2", "-x"]
        );
    }

    #[test]
    fn codex_with_existing_model_flag_is_not_reinjected() {
        let args = build_pty_args_with_model(
            "codex",
            &["--model=other".to_string()],
            Some("gpt-5.2"),
        );
        assert_eq!(
            args,
            vec!["-c", "check_for_update_on_startup=false", "--model=other"]
        );
    }

    #[test]
    fn unsupported_cli_does_not_get_model_flag() {
        let args = build_pty_args_with_model("some-custom-cli", &[], Some("o3"));
        assert!(args.is_empty());
    }

    #[test]
    fn existing_model_flag_is_not_duplicated() {
        let args = build_pty_args_with_model(
            "claude",
            &["--model=opus".to_string()],
            Some("sonnet"),
        );
        assert_eq!(args, vec!["--model=opus"]);
    }

    #[test]
    fn cli_variant_suffix_is_stripped_for_lookup() {
        let args = build_pty_args_with_model("Claude:Sonnet", &[], Some("opus"));
        assert_eq!(args, vec!["--model", "opus"]);
    }

    #[test]
    fn no_model_requested_leaves_args_untouched() {
        let args = build_pty_args_with_model("gemini", &["--verbose".to_string()], None);
        assert_eq!(args, vec!["--verbose"]);
    }

    #[test]
    fn applying_shaper_twice_is_idempotent() {
        let first = build_pty_args_with_model("codex", &["-x".to_string()], Some("gpt-5.2"));
        let second = build_pty_args_with_model("codex", &first, Some("gpt-5.2"));
        assert_eq!(first, second);
    }

    #[test]
    fn no_model_is_identity_on_argument_tail() {
        let args = vec!["-x".to_string(), "--verbose".to_string()];
        let shaped = build_pty_args_with_model("some-custom-cli", &args, None);
        assert_eq!(shaped, args);
    }
}
