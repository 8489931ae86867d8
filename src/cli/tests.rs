use super::*;

mod test_helpers {
    use super::*;

    pub(super) fn parse_args(argv: &[&str]) -> Args {
        Args::try_parse_from(argv)
            .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
    }
}

use test_helpers::parse_args;

#[test]
fn ask_joins_words_and_accepts_flags_anywhere() {
    let argv = ["justify", "ask", "Is", "Mars", "further?", "--format", "html", "-c"];
    let args = parse_args(&argv);

    match args.command {
        Commands::Ask {
            message,
            format,
            concise,
            no_image,
            no_history,
        } => {
            assert_eq!(message.join(" "), "Is Mars further?");
            assert_eq!(format, OutputFormat::Html);
            assert!(concise);
            assert!(!no_image);
            assert!(!no_history);
        }
        _ => panic!("expected ask subcommand for argv={argv:?}"),
    }
}

#[test]
fn ask_requires_a_message() {
    assert!(Args::try_parse_from(["justify", "ask"]).is_err());
}

#[test]
fn global_flags_parse_after_subcommand() {
    let args = parse_args(&["justify", "health", "-e", "http://localhost:9000/query", "-t", "5"]);
    assert!(matches!(args.command, Commands::Health));
    assert_eq!(args.endpoint.as_deref(), Some("http://localhost:9000/query"));
    assert_eq!(args.timeout, Some(5));
}

#[test]
fn config_set_collects_multi_word_values() {
    let args = parse_args(&["justify", "config", "set", "user-id", "team", "alpha"]);
    match args.command {
        Commands::Config {
            command: Some(ConfigCommands::Set { key, value }),
        } => {
            assert_eq!(key, "user-id");
            assert_eq!(value.join(" "), "team alpha");
        }
        _ => panic!("expected config set"),
    }

    let args = parse_args(&["justify", "config"]);
    assert!(matches!(args.command, Commands::Config { command: None }));
}

#[test]
fn flags_override_file_settings() {
    let file = Config {
        endpoint: Some("http://from-file".into()),
        timeout_secs: Some(30),
        user_id: Some("file-user".into()),
        ..Default::default()
    };
    let args = parse_args(&["justify", "-e", "http://from-flag", "-t", "0", "-u", "flag-user", "health"]);

    let config = effective_config(file, &args).expect("config resolves");

    assert_eq!(config.endpoint(), "http://from-flag");
    assert_eq!(config.timeout(), Duration::from_secs(1));
    assert_eq!(config.user_id(), "flag-user");
}
