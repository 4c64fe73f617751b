use super::parse;
use crate::cli::{Cli, CliCommand, ConfigAction};
use clap::Parser;

#[test]
fn cli_parse_config_show() {
    match parse(&["xreq", "config", "show"]) {
        CliCommand::Config {
            action: ConfigAction::Show,
        } => {}
        _ => panic!("expected Config Show"),
    }
}

#[test]
fn cli_parse_config_set_partial() {
    match parse(&["xreq", "config", "set", "--max-retries", "5"]) {
        CliCommand::Config {
            action:
                ConfigAction::Set {
                    timeout,
                    max_retries,
                    retry_delay,
                },
        } => {
            assert!(timeout.is_none());
            assert_eq!(max_retries, Some(5));
            assert!(retry_delay.is_none());
        }
        _ => panic!("expected Config Set"),
    }
}

#[test]
fn cli_parse_config_set_all() {
    match parse(&[
        "xreq",
        "config",
        "set",
        "--timeout",
        "8000",
        "--max-retries",
        "2",
        "--retry-delay",
        "250",
    ]) {
        CliCommand::Config {
            action:
                ConfigAction::Set {
                    timeout,
                    max_retries,
                    retry_delay,
                },
        } => {
            assert_eq!(timeout, Some(8000));
            assert_eq!(max_retries, Some(2));
            assert_eq!(retry_delay, Some(250));
        }
        _ => panic!("expected Config Set"),
    }
}

#[test]
fn cli_parse_config_requires_action() {
    assert!(Cli::try_parse_from(["xreq", "config"]).is_err());
}

#[test]
fn cli_parse_rejects_non_numeric_timeout() {
    assert!(Cli::try_parse_from(["xreq", "config", "set", "--timeout", "soon"]).is_err());
}
