//! Command-line interface definition

use clap::{Parser, Subcommand};

use crate::commands::auth::AuthCommands;
use crate::commands::config::ConfigCommands;
use crate::commands::request::{BodyArgs, RequestArgs};
use crate::output::OutputFormat;

/// Call a remote API with retries, token refresh and response caching
#[derive(Debug, Parser)]
#[command(name = "rapi", version, about)]
pub struct Cli {
    /// Profile to use (defaults to the configured default profile)
    #[arg(short, long, global = true, env = "RAPI_PROFILE")]
    pub profile: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true, env = "RAPI_API_URL")]
    pub api_url: Option<String>,

    /// Output format for response bodies
    #[arg(short, long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send a GET request
    Get(RequestArgs),

    /// Send a POST request
    Post(BodyArgs),

    /// Send a PUT request
    Put(BodyArgs),

    /// Send a PATCH request
    Patch(BodyArgs),

    /// Send a DELETE request
    Delete(RequestArgs),

    /// Manage stored tokens
    Auth(AuthCommands),

    /// Manage CLI configuration
    Config(ConfigCommands),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get_with_query_and_cache() {
        let cli = Cli::try_parse_from([
            "rapi",
            "--profile",
            "staging",
            "get",
            "/api/pet/findByStatus",
            "-q",
            "status=available",
            "--cache-ttl",
            "60",
        ])
        .unwrap();

        assert_eq!(cli.profile.as_deref(), Some("staging"));
        match cli.command {
            Commands::Get(args) => {
                assert_eq!(args.path, "/api/pet/findByStatus");
                assert_eq!(args.query, vec!["status=available".to_string()]);
                assert_eq!(args.cache_ttl, Some(60));
            }
            other => panic!("expected get, got {:?}", other),
        }
    }

    #[test]
    fn test_cache_flags_document_process_lifetime() {
        let command = Cli::command();
        let get = command.find_subcommand("get").unwrap();

        for id in ["cache_ttl", "cache_key"] {
            let arg = get.get_arguments().find(|arg| arg.get_id() == id).unwrap();
            let help = arg.get_help().unwrap().to_string();
            assert!(help.contains("invocation"), "{}: {}", id, help);
        }
    }

    #[test]
    fn test_parse_post_with_body() {
        let cli = Cli::try_parse_from(["rapi", "-o", "compact", "post", "/api/pet", "-d", r#"{"name":"Rex"}"#])
            .unwrap();

        assert_eq!(cli.output, Some(OutputFormat::Compact));
        match cli.command {
            Commands::Post(args) => assert_eq!(args.data.as_deref(), Some(r#"{"name":"Rex"}"#)),
            other => panic!("expected post, got {:?}", other),
        }
    }
}
