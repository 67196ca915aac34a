use clap::{Args, Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "floe",
    version,
    about = "A terminal cockpit for Snowpark Container Services."
)]
pub struct CliArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Named context from the config file
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Show the debug pane with executed SQL
    #[arg(long, global = true)]
    pub debug: bool,

    /// Refresh interval in seconds
    #[arg(long, default_value_t = 5, global = true)]
    pub refresh_secs: u64,

    /// Per-fetch timeout in seconds
    #[arg(long, default_value_t = 10, global = true)]
    pub fetch_timeout_secs: u64,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info", global = true)]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Connection values that override the config file and environment.
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    #[arg(long, global = true)]
    pub account: Option<String>,

    #[arg(long, global = true)]
    pub user: Option<String>,

    /// SQL API bearer token
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// PROGRAMMATIC_ACCESS_TOKEN, OAUTH or KEYPAIR_JWT
    #[arg(long, global = true)]
    pub token_type: Option<String>,

    /// SQL API host, defaults to <account>.snowflakecomputing.com
    #[arg(long, global = true)]
    pub host: Option<String>,

    #[arg(long, global = true)]
    pub database: Option<String>,

    #[arg(short, long, global = true)]
    pub schema: Option<String>,

    #[arg(long, global = true)]
    pub warehouse: Option<String>,

    #[arg(long, global = true)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print a resource listing and exit
    List {
        #[command(subcommand)]
        resource: ListResource,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ListResource {
    /// Services in the active schema
    Services,
}

#[cfg(test)]
mod tests {
    use super::{CliArgs, Command, ListResource};
    use clap::Parser;

    #[test]
    fn defaults_launch_the_dashboard() {
        let args = CliArgs::parse_from(["floe"]);
        assert!(args.command.is_none());
        assert_eq!(args.refresh_secs, 5);
        assert_eq!(args.fetch_timeout_secs, 10);
        assert!(!args.debug);
    }

    #[test]
    fn list_services_accepts_trailing_connection_flags() {
        let args = CliArgs::parse_from([
            "floe", "list", "services", "--schema", "STAGING", "--debug",
        ]);
        assert!(matches!(
            args.command,
            Some(Command::List {
                resource: ListResource::Services
            })
        ));
        assert_eq!(args.connection.schema.as_deref(), Some("STAGING"));
        assert!(args.debug);
    }
}
