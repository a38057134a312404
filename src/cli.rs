use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "toolvault")]
#[command(about = "Namespaced credential storage and resolution for tool runtimes")]
pub struct Cli {
    /// Credential context (namespace). Defaults to the configured context,
    /// then "default".
    #[arg(long, global = true)]
    pub context: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Credential {
        #[command(subcommand)]
        command: CredentialCommand,
    },
    Resolve {
        #[command(flatten)]
        args: ResolveArgs,
    },
}

#[derive(Debug, Subcommand)]
pub enum CredentialCommand {
    List {
        /// List credentials from every context, not just the selected one.
        #[arg(long)]
        all_contexts: bool,
        /// Include the names (never the values) of the environment
        /// variables each credential sets.
        #[arg(long)]
        show_env: bool,
    },
    Show {
        tool_name: String,
    },
    Delete {
        tool_name: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ResolveArgs {
    pub tool_name: String,
    /// Provider tool commands, run in declared order on a store miss.
    #[arg(long = "provider")]
    pub providers: Vec<String>,
    /// Treat the tool as loaded from a local file: the resolved credential
    /// is not persisted.
    #[arg(long)]
    pub local: bool,
    /// Credential override expression, e.g. `tool:KEY=value,OTHER->SRC`.
    /// Falls back to TOOLVAULT_CREDENTIAL_OVERRIDE when unset.
    #[arg(long = "override")]
    pub override_expr: Option<String>,
}
