use std::collections::BTreeMap;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::cli::{Cli, Command, CredentialCommand, ResolveArgs};
use crate::config::Config;
use crate::manager::{CredentialManager, ToolProvenance};
use crate::overrides::OverrideSet;
use crate::paths::CredentialPaths;
use crate::provider::ProviderRunner;
use crate::store::{BackendRegistry, ContextStore, CredentialRecord};

pub fn run(cli: Cli) -> Result<(), String> {
    let paths = CredentialPaths::discover();
    let config = Config::load(&paths.config_path()).map_err(|e| e.to_string())?;
    let backend = BackendRegistry::builtin()
        .open(config.creds_store(), &paths)
        .map_err(|e| e.to_string())?;
    let store = ContextStore::new(backend);
    let context = cli
        .context
        .unwrap_or_else(|| config.context().to_string());

    match cli.command {
        Command::Credential { command } => match command {
            CredentialCommand::List {
                all_contexts,
                show_env,
            } => run_list(&store, &context, all_contexts, show_env),
            CredentialCommand::Show { tool_name } => run_show(&store, &context, &tool_name),
            CredentialCommand::Delete { tool_name } => run_delete(&store, &context, &tool_name),
        },
        Command::Resolve { args } => run_resolve(&store, &context, args),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListedCredential {
    context: String,
    tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    env_vars: Option<Vec<String>>,
    created_at_ms: i64,
}

fn run_list(
    store: &ContextStore,
    context: &str,
    all_contexts: bool,
    show_env: bool,
) -> Result<(), String> {
    let mut records = if all_contexts {
        store.list_all().map_err(|e| e.to_string())?
    } else {
        store.list(context).map_err(|e| e.to_string())?
    };
    records.sort_by(|a, b| {
        (a.context.as_str(), a.tool_name.as_str()).cmp(&(b.context.as_str(), b.tool_name.as_str()))
    });

    let listed: Vec<ListedCredential> = records
        .into_iter()
        .map(|rec| ListedCredential {
            env_vars: show_env.then(|| rec.env_var_names()),
            context: rec.context,
            tool_name: rec.tool_name,
            created_at_ms: rec.created_at_ms,
        })
        .collect();
    print_json(&listed)
}

fn run_show(store: &ContextStore, context: &str, tool_name: &str) -> Result<(), String> {
    let record: Option<CredentialRecord> =
        store.get(context, tool_name).map_err(|e| e.to_string())?;
    match record {
        Some(record) => print_json(&record),
        None => Err(format!(
            "credential not found for context '{}', tool '{}'",
            context, tool_name
        )),
    }
}

fn run_delete(store: &ContextStore, context: &str, tool_name: &str) -> Result<(), String> {
    store
        .delete(context, tool_name)
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({
        "context": context,
        "toolName": tool_name,
        "deleted": true,
    }))
}

fn override_expression(flag: Option<String>) -> Option<String> {
    flag.or_else(|| {
        std::env::var("TOOLVAULT_CREDENTIAL_OVERRIDE")
            .ok()
            .filter(|expr| !expr.trim().is_empty())
    })
}

fn run_resolve(store: &ContextStore, context: &str, args: ResolveArgs) -> Result<(), String> {
    // A malformed override fails here, before any resolution starts.
    let overrides = match override_expression(args.override_expr) {
        Some(expr) => OverrideSet::parse(&expr).map_err(|e| e.to_string())?,
        None => OverrideSet::empty(),
    };
    let manager = CredentialManager::new(
        store.clone(),
        overrides,
        ProviderRunner::with_command_executor(),
        CancelToken::new(),
    );
    let provenance = if args.local {
        ToolProvenance::Local
    } else {
        ToolProvenance::Registry
    };
    let env = manager
        .resolve(context, &args.tool_name, &args.providers, provenance)
        .map_err(|e| e.to_string())?;

    // BTreeMap keeps the printed mapping stable.
    let sorted: BTreeMap<String, String> = env.into_iter().collect();
    print_json(&serde_json::json!({ "env": sorted }))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let raw = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", raw);
    Ok(())
}
