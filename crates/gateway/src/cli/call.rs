//! `toolhost call` and `toolhost tools`: one-shot commands.
//!
//! Both run in-process against the built-in tools by default, or against a
//! child server (`--server PATH`) through the client facade.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;

use th_client::{ClientOptions, SimpleClient};
use th_domain::config::Config;
use th_domain::tool::ToolDescriptor;

use crate::bootstrap::{self, InstanceArgs};
use crate::cli::InstanceFlags;
use crate::stream;

/// Arguments of `toolhost call`.
pub struct CallArgs {
    pub tool: String,
    pub arguments: String,
    pub server: Option<String>,
    pub instance: InstanceFlags,
    pub timeout_ms: Option<u64>,
}

/// Invoke a tool and print the result to stdout.
///
/// Strings are printed verbatim; anything else as pretty JSON.
pub async fn call(config: Arc<Config>, args: CallArgs) -> anyhow::Result<()> {
    let arguments: Value = serde_json::from_str(&args.arguments)
        .with_context(|| format!("arguments are not valid JSON: {}", args.arguments))?;

    let result = match &args.server {
        Some(server) => {
            let mut opts = client_options(&config, server, &args.instance);
            if let Some(ms) = args.timeout_ms {
                opts = opts.call_timeout(Duration::from_millis(ms));
            }
            let client = SimpleClient::connect(opts)
                .await
                .with_context(|| format!("starting {server}"))?;
            let result = client.call(&args.tool, arguments).await;
            client.close().await;
            result.with_context(|| format!("calling {}", args.tool))?
        }
        None => {
            let state = bootstrap::build_app_state(config, &args.instance.into_args(None)).await?;
            let call = stream::invoke_full(state.registry.as_ref(), &args.tool, arguments);
            let result = match args.timeout_ms {
                Some(ms) => tokio::time::timeout(Duration::from_millis(ms), call)
                    .await
                    .with_context(|| format!("{} did not finish within {ms} ms", args.tool))?,
                None => call.await,
            };
            result.with_context(|| format!("calling {}", args.tool))?
        }
    };

    match result {
        Value::String(text) => print!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}

/// Print the available tools, optionally filtered by role.
pub async fn tools(
    config: Arc<Config>,
    server: Option<String>,
    role: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let tools = match &server {
        Some(server) => {
            let opts = client_options(&config, server, &InstanceFlags::default());
            let client = SimpleClient::connect(opts)
                .await
                .with_context(|| format!("starting {server}"))?;
            let listed = match &role {
                Some(role) => client.list_tools_for_role(role).await,
                None => client.list_tools().await,
            };
            client.close().await;
            listed?
        }
        None => {
            let state = bootstrap::build_app_state(config, &InstanceArgs::default()).await?;
            state.registry.tools_for_role(role.as_deref())
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
    } else {
        print_table(&tools);
    }
    Ok(())
}

fn client_options(config: &Config, server: &str, instance: &InstanceFlags) -> ClientOptions {
    let mut opts = ClientOptions::new(server).transport(config.transport.clone());
    if let Some(alias) = &instance.alias {
        opts = opts.alias(alias.clone());
    }
    if let Some(port) = instance.port {
        opts = opts.port(port);
    }
    if let Some(dir) = &instance.config_dir {
        opts = opts.config_dir(dir.clone());
    }
    opts
}

fn print_table(tools: &[ToolDescriptor]) {
    let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(4).max(4);
    for tool in tools {
        let mut flags = Vec::new();
        if tool.streaming {
            flags.push("streaming".to_owned());
        }
        if !tool.roles.is_empty() {
            let roles: Vec<&str> = tool.roles.iter().map(String::as_str).collect();
            flags.push(format!("roles: {}", roles.join(",")));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join("; "))
        };
        println!("{:<width$}  {}{flags}", tool.name, tool.description);
    }
    println!("\n{} tool(s)", tools.len());
}
