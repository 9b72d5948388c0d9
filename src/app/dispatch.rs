use crate::app::status::render_status;
use crate::cli::commands::{Cli, Commands};
use anyhow::{Context, Result, bail};
use conclave::Config;
use conclave::process::{AgentDefinition, load_definition};
use conclave::store::{DurableStore, SqliteDurableStore};
use std::path::Path;

async fn open_store(config: &Config) -> Result<SqliteDurableStore> {
    SqliteDurableStore::connect(
        &config.store.resolved_database_path(),
        config.store.max_connections,
    )
    .await
}

fn describe(definition: &AgentDefinition, with_tools: bool) -> String {
    let all = definition.tool_names();
    let mut lines = vec![format!(
        "{}: {} state(s), initial {}",
        definition.name,
        definition.states.len(),
        definition.initial_state
    )];
    if let Some(aux) = &definition.auxiliary {
        lines.push(format!("  auxiliary {} ({})", aux.state, aux.pass));
    }
    for state in &definition.states {
        lines.push(format!("  - {}: {}", state.name, state.task));
        if with_tools {
            for tool in state.exposed(&all) {
                let transition = state
                    .transition(tool)
                    .map_or_else(|| "?".to_string(), ToString::to_string);
                lines.push(format!("      {tool} -> {transition}"));
            }
        }
    }
    lines.join("\n")
}

fn check(path: &Path, with_tools: bool) -> Result<AgentDefinition> {
    let definition = load_definition(path)?;
    definition
        .validate()
        .with_context(|| format!("{} is not a valid agent definition", path.display()))?;
    println!("✓ {}", describe(&definition, with_tools));
    Ok(definition)
}

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Check { path, tools } => {
            check(&path, tools)?;
            Ok(())
        }
        Commands::Register { path } => {
            let definition = check(&path, false)?;
            let store = open_store(&config).await?;
            store.save_agent_definition(&definition).await?;
            tracing::info!(agent = %definition.name, "agent definition stored");
            println!("Registered {}.", definition.name);
            Ok(())
        }
        Commands::Status => {
            println!("{}", render_status(&config));
            Ok(())
        }
        Commands::Process { process_id } => {
            let store = open_store(&config).await?;
            let Some(record) = store.load_process(&process_id).await? else {
                bail!("process {process_id} not found");
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Commands::Archives { process_id, full } => {
            let store = open_store(&config).await?;
            let archives = store.load_archives(&process_id).await?;
            if archives.is_empty() {
                println!("No archived conversations for {process_id}.");
                return Ok(());
            }
            for archive in archives {
                println!(
                    "{}  {} message(s)  {}",
                    archive.archived_at.to_rfc3339(),
                    archive.messages.len(),
                    archive.summary.as_deref().unwrap_or("(no summary)")
                );
                if full {
                    for message in &archive.messages {
                        println!("    {}", message.render());
                    }
                }
            }
            Ok(())
        }
    }
}
