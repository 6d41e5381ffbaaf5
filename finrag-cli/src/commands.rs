//! CLI subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use finrag_core::history::MetricsHistoryStore;
use finrag_core::{
    ChatMessage, Collaborators, EntityExtractor, FinragConfig, InMemoryVectorIndex,
    QuestionContext, QuestionResponse, RagEngine, create_embedder, report,
};

use crate::{Commands, ConfigAction, MetricsAction};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Ask {
            question,
            index,
            conversation,
            history,
            relevant,
            ground_truth,
        } => {
            let context = QuestionContext {
                history: match history {
                    Some(path) => load_history(&path)?,
                    None => Vec::new(),
                },
                relevant_docs: (!relevant.is_empty()).then_some(relevant),
                ground_truth,
            };
            handle_ask(&question, &index, conversation.as_deref(), context, workspace).await
        }
        Commands::Metrics { action } => handle_metrics(action, workspace),
        Commands::Entities { text } => {
            let entities = EntityExtractor::new().extract(&text);
            println!("{}", serde_json::to_string_pretty(&entities)?);
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load_config(workspace: &Path) -> anyhow::Result<FinragConfig> {
    let mut config = finrag_core::config::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config.metrics.storage_dir = resolve(workspace, &config.metrics.storage_dir);
    Ok(config)
}

/// Relative paths are taken from the workspace.
fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn load_history(path: &Path) -> anyhow::Result<Vec<ChatMessage>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read history {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&data)?)
}

async fn handle_ask(
    question: &str,
    index_path: &Path,
    conversation: Option<&str>,
    context: QuestionContext,
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = load_config(workspace)?;

    let embedder = create_embedder(&config.embedding)?;
    let mut index = InMemoryVectorIndex::new(embedder.clone());
    let chunks = InMemoryVectorIndex::load_chunks(&resolve(workspace, index_path))?;
    let build = index.add_chunks(chunks, &config.retry).await;
    if !build.failed.is_empty() {
        warn!(
            skipped = build.failed.len(),
            "Some chunks could not be embedded and were skipped"
        );
    }
    info!(
        index = %index_path.display(),
        chunks = build.indexed,
        embedder = %config.embedding.provider,
        model = %config.llm.model,
        "Index ready"
    );

    let collaborators = Collaborators::from_config(&config, Arc::new(index), embedder)?;
    let history = MetricsHistoryStore::open(&config.metrics)?;
    let engine = RagEngine::new(&config, collaborators, history);

    let response = engine
        .process_question(question, conversation, Some(context))
        .await?;
    print_response(&response);
    Ok(())
}

fn print_response(response: &QuestionResponse) {
    println!("{}\n", response.answer);

    if !response.search_results.is_empty() {
        println!("Top results:");
        for (i, result) in response.search_results.iter().enumerate() {
            println!(
                "  {}. [{:.3}] {} ({})",
                i + 1,
                result.score,
                result.metadata.chunk_id,
                result.metadata.doc_id
            );
            println!("     {}", result.content.replace('\n', " "));
        }
        println!();
    }

    let turn = &response.turn;
    println!("Turn metrics:");
    println!(
        "  accuracy {}  exact {}  cosine {:.3}  rouge1 {:.3}",
        turn.answer.answer_accuracy,
        turn.answer.exact_match,
        turn.answer.cosine_similarity,
        turn.answer.rouge1
    );
    if let Some(r) = &turn.retrieval {
        println!(
            "  precision {:.3}  recall {:.3}  ndcg {:.3}  mrr {:.3}",
            r.precision, r.recall, r.ndcg, r.mrr
        );
    }
    println!(
        "  latency {:.2}s  tokens {}",
        turn.system.response_latency, turn.system.tokens
    );
    println!("\nConversation: {}", response.conversation_id);
}

fn handle_metrics(action: MetricsAction, workspace: &Path) -> anyhow::Result<()> {
    let config = load_config(workspace)?;
    let mut metrics = config.metrics.clone();
    // Opening for inspection never wipes the file.
    metrics.reset_on_start = false;
    let store = MetricsHistoryStore::open(&metrics)?;
    info!(storage_dir = %metrics.storage_dir.display(), "Opened metrics store");

    match action {
        MetricsAction::Show { history } => {
            let state = store.state()?;
            print!("{}", report::render(&state.aggregate_metrics));
            println!(
                "\nHistory: {} of {} entries",
                state.metrics_history.len(),
                store.capacity()
            );
            if history {
                for entry in &state.metrics_history {
                    println!(
                        "  {}  questions {}  accuracy {}  ndcg {}",
                        entry.timestamp.to_rfc3339(),
                        entry.aggregate.total_questions,
                        report::percent(entry.aggregate.answer_accuracy),
                        report::percent(entry.aggregate.ndcg)
                    );
                }
            }
            Ok(())
        }
        MetricsAction::Reset => {
            store.reset()?;
            println!("Metrics reset in {}", metrics.storage_dir.display());
            Ok(())
        }
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(workspace)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_relative_and_absolute() {
        let ws = Path::new("/work");
        assert_eq!(resolve(ws, Path::new("data/metrics")), PathBuf::from("/work/data/metrics"));
        assert_eq!(resolve(ws, Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn test_load_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(
            &path,
            r#"[{"role": "user", "content": "Revenue?"}, {"role": "assistant", "content": "$5M"}]"#,
        )
        .unwrap();
        let history = load_history(&path).unwrap();
        assert_eq!(
            history,
            vec![ChatMessage::user("Revenue?"), ChatMessage::assistant("$5M")]
        );
    }

    #[test]
    fn test_load_history_missing_file() {
        assert!(load_history(Path::new("/nonexistent/history.json")).is_err());
    }
}
