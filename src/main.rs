//! kb-reason CLI: resolve queries against a keyspace file.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use kb_reasoner::answer::ConceptMap;
use kb_reasoner::config::ResolutionConfig;
use kb_reasoner::explanation::ExplanationTree;
use kb_reasoner::keyspace::Keyspace;
use kb_reasoner::pattern::Pattern;
use kb_reasoner::rule::RuleGraph;

#[derive(Parser)]
#[command(name = "kb-reason", version, about = "Rule-based reasoning over a knowledge graph")]
struct Cli {
    /// Resolution config (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query.
    Resolve {
        /// Keyspace JSON file.
        #[arg(long)]
        keyspace: PathBuf,

        /// Query pattern as JSON, inline or a path to a file.
        #[arg(long)]
        query: String,

        /// Attach explanations to answers.
        #[arg(long)]
        explain: bool,

        /// Disable type inference.
        #[arg(long)]
        no_infer: bool,

        /// Print answers as JSON lines.
        #[arg(long)]
        json: bool,

        /// Stop after this many answers.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List the keyspace's rules.
    Rules {
        #[arg(long)]
        keyspace: PathBuf,
    },

    /// Validate a keyspace and its rules.
    Check {
        #[arg(long)]
        keyspace: PathBuf,
    },

    /// Print the effective configuration, optionally writing it to a file.
    Config {
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ResolutionConfig::load(path)?,
        None => ResolutionConfig::default(),
    };

    match cli.command {
        Commands::Resolve {
            keyspace,
            query,
            explain,
            no_infer,
            json,
            limit,
        } => {
            let keyspace = Keyspace::load(&keyspace)?;
            let pattern = read_pattern(&query)?;
            let ctx = keyspace.reasoning_context()?;
            let config = config
                .with_explain(explain || config.explain)
                .with_infer_types(config.infer_types && !no_infer);
            let query = ctx.factory_with(config).resolvable(&pattern)?;

            let mut count = 0usize;
            for answer in query.resolve().take(limit.unwrap_or(usize::MAX)) {
                let answer = answer?;
                count += 1;
                if json {
                    let line = if config.explain {
                        serde_json::json!({
                            "answer": named(&keyspace, &answer),
                            "explanation": ExplanationTree::build(&answer),
                        })
                    } else {
                        serde_json::json!({ "answer": named(&keyspace, &answer) })
                    };
                    println!("{line}");
                } else {
                    println!("{}", render(&keyspace, &answer));
                    if config.explain {
                        let tree = ExplanationTree::build(&answer);
                        print_tree(&tree, 1);
                    }
                }
            }
            let stats = ctx.cache_stats();
            if !json {
                println!(
                    "{count} answer(s); cache: {} hits, {} misses, {} entries",
                    stats.hits,
                    stats.misses,
                    ctx.cached_queries()
                );
            }
        }

        Commands::Rules { keyspace } => {
            let keyspace = Keyspace::load(&keyspace)?;
            let graph = RuleGraph::build(keyspace.rules(), keyspace.graph());
            if keyspace.rules().is_empty() {
                println!("No rules.");
            }
            for rule in keyspace.rules() {
                let recursive = rule
                    .head_label()
                    .is_some_and(|label| graph.is_recursive(label));
                println!(
                    "{}{}\n  when {}\n  then {}",
                    rule.label(),
                    if recursive { " (recursive)" } else { "" },
                    rule.when(),
                    rule.then()
                );
            }
        }

        Commands::Check { keyspace } => {
            let keyspace = Keyspace::load(&keyspace)?;
            keyspace.reasoning_context()?;
            println!(
                "OK: {} things, {} rules",
                keyspace.graph().len(),
                keyspace.rules().len()
            );
        }

        Commands::Config { write } => {
            if let Some(path) = write {
                config.save(&path)?;
                println!("Wrote {}", path.display());
            } else {
                println!("{}", toml::to_string_pretty(&config).into_diagnostic()?);
            }
        }
    }

    Ok(())
}

/// Parse a pattern from inline JSON or from a file holding it.
fn read_pattern(source: &str) -> Result<Pattern> {
    let trimmed = source.trim_start();
    let content = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        source.to_string()
    } else {
        std::fs::read_to_string(Path::new(source)).into_diagnostic()?
    };
    serde_json::from_str(&content).into_diagnostic()
}

fn concept_name(keyspace: &Keyspace, id: kb_reasoner::concept::ConceptId) -> String {
    keyspace
        .reference_of(id)
        .map_or_else(|| id.to_string(), ToString::to_string)
}

fn named(keyspace: &Keyspace, answer: &ConceptMap) -> serde_json::Map<String, serde_json::Value> {
    answer
        .iter()
        .map(|(var, id)| (var.name().to_string(), concept_name(keyspace, id).into()))
        .collect()
}

fn render(keyspace: &Keyspace, answer: &ConceptMap) -> String {
    let parts: Vec<String> = answer
        .iter()
        .map(|(var, id)| format!("{var} = {}", concept_name(keyspace, id)))
        .collect();
    format!("{{ {} }}", parts.join(", "))
}

fn print_tree(tree: &ExplanationTree, depth: usize) {
    let indent = "  ".repeat(depth);
    let how = match (&tree.rule, tree.kind) {
        (Some(rule), _) => format!("by rule {rule}"),
        (None, Some(kind)) => kind.to_string(),
        (None, None) => "given".to_string(),
    };
    let bindings: Vec<String> = tree.answer.iter().map(|(k, v)| format!("{k}={v}")).collect();
    println!("{indent}- {{{}}} ({how})", bindings.join(", "));
    for child in &tree.children {
        print_tree(child, depth + 1);
    }
}
