use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sieve_filter::cache::CompiledScriptCache;
use sieve_filter::config::Settings;
use sieve_filter::engine::handler::RecordingHandler;
use sieve_filter::error::{Error, Result};
use sieve_filter::manager::RuleManager;
use sieve_filter::message::ParsedMessage;
use sieve_filter::mime::body;
use sieve_filter::model::script::FilterRules;
use sieve_filter::sieve::{converter, emitter, parser, rewrite};
use sieve_filter::store::{FileRuleStore, MemoryRuleStore, RulePersistence, ScriptKind};

const SENT_FOLDER: &str = "Sent";

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_DATE"),
    " ",
    env!("GIT_COMMIT"),
    ")"
);

#[derive(Parser)]
#[command(name = "sieve-filter", version = VERSION, about, long_about = None)]
struct Cli {
    /// Settings file, instead of the one in the user config directory
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script and list its rule names
    Check { script: PathBuf },

    /// Convert a script to the structured JSON form
    ToJson { script: PathBuf },

    /// Convert structured JSON rules to a script
    FromJson { json: PathBuf },

    /// Show the part tree of a message with its body and attachment parts
    Parts { message: PathBuf },

    /// Run rules on a message and print what would be delivered
    Filter {
        /// Script to run; defaults to the account's stored rules
        #[arg(long)]
        script: Option<PathBuf>,
        #[arg(long)]
        message: PathBuf,
        #[arg(long, default_value = "user@localhost")]
        account: String,
        /// Filter as mail being sent, with the outgoing rules and a Sent folder
        #[arg(long)]
        outgoing: bool,
    },

    /// Apply a folder or tag maintenance event to a script
    #[command(group(
        ArgGroup::new("event")
            .required(true)
            .args(["delete_folder", "rename_folder", "delete_tag", "rename_tag"])
    ))]
    Rewrite {
        script: PathBuf,
        #[arg(long, value_name = "PATH")]
        delete_folder: Option<String>,
        #[arg(long, num_args = 2, value_names = ["OLD", "NEW"])]
        rename_folder: Option<Vec<String>>,
        #[arg(long, value_name = "TAG")]
        delete_tag: Option<String>,
        #[arg(long, num_args = 2, value_names = ["OLD", "NEW"])]
        rename_tag: Option<Vec<String>>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => Settings::load_or_default(path),
        None => Settings::load_default_location(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, settings: &Settings) -> Result<()> {
    match command {
        Commands::Check { script } => {
            let names = parser::rule_names(&fs::read_to_string(script)?)?;
            println!("{} rule(s)", names.len());
            for name in names {
                println!("  {name}");
            }
        }
        Commands::ToJson { script } => {
            let script = parser::parse(&fs::read_to_string(script)?)?;
            println!("{}", converter::script_to_rules(&script).to_json()?);
        }
        Commands::FromJson { json } => {
            let rules = FilterRules::from_json(&fs::read_to_string(json)?)?;
            print!("{}", converter::rules_to_script(&rules)?);
        }
        Commands::Parts { message } => {
            let message = ParsedMessage::with_options(&fs::read(message)?, settings.message_options());
            print_parts(&message);
        }
        Commands::Filter {
            script,
            message,
            account,
            outgoing,
        } => {
            let kind = if outgoing {
                ScriptKind::Outgoing
            } else {
                ScriptKind::Incoming
            };
            filter(settings, script.as_deref(), &message, &account, kind)?
        }
        Commands::Rewrite {
            script,
            delete_folder,
            rename_folder,
            delete_tag,
            rename_tag,
        } => {
            let parsed = parser::parse(&fs::read_to_string(&script)?)?;
            let updated = if let Some(path) = delete_folder {
                rewrite::folder_deleted(&parsed, &path)
            } else if let Some([old, new]) = rename_folder.as_deref() {
                rewrite::folder_renamed(&parsed, old, new)
            } else if let Some(tag) = delete_tag {
                rewrite::tag_deleted(&parsed, &tag)
            } else if let Some([old, new]) = rename_tag.as_deref() {
                rewrite::tag_renamed(&parsed, old, new)
            } else {
                return Err(Error::InvalidRequest("no rewrite event given".to_string()));
            };
            match updated {
                Some(updated) => print!("{}", emitter::emit(&updated)),
                None => {
                    tracing::info!(script = %script.display(), "nothing to rewrite");
                    print!("{}", emitter::emit(&parsed));
                }
            }
        }
    }
    Ok(())
}

fn filter(
    settings: &Settings,
    script: Option<&Path>,
    message: &Path,
    account: &str,
    kind: ScriptKind,
) -> Result<()> {
    let store: Arc<dyn RulePersistence> = match script {
        Some(path) => {
            let store = MemoryRuleStore::new();
            store.save(account, kind, &fs::read_to_string(path)?)?;
            Arc::new(store)
        }
        None => {
            let dir = settings.rules_dir().ok_or_else(|| {
                Error::InvalidRequest("no rules directory; pass --script".to_string())
            })?;
            Arc::new(FileRuleStore::new(dir))
        }
    };
    let cache = Arc::new(CompiledScriptCache::new(settings.cache_capacity, store));
    let manager = RuleManager::with_options(cache, settings.message_options());

    let message = manager.parse_message(&fs::read(message)?);
    let (handler, added) = match kind {
        ScriptKind::Incoming => {
            let mut handler = RecordingHandler::default();
            let added = manager.apply_rules_to_incoming(account, &message, &mut handler)?;
            (handler, added)
        }
        ScriptKind::Outgoing => {
            let mut handler = RecordingHandler::new(SENT_FOLDER);
            let added = manager.apply_rules_to_outgoing(account, &message, &mut handler)?;
            (handler, added)
        }
    };
    for event in &handler.events {
        println!("{event}");
    }
    println!("{} cop{} stored", added.len(), if added.len() == 1 { "y" } else { "ies" });
    Ok(())
}

fn print_parts(message: &ParsedMessage) {
    let tree = message.tree();
    let bodies = body::get_body(tree, true);
    for &id in message.parts() {
        let part = tree.part(id);
        let mut depth = 0;
        let mut parent = part.parent;
        while let Some(p) = parent {
            depth += 1;
            parent = tree.part(p).parent;
        }
        let mut line = format!(
            "{:indent$}{} {} ({} bytes)",
            "",
            part.name,
            part.mime_type(),
            part.size,
            indent = depth * 2
        );
        if let Some(filename) = &part.filename {
            line.push_str(&format!(" {filename:?}"));
        }
        if bodies.contains(&id) {
            line.push_str(" [body]");
        }
        if body::is_filterable_attachment(tree, id, &bodies) {
            line.push_str(" [attachment]");
        }
        println!("{line}");
    }
    println!("subject: {}", message.subject());
    if !message.attachment_types().is_empty() {
        let types: Vec<&str> = message.attachment_types().iter().map(String::as_str).collect();
        println!("attachment types: {}", types.join(", "));
    }
    println!("fragment: {}", message.fragment());
}
