use std::fs;
use std::io::{self, ErrorKind, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hg_contracts::chat::{parse_intent, Intent, SESSION_HELP_COMMANDS};
use hg_contracts::session::Session;
use hg_engine::export::{write_export, ExportFormat};
use hg_engine::{AnalysisGateway, EngineConfig, FeedbackChannel, PromptComposer, Studio};
use serde_json::Value;

mod server;

use server::ServerState;

#[derive(Debug, Parser)]
#[command(name = "hg-rs", version, about = "Hidden Grammar artwork analyst")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session over one artwork at a time.
    Session(SessionArgs),
    /// One-shot analysis of a single image.
    Analyze(AnalyzeArgs),
    /// Follow-up question against a saved analysis.
    Ask(AskArgs),
    /// HTTP API for browser front ends.
    Serve(ServeArgs),
    Modes(ListArgs),
    Lenses(ListArgs),
}

#[derive(Debug, Args)]
struct EngineArgs {
    /// Vision provider (`anthropic` or `dryrun`).
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Append lifecycle events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value = ".")]
    export_dir: PathBuf,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    submode: Option<String>,
    #[arg(long)]
    custom: Option<String>,
    /// Context field as `id=value`; repeatable.
    #[arg(long = "field", value_name = "ID=VALUE")]
    fields: Vec<String>,
    #[arg(long)]
    lens: Option<String>,
    #[arg(long)]
    lens_intent: Option<String>,
    /// Print rendered HTML instead of Markdown.
    #[arg(long)]
    html: bool,
    /// Write an export instead of printing.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, default_value = "md")]
    format: String,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct AskArgs {
    #[arg(long)]
    prior_file: PathBuf,
    #[arg(long)]
    question: String,
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    html: bool,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct ListArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionFlow {
    Continue,
    Quit,
}

fn main() {
    init_logging();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("hg-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Session(args) => {
            run_session(args)?;
            Ok(0)
        }
        Command::Analyze(args) => run_analyze(args),
        Command::Ask(args) => run_ask(args),
        Command::Serve(args) => {
            run_serve(args)?;
            Ok(0)
        }
        Command::Modes(args) => {
            print_modes(&PromptComposer::builtin()?, args.json, &mut io::stdout())?;
            Ok(0)
        }
        Command::Lenses(args) => {
            print_lenses(&PromptComposer::builtin()?, args.json, &mut io::stdout())?;
            Ok(0)
        }
    }
}

fn engine_config(args: &EngineArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(provider) = non_empty(args.provider.as_deref()) {
        config.provider = provider.to_ascii_lowercase();
        if config.provider == "dryrun" && args.model.is_none() {
            config.model = EngineConfig::dryrun().model;
        }
    }
    if let Some(model) = non_empty(args.model.as_deref()) {
        config.model = model.to_string();
    }
    if let Some(events) = &args.events {
        config.events_path = Some(events.clone());
    }
    config
}

fn run_session(args: SessionArgs) -> Result<()> {
    let studio = Studio::from_config(&engine_config(&args.engine))?;
    let mut session = Session::new();
    let mut stdout = io::stdout();

    if let Some(mode) = non_empty(args.mode.as_deref()) {
        let intent = parse_intent(&format!("/mode {mode}"));
        handle_session_intent(&studio, &mut session, &intent, &args.export_dir, &mut stdout)?;
    }
    if let Some(image) = &args.image {
        let intent = parse_intent(&format!("/image \"{}\"", image.display()));
        handle_session_intent(&studio, &mut session, &intent, &args.export_dir, &mut stdout)?;
    }

    println!(
        "Hidden Grammar session {} ({} / {}). Type /help for commands.",
        session.id(),
        studio.gateway().provider_name(),
        studio.gateway().model()
    );

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        let flow =
            handle_session_intent(&studio, &mut session, &intent, &args.export_dir, &mut stdout)?;
        if flow == SessionFlow::Quit {
            break;
        }
    }
    Ok(())
}

/// Applies one parsed command to the session. Command failures are
/// reported to `out`; only output errors propagate.
fn handle_session_intent(
    studio: &Studio,
    session: &mut Session,
    intent: &Intent,
    export_dir: &Path,
    out: &mut impl Write,
) -> Result<SessionFlow> {
    match intent.action.as_str() {
        "noop" => {}
        "help" => {
            writeln!(out, "Commands: {}", SESSION_HELP_COMMANDS.join(" "))?;
        }
        "load_image" => {
            let Some(path) = intent.arg_str("path") else {
                writeln!(out, "/image requires a path")?;
                return Ok(SessionFlow::Continue);
            };
            match studio.load_image_path(session, Path::new(path)) {
                Ok(image) if image.was_resized => writeln!(
                    out,
                    "Image loaded: {}x{} -> {}x{} {} (~{} KiB)",
                    image.original_width,
                    image.original_height,
                    image.width,
                    image.height,
                    image.payload.media_type,
                    image.approx_bytes() / 1024
                )?,
                Ok(image) => writeln!(
                    out,
                    "Image loaded: {}x{} {} (~{} KiB)",
                    image.width,
                    image.height,
                    image.payload.media_type,
                    image.approx_bytes() / 1024
                )?,
                Err(err) => writeln!(out, "Image failed: {err}")?,
            }
        }
        "set_mode" => {
            let Some(mode_id) = intent.arg_str("mode") else {
                writeln!(out, "/mode requires a mode id (see /modes)")?;
                return Ok(SessionFlow::Continue);
            };
            match studio.select_mode(session, mode_id) {
                Ok(mode) => {
                    writeln!(
                        out,
                        "Mode set to {} ({} / {})",
                        mode.id, mode.category_label, mode.label
                    )?;
                    let fields = mode
                        .fields
                        .iter()
                        .map(|field| field.id.as_str())
                        .collect::<Vec<_>>();
                    writeln!(out, "Fields: {}", fields.join(", "))?;
                }
                Err(err) => writeln!(out, "{err}")?,
            }
        }
        "set_submode" => {
            let Some(submode) = intent.arg_str("submode") else {
                writeln!(out, "/submode requires an id")?;
                return Ok(SessionFlow::Continue);
            };
            match session.select_submode(submode) {
                Ok(()) => writeln!(out, "Sub-mode set to {submode}")?,
                Err(err) => writeln!(out, "{err}")?,
            }
        }
        "set_field" => {
            let Some(field) = intent.arg_str("field") else {
                writeln!(out, "/field requires an id and a value")?;
                return Ok(SessionFlow::Continue);
            };
            let value = intent.arg_str("value").unwrap_or_default();
            match session.set_field(field, value) {
                Ok(()) if value.is_empty() => writeln!(out, "Cleared {field}")?,
                Ok(()) => writeln!(out, "Set {field}")?,
                Err(err) => writeln!(out, "{err}")?,
            }
        }
        "set_custom" => {
            session.set_custom_text(intent.arg_str("text"));
            match session.custom_text() {
                Some(_) => writeln!(out, "Custom instructions set")?,
                None => writeln!(out, "Custom instructions cleared")?,
            }
        }
        "analyze" => match studio.run_analysis(session) {
            Ok(index) => print_turn(session, index, out)?,
            Err(err) => writeln!(out, "Analysis failed: {err}")?,
        },
        "ask" => {
            let Some(question) = intent.arg_str("question") else {
                writeln!(out, "/ask requires a question")?;
                return Ok(SessionFlow::Continue);
            };
            if !session.has_analysis() {
                writeln!(
                    out,
                    "Run /analyze first; questions follow an analysis (see /help)"
                )?;
                return Ok(SessionFlow::Continue);
            }
            match studio.ask(session, question) {
                Ok(index) => print_turn(session, index, out)?,
                Err(err) => writeln!(out, "Follow-up failed: {err}")?,
            }
        }
        "apply_lens" => {
            let Some(lens_id) = intent.arg_str("lens") else {
                writeln!(out, "/lens requires a lens id (see /lenses)")?;
                return Ok(SessionFlow::Continue);
            };
            match studio.apply_lens(session, lens_id, intent.arg_str("intent")) {
                Ok(index) => print_turn(session, index, out)?,
                Err(err) => writeln!(out, "Lens failed: {err}")?,
            }
        }
        "list_turns" => {
            if session.turns().is_empty() {
                writeln!(out, "No analysis yet")?;
            }
            for turn in session.turns() {
                writeln!(out, "[{}] {}", turn.index, turn.heading())?;
            }
        }
        "show_turn" => {
            let index = intent
                .arg_str("index")
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(0);
            if session.turn(index).is_some() {
                print_turn(session, index, out)?;
            } else {
                writeln!(out, "No turn {index}")?;
            }
        }
        "list_modes" => print_modes(studio.composer(), false, out)?,
        "list_lenses" => print_lenses(studio.composer(), false, out)?,
        "feedback" => {
            let rating = intent.command_args.get("rating").and_then(Value::as_i64);
            let comment = intent.arg_str("comment");
            if rating.is_none() && comment.is_none() {
                writeln!(out, "/feedback requires a rating (1-5) or a comment")?;
                return Ok(SessionFlow::Continue);
            }
            studio.submit_feedback(session, rating, comment);
            writeln!(out, "Thanks, feedback recorded")?;
        }
        "export" => {
            if !session.has_analysis() {
                writeln!(out, "Nothing to export yet")?;
                return Ok(SessionFlow::Continue);
            }
            let format = match intent.arg_str("format").unwrap_or("md").parse::<ExportFormat>() {
                Ok(format) => format,
                Err(err) => {
                    writeln!(out, "{err}")?;
                    return Ok(SessionFlow::Continue);
                }
            };
            let path = intent.arg_str("path").map(PathBuf::from);
            match write_export(session, format, path.as_deref(), export_dir) {
                Ok(written) => writeln!(out, "Exported {}", written.display())?,
                Err(err) => writeln!(out, "Export failed: {err:#}")?,
            }
        }
        "new_artwork" => {
            studio.new_artwork(session);
            writeln!(out, "Session cleared")?;
        }
        "quit" => return Ok(SessionFlow::Quit),
        _ => {
            let command = intent.arg_str("command").unwrap_or("?");
            writeln!(out, "Unknown command /{command}. Type /help for commands.")?;
        }
    }
    Ok(SessionFlow::Continue)
}

fn print_turn(session: &Session, index: usize, out: &mut impl Write) -> Result<()> {
    let Some(turn) = session.turn(index) else {
        return Ok(());
    };
    writeln!(out, "\n## [{}] {}\n", turn.index, turn.heading())?;
    writeln!(out, "{}", turn.raw.trim_end())?;
    Ok(())
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let studio = Studio::from_config(&engine_config(&args.engine))?;
    let mut session = Session::new();

    studio
        .load_image_path(&mut session, &args.image)
        .with_context(|| format!("failed to load {}", args.image.display()))?;
    if let Some(mode) = non_empty(args.mode.as_deref()) {
        studio.select_mode(&mut session, mode)?;
    }
    if let Some(submode) = non_empty(args.submode.as_deref()) {
        session.select_submode(submode)?;
    }
    for raw in &args.fields {
        let Some((id, value)) = raw.split_once('=') else {
            bail!("--field expects id=value, got '{raw}'");
        };
        session.set_field(id.trim(), value.trim())?;
    }
    session.set_custom_text(args.custom.as_deref());
    session.select_lens(args.lens.as_deref(), args.lens_intent.as_deref());

    let index = match studio.run_analysis(&mut session) {
        Ok(index) => index,
        Err(err) => {
            eprintln!("Analysis failed: {err}");
            return Ok(if err.is_client_error() { 2 } else { 1 });
        }
    };

    if let Some(out) = &args.out {
        let format = args.format.parse::<ExportFormat>()?;
        let cwd = std::env::current_dir().context("failed to read current directory")?;
        let written = write_export(&session, format, Some(out.as_path()), &cwd)?;
        println!("Exported {}", written.display());
        return Ok(0);
    }

    let Some(turn) = session.turn(index) else {
        bail!("analysis turn {index} missing");
    };
    if args.html {
        println!("{}", turn.html);
    } else {
        println!("{}", turn.raw.trim_end());
    }
    Ok(0)
}

fn run_ask(args: AskArgs) -> Result<i32> {
    let prior = fs::read_to_string(&args.prior_file)
        .with_context(|| format!("failed to read {}", args.prior_file.display()))?;
    let gateway = AnalysisGateway::from_config(&engine_config(&args.engine))?;
    match gateway.interrogate(&prior, &args.question, non_empty(args.mode.as_deref())) {
        Ok(result) if args.html => println!("{}", result.html),
        Ok(result) => println!("{}", result.raw.trim_end()),
        Err(err) => {
            eprintln!("Follow-up failed: {err}");
            return Ok(if err.is_client_error() { 2 } else { 1 });
        }
    }
    Ok(0)
}

fn run_serve(args: ServeArgs) -> Result<()> {
    let addr: SocketAddr = args
        .addr
        .parse()
        .with_context(|| format!("invalid listen address '{}'", args.addr))?;
    let config = engine_config(&args.engine);
    // Blocking HTTP clients are built and dropped outside the async runtime.
    let state = Arc::new(ServerState {
        gateway: AnalysisGateway::from_config(&config)?,
        feedback: FeedbackChannel::from_config(&config.feedback),
    });
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let served = runtime.block_on(server::serve(state.clone(), addr));
    drop(runtime);
    drop(state);
    served
}

fn print_modes(composer: &PromptComposer, as_json: bool, out: &mut impl Write) -> Result<()> {
    if as_json {
        writeln!(
            out,
            "{}",
            serde_json::to_string_pretty(&server::modes_catalog(composer))?
        )?;
        return Ok(());
    }
    let modes = composer.modes();
    for category in modes.categories() {
        writeln!(out, "{} ({})", category.label, category.id)?;
        for mode in modes.by_category(&category.id) {
            writeln!(
                out,
                "  {:<28} {} [gating: {}]",
                mode.id,
                mode.label,
                mode.gating.as_str()
            )?;
        }
    }
    Ok(())
}

fn print_lenses(composer: &PromptComposer, as_json: bool, out: &mut impl Write) -> Result<()> {
    if as_json {
        writeln!(
            out,
            "{}",
            serde_json::to_string_pretty(&server::lenses_catalog(composer))?
        )?;
        return Ok(());
    }
    for (category, lenses) in composer.lenses().grouped() {
        writeln!(out, "{}", category.name)?;
        for lens in lenses {
            let marker = if lens.requires_intent() {
                " (needs intent)"
            } else {
                ""
            };
            writeln!(out, "  {:<28} {} / {}{marker}", lens.id, lens.name, lens.thinker)?;
        }
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
