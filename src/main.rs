//! Preview Sandbox CLI
//!
//! Single-shot mode:
//!   preview-sandbox render lesson.html --language markup [--frame]
//!   preview-sandbox run lesson.js
//!   preview-sandbox check App.jsx --require useState --require "return ("
//!   preview-sandbox analyze App.jsx --language component
//!
//! Server mode (persistent process, reads from stdin):
//!   preview-sandbox serve
//!
//! Protocol (server mode):
//!   Request (stdin, one JSON object per line):
//!     {"code":"console.log(1)","language":"script","theme":"dark","execute":true}
//!
//!   Response (stdout):
//!     Status:Ok
//!     Length:1234
//!
//!     {"frameId":"…","document":"<!DOCTYPE html>…","embed":"<iframe …>","execution":{…}}
//!
//!   Error response:
//!     Status:Error
//!     Length:42
//!
//!     {"summary":"…","detail":"…"}

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use preview_sandbox::{
    analyze, DocumentSynthesizer, ExecutionOutcome, ExerciseSpec, HeadlessFrame, Language, RenderedView,
    SandboxConfig, SandboxRenderer, SourceUnit, Synthesize, Termination, Theme,
};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "preview-sandbox", version, about = "Isolated live previews for lesson code")]
struct Cli {
    /// JSON config file; missing fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging on stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the synthesized preview document (or its iframe embed)
    Render {
        /// Source file, `-` for stdin
        file: PathBuf,
        #[arg(short, long, default_value = "markup")]
        language: Language,
        #[arg(short, long, default_value = "light")]
        theme: Theme,
        /// Print the sandboxed `<iframe srcdoc>` embed instead of the bare document
        #[arg(long)]
        frame: bool,
    },
    /// Execute a script headlessly and print its console output
    Run {
        file: PathBuf,
        #[arg(short, long, default_value = "script")]
        language: Language,
    },
    /// Check code against required substrings (default: the component check)
    Check {
        file: PathBuf,
        #[arg(long = "require")]
        require: Vec<String>,
    },
    /// Review code quality
    Analyze {
        file: PathBuf,
        #[arg(short, long, default_value = "script")]
        language: Language,
    },
    /// Persistent mode: JSON requests on stdin, framed responses on stdout
    Serve,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    match path {
        Some(path) => SandboxConfig::from_file(path).with_context(|| format!("loading config {}", path.display())),
        None => Ok(SandboxConfig::default()),
    }
}

fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut code = String::new();
        std::io::stdin().read_to_string(&mut code).context("reading code from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_outcome(outcome: &ExecutionOutcome) {
    for record in &outcome.records {
        println!("{}", record);
    }
    if let Some(err) = &outcome.uncaught_error {
        match err.line_hint {
            Some(line) => eprintln!("uncaught: {} (line {})", err.message, line),
            None => eprintln!("uncaught: {}", err.message),
        }
    }
}

fn run_render(config: &SandboxConfig, file: &Path, language: Language, theme: Theme, frame: bool) -> Result<()> {
    let unit = SourceUnit::new(read_source(file)?, language).with_theme(theme);
    let result = DocumentSynthesizer::new(config).synthesize(&unit);

    match SandboxRenderer::new(config).render(&result) {
        RenderedView::Frame(hosted) if frame => println!("{}", hosted.to_html()),
        RenderedView::Frame(hosted) => print!("{}", hosted.document),
        RenderedView::Error(panel) => return Err(anyhow!("{}: {}", panel.summary, panel.detail)),
    }
    Ok(())
}

async fn run_headless(config: &SandboxConfig, file: &Path, language: Language) -> Result<ExitCode> {
    let unit = SourceUnit::new(read_source(file)?, language);
    let document = DocumentSynthesizer::new(config).synthesize(&unit)?;
    let outcome = HeadlessFrame::new(config.clone()).execute(&document).await?;
    print_outcome(&outcome);

    Ok(match outcome.termination {
        Termination::Completed if outcome.uncaught_error.is_none() => ExitCode::SUCCESS,
        Termination::Completed => ExitCode::from(1),
        Termination::NotExecutable => {
            return Err(anyhow!("{} code needs a browser frame; use `render` instead", language));
        }
        other => {
            warn!(termination = ?other, "execution did not complete");
            ExitCode::from(2)
        }
    })
}

fn run_check(file: &Path, require: &[String]) -> Result<ExitCode> {
    let code = read_source(file)?;
    let exercise = if require.is_empty() {
        ExerciseSpec::component_default()
    } else {
        ExerciseSpec::requiring(require)
    };
    let report = exercise.check(&code);

    println!("{} {}", if report.passed { "PASS" } else { "FAIL" }, report.message);
    for line in &report.feedback {
        println!("  - {}", line);
    }
    Ok(if report.passed { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn run_analyze(file: &Path, language: Language) -> Result<()> {
    let report = analyze(&read_source(file)?, language);
    println!("Score: {}/100 ({})", report.score, report.verdict.message());
    for suggestion in &report.suggestions {
        println!("[{:?}] {}", suggestion.kind, suggestion.message);
        for line in suggestion.example.lines() {
            println!("    {}", line);
        }
    }
    println!("Best practices:");
    for practice in &report.best_practices {
        println!("  - {}", practice);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ServeRequest {
    code: String,
    language: Language,
    #[serde(default)]
    theme: Theme,
    /// Also execute headlessly (script language only)
    #[serde(default)]
    execute: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServeResponse {
    frame_id: String,
    document: String,
    embed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution: Option<ExecutionOutcome>,
}

#[derive(Debug, Serialize)]
struct ServeError<'a> {
    summary: &'a str,
    detail: &'a str,
}

/// Run in server mode (persistent process, reads requests from stdin)
async fn run_server(config: &SandboxConfig) -> Result<()> {
    let synthesizer = DocumentSynthesizer::new(config);
    let renderer = SandboxRenderer::new(config);
    let headless = HeadlessFrame::new(config.clone());

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut reader = stdin.lock();

    info!("server ready, reading requests from stdin");

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            // EOF - stdin closed
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: ServeRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                let detail = e.to_string();
                write_error(&mut stdout, "Invalid request", &detail)?;
                continue;
            }
        };
        debug!(language = %request.language, execute = request.execute, "serving request");

        let unit = SourceUnit::new(request.code, request.language).with_theme(request.theme);
        let result = synthesizer.synthesize(&unit);
        let execution = match (&result, request.execute) {
            (Ok(document), true) => match headless.execute(document).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    write_error(&mut stdout, "Headless execution failed", &e.to_string())?;
                    continue;
                }
            },
            _ => None,
        };

        match renderer.render(&result) {
            RenderedView::Frame(frame) => {
                let response = ServeResponse {
                    frame_id: frame.frame_id.to_string(),
                    embed: frame.to_html(),
                    document: frame.document,
                    execution,
                };
                write_response(&mut stdout, true, &serde_json::to_string(&response)?)?;
            }
            RenderedView::Error(panel) => write_error(&mut stdout, &panel.summary, &panel.detail)?,
        }
    }

    info!("server shutting down");
    Ok(())
}

fn write_error(stdout: &mut std::io::Stdout, summary: &str, detail: &str) -> Result<()> {
    let body = serde_json::to_string(&ServeError { summary, detail })?;
    write_response(stdout, false, &body)
}

/// Write response in length-prefixed protocol
fn write_response(stdout: &mut std::io::Stdout, ok: bool, body: &str) -> Result<()> {
    let status = if ok { "Ok" } else { "Error" };

    writeln!(stdout, "Status:{}", status)?;
    writeln!(stdout, "Length:{}", body.len())?;
    writeln!(stdout)?; // Empty line separator
    write!(stdout, "{}", body)?;
    stdout.flush()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Render { file, language, theme, frame } => {
            run_render(&config, &file, language, theme, frame)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { file, language } => run_headless(&config, &file, language).await,
        Command::Check { file, require } => run_check(&file, &require),
        Command::Analyze { file, language } => {
            run_analyze(&file, language)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            run_server(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
