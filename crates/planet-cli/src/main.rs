//! Terminal REPL over the planet client core.
//!
//! Free text is a query against the active planet; slash commands
//! manage planets, uploads, and the backend session.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use planet_api::{ApiClient, ApiClientConfig, IngestOptions};
use planet_core::{
    ChatController, ExitDecision, ExitResolution, JsonStateStore, Planet, SessionResolver,
    StateStore, SwitchController, UiEffect, UiTask, UploadCoordinator,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "planet", about = "Ask questions grounded in your own documents")]
struct Args {
    /// Backend base URL.
    #[arg(long, env = "PLANET_API_BASE_URL", default_value = "http://localhost:8000")]
    base_url: String,

    /// Where planet history lives; defaults to ~/.planet/planets.json.
    #[arg(long)]
    data_file: Option<PathBuf>,
}

fn default_data_file() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".planet")
        .join("planets.json")
}

struct App {
    api: ApiClient,
    store: Arc<JsonStateStore>,
    resolver: SessionResolver<JsonStateStore>,
    switcher: SwitchController<JsonStateStore>,
    chat: ChatController<JsonStateStore>,
    uploads: UploadCoordinator,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let data_file = args.data_file.unwrap_or_else(default_data_file);

    let api = ApiClient::new(ApiClientConfig::new(&args.base_url))
        .context("invalid backend base url")?;
    let store = Arc::new(JsonStateStore::open(&data_file).context("failed to open planet store")?);
    let resolver = SessionResolver::new(Arc::clone(&store));
    let switcher = SwitchController::new(Arc::clone(&store));

    let planet = match store.active_planet_id()? {
        Some(id) => store.find(&id)?.unwrap_or_default(),
        None => Planet::new(),
    };
    switcher.activate(Some(&planet.id))?;
    let chat = ChatController::new(Arc::clone(&store), planet);

    let mut app = App {
        api,
        store,
        resolver,
        switcher,
        chat,
        uploads: UploadCoordinator::new(),
    };

    println!("planet - type a question, or /help for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(&app).await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match app.dispatch(&line, &mut lines).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(error) => println!("error: {error:#}"),
        }
    }
    Ok(())
}

async fn prompt(app: &App) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("[{}] > ", app.chat.planet().name).as_bytes())
        .await?;
    stdout.flush().await?;
    Ok(())
}

type Lines = tokio::io::Lines<BufReader<tokio::io::Stdin>>;

impl App {
    /// Returns true when the REPL should exit.
    async fn dispatch(&mut self, line: &str, lines: &mut Lines) -> Result<bool> {
        match line.split_whitespace().next() {
            Some("/quit") | Some("/exit") => {
                if self.confirm_leave(lines).await? {
                    return Ok(true);
                }
            }
            Some("/help") => print_help(),
            Some("/planets") => self.list_planets()?,
            Some("/new") => {
                if self.confirm_leave(lines).await? {
                    self.open_planet(Planet::new())?;
                }
            }
            Some("/open") => self.open_by_name(line.trim_start_matches("/open").trim(), lines).await?,
            Some("/rename") => self.rename(line.trim_start_matches("/rename").trim())?,
            Some("/sources") => self.list_sources(),
            Some("/upload") => {
                let paths: Vec<&str> = line.split_whitespace().skip(1).collect();
                self.upload(&paths).await?;
            }
            Some("/status") => self.status().await,
            Some("/clear") => self.clear_session().await?,
            _ => self.ask(line).await?,
        }
        Ok(false)
    }

    async fn ask(&mut self, question: &str) -> Result<()> {
        let session_id = self.resolver.active_session_id()?;
        let (ticket, request) = self.chat.begin_query(question, &session_id)?;

        match self.api.query(&request).await {
            Ok(response) => {
                let tasks = self.chat.complete_query(&ticket, &response)?;
                if let Some(answer) = self.chat.messages().last() {
                    println!("{}", answer.content);
                    if !answer.citations.is_empty() {
                        println!("  sources: {}", answer.citations.join(", "));
                    }
                }
                self.run_tasks(tasks).await?;
                if let Some(evidence) = self.chat.evidence() {
                    println!(
                        "  confidence {}% across {} source(s)",
                        evidence.confidence_percent(),
                        evidence.source_count
                    );
                    for card in &evidence.cards {
                        let excerpt = card.excerpt().unwrap_or_default();
                        println!(
                            "    {} [{}] {}% {}",
                            card.filename, card.modality, card.confidence_percent, excerpt
                        );
                    }
                    if evidence.conflicts_detected {
                        println!("  conflicting evidence detected:");
                        for conflict in &evidence.conflicts {
                            println!("    - {conflict}");
                        }
                    }
                }
            }
            Err(error) => {
                self.chat.fail_query(&ticket, &error)?;
                if let Some(message) = self.chat.messages().last() {
                    println!("{}", message.content);
                }
            }
        }
        Ok(())
    }

    async fn upload(&mut self, paths: &[&str]) -> Result<()> {
        let file_names: Vec<String> = paths
            .iter()
            .map(|path| {
                PathBuf::from(path)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| (*path).to_string())
            })
            .collect();
        let handles = self.uploads.submit(&file_names)?;

        let mut files = Vec::with_capacity(paths.len());
        for (path, handle) in paths.iter().zip(&handles) {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            files.push((handle.file_name.clone(), bytes));
        }

        let session_id = self.resolver.active_session_id()?;
        let planet_id = self.chat.planet().id.clone();
        let options = IngestOptions::default();
        let mut expiries = Vec::new();

        if files.len() == 1 {
            let (file_name, bytes) = files.remove(0);
            let handle = &handles[0];
            self.uploads.mark_processing(&handle.file_id)?;
            match self.api.ingest_file(&file_name, bytes, &session_id, &options).await {
                Ok(result) => {
                    self.chat.add_source(&file_name, result.chunk_count())?;
                    println!("indexed {} ({} chunks)", file_name, result.chunk_count());
                    expiries.push(self.uploads.complete(&handle.file_id, &planet_id)?);
                }
                Err(error) => {
                    println!("upload failed: {error}");
                    expiries.push(self.uploads.fail(&handle.file_id, &planet_id, error.to_string())?);
                }
            }
        } else {
            for handle in &handles {
                self.uploads.mark_processing(&handle.file_id)?;
            }
            match self.api.ingest_batch(files, &session_id, &options).await {
                Ok(batch) => {
                    // Results are order-aligned with submission order.
                    for (result, handle) in batch.results.iter().zip(&handles) {
                        if result.succeeded() {
                            self.chat.add_source(&result.file, result.chunk_count())?;
                            println!("indexed {} ({} chunks)", result.file, result.chunk_count());
                            expiries.push(self.uploads.complete(&handle.file_id, &planet_id)?);
                        } else {
                            let message =
                                result.error.clone().unwrap_or_else(|| "ingestion failed".to_string());
                            println!("{}: {message}", result.file);
                            expiries.push(self.uploads.fail(&handle.file_id, &planet_id, message)?);
                        }
                    }
                }
                Err(error) => {
                    println!("batch upload failed: {error}");
                    for handle in &handles {
                        expiries.push(self.uploads.fail(&handle.file_id, &planet_id, error.to_string())?);
                    }
                }
            }
        }
        self.run_tasks(expiries).await?;
        Ok(())
    }

    /// Sleep out each deferred effect in order and apply it.
    async fn run_tasks(&mut self, mut tasks: Vec<UiTask>) -> Result<()> {
        tasks.sort_by_key(|task| task.delay);
        let mut elapsed = std::time::Duration::ZERO;
        for task in tasks {
            if task.delay > elapsed {
                tokio::time::sleep(task.delay - elapsed).await;
                elapsed = task.delay;
            }
            match task.effect {
                UiEffect::ExpireUpload { .. } => self.uploads.task_fired(&task),
                _ => self.chat.task_fired(&task)?,
            }
        }
        Ok(())
    }

    fn list_planets(&self) -> Result<()> {
        let planets = self.store.list()?;
        if planets.is_empty() {
            println!("no saved planets yet - /rename the current one to keep it");
            return Ok(());
        }
        for planet in planets {
            println!(
                "{}  ({} message(s), {} source(s))",
                planet.name,
                planet.messages.len(),
                planet.source_count
            );
        }
        Ok(())
    }

    fn list_sources(&self) {
        let planet = self.chat.planet();
        if planet.sources.is_empty() {
            println!("no sources uploaded yet");
            return;
        }
        for source in &planet.sources {
            println!("{} ({} chunks)", source.name, source.chunks);
        }
    }

    fn rename(&mut self, name: &str) -> Result<()> {
        self.switcher.rename(self.chat.planet_mut(), name)?;
        println!("saved as '{}'", self.chat.planet().name);
        Ok(())
    }

    async fn open_by_name(&mut self, name: &str, lines: &mut Lines) -> Result<()> {
        let Some(target) = self
            .store
            .list()?
            .into_iter()
            .find(|planet| planet.name == name)
        else {
            println!("no planet named '{name}'");
            return Ok(());
        };
        if self.confirm_leave(lines).await? {
            self.open_planet(target)?;
        }
        Ok(())
    }

    fn open_planet(&mut self, planet: Planet) -> Result<()> {
        self.switcher.activate(Some(&planet.id))?;
        self.chat.switch_to(planet);
        self.uploads = UploadCoordinator::new();
        Ok(())
    }

    /// Unsaved-work gate before navigation; true means go ahead.
    async fn confirm_leave(&mut self, lines: &mut Lines) -> Result<bool> {
        match self.switcher.request_exit(self.chat.planet())? {
            ExitDecision::Proceed => Ok(true),
            ExitDecision::PromptUnsaved => {
                println!("this planet is unsaved - name it to keep it, or press enter to discard:");
                let entered = lines.next_line().await?.unwrap_or_default();
                let entered = entered.trim();
                if entered.is_empty() {
                    self.switcher.resolve_exit(
                        self.chat.planet_mut(),
                        ExitResolution::Discard,
                        None,
                    )?;
                    debug!("unsaved planet discarded");
                } else {
                    self.switcher.resolve_exit(
                        self.chat.planet_mut(),
                        ExitResolution::SaveThenExit,
                        Some(entered),
                    )?;
                    println!("saved as '{entered}'");
                }
                Ok(true)
            }
        }
    }

    async fn status(&self) {
        match self.api.health().await {
            Ok(_) => println!("backend: ok"),
            Err(error) => {
                println!("backend: unreachable ({error})");
                return;
            }
        }
        if let Ok(session_id) = self.resolver.active_session_id() {
            match self.api.session_info(&session_id).await {
                Ok(info) => println!(
                    "session {}: {} document(s), {} turn(s)",
                    info.session_id, info.document_count, info.chat_history.turn_count
                ),
                Err(error) => println!("session info unavailable: {error}"),
            }
        }
        if let Ok(stats) = self.api.vector_stats().await {
            println!("vector store: {stats}");
        }
    }

    async fn clear_session(&mut self) -> Result<()> {
        let session_id = self.resolver.active_session_id()?;
        let cleared = self.api.clear_session(&session_id, true, true).await?;
        println!("{}", cleared.message);
        // The server-side state is gone; start the planet's transcript
        // and source list over too.
        let planet = self.chat.planet_mut();
        planet.messages.clear();
        planet.sources.clear();
        planet.source_count = 0;
        Ok(())
    }
}

fn print_help() {
    println!(
        "\
commands:
  /planets            list saved planets
  /open <name>        switch to a saved planet
  /new                start a blank planet
  /rename <name>      name (and save) the current planet
  /upload <paths...>  ingest documents into this planet
  /sources            list this planet's sources
  /status             backend and session health
  /clear              wipe this session's server-side state
  /quit               leave
anything else is asked as a question."
    );
}
