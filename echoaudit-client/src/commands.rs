//! Subcommand implementations

use crate::{Command, ConfigCommand, PromptsCommand, Scope};
use anyhow::{anyhow, bail, Context, Result};
use echoaudit_client::pipeline::{PipelineSnapshot, PipelineStatus};
use echoaudit_client::{AgentAnalysis, PipelineError, Session, Toggle};
use echoaudit_common::api::Stage;
use echoaudit_common::config::{default_config_path, write_toml_config, TomlConfig};
use echoaudit_common::dates::period_label;
use echoaudit_common::events::{EchoEvent, EventBus};
use echoaudit_common::AgentKey;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;

pub async fn dispatch(session: &Session, command: Command) -> Result<()> {
    match command {
        Command::Index => index(session).await,
        Command::Calls { agent, scope } => calls(session, &agent, &scope).await,
        Command::Status => status(session).await,
        Command::Run { stage } => run(session, stage).await,
        Command::Analyze { agent, scope, yes } => analyze(session, &agent, &scope, yes).await,
        Command::Report {
            agent,
            scope,
            output,
            save,
        } => report(session, &agent, &scope, output, save).await,
        Command::Transcript {
            agent,
            filename,
            scope,
        } => transcript(session, &agent, &filename, &scope).await,
        Command::Prompts { action } => prompts(session, action).await,
        Command::Play {
            agent,
            filename,
            scope,
        } => play(session, &agent, &filename, &scope).await,
        Command::Watch => watch(session).await,
        Command::Config {
            action: ConfigCommand::Init { path },
        } => config_init(path.as_deref()),
    }
}

async fn focus(session: &Session, agent: &str, scope: &Scope) -> Result<AgentKey> {
    session
        .catalog()
        .focus_agent(scope.period.as_deref(), scope.organization.as_deref(), agent)
        .await
        .with_context(|| format!("Cannot select agent {agent}"))
}

fn agent_display_name(session: &Session, key: &AgentKey) -> String {
    let view = session.catalog().view();
    view.index
        .agent(&key.period, &key.organization, &key.agent)
        .map(|a| a.display_name.clone())
        .unwrap_or_else(|| session.names().agent_name(&key.agent, None))
}

async fn index(session: &Session) -> Result<()> {
    session
        .catalog()
        .refresh_index()
        .await
        .context("Failed to load the listing")?;
    let view = session.catalog().view();

    if view.index.is_empty() {
        println!("No recordings yet.");
        return Ok(());
    }

    for period in view.index.periods() {
        println!("{}", period_label(period));
        for organization in view.index.organizations(period) {
            println!("  {}", session.names().organization_name(organization));
            for agent in view.index.agents(period, organization) {
                println!(
                    "    {:<32} {:>4} calls  {}",
                    agent.display_name,
                    agent.call_count,
                    if agent.has_weekly_report { "report" } else { "" }
                );
            }
        }
    }
    Ok(())
}

async fn calls(session: &Session, agent: &str, scope: &Scope) -> Result<()> {
    let key = focus(session, agent, scope).await?;
    let view = session.catalog().view();

    println!("{} ({})", agent_display_name(session, &key), period_label(&key.period));
    if view.days.is_empty() {
        println!("  No calls.");
    }
    for day in view.days.iter() {
        println!("{}", day.label);
        for call in &day.calls {
            println!(
                "  {:<8} {:<48} {}{}",
                call.display_time,
                call.filename,
                if call.has_transcript { "T" } else { "-" },
                if call.has_report { "R" } else { "-" }
            );
        }
    }
    Ok(())
}

async fn status(session: &Session) -> Result<()> {
    let document = session
        .service()
        .status()
        .await
        .context("Failed to fetch status")?;
    print_status(&PipelineStatus {
        document,
        ..Default::default()
    });
    Ok(())
}

fn print_status(status: &PipelineStatus) {
    for job in status.job_states() {
        let state = if job.running { "running" } else { "idle" };
        println!("{:<11} {:<8} {}", job.stage.as_str(), state, job.progress_text);
        if let Some(error) = &job.last_error {
            println!("{:<11} error    {}", "", error);
        }
    }
    if let Some(error) = status.last_error() {
        println!("last error: {error}");
    }
}

async fn run(session: &Session, stage: Option<Stage>) -> Result<()> {
    let pipeline = session.pipeline();
    let outcome = with_event_log(session.events(), async {
        match stage {
            Some(stage) => pipeline.run_stage(stage).await,
            None => pipeline.run_full_cycle().await,
        }
    })
    .await;

    match outcome {
        Ok(report) => {
            let elapsed = report.finished_at - report.started_at;
            println!(
                "{} finished in {}s",
                report.kind,
                elapsed.num_seconds().max(0)
            );
            Ok(())
        }
        Err(e) => not_started_or_fail(e),
    }
}

async fn analyze(session: &Session, agent: &str, scope: &Scope, yes: bool) -> Result<()> {
    let key = focus(session, agent, scope).await?;
    let name = agent_display_name(session, &key);
    let pipeline = session.pipeline();

    let outcome = with_event_log(session.events(), pipeline.trigger_agent_analysis(&key, false)).await;
    match outcome {
        Ok(AgentAnalysis::AlreadyInFlight) => {
            println!("Analysis of {name} is already running.");
            Ok(())
        }
        Ok(AgentAnalysis::Completed) => Ok(()),
        Ok(AgentAnalysis::Conflict(pending)) => {
            let question = format!("Report for {name} already exists. Regenerate it?");
            if yes || confirm(&question).await? {
                match with_event_log(session.events(), pending.confirm()).await {
                    Ok(()) => Ok(()),
                    Err(e) => not_started_or_fail(e),
                }
            } else {
                pending.abandon();
                println!("Kept the existing report.");
                Ok(())
            }
        }
        Err(e) => not_started_or_fail(e),
    }
}

async fn report(
    session: &Session,
    agent: &str,
    scope: &Scope,
    output: Option<PathBuf>,
    save: bool,
) -> Result<()> {
    let key = focus(session, agent, scope).await?;
    let text = session
        .service()
        .report(&key)
        .await
        .context("Failed to fetch report")?
        .ok_or_else(|| anyhow!("No report for {key} yet"))?;

    let target = match (output, save) {
        (Some(path), _) => Some(path),
        (None, true) => Some(PathBuf::from(report_file_name(&key))),
        (None, false) => None,
    };
    match target {
        Some(path) => {
            tokio::fs::write(&path, text)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

/// `Report_{agent}_{period}.md`
fn report_file_name(key: &AgentKey) -> String {
    format!("Report_{}_{}.md", key.agent, key.period)
}

async fn transcript(session: &Session, agent: &str, filename: &str, scope: &Scope) -> Result<()> {
    let key = focus(session, agent, scope).await?;
    let text = session
        .service()
        .transcript(&key.call(filename))
        .await
        .context("Failed to fetch transcript")?
        .ok_or_else(|| anyhow!("{filename} has no transcript yet"))?;
    println!("{text}");
    Ok(())
}

async fn prompts(session: &Session, action: PromptsCommand) -> Result<()> {
    let service = session.service();
    let mut prompts = service.prompts().await.context("Failed to fetch prompts")?;

    match action {
        PromptsCommand::Show => {
            println!("System instruction:\n{}\n", prompts.system);
            for (code, company) in &prompts.companies {
                let title = if company.name.is_empty() {
                    code.clone()
                } else {
                    format!("{} ({code})", company.name)
                };
                println!("{title}:\n{}\n", company.prompt);
            }
            return Ok(());
        }
        PromptsCommand::SetSystem { file } => {
            prompts.system = read_text(&file).await?;
        }
        PromptsCommand::SetOrg { code, file, name } => {
            prompts.set_company_prompt(&code, read_text(&file).await?);
            if let Some(name) = name {
                if let Some(company) = prompts.companies.get_mut(&code) {
                    company.name = name;
                }
            }
        }
    }

    service
        .save_prompts(&prompts)
        .await
        .context("Failed to save prompts")?;
    println!("Prompts saved.");
    Ok(())
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn play(session: &Session, agent: &str, filename: &str, scope: &Scope) -> Result<()> {
    let key = focus(session, agent, scope).await?;
    let view = session.catalog().view();
    if !view.calls.iter().any(|c| c.filename == filename) {
        bail!("{key} has no call named {filename}");
    }

    let playback = session.playback();
    let mut active = playback.subscribe();
    let call = key.call(filename);

    match playback.toggle(call.clone()).await? {
        Toggle::Started => println!("Playing {filename} (Ctrl+C to stop)"),
        other => bail!("Playback did not start: {other:?}"),
    }

    while active.borrow_and_update().as_ref() == Some(&call) {
        if active.changed().await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn watch(session: &Session) -> Result<()> {
    let mut events = session.events().subscribe();
    let mut snapshots = session.pipeline().subscribe();
    let mut last_line = String::new();

    println!("Watching pipeline status and events (Ctrl+C to stop)");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => println!("... {missed} events skipped"),
                Err(RecvError::Closed) => return Ok(()),
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let line = status_line(&snapshots.borrow_and_update());
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
            }
        }
    }
}

fn status_line(snapshot: &PipelineSnapshot) -> String {
    let stages: Vec<String> = snapshot
        .status
        .job_states()
        .into_iter()
        .map(|job| {
            if job.running {
                format!("{}: {}", job.stage, job.progress_text)
            } else {
                format!("{}: idle", job.stage)
            }
        })
        .collect();
    let mut line = format!("[{}] {}", snapshot.phase, stages.join(" | "));
    if snapshot.consecutive_poll_failures > 0 {
        line.push_str(&format!(
            " (status unavailable x{})",
            snapshot.consecutive_poll_failures
        ));
    }
    line
}

pub fn config_init(path: Option<&Path>) -> Result<()> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(default_config_path)
        .ok_or_else(|| anyhow!("No config directory on this platform; pass --path"))?;
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    write_toml_config(&TomlConfig::default(), &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Drive `operation` while printing bus events as a timestamped log
async fn with_event_log<F: Future>(events: &EventBus, operation: F) -> F::Output {
    let mut rx = events.subscribe();
    tokio::pin!(operation);

    loop {
        tokio::select! {
            output = &mut operation => {
                while let Ok(event) = rx.try_recv() {
                    print_event(&event);
                }
                return output;
            }
            event = rx.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return operation.await,
            },
        }
    }
}

fn print_event(event: &EchoEvent) {
    if matches!(event, EchoEvent::IndexRefreshed { .. }) {
        return;
    }
    let local = event.timestamp().with_timezone(&chrono::Local);
    println!("[{}] {event}", local.format("%H:%M:%S"));
}

/// Rejections and busy refusals are reported, not failed
fn not_started_or_fail(error: PipelineError) -> Result<()> {
    if error.is_fatal() {
        Err(error.into())
    } else {
        println!("Not started: {error}");
        Ok(())
    }
}

/// Ask a y/N question on the terminal
///
/// Stdin is read on a plain thread, not the blocking pool, so a pending
/// prompt never holds up runtime shutdown after Ctrl+C.
async fn confirm(question: &str) -> Result<bool> {
    let prompt = format!("{question} [y/N] ");
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("confirm-prompt".to_string())
        .spawn(move || {
            let _ = tx.send(read_answer(&prompt));
        })
        .context("Failed to start confirmation prompt")?;

    let answer = rx.await.context("Confirmation prompt ended without an answer")??;
    Ok(is_yes(&answer))
}

fn read_answer(prompt: &str) -> std::io::Result<String> {
    use std::io::Write;
    let mut stdout = std::io::stdout();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
