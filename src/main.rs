//! twin-qa - Ask one question of many digital twin personas
//!
//! Entry point for the `twin-qa` binary. Every command runs on a
//! single-threaded runtime; a session surface owns all live streams.

use std::collections::HashMap;
use std::path::Path;

use clap::Parser;
use tracing::{debug, info, warn};

use twin_qa::aggregator::BoardEvent;
use twin_qa::cli::{Cli, Commands, ConfigSubcommand};
use twin_qa::config::{self, LoggingSettings, QaConfig};
use twin_qa::error::{Error, Result};
use twin_qa::logging;
use twin_qa::protocol::{
    ImageAttachment, Pagination, Session, SessionFilters, SessionListResponse, SessionResponse,
    SessionStatus,
};
use twin_qa::surface::QaSurface;
use twin_qa::version;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            let quiet = LoggingSettings {
                level: "warn".to_string(),
                ..Default::default()
            };
            let _log_guards = logging::init_logging(&quiet, cli.verbose, cli.quiet)?;
            return handle_config_command(subcommand.clone(), cli.config.as_deref());
        }
        _ => {}
    }

    let mut config = QaConfig::load(cli.config.as_deref())?;
    if cli.demo {
        config.demo.enabled = true;
    }

    // Guards must outlive the runtime so the file writer flushes
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    debug!(
        version = %build.full_version(),
        demo = config.demo.enabled,
        service = %config.service_url(),
        "Starting twin-qa"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async move {
        let mut surface = QaSurface::from_config(&config)?;
        let result = run_command(&mut surface, cli.command).await;
        surface.shutdown();
        result
    })
}

async fn run_command(surface: &mut QaSurface, command: Commands) -> Result<()> {
    match command {
        Commands::Ask {
            question,
            prospects,
            image,
            no_wait,
            json,
        } => {
            let image = image.as_deref().map(ImageAttachment::from_file).transpose()?;
            let session = surface.submit(&question, &prospects, image.as_ref()).await?;

            if no_wait {
                println!("{}", session.session_id);
                return Ok(());
            }
            if !json {
                println!(
                    "Session {} created, asking {} prospect(s)",
                    session.session_id, session.total_expected
                );
            }

            let ids = vec![session.session_id.clone()];
            follow(surface, &ids, !json).await?;

            if let Some(done) = surface.session(&session.session_id) {
                if json {
                    print_json(done)?;
                } else {
                    print_outcome(done);
                }
            }
            first_failure(surface, &ids)?;
        }

        Commands::List {
            status,
            prospect,
            from,
            to,
            search,
            page,
            page_size,
            sort_by,
            order,
            json,
        } => {
            let filters = SessionFilters {
                status_filter: status,
                prospect_id: prospect,
                date_from: from,
                date_to: to,
                search_query: search,
            };
            let pagination = Pagination {
                page,
                page_size,
                sort_by,
                sort_order: order,
            };
            let listing = surface
                .aggregator()
                .service()
                .list(&filters, &pagination)
                .await?;
            if json {
                print_json(&listing)?;
            } else {
                print_listing(&listing);
            }
        }

        Commands::Show { session_id, json } => {
            let session = surface.open_session(&session_id).await?;
            if json {
                print_json(&session)?;
            } else {
                print_session(&session);
            }
        }

        Commands::Cancel { session_id } => {
            surface.cancel(&session_id).await?;
            println!("Session {} cancelled", session_id);
        }

        Commands::Delete { session_id } => {
            surface.delete(&session_id).await?;
            println!("Session {} deleted", session_id);
        }

        Commands::Watch { session_ids } => {
            let ids = if session_ids.is_empty() {
                let filters = SessionFilters {
                    status_filter: vec![SessionStatus::Pending, SessionStatus::InProgress],
                    ..Default::default()
                };
                let listing = surface.load_history(&filters, &Pagination::default()).await?;
                listing
                    .sessions
                    .into_iter()
                    .map(|s| s.session_id)
                    .collect()
            } else {
                for id in &session_ids {
                    surface.open_session(id).await?;
                }
                session_ids
            };

            if ids.is_empty() {
                println!("No active sessions");
                return Ok(());
            }
            println!("Watching {} session(s)", ids.len());
            follow(surface, &ids, true).await?;
            for id in &ids {
                if let Some(session) = surface.session(id) {
                    print_outcome(session);
                }
            }
            first_failure(surface, &ids)?;
        }

        Commands::Personas { json } => {
            let personas = surface.personas().await?;
            if json {
                print_json(&personas)?;
            } else {
                println!("{:<16} {:<8} NAME", "LEAD ID", "CLASS");
                for persona in &personas {
                    println!(
                        "{:<16} {:<8} {}",
                        persona.lead_id,
                        classification(persona.lead_classification),
                        persona.full_name
                    );
                }
                println!("{} persona(s)", personas.len());
            }
        }

        Commands::Version | Commands::Config { .. } => {
            // Handled before the runtime starts
            unreachable!();
        }
    }

    Ok(())
}

/// Pump until every session in `ids` is terminal, printing answers as they land
async fn follow(surface: &mut QaSurface, ids: &[String], verbose: bool) -> Result<()> {
    let mut printed: HashMap<String, usize> = HashMap::new();
    let mut events = surface.events();

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    loop {
        if verbose {
            for id in ids {
                if let Some(session) = surface.session(id) {
                    print_new_responses(session, printed.entry(id.clone()).or_default());
                }
            }
        }

        let finished = ids
            .iter()
            .all(|id| surface.session(id).map_or(true, |s| s.status.is_terminal()));
        if finished {
            break;
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Interrupted; sessions keep running on the server");
                break;
            }
            activity = surface.pump() => {
                if activity.is_none() {
                    warn!("No live streams left");
                    break;
                }
            }
        }

        while let Ok(event) = events.try_recv() {
            match event {
                BoardEvent::ConnectionDegraded { session_id, attempts } => {
                    eprintln!("Connection to {} keeps dropping ({} attempts), retrying", session_id, attempts);
                }
                BoardEvent::ConnectionLost { session_id, attempts } => {
                    eprintln!("Gave up on {} after {} attempts", session_id, attempts);
                }
                BoardEvent::Removed { session_id } => {
                    eprintln!("Session {} was deleted", session_id);
                }
                _ => {}
            }
        }
    }

    Ok(())
}

/// `SessionFailed` for the first followed session that ended failed
fn first_failure(surface: &QaSurface, ids: &[String]) -> Result<()> {
    for id in ids {
        let Some(tracked) = surface.aggregator().tracked(id) else {
            continue;
        };
        if tracked.status() != SessionStatus::Failed {
            continue;
        }
        let reason = match (&tracked.last_error, tracked.cancel_requested) {
            (Some(message), _) => message.clone(),
            (None, true) => "cancelled".to_string(),
            (None, false) => "failed without a reason".to_string(),
        };
        return Err(Error::session_failed(id.clone(), reason));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn classification(class: twin_qa::protocol::LeadClassification) -> &'static str {
    use twin_qa::protocol::LeadClassification::*;
    match class {
        Hot => "hot",
        Warm => "warm",
        Cold => "cold",
        Unknown => "-",
    }
}

fn response_line(response: &SessionResponse) -> String {
    let name = if response.persona.full_name.is_empty() {
        response.persona.lead_id.as_str()
    } else {
        response.persona.full_name.as_str()
    };
    let confidence = response
        .confidence_score
        .map(|c| format!(" ({:.0}%)", c * 100.0))
        .unwrap_or_default();
    format!(
        "[{}] {}: {}{}",
        classification(response.persona.lead_classification),
        name,
        response.answer,
        confidence
    )
}

fn print_new_responses(session: &Session, printed: &mut usize) {
    for response in session.responses.iter().skip(*printed) {
        println!(
            "  {}/{} {}",
            session.total_responded, session.total_expected,
            response_line(response)
        );
    }
    *printed = session.responses.len();
}

fn print_outcome(session: &Session) {
    println!();
    println!(
        "Session {} {} ({}/{} answered)",
        session.session_id, session.status, session.total_responded, session.total_expected
    );
    if let Some(ref summary) = session.summary {
        println!("Summary: {}", summary.summary_text);
        for insight in &summary.key_insights {
            println!("  - {}", insight);
        }
        let sentiment = &summary.sentiment_distribution;
        println!(
            "Sentiment: {:.0}% positive, {:.0}% neutral, {:.0}% negative",
            sentiment.positive * 100.0,
            sentiment.neutral * 100.0,
            sentiment.negative.unwrap_or(0.0) * 100.0
        );
    }
}

fn print_session(session: &Session) {
    println!("Session:   {}", session.session_id);
    println!("Question:  {}", session.question);
    println!("Status:    {}", session.status);
    println!("Created:   {}", session.created_at.to_rfc3339());
    if let Some(completed) = session.completed_at {
        println!("Completed: {}", completed.to_rfc3339());
    }
    println!(
        "Progress:  {}/{} ({:.0}%)",
        session.total_responded,
        session.total_expected,
        session.progress_percent()
    );
    if let Some(ref image) = session.image_url {
        println!("Image:     {}", image);
    }
    if !session.responses.is_empty() {
        println!();
        for response in &session.responses {
            println!("  {}", response_line(response));
        }
    }
    if session.summary.is_some() {
        print_outcome(session);
    }
}

fn print_listing(listing: &SessionListResponse) {
    println!(
        "{:<36}  {:<11}  {:>9}  {:<20}  QUESTION",
        "SESSION", "STATUS", "PROGRESS", "CREATED"
    );
    for session in &listing.sessions {
        let mut question: String = session.question.chars().take(48).collect();
        if session.question.chars().count() > 48 {
            question.push_str("...");
        }
        println!(
            "{:<36}  {:<11}  {:>9}  {:<20}  {}",
            session.session_id,
            session.status.as_str(),
            format!("{}/{}", session.total_responded, session.total_expected),
            session.created_at.format("%Y-%m-%d %H:%M:%S"),
            question
        );
    }
    println!(
        "Page {}/{} ({} total, {} active, {} completed)",
        listing.page,
        listing.total_pages.max(1),
        listing.total_count,
        listing.active_sessions_count,
        listing.completed_sessions_count
    );
}

// ─────────────────────────────────────────────────────────────────
// Config Commands
// ─────────────────────────────────────────────────────────────────

fn handle_config_command(subcommand: ConfigSubcommand, config_path: Option<&str>) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show => {
            let cfg = QaConfig::load(config_path)?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate => {
            let cfg = QaConfig::load(config_path)?;
            cfg.validate()?;
            match config_path {
                Some(path) => println!("Configuration is valid: {}", Path::new(path).display()),
                None => println!("Configuration is valid."),
            }
        }
    }

    Ok(())
}
