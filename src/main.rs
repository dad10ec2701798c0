use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use ticket_scanner_lib::commands::{self, AppState, UpdateTicketPayload};
use ticket_scanner_lib::config::{self, OcrConfig};
use ticket_scanner_lib::{cancel_pair, Db, Summary, Ticket, TicketPatch};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "ticket-scanner",
    about = "Scan receipts through the OCR service and keep an editable ticket history"
)]
struct Cli {
    /// SQLite file holding the tickets (default: app data dir or TICKETS_DB_PATH).
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Print JSON instead of text.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Send an image to the OCR service and store the ticket.
    Upload(UploadArgs),
    /// List tickets, newest first.
    List {
        /// Ignore the active category filter.
        #[arg(long)]
        all: bool,
    },
    Show {
        id: String,
    },
    /// Correct fields of a ticket.
    Edit(EditArgs),
    Remove {
        id: String,
    },
    /// Delete every ticket and reset the filter.
    Clear,
    /// Set or reset the category filter.
    Filter(FilterArgs),
    /// Totals by merchant and by category.
    Summary,
    Status,
}

#[derive(Debug, Args)]
struct UploadArgs {
    path: PathBuf,
    /// Ask the service for per-token debug output.
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Args)]
struct EditArgs {
    id: String,
    #[arg(long)]
    merchant: Option<String>,
    #[arg(long)]
    amount: Option<f64>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long, conflicts_with = "uncategorize")]
    category: Option<String>,
    #[arg(long)]
    uncategorize: bool,
}

#[derive(Debug, Args)]
struct FilterArgs {
    category: Option<String>,
    /// Select the n-th group of `summary` (0-based).
    #[arg(long, conflicts_with = "category")]
    group: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(config::db_path);
    let db = Db::new(db_path.clone())
        .with_context(|| format!("failed to open ticket database {}", db_path.display()))?;
    let state = AppState::new(db, OcrConfig::from_env()).map_err(|e| anyhow!(e))?;

    match cli.command {
        CliCommand::Upload(args) => {
            let (handle, mut signal) = cancel_pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.cancel();
                }
            });
            let path = args.path.to_string_lossy().to_string();
            match commands::upload_ticket(&state, &path, args.debug, &mut signal)
                .await
                .map_err(|e| anyhow!(e))?
            {
                Some(ticket) => {
                    emit(cli.json, &ticket, print_ticket)?;
                    if !cli.json {
                        println!("Ticket processed. Review category and amount; OCR data may need manual correction.");
                    }
                }
                None => println!("Upload cancelled; nothing was stored."),
            }
        }
        CliCommand::List { all } => {
            let tickets = commands::get_tickets(&state, all).await;
            emit(cli.json, &tickets, |tickets| {
                if tickets.is_empty() {
                    println!("No tickets yet. Upload your first ticket to start tracking spending.");
                }
                for t in tickets {
                    print_ticket_line(t);
                }
            })?;
        }
        CliCommand::Show { id } => {
            let ticket = commands::get_ticket(&state, &id).await.map_err(|e| anyhow!(e))?;
            emit(cli.json, &ticket, print_ticket)?;
        }
        CliCommand::Edit(args) => {
            let patch = TicketPatch {
                merchant: args.merchant,
                amount: args.amount,
                date: args.date,
                category: if args.uncategorize {
                    Some(None)
                } else {
                    args.category.map(Some)
                },
                ..Default::default()
            };
            if patch.is_empty() {
                bail!("nothing to change; pass --merchant, --amount, --date, --category or --uncategorize");
            }
            let payload = UpdateTicketPayload { id: args.id, patch };
            let id = payload.id.clone();
            match commands::update_ticket(&state, payload).await {
                Some(ticket) => emit(cli.json, &ticket, print_ticket)?,
                None => bail!("Ticket not found: {}", id),
            }
        }
        CliCommand::Remove { id } => match commands::remove_ticket(&state, &id).await {
            Some(ticket) => println!("Removed {} ({})", ticket.id, ticket.data.merchant),
            None => println!("No ticket with id {}", id),
        },
        CliCommand::Clear => {
            commands::clear_tickets(&state).await;
            println!("All tickets removed.");
        }
        CliCommand::Filter(args) => {
            let filter = match args.group {
                Some(index) => commands::select_category_group(&state, index)
                    .await
                    .map_err(|e| anyhow!(e))?,
                None => {
                    commands::set_filter_category(&state, args.category.clone()).await;
                    commands::get_status(&state).await.filter_category
                }
            };
            match filter {
                Some(c) => println!("Showing category: {}", c),
                None => println!("Showing all tickets."),
            }
        }
        CliCommand::Summary => {
            let summary = commands::get_summary(&state).await;
            emit(cli.json, &summary, print_summary)?;
        }
        CliCommand::Status => {
            let status = commands::get_status(&state).await;
            emit(cli.json, &status, |s| {
                println!("OCR endpoint: {}", s.ocr_endpoint);
                println!("Database:     {}", db_path.display());
                println!("Tickets:      {} ({} visible)", s.tickets, s.visible_tickets);
                if let Some(c) = &s.filter_category {
                    println!("Filter:       {}", c);
                }
            })?;
        }
    }
    Ok(())
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn print_ticket_line(t: &Ticket) {
    println!(
        "{:<14} {:<26} {:>12.2}  {:<12} {}",
        t.id,
        t.data.date,
        t.data.amount,
        t.data.category.as_deref().unwrap_or("-"),
        t.data.merchant
    );
}

fn print_ticket(t: &Ticket) {
    println!("id:       {}", t.id);
    println!("merchant: {}", t.data.merchant);
    println!("date:     {}", t.data.date);
    println!("amount:   {:.2} ({})", t.data.amount, t.data.amount_raw);
    if let Some(c) = &t.data.category {
        println!("category: {}", c);
    }
    if !t.data.image_url.is_empty() {
        println!("image:    {}", t.data.image_url);
    }
    if let Some(debug) = &t.data.amount_debug {
        println!("amount debug:");
        for line in debug {
            println!("  {}", line);
        }
    }
    if let Some(tokens) = &t.data.tokens {
        println!("tokens:   {}", tokens.len());
    }
}

fn print_summary(s: &Summary) {
    println!("Total:   {:.2}", s.total_amount);
    println!("Average: {:.2}", s.average_amount);
    println!("Tickets: {}", s.count);
    if !s.by_category.is_empty() {
        println!("\nBy category:");
        for (i, c) in s.by_category.iter().enumerate() {
            println!(
                "  [{}] {:<20} {:>12.2}  {} {}",
                i,
                c.key.to_string(),
                c.total,
                c.count,
                if c.count == 1 { "ticket" } else { "tickets" }
            );
        }
    }
    if !s.by_merchant.is_empty() {
        println!("\nBy merchant:");
        for m in &s.by_merchant {
            println!(
                "  {:<24} {:>12.2}  {} {}",
                m.merchant,
                m.total,
                m.count,
                if m.count == 1 { "ticket" } else { "tickets" }
            );
        }
    }
}
