use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use ticketflow::db::parse_ts;
use ticketflow::{
    Actor, Config, Database, Error, NotificationView, ProgressFilter, ProgressRequestView, Result,
    Role, Ticket, TicketEdit, TicketFilter, TicketStatus,
};
use ticketflow::{NewTicketInput, TicketDetail};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ticketflow")]
#[command(author, version, about = "Ticket workflow engine: statuses, audit ledger, pauses, progress requests and notifications")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// User performing the command
    #[arg(long = "as", global = true, env = "TICKETFLOW_ACTOR")]
    actor: Option<String>,

    /// Role of that user (Viewer, Editor, Admin)
    #[arg(long, global = true, env = "TICKETFLOW_ROLE", default_value = "Editor")]
    role: Role,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .ticketflow/ with a database and a default config.toml
    Init,

    /// Open a new ticket
    Create {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        /// External code; generated when omitted
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        blocking: bool,
    },

    /// List tickets
    List {
        #[arg(short, long)]
        status: Option<TicketStatus>,
        /// Include soft-deleted tickets
        #[arg(long)]
        all: bool,
        /// Only OPEN, PAUSED, CONFIRMED and REOPENED
        #[arg(long, conflicts_with_all = ["status", "all"])]
        ongoing: bool,
    },

    /// Show a ticket with its ledger, comments, pauses and progress requests
    Show { id: i32 },

    /// Move a ticket to another status
    Status {
        id: i32,
        to: TicketStatus,
        #[arg(short, long)]
        notes: Option<String>,
        /// Confirmation label stored with the ticket
        #[arg(long)]
        confirmation: Option<String>,
    },

    /// Comment on a ticket
    Comment { id: i32, body: String },

    /// Edit ticket fields
    Edit {
        id: i32,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        blocking: Option<bool>,
        #[arg(long)]
        active: Option<bool>,
    },

    /// Soft-delete a ticket (Admin)
    Delete { id: i32 },

    /// Undo a soft delete (Admin)
    Restore { id: i32 },

    /// Pause a ticket
    Pause { id: i32, reason: String },

    /// Resume a pause by pause id
    Resume {
        pause_id: i32,
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Progress requests
    #[command(subcommand)]
    Progress(ProgressCommand),

    /// Notifications addressed to you
    #[command(subcommand)]
    Notifications(NotificationCommand),

    /// Ticket counts per status
    Stats {
        /// Include soft-deleted tickets
        #[arg(long)]
        all: bool,
    },

    /// Start the JSON HTTP API
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Generate shell completions
    Completion { shell: Shell },
}

#[derive(Subcommand, Debug)]
enum ProgressCommand {
    /// Ask someone for a progress report on a ticket
    Request {
        ticket: i32,
        target: String,
        message: String,
        /// Due date, RFC 3339
        #[arg(long)]
        due: Option<String>,
    },
    /// Post an interim update
    Update {
        id: i32,
        percentage: i32,
        progress: String,
        /// Estimated completion, RFC 3339
        #[arg(long)]
        eta: Option<String>,
    },
    /// Answer a request
    Respond { id: i32, notes: String },
    /// Cancel a request (Admin)
    Cancel { id: i32 },
    /// List requests
    List {
        #[arg(short, long, default_value = "all")]
        filter: ProgressFilter,
    },
    /// Update history of a request
    History { id: i32 },
}

#[derive(Subcommand, Debug)]
enum NotificationCommand {
    List {
        #[arg(long)]
        unread: bool,
    },
    Read {
        id: i32,
        #[arg(long, default_value = "cli")]
        channel: String,
    },
    Resolve {
        id: i32,
        action: String,
        #[arg(short, long)]
        notes: Option<String>,
    },
    Stats,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load();
    init_tracing(&config);

    if let Err(e) = run(cli, config) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn current_actor(cli: &Cli) -> Result<Actor> {
    let id = cli
        .actor
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .ok_or_else(|| Error::Validation("no actor: pass --as or set TICKETFLOW_ACTOR".to_string()))?;
    if id.trim().is_empty() {
        return Err(Error::Validation("actor id must not be empty".to_string()));
    }
    Ok(Actor::new(id.trim(), cli.role))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Validation(format!("cannot encode output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn status_label(status: TicketStatus) -> colored::ColoredString {
    let text = status.as_str();
    match status {
        TicketStatus::Open | TicketStatus::Reopened => text.cyan(),
        TicketStatus::Paused => text.yellow(),
        TicketStatus::Confirmed => text.blue(),
        TicketStatus::Closed => text.green(),
        TicketStatus::Cancelled => text.dimmed(),
    }
}

fn print_ticket_line(t: &Ticket) {
    let blocking = if t.is_blocking { " [blocking]".red().to_string() } else { String::new() };
    let deleted = if t.is_deleted { " (deleted)".dimmed().to_string() } else { String::new() };
    println!(
        "{:>5}  {:<20} {:<10} {}{}{}",
        t.id.to_string().bold(),
        t.external_code,
        status_label(t.status),
        t.title,
        blocking,
        deleted
    );
}

fn print_detail(d: &TicketDetail) {
    let t = &d.ticket;
    println!("{} {}", t.external_code.bold(), t.title.bold());
    println!("   status:   {}", status_label(t.status));
    if let Some(label) = &t.confirmation_status {
        println!("   confirm:  {}", label);
    }
    println!("   owner:    {}  (created {})", t.owner_id, t.created_at);
    if let Some(resolved) = &t.resolution_date {
        println!("   resolved: {}", resolved);
    }
    if let Some(desc) = &t.description {
        println!("\n{}", desc);
    }

    println!("\n{}", "Ledger".cyan().bold());
    for a in &d.actions {
        let change = match (a.from_status, a.to_status) {
            (Some(from), Some(to)) => format!("{} -> {}", from, to),
            (None, Some(to)) => format!("-> {}", to),
            _ => String::new(),
        };
        println!(
            "   {} {:<12} {:<22} {} {}",
            a.created_at.dimmed(),
            a.kind.as_str(),
            change,
            a.performed_by,
            a.notes.as_deref().unwrap_or("")
        );
    }

    if !d.pauses.is_empty() {
        println!("\n{}", "Pauses".cyan().bold());
        for p in &d.pauses {
            let state = if p.is_active { "active".yellow() } else { "resumed".green() };
            println!(
                "   #{} {} {}h  {}",
                p.pause.id, state, p.duration_hours, p.pause.reason
            );
        }
    }

    if !d.progress_requests.is_empty() {
        println!("\n{}", "Progress requests".cyan().bold());
        for r in &d.progress_requests {
            print_request_line(r);
        }
    }
}

fn print_request_line(r: &ProgressRequestView) {
    let overdue = if r.is_overdue { " OVERDUE".red().bold().to_string() } else { String::new() };
    println!(
        "   #{} ticket {} {} -> {} [{} {}%]{}  {}",
        r.request.id,
        r.request.ticket_id,
        r.request.requested_by,
        r.request.target_id,
        r.request.status,
        r.request.current_percentage,
        overdue,
        r.request.message
    );
}

fn print_notification_line(v: &NotificationView) {
    let n = &v.notification;
    let marker = if v.is_read { " ".normal() } else { "*".yellow().bold() };
    let action = if n.requires_action && !n.is_resolved { " [action]".red().to_string() } else { String::new() };
    println!(
        "{} {:>5} {:<8} {:<18} {}{}",
        marker, n.id, n.priority.as_str(), n.kind.as_str(), n.title, action
    );
}

fn run(cli: Cli, config: Config) -> Result<()> {
    match &cli.command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "ticketflow", &mut std::io::stdout());
            return Ok(());
        }
        Command::Init => return init(config),
        _ => {}
    }

    let db = Database::open_with_config(config)?;
    let actor = current_actor(&cli)?;
    let json = cli.json;

    match cli.command {
        Command::Init | Command::Completion { .. } => unreachable!("handled before the database opens"),

        Command::Create { title, description, code, blocking } => {
            let ticket = db.create_ticket(
                NewTicketInput {
                    title,
                    description,
                    external_code: code,
                    is_blocking: blocking,
                },
                &actor,
            )?;
            if json {
                print_json(&ticket)?;
            } else {
                println!("{} ticket {} ({})", "Created".green(), ticket.id, ticket.external_code);
            }
        }

        Command::List { status, all, ongoing } => {
            let tickets = if ongoing {
                db.ongoing_tickets()?
            } else {
                db.list_tickets(TicketFilter {
                    status,
                    include_deleted: all,
                })?
            };
            if json {
                print_json(&tickets)?;
            } else if tickets.is_empty() {
                println!("{}", "No tickets.".dimmed());
            } else {
                tickets.iter().for_each(print_ticket_line);
            }
        }

        Command::Show { id } => {
            let detail = db.ticket_detail(id)?;
            if json {
                print_json(&detail)?;
            } else {
                print_detail(&detail);
            }
        }

        Command::Status { id, to, notes, confirmation } => {
            let ticket = db.change_status(id, to, notes.as_deref(), confirmation.as_deref(), &actor)?;
            if json {
                print_json(&ticket)?;
            } else {
                println!("{} ticket {} is now {}", "Updated".green(), id, status_label(ticket.status));
            }
        }

        Command::Comment { id, body } => {
            let comment = db.add_comment(id, &body, &actor)?;
            if json {
                print_json(&comment)?;
            } else {
                println!("{} comment {} on ticket {}", "Added".green(), comment.id, id);
            }
        }

        Command::Edit { id, title, description, blocking, active } => {
            let ticket = db.edit_ticket(
                id,
                TicketEdit {
                    title,
                    description,
                    is_blocking: blocking,
                    is_active: active,
                },
                &actor,
            )?;
            if json {
                print_json(&ticket)?;
            } else {
                println!("{} ticket {}", "Edited".green(), id);
            }
        }

        Command::Delete { id } => {
            let ticket = db.soft_delete_ticket(id, &actor)?;
            if json {
                print_json(&ticket)?;
            } else {
                println!("{} ticket {}", "Deleted".yellow(), id);
            }
        }

        Command::Restore { id } => {
            let ticket = db.restore_ticket(id, &actor)?;
            if json {
                print_json(&ticket)?;
            } else {
                println!("{} ticket {}", "Restored".green(), id);
            }
        }

        Command::Pause { id, reason } => {
            let pause = db.create_pause(id, &reason, &actor)?;
            if json {
                print_json(&pause)?;
            } else {
                println!("{} ticket {} (pause #{})", "Paused".yellow(), id, pause.id);
            }
        }

        Command::Resume { pause_id, notes } => {
            let pause = db.resume_pause(pause_id, notes.as_deref(), &actor)?;
            if json {
                print_json(&pause)?;
            } else {
                println!("{} ticket {}", "Resumed".green(), pause.ticket_id);
            }
        }

        Command::Progress(cmd) => run_progress(&db, &actor, json, cmd)?,
        Command::Notifications(cmd) => run_notifications(&db, &actor, json, cmd)?,

        Command::Stats { all } => {
            let counts = db.status_counts(all)?;
            if json {
                print_json(&counts)?;
            } else {
                for (status, count) in &counts {
                    println!("{:<10} {}", status_label(*status), count);
                }
            }
        }

        Command::Serve { port, workers } => {
            let mut server = db.config().server.clone();
            if let Some(port) = port {
                server.port = port;
            }
            if let Some(workers) = workers {
                server.workers = workers;
            }
            eprintln!("\n{}", "Ticketflow API".green().bold());
            eprintln!("   Listening on http://localhost:{}", server.port);
            eprintln!("   Press Ctrl+C to stop\n");
            ticketflow::serve::start(db, &server).map_err(|e| Error::Connection(e.to_string()))?;
        }
    }
    Ok(())
}

fn date_arg(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|raw| {
        parse_ts(&raw).ok_or_else(|| Error::Validation(format!("'{}' is not an RFC 3339 date", raw)))
    })
    .transpose()
}

fn run_progress(db: &Database, actor: &Actor, json: bool, cmd: ProgressCommand) -> Result<()> {
    match cmd {
        ProgressCommand::Request { ticket, target, message, due } => {
            let due = date_arg(due)?;
            let request = db.create_progress_request(ticket, &target, &message, due, actor)?;
            if json {
                print_json(&request)?;
            } else {
                println!("{} progress request {} to {}", "Sent".green(), request.id, target);
            }
        }
        ProgressCommand::Update { id, percentage, progress, eta } => {
            let request = db.update_progress(id, &progress, percentage, date_arg(eta)?, actor)?;
            if json {
                print_json(&request)?;
            } else {
                println!("{} request {} at {}%", "Updated".green(), id, request.current_percentage);
            }
        }
        ProgressCommand::Respond { id, notes } => {
            let request = db.respond(id, &notes, actor)?;
            if json {
                print_json(&request)?;
            } else {
                println!("{} request {}", "Answered".green(), id);
            }
        }
        ProgressCommand::Cancel { id } => {
            let request = db.cancel_progress_request(id, actor)?;
            if json {
                print_json(&request)?;
            } else {
                println!("{} request {}", "Cancelled".yellow(), id);
            }
        }
        ProgressCommand::List { filter } => {
            let feed = db.progress_feed(actor, filter)?;
            if json {
                print_json(&feed)?;
            } else if feed.is_empty() {
                println!("{}", "No progress requests.".dimmed());
            } else {
                feed.iter().for_each(print_request_line);
            }
        }
        ProgressCommand::History { id } => {
            let updates = db.progress_history(id)?;
            if json {
                print_json(&updates)?;
            } else {
                for u in &updates {
                    println!("   {} {:>3}% {}  {}", u.created_at.dimmed(), u.percentage, u.updated_by, u.progress);
                }
            }
        }
    }
    Ok(())
}

fn run_notifications(db: &Database, actor: &Actor, json: bool, cmd: NotificationCommand) -> Result<()> {
    match cmd {
        NotificationCommand::List { unread } => {
            let feed = db.notification_feed(actor, unread)?;
            if json {
                print_json(&feed)?;
            } else if feed.is_empty() {
                println!("{}", "Nothing new.".dimmed());
            } else {
                feed.iter().for_each(print_notification_line);
            }
        }
        NotificationCommand::Read { id, channel } => {
            let fresh = db.mark_read(id, actor, &channel)?;
            if json {
                print_json(&serde_json::json!({ "newly_read": fresh }))?;
            } else if fresh {
                println!("{} notification {}", "Read".green(), id);
            } else {
                println!("Notification {} was already read", id);
            }
        }
        NotificationCommand::Resolve { id, action, notes } => {
            let n = db.resolve_notification(id, actor, &action, notes.as_deref())?;
            if json {
                print_json(&n)?;
            } else {
                println!("{} notification {}", "Resolved".green(), id);
            }
        }
        NotificationCommand::Stats => {
            let stats = db.notification_stats(actor)?;
            if json {
                print_json(&stats)?;
            } else {
                println!(
                    "total {}  unread {}  pending action {}",
                    stats.total,
                    stats.unread.to_string().yellow(),
                    stats.pending_action.to_string().red()
                );
            }
        }
    }
    Ok(())
}

/// Create the store directory, database and a default config
fn init(config: Config) -> Result<()> {
    println!("\n{}", "Initializing ticketflow...".cyan().bold());

    let dir = PathBuf::from(".ticketflow");
    let config_path = dir.join("config.toml");
    if std::env::var_os("TICKETFLOW_DB_PATH").is_none() {
        std::fs::create_dir_all(&dir).map_err(|e| Error::Connection(e.to_string()))?;
        if !config_path.exists() {
            let text = toml::to_string_pretty(&config)
                .map_err(|e| Error::Validation(format!("cannot encode config: {}", e)))?;
            std::fs::write(&config_path, text).map_err(|e| Error::Connection(e.to_string()))?;
            println!("   {} {}", "Creating".green(), config_path.display());
        }
    }

    let db = Database::open_with_config(config)?;
    let path = Database::db_path();
    println!("   {} {}", "Using".green(), path.display());
    let schema = db.schema_history()?;
    if let Some(current) = schema.last() {
        println!("   {} v{} ({})", "Schema".green(), current.version, current.name);
    }

    println!("\n{}", "ticketflow initialized!".green().bold());
    Ok(())
}
