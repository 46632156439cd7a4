use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use webmention_core::config::{CONFIG_FILE, DATABASE_FILE};
use webmention_core::model::{Mention, MentionStatus, PostStatus};
use webmention_core::{Config, Database, DeliveryOutcome, Host, MentionService};

// Helper functions for the discover handler

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&Url>,
    urls_file: Option<&PathBuf>,
) -> anyhow::Result<Vec<String>> {
    if let Some(path) = urls_file {
        load_urls_from_file(path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        bail!("Either --url or --urls-file must be provided")
    }
}

/// Load and parse URLs from a newline-delimited file. `#` starts a comment.
pub fn load_urls_from_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file {}", path.display()))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        bail!("No valid URLs found in {}", path.display());
    }

    Ok(urls)
}

/// Parse a single line as an http(s) URL, adding https:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && matches!(url.scheme(), "http" | "https")
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("https://{}", line);
    if let Ok(url) = Url::parse(&with_scheme)
        && url.host_str().is_some_and(|host| host.contains('.') || host == "localhost")
    {
        return Some(with_scheme);
    }

    eprintln!("{} Skipping invalid URL '{}'", "⚠".yellow(), line);
    None
}

/// The database lives next to the config file.
pub fn database_path_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|dir| dir.join(DATABASE_FILE))
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILE))
}

/// One line describing a delivery result.
pub fn format_outcome(outcome: &DeliveryOutcome) -> String {
    match outcome {
        DeliveryOutcome::Sent {
            target,
            endpoint,
            status,
        } => format!("{} {} via {} ({})", "✓".green(), target, endpoint, status),
        DeliveryOutcome::AlreadySent { target } => {
            format!("{} {} already notified", "•".blue(), target)
        }
        DeliveryOutcome::Abandoned { target, retries } => format!(
            "{} {} abandoned after {} failures",
            "✗".red(),
            target,
            retries
        ),
        DeliveryOutcome::NotDue {
            target,
            next_attempt_at,
        } => format!(
            "{} {} retry due at {}",
            "→".yellow(),
            target,
            next_attempt_at.to_rfc3339()
        ),
        DeliveryOutcome::NoEndpoint { target } => {
            format!("{} {} has no endpoint", "-".dimmed(), target)
        }
        DeliveryOutcome::Failed {
            target,
            retries,
            error,
            ..
        } => format!(
            "{} {} failed (attempt {}): {}",
            "✗".red(),
            target,
            retries,
            error
        ),
    }
}

/// One table row for `mentions list`.
pub fn format_mention_row(mention: &Mention) -> String {
    let status = match mention.status {
        MentionStatus::Complete => mention.status.as_str().green(),
        MentionStatus::Queued => mention.status.as_str().yellow(),
        MentionStatus::Invalid | MentionStatus::Duplicate => mention.status.as_str().red(),
    };
    format!(
        "{:>5}  {:<9}  post {:<4}  {} -> {}",
        mention.id, status, mention.post_id, mention.source, mention.target
    )
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> String {
    print!("{} ", msg.bright_cyan().bold());
    let _ = io::stdout().flush();
    let mut response = String::new();
    if io::stdin().read_line(&mut response).is_err() {
        return String::new();
    }
    response.trim().to_lowercase()
}

fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message.into());
    spinner
}

fn config_path(args: &ArgMatches) -> PathBuf {
    let raw = args
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("~/.config/webmention/config.json");
    PathBuf::from(shellexpand::tilde(raw).to_string())
}

fn load_config(args: &ArgMatches) -> anyhow::Result<(PathBuf, Config)> {
    let config_path = config_path(args);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    Ok((config_path, config))
}

/// Opens the database next to `config_path`.
fn open_service_with(
    config_path: &Path,
    config: Config,
) -> anyhow::Result<(Arc<Database>, MentionService<Database>)> {
    let db_path = database_path_for(config_path);
    if !Database::exists(&db_path) {
        bail!(
            "No database at {}. Run `webmention init` first.",
            db_path.display()
        );
    }

    let db = Arc::new(Database::new(&db_path, &config)?);
    let service = MentionService::new(db.clone(), config)?;
    Ok((db, service))
}

fn open_service(args: &ArgMatches) -> anyhow::Result<(Arc<Database>, MentionService<Database>)> {
    let (config_path, config) = load_config(args)?;
    open_service_with(&config_path, config)
}

pub fn handle_init(args: &ArgMatches) -> anyhow::Result<()> {
    print_divider();
    println!("{}", "  WEBMENTION INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let dir = args
        .get_one::<String>("PATH")
        .map(String::as_str)
        .unwrap_or("~/.config/webmention/");
    let force = args.get_flag("force");
    let config_dir = PathBuf::from(shellexpand::tilde(dir).to_string());
    let config_path = config_dir.join(CONFIG_FILE);
    let db_path = config_dir.join(DATABASE_FILE);

    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );
    println!();

    let config_exists = config_path.exists();
    let db_exists = Database::exists(&db_path);

    if (config_exists || db_exists) && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("An existing installation was found:");
        for path in [&config_path, &db_path].into_iter().filter(|p| p.exists()) {
            println!(
                "  {} {}",
                "•".yellow(),
                path.display().to_string().bright_white()
            );
        }
        println!();
        println!("{}", "This operation will overwrite existing files.".yellow());

        let response = print_prompt("Do you want to continue? [y/N]:");
        println!();

        if response != "y" && response != "yes" {
            println!("{} Initialization cancelled.", "✗".red().bold());
            return Ok(());
        }
    }

    fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    let mut config = Config::default();
    if let Some(site_url) = args.get_one::<Url>("site-url") {
        config.site_url = site_url.as_str().trim_end_matches('/').to_string();
    }
    config.save(&config_path)?;
    println!(
        "{} Config written: {}",
        "✓".green().bold(),
        config_path.display().to_string().bright_white()
    );

    if db_exists {
        Database::drop(&db_path)?;
        println!("{} Existing database removed", "✓".green().bold());
    }
    let db = Database::new(&db_path, &config)?;
    println!(
        "{} Database initialized: {} (schema v{})",
        "✓".green().bold(),
        db_path.display().to_string().bright_white(),
        db.schema_version()?
    );

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!("Add this to the <head> of every page:");
    println!(
        "  {}",
        webmention_core::advertisement_link(&config.endpoint_url()).bright_white()
    );
    println!();
    Ok(())
}

pub async fn handle_serve(args: &ArgMatches) -> anyhow::Result<()> {
    let (config_path, mut config) = load_config(args)?;
    if let Some(listen) = args.get_one::<String>("listen") {
        config.listen_addr = listen.clone();
    }
    let (_db, service) = open_service_with(&config_path, config)?;

    println!(
        "{} Accepting webmentions at {}",
        "→".blue(),
        service.config().endpoint_url().bright_white()
    );
    crate::server::serve(Arc::new(service)).await
}

pub async fn handle_run_due(args: &ArgMatches) -> anyhow::Result<()> {
    let (_db, service) = open_service(args)?;
    let now = Utc::now();
    service.activate(now)?;

    let spinner = spinner("Running due tasks...");
    let report = service.run_due_work(now).await?;
    spinner.finish_and_clear();

    println!(
        "{} Ran {} due task(s)",
        "✓".green().bold(),
        report.tasks_run.to_string().cyan()
    );
    for outcome in &report.deliveries {
        println!("  {}", format_outcome(outcome));
    }
    if report.processed.total() > 0 {
        println!(
            "  {} mentions processed: {} complete, {} invalid, {} duplicate, {} retry",
            report.processed.total(),
            report.processed.complete,
            report.processed.invalid,
            report.processed.duplicate,
            report.processed.retry
        );
    }
    Ok(())
}

pub fn handle_deactivate(args: &ArgMatches) -> anyhow::Result<()> {
    let (_db, service) = open_service(args)?;
    if service.deactivate()? {
        println!("{} Recurring mention processing removed", "✓".green().bold());
    } else {
        println!("{} Recurring mention processing was not scheduled", "→".blue());
    }
    Ok(())
}

pub async fn handle_process(args: &ArgMatches) -> anyhow::Result<()> {
    let (_db, service) = open_service(args)?;

    let spinner = spinner("Processing queued mentions...");
    let report = service.process_queue().await?;
    spinner.finish_and_clear();

    println!(
        "{} {} processed: {} complete, {} invalid, {} duplicate, {} retry",
        "✓".green().bold(),
        report.total().to_string().cyan(),
        report.complete,
        report.invalid,
        report.duplicate,
        report.retry
    );
    Ok(())
}

pub async fn handle_send(args: &ArgMatches) -> anyhow::Result<()> {
    let (_db, service) = open_service(args)?;
    let post_id = *args
        .get_one::<i64>("post")
        .ok_or_else(|| anyhow!("--post is required"))?;

    let spinner = spinner(format!("Sending webmentions for post {}...", post_id));
    let outcomes = service.send_webmentions(post_id, Utc::now()).await?;
    spinner.finish_and_clear();

    if outcomes.is_empty() {
        println!(
            "{} Nothing to send for post {}",
            "→".blue(),
            post_id
        );
    }
    for outcome in &outcomes {
        println!("{}", format_outcome(outcome));
    }
    Ok(())
}

pub async fn handle_discover(args: &ArgMatches) -> anyhow::Result<()> {
    let urls = load_urls_from_source(
        args.get_one::<Url>("url"),
        args.get_one::<PathBuf>("urls-file"),
    )?;

    let (_, config) = load_config(args)?;
    let http = webmention_scanner::HttpClient::new(config.http)?;
    let discoverer = webmention_scanner::Discoverer::new(http);

    let progress = ProgressBar::new(urls.len() as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        progress.set_style(style);
    }

    let mut found = Vec::with_capacity(urls.len());
    for url in &urls {
        progress.set_message(url.clone());
        found.push((url, discoverer.discover(url).await));
        progress.inc(1);
    }
    progress.finish_and_clear();

    for (url, endpoint) in found {
        match endpoint {
            Some(endpoint) => println!(
                "{} {} -> {}",
                "✓".green(),
                url,
                endpoint.as_str().bright_white()
            ),
            None => println!("{} {} -> {}", "✗".red(), url, "no endpoint".dimmed()),
        }
    }
    Ok(())
}

pub fn handle_post_add(args: &ArgMatches) -> anyhow::Result<()> {
    let (db, service) = open_service(args)?;

    let slug = args
        .get_one::<String>("slug")
        .ok_or_else(|| anyhow!("--slug is required"))?;
    let post_type = args
        .get_one::<String>("type")
        .map(String::as_str)
        .unwrap_or("post");
    let title = args
        .get_one::<String>("title")
        .map(String::as_str)
        .unwrap_or_default();
    let content = match args.get_one::<PathBuf>("content-file") {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => args.get_one::<String>("content").cloned().unwrap_or_default(),
    };

    let id = db.insert_post(post_type, slug, title, &content)?;
    println!("{} Post {} created ({})", "✓".green().bold(), id, slug);

    if args.get_flag("publish") {
        publish_post(&db, &service, id)?;
    }
    Ok(())
}

pub fn handle_post_publish(args: &ArgMatches) -> anyhow::Result<()> {
    let (db, service) = open_service(args)?;
    let id = *args
        .get_one::<i64>("id")
        .ok_or_else(|| anyhow!("--id is required"))?;
    publish_post(&db, &service, id)?;
    Ok(())
}

/// Publishes a post and schedules its webmentions. Only a change into
/// `published` schedules anything.
pub fn publish_post(
    db: &Database,
    service: &MentionService<Database>,
    id: i64,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    let previous = db
        .post(id)?
        .ok_or_else(|| anyhow!("Post {} not found", id))?;
    if previous.is_published() {
        println!(
            "{} {} is already published",
            "→".blue(),
            db.permalink(&previous).bright_white()
        );
        return Ok(None);
    }

    db.set_post_status(id, PostStatus::Published)?;
    let post = db
        .post(id)?
        .ok_or_else(|| anyhow!("Post {} not found", id))?;
    println!(
        "{} Published {}",
        "✓".green().bold(),
        db.permalink(&post).bright_white()
    );

    let due = service.schedule_on_publish(&post, Utc::now())?;
    match due {
        Some(due) => println!(
            "{} Webmentions scheduled for {}",
            "→".blue(),
            due.to_rfc3339()
        ),
        None => println!("{} No webmentions to send", "→".blue()),
    }
    Ok(due)
}

pub fn handle_mentions_list(args: &ArgMatches) -> anyhow::Result<()> {
    let (db, _service) = open_service(args)?;
    let status = args
        .get_one::<String>("status")
        .map(|s| s.parse::<MentionStatus>())
        .transpose()
        .map_err(|e| anyhow!("{}", e))?;

    let mentions = db.mentions(status)?;
    if mentions.is_empty() {
        println!("{} No mentions", "→".blue());
        return Ok(());
    }
    for mention in &mentions {
        println!("{}", format_mention_row(mention));
    }
    println!();
    println!("{} mention(s)", mentions.len().to_string().cyan());
    Ok(())
}
