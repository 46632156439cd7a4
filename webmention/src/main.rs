use colored::Colorize;
use commands::command_argument_builder;
use tracing_subscriber::EnvFilter;
use webmention::handlers::*;

mod commands;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let chosen_command = command_argument_builder().get_matches();

    let result = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("serve", primary_command)) => handle_serve(primary_command).await,
        Some(("run-due", primary_command)) => handle_run_due(primary_command).await,
        Some(("deactivate", primary_command)) => handle_deactivate(primary_command),
        Some(("process", primary_command)) => handle_process(primary_command).await,
        Some(("send", primary_command)) => handle_send(primary_command).await,
        Some(("discover", primary_command)) => handle_discover(primary_command).await,
        Some(("post", primary_command)) => match primary_command.subcommand() {
            Some(("add", secondary_command)) => handle_post_add(secondary_command),
            Some(("publish", secondary_command)) => handle_post_publish(secondary_command),
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("mentions", primary_command)) => match primary_command.subcommand() {
            Some(("list", secondary_command)) => handle_mentions_list(secondary_command),
            _ => unreachable!("clap should ensure we don't get here"),
        },
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
