use crate::CLAP_STYLING;
use clap::{arg, command};
use std::path::PathBuf;
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("webmention")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("webmention")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-c --"config" <PATH>)
                .required(false)
                .global(true)
                .help("Path to config.json; the database is kept next to it")
                .default_value("~/.config/webmention/config.json"),
        )
        .subcommand_required(true)
        .subcommand(
            command!("init")
                .about("Creates the config file and database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Directory to store config.json and webmention.db")
                        .default_value("~/.config/webmention/"),
                )
                .arg(
                    arg!(--"site-url" <URL>)
                        .required(false)
                        .help("Public URL of your site, e.g. https://blog.example")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrites any existing config and database without asking")
                        .required(false),
                ),
        )
        .subcommand(
            command!("serve")
                .about("Runs the intake endpoint and processes due work on a timer")
                .arg(
                    arg!(-l --"listen" <ADDR>)
                        .required(false)
                        .help("Address to bind, overriding listen_addr from the config"),
                ),
        )
        .subcommand(
            command!("run-due")
                .about("Runs every scheduled task that is due now, then exits. Suited to cron."),
        )
        .subcommand(
            command!("deactivate")
                .about("Removes the recurring processing task. serve and run-due add it back."),
        )
        .subcommand(command!("process").about("Processes one batch of queued incoming mentions"))
        .subcommand(
            command!("send")
                .about("Sends webmentions for every link in a published post")
                .arg(
                    arg!(-p --"post" <ID>)
                        .required(true)
                        .help("The post id")
                        .value_parser(clap::value_parser!(i64)),
                ),
        )
        .subcommand(
            command!("discover")
                .about("Looks up the webmention endpoint advertised by a URL or list of URLs")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("The URL to check")
                        .value_parser(clap::value_parser!(Url))
                        .conflicts_with("urls-file"),
                )
                .arg(
                    arg!(-U --"urls-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of URLs to check")
                        .value_parser(clap::value_parser!(PathBuf))
                        .conflicts_with("url"),
                ),
        )
        .subcommand(
            command!("post")
                .about("Manage posts")
                .subcommand_required(true)
                .subcommand(
                    command!("add")
                        .about("Adds a post as a draft")
                        .arg(
                            arg!(-s --"slug" <SLUG>)
                                .required(true)
                                .help("The post slug"),
                        )
                        .arg(
                            arg!(-t --"type" <TYPE>)
                                .required(false)
                                .help("The post type")
                                .default_value("post"),
                        )
                        .arg(arg!(--"title" <TITLE>).required(false).help("The post title"))
                        .arg(
                            arg!(--"content" <HTML>)
                                .required(false)
                                .help("The post content as HTML")
                                .conflicts_with("content-file"),
                        )
                        .arg(
                            arg!(--"content-file" <PATH>)
                                .required(false)
                                .help("Read the post content from a file")
                                .value_parser(clap::value_parser!(PathBuf))
                                .conflicts_with("content"),
                        )
                        .arg(
                            arg!(--"publish")
                                .required(false)
                                .help("Publish right away and schedule webmentions")
                                .action(clap::ArgAction::SetTrue),
                        ),
                )
                .subcommand(
                    command!("publish")
                        .about("Publishes a post and schedules its webmentions")
                        .arg(
                            arg!(-i --"id" <ID>)
                                .required(true)
                                .help("The post id")
                                .value_parser(clap::value_parser!(i64)),
                        ),
                ),
        )
        .subcommand(
            command!("mentions")
                .about("Inspect received mentions")
                .subcommand_required(true)
                .subcommand(
                    command!("list").about("Lists received mentions").arg(
                        arg!(-s --"status" <STATUS>)
                            .required(false)
                            .help("Only show mentions with this status")
                            .value_parser(["queued", "invalid", "duplicate", "complete"]),
                    ),
                ),
        )
}
