use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("sitewalk")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("sitewalk")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" ...)
                .help("Increase log verbosity (-v info, -vv debug, -vvv trace)")
                .required(false)
                .global(true),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            command!("init")
                .about("Initializes the sitewalk database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location to store the sitewalk database")
                        .default_value("~/.config/sitewalk/"),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite any existing database at the specified location.")
                        .required(false),
                ),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Politely crawl a site or collection of sites, reporting page metadata, \
                duplicate content and broken links.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("The URL to crawl")
                        .value_parser(clap::value_parser!(Url))
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of URLs to crawl")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("url"),
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("JSON crawl configuration; command-line flags override its values")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-m --"max-pages" <NUM>)
                        .required(false)
                        .help("Maximum number of pages to visit per site [default: 100]")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-w --"workers" <NUM_WORKERS>)
                        .required(false)
                        .help("Pages fetched concurrently in each batch [default: 5]")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-d --"delay" <SECONDS>)
                        .required(false)
                        .help("Pause between batches [default: 1.0]")
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    arg!(--"domain-interval" <SECONDS>)
                        .required(false)
                        .help("Minimum spacing between requests to one domain [default: 1.0]")
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    arg!(--"max-depth" <DEPTH>)
                        .required(false)
                        .help("Do not follow links deeper than this many hops from the seed")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"no-robots")
                        .required(false)
                        .help("Ignore robots.txt")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"strip-tracking")
                        .required(false)
                        .help("Drop utm_* and similar tracking parameters when comparing URLs")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"sitemaps")
                        .required(false)
                        .help("Also queue the pages listed in the site's sitemaps")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"check-links")
                        .required(false)
                        .help("Probe every discovered link and report broken ones")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"check-external")
                        .required(false)
                        .help("Also probe links that leave the crawled site")
                        .action(clap::ArgAction::SetTrue)
                        .requires("check-links"),
                )
                .arg(
                    arg!(--"user-agent" <AGENT>)
                        .required(false)
                        .help("User-Agent header sent with every request"),
                )
                .arg(
                    arg!(--"json")
                        .required(false)
                        .help("Print results as JSON instead of the text report")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save the report to a file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Directory holding sitewalk.db")
                        .default_value("~/.config/sitewalk/"),
                )
                .arg(
                    arg!(--"no-save")
                        .required(false)
                        .help("Do not record the session in the database")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("sessions")
                .about("Inspect crawl sessions recorded in the database")
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Directory holding sitewalk.db")
                        .default_value("~/.config/sitewalk/")
                        .global(true),
                )
                .subcommand_required(true)
                .subcommand(command!("list").about("List all sessions, newest first"))
                .subcommand(
                    command!("show")
                        .about("Show the pages, duplicates and broken links of a session")
                        .arg(arg!(<ID>).help("Session id")),
                )
                .subcommand(
                    command!("remove")
                        .about("Delete a session and everything recorded for it")
                        .arg(arg!(<ID>).help("Session id")),
                ),
        )
}
