use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub const DEFAULT_DB_PATH: &str = "~/.config/sitewalk/sitewalk.db";

/// Flags shared by every command that walks a hierarchy.
fn traversal_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(--"follow" <REGEX>)
            .required(false)
            .help("Only expand child sitemaps whose URL matches (repeatable; default: follow all)")
            .action(clap::ArgAction::Append),
    )
    .arg(
        arg!(--"rule" <REGEX>)
            .required(false)
            .help("Only keep leaf URLs that match (repeatable; default: keep all)")
            .action(clap::ArgAction::Append),
    )
    .arg(
        arg!(--"start-from" <TIME>)
            .required(false)
            .help("Skip entries whose lastmod is older than TIME (e.g. 2024-01-01, 2024-01-01T00:00:00Z)"),
    )
    .arg(
        arg!(--"alternates")
            .required(false)
            .help("Also emit xhtml:link alternates of each entry")
            .action(clap::ArgAction::SetTrue),
    )
    .arg(
        arg!(--"timeout" <SECONDS>)
            .required(false)
            .help("Request timeout in seconds")
            .value_parser(clap::value_parser!(u64))
            .default_value("30"),
    )
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("sitewalk")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("sitewalk")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"log-level" <LEVEL>)
                .required(false)
                .help("Log verbosity written to stderr")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .global(true),
        )
        .arg(
            arg!(-d --"db" <PATH>)
                .required(false)
                .help("Location of the sitewalk database")
                .default_value(DEFAULT_DB_PATH)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            command!("init")
                .about("Initializes the sitewalk database on your filesystem")
                .arg(
                    arg!(-f --"force")
                        .help("Forces the overwriting of any existing database at the specified location.")
                        .required(false),
                ),
        )
        .subcommand(traversal_args(
            command!("load")
                .about("Walk a sitemap hierarchy and store every sitemap and URL it lists")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("robots.txt or sitemap URL to start from (default: the stored root)")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(--"batch-size" <N>)
                        .required(false)
                        .help("Events per database commit")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("100"),
                )
                .arg(
                    arg!(--"overwrite")
                        .required(false)
                        .help("Replace stored records with what the walk finds (default: keep existing)")
                        .action(clap::ArgAction::SetTrue),
                ),
        ))
        .subcommand(traversal_args(
            command!("walk")
                .about("Walk a sitemap hierarchy and print each discovery as a JSON line")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("robots.txt or sitemap URL to start from")
                        .value_parser(clap::value_parser!(Url)),
                ),
        ))
        .subcommand(
            command!("roots")
                .about("List the top-level documents of stored hierarchies")
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Output format: text, json, csv")
                        .value_parser(["text", "json", "csv"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("recent")
                .about("Show the most recently modified entry, or every entry changed since a time")
                .arg(
                    arg!(-t --"since" <TIME>)
                        .required(false)
                        .help("List entries modified after TIME instead of the single newest"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Output format: text, json, csv")
                        .value_parser(["text", "json", "csv"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
}
