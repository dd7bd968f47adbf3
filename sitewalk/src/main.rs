use colored::Colorize;
use sitewalk::commands::command_argument_builder;
use sitewalk::handlers::{
    handle_init, handle_load, handle_recent, handle_roots, handle_walk, init_logging,
};

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    let log_level = chosen_command
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    init_logging(log_level);

    let result = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command, quiet),
        Some(("load", primary_command)) => handle_load(primary_command, quiet).await,
        Some(("walk", primary_command)) => handle_walk(primary_command).await,
        Some(("roots", primary_command)) => handle_roots(primary_command),
        Some(("recent", primary_command)) => handle_recent(primary_command, quiet),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
