use anyhow::Result;
use clap::Parser;
use yeargrid::cli::{self, Command, PaletteCommand};
use yeargrid::{commands, config, logging, storage};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config = config::load_config(args.config.as_deref())?;
    let log_dir = match config.data_dir.clone() {
        Some(dir) => dir,
        None => storage::global_data_dir()?,
    };
    if let Err(err) = logging::init(&log_dir.join("yeargrid.log"), &config.log_level) {
        eprintln!("logging disabled: {:#}", err);
    }

    let command = args.command.unwrap_or(Command::Tui);
    match command {
        Command::Init => commands::init(),
        Command::Show { year } => commands::show(config, year),
        Command::Mark { date, color } => commands::mark(config, date, color),
        Command::Unmark { date } => commands::unmark(config, date),
        Command::Note { date, text, clear } => commands::note(config, date, text, clear),
        Command::Palette { action } => match action {
            PaletteCommand::List => commands::palette_list(config),
            PaletteCommand::Add { color, label } => commands::palette_add(config, color, label),
            PaletteCommand::Remove { id } => commands::palette_remove(config, id),
        },
        Command::Export { out } => commands::export(config, out),
        Command::Import { path } => commands::import(config, path),
        Command::Tui => commands::tui(config),
    }
}
