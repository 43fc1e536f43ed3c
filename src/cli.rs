use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "yeargrid",
    version,
    about = "Scrollable year calendar with colored days and day notes"
)]
pub struct Cli {
    /// Path to a YAML config file
    #[arg(long, global = true, env = "YEARGRID_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a project-local store in the current directory
    Init,
    /// Print one year as a text grid
    Show {
        /// Year to print (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,
    },
    /// Color a day
    Mark {
        /// Day in YYYY-MM-DD format
        date: String,
        /// #rrggbb or a palette id such as `yellow`
        color: String,
    },
    /// Remove the color from a day
    Unmark {
        /// Day in YYYY-MM-DD format
        date: String,
    },
    /// Set or clear the note of a day
    Note {
        /// Day in YYYY-MM-DD format
        date: String,
        /// Note text; blank text removes the note
        text: Option<String>,
        /// Remove the note
        #[arg(long, conflicts_with = "text")]
        clear: bool,
    },
    /// Manage the color palette
    Palette {
        #[command(subcommand)]
        action: PaletteCommand,
    },
    /// Write all colors, notes and custom colors to a JSON file
    Export {
        /// Output path (defaults to a timestamped file in the current directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replace all annotations with the contents of an export file
    Import {
        /// Export file to read
        path: PathBuf,
    },
    /// Launch the interactive calendar
    Tui,
}

#[derive(Subcommand, Debug)]
pub enum PaletteCommand {
    /// List built-in and custom colors
    List,
    /// Add a custom color
    Add {
        /// Color as #rrggbb
        color: String,
        /// Optional display label
        #[arg(long)]
        label: Option<String>,
    },
    /// Remove a custom color by id
    Remove {
        /// Palette id
        id: String,
    },
}
