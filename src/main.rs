use std::path::PathBuf;
use std::process::exit;

use clap::{Parser as ClapParser, Subcommand};
use datascript::{parse_source, Interpreter, Value};

#[derive(ClapParser)]
#[command(name = "datascript")]
#[command(about = "Datascript - a scripting language with schemas and a document-store DSL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file
    Run {
        /// Path to the .ds file
        file: PathBuf,
    },

    /// Evaluate an inline source string and print its result
    Eval {
        /// Source text to evaluate
        source: String,

        /// Print the result as JSON instead of the inspect form
        #[arg(long)]
        json: bool,
    },

    /// Parse a file without running it
    Check {
        /// Path to the .ds file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { file } => {
            let mut interp = Interpreter::new();
            interp.run_file(&file).map(|_| ())
        }
        Commands::Eval { source, json } => {
            let mut interp = Interpreter::new();
            interp.run_source(&source).map(|value| {
                if matches!(value, Value::Null) {
                    return;
                }
                if json {
                    match datascript::to_json(&value) {
                        Ok(rendered) => println!("{}", rendered),
                        Err(e) => println!("<{}>", e),
                    }
                } else {
                    println!("{}", datascript::inspect(&value));
                }
            })
        }
        Commands::Check { file } => match std::fs::read_to_string(&file) {
            Ok(source) => parse_source(&source)
                .map(|_| println!("syntax OK"))
                .map_err(datascript::Error::Parse),
            Err(e) => Err(datascript::Error::Io(format!(
                "cannot read {}: {}",
                file.display(),
                e
            ))),
        },
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        exit(1);
    }
}
