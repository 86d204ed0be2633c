use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use aish::plugins::{AiPlugin, ExtensionPlugin, PathCompletePlugin, PromptPlugin};
use aish::shell::{Shell, DEFAULT_FILE_NAME};
use aish::{logger, util, ShellError};

#[derive(Parser)]
#[command(
    name = DEFAULT_FILE_NAME,
    about = "AI-native shell: one prompt for shell code and natural language"
)]
struct Cli {
    /// Command to execute
    #[arg(short = 'c', value_name = "COMMAND")]
    command: Option<String>,

    /// Script file and its positional parameters
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn fail(err: ShellError) -> ! {
    eprintln!("Error: {err}");
    process::exit(1);
}

#[tokio::main]
async fn main() {
    logger::init();
    let cli = Cli::parse();

    let shell = match build_shell(cli) {
        Ok(shell) => shell,
        Err(err) => fail(err),
    };

    if let Err(err) = shell.use_plugins(vec![
        Arc::new(PromptPlugin::new()),
        Arc::new(PathCompletePlugin::new()),
        Arc::new(ExtensionPlugin::new()),
        Arc::new(AiPlugin::new()),
    ]) {
        fail(err);
    }

    if let Err(err) = shell.start().await {
        fail(err);
    }

    process::exit(shell.exit_status().unwrap_or(0));
}

fn build_shell(cli: Cli) -> Result<Arc<Shell>, ShellError> {
    let wd = std::env::current_dir()?;
    let executable = std::env::current_exe()?;
    let executable = executable.to_string_lossy().to_string();
    let environ = vec![
        ("SHELL".to_string(), executable.clone()),
        ("AISH".to_string(), executable),
    ];

    let mut file_name = None;
    let mut absolute_file_name: Option<PathBuf> = None;
    let mut params = Vec::new();

    // Precedence: -c inline command, then a script file, then real stdin.
    let stdin: Option<File> = if let Some(command) = cli.command.as_deref() {
        let mut bytes = command.as_bytes().to_vec();
        bytes.push(b'\n');
        Some(util::reader_descriptor(bytes)?)
    } else if let Some((script, rest)) = cli.args.split_first() {
        let path = std::env::var("PATH").unwrap_or_default();
        let Some(abs) = util::look_path(script, &wd, &path) else {
            return Err(ShellError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{script}: no such file"),
            )));
        };
        let file = File::open(&abs)?;
        file_name = Some(script.clone());
        absolute_file_name = Some(abs);
        params = rest.to_vec();
        Some(file)
    } else {
        None
    };

    let mut builder = Shell::builder().environ(environ).params(params);
    if let Some(name) = file_name {
        builder = builder.file_name(name, absolute_file_name);
    }
    if let Some(stdin) = stdin {
        builder = builder.stdio(stdin, util::dup_stdio(1)?, util::dup_stdio(2)?);
    }
    builder.build()
}
