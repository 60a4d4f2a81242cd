use beads_git::cli::commands::{self, GlobalOpts};
use beads_git::cli::{Cli, Commands};
use beads_git::logging::init_logging;
use beads_git::{BeadsError, StructuredError};
use clap::Parser;
use std::io::IsTerminal;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet) {
        eprintln!("failed to initialize logging: {e}");
    }

    let globals = GlobalOpts {
        json: cli.json,
        actor: cli.actor.clone(),
        db: cli.db.clone(),
        no_auto_import: cli.no_auto_import,
        no_auto_flush: cli.no_auto_flush,
    };

    let is_mutating = is_mutating_command(&cli.command);

    let result = match &cli.command {
        Commands::Init(args) => commands::init::execute(args, &globals),
        Commands::Create(args) => commands::create::execute(args, &globals),
        Commands::Update(args) => commands::update::execute(args, &globals),
        Commands::Close(args) => commands::lifecycle::close(args, &globals),
        Commands::Reopen(args) => commands::lifecycle::reopen(args, &globals),
        Commands::Delete(args) => commands::delete::execute(args, &globals),
        Commands::Show(args) => commands::show::execute(args, &globals),
        Commands::List(args) => commands::list::execute(args, &globals),
        Commands::Blocked => commands::list::blocked(&globals),
        Commands::Ready(args) => commands::ready::execute(args, &globals),
        Commands::Dep { command } => commands::dep::execute(command, &globals),
        Commands::Label { command } => commands::label::execute(command, &globals),
        Commands::Comment(args) => commands::comment::execute(args, &globals),
        Commands::Config { command } => commands::config_cmd::execute(command, &globals),
        Commands::RenamePrefix(args) => commands::config_cmd::rename_prefix(args, &globals),
        Commands::Export(args) => commands::export::execute(args, &globals),
        Commands::Import(args) => commands::import::execute(args, &globals),
        Commands::Sync(args) => commands::sync_cmd::execute(args, &globals),
        Commands::Merge(args) => commands::merge_driver::execute(args, &globals),
        Commands::Hooks { command } => commands::hooks_cmd::execute(command, &globals),
        Commands::Daemon { command } => commands::daemon_cmd::execute(command, &globals),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json);
    }

    // Flush pending records after successful mutating commands so the JSONL
    // mirror in the working tree stays current.
    if is_mutating && !cli.no_auto_flush {
        run_auto_flush(&globals);
    }
}

const fn is_mutating_command(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Create(_)
            | Commands::Update(_)
            | Commands::Close(_)
            | Commands::Reopen(_)
            | Commands::Delete(_)
            | Commands::Dep { .. }
            | Commands::Label { .. }
            | Commands::Comment(_)
            | Commands::RenamePrefix(_)
    )
}

fn run_auto_flush(globals: &GlobalOpts) {
    let Ok(workspace) = commands::load_workspace(globals) else {
        return;
    };
    let Ok(mut storage) = workspace.open_storage() else {
        return;
    };
    match beads_git::sync::export::auto_flush(&mut storage, &workspace.jsonl_path) {
        Ok(0) => {}
        Ok(flushed) => tracing::debug!(flushed, "auto-flush complete"),
        // Auto-flush failures never fail the command that triggered them.
        Err(e) => tracing::debug!(error = %e, "auto-flush failed (non-fatal)"),
    }
}

fn handle_error(err: &BeadsError, json_flag: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = err.exit_code();

    let use_json = json_flag || !std::io::stdout().is_terminal();
    if use_json {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        let use_color = std::io::stderr().is_terminal();
        eprintln!("{}", structured.to_human(use_color));
    }

    std::process::exit(exit_code);
}
