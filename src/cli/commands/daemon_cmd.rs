//! `bd daemon run|stop|status`.

use std::time::Duration;

use crate::cli::DaemonCommand;
use crate::cli::commands::{GlobalOpts, emit, load_workspace};
use crate::daemon;
use crate::error::Result;

pub fn execute(command: &DaemonCommand, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;

    match command {
        DaemonCommand::Run { idle_timeout } => {
            daemon::run(&workspace, Duration::from_secs(*idle_timeout))
        }
        DaemonCommand::Start => {
            let spawned = daemon::ensure_running(&workspace)?;
            emit(
                globals.use_json(),
                &serde_json::json!({"spawned": spawned}),
                || {
                    if spawned {
                        "Daemon started".to_string()
                    } else {
                        "Daemon already running (or disabled)".to_string()
                    }
                },
            );
            Ok(())
        }
        DaemonCommand::Stop => {
            #[cfg(unix)]
            {
                let stopped = daemon::stop(&workspace.socket_path())?;
                emit(
                    globals.use_json(),
                    &serde_json::json!({"stopped": stopped}),
                    || {
                        if stopped {
                            "Daemon stopped".to_string()
                        } else {
                            "No daemon running".to_string()
                        }
                    },
                );
                Ok(())
            }
            #[cfg(not(unix))]
            {
                emit(
                    globals.use_json(),
                    &serde_json::json!({"stopped": false}),
                    || "Daemon unsupported on this platform".to_string(),
                );
                Ok(())
            }
        }
        DaemonCommand::Status => {
            let registry = daemon::read_registry(&workspace.beads_dir)?;
            #[cfg(unix)]
            let responsive = daemon::is_responsive(&workspace.socket_path());
            #[cfg(not(unix))]
            let responsive = false;

            emit(
                globals.use_json(),
                &serde_json::json!({
                    "registry": registry,
                    "responsive": responsive,
                }),
                || match &registry {
                    Some(info) if responsive => {
                        format!("Daemon running (pid {}, version {})", info.pid, info.version)
                    }
                    Some(info) => format!("Daemon registered (pid {}) but not responding", info.pid),
                    None => "No daemon".to_string(),
                },
            );
            Ok(())
        }
    }
}
