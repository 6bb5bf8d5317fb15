//! OS-level process isolation for one execution (spec.md §4.5 step 3).
//!
//! Grounded on the teacher's `runner/oci/runner.rs` pattern of shelling out
//! to an external sandboxing binary and falling back when it's missing —
//! here the binary is `bwrap` instead of `crun`/`pasta`, and the namespace
//! flags are passed directly rather than assembled into an OCI bundle.

use std::path::Path;
use tokio::process::Command;

/// Directories bind-mounted read-only into every execution (spec.md §4.5 step 3).
const READ_ONLY_BINDS: &[&str] = &["/usr", "/lib", "/lib64", "/bin", "/sbin"];

/// Resource ceilings applied via `ulimit` inside the wrapper shell.
pub const MAX_NPROC: u32 = 128;
pub const MAX_NOFILE: u32 = 1024;

/// True if `bwrap` is on `PATH` and runs.
pub async fn bwrap_available() -> bool {
    Command::new("bwrap")
        .arg("--version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Build the command that runs `argv` under isolation, with `workspace`
/// bind-mounted writable at `/workspace`. When `disable_bwrap` is set the
/// same ulimits apply but no namespaces or binds are created.
pub fn build_isolated_command(workspace: &Path, argv: &[String], disable_bwrap: bool) -> Command {
    let inner = shell_quote_argv(argv);
    let wrapped = format!("ulimit -u {MAX_NPROC}; ulimit -n {MAX_NOFILE}; exec {inner}");

    if disable_bwrap {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(wrapped);
        cmd.current_dir(workspace);
        return cmd;
    }

    let mut cmd = Command::new("bwrap");
    for dir in READ_ONLY_BINDS {
        if Path::new(dir).exists() {
            cmd.arg("--ro-bind").arg(dir).arg(dir);
        }
    }
    if Path::new("/etc/resolv.conf").exists() {
        cmd.arg("--ro-bind").arg("/etc/resolv.conf").arg("/etc/resolv.conf");
    }
    cmd.arg("--bind").arg(workspace).arg("/workspace");
    cmd.arg("--chdir").arg("/workspace");
    cmd.arg("--unshare-pid");
    cmd.arg("--unshare-net");
    cmd.arg("--unshare-ipc");
    cmd.arg("--unshare-uts");
    cmd.arg("--die-with-parent");
    cmd.arg("--cap-drop").arg("ALL");
    cmd.arg("--");
    cmd.arg("/bin/sh").arg("-c").arg(wrapped);
    cmd
}

fn shell_quote_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|a| format!("'{}'", a.replace('\'', "'\\''")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns an error message if isolation can't run and the config doesn't
/// permit falling back (spec.md §4.5: "exit non-zero on missing tool").
pub async fn verify_isolation_available(disable_bwrap: bool) -> Result<(), String> {
    if disable_bwrap {
        return Ok(());
    }
    if bwrap_available().await {
        Ok(())
    } else {
        Err("bwrap not found on PATH and DISABLE_BWRAP is not set".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_argv_escapes_single_quotes() {
        let argv = vec!["python3".to_string(), "it's.py".to_string()];
        assert_eq!(shell_quote_argv(&argv), "'python3' 'it'\\''s.py'");
    }

    #[test]
    fn disabled_bwrap_runs_wrapper_directly() {
        let argv = vec!["python3".to_string(), "_wrapper.py".to_string()];
        let cmd = build_isolated_command(Path::new("/tmp/ws"), &argv, true);
        assert_eq!(cmd.as_std().get_program(), "/bin/sh");
    }

    #[test]
    fn bwrap_command_carries_namespace_flags() {
        let argv = vec!["python3".to_string(), "_wrapper.py".to_string()];
        let cmd = build_isolated_command(Path::new("/tmp/ws"), &argv, false);
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "bwrap");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert!(args.contains(&"--die-with-parent".to_string()));
        assert!(args.contains(&"--unshare-pid".to_string()));
    }
}
