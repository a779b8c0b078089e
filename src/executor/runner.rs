use std::path::Path;
use tokio::process::Command;

/// Platform-native script invocation.
///
/// One implementation per target platform, selected once at startup via
/// [`native_runner`], so the executor itself carries no OS branching.
pub trait ScriptRunner: Send + Sync {
    /// File extension for staged script files, including the dot.
    fn file_extension(&self) -> &'static str;

    /// Adjust the script source before it is written to disk.
    fn prepare(&self, script: &str) -> String;

    /// Build the interpreter invocation for a staged script file.
    fn command(&self, script_path: &Path) -> Command;
}

/// Runs scripts through bash, injecting a shebang when the payload carries
/// none.
pub struct PosixShellRunner;

impl ScriptRunner for PosixShellRunner {
    fn file_extension(&self) -> &'static str {
        ".sh"
    }

    fn prepare(&self, script: &str) -> String {
        if script.starts_with("#!") {
            script.to_string()
        } else {
            format!("#!/bin/bash\n{script}")
        }
    }

    fn command(&self, script_path: &Path) -> Command {
        let mut cmd = Command::new("/bin/bash");
        cmd.arg(script_path);
        cmd
    }
}

/// Runs scripts through Windows PowerShell.
pub struct PowerShellRunner;

impl ScriptRunner for PowerShellRunner {
    fn file_extension(&self) -> &'static str {
        ".ps1"
    }

    fn prepare(&self, script: &str) -> String {
        script.to_string()
    }

    fn command(&self, script_path: &Path) -> Command {
        let mut cmd = Command::new("powershell");
        cmd.arg("-NoProfile")
            .arg("-ExecutionPolicy")
            .arg("Bypass")
            .arg("-File")
            .arg(script_path);
        cmd
    }
}

/// Runner for the platform this binary was built for.
#[cfg(unix)]
pub fn native_runner() -> Box<dyn ScriptRunner> {
    Box::new(PosixShellRunner)
}

#[cfg(windows)]
pub fn native_runner() -> Box<dyn ScriptRunner> {
    Box::new(PowerShellRunner)
}
